// ------------------------------------------------------------
// Cart–Pole with LQR reference tracking (nonlinear plant)
//   - Gain synthesized once on the upright linearization
//   - Nonlinear plant integrated with adaptive Dormand–Prince per sample
//   - Reference: x = 1 m for the first half, x = -0.5 m for the second
//
// Output folder (default):
//   output/cartpole/trajectory.csv
//   output/cartpole/*.png plots
//
// Logging is controlled with RUST_LOG (default: info).
// ------------------------------------------------------------

use anyhow::{Context, Result};
use cartpole_lqr::batch::{perturbed_initial_states, success_rate, sweep_initial_states};
use cartpole_lqr::{ScenarioConfig, State, Trajectory};
use clap::Parser;
use plotters::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "cartpole", about = "Simulate a cart-pole tracking a reference under LQR control")]
struct Cli {
    /// Scenario file (JSON); the built-in scenario is used when omitted.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Apply zero force and record the natural response instead.
    #[arg(long)]
    open_loop: bool,

    #[arg(long, value_name = "DIR", default_value = "output/cartpole")]
    out_dir: PathBuf,

    /// Skip PNG plots, write only the CSV.
    #[arg(long)]
    no_plots: bool,

    /// Print the effective scenario as JSON and exit.
    #[arg(long)]
    dump_config: bool,

    /// Also run N closed-loop simulations from perturbed initial states.
    #[arg(long, value_name = "N")]
    sweep: Option<usize>,

    /// Seed for the perturbed initial states.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

// ------------------------------------------------------------
// CSV writer
// ------------------------------------------------------------
const CSV_HEADER: [&str; 8] = [
    "t", "x", "theta", "x_dot", "theta_dot", "u", "x_ref", "theta_ref",
];

fn write_trajectory_csv(filename: &Path, trajectory: &Trajectory) -> Result<()> {
    let mut wtr = csv::Writer::from_path(filename)
        .with_context(|| format!("CSV: cannot open {}", filename.display()))?;

    wtr.write_record(CSV_HEADER)?;
    for s in trajectory {
        let row = [
            s.time,
            s.state.position,
            s.state.angle,
            s.state.velocity,
            s.state.angular_velocity,
            s.control,
            s.reference.position,
            s.reference.angle,
        ];
        wtr.write_record(row.iter().map(f64::to_string))?;
    }
    wtr.flush()?;
    Ok(())
}

// ------------------------------------------------------------
// Plot saving (Plotters)
// ------------------------------------------------------------
struct Series<'a> {
    label: &'a str,
    y: &'a [f64],
    color: RGBColor,
}

fn save_line_plot_png(
    filename: &Path,
    title: &str,
    xlabel: &str,
    ylabel: &str,
    x: &[f64],
    series: &[Series<'_>],
) -> Result<()> {
    if series.is_empty() || x.is_empty() {
        anyhow::bail!("Plot error: nothing to draw.");
    }
    if series.iter().any(|s| s.y.len() != x.len()) {
        anyhow::bail!("Plot error: x and y must have the same length.");
    }

    let (w, h) = (2400u32, 1800u32);

    let xmin = x.iter().copied().fold(f64::INFINITY, f64::min);
    let xmax = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut ymin = f64::INFINITY;
    let mut ymax = f64::NEG_INFINITY;
    for s in series {
        for &v in s.y {
            ymin = ymin.min(v);
            ymax = ymax.max(v);
        }
    }

    let ypad = 0.05 * (ymax - ymin).abs().max(1e-9);
    ymin -= ypad;
    ymax += ypad;

    let root = BitMapBackend::new(filename, (w, h)).into_drawing_area();
    root.fill(&RGBColor(255, 255, 255))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption(title, ("sans-serif", 76))
        .x_label_area_size(110)
        .y_label_area_size(140)
        .build_cartesian_2d(xmin..xmax, ymin..ymax)?;

    chart
        .configure_mesh()
        .x_desc(xlabel)
        .y_desc(ylabel)
        .axis_desc_style(("sans-serif", 60))
        .label_style(("sans-serif", 44))
        .x_labels(10)
        .y_labels(10)
        .x_label_formatter(&|v| format!("{:.1}", v))
        .y_label_formatter(&|v| format!("{:.2}", v))
        .bold_line_style(RGBColor(160, 160, 160).stroke_width(2))
        .light_line_style(RGBColor(220, 220, 220).stroke_width(1))
        .draw()?;

    for s in series {
        let color = s.color;
        chart
            .draw_series(LineSeries::new(
                x.iter().copied().zip(s.y.iter().copied()),
                color.stroke_width(4),
            ))?
            .label(s.label)
            .legend(move |(lx, ly)| PathElement::new(vec![(lx, ly), (lx + 40, ly)], color.stroke_width(4)));
    }

    if series.len() > 1 {
        chart
            .configure_series_labels()
            .label_font(("sans-serif", 44))
            .background_style(RGBColor(255, 255, 255).mix(0.8))
            .border_style(RGBColor(160, 160, 160))
            .draw()?;
    }

    root.present()?;
    Ok(())
}

fn save_plots(out_dir: &Path, trajectory: &Trajectory) -> Result<()> {
    let t: Vec<f64> = trajectory.times().collect();
    let x: Vec<f64> = trajectory.states().map(|s| s.position).collect();
    let theta: Vec<f64> = trajectory.states().map(|s| s.angle).collect();
    let u: Vec<f64> = trajectory.controls().collect();
    let x_ref: Vec<f64> = trajectory.iter().map(|s| s.reference.position).collect();

    let actual = RGBColor(30, 90, 200);
    let reference = RGBColor(220, 80, 40);

    save_line_plot_png(
        &out_dir.join("cart_position.png"),
        "Cart Position x(t)",
        "time (s)",
        "x (m)",
        &t,
        &[
            Series { label: "x", y: &x, color: actual },
            Series { label: "x_ref", y: &x_ref, color: reference },
        ],
    )?;
    save_line_plot_png(
        &out_dir.join("pole_angle.png"),
        "Pole Angle theta(t) (0=upright)",
        "time (s)",
        "theta (rad)",
        &t,
        &[Series { label: "theta", y: &theta, color: actual }],
    )?;
    save_line_plot_png(
        &out_dir.join("control_force.png"),
        "Control Force u(t) (LQR)",
        "time (s)",
        "u (N)",
        &t,
        &[Series { label: "u", y: &u, color: actual }],
    )?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    // ----------------------------
    // Scenario
    // ----------------------------
    let config = match &cli.config {
        Some(path) => ScenarioConfig::from_json_file(path)
            .with_context(|| format!("Failed to load scenario {}", path.display()))?,
        None => ScenarioConfig::default(),
    };

    if cli.dump_config {
        println!("{}", config.to_json_string()?);
        return Ok(());
    }

    let scenario = config.build().context("Invalid scenario")?;

    let k = scenario.controller.gain();
    println!(
        "LQR gain K = [{:.4}, {:.4}, {:.4}, {:.4}]",
        k[0], k[1], k[2], k[3]
    );
    match scenario.controller.closed_loop_eigenvalues() {
        Some(eigenvalues) => {
            for ev in eigenvalues {
                println!("  closed-loop eigenvalue {:.4} {:+.4}i", ev.re, ev.im);
            }
        }
        None => log::warn!("closed-loop eigenvalues unavailable: Schur decomposition did not converge"),
    }

    // ----------------------------
    // Output folders
    // ----------------------------
    fs::create_dir_all(&cli.out_dir).context("Failed to create output directories")?;
    let csv_path = cli.out_dir.join("trajectory.csv");

    // ----------------------------
    // Simulation
    // ----------------------------
    let run = if cli.open_loop {
        scenario.run_open_loop()
    } else {
        scenario.run()
    };

    let trajectory = match run {
        Ok(trajectory) => trajectory,
        Err(failure) => {
            write_trajectory_csv(&csv_path, &failure.partial)?;
            println!("Partial trajectory written to {}", csv_path.display());
            return Err(failure).context("Simulation aborted");
        }
    };

    write_trajectory_csv(&csv_path, &trajectory)?;
    println!("CSV written: {}", csv_path.display());

    if let Some(last) = trajectory.last() {
        println!(
            "Final state at t = {:.3} s: {} (max |theta| = {:.4} rad, max |u| = {:.3} N)",
            last.time,
            last.state,
            trajectory.max_abs_angle(),
            trajectory.max_abs_control()
        );
    }

    if !cli.no_plots {
        save_plots(&cli.out_dir, &trajectory)?;
        println!("Plots saved in {}", cli.out_dir.display());
    }

    // ----------------------------
    // Optional Monte-Carlo sweep
    // ----------------------------
    if let Some(n) = cli.sweep {
        let spread = State::new(0.25, 10.0_f64.to_radians(), 0.0, 0.0);
        let initials = perturbed_initial_states(scenario.initial_state, spread, n, cli.seed);
        let results = sweep_initial_states(&scenario, &initials);
        let failed = results.iter().filter(|r| r.is_err()).count();
        println!(
            "Sweep of {n} runs: {failed} failed, {:.1}% settled within 0.05 of the final target",
            100.0 * success_rate(&results, 0.05)
        );
    }

    Ok(())
}
