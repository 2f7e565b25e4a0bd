//! Uniform sample grid starting at `t = 0`.

use crate::error::{CartPoleError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeGrid {
    samples: usize,
    dt: f64,
}

impl TimeGrid {
    /// `samples` points spaced by `dt`, the first at `t = 0`.
    ///
    /// # Errors
    ///
    /// A configuration error if `samples < 2` or `dt` is not finite and positive.
    pub fn new(samples: usize, dt: f64) -> Result<Self> {
        if samples < 2 {
            return Err(CartPoleError::configuration(
                "samples",
                format!("need at least 2 samples, got {samples}"),
            ));
        }
        if !(dt.is_finite() && dt > 0.0) {
            return Err(CartPoleError::configuration(
                "dt",
                format!("must be finite and > 0, got {dt}"),
            ));
        }
        Ok(Self { samples, dt })
    }

    /// `round(t_final · rate)` points spanning `[0, t_final]` inclusive.
    ///
    /// # Errors
    ///
    /// A configuration error if either input is not finite and positive or
    /// the product rounds to fewer than 2 samples.
    pub fn from_duration(t_final: f64, sample_rate: f64) -> Result<Self> {
        if !(t_final.is_finite() && t_final > 0.0) {
            return Err(CartPoleError::configuration(
                "t_final",
                format!("must be finite and > 0, got {t_final}"),
            ));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(CartPoleError::configuration(
                "sample_rate",
                format!("must be finite and > 0, got {sample_rate}"),
            ));
        }
        let n = (t_final * sample_rate).round();
        if n < 2.0 || n > usize::MAX as f64 {
            return Err(CartPoleError::configuration(
                "sample_rate",
                format!("t_final * sample_rate = {n} is not a usable sample count"),
            ));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let samples = n as usize;
        Self::new(samples, t_final / (samples - 1) as f64)
    }

    #[must_use]
    pub const fn samples(&self) -> usize {
        self.samples
    }

    #[must_use]
    pub const fn dt(&self) -> f64 {
        self.dt
    }

    /// `t_i = i · dt`.
    #[must_use]
    pub fn time(&self, index: usize) -> f64 {
        index as f64 * self.dt
    }

    #[must_use]
    pub fn t_final(&self) -> f64 {
        self.time(self.samples - 1)
    }

    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.samples).map(|i| self.time(i))
    }
}
