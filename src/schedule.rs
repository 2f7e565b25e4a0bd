//! Piecewise-constant reference schedule indexed by sample number.

use crate::error::{CartPoleError, Result};
use crate::state::State;

/// A target held for `samples` consecutive sample indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub target: State,
    pub samples: usize,
}

/// Ordered segments whose lengths partition `[0, N)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSchedule {
    segments: Vec<Segment>,
    // Exclusive end index of each segment.
    ends: Vec<usize>,
}

impl ReferenceSchedule {
    /// # Errors
    ///
    /// A configuration error if there are no segments, a segment is empty, a
    /// target is not finite, or the lengths do not sum to `total_samples`.
    pub fn new(segments: Vec<Segment>, total_samples: usize) -> Result<Self> {
        if segments.is_empty() {
            return Err(CartPoleError::configuration(
                "reference",
                "schedule needs at least one segment",
            ));
        }

        let mut ends = Vec::with_capacity(segments.len());
        let mut end = 0usize;
        for (k, segment) in segments.iter().enumerate() {
            if segment.samples == 0 {
                return Err(CartPoleError::configuration(
                    "reference",
                    format!("segment {k} has zero samples"),
                ));
            }
            if !segment.target.is_finite() {
                return Err(CartPoleError::configuration(
                    "reference",
                    format!("segment {k} target is not finite"),
                ));
            }
            end = end.checked_add(segment.samples).ok_or_else(|| {
                CartPoleError::configuration(
                    "reference",
                    format!("segment {k} pushes the total length past usize::MAX"),
                )
            })?;
            ends.push(end);
        }

        if end != total_samples {
            return Err(CartPoleError::configuration(
                "reference",
                format!("segments cover {end} samples, expected {total_samples}"),
            ));
        }

        Ok(Self { segments, ends })
    }

    /// `first` for the first `total / 2` samples, `second` for the rest.
    ///
    /// # Errors
    ///
    /// A configuration error if `total_samples < 2`.
    pub fn two_segment(total_samples: usize, first: State, second: State) -> Result<Self> {
        let half = total_samples / 2;
        Self::new(
            vec![
                Segment {
                    target: first,
                    samples: half,
                },
                Segment {
                    target: second,
                    samples: total_samples - half,
                },
            ],
            total_samples,
        )
    }

    /// A single target for the whole horizon.
    ///
    /// # Errors
    ///
    /// A configuration error if `total_samples == 0`.
    pub fn constant(total_samples: usize, target: State) -> Result<Self> {
        Self::new(
            vec![Segment {
                target,
                samples: total_samples,
            }],
            total_samples,
        )
    }

    /// Target active at sample `index`.
    ///
    /// # Errors
    ///
    /// A configuration error if `index >= total_samples()`.
    pub fn target(&self, index: usize) -> Result<&State> {
        let k = self.ends.partition_point(|&end| end <= index);
        self.segments.get(k).map(|s| &s.target).ok_or_else(|| {
            CartPoleError::configuration(
                "sample_index",
                format!("index {index} outside [0, {})", self.total_samples()),
            )
        })
    }

    #[must_use]
    pub fn total_samples(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}
