//! Message types sent from the auto-tuner to whoever is watching it

use serde::Serialize;
use std::fmt;

use crate::config::Threshold;

/// The parameters varied by one auto-tune trial
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrialParams {
    pub multiplier: f32,
    pub offset: f32,
    pub threshold: Threshold,
}

impl fmt::Display for TrialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "m:{} o:{} t:{}",
            self.multiplier, self.offset, self.threshold
        )
    }
}

/// Sent once per trial, before the trial's recognition call
#[derive(Debug, Clone, PartialEq)]
pub struct TuneProgress {
    /// 1-based trial index
    pub step: usize,
    /// Size of the whole grid
    pub total: usize,
    pub params: TrialParams,
}

impl fmt::Display for TuneProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Trying {}/{} - {}", self.step, self.total, self.params)
    }
}
