//! Continuous multichannel recordings held in memory.

use ndarray::Array2;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::{DspError, Result};
use crate::montage::Montage;

/// One annotation from the recording: onset and duration in seconds
/// relative to the first sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub onset: f64,
    pub duration: f64,
    pub description: String,
}

/// Measurement info for a [`RawSignal`].
#[derive(Debug, Clone, Serialize)]
pub struct SignalInfo {
    /// Sampling rate in Hz.
    pub sfreq: f64,
    pub ch_names: Vec<String>,
    /// Sensor position per channel (metres, head coordinates) once a
    /// montage has been attached.
    pub positions: Vec<Option<[f64; 3]>>,
    /// Start date/time string copied from the file header.
    pub meas_date: Option<String>,
}

/// A loaded raw recording. `data` is `[n_channels, n_times]` in volts.
#[derive(Debug, Clone)]
pub struct RawSignal {
    pub info: SignalInfo,
    pub data: Array2<f64>,
    pub annotations: Vec<Annotation>,
}

impl RawSignal {
    pub fn new(data: Array2<f64>, sfreq: f64, ch_names: Vec<String>) -> Result<Self> {
        if !(sfreq.is_finite() && sfreq > 0.0) {
            return Err(DspError::InvalidArgument(format!(
                "sampling rate must be positive, got {}",
                sfreq
            )));
        }
        if data.nrows() != ch_names.len() {
            return Err(DspError::InvalidArgument(format!(
                "{} channel names for {} data rows",
                ch_names.len(),
                data.nrows()
            )));
        }
        let positions = vec![None; ch_names.len()];
        Ok(Self {
            info: SignalInfo {
                sfreq,
                ch_names,
                positions,
                meas_date: None,
            },
            data,
            annotations: Vec::new(),
        })
    }

    #[inline]
    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    #[inline]
    pub fn n_times(&self) -> usize {
        self.data.ncols()
    }

    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.n_times() as f64 / self.info.sfreq
    }

    /// Index of `name`, compared case-insensitively.
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.info
            .ch_names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
    }

    /// Rename channels listed in `mapping`; others keep their name.
    pub fn rename_channels(&mut self, mapping: &HashMap<String, String>) {
        for name in self.info.ch_names.iter_mut() {
            if let Some(new_name) = mapping.get(name.as_str()) {
                *name = new_name.clone();
            }
        }
    }

    pub fn upper_case_channels(&mut self) {
        for name in self.info.ch_names.iter_mut() {
            *name = name.to_uppercase();
        }
    }

    /// Attach montage positions by channel name.
    ///
    /// Returns the channels that have no position in the montage; those keep
    /// `None` and the caller decides whether that matters.
    pub fn set_montage(&mut self, montage: &Montage) -> Vec<String> {
        let mut missing = Vec::new();
        for (idx, name) in self.info.ch_names.iter().enumerate() {
            let pos = montage.position(name);
            if pos.is_none() {
                missing.push(name.clone());
            }
            self.info.positions[idx] = pos;
        }
        missing
    }
}
