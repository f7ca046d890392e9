//! Event-locked epoching and evoked averages.
//!
//! Trials span `[tmin, tmax]` seconds around each event, converted to
//! samples with `round(t * sfreq)` and inclusive at both ends.
use ndarray::{Array2, Array3, Axis, s};
use serde::Serialize;

use crate::error::{DspError, Result};
use crate::events::{Event, EventId};
use crate::filter::{apply_fir_zero_phase_3d, design_filter};
use crate::raw::RawSignal;

/// Baseline interval in seconds; `None` means the window edge on that side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Baseline {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

/// Trials cut from a raw recording. `data` is `[n_epochs, n_channels, n_times]`.
#[derive(Debug, Clone)]
pub struct Epochs {
    pub data: Array3<f64>,
    pub events: Vec<Event>,
    pub event_id: EventId,
    pub ch_names: Vec<String>,
    pub sfreq: f64,
    /// Time of the first sample, in seconds relative to the event.
    pub tmin: f64,
    pub highpass: Option<f64>,
    pub lowpass: Option<f64>,
    /// Events whose window fell outside the recording.
    pub dropped: Vec<Event>,
}

impl Epochs {
    pub fn from_raw(
        raw: &RawSignal,
        events: &[Event],
        event_id: &EventId,
        tmin: f64,
        tmax: f64,
        baseline: Option<Baseline>,
    ) -> Result<Self> {
        if !(tmin.is_finite() && tmax.is_finite()) || tmin > tmax {
            return Err(DspError::InvalidArgument(format!(
                "bad epoch window [{}, {}]",
                tmin, tmax
            )));
        }
        let sfreq = raw.info.sfreq;
        let start = (tmin * sfreq).round();
        let stop = (tmax * sfreq).round();
        // Offsets stay within the recording length, so sample arithmetic cannot overflow.
        let limit = raw.n_times() as f64;
        if start.abs() > limit || stop.abs() > limit || stop - start + 1.0 > limit {
            return Err(DspError::InvalidArgument(format!(
                "epoch window [{}, {}] s does not fit a {} s recording",
                tmin,
                tmax,
                raw.duration_secs()
            )));
        }
        let start_off = start as i64;
        let stop_off = stop as i64;
        let n_times = (stop_off - start_off + 1) as usize;
        let total = raw.n_times() as i64;

        let mut kept = Vec::with_capacity(events.len());
        let mut dropped = Vec::new();
        for &e in events {
            let first = e.sample as i64 + start_off;
            let last = e.sample as i64 + stop_off;
            if first < 0 || last >= total {
                dropped.push(e);
            } else {
                kept.push(e);
            }
        }
        if kept.is_empty() {
            return Err(DspError::Empty(format!(
                "no trial of {} fits inside the recording",
                events.len()
            )));
        }
        if !dropped.is_empty() {
            tracing::debug!(dropped = dropped.len(), kept = kept.len(), "dropped trials at recording edges");
        }

        let n_ch = raw.n_channels();
        let mut data = Array3::<f64>::zeros((kept.len(), n_ch, n_times));
        for (k, e) in kept.iter().enumerate() {
            let first = (e.sample as i64 + start_off) as usize;
            data.slice_mut(s![k, .., ..])
                .assign(&raw.data.slice(s![.., first..first + n_times]));
        }

        let mut epochs = Self {
            data,
            events: kept,
            event_id: event_id.clone(),
            ch_names: raw.info.ch_names.clone(),
            sfreq,
            tmin: start_off as f64 / sfreq,
            highpass: None,
            lowpass: None,
            dropped,
        };
        if let Some(b) = baseline {
            epochs.apply_baseline(b)?;
        }
        Ok(epochs)
    }

    #[inline]
    pub fn n_epochs(&self) -> usize {
        self.data.shape()[0]
    }

    #[inline]
    pub fn n_channels(&self) -> usize {
        self.data.shape()[1]
    }

    #[inline]
    pub fn n_times(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn times(&self) -> Vec<f64> {
        (0..self.n_times())
            .map(|i| self.tmin + i as f64 / self.sfreq)
            .collect()
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.ch_names.iter().position(|n| n.eq_ignore_ascii_case(name))
    }

    /// Subtract each trial's per-channel mean over the baseline interval.
    pub fn apply_baseline(&mut self, baseline: Baseline) -> Result<()> {
        let times = self.times();
        let from = baseline.start.unwrap_or(f64::NEG_INFINITY);
        let to = baseline.end.unwrap_or(f64::INFINITY);
        // Half-sample tolerance so a bound equal to tmin/tmax hits its sample.
        let tol = 0.5 / self.sfreq;
        let lo = times.iter().position(|&t| t >= from - tol);
        let hi = times.iter().rposition(|&t| t <= to + tol);
        let (lo, hi) = match (lo, hi) {
            (Some(lo), Some(hi)) if lo <= hi => (lo, hi),
            _ => {
                return Err(DspError::InvalidArgument(format!(
                    "baseline {:?} lies outside the epoch",
                    baseline
                )))
            }
        };
        for mut trial in self.data.axis_iter_mut(Axis(0)) {
            for mut ch in trial.axis_iter_mut(Axis(0)) {
                let m = ch.slice(s![lo..=hi]).mean().unwrap_or(0.0);
                ch.mapv_inplace(|v| v - m);
            }
        }
        Ok(())
    }

    /// Zero-phase FIR filter every trial. Both bounds absent is a no-op.
    pub fn filter(&mut self, l_freq: Option<f64>, h_freq: Option<f64>) -> Result<()> {
        let Some(h) = design_filter(l_freq, h_freq, self.sfreq)? else {
            return Ok(());
        };
        if h.len() > self.n_times() {
            tracing::debug!(
                taps = h.len(),
                n_times = self.n_times(),
                "filter is longer than the trials; edges are padded"
            );
        }
        apply_fir_zero_phase_3d(&mut self.data, &h)?;
        self.highpass = l_freq;
        self.lowpass = h_freq;
        Ok(())
    }

    /// Keep every `decim`-th sample, starting from the first.
    pub fn decimate(&mut self, decim: usize) -> Result<()> {
        if decim == 0 {
            return Err(DspError::InvalidArgument("decim must be at least 1".into()));
        }
        if decim == 1 {
            return Ok(());
        }
        let new_sfreq = self.sfreq / decim as f64;
        let limit = self.lowpass.unwrap_or(self.sfreq / 2.0);
        if limit > new_sfreq / 2.0 {
            tracing::warn!(
                lowpass = limit,
                new_nyquist = new_sfreq / 2.0,
                decim,
                "decimating above the new Nyquist frequency; expect aliasing"
            );
        }
        self.data = self.data.slice(s![.., .., ..;decim]).to_owned();
        self.sfreq = new_sfreq;
        Ok(())
    }

    /// Indices of trials carrying `code`.
    pub fn select(&self, code: i32) -> Vec<usize> {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.code == code)
            .map(|(i, _)| i)
            .collect()
    }

    /// Trials carrying `code` as a new `[n, C, T]` array.
    pub fn trials(&self, code: i32) -> Result<Array3<f64>> {
        let idx = self.select(code);
        if idx.is_empty() {
            return Err(DspError::Empty(format!("no trial with code {}", code)));
        }
        Ok(self.data.select(Axis(0), &idx))
    }

    /// Average the trials carrying `code`.
    pub fn average(&self, code: i32) -> Result<Evoked> {
        let trials = self.trials(code)?;
        let nave = trials.shape()[0];
        let data = trials
            .mean_axis(Axis(0))
            .ok_or_else(|| DspError::Empty(format!("no trial with code {}", code)))?;
        Ok(Evoked {
            data,
            ch_names: self.ch_names.clone(),
            sfreq: self.sfreq,
            tmin: self.tmin,
            nave,
            code,
        })
    }
}

/// Average of the trials sharing one code. `data` is `[n_channels, n_times]`.
#[derive(Debug, Clone)]
pub struct Evoked {
    pub data: Array2<f64>,
    pub ch_names: Vec<String>,
    pub sfreq: f64,
    pub tmin: f64,
    pub nave: usize,
    pub code: i32,
}

impl Evoked {
    pub fn times(&self) -> Vec<f64> {
        (0..self.data.ncols())
            .map(|i| self.tmin + i as f64 / self.sfreq)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp_raw() -> RawSignal {
        let data = Array2::from_shape_fn((2, 1000), |(c, t)| (c * 10_000 + t) as f64);
        RawSignal::new(data, 100.0, vec!["CZ".into(), "PZ".into()]).unwrap()
    }

    fn ev(sample: usize, code: i32) -> Event {
        Event { sample, duration: 0, code }
    }

    #[test]
    fn window_is_inclusive_and_edges_dropped() {
        let raw = ramp_raw();
        let events = [ev(5, 1), ev(100, 1), ev(500, 2), ev(995, 2)];
        let epochs = Epochs::from_raw(&raw, &events, &EventId::new(), -0.1, 0.2, None).unwrap();
        assert_eq!(epochs.n_epochs(), 2);
        assert_eq!(epochs.n_times(), 31);
        assert_eq!(epochs.dropped.len(), 2);
        assert_eq!(epochs.data[[0, 0, 0]], 90.0);
        assert_eq!(epochs.data[[1, 1, 30]], 10_520.0);
        assert_abs_diff_eq!(epochs.times()[10], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn whole_window_baseline_zeroes_mean() {
        let raw = ramp_raw();
        let baseline = Baseline { start: Some(-0.1), end: None };
        let epochs = Epochs::from_raw(&raw, &[ev(100, 1)], &EventId::new(), -0.1, 0.2, Some(baseline)).unwrap();
        for c in 0..2 {
            let m = epochs.data.slice(s![0, c, ..]).mean().unwrap();
            assert_abs_diff_eq!(m, 0.0, epsilon = 1e-9);
        }
        // Ramp of 31 samples: first sample sits 15 below the mean.
        assert_abs_diff_eq!(epochs.data[[0, 0, 0]], -15.0, epsilon = 1e-9);
    }

    #[test]
    fn nothing_fits_is_empty() {
        let raw = ramp_raw();
        let err = Epochs::from_raw(&raw, &[ev(999, 1)], &EventId::new(), 0.0, 0.5, None);
        assert!(matches!(err, Err(DspError::Empty(_))));
    }

    #[test]
    fn window_longer_than_recording_is_rejected() {
        let raw = ramp_raw();
        let events = [ev(500, 1)];
        for (tmin, tmax) in [(-1e300, 1e300), (0.0, 1e12), (-20.0, -19.0), (-5.0, 5.0)] {
            let err = Epochs::from_raw(&raw, &events, &EventId::new(), tmin, tmax, None);
            assert!(
                matches!(err, Err(DspError::InvalidArgument(_))),
                "window [{}, {}] accepted",
                tmin,
                tmax
            );
        }
        // The whole recording as one window still fits.
        let whole = Epochs::from_raw(&raw, &[ev(0, 1)], &EventId::new(), 0.0, 9.99, None).unwrap();
        assert_eq!(whole.n_times(), 1000);
    }

    #[test]
    fn decimate_keeps_every_nth() {
        let raw = ramp_raw();
        let mut epochs = Epochs::from_raw(&raw, &[ev(100, 1)], &EventId::new(), 0.0, 0.2, None).unwrap();
        epochs.decimate(4).unwrap();
        assert_eq!(epochs.n_times(), 6);
        assert_eq!(epochs.sfreq, 25.0);
        assert_eq!(epochs.data[[0, 0, 1]], 104.0);
        assert!(epochs.decimate(0).is_err());
    }

    #[test]
    fn average_by_code() {
        let raw = ramp_raw();
        let events = [ev(100, 1), ev(200, 2), ev(300, 1)];
        let epochs = Epochs::from_raw(&raw, &events, &EventId::new(), 0.0, 0.1, None).unwrap();
        assert_eq!(epochs.select(1), vec![0, 2]);
        let evoked = epochs.average(1).unwrap();
        assert_eq!(evoked.nave, 2);
        assert_abs_diff_eq!(evoked.data[[0, 0]], 200.0, epsilon = 1e-12);
        assert!(matches!(epochs.average(9), Err(DspError::Empty(_))));
    }
}
