//! Windowed-sinc FIR design.
//!
//! Transition bandwidths and lengths follow the usual automatic rules:
//!   • low edge:  l_trans = min(max(0.25 * l_freq, 2.0), l_freq)
//!   • high edge: h_trans = min(max(0.25 * h_freq, 2.0), nyquist - h_freq)
//!   • length N = ceil(3.3 / min(trans) * sfreq), rounded up to odd
//!
//! Cutoffs sit in the middle of each transition band. Band-pass is the
//! difference of two low-pass kernels; high-pass is spectral inversion.
use std::f64::consts::PI;

use crate::error::{DspError, Result};

/// Transition bandwidth below a high-pass edge at `l_freq`.
pub fn low_trans_bandwidth(l_freq: f64) -> f64 {
    (0.25 * l_freq).max(2.0).min(l_freq)
}

/// Transition bandwidth above a low-pass edge at `h_freq`.
pub fn high_trans_bandwidth(h_freq: f64, sfreq: f64) -> f64 {
    (0.25 * h_freq).max(2.0).min(sfreq / 2.0 - h_freq)
}

/// Number of taps for a transition bandwidth; always odd.
pub fn auto_filter_length(trans_bw: f64, sfreq: f64) -> usize {
    let n_raw = (3.3 / trans_bw * sfreq).ceil() as usize;
    if n_raw % 2 == 0 { n_raw + 1 } else { n_raw }
}

/// Design the zero-phase kernel for `[l_freq, h_freq]`.
///
/// `None` bounds give a high-pass (`h_freq` absent), a low-pass (`l_freq`
/// absent) or no filter at all (both absent, returns `Ok(None)`).
pub fn design_filter(l_freq: Option<f64>, h_freq: Option<f64>, sfreq: f64) -> Result<Option<Vec<f64>>> {
    let nyq = sfreq / 2.0;
    if let Some(l) = l_freq {
        if !(l > 0.0 && l < nyq) {
            return Err(DspError::InvalidArgument(format!(
                "l_freq {} must lie in (0, {})",
                l, nyq
            )));
        }
    }
    if let Some(h) = h_freq {
        if !(h > 0.0 && h < nyq) {
            return Err(DspError::InvalidArgument(format!(
                "h_freq {} must lie in (0, {})",
                h, nyq
            )));
        }
    }

    let kernel = match (l_freq, h_freq) {
        (None, None) => return Ok(None),
        (Some(l), None) => {
            let l_trans = low_trans_bandwidth(l);
            let n = auto_filter_length(l_trans, sfreq);
            firwin(n, l - l_trans / 2.0, sfreq, false)?
        }
        (None, Some(h)) => {
            let h_trans = high_trans_bandwidth(h, sfreq);
            let n = auto_filter_length(h_trans, sfreq);
            firwin(n, h + h_trans / 2.0, sfreq, true)?
        }
        (Some(l), Some(h)) => {
            if l >= h {
                return Err(DspError::InvalidArgument(format!(
                    "l_freq {} must be below h_freq {}",
                    l, h
                )));
            }
            let l_trans = low_trans_bandwidth(l);
            let h_trans = high_trans_bandwidth(h, sfreq);
            let n = auto_filter_length(l_trans.min(h_trans), sfreq);
            let upper = firwin(n, h + h_trans / 2.0, sfreq, true)?;
            let lower = firwin(n, l - l_trans / 2.0, sfreq, true)?;
            upper.iter().zip(&lower).map(|(u, l)| u - l).collect()
        }
    };
    Ok(Some(kernel))
}

/// Hamming-windowed sinc with unit DC gain; `pass_zero = false` inverts it
/// into a high-pass.
pub fn firwin(n: usize, cutoff_hz: f64, sfreq: f64, pass_zero: bool) -> Result<Vec<f64>> {
    if n % 2 == 0 {
        return Err(DspError::InvalidArgument(format!(
            "linear-phase FIR needs an odd length, got {}",
            n
        )));
    }
    let alpha = (n - 1) as f64 / 2.0;
    let fc = cutoff_hz / (sfreq / 2.0);
    let win = hamming(n);

    let mut h: Vec<f64> = (0..n)
        .map(|i| {
            let x = i as f64 - alpha;
            let sinc = if x == 0.0 { fc } else { (PI * fc * x).sin() / (PI * x) };
            sinc * win[i]
        })
        .collect();

    let s: f64 = h.iter().sum();
    h.iter_mut().for_each(|v| *v /= s);

    if !pass_zero {
        h.iter_mut().for_each(|v| *v = -*v);
        h[n / 2] += 1.0;
    }
    Ok(h)
}

/// Hamming window of length `n`.
pub fn hamming(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Magnitude response of `h` at `freq`.
    fn gain(h: &[f64], freq: f64, sfreq: f64) -> f64 {
        let w = 2.0 * PI * freq / sfreq;
        let (re, im) = h.iter().enumerate().fold((0.0, 0.0), |(re, im), (k, &v)| {
            (re + v * (w * k as f64).cos(), im - v * (w * k as f64).sin())
        });
        (re * re + im * im).sqrt()
    }

    #[test]
    fn lengths_are_odd() {
        for l_freq in [0.5, 1.0, 2.0, 5.0] {
            let n = auto_filter_length(low_trans_bandwidth(l_freq), 256.0);
            assert!(n % 2 == 1, "N={n} is even for l_freq={l_freq}");
        }
    }

    #[test]
    fn highpass_known_length_256hz() {
        let h = design_filter(Some(0.5), None, 256.0).unwrap().unwrap();
        assert_eq!(h.len(), 1691);
        assert_abs_diff_eq!(h.iter().sum::<f64>(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn lowpass_dc_gain_unity() {
        let h = firwin(101, 10.0, 256.0, true).unwrap();
        assert_abs_diff_eq!(h.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn bandpass_passes_centre_and_stops_edges() {
        let sfreq = 250.0;
        let h = design_filter(Some(8.0), Some(30.0), sfreq).unwrap().unwrap();
        let n = h.len();
        for i in 0..n / 2 {
            assert_abs_diff_eq!(h[i], h[n - 1 - i], epsilon = 1e-12);
        }
        assert_abs_diff_eq!(gain(&h, 18.0, sfreq), 1.0, epsilon = 0.01);
        assert!(gain(&h, 0.0, sfreq) < 0.01);
        assert!(gain(&h, 60.0, sfreq) < 0.01);
    }

    #[test]
    fn no_bounds_means_no_filter() {
        assert!(design_filter(None, None, 100.0).unwrap().is_none());
    }

    #[test]
    fn invalid_bounds_rejected() {
        assert!(design_filter(Some(30.0), Some(8.0), 250.0).is_err());
        assert!(design_filter(None, Some(125.0), 250.0).is_err());
        assert!(design_filter(Some(0.0), None, 250.0).is_err());
        assert!(firwin(10, 5.0, 100.0, true).is_err());
    }
}
