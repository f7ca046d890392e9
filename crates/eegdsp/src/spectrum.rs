//! Spectral estimates over epoched data.
//!
//! - [`welch_psd`]: Welch power spectral density (Hamming window, 50 %
//!   overlap, constant detrend, one-sided density), averaged over segments
//!   and trials.
//! - [`morlet_power`]: complex Morlet wavelet power, averaged over trials.
use ndarray::{Array2, Array3, ArrayView3, Axis};
use rustfft::{FftPlanner, num_complex::Complex};
use std::f64::consts::PI;

use crate::error::{DspError, Result};
use crate::filter::hamming;

const MAX_SEGMENT: usize = 256;

/// Power spectral density, `psd` is `[n_channels, n_freqs]` in V²/Hz.
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub freqs: Vec<f64>,
    pub psd: Array2<f64>,
}

/// Wavelet power, `power` is `[n_channels, n_freqs, n_times]` in V².
#[derive(Debug, Clone)]
pub struct TimeFrequency {
    pub times: Vec<f64>,
    pub freqs: Vec<f64>,
    pub power: Array3<f64>,
}

/// `n` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Welch PSD of `data` (`[E, C, T]`) restricted to `[fmin, fmax]`.
pub fn welch_psd(data: ArrayView3<f64>, sfreq: f64, fmin: f64, fmax: f64) -> Result<Spectrum> {
    let (n_e, n_c, n_t) = data.dim();
    if n_e == 0 || n_t == 0 {
        return Err(DspError::Empty("no samples for PSD".into()));
    }
    if fmin > fmax {
        return Err(DspError::InvalidArgument(format!(
            "fmin {} exceeds fmax {}",
            fmin, fmax
        )));
    }

    let n_seg = n_t.min(MAX_SEGMENT);
    let step = (n_seg - n_seg / 2).max(1);
    let n_segments = (n_t - n_seg) / step + 1;
    let window = hamming(n_seg);
    let scale = 1.0 / (sfreq * window.iter().map(|w| w * w).sum::<f64>());

    let all_freqs: Vec<f64> = (0..=n_seg / 2).map(|k| k as f64 * sfreq / n_seg as f64).collect();
    let keep: Vec<usize> = all_freqs
        .iter()
        .enumerate()
        .filter(|(_, f)| **f >= fmin && **f <= fmax)
        .map(|(i, _)| i)
        .collect();
    if keep.is_empty() {
        return Err(DspError::Empty(format!(
            "no frequency bin in [{}, {}] Hz",
            fmin, fmax
        )));
    }

    let mut planner: FftPlanner<f64> = FftPlanner::new();
    let fft = planner.plan_fft_forward(n_seg);
    let mut acc = Array2::<f64>::zeros((n_c, all_freqs.len()));
    let mut buf = vec![Complex::default(); n_seg];

    for trial in data.axis_iter(Axis(0)) {
        for (c, lane) in trial.axis_iter(Axis(0)).enumerate() {
            for seg in 0..n_segments {
                let start = seg * step;
                let chunk = lane.slice(ndarray::s![start..start + n_seg]);
                let mean = chunk.mean().unwrap_or(0.0);
                for (b, (&x, &w)) in buf.iter_mut().zip(chunk.iter().zip(&window)) {
                    *b = Complex { re: (x - mean) * w, im: 0.0 };
                }
                fft.process(&mut buf);
                for (k, slot) in acc.row_mut(c).iter_mut().enumerate() {
                    let mut p = buf[k].norm_sqr() * scale;
                    let nyquist_bin = n_seg % 2 == 0 && k == n_seg / 2;
                    if k != 0 && !nyquist_bin {
                        p *= 2.0;
                    }
                    *slot += p;
                }
            }
        }
    }

    acc /= (n_e * n_segments) as f64;
    Ok(Spectrum {
        freqs: keep.iter().map(|&k| all_freqs[k]).collect(),
        psd: acc.select(Axis(1), &keep),
    })
}

/// Morlet power of `data` (`[E, C, T]`) at `freqs`, averaged over trials.
///
/// Each wavelet has `sigma_t = n_cycles / (2π f)` and spans ±5 sigma_t. A
/// wavelet longer than the trials is rejected.
pub fn morlet_power(
    data: ArrayView3<f64>,
    sfreq: f64,
    tmin: f64,
    freqs: &[f64],
    n_cycles: f64,
) -> Result<TimeFrequency> {
    let (n_e, n_c, n_t) = data.dim();
    if n_e == 0 || n_t == 0 {
        return Err(DspError::Empty("no samples for time-frequency".into()));
    }
    if freqs.is_empty() {
        return Err(DspError::InvalidArgument("no frequencies requested".into()));
    }
    if !(n_cycles > 0.0) {
        return Err(DspError::InvalidArgument(format!(
            "n_cycles must be positive, got {}",
            n_cycles
        )));
    }
    let nyq = sfreq / 2.0;
    if let Some(&f) = freqs.iter().find(|&&f| !(f > 0.0 && f <= nyq)) {
        return Err(DspError::InvalidArgument(format!(
            "frequency {} outside (0, {}]",
            f, nyq
        )));
    }

    let wavelets: Vec<Vec<Complex<f64>>> = freqs
        .iter()
        .map(|&f| morlet(f, sfreq, n_cycles))
        .collect();
    if let Some(longest) = wavelets.iter().map(Vec::len).max() {
        if longest > n_t {
            return Err(DspError::InvalidArgument(format!(
                "wavelet of {} samples is longer than the {}-sample trials; \
                 raise the lowest frequency or lower n_cycles",
                longest, n_t
            )));
        }
    }

    let n_fft = (n_t + wavelets.iter().map(Vec::len).max().unwrap_or(1) - 1).next_power_of_two();
    let mut planner: FftPlanner<f64> = FftPlanner::new();
    let fwd = planner.plan_fft_forward(n_fft);
    let inv = planner.plan_fft_inverse(n_fft);

    let wavelet_ffts: Vec<Vec<Complex<f64>>> = wavelets
        .iter()
        .map(|w| {
            let mut buf = w.clone();
            buf.resize(n_fft, Complex::default());
            fwd.process(&mut buf);
            buf
        })
        .collect();

    let mut power = Array3::<f64>::zeros((n_c, freqs.len(), n_t));
    let mut sig = vec![Complex::default(); n_fft];
    let mut prod = vec![Complex::default(); n_fft];
    let inv_scale = 1.0 / n_fft as f64;

    for trial in data.axis_iter(Axis(0)) {
        for (c, lane) in trial.axis_iter(Axis(0)).enumerate() {
            sig.iter_mut().for_each(|v| *v = Complex::default());
            for (dst, &x) in sig.iter_mut().zip(lane.iter()) {
                dst.re = x;
            }
            fwd.process(&mut sig);
            for (fi, (w_fft, w)) in wavelet_ffts.iter().zip(&wavelets).enumerate() {
                for ((p, &s), &h) in prod.iter_mut().zip(&sig).zip(w_fft) {
                    *p = s * h;
                }
                inv.process(&mut prod);
                let half = (w.len() - 1) / 2;
                for t in 0..n_t {
                    power[[c, fi, t]] += (prod[t + half] * inv_scale).norm_sqr();
                }
            }
        }
    }
    power /= n_e as f64;

    Ok(TimeFrequency {
        times: (0..n_t).map(|i| tmin + i as f64 / sfreq).collect(),
        freqs: freqs.to_vec(),
        power,
    })
}

/// Unit-energy complex Morlet wavelet of odd length.
fn morlet(freq: f64, sfreq: f64, n_cycles: f64) -> Vec<Complex<f64>> {
    let sigma_t = n_cycles / (2.0 * PI * freq);
    let half = (5.0 * sigma_t * sfreq).floor() as i64;
    let mut w: Vec<Complex<f64>> = (-half..=half)
        .map(|k| {
            let t = k as f64 / sfreq;
            let envelope = (-t * t / (2.0 * sigma_t * sigma_t)).exp();
            Complex::from_polar(envelope, 2.0 * PI * freq * t)
        })
        .collect();
    let norm = w.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt() * 0.5_f64.sqrt();
    w.iter_mut().for_each(|c| *c /= norm);
    w
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sine_trials(freq: f64, sfreq: f64, n_t: usize) -> Array3<f64> {
        Array3::from_shape_fn((3, 2, n_t), |(e, c, t)| {
            let amp = if c == 0 { 1.0 } else { 0.1 };
            amp * (2.0 * PI * freq * t as f64 / sfreq + e as f64).sin()
        })
    }

    #[test]
    fn welch_peaks_at_signal_frequency() {
        let sfreq = 256.0;
        let data = sine_trials(10.0, sfreq, 512);
        let spec = welch_psd(data.view(), sfreq, 1.0, 40.0).unwrap();
        assert_eq!(spec.freqs.first().copied(), Some(1.0));
        assert_eq!(spec.freqs.last().copied(), Some(40.0));
        let row = spec.psd.row(0);
        let peak = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| spec.freqs[i])
            .unwrap();
        assert_abs_diff_eq!(peak, 10.0, epsilon = 1e-9);
        assert!(spec.psd[[1, 9]] < spec.psd[[0, 9]]);
    }

    #[test]
    fn welch_power_matches_variance() {
        // Integrated density of a unit sine ≈ its variance, 0.5.
        let sfreq = 256.0;
        let data = sine_trials(32.0, sfreq, 1024);
        let spec = welch_psd(data.view(), sfreq, 0.0, sfreq / 2.0).unwrap();
        let df = spec.freqs[1] - spec.freqs[0];
        let total: f64 = spec.psd.row(0).iter().sum::<f64>() * df;
        assert_abs_diff_eq!(total, 0.5, epsilon = 0.02);
    }

    #[test]
    fn welch_empty_band_is_error() {
        let data = sine_trials(10.0, 100.0, 100);
        assert!(welch_psd(data.view(), 100.0, 20.1, 20.2).is_err());
        assert!(welch_psd(data.view(), 100.0, 30.0, 20.0).is_err());
    }

    #[test]
    fn morlet_finds_the_right_band() {
        let sfreq = 200.0;
        let data = sine_trials(20.0, sfreq, 400);
        let freqs = [8.0, 20.0, 40.0];
        let tf = morlet_power(data.view(), sfreq, -0.5, &freqs, 7.0).unwrap();
        assert_eq!(tf.power.shape(), &[2, 3, 400]);
        assert_abs_diff_eq!(tf.times[0], -0.5, epsilon = 1e-12);
        let mid = 200;
        assert!(tf.power[[0, 1, mid]] > 10.0 * tf.power[[0, 0, mid]]);
        assert!(tf.power[[0, 1, mid]] > 10.0 * tf.power[[0, 2, mid]]);
    }

    #[test]
    fn morlet_rejects_long_wavelets() {
        let data = sine_trials(10.0, 100.0, 50);
        let err = morlet_power(data.view(), 100.0, 0.0, &[1.0], 7.0);
        assert!(matches!(err, Err(DspError::InvalidArgument(_))));
    }

    #[test]
    fn linspace_inclusive() {
        assert_eq!(linspace(2.0, 10.0, 5), vec![2.0, 4.0, 6.0, 8.0, 10.0]);
        assert_eq!(linspace(3.0, 9.0, 1), vec![3.0]);
    }
}
