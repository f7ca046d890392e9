//! Overlap-add zero-phase FIR convolution.
//!
//! Zero phase comes from shifting the output left by `(N-1)/2` samples. Edge
//! transients are suppressed by reflect-limited padding of `N-1` samples on
//! each side.
use ndarray::{Array2, Array3, ArrayViewMut1, Axis};
use rustfft::{FftPlanner, num_complex::Complex};

use crate::error::{DspError, Result};

/// Filter every channel of `data` ([C, T]) in place.
pub fn apply_fir_zero_phase(data: &mut Array2<f64>, h: &[f64]) -> Result<()> {
    for row in data.axis_iter_mut(Axis(0)) {
        filter_lane(row, h)?;
    }
    Ok(())
}

/// Filter every trial/channel lane of `data` ([E, C, T]) in place.
pub fn apply_fir_zero_phase_3d(data: &mut Array3<f64>, h: &[f64]) -> Result<()> {
    for lane in data.lanes_mut(Axis(2)) {
        filter_lane(lane, h)?;
    }
    Ok(())
}

fn filter_lane(mut lane: ArrayViewMut1<f64>, h: &[f64]) -> Result<()> {
    let x: Vec<f64> = lane.to_vec();
    let y = filter_1d(&x, h)?;
    lane.iter_mut().zip(y).for_each(|(dst, v)| *dst = v);
    Ok(())
}

/// Filter a single signal with the overlap-add algorithm. Output has the
/// same length as `x`.
pub fn filter_1d(x: &[f64], h: &[f64]) -> Result<Vec<f64>> {
    let n_x = x.len();
    let n_h = h.len();
    if n_h % 2 == 0 {
        return Err(DspError::InvalidArgument(format!(
            "zero-phase filtering needs an odd kernel, got {} taps",
            n_h
        )));
    }
    if n_x == 0 {
        return Ok(vec![]);
    }

    let shift = (n_h - 1) / 2;
    let n_edge = n_h - 1;

    let x_ext = reflect_limited_pad(x, n_edge, n_edge);
    let n_ext = x_ext.len();
    let n_fft = choose_fft_len(n_h, n_ext);
    let h_fft = fft_of_h(h, n_fft);

    let n_seg = n_fft - n_h + 1;
    let n_segments = n_ext.div_ceil(n_seg);
    let mut x_filtered = vec![0.0_f64; n_ext];

    let mut planner: FftPlanner<f64> = FftPlanner::new();
    let fft_fwd = planner.plan_fft_forward(n_fft);
    let fft_inv = planner.plan_fft_inverse(n_fft);
    let inv_scale = 1.0 / n_fft as f64;

    for seg_idx in 0..n_segments {
        let start = seg_idx * n_seg;
        let stop = (start + n_seg).min(n_ext);

        let mut buf: Vec<Complex<f64>> = x_ext[start..stop]
            .iter()
            .map(|&v| Complex { re: v, im: 0.0 })
            .chain(std::iter::repeat(Complex::default()))
            .take(n_fft)
            .collect();

        fft_fwd.process(&mut buf);
        for (b, &hf) in buf.iter_mut().zip(h_fft.iter()) {
            *b *= hf;
        }
        fft_inv.process(&mut buf);

        let out_start = start.saturating_sub(shift);
        let out_end = (out_start + n_fft).min(n_ext);
        let prod_start = shift.saturating_sub(start);

        for (o, p) in (out_start..out_end).zip(prod_start..) {
            if p < buf.len() {
                x_filtered[o] += buf[p].re * inv_scale;
            }
        }
    }

    Ok(x_filtered[n_edge..n_edge + n_x].to_vec())
}

/// Odd reflection around the end samples, zero-filled where the signal is
/// shorter than the requested pad.
fn reflect_limited_pad(x: &[f64], n_l: usize, n_r: usize) -> Vec<f64> {
    let n = x.len();
    let actual_l = n_l.min(n - 1);
    let actual_r = n_r.min(n - 1);

    let mut out = Vec::with_capacity(n_l + n + n_r);
    out.resize(n_l - actual_l, 0.0);
    for i in (1..=actual_l).rev() {
        out.push(2.0 * x[0] - x[i]);
    }
    out.extend_from_slice(x);
    let last = x[n - 1];
    for i in 1..=actual_r {
        out.push(2.0 * last - x[n - 1 - i]);
    }
    out.resize(out.len() + (n_r - actual_r), 0.0);
    out
}

/// Power-of-two block size minimising
/// `ceil(n_x / (N - n_h + 1)) * N * (log2(N) + 1) + 4e-5 * N * n_x`.
fn choose_fft_len(n_h: usize, n_x: usize) -> usize {
    let min_fft = 2 * n_h - 1;
    let max_pow = (n_x as f64).log2().ceil() as u32 + 1;
    let min_pow = (min_fft as f64).log2().ceil() as u32;

    let mut best_n = 1_usize << max_pow.max(min_pow);
    let mut best_cost = f64::INFINITY;
    for pow in min_pow..=max_pow {
        let n = 1_usize << pow;
        if n < min_fft {
            continue;
        }
        let n_seg = (n - n_h + 1) as f64;
        let cost = (n_x as f64 / n_seg).ceil() * n as f64 * (pow as f64 + 1.0)
            + 4e-5 * n as f64 * n_x as f64;
        if cost < best_cost {
            best_cost = cost;
            best_n = n;
        }
    }
    best_n
}

fn fft_of_h(h: &[f64], n_fft: usize) -> Vec<Complex<f64>> {
    let mut buf: Vec<Complex<f64>> = h
        .iter()
        .map(|&v| Complex { re: v, im: 0.0 })
        .chain(std::iter::repeat(Complex::default()))
        .take(n_fft)
        .collect();
    let mut planner: FftPlanner<f64> = FftPlanner::new();
    planner.plan_fft_forward(n_fft).process(&mut buf);
    buf
}
