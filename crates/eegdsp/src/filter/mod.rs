//! FIR filter design and application.
//!
//! - [`design`]: Hamming-windowed sinc band/high/low-pass design.
//! - [`apply`]: overlap-add zero-phase convolution.

pub mod apply;
pub mod design;

pub use apply::{apply_fir_zero_phase, apply_fir_zero_phase_3d, filter_1d};
pub use design::{auto_filter_length, design_filter, firwin, hamming, high_trans_bandwidth, low_trans_bandwidth};
