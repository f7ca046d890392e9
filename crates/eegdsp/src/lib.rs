//! eegdsp - signal processing for eegscope
//!
//! Reads EDF/BDF recordings, attaches standard sensor layouts, decodes
//! annotation events, and turns continuous data into filtered, decimated
//! epochs with evoked averages, Welch spectra and Morlet power.
//!
//! ```text
//! edf::read_raw ─► RawSignal ─► events_from_annotations ─► Epochs::from_raw
//!                     │                                      │ filter / decimate
//!        make_standard_montage ─► set_montage                 ▼
//!                                                  average / welch_psd / morlet_power
//! ```

pub mod edf;
pub mod epochs;
pub mod error;
pub mod events;
pub mod filter;
pub mod montage;
pub mod raw;
pub mod spectrum;

pub use epochs::{Baseline, Epochs, Evoked};
pub use error::{DspError, Result};
pub use events::{events_from_annotations, drop_repeated, select_codes, Event, EventId};
pub use montage::{make_standard_montage, Montage};
pub use raw::{Annotation, RawSignal, SignalInfo};
pub use spectrum::{linspace, morlet_power, welch_psd, Spectrum, TimeFrequency};
