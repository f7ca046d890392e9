//! eegscope - per-user EEG epoching sessions served over HTTP
//!
//! ```text
//! SessionRegistry ─► UserSession ─► EpochCollection ─► EegRecording
//!   (DashMap)          subject       stamp + epochs      raw / montage / events
//! ```
//!
//! Routes in [`web`] resolve the caller's [`UserSession`] from the bearer
//! token. Loading runs on the blocking pool; epoch collection runs on its
//! own thread and only the most recently requested result is committed.

pub mod collection;
pub mod error;
pub mod failures;
pub mod index;
pub mod recording;
pub mod registry;
pub mod serve;
pub mod session;
pub mod synth;
pub mod telemetry;
pub mod views;
pub mod web;

pub use collection::{CollectOutcome, CollectRequest, EpochCollection, TfrRequest};
pub use error::PipelineError;
pub use failures::{FailureLog, FailureRecord};
pub use index::{DataFile, DataIndex};
pub use recording::{EegRecording, EventTable, Layout, Stage};
pub use registry::{spawn_eviction_task, SessionRegistry, SessionSummary};
pub use session::{CollectJob, SessionSettings, UserSession};

#[cfg(test)]
pub(crate) mod testutil {
    use std::path::{Path, PathBuf};

    /// Paired data.bdf/evt.bdf of 20 s synthetic signal in `dir`.
    pub fn write_paired(dir: &Path, seed: u64) -> PathBuf {
        crate::synth::write_paired_recording(dir, seed, 20.0).unwrap()
    }
}
