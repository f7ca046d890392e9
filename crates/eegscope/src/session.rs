//! Per-user session: the loaded subject and its epoch collection.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::collection::{CollectOutcome, CollectRequest, EpochCollection};
use crate::error::PipelineError;
use crate::failures::FailureLog;
use crate::recording::EegRecording;

/// Settings every session is created with.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Standard montage applied after loading.
    pub montage: String,
    pub failures: Arc<FailureLog>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            montage: "standard_1020".to_string(),
            failures: Arc::new(FailureLog::default()),
        }
    }
}

#[derive(Debug, Default)]
struct Loaded {
    subject: Option<String>,
    data: Option<Arc<EpochCollection>>,
}

/// Handle to a background epoch collection.
#[derive(Debug)]
pub struct CollectJob {
    stamp: u64,
    handle: JoinHandle<Result<CollectOutcome, PipelineError>>,
}

impl CollectJob {
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the worker is done.
    pub fn wait(self) -> Result<CollectOutcome, PipelineError> {
        self.handle.join().map_err(|_| PipelineError::Interrupted)?
    }
}

#[derive(Debug)]
pub struct UserSession {
    identity: String,
    created_at: Instant,
    last_activity: Mutex<Instant>,
    loaded: Mutex<Loaded>,
    /// Serialises subject switches so one subject is loaded once.
    switching: Mutex<()>,
    settings: SessionSettings,
}

impl UserSession {
    pub fn new(identity: impl Into<String>, settings: SessionSettings) -> Self {
        let now = Instant::now();
        Self {
            identity: identity.into(),
            created_at: now,
            last_activity: Mutex::new(now),
            loaded: Mutex::new(Loaded::default()),
            switching: Mutex::new(()),
            settings,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn refresh_activity(&self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the last registry lookup.
    pub fn idle(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn loaded(&self) -> MutexGuard<'_, Loaded> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_subject(&self) -> Option<String> {
        self.loaded().subject.clone()
    }

    pub fn data(&self) -> Option<Arc<EpochCollection>> {
        self.loaded().data.clone()
    }

    /// Load `path` as `subject_id` unless that subject is already loaded.
    ///
    /// Runs load, montage and event extraction synchronously; stage failures
    /// are logged and show up as absent attributes on the recording. Readers
    /// keep seeing the previous subject until the new one is swapped in.
    pub fn start_with_recording(&self, path: &Path, subject_id: &str) -> Arc<EpochCollection> {
        let _switching = self.switching.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let loaded = self.loaded();
            if loaded.subject.as_deref() == Some(subject_id) {
                if let Some(data) = &loaded.data {
                    tracing::debug!(identity = %self.identity, subject = subject_id, "subject already loaded");
                    return Arc::clone(data);
                }
            }
        }

        let span = tracing::info_span!(
            "zcc.session.start_with_recording",
            identity = %self.identity,
            subject = subject_id,
            path = %path.display(),
        );
        let _enter = span.enter();

        let mut recording = EegRecording::new(path, Arc::clone(&self.settings.failures));
        recording.load();
        recording.fix_montage(&self.settings.montage, None);
        recording.extract_events();
        tracing::info!(stage = ?recording.stage(), "recording prepared");

        let data = Arc::new(EpochCollection::new(recording));
        let mut loaded = self.loaded();
        loaded.subject = Some(subject_id.to_string());
        loaded.data = Some(Arc::clone(&data));
        data
    }

    /// Start a background collection on the current data.
    ///
    /// Returns `None` (and logs) when nothing is loaded. Otherwise the stamp
    /// is taken and results cleared before this returns.
    pub fn collect_epochs(&self, request: CollectRequest) -> Option<CollectJob> {
        let Some(data) = self.data() else {
            tracing::error!(identity = %self.identity, "collect_epochs without a loaded recording");
            return None;
        };
        if data.recording().raw().is_none() {
            tracing::error!(
                identity = %self.identity,
                path = %data.recording().path().display(),
                "collect_epochs on a recording whose raw signal failed to load"
            );
            return None;
        }

        let stamp = data.begin_collection();
        let parent = tracing::Span::current();
        let worker = Arc::clone(&data);
        let spawned = std::thread::Builder::new()
            .name(format!("collect-epochs-{}", stamp))
            .spawn(move || {
                let _enter = parent.enter();
                let outcome = worker.collect_epochs(request, Some(stamp));
                if let Err(err) = &outcome {
                    tracing::error!(stamp, error = %err, "epoch collection failed");
                    worker
                        .recording()
                        .failures()
                        .record("collect_epochs", worker.recording().path(), err);
                }
                outcome
            });

        match spawned {
            Ok(handle) => {
                tracing::info!(identity = %self.identity, stamp, "epoch collection started");
                Some(CollectJob { stamp, handle })
            }
            Err(err) => {
                tracing::error!(identity = %self.identity, error = %err, "failed to spawn collection thread");
                None
            }
        }
    }
}
