//! One on-disk recording and the stages that make it epochable.
//!
//! Stage methods never fail outward. A failing stage is logged, pushed to the
//! shared [`FailureLog`], and leaves its attribute absent.

use eegdsp::edf;
use eegdsp::{events_from_annotations, make_standard_montage, Event, EventId, Montage, RawSignal};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::PipelineError;
use crate::failures::FailureLog;

const PAIRED_DATA: &str = "data.bdf";
const PAIRED_EVENTS: &str = "evt.bdf";

/// How far the recording has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Empty,
    RawLoaded,
    MontageFixed,
    EventsExtracted,
    /// Montage and events both present.
    Ready,
}

/// Where signal and annotations come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// `data.bdf` holds the signal, sibling `evt.bdf` the annotations.
    Paired { data: PathBuf, events: PathBuf },
    /// A single EDF/BDF carrying its own annotation channel.
    Combined(PathBuf),
}

impl Layout {
    pub fn detect(path: &Path) -> Result<Self, PipelineError> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Err(PipelineError::unrecognized_layout(path));
        };
        let lower = name.to_ascii_lowercase();
        if lower == PAIRED_DATA {
            let companion = find_sibling(path, PAIRED_EVENTS)
                .ok_or_else(|| PipelineError::missing_companion(path, PAIRED_EVENTS))?;
            return Ok(Layout::Paired {
                data: path.to_path_buf(),
                events: companion,
            });
        }
        if lower.ends_with(".bdf") || lower.ends_with(".edf") {
            return Ok(Layout::Combined(path.to_path_buf()));
        }
        Err(PipelineError::unrecognized_layout(path))
    }
}

/// Case-insensitive lookup of `name` next to `path`.
fn find_sibling(path: &Path, name: &str) -> Option<PathBuf> {
    let dir = path.parent()?;
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
}

/// Decoded events plus the label → code table.
#[derive(Debug, Clone)]
pub struct EventTable {
    pub events: Vec<Event>,
    pub event_id: EventId,
}

impl EventTable {
    /// Resolve a label through the table, falling back to an integer code.
    pub fn resolve(&self, label: &str) -> Option<i32> {
        self.event_id
            .get(label)
            .copied()
            .or_else(|| label.trim().parse().ok())
    }

    pub fn label_for(&self, code: i32) -> Option<&str> {
        self.event_id
            .iter()
            .find(|(_, c)| **c == code)
            .map(|(label, _)| label.as_str())
    }
}

#[derive(Debug)]
pub struct EegRecording {
    path: PathBuf,
    raw: Option<RawSignal>,
    montage: Option<Montage>,
    events: Option<EventTable>,
    failures: Arc<FailureLog>,
}

impl EegRecording {
    pub fn new(path: impl Into<PathBuf>, failures: Arc<FailureLog>) -> Self {
        Self {
            path: path.into(),
            raw: None,
            montage: None,
            events: None,
            failures,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn raw(&self) -> Option<&RawSignal> {
        self.raw.as_ref()
    }

    pub fn montage(&self) -> Option<&Montage> {
        self.montage.as_ref()
    }

    pub fn events(&self) -> Option<&EventTable> {
        self.events.as_ref()
    }

    pub fn failures(&self) -> &FailureLog {
        &self.failures
    }

    pub fn stage(&self) -> Stage {
        match (&self.raw, &self.montage, &self.events) {
            (None, _, _) => Stage::Empty,
            (Some(_), Some(_), Some(_)) => Stage::Ready,
            (Some(_), None, Some(_)) => Stage::EventsExtracted,
            (Some(_), Some(_), None) => Stage::MontageFixed,
            (Some(_), None, None) => Stage::RawLoaded,
        }
    }

    /// Read the signal and annotations. Channel names are upper-cased.
    pub fn load(&mut self) {
        let result = self.try_load();
        self.settle("load_raw", result);
    }

    /// Attach the named standard layout, optionally renaming its channels first.
    pub fn fix_montage(&mut self, name: &str, rename: Option<&HashMap<String, String>>) {
        let result = self.try_fix_montage(name, rename);
        self.settle("fix_montage", result);
    }

    pub fn extract_events(&mut self) {
        let result = self.try_extract_events();
        self.settle("extract_events", result);
    }

    fn try_load(&mut self) -> Result<(), PipelineError> {
        self.raw = None;
        self.montage = None;
        self.events = None;

        let mut raw = match Layout::detect(&self.path)? {
            Layout::Combined(path) => edf::read_raw(&path)?,
            Layout::Paired { data, events } => {
                let mut raw = edf::read_raw(&data)?;
                raw.annotations = edf::read_annotations(&events)?;
                raw
            }
        };
        raw.upper_case_channels();
        tracing::info!(
            path = %self.path.display(),
            channels = raw.n_channels(),
            sfreq = raw.info.sfreq,
            duration_secs = raw.duration_secs(),
            annotations = raw.annotations.len(),
            "loaded raw recording"
        );
        self.raw = Some(raw);
        Ok(())
    }

    fn try_fix_montage(
        &mut self,
        name: &str,
        rename: Option<&HashMap<String, String>>,
    ) -> Result<(), PipelineError> {
        self.montage = None;
        let raw = self
            .raw
            .as_mut()
            .ok_or_else(|| PipelineError::precondition("fix_montage", "a loaded raw signal"))?;

        let mut montage = make_standard_montage(name)?;
        if let Some(mapping) = rename {
            montage.rename_channels(mapping);
            tracing::debug!(renamed = mapping.len(), "renamed montage channels");
        }
        montage.upper_case();

        let missing = raw.set_montage(&montage);
        if !missing.is_empty() {
            tracing::warn!(
                montage = name,
                missing = ?missing,
                "channels without a montage position"
            );
        }
        self.montage = Some(montage);
        Ok(())
    }

    fn try_extract_events(&mut self) -> Result<(), PipelineError> {
        self.events = None;
        let raw = self
            .raw
            .as_ref()
            .ok_or_else(|| PipelineError::precondition("extract_events", "a loaded raw signal"))?;
        let (events, event_id) =
            events_from_annotations(&raw.annotations, raw.info.sfreq, raw.n_times())?;
        tracing::info!(events = events.len(), labels = event_id.len(), "extracted events");
        self.events = Some(EventTable { events, event_id });
        Ok(())
    }

    fn settle(&self, stage: &'static str, result: Result<(), PipelineError>) {
        if let Err(err) = result {
            tracing::error!(
                stage,
                path = %self.path.display(),
                error = %err,
                "pipeline stage failed"
            );
            self.failures.record(stage, &self.path, &err);
        }
    }
}
