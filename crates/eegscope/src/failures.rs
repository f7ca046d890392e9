//! Bounded ring of recent pipeline failures, exposed at `/zcc/errors.json`.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Display;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

pub const DEFAULT_CAPACITY: usize = 128;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailureRecord {
    /// RFC 3339 timestamp.
    pub at: String,
    pub stage: String,
    pub path: String,
    pub message: String,
}

#[derive(Debug)]
pub struct FailureLog {
    records: Mutex<VecDeque<FailureRecord>>,
    capacity: usize,
}

impl FailureLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Append a failure, dropping the oldest once full.
    pub fn record(&self, stage: &str, path: &Path, err: &dyn Display) {
        let record = FailureRecord {
            at: chrono::Utc::now().to_rfc3339(),
            stage: stage.to_string(),
            path: path.display().to_string(),
            message: err.to_string(),
        };
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<FailureRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FailureLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
