//! Index of recordings under the data root.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use walkdir::WalkDir;

/// Experiment name used when the top-level folder is not a known experiment.
pub const UNKNOWN_EXPERIMENT: &str = "na";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataFile {
    pub path: PathBuf,
    pub experiment: String,
    /// Root-relative parent directory, `/`-separated.
    #[serde(rename = "subjectID")]
    pub subject_id: String,
}

#[derive(Debug)]
pub struct DataIndex {
    root: PathBuf,
    suffixes: Vec<String>,
    experiments: Vec<String>,
    files: RwLock<Option<Vec<DataFile>>>,
}

impl DataIndex {
    pub fn new(root: impl Into<PathBuf>, suffixes: Vec<String>, experiments: Vec<String>) -> Self {
        Self {
            root: root.into(),
            suffixes,
            experiments,
            files: RwLock::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn experiments(&self) -> &[String] {
        &self.experiments
    }

    /// Walk `root` depth-first (entries sorted by name) for files ending in one
    /// of `suffixes`.
    pub fn scan(root: &Path, suffixes: &[String], experiments: &[String]) -> Vec<DataFile> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable entry under data root");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !suffixes.iter().any(|s| name.ends_with(s.as_str())) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            files.push(DataFile {
                path: entry.path().to_path_buf(),
                experiment: guess_experiment(relative, experiments),
                subject_id: subject_id(relative),
            });
        }
        tracing::debug!(root = %root.display(), found = files.len(), "scanned data root");
        files
    }

    /// Cached file list, scanning on first use.
    pub fn files(&self) -> Vec<DataFile> {
        if let Some(files) = self.files.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return files.clone();
        }
        let scanned = Self::scan(&self.root, &self.suffixes, &self.experiments);
        *self.files.write().unwrap_or_else(PoisonError::into_inner) = Some(scanned.clone());
        scanned
    }

    /// Drop the cache and scan again. Returns the number of files found.
    pub fn rescan(&self) -> usize {
        let scanned = Self::scan(&self.root, &self.suffixes, &self.experiments);
        let n = scanned.len();
        *self.files.write().unwrap_or_else(PoisonError::into_inner) = Some(scanned);
        tracing::info!(files = n, "rescanned data root");
        n
    }

    /// Files of one experiment, or all when `experiment` is empty/absent.
    pub fn by_experiment(&self, experiment: Option<&str>) -> Vec<DataFile> {
        let files = self.files();
        match experiment.filter(|e| !e.is_empty()) {
            Some(name) => files.into_iter().filter(|f| f.experiment == name).collect(),
            None => files,
        }
    }

    pub fn find_subject(&self, subject_id: &str) -> Vec<DataFile> {
        self.files()
            .into_iter()
            .filter(|f| f.subject_id == subject_id)
            .collect()
    }
}

fn guess_experiment(relative: &Path, experiments: &[String]) -> String {
    // A file directly under the root has no experiment folder.
    if relative.components().count() < 2 {
        return UNKNOWN_EXPERIMENT.to_string();
    }
    relative
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .filter(|first| experiments.iter().any(|e| e == first))
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_EXPERIMENT.to_string())
}

fn subject_id(relative: &Path) -> String {
    let parts: Vec<String> = relative
        .parent()
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}
