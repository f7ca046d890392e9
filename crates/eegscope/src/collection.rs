//! Epoch collection over a loaded recording.
//!
//! Results live behind one mutex together with the computation stamp. A
//! request stamps and clears under that lock; its computation commits only if
//! the stamp it captured is still the live one when it finishes, so the most
//! recently requested collection always wins regardless of completion order.

use eegdsp::{
    linspace, drop_repeated, morlet_power, select_codes, welch_psd, Baseline, Epochs, Evoked,
    Spectrum, TimeFrequency,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::PipelineError;
use crate::recording::{EegRecording, EventTable};

/// Parameters of one epoch collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectRequest {
    pub event_codes: Vec<i32>,
    pub tmin: f64,
    pub tmax: f64,
    #[serde(default)]
    pub l_freq: Option<f64>,
    #[serde(default)]
    pub h_freq: Option<f64>,
    #[serde(default = "default_decim")]
    pub decim: usize,
}

fn default_decim() -> usize {
    1
}

#[derive(Debug, Clone)]
pub struct CollectOutcome {
    pub epochs: Arc<Epochs>,
    /// False when a newer request superseded this one.
    pub committed: bool,
}

/// Time-frequency request for [`EpochCollection::compute_time_frequency`].
#[derive(Debug, Clone, PartialEq)]
pub struct TfrRequest {
    pub fmin: f64,
    pub fmax: f64,
    pub n_freqs: usize,
    pub n_cycles: f64,
}

#[derive(Debug, Default)]
struct Results {
    stamp: u64,
    request: Option<CollectRequest>,
    epochs: Option<Arc<Epochs>>,
    evoked: HashMap<i32, Arc<Evoked>>,
}

#[derive(Debug)]
pub struct EpochCollection {
    recording: EegRecording,
    results: Mutex<Results>,
}

impl EpochCollection {
    pub fn new(recording: EegRecording) -> Self {
        Self {
            recording,
            results: Mutex::new(Results::default()),
        }
    }

    pub fn recording(&self) -> &EegRecording {
        &self.recording
    }

    fn results(&self) -> MutexGuard<'_, Results> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live computation stamp; 0 before any request.
    pub fn stamp(&self) -> u64 {
        self.results().stamp
    }

    /// Committed epochs, if any.
    pub fn epochs(&self) -> Option<Arc<Epochs>> {
        self.results().epochs.clone()
    }

    /// Parameters of the committed epochs.
    pub fn request(&self) -> Option<CollectRequest> {
        let results = self.results();
        results.epochs.as_ref().and(results.request.clone())
    }

    /// Start a new request: bump the stamp and clear epochs/evoked.
    pub fn begin_collection(&self) -> u64 {
        let mut results = self.results();
        results.stamp += 1;
        results.request = None;
        results.epochs = None;
        results.evoked.clear();
        results.stamp
    }

    /// Compute epochs for `request` and commit them if `expected_stamp` is
    /// still live. `None` starts a fresh request first.
    pub fn collect_epochs(
        &self,
        request: CollectRequest,
        expected_stamp: Option<u64>,
    ) -> Result<CollectOutcome, PipelineError> {
        let stamp = match expected_stamp {
            Some(stamp) => stamp,
            None => self.begin_collection(),
        };
        let span = tracing::info_span!(
            "zcc.pipeline.collect_epochs",
            stamp,
            path = %self.recording.path().display(),
        );
        let _enter = span.enter();

        let epochs = Arc::new(self.compute(&request)?);

        let mut results = self.results();
        let committed = results.stamp == stamp;
        if committed {
            results.epochs = Some(Arc::clone(&epochs));
            results.request = Some(request);
            results.evoked.clear();
            tracing::info!(trials = epochs.n_epochs(), n_times = epochs.n_times(), "committed epochs");
        } else {
            tracing::warn!(
                live_stamp = results.stamp,
                "discarding epochs of a superseded collection"
            );
        }
        Ok(CollectOutcome { epochs, committed })
    }

    fn compute(&self, request: &CollectRequest) -> Result<Epochs, PipelineError> {
        let raw = self
            .recording
            .raw()
            .ok_or_else(|| PipelineError::precondition("collect_epochs", "a loaded raw signal"))?;
        let table = self
            .recording
            .events()
            .ok_or_else(|| PipelineError::precondition("collect_epochs", "extracted events"))?;

        let selected = select_codes(&table.events, &request.event_codes);
        if selected.is_empty() {
            return Err(PipelineError::NoMatchingTrials(format!(
                "event codes {:?}",
                request.event_codes
            )));
        }
        let (kept, duplicates) = drop_repeated(&selected);
        for e in &duplicates {
            tracing::info!(sample = e.sample, code = e.code, "dropped duplicate event at sample");
        }

        let baseline = Baseline {
            start: Some(request.tmin),
            end: None,
        };
        let mut epochs = Epochs::from_raw(
            raw,
            &kept,
            &table.event_id,
            request.tmin,
            request.tmax,
            Some(baseline),
        )?;
        epochs.filter(request.l_freq, request.h_freq)?;
        epochs.decimate(request.decim)?;
        Ok(epochs)
    }

    fn table(&self) -> Result<&EventTable, PipelineError> {
        self.recording
            .events()
            .ok_or_else(|| PipelineError::precondition("average", "extracted events"))
    }

    fn committed(&self) -> Result<Arc<Epochs>, PipelineError> {
        self.epochs()
            .ok_or_else(|| PipelineError::precondition("average", "collected epochs"))
    }

    /// Resolve a label (or integer code) to a code present in the epochs.
    fn code_for(&self, epochs: &Epochs, label: &str) -> Result<i32, PipelineError> {
        let code = self
            .table()?
            .resolve(label)
            .ok_or_else(|| PipelineError::NoMatchingTrials(format!("event {:?}", label)))?;
        if epochs.select(code).is_empty() {
            return Err(PipelineError::NoMatchingTrials(format!("event {:?}", label)));
        }
        Ok(code)
    }

    /// Evoked average for `label`, cached until the next collection.
    pub fn average_for(&self, label: &str) -> Result<Arc<Evoked>, PipelineError> {
        let epochs = self.committed()?;
        let code = self.code_for(&epochs, label)?;
        if let Some(cached) = self.results().evoked.get(&code) {
            return Ok(Arc::clone(cached));
        }

        let evoked = Arc::new(epochs.average(code)?);
        let mut results = self.results();
        // Only cache against the epochs it was computed from.
        if results
            .epochs
            .as_ref()
            .is_some_and(|live| Arc::ptr_eq(live, &epochs))
        {
            results.evoked.insert(code, Arc::clone(&evoked));
        }
        Ok(evoked)
    }

    /// Single-sensor trials for `label`: `(trials[n][t], times)`.
    pub fn sensor_trials(&self, sensor: &str, label: &str) -> Result<(Vec<Vec<f64>>, Vec<f64>), PipelineError> {
        let epochs = self.committed()?;
        let code = self.code_for(&epochs, label)?;
        let ch = sensor_index(&epochs, sensor)?;
        let trials = epochs
            .select(code)
            .into_iter()
            .map(|i| epochs.data.slice(ndarray::s![i, ch, ..]).to_vec())
            .collect();
        Ok((trials, epochs.times()))
    }

    /// Welch PSD over the trials of `label`, all channels or one `sensor`.
    /// Returns the spectrum and the channel names of its rows.
    pub fn compute_psd(
        &self,
        sensor: Option<&str>,
        label: &str,
        fmin: f64,
        fmax: f64,
    ) -> Result<(Spectrum, Vec<String>), PipelineError> {
        let epochs = self.committed()?;
        let code = self.code_for(&epochs, label)?;
        let (trials, names) = pick_trials(&epochs, code, sensor)?;
        let spectrum = welch_psd(trials.view(), epochs.sfreq, fmin, fmax)?;
        Ok((spectrum, names))
    }

    /// Morlet power over the trials of `label`, all channels or one `sensor`.
    pub fn compute_time_frequency(
        &self,
        sensor: Option<&str>,
        label: &str,
        request: &TfrRequest,
    ) -> Result<(TimeFrequency, Vec<String>), PipelineError> {
        let epochs = self.committed()?;
        let code = self.code_for(&epochs, label)?;
        let (trials, names) = pick_trials(&epochs, code, sensor)?;
        let freqs = linspace(request.fmin, request.fmax, request.n_freqs);
        let tfr = morlet_power(trials.view(), epochs.sfreq, epochs.tmin, &freqs, request.n_cycles)?;
        Ok((tfr, names))
    }
}

fn sensor_index(epochs: &Epochs, sensor: &str) -> Result<usize, PipelineError> {
    epochs.channel_index(sensor).ok_or_else(|| {
        PipelineError::Processing(eegdsp::DspError::InvalidArgument(format!(
            "unknown sensor {:?}",
            sensor
        )))
    })
}

fn pick_trials(
    epochs: &Epochs,
    code: i32,
    sensor: Option<&str>,
) -> Result<(ndarray::Array3<f64>, Vec<String>), PipelineError> {
    let trials = epochs.trials(code)?;
    match sensor {
        None => Ok((trials, epochs.ch_names.clone())),
        Some(name) => {
            let ch = sensor_index(epochs, name)?;
            Ok((
                trials.select(ndarray::Axis(1), &[ch]),
                vec![epochs.ch_names[ch].clone()],
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failures::FailureLog;
    use crate::testutil::write_paired;

    fn ready_collection(dir: &std::path::Path) -> EpochCollection {
        let path = write_paired(dir, 3);
        let mut rec = EegRecording::new(path, Arc::new(FailureLog::default()));
        rec.load();
        rec.fix_montage("standard_1020", None);
        rec.extract_events();
        EpochCollection::new(rec)
    }

    fn request(tmax: f64) -> CollectRequest {
        CollectRequest {
            event_codes: vec![1, 2],
            tmin: -0.2,
            tmax,
            l_freq: Some(1.0),
            h_freq: Some(30.0),
            decim: 2,
        }
    }

    #[test]
    fn collects_filters_and_decimates() {
        let dir = tempfile::tempdir().unwrap();
        let coll = ready_collection(dir.path());
        let outcome = coll.collect_epochs(request(0.8), None).unwrap();
        assert!(outcome.committed);
        assert_eq!(coll.stamp(), 1);
        let epochs = coll.epochs().unwrap();
        assert_eq!(epochs.n_times(), 126);
        assert_eq!(epochs.sfreq, 125.0);
        assert_eq!(coll.request(), Some(request(0.8)));
    }

    #[test]
    fn newest_request_wins_regardless_of_completion_order() {
        let dir = tempfile::tempdir().unwrap();
        let coll = ready_collection(dir.path());
        let first = coll.begin_collection();
        let second = coll.begin_collection();
        assert!(coll.epochs().is_none());

        let newer = coll.collect_epochs(request(0.6), Some(second)).unwrap();
        assert!(newer.committed);
        let older = coll.collect_epochs(request(0.8), Some(first)).unwrap();
        assert!(!older.committed);

        let live = coll.epochs().unwrap();
        assert!(Arc::ptr_eq(&live, &newer.epochs));
        assert_eq!(live.n_times(), 101);
    }

    #[test]
    fn new_request_clears_evoked_cache() {
        let dir = tempfile::tempdir().unwrap();
        let coll = ready_collection(dir.path());
        coll.collect_epochs(request(0.8), None).unwrap();
        let a = coll.average_for("2").unwrap();
        let b = coll.average_for("2").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        coll.begin_collection();
        assert!(matches!(
            coll.average_for("2"),
            Err(PipelineError::Precondition { .. })
        ));
        coll.collect_epochs(request(0.8), None).unwrap();
        let c = coll.average_for("2").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn oversized_window_is_a_processing_error() {
        let dir = tempfile::tempdir().unwrap();
        let coll = ready_collection(dir.path());
        let mut req = request(0.8);
        req.tmin = -1e300;
        req.tmax = 1e300;
        assert!(matches!(
            coll.collect_epochs(req, None),
            Err(PipelineError::Processing(eegdsp::DspError::InvalidArgument(_)))
        ));
        assert!(coll.epochs().is_none());
    }

    #[test]
    fn unknown_codes_match_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let coll = ready_collection(dir.path());
        let mut req = request(0.8);
        req.event_codes = vec![77];
        assert!(matches!(
            coll.collect_epochs(req, None),
            Err(PipelineError::NoMatchingTrials(_))
        ));
        coll.collect_epochs(request(0.8), None).unwrap();
        assert!(matches!(
            coll.average_for("rest"),
            Err(PipelineError::NoMatchingTrials(_))
        ));
    }

    #[test]
    fn target_evoked_peaks_late_at_pz() {
        let dir = tempfile::tempdir().unwrap();
        let coll = ready_collection(dir.path());
        coll.collect_epochs(request(0.8), None).unwrap();
        let evoked = coll.average_for("2").unwrap();
        let pz = evoked.ch_names.iter().position(|n| n == "PZ").unwrap();
        let times = evoked.times();
        let peak = evoked
            .data
            .row(pz)
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| times[i])
            .unwrap();
        assert!((0.2..0.4).contains(&peak), "peak at {peak}");
    }

    #[test]
    fn spectra_for_one_sensor() {
        let dir = tempfile::tempdir().unwrap();
        let coll = ready_collection(dir.path());
        coll.collect_epochs(request(0.8), None).unwrap();

        let (spec, names) = coll.compute_psd(Some("oz"), "1", 2.0, 30.0).unwrap();
        assert_eq!(names, vec!["OZ".to_string()]);
        assert_eq!(spec.psd.nrows(), 1);

        let tfr = TfrRequest { fmin: 8.0, fmax: 20.0, n_freqs: 4, n_cycles: 3.0 };
        let (tf, names) = coll.compute_time_frequency(None, "1", &tfr).unwrap();
        assert_eq!(names.len(), 10);
        assert_eq!(tf.power.shape(), &[10, 4, 126]);

        assert!(coll.compute_psd(Some("nope"), "1", 2.0, 30.0).is_err());
        let (trials, times) = coll.sensor_trials("Pz", "2").unwrap();
        assert_eq!(times.len(), 126);
        assert!(!trials.is_empty());
    }

    #[test]
    fn missing_raw_is_a_precondition() {
        let rec = EegRecording::new("/nowhere/x.txt", Arc::new(FailureLog::default()));
        let coll = EpochCollection::new(rec);
        assert!(matches!(
            coll.collect_epochs(request(0.8), None),
            Err(PipelineError::Precondition { .. })
        ));
    }
}
