//! End-to-end: write a BDF pair, read it back, and run the epoching chain.

use approx::assert_abs_diff_eq;
use eegdsp::edf::{read_annotations, read_raw, write_bdf, write_bdf_annotations};
use eegdsp::{
    events_from_annotations, make_standard_montage, drop_repeated, select_codes, welch_psd,
    Annotation, Baseline, Epochs, RawSignal,
};
use ndarray::Array2;
use std::f64::consts::PI;

const SFREQ: f64 = 250.0;

/// Three channels of 10 Hz background with a 5 µV bump 100 ms after each "1".
fn synthetic() -> (RawSignal, Vec<Annotation>) {
    let n_times = 20 * SFREQ as usize;
    let onsets = [2.0, 5.0, 8.0, 11.0, 14.0];
    let data = Array2::from_shape_fn((3, n_times), |(c, t)| {
        let secs = t as f64 / SFREQ;
        let mut v = 2e-6 * (2.0 * PI * 10.0 * secs + c as f64).sin();
        for onset in onsets {
            let dt = secs - onset - 0.1;
            v += 5e-6 * (-dt * dt / (2.0 * 0.02 * 0.02)).exp();
        }
        v
    });
    let raw = RawSignal::new(data, SFREQ, vec!["Cz".into(), "Pz".into(), "Oz".into()]).unwrap();
    let mut annotations: Vec<Annotation> = onsets
        .iter()
        .map(|&onset| Annotation { onset, duration: 0.0, description: "1".into() })
        .collect();
    annotations.push(Annotation { onset: 17.0, duration: 0.0, description: "2".into() });
    (raw, annotations)
}

#[test]
fn paired_files_to_evoked() {
    let dir = tempfile::tempdir().unwrap();
    let (raw, annotations) = synthetic();
    write_bdf(&dir.path().join("data.bdf"), &raw).unwrap();
    write_bdf_annotations(&dir.path().join("evt.bdf"), &annotations).unwrap();

    let mut loaded = read_raw(&dir.path().join("data.bdf")).unwrap();
    assert!(loaded.annotations.is_empty());
    loaded.annotations = read_annotations(&dir.path().join("evt.bdf")).unwrap();
    loaded.upper_case_channels();

    let mut montage = make_standard_montage("standard_1020").unwrap();
    montage.upper_case();
    assert!(loaded.set_montage(&montage).is_empty());

    let (events, event_id) =
        events_from_annotations(&loaded.annotations, loaded.info.sfreq, loaded.n_times()).unwrap();
    assert_eq!(events.len(), 6);
    assert_eq!(event_id["1"], 1);

    let (kept, dropped) = drop_repeated(&select_codes(&events, &[1]));
    assert!(dropped.is_empty());
    let baseline = Baseline { start: Some(-0.2), end: None };
    let mut epochs = Epochs::from_raw(&loaded, &kept, &event_id, -0.2, 0.8, Some(baseline)).unwrap();
    assert_eq!(epochs.n_epochs(), 5);
    assert_eq!(epochs.n_times(), 251);

    epochs.filter(Some(1.0), Some(40.0)).unwrap();
    epochs.decimate(2).unwrap();
    assert_eq!(epochs.n_times(), 126);
    assert_abs_diff_eq!(epochs.sfreq, 125.0);

    let evoked = epochs.average(1).unwrap();
    assert_eq!(evoked.nave, 5);
    let times = evoked.times();
    let peak = evoked
        .data
        .row(0)
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| times[i])
        .unwrap();
    assert_abs_diff_eq!(peak, 0.1, epsilon = 0.03);

    let spec = welch_psd(epochs.data.view(), epochs.sfreq, 5.0, 20.0).unwrap();
    let peak_freq = spec
        .psd
        .row(0)
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| spec.freqs[i])
        .unwrap();
    assert!((9.0..=12.0).contains(&peak_freq), "peak at {peak_freq} Hz");
}
