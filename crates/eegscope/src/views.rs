//! CSV renderings of pipeline results served under `/zcc/*.csv`.
//!
//! Numbers use Rust's shortest round-trip formatting. Column headers follow
//! the route table: one row per sample, frequency or sensor.

use eegdsp::{Evoked, Montage, Spectrum, TimeFrequency};
use std::fmt::Write;

use crate::index::DataFile;
use crate::recording::EventTable;

/// Quote a field when it holds a separator, quote or newline.
fn field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn header_row(out: &mut String, first: &str, names: &[String]) {
    out.push_str(first);
    for name in names {
        out.push(',');
        out.push_str(&field(name));
    }
    out.push('\n');
}

pub fn montage_csv(montage: &Montage) -> String {
    let mut out = String::from("name,x,y,z\n");
    for (name, [x, y, z]) in montage.iter() {
        let _ = writeln!(out, "{},{},{},{}", field(name), x, y, z);
    }
    out
}

pub fn events_csv(table: &EventTable) -> String {
    let mut out = String::from("sample,duration,code,label\n");
    for event in &table.events {
        let label = table.label_for(event.code).unwrap_or_default();
        let _ = writeln!(
            out,
            "{},{},{},{}",
            event.sample,
            event.duration,
            event.code,
            field(label)
        );
    }
    out
}

/// `time,<ch>...`, one row per sample.
pub fn evoked_csv(evoked: &Evoked) -> String {
    let mut out = String::new();
    header_row(&mut out, "time", &evoked.ch_names);
    for (t, time) in evoked.times().iter().enumerate() {
        let _ = write!(out, "{}", time);
        for value in evoked.data.column(t) {
            let _ = write!(out, ",{}", value);
        }
        out.push('\n');
    }
    out
}

/// `time,trial_0..,mean` for a single sensor.
pub fn sensor_trace_csv(trials: &[Vec<f64>], times: &[f64]) -> String {
    let mut out = String::from("time");
    for i in 0..trials.len() {
        let _ = write!(out, ",trial_{}", i);
    }
    out.push_str(",mean\n");
    for (t, time) in times.iter().enumerate() {
        let _ = write!(out, "{}", time);
        let mut sum = 0.0;
        for trial in trials {
            let value = trial.get(t).copied().unwrap_or(f64::NAN);
            sum += value;
            let _ = write!(out, ",{}", value);
        }
        let mean = if trials.is_empty() {
            f64::NAN
        } else {
            sum / trials.len() as f64
        };
        let _ = writeln!(out, ",{}", mean);
    }
    out
}

/// `freq,<ch>...`, one row per frequency bin.
pub fn psd_csv(spectrum: &Spectrum, names: &[String]) -> String {
    let mut out = String::new();
    header_row(&mut out, "freq", names);
    for (f, freq) in spectrum.freqs.iter().enumerate() {
        let _ = write!(out, "{}", freq);
        for value in spectrum.psd.column(f) {
            let _ = write!(out, ",{}", value);
        }
        out.push('\n');
    }
    out
}

/// Long format `time,freq,power`, power averaged over the rendered channels.
pub fn time_frequency_csv(tfr: &TimeFrequency) -> String {
    let mut out = String::from("time,freq,power\n");
    let n_channels = tfr.power.shape()[0].max(1) as f64;
    for (t, time) in tfr.times.iter().enumerate() {
        for (f, freq) in tfr.freqs.iter().enumerate() {
            let power = tfr.power.slice(ndarray::s![.., f, t]).sum() / n_channels;
            let _ = writeln!(out, "{},{},{}", time, freq, power);
        }
    }
    out
}

pub fn data_files_csv(files: &[DataFile]) -> String {
    let mut out = String::from("path,experiment,subjectID\n");
    for file in files {
        let _ = writeln!(
            out,
            "{},{},{}",
            field(&file.path.display().to_string()),
            field(&file.experiment),
            field(&file.subject_id)
        );
    }
    out
}

/// `experiment,files`, configured experiments first, then `na` if used.
pub fn experiments_csv(experiments: &[String], files: &[DataFile]) -> String {
    let mut out = String::from("experiment,files\n");
    let mut names: Vec<&str> = experiments.iter().map(String::as_str).collect();
    if files.iter().any(|f| !names.contains(&f.experiment.as_str())) {
        names.push(crate::index::UNKNOWN_EXPERIMENT);
    }
    for name in names {
        let count = files.iter().filter(|f| f.experiment == name).count();
        let _ = writeln!(out, "{},{}", field(name), count);
    }
    out
}
