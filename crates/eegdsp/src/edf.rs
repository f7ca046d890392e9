//! EDF / EDF+ / BDF / BDF+ reader and a minimal BDF+ writer.
//!
//! File layout (all header fields are space-padded ASCII):
//!
//! | bytes            | field                                   |
//! |------------------|-----------------------------------------|
//! | 0..8             | version (`0` for EDF, `\xFFBIOSEMI`)    |
//! | 8..88            | patient id                              |
//! | 88..168          | recording id                            |
//! | 168..176         | start date `dd.mm.yy`                   |
//! | 176..184         | start time `hh.mm.ss`                   |
//! | 184..192         | header size in bytes                    |
//! | 192..236         | reserved (`EDF+C`, `BDF+C`, `24BIT`)    |
//! | 236..244         | number of data records (`-1` = unknown) |
//! | 244..252         | record duration in seconds              |
//! | 252..256         | number of signals `ns`                  |
//!
//! followed by `ns` blocks per signal field (label 16, transducer 80,
//! dimension 8, physical min/max 8+8, digital min/max 8+8, prefilter 80,
//! samples per record 8, reserved 32). Data records then hold, per signal,
//! `samples_per_record` little-endian integers of 2 (EDF) or 3 (BDF) bytes.
//!
//! Annotations live in a signal labelled `EDF Annotations` / `BDF Annotations`
//! as Time-stamped Annotation Lists: `+onset[\x15duration]\x14text\x14...\x00`.

use ndarray::Array2;
use std::path::Path;

use crate::error::{DspError, Result};
use crate::raw::{Annotation, RawSignal};

const FIXED_HEADER: usize = 256;
const PER_SIGNAL_HEADER: usize = 256;
const TAL_ONSET_END: u8 = 0x14;
const TAL_DURATION: u8 = 0x15;

const BDF_DIGITAL_MIN: i32 = -8_388_608;
const BDF_DIGITAL_MAX: i32 = 8_388_607;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Edf,
    Bdf,
}

impl Variant {
    fn sample_width(self) -> usize {
        match self {
            Variant::Edf => 2,
            Variant::Bdf => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalHeader {
    pub label: String,
    pub physical_dimension: String,
    pub physical_min: f64,
    pub physical_max: f64,
    pub digital_min: i32,
    pub digital_max: i32,
    pub samples_per_record: usize,
}

impl SignalHeader {
    pub fn is_annotation(&self) -> bool {
        self.label == "EDF Annotations" || self.label == "BDF Annotations"
    }

    /// Multiplier taking physical units to volts. Unknown dimensions pass through.
    fn volts_per_unit(&self) -> f64 {
        match self.physical_dimension.as_str() {
            "uV" | "µV" | "μV" => 1e-6,
            "mV" => 1e-3,
            "nV" => 1e-9,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EdfHeader {
    pub variant: Variant,
    pub start: String,
    pub header_bytes: usize,
    pub n_records: usize,
    pub record_duration: f64,
    pub signals: Vec<SignalHeader>,
}

impl EdfHeader {
    fn record_bytes(&self) -> usize {
        let width = self.variant.sample_width();
        self.signals
            .iter()
            .map(|s| s.samples_per_record * width)
            .sum()
    }
}

/// Read a recording: data channels in volts plus the file's own annotations.
pub fn read_raw(path: &Path) -> Result<RawSignal> {
    let bytes = std::fs::read(path).map_err(|e| DspError::io(path, e))?;
    let header = parse_header(path, &bytes)?;

    let data_idx: Vec<usize> = header
        .signals
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_annotation())
        .map(|(i, _)| i)
        .collect();
    if data_idx.is_empty() {
        return Err(DspError::format(path, "no data channels"));
    }
    let spr = header.signals[data_idx[0]].samples_per_record;
    if data_idx
        .iter()
        .any(|&i| header.signals[i].samples_per_record != spr)
    {
        return Err(DspError::format(
            path,
            "data channels have different sampling rates",
        ));
    }
    if header.record_duration <= 0.0 {
        return Err(DspError::format(path, "record duration must be positive"));
    }
    let sfreq = spr as f64 / header.record_duration;

    let width = header.variant.sample_width();
    let record_bytes = header.record_bytes();
    let n_times = header.n_records * spr;
    let mut data = Array2::<f64>::zeros((data_idx.len(), n_times));
    let mut annotations = Vec::new();

    for record in 0..header.n_records {
        let mut offset = header.header_bytes + record * record_bytes;
        let mut row = 0;
        for sig in &header.signals {
            let n_bytes = sig.samples_per_record * width;
            let chunk = &bytes[offset..offset + n_bytes];
            offset += n_bytes;
            if sig.is_annotation() {
                annotations.extend(parse_tal(chunk));
                continue;
            }
            let scale = scaling(path, sig)?;
            let base = record * spr;
            for (k, sample) in chunk.chunks_exact(width).enumerate() {
                data[[row, base + k]] = scale.apply(decode_sample(header.variant, sample));
            }
            row += 1;
        }
    }

    let ch_names = data_idx
        .iter()
        .map(|&i| header.signals[i].label.clone())
        .collect();
    let mut raw = RawSignal::new(data, sfreq, ch_names)?;
    raw.info.meas_date = Some(header.start.clone());
    raw.annotations = annotations;
    tracing::debug!(
        path = %path.display(),
        n_channels = raw.n_channels(),
        n_times = raw.n_times(),
        sfreq,
        n_annotations = raw.annotations.len(),
        "read recording"
    );
    Ok(raw)
}

/// Read only the annotation channel(s) of a file.
pub fn read_annotations(path: &Path) -> Result<Vec<Annotation>> {
    let bytes = std::fs::read(path).map_err(|e| DspError::io(path, e))?;
    let header = parse_header(path, &bytes)?;
    if !header.signals.iter().any(SignalHeader::is_annotation) {
        return Err(DspError::format(path, "no annotation channel"));
    }

    let width = header.variant.sample_width();
    let record_bytes = header.record_bytes();
    let mut annotations = Vec::new();
    for record in 0..header.n_records {
        let mut offset = header.header_bytes + record * record_bytes;
        for sig in &header.signals {
            let n_bytes = sig.samples_per_record * width;
            if sig.is_annotation() {
                annotations.extend(parse_tal(&bytes[offset..offset + n_bytes]));
            }
            offset += n_bytes;
        }
    }
    Ok(annotations)
}

/// Parse the fixed and per-signal header, checking the file holds every record.
pub fn parse_header(path: &Path, bytes: &[u8]) -> Result<EdfHeader> {
    if bytes.len() < FIXED_HEADER {
        return Err(DspError::format(path, "file shorter than the fixed header"));
    }
    let variant = if bytes[0] == 0xFF && &bytes[1..8] == b"BIOSEMI" {
        Variant::Bdf
    } else if bytes[0] == b'0' {
        Variant::Edf
    } else {
        return Err(DspError::format(path, "unknown version field"));
    };

    let start = format!("{} {}", ascii(bytes, 168, 8), ascii(bytes, 176, 8));
    let header_bytes: usize = number(path, "header size", &ascii(bytes, 184, 8))?;
    let declared_records: i64 = number(path, "record count", &ascii(bytes, 236, 8))?;
    let record_duration: f64 = number(path, "record duration", &ascii(bytes, 244, 8))?;
    let ns: usize = number(path, "signal count", &ascii(bytes, 252, 4))?;

    if header_bytes != FIXED_HEADER + ns * PER_SIGNAL_HEADER || bytes.len() < header_bytes {
        return Err(DspError::format(
            path,
            format!("inconsistent header size {} for {} signals", header_bytes, ns),
        ));
    }

    // Per-signal fields are stored column-wise: all labels, then all transducers, ...
    let field = |base: usize, width: usize, i: usize| ascii(bytes, base + i * width, width);
    let mut base = FIXED_HEADER;
    let labels: Vec<String> = (0..ns).map(|i| field(base, 16, i)).collect();
    base += ns * 16;
    base += ns * 80; // transducer
    let dims: Vec<String> = (0..ns).map(|i| field(base, 8, i)).collect();
    base += ns * 8;
    let pmins: Vec<String> = (0..ns).map(|i| field(base, 8, i)).collect();
    base += ns * 8;
    let pmaxs: Vec<String> = (0..ns).map(|i| field(base, 8, i)).collect();
    base += ns * 8;
    let dmins: Vec<String> = (0..ns).map(|i| field(base, 8, i)).collect();
    base += ns * 8;
    let dmaxs: Vec<String> = (0..ns).map(|i| field(base, 8, i)).collect();
    base += ns * 8;
    base += ns * 80; // prefilter
    let sprs: Vec<String> = (0..ns).map(|i| field(base, 8, i)).collect();

    let mut signals = Vec::with_capacity(ns);
    for i in 0..ns {
        signals.push(SignalHeader {
            label: labels[i].clone(),
            physical_dimension: dims[i].clone(),
            physical_min: number(path, "physical minimum", &pmins[i])?,
            physical_max: number(path, "physical maximum", &pmaxs[i])?,
            digital_min: number(path, "digital minimum", &dmins[i])?,
            digital_max: number(path, "digital maximum", &dmaxs[i])?,
            samples_per_record: number(path, "samples per record", &sprs[i])?,
        });
    }

    let mut header = EdfHeader {
        variant,
        start,
        header_bytes,
        n_records: 0,
        record_duration,
        signals,
    };
    let record_bytes = header.record_bytes();
    let available = if record_bytes == 0 {
        0
    } else {
        (bytes.len() - header_bytes) / record_bytes
    };
    header.n_records = if declared_records < 0 {
        available
    } else {
        let declared = declared_records as usize;
        if declared > available {
            return Err(DspError::format(
                path,
                format!(
                    "truncated: header declares {} records, file holds {}",
                    declared, available
                ),
            ));
        }
        declared
    };
    Ok(header)
}

/// Decode TAL bytes from one record. The per-record timekeeping entry has no
/// text and is skipped along with any other empty annotation.
pub fn parse_tal(bytes: &[u8]) -> Vec<Annotation> {
    let mut out = Vec::new();
    for tal in bytes.split(|&b| b == 0).filter(|t| !t.is_empty()) {
        let mut parts = tal.split(|&b| b == TAL_ONSET_END);
        let Some(timing) = parts.next() else { continue };
        let mut timing = timing.split(|&b| b == TAL_DURATION);
        let onset_text = String::from_utf8_lossy(timing.next().unwrap_or_default());
        let Ok(onset) = onset_text.trim().parse::<f64>() else {
            tracing::warn!(onset = %onset_text, "skipping annotation with unreadable onset");
            continue;
        };
        let duration = timing
            .next()
            .and_then(|d| String::from_utf8_lossy(d).trim().parse::<f64>().ok())
            .unwrap_or(0.0);
        for text in parts {
            let text = String::from_utf8_lossy(text);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            out.push(Annotation {
                onset,
                duration,
                description: text.to_string(),
            });
        }
    }
    out
}

#[derive(Clone, Copy)]
struct Scale {
    gain: f64,
    offset: f64,
}

impl Scale {
    #[inline]
    fn apply(self, digital: i32) -> f64 {
        digital as f64 * self.gain + self.offset
    }
}

fn scaling(path: &Path, sig: &SignalHeader) -> Result<Scale> {
    let span = (sig.digital_max - sig.digital_min) as f64;
    if span == 0.0 {
        return Err(DspError::format(
            path,
            format!("channel {} has an empty digital range", sig.label),
        ));
    }
    let unit = sig.volts_per_unit();
    let gain = (sig.physical_max - sig.physical_min) / span;
    Ok(Scale {
        gain: gain * unit,
        offset: (sig.physical_min - sig.digital_min as f64 * gain) * unit,
    })
}

#[inline]
fn decode_sample(variant: Variant, b: &[u8]) -> i32 {
    match variant {
        Variant::Edf => i16::from_le_bytes([b[0], b[1]]) as i32,
        Variant::Bdf => {
            let v = (b[0] as i32) | ((b[1] as i32) << 8) | ((b[2] as i32) << 16);
            (v << 8) >> 8
        }
    }
}

fn ascii(bytes: &[u8], start: usize, len: usize) -> String {
    String::from_utf8_lossy(&bytes[start..start + len])
        .trim()
        .to_string()
}

fn number<T: std::str::FromStr>(path: &Path, what: &str, text: &str) -> Result<T> {
    text.parse()
        .map_err(|_| DspError::format(path, format!("bad {}: {:?}", what, text)))
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Write `raw` (volts) plus its annotations as a BDF+ file with one-second
/// records. The last record is zero-padded.
pub fn write_bdf(path: &Path, raw: &RawSignal) -> Result<()> {
    let spr_f = raw.info.sfreq;
    if spr_f.fract() != 0.0 {
        return Err(DspError::InvalidArgument(format!(
            "BDF writer needs an integer sampling rate, got {}",
            spr_f
        )));
    }
    let spr = spr_f as usize;
    let n_records = raw.n_times().div_ceil(spr).max(1);

    let mut channels = Vec::with_capacity(raw.n_channels());
    for (c, name) in raw.info.ch_names.iter().enumerate() {
        let row = raw.data.row(c);
        let (lo, hi) = row
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let (lo, hi) = if lo.is_finite() { (lo, hi) } else { (0.0, 0.0) };
        // Integer microvolt bounds survive the 8-character header fields exactly.
        channels.push(WriterSignal {
            label: name.clone(),
            dimension: "uV",
            physical_min: (lo * 1e6).floor() - 1.0,
            physical_max: (hi * 1e6).ceil() + 1.0,
            digital_min: BDF_DIGITAL_MIN,
            digital_max: BDF_DIGITAL_MAX,
            samples_per_record: spr,
        });
    }

    let tals = record_tals(&raw.annotations, n_records, 1.0);
    let annot_spr = annotation_samples(&tals);
    channels.push(annotation_signal(annot_spr));

    let mut out = header_bytes(&channels, n_records, "1");
    for (record, tal) in tals.iter().enumerate() {
        for (c, sig) in channels.iter().enumerate() {
            if c == raw.n_channels() {
                push_annotation_block(&mut out, tal, annot_spr);
                continue;
            }
            let gain = (sig.physical_max - sig.physical_min)
                / (sig.digital_max - sig.digital_min) as f64;
            for k in 0..spr {
                let t = record * spr + k;
                let volts = if t < raw.n_times() { raw.data[[c, t]] } else { 0.0 };
                let digital = ((volts * 1e6 - sig.physical_min) / gain
                    + sig.digital_min as f64)
                    .round()
                    .clamp(sig.digital_min as f64, sig.digital_max as f64)
                    as i32;
                out.extend_from_slice(&digital.to_le_bytes()[..3]);
            }
        }
    }
    std::fs::write(path, out).map_err(|e| DspError::io(path, e))
}

/// Write an annotation-only BDF+ file (a single record of zero duration), the
/// companion `evt.bdf` of a paired recording.
pub fn write_bdf_annotations(path: &Path, annotations: &[Annotation]) -> Result<()> {
    let tals = record_tals(annotations, 1, 0.0);
    let annot_spr = annotation_samples(&tals);
    let channels = vec![annotation_signal(annot_spr)];
    let mut out = header_bytes(&channels, 1, "0");
    push_annotation_block(&mut out, &tals[0], annot_spr);
    std::fs::write(path, out).map_err(|e| DspError::io(path, e))
}

struct WriterSignal {
    label: String,
    dimension: &'static str,
    physical_min: f64,
    physical_max: f64,
    digital_min: i32,
    digital_max: i32,
    samples_per_record: usize,
}

fn annotation_signal(samples_per_record: usize) -> WriterSignal {
    WriterSignal {
        label: "BDF Annotations".to_string(),
        dimension: "",
        physical_min: -1.0,
        physical_max: 1.0,
        digital_min: BDF_DIGITAL_MIN,
        digital_max: BDF_DIGITAL_MAX,
        samples_per_record,
    }
}

/// TAL bytes per record. A zero `record_secs` puts everything in record 0.
fn record_tals(annotations: &[Annotation], n_records: usize, record_secs: f64) -> Vec<Vec<u8>> {
    let mut tals: Vec<Vec<u8>> = (0..n_records)
        .map(|r| format!("+{}\x14\x14\x00", r as f64 * record_secs).into_bytes())
        .collect();
    for a in annotations {
        let record = if record_secs > 0.0 && a.onset > 0.0 {
            ((a.onset / record_secs).floor() as usize).min(n_records - 1)
        } else {
            0
        };
        let sign = if a.onset < 0.0 { "" } else { "+" };
        let mut tal = format!("{}{}", sign, a.onset);
        if a.duration > 0.0 {
            tal.push_str(&format!("\x15{}", a.duration));
        }
        tal.push_str(&format!("\x14{}\x14\x00", a.description));
        tals[record].extend_from_slice(tal.as_bytes());
    }
    tals
}

fn annotation_samples(tals: &[Vec<u8>]) -> usize {
    let longest = tals.iter().map(Vec::len).max().unwrap_or(0);
    longest.div_ceil(3).max(1)
}

fn push_annotation_block(out: &mut Vec<u8>, tal: &[u8], samples: usize) {
    out.extend_from_slice(tal);
    out.resize(out.len() + samples * 3 - tal.len(), 0);
}

fn header_bytes(signals: &[WriterSignal], n_records: usize, duration: &str) -> Vec<u8> {
    let ns = signals.len();
    let mut h = Vec::with_capacity(FIXED_HEADER + ns * PER_SIGNAL_HEADER);
    h.push(0xFF);
    h.extend_from_slice(b"BIOSEMI");
    push_field(&mut h, "X X X X", 80);
    push_field(&mut h, "Startdate X X X X", 80);
    push_field(&mut h, "01.01.00", 8);
    push_field(&mut h, "00.00.00", 8);
    push_field(&mut h, &(FIXED_HEADER + ns * PER_SIGNAL_HEADER).to_string(), 8);
    push_field(&mut h, "BDF+C", 44);
    push_field(&mut h, &n_records.to_string(), 8);
    push_field(&mut h, duration, 8);
    push_field(&mut h, &ns.to_string(), 4);

    for s in signals {
        push_field(&mut h, &s.label, 16);
    }
    for _ in signals {
        push_field(&mut h, "", 80);
    }
    for s in signals {
        push_field(&mut h, s.dimension, 8);
    }
    for s in signals {
        push_field(&mut h, &s.physical_min.to_string(), 8);
    }
    for s in signals {
        push_field(&mut h, &s.physical_max.to_string(), 8);
    }
    for s in signals {
        push_field(&mut h, &s.digital_min.to_string(), 8);
    }
    for s in signals {
        push_field(&mut h, &s.digital_max.to_string(), 8);
    }
    for _ in signals {
        push_field(&mut h, "", 80);
    }
    for s in signals {
        push_field(&mut h, &s.samples_per_record.to_string(), 8);
    }
    for _ in signals {
        push_field(&mut h, "", 32);
    }
    h
}

fn push_field(out: &mut Vec<u8>, value: &str, width: usize) {
    let mut bytes: Vec<u8> = value.bytes().take(width).collect();
    bytes.resize(width, b' ');
    out.extend_from_slice(&bytes);
}
