//! Event decoding from annotations.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{DspError, Result};
use crate::raw::Annotation;

/// One event: onset sample, duration in samples, integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Event {
    pub sample: usize,
    pub duration: usize,
    pub code: i32,
}

/// Label → code mapping produced alongside the events.
pub type EventId = BTreeMap<String, i32>;

/// Turn annotations into sample-indexed events.
///
/// Labels that parse as integers keep that integer as their code. The rest are
/// numbered consecutively above the largest integer code, in sorted label
/// order. Annotations outside `[0, n_times)` are dropped. Output is sorted by
/// sample.
pub fn events_from_annotations(
    annotations: &[Annotation],
    sfreq: f64,
    n_times: usize,
) -> Result<(Vec<Event>, EventId)> {
    if annotations.is_empty() {
        return Err(DspError::Empty("recording has no annotations".into()));
    }

    let labels: BTreeSet<&str> = annotations.iter().map(|a| a.description.as_str()).collect();
    let mut event_id = EventId::new();
    let mut named = Vec::new();
    for label in &labels {
        match label.trim().parse::<i32>() {
            Ok(code) => {
                event_id.insert(label.to_string(), code);
            }
            Err(_) => named.push(*label),
        }
    }
    let mut next = event_id.values().copied().max().unwrap_or(0);
    for label in named {
        next = next.checked_add(1).ok_or_else(|| {
            DspError::InvalidArgument(format!("no event code left for label {label:?}"))
        })?;
        event_id.insert(label.to_string(), next);
    }

    let mut events = Vec::with_capacity(annotations.len());
    let mut outside = 0usize;
    for a in annotations {
        let sample = (a.onset * sfreq).round();
        if sample < 0.0 || sample as usize >= n_times {
            outside += 1;
            continue;
        }
        events.push(Event {
            sample: sample as usize,
            duration: (a.duration * sfreq).round().max(0.0) as usize,
            code: event_id[a.description.as_str()],
        });
    }
    if outside > 0 {
        tracing::warn!(outside, "dropped annotations outside the recording");
    }
    events.sort_by_key(|e| e.sample);
    Ok((events, event_id))
}

/// Keep only events whose code is in `codes`, preserving order.
pub fn select_codes(events: &[Event], codes: &[i32]) -> Vec<Event> {
    events
        .iter()
        .filter(|e| codes.contains(&e.code))
        .copied()
        .collect()
}

/// Drop events sharing a sample with an earlier one: the first one wins and
/// nothing is combined. Returns the kept events and the dropped ones.
/// `events` must be sorted by sample.
pub fn drop_repeated(events: &[Event]) -> (Vec<Event>, Vec<Event>) {
    let mut kept: Vec<Event> = Vec::with_capacity(events.len());
    let mut dropped = Vec::new();
    for &e in events {
        match kept.last() {
            Some(prev) if prev.sample == e.sample => dropped.push(e),
            _ => kept.push(e),
        }
    }
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ann(onset: f64, label: &str) -> Annotation {
        Annotation { onset, duration: 0.0, description: label.into() }
    }

    #[test]
    fn integer_labels_keep_codes_and_names_follow() {
        let anns = [ann(1.0, "7"), ann(2.0, "target"), ann(3.0, "2"), ann(4.0, "distractor")];
        let (events, id) = events_from_annotations(&anns, 100.0, 1000).unwrap();
        assert_eq!(id["7"], 7);
        assert_eq!(id["2"], 2);
        assert_eq!(id["distractor"], 8);
        assert_eq!(id["target"], 9);
        let codes: Vec<i32> = events.iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![7, 9, 2, 8]);
        assert_eq!(events[0].sample, 100);
    }

    #[test]
    fn names_only_start_at_one() {
        let (_, id) = events_from_annotations(&[ann(0.0, "b"), ann(0.5, "a")], 10.0, 100).unwrap();
        assert_eq!(id["a"], 1);
        assert_eq!(id["b"], 2);
    }

    #[test]
    fn out_of_range_dropped_and_sorted() {
        let anns = [ann(5.0, "1"), ann(-1.0, "1"), ann(2.0, "1"), ann(20.0, "1")];
        let (events, _) = events_from_annotations(&anns, 10.0, 100).unwrap();
        let samples: Vec<usize> = events.iter().map(|e| e.sample).collect();
        assert_eq!(samples, vec![20, 50]);
    }

    #[test]
    fn empty_annotations_is_an_error() {
        assert!(matches!(
            events_from_annotations(&[], 10.0, 100),
            Err(DspError::Empty(_))
        ));
    }

    #[test]
    fn select_then_drop() {
        let events = [
            Event { sample: 100, duration: 0, code: 1 },
            Event { sample: 200, duration: 0, code: 2 },
            Event { sample: 300, duration: 0, code: 3 },
            Event { sample: 300, duration: 0, code: 2 },
            Event { sample: 400, duration: 0, code: 1 },
        ];
        let picked = select_codes(&events, &[2, 3]);
        assert_eq!(picked.len(), 3);
        let (kept, dropped) = drop_repeated(&picked);
        assert_eq!(kept.iter().map(|e| e.sample).collect::<Vec<_>>(), vec![200, 300]);
        assert_eq!(kept[1].code, 3);
        assert_eq!(dropped, vec![Event { sample: 300, duration: 0, code: 2 }]);
    }

    #[test]
    fn repeated_samples_are_dropped_not_combined() {
        let events = [
            Event { sample: 50, duration: 3, code: 4 },
            Event { sample: 50, duration: 9, code: 5 },
            Event { sample: 50, duration: 1, code: 6 },
        ];
        let (kept, dropped) = drop_repeated(&events);
        assert_eq!(kept, vec![events[0]]);
        assert_eq!(dropped, vec![events[1], events[2]]);
    }

    #[test]
    fn named_labels_above_max_code_are_an_error() {
        let anns = [ann(1.0, "2147483647"), ann(2.0, "target")];
        assert!(matches!(
            events_from_annotations(&anns, 100.0, 1000),
            Err(DspError::InvalidArgument(_))
        ));
        let (_, id) = events_from_annotations(&[ann(1.0, "2147483646"), ann(2.0, "x")], 100.0, 1000).unwrap();
        assert_eq!(id["x"], i32::MAX);
    }
}
