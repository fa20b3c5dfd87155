//! Event table: markers, the name → code map, and duplicate resolution.
//!
//! Event names may be hierarchical: `"auditory/left"` carries the tags
//! `{auditory, left}`. Tag sets are precomputed at map construction so that
//! key matching is a set test, not string parsing on every access, and
//! `"left/auditory"` matches `"auditory/left"`.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::{bail, Result};
use log::warn;

use crate::error::EpoError;

// ── Event ─────────────────────────────────────────────────────────────────

/// One marker in the continuous recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Absolute sample index in acquisition time.
    pub sample: i64,
    /// Trigger value immediately before the event.
    pub prior: i32,
    /// Event code.
    pub code: i32,
}

impl Event {
    pub fn new(sample: i64, prior: i32, code: i32) -> Self {
        Event { sample, prior, code }
    }
}

/// Warn (non-aborting) when events are not in chronological order.
pub fn check_chronological(events: &[Event]) {
    if events.windows(2).any(|w| w[1].sample < w[0].sample) {
        warn!("events are not in chronological order");
    }
}

// ── Event-id map ──────────────────────────────────────────────────────────

/// Ordered name → code map with precomputed hierarchical tag sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventId {
    map: BTreeMap<String, i32>,
    tags: HashMap<String, BTreeSet<String>>,
}

impl EventId {
    pub fn new(pairs: impl IntoIterator<Item = (String, i32)>) -> Result<Self> {
        let mut id = EventId::default();
        for (name, code) in pairs {
            id.insert(name, code)?;
        }
        Ok(id)
    }

    /// Build `{"code": code}` entries for every distinct code in `events`.
    pub fn from_codes(events: &[Event]) -> Self {
        let mut codes: Vec<i32> = events.iter().map(|e| e.code).collect();
        codes.sort_unstable();
        codes.dedup();
        let mut id = EventId::default();
        for code in codes {
            id.insert(code.to_string(), code).expect("distinct codes");
        }
        id
    }

    pub fn insert(&mut self, name: impl Into<String>, code: i32) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            bail!(EpoError::validation("event name must not be empty"));
        }
        if let Some(&existing) = self.map.get(&name) {
            if existing != code {
                bail!(EpoError::validation(format!(
                    "event name {name:?} already maps to code {existing}"
                )));
            }
            return Ok(());
        }
        if let Some((other, _)) = self.map.iter().find(|(_, &c)| c == code) {
            bail!(EpoError::validation(format!(
                "event code {code} already named {other:?}"
            )));
        }
        self.tags.insert(name.clone(), split_tags(&name));
        self.map.insert(name, code);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn get(&self, name: &str) -> Option<i32> {
        self.map.get(name).copied()
    }

    pub fn name_of(&self, code: i32) -> Option<&str> {
        self.map
            .iter()
            .find(|(_, &c)| c == code)
            .map(|(n, _)| n.as_str())
    }

    pub fn codes(&self) -> Vec<i32> {
        self.map.values().copied().collect()
    }

    pub fn contains_code(&self, code: i32) -> bool {
        self.map.values().any(|&c| c == code)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.map.iter().map(|(n, &c)| (n.as_str(), c))
    }

    /// Drop entries whose code is absent from `codes`.
    pub fn retain_codes(&mut self, codes: &[i32]) {
        let keep: Vec<String> = self
            .map
            .iter()
            .filter(|(_, c)| codes.contains(c))
            .map(|(n, _)| n.clone())
            .collect();
        self.map.retain(|n, _| keep.contains(n));
        self.tags.retain(|n, _| keep.contains(n));
    }

    /// Codes selected by one key: an exact name, a hierarchical tag query
    /// (`"x/y"` matches any name whose tag set contains both), or the string
    /// form of a bare numeric code.
    pub fn matching_codes(&self, key: &str) -> Result<Vec<i32>> {
        if let Some(code) = self.get(key) {
            return Ok(vec![code]);
        }
        let want = split_tags(key);
        let mut codes: Vec<i32> = self
            .map
            .iter()
            .filter(|(name, _)| want.is_subset(&self.tags[name.as_str()]))
            .map(|(_, &c)| c)
            .collect();
        if codes.is_empty() {
            if let Ok(code) = key.parse::<i32>() {
                if self.contains_code(code) {
                    return Ok(vec![code]);
                }
            }
            bail!(EpoError::validation(format!(
                "event name or code {key:?} not found"
            )));
        }
        codes.sort_unstable();
        Ok(codes)
    }

    /// Union of matches for several keys.
    pub fn matching_codes_any(&self, keys: &[&str]) -> Result<Vec<i32>> {
        let mut codes = Vec::new();
        for key in keys {
            for c in self.matching_codes(key)? {
                if !codes.contains(&c) {
                    codes.push(c);
                }
            }
        }
        Ok(codes)
    }
}

fn split_tags(name: &str) -> BTreeSet<String> {
    name.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Duplicate resolution ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Duplicated samples among used codes are a hard error.
    Error,
    /// Keep the first event at each clashing sample.
    Drop,
    /// Replace the clash with one synthetic event carrying a composite code.
    Merge,
}

pub const DROP_DUPLICATE: &str = "DROP DUPLICATE";
pub const MERGE_DUPLICATE: &str = "MERGE DUPLICATE";

/// Result of resolving same-sample duplicates.
#[derive(Debug)]
pub struct DedupOutcome {
    pub events: Vec<Event>,
    pub event_id: EventId,
    /// Original-event-table indices of the surviving rows.
    pub selection: Vec<usize>,
    /// `(original index, reason)` for every removed row.
    pub dropped: Vec<(usize, &'static str)>,
}

/// Resolve events sharing a sample index.
///
/// `selection[i]` is the original-table index of `events[i]`. Only rows whose
/// code appears in `event_id` participate; duplicates confined to unused
/// codes pass through untouched (the explicit non-failure fast path).
pub fn resolve_duplicates(
    events: &[Event],
    event_id: &EventId,
    policy: DuplicatePolicy,
    selection: &[usize],
) -> Result<DedupOutcome> {
    assert_eq!(events.len(), selection.len());

    // Samples clashing among used codes.
    let mut per_sample: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, ev) in events.iter().enumerate() {
        if event_id.contains_code(ev.code) {
            per_sample.entry(ev.sample).or_default().push(i);
        }
    }
    per_sample.retain(|_, rows| rows.len() > 1);

    if per_sample.is_empty() {
        return Ok(DedupOutcome {
            events: events.to_vec(),
            event_id: event_id.clone(),
            selection: selection.to_vec(),
            dropped: Vec::new(),
        });
    }

    if policy == DuplicatePolicy::Error {
        bail!(EpoError::validation(
            "event time samples were not unique; consider a drop or merge \
             duplicate policy"
        ));
    }

    let mut out_events: Vec<Event> = events.to_vec();
    let mut out_id = event_id.clone();
    let mut remove: Vec<usize> = Vec::new();
    let mut dropped: Vec<(usize, &'static str)> = Vec::new();

    for rows in per_sample.values() {
        let keep = rows[0];
        match policy {
            DuplicatePolicy::Drop => {
                for &i in &rows[1..] {
                    remove.push(i);
                    dropped.push((selection[i], DROP_DUPLICATE));
                }
            }
            DuplicatePolicy::Merge => {
                let mut codes: Vec<i32> = rows.iter().map(|&i| events[i].code).collect();
                codes.sort_unstable();
                codes.dedup();
                if codes.len() > 1 {
                    let priors: Vec<i32> = rows.iter().map(|&i| events[i].prior).collect();
                    let prior = if priors.iter().all(|&p| p == priors[0]) {
                        priors[0]
                    } else {
                        0
                    };
                    let name = composite_name(&codes, event_id);
                    let code = match out_id.get(&name) {
                        Some(code) => code,
                        None => {
                            let code = smallest_unused_code(&out_id, &out_events);
                            out_id.insert(name, code)?;
                            code
                        }
                    };
                    out_events[keep] = Event::new(events[keep].sample, prior, code);
                }
                for &i in &rows[1..] {
                    remove.push(i);
                    dropped.push((selection[i], MERGE_DUPLICATE));
                }
            }
            DuplicatePolicy::Error => unreachable!(),
        }
    }

    remove.sort_unstable();
    let mut final_events = Vec::with_capacity(out_events.len() - remove.len());
    let mut final_selection = Vec::with_capacity(final_events.capacity());
    for (i, ev) in out_events.into_iter().enumerate() {
        if remove.binary_search(&i).is_err() {
            final_events.push(ev);
            final_selection.push(selection[i]);
        }
    }

    let final_codes: Vec<i32> = final_events.iter().map(|e| e.code).collect();
    out_id.retain_codes(&final_codes);

    Ok(DedupOutcome {
        events: final_events,
        event_id: out_id,
        selection: final_selection,
        dropped,
    })
}

/// `/`-joined sorted union of the component names' tags.
fn composite_name(codes: &[i32], event_id: &EventId) -> String {
    let mut tags: BTreeSet<String> = BTreeSet::new();
    for &code in codes {
        if let Some(name) = event_id.name_of(code) {
            tags.extend(split_tags(name));
        }
    }
    tags.into_iter().collect::<Vec<_>>().join("/")
}

/// Smallest positive integer not used by any map entry or event row
/// (both the code and the prior columns count as used).
fn smallest_unused_code(event_id: &EventId, events: &[Event]) -> i32 {
    let mut used: BTreeSet<i32> = event_id.codes().into_iter().collect();
    used.extend(events.iter().map(|e| e.code));
    used.extend(events.iter().map(|e| e.prior));
    (1..).find(|c| !used.contains(c)).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(sample: i64, prior: i32, code: i32) -> Event {
        Event::new(sample, prior, code)
    }

    fn id(pairs: &[(&str, i32)]) -> EventId {
        EventId::new(pairs.iter().map(|(n, c)| (n.to_string(), *c))).unwrap()
    }

    #[test]
    fn hierarchical_matching_is_order_insensitive() {
        let id = id(&[("auditory/left", 1), ("auditory/right", 2), ("visual/left", 3)]);
        assert_eq!(id.matching_codes("left/auditory").unwrap(), vec![1]);
        assert_eq!(id.matching_codes("auditory").unwrap(), vec![1, 2]);
        assert_eq!(id.matching_codes("left").unwrap(), vec![1, 3]);
        assert!(id.matching_codes("tactile").is_err());
    }

    #[test]
    fn numeric_code_keys() {
        let id = id(&[("a", 7)]);
        assert_eq!(id.matching_codes("7").unwrap(), vec![7]);
        assert!(id.matching_codes("8").is_err());
    }

    #[test]
    fn error_policy_raises_on_used_duplicates() {
        let events = vec![ev(10, 0, 1), ev(10, 0, 2)];
        let id = id(&[("a", 1), ("b", 2)]);
        assert!(resolve_duplicates(&events, &id, DuplicatePolicy::Error, &[0, 1]).is_err());
    }

    #[test]
    fn unused_duplicates_pass_through() {
        // Codes 8/9 are not in the map: silent fast path, even for Error.
        let events = vec![ev(10, 0, 8), ev(10, 0, 9), ev(20, 0, 1)];
        let id = id(&[("a", 1)]);
        let out = resolve_duplicates(&events, &id, DuplicatePolicy::Error, &[0, 1, 2]).unwrap();
        assert_eq!(out.events, events);
        assert!(out.dropped.is_empty());
    }

    #[test]
    fn drop_keeps_first_at_each_sample() {
        let events = vec![
            ev(0, 0, 1),
            ev(0, 0, 2),
            ev(3, 0, 2),
            ev(3, 0, 1),
            ev(5, 0, 2),
            ev(5, 0, 1),
            ev(5, 0, 3),
            ev(7, 0, 1),
        ];
        let eid = id(&[("aud", 1), ("vis", 2), ("foo", 3)]);
        let sel: Vec<usize> = (0..events.len()).collect();
        let out = resolve_duplicates(&events, &eid, DuplicatePolicy::Drop, &sel).unwrap();
        assert_eq!(
            out.events,
            vec![ev(0, 0, 1), ev(3, 0, 2), ev(5, 0, 2), ev(7, 0, 1)]
        );
        assert_eq!(out.selection, vec![0, 2, 4, 7]);
        assert!(out.dropped.iter().all(|&(_, r)| r == DROP_DUPLICATE));
        assert_eq!(out.event_id, id(&[("aud", 1), ("vis", 2)]));
    }

    #[test]
    fn merge_allocates_smallest_unused_codes() {
        let events = vec![
            ev(0, 0, 1),
            ev(0, 0, 2),
            ev(3, 0, 2),
            ev(3, 0, 1),
            ev(5, 0, 2),
            ev(5, 0, 1),
            ev(5, 0, 3),
            ev(7, 0, 1),
        ];
        let id = id(&[("aud", 1), ("vis", 2), ("foo", 3)]);
        let sel: Vec<usize> = (0..events.len()).collect();
        let out = resolve_duplicates(&events, &id, DuplicatePolicy::Merge, &sel).unwrap();
        assert_eq!(
            out.events,
            vec![ev(0, 0, 4), ev(3, 0, 4), ev(5, 0, 5), ev(7, 0, 1)]
        );
        assert_eq!(out.event_id.get("aud/vis"), Some(4));
        assert_eq!(out.event_id.get("aud/foo/vis"), Some(5));
        assert_eq!(out.event_id.get("aud"), Some(1));
        assert_eq!(out.event_id.get("vis"), None);
        assert!(out.dropped.iter().all(|&(_, r)| r == MERGE_DUPLICATE));
    }

    #[test]
    fn merge_heterogeneous_prior_falls_back_to_zero() {
        let events = vec![ev(0, 3, 2), ev(0, 4, 1)];
        let id = id(&[("aud", 1), ("vis", 2), ("foo", 3)]);
        let out = resolve_duplicates(&events, &id, DuplicatePolicy::Merge, &[0, 1]).unwrap();
        // 1..4 are taken (map values 1,2,3 and prior 4), so the composite
        // gets 5; the heterogeneous priors collapse to 0.
        assert_eq!(out.events, vec![ev(0, 0, 5)]);
        assert_eq!(out.event_id.get("aud/vis"), Some(5));
        assert_eq!(out.selection, vec![0]);
        assert_eq!(out.dropped, vec![(1, MERGE_DUPLICATE)]);
    }

    #[test]
    fn merge_homogeneous_prior_preserved() {
        let events = vec![ev(0, 99, 1), ev(0, 99, 2), ev(1, 0, 1), ev(2, 0, 2)];
        let id = id(&[("aud", 1), ("vis", 2), ("foo", 3)]);
        let out =
            resolve_duplicates(&events, &id, DuplicatePolicy::Merge, &[1, 3, 4, 7]).unwrap();
        assert_eq!(out.events, vec![ev(0, 99, 4), ev(1, 0, 1), ev(2, 0, 2)]);
        assert_eq!(out.selection, vec![1, 4, 7]);
        assert_eq!(out.dropped, vec![(3, MERGE_DUPLICATE)]);
    }

    #[test]
    fn merge_equal_codes_degenerates_to_drop() {
        let events = vec![ev(0, 0, 1), ev(0, 0, 1)];
        let id = id(&[("aud", 1), ("vis", 2), ("foo", 3)]);
        let out = resolve_duplicates(&events, &id, DuplicatePolicy::Merge, &[3, 5]).unwrap();
        assert_eq!(out.events, vec![ev(0, 0, 1)]);
        assert_eq!(out.selection, vec![3]);
        assert_eq!(out.dropped, vec![(5, MERGE_DUPLICATE)]);
        assert_eq!(out.event_id.codes(), vec![1]);
    }

    #[test]
    fn merge_code_allocation_fills_gaps() {
        for (vals, want) in [((1, 3), 2), ((2, 3), 1), ((1, 2), 3)] {
            let events = vec![ev(0, 0, vals.0), ev(0, 0, vals.1)];
            let id = EventId::new([
                (vals.0.to_string(), vals.0),
                (vals.1.to_string(), vals.1),
            ])
            .unwrap();
            let out = resolve_duplicates(&events, &id, DuplicatePolicy::Merge, &[0, 1]).unwrap();
            assert_eq!(out.events[0].code, want, "vals={vals:?}");
        }
    }
}
