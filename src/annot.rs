//! Temporal annotations.
//!
//! An annotation is an `(onset, duration, description)` interval in absolute
//! recording time. The epoch core consumes two queries: "does this window
//! overlap a bad-tagged annotation, and which description", and a per-window
//! enumeration used when extracting annotations per epoch.
//!
//! "Bad-tagged" means the description starts with `bad` (case-insensitive),
//! e.g. `"BAD_acq_skip"` or `"bad blink"`.

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Onset in seconds, absolute recording time.
    pub onset: f64,
    /// Duration in seconds; zero-duration markers are allowed.
    pub duration: f64,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    entries: Vec<Annotation>,
    /// Absolute time anchor of the onsets (seconds since an external epoch),
    /// carried through serialization untouched.
    pub orig_time: Option<f64>,
}

impl Annotations {
    pub fn new(entries: Vec<Annotation>, orig_time: Option<f64>) -> Self {
        let mut entries = entries;
        entries.sort_by(|a, b| a.onset.total_cmp(&b.onset));
        Annotations { entries, orig_time }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.entries.iter()
    }

    /// First bad-tagged annotation overlapping the inclusive window
    /// `[start, stop]` (seconds, absolute time). Zero-duration annotations
    /// overlap only when they fall strictly inside the window; a shared edge
    /// alone does not count as overlap.
    pub fn first_bad_overlap(&self, start: f64, stop: f64) -> Option<&str> {
        self.entries
            .iter()
            .filter(|a| is_bad(&a.description))
            .find(|a| overlaps(a.onset, a.onset + a.duration, start, stop))
            .map(|a| a.description.as_str())
    }

    /// All annotations overlapping the inclusive window `[start, stop]`.
    pub fn within(&self, start: f64, stop: f64) -> Vec<&Annotation> {
        self.entries
            .iter()
            .filter(|a| overlaps(a.onset, a.onset + a.duration, start, stop))
            .collect()
    }
}

fn is_bad(description: &str) -> bool {
    description.len() >= 3 && description[..3].eq_ignore_ascii_case("bad")
}

fn overlaps(a0: f64, a1: f64, b0: f64, b1: f64) -> bool {
    if a0 == a1 {
        // Zero-duration marker: inside the window, edges excluded.
        a0 > b0 && a0 < b1
    } else {
        a0 < b1 && a1 > b0
    }
}
