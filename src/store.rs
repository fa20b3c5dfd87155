//! The epoch store: event-aligned segments with a selection/rejection
//! lifecycle, lazy or preloaded data, and the transform operations.
//!
//! Data lives in one of two modes. `Materialized` owns the full
//! `[n_epochs, n_ch, n_times]` buffer and every transform mutates it in
//! place; `Deferred` keeps a handle to the continuous source and re-reads
//! epoch windows (re-applying decimation and baseline) on every access.
//! Once materialized, the epoch count only ever shrinks.
use std::sync::Arc;

use anyhow::{bail, Result};
use log::{debug, warn};
use ndarray::{s, Array2, Array3};

use crate::annot::Annotations;
use crate::clock::SampleClock;
use crate::dsp;
use crate::error::EpoError;
use crate::event::{
    check_chronological, resolve_duplicates, DuplicatePolicy, Event, EventId,
};
use crate::info::Info;
use crate::meta::MetadataTable;
use crate::proj::make_projector;
use crate::reject::{
    is_good, merge_thresholds, validate_thresholds, BoundKind, Thresholds,
};
use crate::select::{
    equalize_counts, validate_equalize_keys, DropLog, EqualizeMethod,
    REASON_EQUALIZED, REASON_IGNORED, REASON_TOO_SHORT, REASON_USER,
};
use crate::source::ContinuousSource;

// ── Options ───────────────────────────────────────────────────────────────

/// Construction parameters. All fields are `pub` for struct-update syntax:
///
/// ```
/// use epo::EpochsOptions;
/// let opts = EpochsOptions {
///     tmin: -0.1,
///     tmax: 0.4,
///     ..EpochsOptions::default()
/// };
/// ```
#[derive(Clone)]
pub struct EpochsOptions {
    /// Window start relative to each event, in seconds.
    pub tmin: f64,
    /// Window end relative to each event, in seconds (inclusive).
    pub tmax: f64,
    /// Baseline window `(bmin, bmax)` or `None` for no correction.
    pub baseline: Option<(f64, f64)>,
    /// Source channel indices to keep; `None` keeps all.
    pub picks: Option<Vec<usize>>,
    /// Peak-to-peak upper bounds / predicates per channel type.
    pub reject: Thresholds,
    /// Peak-to-peak lower bounds per channel type.
    pub flat: Thresholds,
    /// Rejection window start; defaults to `tmin`.
    pub reject_tmin: Option<f64>,
    /// Rejection window end; defaults to `tmax`.
    pub reject_tmax: Option<f64>,
    /// Keep every `decim`-th sample.
    pub decim: usize,
    /// Materialize (and reject) at construction.
    pub preload: bool,
    /// Policy for events sharing a sample index.
    pub event_repeated: DuplicatePolicy,
    /// Drop epochs overlapping bad-tagged annotations.
    pub reject_by_annotation: bool,
    /// Per-epoch metadata, row-aligned with the candidate event table.
    pub metadata: Option<MetadataTable>,
}

impl Default for EpochsOptions {
    fn default() -> Self {
        EpochsOptions {
            tmin: -0.2,
            tmax: 0.5,
            baseline: None,
            picks: None,
            reject: Thresholds::new(),
            flat: Thresholds::new(),
            reject_tmin: None,
            reject_tmax: None,
            decim: 1,
            preload: false,
            event_repeated: DuplicatePolicy::Error,
            reject_by_annotation: true,
            metadata: None,
        }
    }
}

// ── Data modes ────────────────────────────────────────────────────────────

#[derive(Clone)]
enum EpochData {
    /// Owned contiguous `[n_epochs, n_ch, n_times]`.
    Materialized(Array3<f64>),
    /// Windows re-read from the source on each access.
    Deferred(Arc<dyn ContinuousSource>),
}

// ── Epochs ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Epochs {
    pub info: Info,
    pub event_id: EventId,
    /// One event per retained row, aligned with the data.
    events: Vec<Event>,
    /// Original-candidate indices of the retained rows.
    selection: Vec<usize>,
    drop_log: DropLog,
    data: EpochData,
    /// Sampling rate of the underlying raw timeline (pre-decimation).
    raw_sfreq: f64,
    /// First sample of the recording, anchoring annotation time.
    first_samp: i64,
    /// Raw-sample offset of the first sample in the current window,
    /// relative to the anchoring event.
    start_offset: i64,
    /// Overall decimation factor relative to the raw timeline.
    decim: usize,
    /// Number of (decimated) samples per epoch.
    n_times: usize,
    /// Channel indices into the source, for deferred reads.
    source_picks: Vec<usize>,
    baseline: Option<(f64, f64)>,
    baseline_applied: bool,
    baseline_cropped: bool,
    reject_tmin: Option<f64>,
    reject_tmax: Option<f64>,
    reject_by_annotation: bool,
    /// Most recently applied thresholds; later calls may only tighten them.
    last_reject: Thresholds,
    last_flat: Thresholds,
    metadata: Option<MetadataTable>,
    annotations: Option<Annotations>,
}

impl std::fmt::Debug for Epochs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Epochs")
            .field("n_epochs", &self.len())
            .field("n_chan", &self.info.n_chan())
            .field("n_times", &self.n_times)
            .field("sfreq", &self.info.sfreq)
            .field("tmin", &self.tmin())
            .field("baseline", &self.baseline)
            .field("preloaded", &self.is_preloaded())
            .finish()
    }
}

impl Epochs {
    // ── Construction ──────────────────────────────────────────────────

    pub fn new(
        source: Arc<dyn ContinuousSource>,
        events: &[Event],
        event_id: Option<EventId>,
        options: EpochsOptions,
    ) -> Result<Epochs> {
        if events.is_empty() {
            bail!(EpoError::validation("event table is empty"));
        }
        let raw_sfreq = source.info().sfreq;
        let clock = SampleClock::with_first_samp(raw_sfreq, source.first_samp())?;
        let (start_offset, stop_offset) = clock.window(options.tmin, options.tmax)?;
        validate_thresholds(&options.reject, "reject")?;
        validate_thresholds(&options.flat, "flat")?;
        validate_reject_window(
            options.tmin,
            options.tmax,
            options.reject_tmin,
            options.reject_tmax,
        )?;
        if options.decim == 0 {
            bail!(EpoError::validation("decimation factor must be at least 1"));
        }
        if let Some((bmin, bmax)) = options.baseline {
            validate_baseline(bmin, bmax, options.tmin, options.tmax)?;
        }
        if let Some(meta) = &options.metadata {
            meta.check_aligned(events.len())?;
        }

        check_chronological(events);

        // Channel picks.
        let src_info = source.info();
        let source_picks: Vec<usize> = match &options.picks {
            Some(p) => {
                for &ch in p {
                    if ch >= src_info.n_chan() {
                        bail!(EpoError::validation(format!(
                            "channel pick {ch} out of range ({} channels)",
                            src_info.n_chan()
                        )));
                    }
                }
                p.clone()
            }
            None => (0..src_info.n_chan()).collect(),
        };
        let mut info = src_info.clone();
        info.chs = source_picks.iter().map(|&i| src_info.chs[i].clone()).collect();
        info.bads.retain(|b| info.chs.iter().any(|c| &c.name == b));

        let event_id = event_id.unwrap_or_else(|| EventId::from_codes(events));

        // IGNORED pass: candidates whose code is not requested.
        let mut drop_log = DropLog::new(events.len());
        let mut kept_events: Vec<Event> = Vec::new();
        let mut kept_sel: Vec<usize> = Vec::new();
        for (i, ev) in events.iter().enumerate() {
            if event_id.contains_code(ev.code) {
                kept_events.push(*ev);
                kept_sel.push(i);
            } else {
                drop_log.mark(i, [REASON_IGNORED.to_string()]);
            }
        }
        if kept_events.is_empty() {
            bail!(EpoError::validation(
                "no events match the requested event ids"
            ));
        }

        // Duplicate resolution.
        let dedup = resolve_duplicates(
            &kept_events,
            &event_id,
            options.event_repeated,
            &kept_sel,
        )?;
        for (orig_idx, reason) in &dedup.dropped {
            drop_log.mark(*orig_idx, [reason.to_string()]);
        }
        let mut kept_events = dedup.events;
        let mut kept_sel = dedup.selection;
        let event_id = dedup.event_id;

        // Bounds pass: the whole raw window must be inside the recording.
        let (first, last) = (source.first_samp(), source.last_samp());
        let mut i = 0;
        while i < kept_events.len() {
            let ev = kept_events[i];
            if ev.sample + start_offset < first || ev.sample + stop_offset > last {
                drop_log.mark(kept_sel[i], [REASON_TOO_SHORT.to_string()]);
                kept_events.remove(i);
                kept_sel.remove(i);
            } else {
                i += 1;
            }
        }

        let n_raw = (stop_offset - start_offset + 1) as usize;
        let n_times = n_raw.div_ceil(options.decim);
        let metadata = options
            .metadata
            .as_ref()
            .map(|m| m.take_rows(&kept_sel));

        let mut epochs = Epochs {
            info,
            event_id,
            events: kept_events,
            selection: kept_sel,
            drop_log,
            data: EpochData::Deferred(Arc::clone(&source)),
            raw_sfreq,
            first_samp: source.first_samp(),
            start_offset,
            decim: 1,
            n_times: n_raw,
            source_picks,
            baseline: options.baseline,
            baseline_applied: false,
            baseline_cropped: false,
            reject_tmin: options.reject_tmin,
            reject_tmax: options.reject_tmax,
            reject_by_annotation: options.reject_by_annotation,
            last_reject: Thresholds::new(),
            last_flat: Thresholds::new(),
            metadata,
            annotations: source.annotations().cloned(),
        };
        if options.decim > 1 {
            if epochs.is_empty() {
                // Nothing to slice, but the view geometry must still match.
                epochs.decim = options.decim;
                epochs.n_times = n_times;
                epochs.info.sfreq = raw_sfreq / options.decim as f64;
            } else {
                epochs.decimate(options.decim, 0)?;
                debug_assert_eq!(epochs.n_times, n_times);
            }
        }
        if options.preload {
            epochs.load()?;
            epochs.drop_bad(Some(options.reject), Some(options.flat))?;
        } else {
            epochs.last_reject = options.reject;
            epochs.last_flat = options.flat;
        }
        Ok(epochs)
    }

    /// Build a preloaded store directly from an array (no continuous source).
    ///
    /// `selection`, when given, offsets the rows into a longer candidate
    /// table: the drop log covers `max(selection) + 1` candidates and every
    /// unselected index is logged `IGNORED`.
    pub fn from_array(
        info: Info,
        data: Array3<f64>,
        events: Vec<Event>,
        event_id: Option<EventId>,
        tmin: f64,
        selection: Option<Vec<usize>>,
    ) -> Result<Epochs> {
        let (n_epochs, n_ch, n_times) = data.dim();
        if n_ch != info.n_chan() {
            bail!(EpoError::validation(format!(
                "data has {n_ch} channels but info describes {}",
                info.n_chan()
            )));
        }
        if events.len() != n_epochs {
            bail!(EpoError::validation(format!(
                "{} events for {n_epochs} epochs",
                events.len()
            )));
        }
        if n_times == 0 {
            bail!(EpoError::validation("epochs must hold at least one sample"));
        }
        let selection = match selection {
            Some(sel) => {
                if sel.len() != n_epochs {
                    bail!(EpoError::validation(format!(
                        "selection has {} entries for {n_epochs} epochs",
                        sel.len()
                    )));
                }
                sel
            }
            None => (0..n_epochs).collect(),
        };
        let n_candidates = selection.iter().max().map_or(0, |&m| m + 1);
        let mut drop_log = DropLog::new(n_candidates);
        for i in 0..n_candidates {
            if !selection.contains(&i) {
                drop_log.mark(i, [REASON_IGNORED.to_string()]);
            }
        }
        let event_id = event_id.unwrap_or_else(|| EventId::from_codes(&events));
        let clock = SampleClock::new(info.sfreq)?;
        let n_chan = info.n_chan();
        Ok(Epochs {
            raw_sfreq: info.sfreq,
            info,
            event_id,
            events,
            selection,
            drop_log,
            data: EpochData::Materialized(data),
            first_samp: 0,
            start_offset: clock.time_to_sample(tmin),
            decim: 1,
            n_times,
            source_picks: (0..n_chan).collect(),
            baseline: None,
            baseline_applied: false,
            baseline_cropped: false,
            reject_tmin: None,
            reject_tmax: None,
            reject_by_annotation: false,
            last_reject: Thresholds::new(),
            last_flat: Thresholds::new(),
            metadata: None,
            annotations: None,
        })
    }

    /// Used by the container reader to restore a saved store verbatim.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        info: Info,
        data: Array3<f64>,
        events: Vec<Event>,
        event_id: EventId,
        selection: Vec<usize>,
        drop_log: DropLog,
        raw_sfreq: f64,
        first_samp: i64,
        start_offset: i64,
        decim: usize,
        baseline: Option<(f64, f64)>,
        metadata: Option<MetadataTable>,
        annotations: Option<Annotations>,
    ) -> Epochs {
        let n_times = data.dim().2;
        let n_chan = info.n_chan();
        Epochs {
            info,
            event_id,
            events,
            selection,
            drop_log,
            data: EpochData::Materialized(data),
            raw_sfreq,
            first_samp,
            start_offset,
            decim,
            n_times,
            source_picks: (0..n_chan).collect(),
            baseline,
            baseline_applied: baseline.is_some(),
            baseline_cropped: false,
            reject_tmin: None,
            reject_tmax: None,
            reject_by_annotation: false,
            last_reject: Thresholds::new(),
            last_flat: Thresholds::new(),
            metadata,
            annotations,
        }
    }

    // ── Inspection ────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_preloaded(&self) -> bool {
        matches!(self.data, EpochData::Materialized(_))
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn selection(&self) -> &[usize] {
        &self.selection
    }

    pub fn drop_log(&self) -> &DropLog {
        &self.drop_log
    }

    pub fn n_times(&self) -> usize {
        self.n_times
    }

    /// Time vector of the current window, relative to the event.
    pub fn times(&self) -> Vec<f64> {
        (0..self.n_times)
            .map(|k| (self.start_offset + (k * self.decim) as i64) as f64 / self.raw_sfreq)
            .collect()
    }

    pub fn tmin(&self) -> f64 {
        self.start_offset as f64 / self.raw_sfreq
    }

    pub fn tmax(&self) -> f64 {
        (self.start_offset + ((self.n_times - 1) * self.decim) as i64) as f64 / self.raw_sfreq
    }

    pub fn baseline(&self) -> Option<(f64, f64)> {
        self.baseline
    }

    /// The configured baseline window no longer lies inside the time axis.
    pub fn baseline_cropped(&self) -> bool {
        self.baseline_cropped
    }

    pub fn raw_sfreq(&self) -> f64 {
        self.raw_sfreq
    }

    pub fn decim(&self) -> usize {
        self.decim
    }

    pub(crate) fn start_offset(&self) -> i64 {
        self.start_offset
    }

    pub(crate) fn recording_first_samp(&self) -> i64 {
        self.first_samp
    }

    pub fn metadata(&self) -> Option<&MetadataTable> {
        self.metadata.as_ref()
    }

    pub fn annotations(&self) -> Option<&Annotations> {
        self.annotations.as_ref()
    }

    /// Attach (or clear) per-epoch metadata; rows must align with the
    /// current epoch count.
    pub fn set_metadata(&mut self, metadata: Option<MetadataTable>) -> Result<()> {
        if let Some(m) = &metadata {
            m.check_aligned(self.len())?;
        }
        self.metadata = metadata;
        Ok(())
    }

    /// Attach (or clear) recording annotations. Stores built from a
    /// continuous source inherit its annotations automatically.
    pub fn set_annotations(&mut self, annotations: Option<Annotations>) {
        self.annotations = annotations;
    }

    /// Deep, independently owned copy.
    pub fn copy(&self) -> Epochs {
        self.clone()
    }

    // ── Data access ───────────────────────────────────────────────────

    /// Borrow the owned buffer. The view aliases the store's data; only
    /// available once preloaded and never subsets.
    pub fn data(&self) -> Result<&Array3<f64>> {
        match &self.data {
            EpochData::Materialized(d) => Ok(d),
            EpochData::Deferred(_) => bail!(EpoError::state(
                "data() needs preloaded epochs; call load() first"
            )),
        }
    }

    /// Materialize all epochs into one owned contiguous buffer.
    ///
    /// Lazy stores run the pending rejection pipeline first, so the loaded
    /// buffer only holds accepted rows.
    pub fn load(&mut self) -> Result<&mut Epochs> {
        if self.is_preloaded() {
            return Ok(self);
        }
        self.run_rejection()?;
        let source = match &self.data {
            EpochData::Deferred(s) => Arc::clone(s),
            EpochData::Materialized(_) => unreachable!(),
        };
        let mut out = Array3::<f64>::zeros((self.len(), self.info.n_chan(), self.n_times));
        for row in 0..self.len() {
            match self.read_deferred_epoch(&source, row)? {
                Some(ep) => out.slice_mut(s![row, .., ..]).assign(&ep),
                None => bail!(EpoError::state(format!(
                    "epoch {row} window fell outside the recording during load"
                ))),
            }
        }
        self.data = EpochData::Materialized(out);
        if self.baseline.is_some() {
            self.baseline_applied = true;
        }
        Ok(self)
    }

    /// Owned sub-array of the data with optional channel, row, and time
    /// subsetting. Lazy stores run pending rejection (the store stays lazy).
    pub fn get_data(
        &mut self,
        picks: Option<&[usize]>,
        rows: Option<&[usize]>,
        tmin: Option<f64>,
        tmax: Option<f64>,
    ) -> Result<Array3<f64>> {
        if !self.is_preloaded() {
            self.run_rejection()?;
        }
        let row_idx: Vec<usize> = match rows {
            Some(r) => {
                for &row in r {
                    if row >= self.len() {
                        bail!(EpoError::validation(format!(
                            "epoch index {row} out of range ({} epochs)",
                            self.len()
                        )));
                    }
                }
                r.to_vec()
            }
            None => (0..self.len()).collect(),
        };
        let ch_idx: Vec<usize> = match picks {
            Some(p) => {
                for &ch in p {
                    if ch >= self.info.n_chan() {
                        bail!(EpoError::validation(format!(
                            "channel index {ch} out of range ({} channels)",
                            self.info.n_chan()
                        )));
                    }
                }
                p.to_vec()
            }
            None => (0..self.info.n_chan()).collect(),
        };
        let times = self.times();
        let (t0, t1) = time_window_indices(&times, tmin, tmax, self.sample_period())?;

        let mut out = Array3::<f64>::zeros((row_idx.len(), ch_idx.len(), t1 - t0 + 1));
        match &self.data {
            EpochData::Materialized(d) => {
                for (oi, &row) in row_idx.iter().enumerate() {
                    for (oc, &ch) in ch_idx.iter().enumerate() {
                        out.slice_mut(s![oi, oc, ..])
                            .assign(&d.slice(s![row, ch, t0..=t1]));
                    }
                }
            }
            EpochData::Deferred(source) => {
                let source = Arc::clone(source);
                for (oi, &row) in row_idx.iter().enumerate() {
                    let ep = self.read_deferred_epoch(&source, row)?.ok_or_else(|| {
                        EpoError::state(format!("epoch {row} window fell outside the recording"))
                    })?;
                    for (oc, &ch) in ch_idx.iter().enumerate() {
                        out.slice_mut(s![oi, oc, ..])
                            .assign(&ep.slice(s![ch, t0..=t1]));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Like [`Epochs::get_data`], additionally scaling every channel by a
    /// per-type factor (e.g. volts → microvolts with `{Eeg: 1e6}`).
    pub fn get_data_scaled(
        &mut self,
        picks: Option<&[usize]>,
        rows: Option<&[usize]>,
        tmin: Option<f64>,
        tmax: Option<f64>,
        units: &std::collections::BTreeMap<crate::info::ChannelType, f64>,
    ) -> Result<Array3<f64>> {
        let mut out = self.get_data(picks, rows, tmin, tmax)?;
        let ch_idx: Vec<usize> = match picks {
            Some(p) => p.to_vec(),
            None => (0..self.info.n_chan()).collect(),
        };
        for (oc, &ch) in ch_idx.iter().enumerate() {
            if let Some(&factor) = units.get(&self.info.chs[ch].kind) {
                out.slice_mut(s![.., oc, ..]).mapv_inplace(|v| v * factor);
            }
        }
        Ok(out)
    }

    /// Iterate over preloaded epochs as `[n_ch, n_times]` views.
    pub fn iter_epochs(
        &self,
    ) -> Result<impl Iterator<Item = ndarray::ArrayView2<'_, f64>> + '_> {
        let data = self.data()?;
        Ok((0..data.dim().0).map(move |i| data.slice(s![i, .., ..])))
    }

    /// Mean across epochs: `([n_ch, n_times], n_averaged)`.
    pub fn average(&mut self) -> Result<(Array2<f64>, usize)> {
        self.check_not_empty("average")?;
        let data = self.get_data(None, None, None, None)?;
        let n = data.dim().0;
        let mut out = Array2::<f64>::zeros((data.dim().1, data.dim().2));
        for i in 0..n {
            out += &data.slice(s![i, .., ..]);
        }
        out.mapv_inplace(|v| v / n as f64);
        Ok((out, n))
    }

    // ── Transforms ────────────────────────────────────────────────────

    /// Restrict the time axis to `[tmin, tmax]`.
    ///
    /// Bounds completely outside the data are an error; partially outside
    /// bounds clamp with a warning. The configured baseline window is kept
    /// even when its samples are cropped away.
    pub fn crop(&mut self, tmin: f64, tmax: f64, include_tmax: bool) -> Result<&mut Epochs> {
        self.check_not_empty("crop")?;
        if tmin > tmax {
            bail!(EpoError::validation(format!(
                "tmin ({tmin}) must not exceed tmax ({tmax})"
            )));
        }
        let times = self.times();
        let tol = self.sample_period() * 0.5;
        let (cur_min, cur_max) = (times[0], *times.last().unwrap());
        if tmax < cur_min - tol || tmin > cur_max + tol {
            bail!(EpoError::validation(format!(
                "crop window [{tmin}, {tmax}] lies entirely outside the data \
                 [{cur_min}, {cur_max}]"
            )));
        }
        let mut lo = tmin;
        let mut hi = tmax;
        if lo < cur_min - tol {
            warn!("tmin {lo} is outside the data range; clamping to {cur_min}");
            lo = cur_min;
        }
        if hi > cur_max + tol {
            warn!("tmax {hi} is outside the data range; clamping to {cur_max}");
            hi = cur_max;
        }
        let i0 = times.iter().position(|&t| t >= lo - tol).unwrap();
        let i1 = if include_tmax {
            times.iter().rposition(|&t| t <= hi + tol).unwrap()
        } else {
            match times.iter().rposition(|&t| t < hi - tol) {
                Some(i) => i,
                None => bail!(EpoError::validation(
                    "cropping with include_tmax=false would leave no samples"
                )),
            }
        };
        if i1 < i0 {
            bail!(EpoError::validation(
                "crop window does not contain any samples"
            ));
        }

        if let Some((bmin, bmax)) = self.baseline {
            let new_min = times[i0];
            let new_max = times[i1];
            if bmin < new_min - tol || bmax > new_max + tol {
                self.baseline_cropped = true;
            }
        }

        if let EpochData::Materialized(d) = &mut self.data {
            let cropped = d.slice(s![.., .., i0..=i1]).to_owned();
            *d = cropped;
        }
        self.start_offset += (i0 * self.decim) as i64;
        self.n_times = i1 - i0 + 1;
        Ok(self)
    }

    /// Keep every `factor`-th sample starting at `offset`.
    pub fn decimate(&mut self, factor: usize, offset: usize) -> Result<&mut Epochs> {
        self.check_not_empty("decimate")?;
        if factor == 0 {
            bail!(EpoError::validation("decimation factor must be at least 1"));
        }
        if offset >= factor {
            bail!(EpoError::validation(format!(
                "decimation offset ({offset}) must be below the factor ({factor})"
            )));
        }
        if offset >= self.n_times {
            bail!(EpoError::validation(format!(
                "decimation offset ({offset}) exceeds the number of samples \
                 ({})",
                self.n_times
            )));
        }
        let new_sfreq = self.raw_sfreq / (self.decim * factor) as f64;
        match self.info.lowpass {
            None => warn!(
                "decimating without a known lowpass cutoff; the result may \
                 contain aliased frequencies"
            ),
            Some(lp) => {
                if 3.0 * lp > new_sfreq {
                    warn!(
                        "decimation to {new_sfreq} Hz leaves little headroom \
                         above the {lp} Hz lowpass; aliasing is possible"
                    );
                }
            }
        }

        let new_n = (self.n_times - offset).div_ceil(factor);
        if let EpochData::Materialized(d) = &self.data {
            let (n_e, n_c, _) = d.dim();
            let mut out = Array3::<f64>::zeros((n_e, n_c, new_n));
            for k in 0..new_n {
                out.slice_mut(s![.., .., k])
                    .assign(&d.slice(s![.., .., offset + k * factor]));
            }
            self.data = EpochData::Materialized(out);
        }
        self.start_offset += (offset * self.decim) as i64;
        self.decim *= factor;
        self.n_times = new_n;
        self.info.sfreq = self.raw_sfreq / self.decim as f64;
        Ok(self)
    }

    /// Resample preloaded data to `new_sfreq`, re-anchoring the time vector
    /// at the current tmin.
    pub fn resample(&mut self, new_sfreq: f64) -> Result<&mut Epochs> {
        self.check_not_empty("resample")?;
        if !new_sfreq.is_finite() || new_sfreq <= 0.0 {
            bail!(EpoError::validation(format!(
                "target sampling rate must be positive, got {new_sfreq}"
            )));
        }
        let old_sfreq = self.info.sfreq;
        let tmin = self.tmin();
        let d = match &self.data {
            EpochData::Materialized(d) => d,
            EpochData::Deferred(_) => bail!(EpoError::state(
                "resample needs preloaded epochs; call load() first"
            )),
        };
        let (n_e, n_c, n_t) = d.dim();
        let new_n = dsp::resampled_length(n_t, old_sfreq, new_sfreq);
        let mut out = Array3::<f64>::zeros((n_e, n_c, new_n));
        for e in 0..n_e {
            let plane = d.slice(s![e, .., ..]).to_owned();
            let res = dsp::resample(&plane, old_sfreq, new_sfreq)?;
            out.slice_mut(s![e, .., ..]).assign(&res);
        }
        self.data = EpochData::Materialized(out);
        self.raw_sfreq = new_sfreq;
        self.decim = 1;
        self.n_times = new_n;
        self.info.sfreq = new_sfreq;
        self.start_offset = (tmin * new_sfreq).round() as i64;
        Ok(self)
    }

    /// Apply (or, before preload, clear) baseline correction.
    ///
    /// Preloaded data that has been corrected cannot be un-corrected: the
    /// pre-baseline values are gone, so `window = None` is a state error.
    pub fn apply_baseline(&mut self, window: Option<(f64, f64)>) -> Result<&mut Epochs> {
        self.check_not_empty("apply_baseline")?;
        match window {
            None => {
                if self.is_preloaded() && self.baseline_applied {
                    bail!(EpoError::state(
                        "baseline correction cannot be removed once applied \
                         to preloaded data"
                    ));
                }
                self.baseline = None;
                Ok(self)
            }
            Some((bmin, bmax)) => {
                let times = self.times();
                validate_baseline(bmin, bmax, times[0], *times.last().unwrap())?;
                if let EpochData::Materialized(_) = &self.data {
                    let (i0, i1) =
                        baseline_indices(&times, bmin, bmax, self.sample_period())?;
                    let d = self.d_mut();
                    let (n_e, n_c, _) = d.dim();
                    for e in 0..n_e {
                        for c in 0..n_c {
                            let m = d.slice(s![e, c, i0..=i1]).mean().unwrap_or(0.0);
                            d.slice_mut(s![e, c, ..]).mapv_inplace(|v| v - m);
                        }
                    }
                    self.baseline_applied = true;
                }
                self.baseline = Some((bmin, bmax));
                self.baseline_cropped = false;
                Ok(self)
            }
        }
    }

    /// Run the rejection engine, optionally tightening thresholds first, and
    /// physically remove bad rows. Materializes lazy stores.
    pub fn drop_bad(
        &mut self,
        reject: Option<Thresholds>,
        flat: Option<Thresholds>,
    ) -> Result<&mut Epochs> {
        if let Some(reject) = reject {
            validate_thresholds(&reject, "reject")?;
            merge_thresholds(&mut self.last_reject, &reject, BoundKind::Upper)?;
        }
        if let Some(flat) = flat {
            validate_thresholds(&flat, "flat")?;
            merge_thresholds(&mut self.last_flat, &flat, BoundKind::Lower)?;
        }
        self.run_rejection()?;
        if !self.is_preloaded() {
            self.load()?;
        }
        Ok(self)
    }

    /// Drop specific rows with an explicit reason (default `"USER"`).
    pub fn drop(&mut self, rows: &[usize], reason: Option<&str>) -> Result<&mut Epochs> {
        let reason = reason.unwrap_or(REASON_USER);
        let mut sorted: Vec<usize> = rows.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if let Some(&bad) = sorted.iter().find(|&&r| r >= self.len()) {
            bail!(EpoError::validation(format!(
                "epoch index {bad} out of range ({} epochs)",
                self.len()
            )));
        }
        for &row in &sorted {
            self.drop_log.mark(self.selection[row], [reason.to_string()]);
        }
        self.compact(&sorted)?;
        Ok(self)
    }

    /// Equalize the retained counts of two event groups.
    pub fn equalize_event_counts(
        &mut self,
        keys_a: &[&str],
        keys_b: &[&str],
        method: EqualizeMethod,
    ) -> Result<&mut Epochs> {
        self.check_not_empty("equalize_event_counts")?;
        let (codes_a, codes_b) = validate_equalize_keys(&self.event_id, keys_a, keys_b)?;
        let group = |codes: &[i32]| -> Vec<(usize, i64)> {
            self.events
                .iter()
                .enumerate()
                .filter(|(_, e)| codes.contains(&e.code))
                .map(|(i, e)| (i, e.sample))
                .collect()
        };
        let rows_a = group(&codes_a);
        let rows_b = group(&codes_b);
        let dropped = equalize_counts(&rows_a, &rows_b, method);
        for &row in &dropped {
            self.drop_log
                .mark(self.selection[row], [REASON_EQUALIZED.to_string()]);
        }
        self.compact(&dropped)?;
        Ok(self)
    }

    /// Select rows by event name keys (hierarchical `/` tags, numeric-code
    /// strings, or plain names; several keys OR together). Row order is
    /// preserved; deselected rows are logged `IGNORED` in the copy.
    pub fn subset(&self, keys: &[&str]) -> Result<Epochs> {
        let codes = self.event_id.matching_codes_any(keys)?;
        let rows: Vec<usize> = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| codes.contains(&e.code))
            .map(|(i, _)| i)
            .collect();
        self.subset_rows(&rows)
    }

    /// Keep only the given rows (in store order) in a new copy.
    pub fn subset_rows(&self, rows: &[usize]) -> Result<Epochs> {
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.len()) {
            bail!(EpoError::validation(format!(
                "epoch index {bad} out of range ({} epochs)",
                self.len()
            )));
        }
        let mut sorted: Vec<usize> = rows.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut out = self.clone();
        let dropped: Vec<usize> = (0..self.len())
            .filter(|r| sorted.binary_search(r).is_err())
            .collect();
        for &row in &dropped {
            out.drop_log
                .mark(out.selection[row], [REASON_IGNORED.to_string()]);
        }
        out.compact(&dropped)?;
        Ok(out)
    }

    /// Concatenate channels from compatible stores.
    ///
    /// All stores must be preloaded with identical sampling rates, matching
    /// row counts and time vectors, and disjoint channel names; the error
    /// names the first mismatch category.
    pub fn add_channels(&mut self, others: Vec<Epochs>) -> Result<&mut Epochs> {
        let base = match &self.data {
            EpochData::Materialized(d) => d.clone(),
            EpochData::Deferred(_) => bail!(EpoError::state(
                "add_channels needs preloaded epochs; call load() first"
            )),
        };
        let mut planes: Vec<Array3<f64>> = vec![base];
        let mut chs = self.info.chs.clone();
        let times = self.times();
        for other in &others {
            if (other.info.sfreq - self.info.sfreq).abs() > 1e-9 {
                bail!(EpoError::validation(format!(
                    "sampling rate mismatch: {} vs {}",
                    self.info.sfreq, other.info.sfreq
                )));
            }
            let other_times = other.times();
            let aligned = other.len() == self.len()
                && other_times.len() == times.len()
                && times
                    .iter()
                    .zip(&other_times)
                    .all(|(a, b)| (a - b).abs() < 0.5 / self.raw_sfreq);
            if !aligned {
                bail!(EpoError::validation(
                    "time mismatch: epoch counts or time vectors differ"
                ));
            }
            for ch in &other.info.chs {
                if chs.iter().any(|c| c.name == ch.name) {
                    bail!(EpoError::validation(format!(
                        "channel name collision: {:?} exists in both stores",
                        ch.name
                    )));
                }
            }
            let d = match &other.data {
                EpochData::Materialized(d) => d.clone(),
                EpochData::Deferred(_) => bail!(EpoError::state(
                    "add_channels needs preloaded epochs; call load() first"
                )),
            };
            chs.extend(other.info.chs.iter().cloned());
            planes.push(d);
        }
        let n_ch_total: usize = planes.iter().map(|p| p.dim().1).sum();
        let mut out = Array3::<f64>::zeros((self.len(), n_ch_total, self.n_times));
        let mut at = 0;
        for p in &planes {
            let n = p.dim().1;
            out.slice_mut(s![.., at..at + n, ..]).assign(p);
            at += n;
        }
        self.info.chs = chs;
        self.data = EpochData::Materialized(out);
        Ok(self)
    }

    /// Keep only the named channels, in store order.
    pub fn pick_channels(&mut self, names: &[&str]) -> Result<&mut Epochs> {
        let mut keep: Vec<usize> = Vec::new();
        for name in names {
            match self.info.ch_index(name) {
                Some(i) => keep.push(i),
                None => bail!(EpoError::validation(format!(
                    "channel {name:?} not found"
                ))),
            }
        }
        keep.sort_unstable();
        keep.dedup();
        self.apply_channel_subset(&keep);
        Ok(self)
    }

    /// Remove the named channels.
    pub fn drop_channels(&mut self, names: &[&str]) -> Result<&mut Epochs> {
        for name in names {
            if self.info.ch_index(name).is_none() {
                bail!(EpoError::validation(format!("channel {name:?} not found")));
            }
        }
        let keep: Vec<usize> = (0..self.info.n_chan())
            .filter(|&i| !names.contains(&self.info.chs[i].name.as_str()))
            .collect();
        self.apply_channel_subset(&keep);
        Ok(self)
    }

    /// Shift the time axis by `shift` seconds (preload required).
    pub fn shift_time(&mut self, shift: f64) -> Result<&mut Epochs> {
        if !self.is_preloaded() {
            bail!(EpoError::state(
                "shift_time needs preloaded epochs; call load() first"
            ));
        }
        self.start_offset += (shift * self.raw_sfreq).round() as i64;
        Ok(self)
    }

    /// Apply the active projection items to preloaded data.
    pub fn apply_proj(&mut self) -> Result<&mut Epochs> {
        if !self.is_preloaded() {
            bail!(EpoError::state(
                "apply_proj needs preloaded epochs; call load() first"
            ));
        }
        if self.info.projs.iter().all(|p| !p.active) {
            return Ok(self);
        }
        let ch_names = self.info.ch_names();
        let projector = make_projector(&self.info.projs, &ch_names);
        let d = self.d_mut();
        let (n_e, _, _) = d.dim();
        for e in 0..n_e {
            let plane = d.slice(s![e, .., ..]).to_owned();
            d.slice_mut(s![e, .., ..]).assign(&projector.dot(&plane));
        }
        Ok(self)
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn d_mut(&mut self) -> &mut Array3<f64> {
        match &mut self.data {
            EpochData::Materialized(d) => d,
            EpochData::Deferred(_) => unreachable!("caller checked preload"),
        }
    }

    fn sample_period(&self) -> f64 {
        self.decim as f64 / self.raw_sfreq
    }

    fn check_not_empty(&self, op: &str) -> Result<()> {
        if self.is_empty() {
            bail!(EpoError::empty(format!("{op} needs at least one epoch")));
        }
        Ok(())
    }

    fn apply_channel_subset(&mut self, keep: &[usize]) {
        if let EpochData::Materialized(d) = &self.data {
            let (n_e, _, n_t) = d.dim();
            let mut out = Array3::<f64>::zeros((n_e, keep.len(), n_t));
            for (oc, &ch) in keep.iter().enumerate() {
                out.slice_mut(s![.., oc, ..]).assign(&d.slice(s![.., ch, ..]));
            }
            self.data = EpochData::Materialized(out);
        }
        self.source_picks = keep.iter().map(|&i| self.source_picks[i]).collect();
        self.info.chs = keep.iter().map(|&i| self.info.chs[i].clone()).collect();
        let names: Vec<String> = self.info.chs.iter().map(|c| c.name.clone()).collect();
        self.info.bads.retain(|b| names.contains(b));
    }

    /// Read one epoch window from the source, decimated and baseline
    /// corrected. `None` when the window is out of range.
    fn read_deferred_epoch(
        &self,
        source: &Arc<dyn ContinuousSource>,
        row: usize,
    ) -> Result<Option<Array2<f64>>> {
        let ev = self.events[row];
        let start = ev.sample + self.start_offset;
        let stop = start + ((self.n_times - 1) * self.decim) as i64;
        if start < source.first_samp() || stop > source.last_samp() {
            return Ok(None);
        }
        let full = source.read(&self.source_picks, start, stop + 1)?;
        let mut out = Array2::<f64>::zeros((full.nrows(), self.n_times));
        for k in 0..self.n_times {
            out.column_mut(k).assign(&full.column(k * self.decim));
        }
        if let Some((bmin, bmax)) = self.baseline {
            // A cropped-away baseline window cannot be re-applied lazily.
            if !self.baseline_cropped {
                let times = self.times();
                let (i0, i1) = baseline_indices(&times, bmin, bmax, self.sample_period())?;
                for c in 0..out.nrows() {
                    let m = out.slice(s![c, i0..=i1]).mean().unwrap_or(0.0);
                    out.slice_mut(s![c, ..]).mapv_inplace(|v| v - m);
                }
            }
        }
        Ok(Some(out))
    }

    /// Evaluate rejection over all current rows and compact. A no-op
    /// configuration short-circuits without touching anything.
    fn run_rejection(&mut self) -> Result<()> {
        let has_thresholds = !self.last_reject.is_empty() || !self.last_flat.is_empty();
        let check_annot = self.reject_by_annotation
            && self
                .annotations
                .as_ref()
                .map_or(false, |a| !a.is_empty());
        if !has_thresholds && !check_annot {
            debug!("dropping bad epochs is a noop (no criteria configured)");
            return Ok(());
        }
        let times = self.times();
        let tol = self.sample_period() * 0.5;
        let w0 = match self.reject_tmin {
            Some(rt) => times.iter().position(|&t| t >= rt - tol).unwrap_or(0),
            None => 0,
        };
        let w1 = match self.reject_tmax {
            Some(rt) => times
                .iter()
                .rposition(|&t| t <= rt + tol)
                .unwrap_or(times.len() - 1),
            None => times.len() - 1,
        };

        let mut bad_rows: Vec<usize> = Vec::new();
        let mut reasons_per_row: Vec<Vec<String>> = Vec::new();
        let source = match &self.data {
            EpochData::Deferred(s) => Some(Arc::clone(s)),
            EpochData::Materialized(_) => None,
        };
        for row in 0..self.len() {
            let mut reasons: Vec<String> = Vec::new();
            let owned;
            let epoch_view = match (&self.data, &source) {
                (EpochData::Materialized(d), _) => Some(d.slice(s![row, .., ..])),
                (EpochData::Deferred(_), Some(src)) => {
                    match self.read_deferred_epoch(src, row)? {
                        Some(ep) => {
                            owned = ep;
                            Some(owned.view())
                        }
                        None => None,
                    }
                }
                _ => unreachable!(),
            };
            if has_thresholds {
                let (_, mut r) = is_good(
                    epoch_view.as_ref(),
                    &self.info,
                    &self.last_reject,
                    &self.last_flat,
                    Some((w0, w1)),
                )?;
                reasons.append(&mut r);
            }
            if check_annot {
                if let Some(desc) = self.annotation_overlap(row, times[w0], times[w1]) {
                    reasons.push(desc);
                }
            }
            if !reasons.is_empty() {
                bad_rows.push(row);
                reasons_per_row.push(reasons);
            }
        }

        if bad_rows.is_empty() {
            return Ok(());
        }
        let n_before = self.len();
        for (&row, reasons) in bad_rows.iter().zip(reasons_per_row) {
            self.drop_log.mark(self.selection[row], reasons);
        }
        self.compact(&bad_rows)?;
        if self.is_empty() {
            warn!("all {n_before} epochs were dropped by rejection");
        }
        Ok(())
    }

    /// First bad-tagged annotation overlapping the rejection window of the
    /// given row, in recording time.
    fn annotation_overlap(&self, row: usize, win_tmin: f64, win_tmax: f64) -> Option<String> {
        let annotations = self.annotations.as_ref()?;
        let event_t = (self.events[row].sample - self.first_samp) as f64 / self.raw_sfreq;
        annotations
            .first_bad_overlap(event_t + win_tmin, event_t + win_tmax)
            .map(str::to_string)
    }

    /// Remove the given rows (store indices, sorted) from every row-aligned
    /// structure; materialized buffers are rebuilt fresh and contiguous.
    fn compact(&mut self, rows: &[usize]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let keep: Vec<usize> = (0..self.len())
            .filter(|r| rows.binary_search(r).is_err())
            .collect();
        self.events = keep.iter().map(|&r| self.events[r]).collect();
        self.selection = keep.iter().map(|&r| self.selection[r]).collect();
        if let Some(meta) = &self.metadata {
            self.metadata = Some(meta.take_rows(&keep));
        }
        if let EpochData::Materialized(d) = &self.data {
            let (_, n_c, n_t) = d.dim();
            let mut out = Array3::<f64>::zeros((keep.len(), n_c, n_t));
            for (oi, &r) in keep.iter().enumerate() {
                out.slice_mut(s![oi, .., ..]).assign(&d.slice(s![r, .., ..]));
            }
            self.data = EpochData::Materialized(out);
        }
        self.drop_log.assert_consistent(&self.selection)?;
        Ok(())
    }
}

// ── Free helpers ──────────────────────────────────────────────────────────

fn validate_baseline(bmin: f64, bmax: f64, tmin: f64, tmax: f64) -> Result<()> {
    if bmin > bmax {
        bail!(EpoError::validation(format!(
            "baseline start ({bmin}) must not exceed baseline end ({bmax})"
        )));
    }
    if bmin < tmin - 1e-9 || bmax > tmax + 1e-9 {
        bail!(EpoError::validation(format!(
            "baseline window [{bmin}, {bmax}] outside the epoch window \
             [{tmin}, {tmax}]"
        )));
    }
    Ok(())
}

fn validate_reject_window(
    tmin: f64,
    tmax: f64,
    reject_tmin: Option<f64>,
    reject_tmax: Option<f64>,
) -> Result<()> {
    if let Some(rt) = reject_tmin {
        if rt < tmin - 1e-9 {
            bail!(EpoError::validation(format!(
                "reject_tmin ({rt}) must be at or after tmin ({tmin})"
            )));
        }
    }
    if let Some(rt) = reject_tmax {
        if rt > tmax + 1e-9 {
            bail!(EpoError::validation(format!(
                "reject_tmax ({rt}) must be at or before tmax ({tmax})"
            )));
        }
    }
    if let (Some(a), Some(b)) = (reject_tmin, reject_tmax) {
        if a >= b {
            bail!(EpoError::validation(format!(
                "reject_tmin ({a}) must be before reject_tmax ({b})"
            )));
        }
    }
    Ok(())
}

/// Inclusive sample range of a baseline window; at least one sample must
/// fall inside it.
fn baseline_indices(times: &[f64], bmin: f64, bmax: f64, period: f64) -> Result<(usize, usize)> {
    let tol = period * 0.5;
    let i0 = times.iter().position(|&t| t >= bmin - tol);
    let i1 = times.iter().rposition(|&t| t <= bmax + tol);
    match (i0, i1) {
        (Some(i0), Some(i1)) if i0 <= i1 => Ok((i0, i1)),
        _ => bail!(EpoError::validation(format!(
            "baseline window [{bmin}, {bmax}] contains no samples"
        ))),
    }
}

/// Inclusive index range selected by optional time bounds.
fn time_window_indices(
    times: &[f64],
    tmin: Option<f64>,
    tmax: Option<f64>,
    period: f64,
) -> Result<(usize, usize)> {
    let tol = period * 0.5;
    let t0 = match tmin {
        Some(t) => times.iter().position(|&x| x >= t - tol),
        None => Some(0),
    };
    let t1 = match tmax {
        Some(t) => times.iter().rposition(|&x| x <= t + tol),
        None => Some(times.len() - 1),
    };
    match (t0, t1) {
        (Some(a), Some(b)) if a <= b => Ok((a, b)),
        _ => bail!(EpoError::validation(
            "requested time window contains no samples"
        )),
    }
}
