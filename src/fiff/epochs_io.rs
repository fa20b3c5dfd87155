//! Epoch-store persistence with size-based file splitting.
//!
//! # Write path
//! Chunks are planned in two passes: the structural overhead of one chunk is
//! measured first by serializing everything except epoch data, then whole
//! epochs are packed per chunk so that no file exceeds the byte budget.
//! Every chunk is fully serialized to memory before any file is created;
//! commit happens last, so a failed save never leaves a truncated or
//! partially overwritten chunk set behind.
//!
//! # Read path
//! Chunk files are followed through the embedded next-file reference inside
//! each chunk; at most one file is open at a time. Event samples are stored
//! as wrapped i32 and restored with a monotonic offset correction (a
//! leftover of the 32-bit sample representation — samples reconstruct
//! correctly as long as the first kept sample and all successive gaps stay
//! below 2³¹).
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::warn;
use ndarray::{s, Array3};

use super::constants::*;
use super::tag::{
    end_block, end_file, expect_kind, put_f64, put_f64_array, put_i32, put_i32_array,
    put_raw, put_string, read_f64, read_f64_array, read_i32, read_i32_array,
    read_raw_bytes, read_string, read_tag_header, start_block, start_file,
};
use super::tree::{read_tree, scan_directory, Node};
use crate::annot::{Annotation, Annotations};
use crate::error::EpoError;
use crate::event::{Event, EventId};
use crate::info::{ChannelInfo, ChannelType, Info};
use crate::meta::MetadataTable;
use crate::proj::Proj;
use crate::select::DropLog;
use crate::store::Epochs;

/// Hard cap on the number of chunk files one store may split into.
const MAX_SPLIT_FILES: usize = 100;

/// Naming convention for split chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitNaming {
    /// `base.ext`, `base-1.ext`, `base-2.ext`, …
    Sequential,
    /// Zero-padded index inserted before the final `_`-separated stem token:
    /// `sub-01_epo.fif` → `sub-01_split-01_epo.fif`. The stem must contain
    /// an underscore.
    Indexed,
}

#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Maximum bytes per chunk file; `None` disables splitting.
    pub split_size: Option<u64>,
    pub naming: SplitNaming,
    /// Replace existing destination files.
    pub overwrite: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            split_size: None,
            naming: SplitNaming::Sequential,
            overwrite: false,
        }
    }
}

// ── Write ─────────────────────────────────────────────────────────────────

/// Write a preloaded store to one or more chunk files.
///
/// Returns the paths written, first chunk first.
pub fn write_epochs(path: &Path, epochs: &Epochs, opts: &SaveOptions) -> Result<Vec<PathBuf>> {
    let data = epochs.data().map_err(|_| {
        EpoError::state("saving needs preloaded epochs; call load() first")
    })?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EpoError::validation(format!("bad destination path {path:?}")))?;
    if !file_name.ends_with("-epo.fif") && !file_name.ends_with("_epo.fif") {
        warn!(
            "filename {file_name:?} does not follow the epochs naming \
             convention (…-epo.fif or …_epo.fif)"
        );
    }
    // Fail early for indexed naming on an underscore-less stem, even when no
    // split ends up happening.
    if opts.naming == SplitNaming::Indexed {
        split_stem(path)?;
    }

    let n_epochs = epochs.len();
    let (_, n_ch, n_times) = data.dim();
    let bytes_per_epoch =
        TAG_HEADER_BYTES + (n_ch * n_times * 8) as u64 + 12 /* event row */;

    // Pass one: measure structural overhead with the longest possible
    // continuation name in place.
    let worst_next = chunk_file_name(path, opts.naming, MAX_SPLIT_FILES, MAX_SPLIT_FILES + 1)?;
    let overhead = serialize_chunk(epochs, &[], Some((worst_next.as_str(), MAX_SPLIT_FILES as i32)))?
        .len() as u64;

    // Pass two: pick split points.
    let (n_chunks, per_chunk) = match opts.split_size {
        None => (1, n_epochs.max(1)),
        Some(budget) => {
            if overhead >= budget || budget - overhead < bytes_per_epoch {
                bail!(EpoError::validation(format!(
                    "split size {budget} is too small to safely split the \
                     data (structural overhead alone is {overhead} bytes)"
                )));
            }
            let per_chunk = ((budget - overhead) / bytes_per_epoch) as usize;
            let n_chunks = n_epochs.div_ceil(per_chunk).max(1);
            if n_chunks > MAX_SPLIT_FILES {
                bail!(EpoError::validation(format!(
                    "splitting would result in writing {n_chunks} files; \
                     use a larger split size"
                )));
            }
            if overhead * 2 > budget {
                warn!(
                    "writing overhead ({overhead} bytes) exceeds half the \
                     split size ({budget} bytes)"
                );
            }
            (n_chunks, per_chunk)
        }
    };

    // Serialize every chunk before touching the filesystem.
    let mut paths = Vec::with_capacity(n_chunks);
    let mut buffers = Vec::with_capacity(n_chunks);
    for k in 0..n_chunks {
        let rows: Vec<usize> = (k * per_chunk..((k + 1) * per_chunk).min(n_epochs)).collect();
        let next = if k + 1 < n_chunks {
            Some((chunk_file_name(path, opts.naming, k + 1, n_chunks)?, (k + 1) as i32))
        } else {
            None
        };
        let buf = serialize_chunk(epochs, &rows, next.as_ref().map(|(n, i)| (n.as_str(), *i)))?;
        if let Some(budget) = opts.split_size {
            if buf.len() as u64 > budget {
                bail!(
                    "chunk {k} came out at {} bytes, over the split size {budget}",
                    buf.len()
                );
            }
        }
        paths.push(path.with_file_name(chunk_file_name(path, opts.naming, k, n_chunks)?));
        buffers.push(buf);
    }

    // Commit: refuse existing destinations up front, then write, cleaning up
    // everything on a mid-sequence failure.
    if !opts.overwrite {
        for p in &paths {
            if p.exists() {
                bail!(EpoError::Exists(p.clone()));
            }
        }
    }
    for (i, (p, buf)) in paths.iter().zip(&buffers).enumerate() {
        if let Err(err) = std::fs::write(p, buf) {
            for written in &paths[..i] {
                let _ = std::fs::remove_file(written);
            }
            return Err(err).with_context(|| format!("write chunk {}", p.display()));
        }
    }
    Ok(paths)
}

/// File name (no directory) of chunk `k` out of `n_total`.
fn chunk_file_name(
    path: &Path,
    naming: SplitNaming,
    k: usize,
    n_total: usize,
) -> Result<String> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| EpoError::validation(format!("bad destination path {path:?}")))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("fif");
    if n_total == 1 {
        return Ok(format!("{stem}.{ext}"));
    }
    match naming {
        SplitNaming::Sequential => Ok(if k == 0 {
            format!("{stem}.{ext}")
        } else {
            format!("{stem}-{k}.{ext}")
        }),
        SplitNaming::Indexed => {
            let (head, tail) = split_stem(path)?;
            Ok(format!("{head}_split-{:02}_{tail}.{ext}", k + 1))
        }
    }
}

/// Split the stem at its last underscore for indexed naming.
fn split_stem(path: &Path) -> Result<(String, String)> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| EpoError::validation(format!("bad destination path {path:?}")))?;
    match stem.rsplit_once('_') {
        Some((head, tail)) if !head.is_empty() && !tail.is_empty() => {
            Ok((head.to_string(), tail.to_string()))
        }
        _ => bail!(EpoError::validation(format!(
            "indexed split naming needs a stem ending in an \
             underscore-separated token, got {stem:?}"
        ))),
    }
}

/// Serialize one chunk: the full bookkeeping plus the given epoch rows.
fn serialize_chunk(
    epochs: &Epochs,
    rows: &[usize],
    next: Option<(&str, i32)>,
) -> Result<Vec<u8>> {
    let data = epochs.data()?;
    let info = &epochs.info;
    let mut buf = Vec::new();

    start_file(&mut buf);
    start_block(&mut buf, FIFFB_MEAS);

    // Measurement info.
    start_block(&mut buf, FIFFB_MEAS_INFO);
    put_i32(&mut buf, FIFF_FIRST_SAMPLE, epochs.recording_first_samp() as i32);
    put_i32(&mut buf, FIFF_NCHAN, info.n_chan() as i32);
    put_f64(&mut buf, FIFF_SFREQ, info.sfreq);
    if let Some(lp) = info.lowpass {
        put_f64(&mut buf, FIFF_LOWPASS, lp);
    }
    if let Some(hp) = info.highpass {
        put_f64(&mut buf, FIFF_HIGHPASS, hp);
    }
    if !info.bads.is_empty() {
        put_string(&mut buf, FIFF_BAD_CHS, &info.bads.join(":"));
    }
    for ch in &info.chs {
        put_raw(&mut buf, FIFF_CH_INFO, FIFFT_CH_INFO_STRUCT, &ch_info_to_bytes(ch));
    }
    if !info.projs.is_empty() {
        start_block(&mut buf, FIFFB_PROJ);
        for proj in &info.projs {
            start_block(&mut buf, FIFFB_PROJ_ITEM);
            put_string(&mut buf, FIFF_NAME, &proj.desc);
            put_i32(&mut buf, FIFF_PROJ_ITEM_KIND, proj.kind);
            put_i32(&mut buf, FIFF_PROJ_ITEM_ACTIVE, proj.active as i32);
            put_i32(&mut buf, FIFF_PROJ_ITEM_NVEC, proj.data.nrows() as i32);
            put_string(&mut buf, FIFF_PROJ_ITEM_CH_NAME_LIST, &proj.ch_names.join(":"));
            let vectors: Vec<f64> = proj.data.iter().copied().collect();
            put_f64_array(&mut buf, FIFF_PROJ_ITEM_VECTORS, &vectors);
            end_block(&mut buf, FIFFB_PROJ_ITEM);
        }
        end_block(&mut buf, FIFFB_PROJ);
    }
    end_block(&mut buf, FIFFB_MEAS_INFO);

    // Epochs block.
    let start = epochs.start_offset();
    let stop = start + ((epochs.n_times() - 1) * epochs.decim()) as i64;
    start_block(&mut buf, FIFFB_EPOCHS);
    put_i32(&mut buf, FIFF_FIRST_SAMPLE, start as i32);
    put_i32(&mut buf, FIFF_LAST_SAMPLE, stop as i32);
    put_i32(&mut buf, FIFF_EPOCHS_DECIM, epochs.decim() as i32);
    put_f64(&mut buf, FIFF_EPOCHS_RAW_SFREQ, epochs.raw_sfreq());
    if let Some((bmin, bmax)) = epochs.baseline() {
        put_f64(&mut buf, FIFF_BASELINE_MIN, bmin);
        put_f64(&mut buf, FIFF_BASELINE_MAX, bmax);
    }
    let id_map: serde_json::Map<String, serde_json::Value> = epochs
        .event_id
        .iter()
        .map(|(n, c)| (n.to_string(), serde_json::json!(c)))
        .collect();
    put_string(&mut buf, FIFF_EVENT_ID_MAP, &serde_json::Value::Object(id_map).to_string());

    // Event rows for this chunk; samples wrap to i32 on purpose.
    let mut event_rows: Vec<i32> = Vec::with_capacity(rows.len() * 3);
    for &row in rows {
        let ev = epochs.events()[row];
        event_rows.push(ev.sample as i32);
        event_rows.push(ev.prior);
        event_rows.push(ev.code);
    }
    put_i32_array(&mut buf, FIFF_EVENT_LIST, &event_rows);

    // Full selection and drop log travel in every chunk.
    let selection: Vec<i32> = epochs.selection().iter().map(|&s| s as i32).collect();
    put_i32_array(&mut buf, FIFF_EPOCHS_SELECTION, &selection);
    put_string(&mut buf, FIFF_EPOCHS_DROP_LOG, &epochs.drop_log().to_json());
    if let Some(meta) = epochs.metadata() {
        put_string(&mut buf, FIFF_EPOCHS_METADATA, &meta.to_json());
    }
    if let Some(annotations) = epochs.annotations() {
        if !annotations.is_empty() {
            let onsets: Vec<f64> = annotations.iter().map(|a| a.onset).collect();
            let durations: Vec<f64> = annotations.iter().map(|a| a.duration).collect();
            let descriptions: Vec<&str> =
                annotations.iter().map(|a| a.description.as_str()).collect();
            start_block(&mut buf, FIFFB_ANNOTATIONS);
            put_f64_array(&mut buf, FIFF_ANNOT_ONSETS, &onsets);
            put_f64_array(&mut buf, FIFF_ANNOT_DURATIONS, &durations);
            put_string(&mut buf, FIFF_ANNOT_DESCRIPTIONS, &descriptions.join("\n"));
            if let Some(t) = annotations.orig_time {
                put_f64(&mut buf, FIFF_ANNOT_ORIG_TIME, t);
            }
            end_block(&mut buf, FIFFB_ANNOTATIONS);
        }
    }
    for &row in rows {
        let plane: Vec<f64> = data.slice(s![row, .., ..]).iter().copied().collect();
        put_f64_array(&mut buf, FIFF_EPOCH, &plane);
    }
    end_block(&mut buf, FIFFB_EPOCHS);

    if let Some((name, num)) = next {
        start_block(&mut buf, FIFFB_REF);
        put_i32(&mut buf, FIFF_REF_ROLE, FIFFV_ROLE_NEXT_FILE);
        put_i32(&mut buf, FIFF_REF_FILE_NUM, num);
        put_string(&mut buf, FIFF_REF_FILE_NAME, name);
        end_block(&mut buf, FIFFB_REF);
    }

    end_block(&mut buf, FIFFB_MEAS);
    end_file(&mut buf);
    Ok(buf)
}

// ── Read ──────────────────────────────────────────────────────────────────

struct Chunk {
    info: Info,
    first_samp: i64,
    start_offset: i64,
    stop_offset: i64,
    decim: usize,
    raw_sfreq: f64,
    baseline: Option<(f64, f64)>,
    event_id: EventId,
    event_rows: Vec<i32>,
    selection: Vec<usize>,
    drop_log: DropLog,
    metadata: Option<MetadataTable>,
    annotations: Option<Annotations>,
    data: Vec<Vec<f64>>,
    next: Option<String>,
}

/// Read a store back, following split continuations.
pub fn read_epochs(path: &Path) -> Result<Epochs> {
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current = path.to_path_buf();
    loop {
        if !chunks.is_empty() && !current.exists() {
            bail!(EpoError::MissingSplit(current));
        }
        let chunk = read_chunk(&current)
            .with_context(|| format!("read epochs chunk {}", current.display()))?;
        let next = chunk.next.clone();
        chunks.push(chunk);
        match next {
            Some(name) => current = current.with_file_name(name),
            None => break,
        }
        if chunks.len() > MAX_SPLIT_FILES {
            bail!("chunk chain exceeds {MAX_SPLIT_FILES} files; refusing to follow");
        }
    }

    let first = &chunks[0];
    let n_ch = first.info.n_chan();
    let n_times = ((first.stop_offset - first.start_offset) / first.decim as i64 + 1) as usize;

    // Stitch events and data across chunks.
    let mut raw_samples: Vec<i32> = Vec::new();
    let mut priors: Vec<i32> = Vec::new();
    let mut codes: Vec<i32> = Vec::new();
    let mut planes: Vec<Vec<f64>> = Vec::new();
    for chunk in &chunks {
        if chunk.event_rows.len() % 3 != 0 {
            bail!("event list length {} is not a multiple of 3", chunk.event_rows.len());
        }
        let n_rows = chunk.event_rows.len() / 3;
        if n_rows != chunk.data.len() {
            bail!(
                "chunk holds {} event rows but {} epoch buffers",
                n_rows,
                chunk.data.len()
            );
        }
        for r in 0..n_rows {
            raw_samples.push(chunk.event_rows[r * 3]);
            priors.push(chunk.event_rows[r * 3 + 1]);
            codes.push(chunk.event_rows[r * 3 + 2]);
        }
        planes.extend(chunk.data.iter().cloned());
    }

    let (samples, corrected) = restore_samples(&raw_samples);
    if corrected {
        warn!(
            "event samples exceeded the 32-bit storage range; applied a \
             monotonic offset correction on read"
        );
    }
    let events: Vec<Event> = samples
        .iter()
        .zip(priors.iter().zip(codes.iter()))
        .map(|(&s, (&p, &c))| Event::new(s, p, c))
        .collect();

    if first.selection.len() != events.len() {
        bail!(
            "selection lists {} rows but chunks hold {} epochs",
            first.selection.len(),
            events.len()
        );
    }
    let mut data = Array3::<f64>::zeros((events.len(), n_ch, n_times));
    for (row, plane) in planes.iter().enumerate() {
        if plane.len() != n_ch * n_times {
            bail!(
                "epoch {row} payload holds {} values, expected {}",
                plane.len(),
                n_ch * n_times
            );
        }
        for c in 0..n_ch {
            for t in 0..n_times {
                data[[row, c, t]] = plane[c * n_times + t];
            }
        }
    }

    let first = chunks.into_iter().next().unwrap();
    let epochs = Epochs::from_parts(
        first.info,
        data,
        events,
        first.event_id,
        first.selection,
        first.drop_log,
        first.raw_sfreq,
        first.first_samp,
        first.start_offset,
        first.decim,
        first.baseline,
        first.metadata,
        first.annotations,
    );
    epochs.drop_log().assert_consistent(epochs.selection())?;
    Ok(epochs)
}

/// Undo i32 wrapping: whenever the running sample sequence would move
/// backwards, raise the offset by 2³² until it is monotonic again.
fn restore_samples(raw: &[i32]) -> (Vec<i64>, bool) {
    let mut out = Vec::with_capacity(raw.len());
    let mut offset: i64 = 0;
    let mut prev = i64::MIN;
    let mut corrected = false;
    for &v in raw {
        let mut candidate = v as i64 + offset;
        while candidate < prev {
            offset += 1i64 << 32;
            candidate = v as i64 + offset;
            corrected = true;
        }
        prev = candidate;
        out.push(candidate);
    }
    (out, corrected)
}

fn read_chunk(path: &Path) -> Result<Chunk> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    // A container file must lead with its id tag; anything else is a
    // wrong-type file, not a corrupt one.
    let id_tag = read_tag_header(&mut reader, 0)?;
    expect_kind(&id_tag, FIFF_FILE_ID, "file-id")?;

    let directory = scan_directory(&mut reader)?;
    let tree = read_tree(&mut reader, &directory)?;

    let meas = tree
        .find_block(FIFFB_MEAS)
        .ok_or_else(|| anyhow::anyhow!("no measurement block in file"))?;
    let info_node = meas
        .find_block(FIFFB_MEAS_INFO)
        .ok_or_else(|| anyhow::anyhow!("no measurement-info block in file"))?;
    let epochs_node = meas
        .find_block(FIFFB_EPOCHS)
        .ok_or_else(|| anyhow::anyhow!("no epochs block in file"))?;

    // Measurement info.
    let mut first_samp: i64 = 0;
    let mut n_chan: Option<usize> = None;
    let mut sfreq: Option<f64> = None;
    let mut lowpass: Option<f64> = None;
    let mut highpass: Option<f64> = None;
    let mut bads: Vec<String> = Vec::new();
    let mut chs: Vec<ChannelInfo> = Vec::new();
    for ent in &info_node.entries {
        match ent.kind {
            FIFF_FIRST_SAMPLE => first_samp = read_i32(&mut reader, ent)? as i64,
            FIFF_NCHAN => n_chan = Some(read_i32(&mut reader, ent)? as usize),
            FIFF_SFREQ => sfreq = Some(read_f64(&mut reader, ent)?),
            FIFF_LOWPASS => lowpass = Some(read_f64(&mut reader, ent)?),
            FIFF_HIGHPASS => highpass = Some(read_f64(&mut reader, ent)?),
            FIFF_BAD_CHS => {
                bads = read_string(&mut reader, ent)?
                    .split(':')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            FIFF_CH_INFO => {
                let raw = read_raw_bytes(&mut reader, ent)?;
                chs.push(ch_info_from_bytes(&raw)?);
            }
            _ => {}
        }
    }
    let n_chan = n_chan.ok_or_else(|| anyhow::anyhow!("channel count tag missing"))?;
    let sfreq = sfreq.ok_or_else(|| anyhow::anyhow!("sampling rate tag missing"))?;
    if chs.len() != n_chan {
        bail!("expected {n_chan} channel structs, got {}", chs.len());
    }
    let mut info = Info::new(sfreq, chs)?;
    info.lowpass = lowpass;
    info.highpass = highpass;
    info.bads = bads;
    if let Some(proj_node) = info_node.find_block(FIFFB_PROJ) {
        for item in proj_node.find_blocks(FIFFB_PROJ_ITEM) {
            info.projs.push(read_proj_item(&mut reader, item)?);
        }
    }

    // Epochs block.
    let mut start_offset: Option<i64> = None;
    let mut stop_offset: Option<i64> = None;
    let mut decim: usize = 1;
    let mut raw_sfreq: Option<f64> = None;
    let mut bmin: Option<f64> = None;
    let mut bmax: Option<f64> = None;
    let mut event_id: Option<EventId> = None;
    let mut event_rows: Vec<i32> = Vec::new();
    let mut selection: Option<Vec<usize>> = None;
    let mut drop_log: Option<DropLog> = None;
    let mut metadata: Option<MetadataTable> = None;
    let mut data: Vec<Vec<f64>> = Vec::new();
    for ent in &epochs_node.entries {
        match ent.kind {
            FIFF_FIRST_SAMPLE => start_offset = Some(read_i32(&mut reader, ent)? as i64),
            FIFF_LAST_SAMPLE => stop_offset = Some(read_i32(&mut reader, ent)? as i64),
            FIFF_EPOCHS_DECIM => decim = read_i32(&mut reader, ent)?.max(1) as usize,
            FIFF_EPOCHS_RAW_SFREQ => raw_sfreq = Some(read_f64(&mut reader, ent)?),
            FIFF_BASELINE_MIN => bmin = Some(read_f64(&mut reader, ent)?),
            FIFF_BASELINE_MAX => bmax = Some(read_f64(&mut reader, ent)?),
            FIFF_EVENT_ID_MAP => {
                let v: serde_json::Map<String, serde_json::Value> =
                    serde_json::from_str(&read_string(&mut reader, ent)?)
                        .context("parse event-id map")?;
                let pairs = v.into_iter().map(|(name, code)| {
                    code.as_i64()
                        .map(|c| (name, c as i32))
                        .ok_or_else(|| anyhow::anyhow!("event-id codes must be integers"))
                });
                event_id = Some(EventId::new(
                    pairs.collect::<Result<Vec<_>>>()?,
                )?);
            }
            FIFF_EVENT_LIST => event_rows = read_i32_array(&mut reader, ent)?,
            FIFF_EPOCHS_SELECTION => {
                selection = Some(
                    read_i32_array(&mut reader, ent)?
                        .into_iter()
                        .map(|v| v as usize)
                        .collect(),
                );
            }
            FIFF_EPOCHS_DROP_LOG => {
                drop_log = Some(DropLog::from_json(&read_string(&mut reader, ent)?)?);
            }
            FIFF_EPOCHS_METADATA => {
                metadata = Some(MetadataTable::from_json(&read_string(&mut reader, ent)?)?);
            }
            FIFF_EPOCH => data.push(read_f64_array(&mut reader, ent)?),
            _ => {}
        }
    }
    let annotations = match epochs_node.find_block(FIFFB_ANNOTATIONS) {
        Some(node) => Some(read_annotations(&mut reader, node)?),
        None => None,
    };

    // Continuation reference.
    let next = match meas.find_block(FIFFB_REF) {
        Some(ref_node) => {
            let role = ref_node
                .find_tag(FIFF_REF_ROLE)
                .map(|t| read_i32(&mut reader, t))
                .transpose()?;
            if role == Some(FIFFV_ROLE_NEXT_FILE) {
                match ref_node.find_tag(FIFF_REF_FILE_NAME) {
                    Some(t) => Some(read_string(&mut reader, t)?),
                    None => bail!("continuation reference has no file name"),
                }
            } else {
                None
            }
        }
        None => None,
    };

    let baseline = match (bmin, bmax) {
        (Some(a), Some(b)) => Some((a, b)),
        (None, None) => None,
        _ => bail!("baseline window is missing one of its bounds"),
    };
    Ok(Chunk {
        info,
        first_samp,
        start_offset: start_offset.ok_or_else(|| anyhow::anyhow!("window start tag missing"))?,
        stop_offset: stop_offset.ok_or_else(|| anyhow::anyhow!("window end tag missing"))?,
        decim,
        raw_sfreq: raw_sfreq.ok_or_else(|| anyhow::anyhow!("raw sampling rate tag missing"))?,
        baseline,
        event_id: event_id.ok_or_else(|| anyhow::anyhow!("event-id map tag missing"))?,
        event_rows,
        selection: selection.ok_or_else(|| anyhow::anyhow!("selection tag missing"))?,
        drop_log: drop_log.ok_or_else(|| anyhow::anyhow!("drop log tag missing"))?,
        metadata,
        annotations,
        data,
        next,
    })
}

fn read_proj_item<R: std::io::Read + std::io::Seek>(
    reader: &mut R,
    node: &Node,
) -> Result<Proj> {
    let desc = match node.find_tag(FIFF_NAME) {
        Some(t) => read_string(reader, t)?,
        None => String::new(),
    };
    let kind = match node.find_tag(FIFF_PROJ_ITEM_KIND) {
        Some(t) => read_i32(reader, t)?,
        None => 1,
    };
    let active = match node.find_tag(FIFF_PROJ_ITEM_ACTIVE) {
        Some(t) => read_i32(reader, t)? != 0,
        None => false,
    };
    let nvec = match node.find_tag(FIFF_PROJ_ITEM_NVEC) {
        Some(t) => read_i32(reader, t)?.max(0) as usize,
        None => bail!("projection item has no vector count"),
    };
    let ch_names: Vec<String> = match node.find_tag(FIFF_PROJ_ITEM_CH_NAME_LIST) {
        Some(t) => read_string(reader, t)?
            .split(':')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => bail!("projection item has no channel names"),
    };
    let vectors = match node.find_tag(FIFF_PROJ_ITEM_VECTORS) {
        Some(t) => read_f64_array(reader, t)?,
        None => bail!("projection item has no vectors"),
    };
    if vectors.len() != nvec * ch_names.len() {
        bail!(
            "projection vectors hold {} values, expected {}",
            vectors.len(),
            nvec * ch_names.len()
        );
    }
    let data = ndarray::Array2::from_shape_vec((nvec, ch_names.len()), vectors)?;
    let mut proj = Proj::new(desc, ch_names, data)?;
    proj.kind = kind;
    proj.active = active;
    Ok(proj)
}

fn read_annotations<R: std::io::Read + std::io::Seek>(
    reader: &mut R,
    node: &Node,
) -> Result<Annotations> {
    let onsets = match node.find_tag(FIFF_ANNOT_ONSETS) {
        Some(t) => read_f64_array(reader, t)?,
        None => Vec::new(),
    };
    let durations = match node.find_tag(FIFF_ANNOT_DURATIONS) {
        Some(t) => read_f64_array(reader, t)?,
        None => Vec::new(),
    };
    let descriptions: Vec<String> = match node.find_tag(FIFF_ANNOT_DESCRIPTIONS) {
        Some(t) => read_string(reader, t)?.split('\n').map(str::to_string).collect(),
        None => Vec::new(),
    };
    if onsets.len() != durations.len() || onsets.len() != descriptions.len() {
        bail!(
            "annotation arrays disagree: {} onsets, {} durations, {} descriptions",
            onsets.len(),
            durations.len(),
            descriptions.len()
        );
    }
    let orig_time = match node.find_tag(FIFF_ANNOT_ORIG_TIME) {
        Some(t) => Some(read_f64(reader, t)?),
        None => None,
    };
    let entries = onsets
        .into_iter()
        .zip(durations.into_iter().zip(descriptions))
        .map(|(onset, (duration, description))| Annotation { onset, duration, description })
        .collect();
    Ok(Annotations::new(entries, orig_time))
}

// ── Channel struct codec ──────────────────────────────────────────────────
//
// On-disk layout (big-endian, 96 bytes):
// ```text
//  4  scanno     i32 (unused, zero)
//  4  logno      i32 (unused, zero)
//  4  kind       i32
//  4  range      f32
//  4  cal        f32
//  4  coil_type  i32 (unused, zero)
// 48  loc        12 × f32
//  4  unit       i32
//  4  unit_mul   i32
// 16  ch_name    null-padded UTF-8
// ```

fn ch_info_to_bytes(ch: &ChannelInfo) -> [u8; 96] {
    let mut raw = [0u8; 96];
    raw[8..12].copy_from_slice(&ch.kind.code().to_be_bytes());
    raw[12..16].copy_from_slice(&(ch.range as f32).to_be_bytes());
    raw[16..20].copy_from_slice(&(ch.cal as f32).to_be_bytes());
    for (i, v) in ch.loc.iter().enumerate() {
        raw[24 + i * 4..28 + i * 4].copy_from_slice(&v.to_be_bytes());
    }
    raw[72..76].copy_from_slice(&ch.unit.to_be_bytes());
    raw[76..80].copy_from_slice(&ch.unit_mul.to_be_bytes());
    let name = ch.name.as_bytes();
    let n = name.len().min(16);
    raw[80..80 + n].copy_from_slice(&name[..n]);
    raw
}

fn ch_info_from_bytes(raw: &[u8]) -> Result<ChannelInfo> {
    if raw.len() < 96 {
        bail!("channel struct too short: {} bytes (need 96)", raw.len());
    }
    let kind_code = i32::from_be_bytes(raw[8..12].try_into().unwrap());
    let range = f32::from_be_bytes(raw[12..16].try_into().unwrap()) as f64;
    let cal = f32::from_be_bytes(raw[16..20].try_into().unwrap()) as f64;
    let mut loc = [0f32; 12];
    for (i, v) in loc.iter_mut().enumerate() {
        *v = f32::from_be_bytes(raw[24 + i * 4..28 + i * 4].try_into().unwrap());
    }
    let unit = i32::from_be_bytes(raw[72..76].try_into().unwrap());
    let unit_mul = i32::from_be_bytes(raw[76..80].try_into().unwrap());
    let name_bytes = &raw[80..96];
    let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(16);
    let name = std::str::from_utf8(&name_bytes[..end])
        .context("channel name is not valid UTF-8")?
        .to_string();
    Ok(ChannelInfo {
        name,
        kind: ChannelType::from_code(kind_code)?,
        cal,
        range,
        loc,
        unit,
        unit_mul,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ch_info_bytes_round_trip() {
        let mut ch = ChannelInfo::basic("Fp1", ChannelType::Eeg);
        ch.cal = 2.0;
        ch.loc[0] = 0.5;
        let back = ch_info_from_bytes(&ch_info_to_bytes(&ch)).unwrap();
        assert_eq!(back.name, "Fp1");
        assert_eq!(back.kind, ChannelType::Eeg);
        approx::assert_abs_diff_eq!(back.cal, 2.0, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(back.loc[0], 0.5_f32, epsilon = 1e-7);
    }

    #[test]
    fn ch_info_too_short() {
        assert!(ch_info_from_bytes(&[0u8; 95]).is_err());
    }

    #[test]
    fn sample_restoration_handles_wrap() {
        // Samples past i32::MAX wrap on write; the reader restores them.
        let originals: Vec<i64> = vec![
            2_000_000_000,
            2_147_483_000,
            2_147_484_000, // past i32::MAX
            3_000_000_000,
            6_000_000_000, // past 2^32, second wrap
        ];
        let wrapped: Vec<i32> = originals.iter().map(|&s| s as i32).collect();
        let (restored, corrected) = restore_samples(&wrapped);
        assert!(corrected);
        assert_eq!(restored, originals);
    }

    #[test]
    fn sample_restoration_noop_in_range() {
        let raw = vec![10, 20, 30];
        let (restored, corrected) = restore_samples(&raw);
        assert!(!corrected);
        assert_eq!(restored, vec![10, 20, 30]);
    }

    #[test]
    fn sequential_chunk_names() {
        let p = Path::new("/tmp/test-epo.fif");
        assert_eq!(chunk_file_name(p, SplitNaming::Sequential, 0, 3).unwrap(), "test-epo.fif");
        assert_eq!(
            chunk_file_name(p, SplitNaming::Sequential, 2, 3).unwrap(),
            "test-epo-2.fif"
        );
        // No splitting: the base name regardless of naming scheme.
        assert_eq!(chunk_file_name(p, SplitNaming::Sequential, 0, 1).unwrap(), "test-epo.fif");
    }

    #[test]
    fn indexed_chunk_names() {
        let p = Path::new("/tmp/sub-01_epo.fif");
        assert_eq!(
            chunk_file_name(p, SplitNaming::Indexed, 0, 3).unwrap(),
            "sub-01_split-01_epo.fif"
        );
        assert_eq!(
            chunk_file_name(p, SplitNaming::Indexed, 1, 3).unwrap(),
            "sub-01_split-02_epo.fif"
        );
        // A stem with several underscores splits at the last one.
        let p = Path::new("/tmp/a_b-epo.fif");
        assert_eq!(
            chunk_file_name(p, SplitNaming::Indexed, 0, 2).unwrap(),
            "a_split-01_b-epo.fif"
        );
    }

    #[test]
    fn indexed_naming_needs_underscore() {
        let p = Path::new("/tmp/test-epo.fif");
        assert!(split_stem(p).is_err());
    }
}
