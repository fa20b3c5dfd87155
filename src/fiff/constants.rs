//! Container format constants.
//!
//! The epochs container is a FIFF-style tagged binary format: every piece of
//! data is wrapped in a **tag** — a 16-byte big-endian header (`kind`,
//! `type`, `size`, `next`) followed by a payload. Tags are grouped into
//! **blocks** by `FIFF_BLOCK_START` / `FIFF_BLOCK_END` sentinel tags,
//! forming a tree.

#![allow(dead_code)]

// ── Block kinds ───────────────────────────────────────────────────────────
//
// A block is opened by a FIFF_BLOCK_START tag whose i32 payload is the block
// kind, and closed by a matching FIFF_BLOCK_END tag.

/// Measurement block — top-level container for one recording.
pub const FIFFB_MEAS:        i32 = 100;
/// Measurement-info block — channel metadata, sfreq, bad channels, etc.
pub const FIFFB_MEAS_INFO:   i32 = 101;
/// Multi-file reference block (points at the next split chunk).
pub const FIFFB_REF:         i32 = 106;
/// Projection block.
pub const FIFFB_PROJ:        i32 = 313;
/// One projection item block.
pub const FIFFB_PROJ_ITEM:   i32 = 314;
/// Epochs block: window geometry, bookkeeping, and per-epoch data.
pub const FIFFB_EPOCHS:      i32 = 373;
/// Annotations block.
pub const FIFFB_ANNOTATIONS: i32 = 600;

// ── Tag kinds — structural ─────────────────────────────────────────────────

/// Unique file identifier (first tag in every container file).
pub const FIFF_FILE_ID:      i32 = 100;
/// Pointer to an embedded tag directory. Always written with payload `-1`;
/// readers fall back to a sequential scan.
pub const FIFF_DIR_POINTER:  i32 = 101;
/// Opens a new block; payload = block kind (i32).
pub const FIFF_BLOCK_START:  i32 = 104;
/// Closes the most recently opened block.
pub const FIFF_BLOCK_END:    i32 = 105;
/// File terminator (void payload, `next == -1`).
pub const FIFF_NOP:          i32 = 108;

// ── Tag kinds — measurement info ──────────────────────────────────────────

/// Number of channels (i32).
pub const FIFF_NCHAN:        i32 = 200;
/// Current sampling frequency in Hz (f64).
pub const FIFF_SFREQ:        i32 = 201;
/// Channel info struct, one per channel (96-byte struct).
pub const FIFF_CH_INFO:      i32 = 203;
/// Free-text name / description (string).
pub const FIFF_NAME:         i32 = 233;
/// First sample index: the recording's first sample inside `FIFFB_MEAS_INFO`,
/// the window start offset inside `FIFFB_EPOCHS` (i32).
pub const FIFF_FIRST_SAMPLE: i32 = 208;
/// Last sample / window end offset (i32).
pub const FIFF_LAST_SAMPLE:  i32 = 209;
/// Acquisition lowpass cutoff in Hz (f64); absent when unknown.
pub const FIFF_LOWPASS:      i32 = 219;
/// Colon-separated list of bad channel names (string).
pub const FIFF_BAD_CHS:      i32 = 220;
/// Acquisition highpass cutoff in Hz (f64); absent when unknown.
pub const FIFF_HIGHPASS:     i32 = 223;

// ── Tag kinds — projection items ──────────────────────────────────────────

/// Projection item kind (i32).
pub const FIFF_PROJ_ITEM_KIND:         i32 = 3411;
/// Number of projection vectors (i32).
pub const FIFF_PROJ_ITEM_NVEC:         i32 = 3414;
/// Projection vectors, row-major `[nvec, n_named]` (f64 array).
pub const FIFF_PROJ_ITEM_VECTORS:      i32 = 3415;
/// Colon-separated channel names the vectors are defined over (string).
pub const FIFF_PROJ_ITEM_CH_NAME_LIST: i32 = 3417;
/// Whether the item is active (i32, 0/1).
pub const FIFF_PROJ_ITEM_ACTIVE:       i32 = 3562;

// ── Tag kinds — epochs bookkeeping ────────────────────────────────────────

/// One epoch's samples, `[n_ch, n_times]` row-major (f64 array).
pub const FIFF_EPOCH:             i32 = 302;
/// Baseline window start in seconds (f64); absent when baseline is None.
pub const FIFF_BASELINE_MIN:      i32 = 304;
/// Baseline window end in seconds (f64).
pub const FIFF_BASELINE_MAX:      i32 = 305;
/// Event rows for this chunk, 3 × i32 per row `[sample, prior, code]`.
/// Samples are stored wrapped to i32; see the reader's overflow correction.
pub const FIFF_EVENT_LIST:        i32 = 3561;
/// Event name → code map (JSON object string).
pub const FIFF_EVENT_ID_MAP:      i32 = 3565;
/// Full selection: original candidate index per retained row (i32 array).
pub const FIFF_EPOCHS_SELECTION:  i32 = 3800;
/// Full drop log (JSON string).
pub const FIFF_EPOCHS_DROP_LOG:   i32 = 3801;
/// Raw (pre-decimation) sampling frequency in Hz (f64).
pub const FIFF_EPOCHS_RAW_SFREQ:  i32 = 3804;
/// Overall decimation factor relative to the raw timeline (i32).
pub const FIFF_EPOCHS_DECIM:      i32 = 3805;
/// Per-epoch metadata table (JSON string).
pub const FIFF_EPOCHS_METADATA:   i32 = 3810;

// ── Tag kinds — annotations ───────────────────────────────────────────────

/// Annotation onsets in seconds (f64 array).
pub const FIFF_ANNOT_ONSETS:       i32 = 3601;
/// Annotation durations in seconds (f64 array).
pub const FIFF_ANNOT_DURATIONS:    i32 = 3602;
/// Newline-separated annotation descriptions (string).
pub const FIFF_ANNOT_DESCRIPTIONS: i32 = 3603;
/// Absolute time anchor (f64); absent when unset.
pub const FIFF_ANNOT_ORIG_TIME:    i32 = 3604;

// ── Tag kinds — multi-file references ─────────────────────────────────────

/// Role of a referenced file (i32).
pub const FIFF_REF_ROLE:        i32 = 115;
/// Sequence number of a referenced file (i32).
pub const FIFF_REF_FILE_NUM:    i32 = 117;
/// Name of a referenced file (string, no directory components).
pub const FIFF_REF_FILE_NAME:   i32 = 118;
/// `FIFF_REF_ROLE` value indicating the next file in a split store.
pub const FIFFV_ROLE_NEXT_FILE: i32 = 2;

// ── Tag payload types (the `type` field of a tag header) ──────────────────

/// Void / no payload.
pub const FIFFT_VOID:             u32 = 0;
/// Big-endian signed 32-bit integer.
pub const FIFFT_INT:              u32 = 3;
/// Big-endian IEEE 754 single-precision float (4 bytes).
pub const FIFFT_FLOAT:            u32 = 4;
/// Big-endian IEEE 754 double-precision float (8 bytes).
pub const FIFFT_DOUBLE:           u32 = 5;
/// UTF-8 string, not NUL-terminated.
pub const FIFFT_STRING:           u32 = 10;
/// 96-byte channel info struct.
pub const FIFFT_CH_INFO_STRUCT:   u32 = 30;
/// File-ID struct (20 bytes).
pub const FIFFT_ID_STRUCT:        u32 = 31;

// ── `next` field sentinels in a tag header ────────────────────────────────

/// The next tag follows immediately: `next_pos = pos + 16 + size`.
pub const FIFFV_NEXT_SEQ:  i32 = 0;
/// There is no next tag (end of file).
pub const FIFFV_NEXT_NONE: i32 = -1;

/// Fixed per-tag framing cost in bytes.
pub const TAG_HEADER_BYTES: u64 = 16;
