//! FIFF-style tagged binary container for epoch stores.
//!
//! Layout of one chunk file:
//!
//! ```text
//! FIFF_FILE_ID · FIFF_DIR_POINTER
//! FIFFB_MEAS
//! ├─ FIFFB_MEAS_INFO     channels, rates, bads, projections
//! ├─ FIFFB_EPOCHS        window, events, selection, drop log,
//! │                      metadata, annotations, one FIFF_EPOCH per row
//! └─ FIFFB_REF           next-file pointer (split stores only)
//! FIFF_NOP (terminator)
//! ```

pub mod constants;
pub mod epochs_io;
pub mod tag;
pub mod tree;

pub use epochs_io::{read_epochs, write_epochs, SaveOptions, SplitNaming};
pub use tag::{read_tag_header, TagHeader};
pub use tree::{read_tree, scan_directory, Node};
