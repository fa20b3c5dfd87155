//! Block-tree construction.
//!
//! The tree is built by scanning all tag headers sequentially and grouping
//! them into blocks delimited by `FIFF_BLOCK_START` / `FIFF_BLOCK_END` tags.
use std::io::{Read, Seek};

use anyhow::Result;

use super::constants::*;
use super::tag::{read_i32, read_tag_header, TagHeader};

// ── Node ─────────────────────────────────────────────────────────────────

/// One node in the block tree.
#[derive(Debug, Default, Clone)]
pub struct Node {
    /// Block kind (e.g. `FIFFB_MEAS`, `FIFFB_EPOCHS`, …). 0 = root.
    pub block: i32,
    /// All non-structural tag headers in this node (not BLOCK_START/END).
    pub entries: Vec<TagHeader>,
    /// Child nodes.
    pub children: Vec<Node>,
}

impl Node {
    /// Recursively find the first node with the given block kind.
    pub fn find_block(&self, kind: i32) -> Option<&Node> {
        if self.block == kind {
            return Some(self);
        }
        for child in &self.children {
            if let Some(found) = child.find_block(kind) {
                return Some(found);
            }
        }
        None
    }

    /// Recursively collect all nodes with the given block kind.
    pub fn find_blocks(&self, kind: i32) -> Vec<&Node> {
        let mut out = Vec::new();
        self.collect_blocks(kind, &mut out);
        out
    }

    fn collect_blocks<'a>(&'a self, kind: i32, out: &mut Vec<&'a Node>) {
        if self.block == kind {
            out.push(self);
        }
        for child in &self.children {
            child.collect_blocks(kind, out);
        }
    }

    /// First tag header with the given kind in this node's own entries.
    /// Does NOT recurse into children.
    pub fn find_tag(&self, kind: i32) -> Option<&TagHeader> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    /// All tag headers with the given kind in this node's own entries, in
    /// file order.
    pub fn find_tags(&self, kind: i32) -> Vec<&TagHeader> {
        self.entries.iter().filter(|e| e.kind == kind).collect()
    }
}

// ── Directory scanner ─────────────────────────────────────────────────────

/// Read every tag header by following the `next` pointer chain from the
/// start of the file.
pub fn scan_directory<R: Read + Seek>(reader: &mut R) -> Result<Vec<TagHeader>> {
    let mut directory = Vec::new();
    let mut pos: Option<u64> = Some(0);
    while let Some(p) = pos {
        let tag = read_tag_header(reader, p)?;
        pos = tag.next_pos();
        directory.push(tag);
    }
    Ok(directory)
}

// ── Tree builder ─────────────────────────────────────────────────────────

/// Walk a flat directory and build the tree, resolving block kinds from the
/// `FIFF_BLOCK_START` payloads.
pub fn read_tree<R: Read + Seek>(reader: &mut R, directory: &[TagHeader]) -> Result<Node> {
    let mut stack: Vec<Node> = vec![Node::default()]; // root
    for &tag in directory {
        match tag.kind {
            FIFF_BLOCK_START => {
                let block = read_i32(reader, &tag).unwrap_or(0);
                stack.push(Node { block, ..Node::default() });
            }
            FIFF_BLOCK_END => {
                let finished = stack.pop().unwrap_or_default();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(finished);
                }
            }
            _ => {
                if let Some(node) = stack.last_mut() {
                    node.entries.push(tag);
                }
            }
        }
    }
    // Anything left unclosed belongs to root.
    while stack.len() > 1 {
        let orphan = stack.pop().unwrap();
        if let Some(parent) = stack.last_mut() {
            parent.children.push(orphan);
        }
    }
    Ok(stack.pop().unwrap_or_default())
}
