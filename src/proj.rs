//! Signal-space projection vectors.
//!
//! A projection item is a set of spatial vectors over named channels; applying
//! it removes the spanned subspace from the data (`P = I − U Uᵀ` with `U`
//! orthonormalized). Projections ride along in the container and can be
//! applied to a preloaded store.
use anyhow::{bail, Result};
use ndarray::{Array1, Array2};

use crate::error::EpoError;

#[derive(Debug, Clone, PartialEq)]
pub struct Proj {
    pub desc: String,
    pub kind: i32,
    pub active: bool,
    /// Channel names the vectors are defined over, in column order of `data`.
    pub ch_names: Vec<String>,
    /// One projection vector per row, `[n_vectors, len(ch_names)]`.
    pub data: Array2<f64>,
}

impl Proj {
    pub fn new(desc: impl Into<String>, ch_names: Vec<String>, data: Array2<f64>) -> Result<Self> {
        if data.ncols() != ch_names.len() {
            bail!(EpoError::validation(format!(
                "projection has {} columns for {} channel names",
                data.ncols(),
                ch_names.len()
            )));
        }
        Ok(Proj { desc: desc.into(), kind: 1, active: false, ch_names, data })
    }
}

/// Build the `[n_ch, n_ch]` projector matrix for the given channel order.
///
/// Inactive items are skipped; vectors are scattered onto the full channel
/// list (zero where a named channel is absent), orthonormalized by modified
/// Gram-Schmidt, and near-zero vectors are discarded.
pub fn make_projector(projs: &[Proj], ch_names: &[&str]) -> Array2<f64> {
    let n_ch = ch_names.len();
    let mut proj = Array2::<f64>::eye(n_ch);

    let mut vecs: Vec<Array1<f64>> = Vec::new();
    for p in projs.iter().filter(|p| p.active) {
        for row in p.data.rows() {
            let mut v = Array1::<f64>::zeros(n_ch);
            for (j, name) in p.ch_names.iter().enumerate() {
                if let Some(idx) = ch_names.iter().position(|c| c == name) {
                    v[idx] = row[j];
                }
            }
            vecs.push(v);
        }
    }
    if vecs.is_empty() {
        return proj;
    }

    // Modified Gram-Schmidt.
    let mut basis: Vec<Array1<f64>> = Vec::new();
    for mut v in vecs {
        for b in &basis {
            let dot = v.dot(b);
            v = v - b.mapv(|x| x * dot);
        }
        let norm = v.dot(&v).sqrt();
        if norm > 1e-10 {
            basis.push(v.mapv(|x| x / norm));
        }
    }

    for b in &basis {
        for i in 0..n_ch {
            for j in 0..n_ch {
                proj[[i, j]] -= b[i] * b[j];
            }
        }
    }
    proj
}
