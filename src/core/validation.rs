//! Truncation effect analysis.

use super::types::{GgmlType, TensorRecord};
use crate::error::{FakeQuantError, Result};
use serde::Serialize;

/// Guards the relative difference against zero-valued originals.
pub const REL_EPSILON: f32 = 1e-8;

/// Numeric delta introduced by truncating one tensor.
///
/// Element pairs where either side is NaN or infinite are left out of every
/// difference and range and counted in `non_finite` instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuantStats {
    pub name: String,
    pub max_abs_diff: f64,
    pub mean_abs_diff: f64,
    pub max_rel_diff: f64,
    pub mean_rel_diff: f64,
    pub orig_range: (f32, f32),
    pub fake_range: (f32, f32),
    pub shape: Vec<u64>,
    pub dtype_orig: String,
    pub dtype_fake: String,
    pub non_finite: usize,
}

/// Compare `original` against its truncated counterpart `fake`.
///
/// Both slices must hold exactly one value per element of `tensor`; anything
/// else means the pipeline staged the wrong buffer and is reported as
/// `ShapeMismatch`.
pub fn analyze_quantization_effect(
    tensor: &TensorRecord,
    original: &[f32],
    fake: &[f32],
    fake_dtype: GgmlType,
) -> Result<QuantStats> {
    if original.len() != fake.len() || original.len() as u64 != tensor.n_elements() {
        return Err(FakeQuantError::ShapeMismatch {
            tensor: tensor.name.clone(),
            original: original.len(),
            transformed: fake.len(),
        });
    }

    let mut max_abs = 0f32;
    let mut max_rel = 0f32;
    let mut sum_abs = 0f64;
    let mut sum_rel = 0f64;
    let mut orig_range = Range::default();
    let mut fake_range = Range::default();
    let mut counted = 0usize;
    let mut non_finite = 0usize;
    for (&o, &f) in original.iter().zip(fake) {
        if !o.is_finite() || !f.is_finite() {
            non_finite += 1;
            continue;
        }
        let abs = (o - f).abs();
        let rel = abs / (o.abs() + REL_EPSILON);
        max_abs = max_abs.max(abs);
        max_rel = max_rel.max(rel);
        sum_abs += f64::from(abs);
        sum_rel += f64::from(rel);
        orig_range.include(o);
        fake_range.include(f);
        counted += 1;
    }
    let n = counted.max(1) as f64;

    Ok(QuantStats {
        name: tensor.name.clone(),
        max_abs_diff: f64::from(max_abs),
        mean_abs_diff: sum_abs / n,
        max_rel_diff: f64::from(max_rel),
        mean_rel_diff: sum_rel / n,
        orig_range: orig_range.bounds(),
        fake_range: fake_range.bounds(),
        shape: tensor.shape(),
        dtype_orig: tensor.dtype.to_string(),
        dtype_fake: fake_dtype.to_string(),
        non_finite,
    })
}

#[derive(Debug, Clone, Copy, Default)]
struct Range(Option<(f32, f32)>);

impl Range {
    fn include(&mut self, v: f32) {
        self.0 = Some(match self.0 {
            Some((lo, hi)) => (lo.min(v), hi.max(v)),
            None => (v, v),
        });
    }

    /// `(0, 0)` when nothing finite was seen.
    fn bounds(self) -> (f32, f32) {
        self.0.unwrap_or((0.0, 0.0))
    }
}
