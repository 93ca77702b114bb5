//! Layer selection parsing and per-tensor classification.

use crate::error::{FakeQuantError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Substring marking an FFN-normalization weight.
pub const FFN_NORM_MARKER: &str = ".ffn_norm.weight";
/// Rotary frequency table; treated as belonging to layer 0.
pub const ROPE_FREQS_NAME: &str = "rope_freqs.weight";
pub const BLOCK_PREFIX: &str = "blk";

static BLOCK_LAYER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^{}\.(\d+)(?:\.|$)", regex::escape(BLOCK_PREFIX))).expect("static regex")
});

/// Target layer set for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSelection {
    All,
    Layers(BTreeSet<u64>),
}

impl LayerSelection {
    pub fn layers(layers: impl IntoIterator<Item = u64>) -> Self {
        LayerSelection::Layers(layers.into_iter().collect())
    }

    pub fn contains(&self, layer: u64) -> bool {
        match self {
            LayerSelection::All => true,
            LayerSelection::Layers(set) => set.contains(&layer),
        }
    }
}

impl FromStr for LayerSelection {
    type Err = FakeQuantError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: String| FakeQuantError::InvalidSelectionSyntax {
            input: s.to_string(),
            reason,
        };

        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(LayerSelection::All);
        }
        if trimmed.is_empty() {
            return Err(invalid("empty selection".into()));
        }

        let mut set = BTreeSet::new();
        for (i, token) in trimmed.split(',').enumerate() {
            let token = token.trim();
            if token.is_empty() {
                return Err(invalid(format!("empty entry at position {}", i + 1)));
            }
            if !token.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid(format!("'{token}' is not a non-negative integer")));
            }
            let layer = token
                .parse::<u64>()
                .map_err(|_| invalid(format!("layer '{token}' is out of range")))?;
            set.insert(layer);
        }
        Ok(LayerSelection::Layers(set))
    }
}

impl fmt::Display for LayerSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerSelection::All => write!(f, "all"),
            LayerSelection::Layers(set) => {
                let parts: Vec<String> = set.iter().map(u64::to_string).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorClass {
    NotCandidate,
    CandidateExcluded { layer: u64 },
    CandidateIncluded { layer: u64 },
}

impl TensorClass {
    pub fn is_candidate(self) -> bool {
        !matches!(self, TensorClass::NotCandidate)
    }

    pub fn is_included(self) -> bool {
        matches!(self, TensorClass::CandidateIncluded { .. })
    }
}

/// Layer index for `blk.<N>.*` names. Indices past `u64::MAX` yield `None`.
pub fn block_layer(name: &str) -> Option<u64> {
    let caps = BLOCK_LAYER_RE.captures(name)?;
    caps[1].parse().ok()
}

/// Decides which tensors are truncated.
#[derive(Debug, Clone)]
pub struct TensorSelector {
    targets: LayerSelection,
}

impl TensorSelector {
    pub fn new(targets: LayerSelection) -> Self {
        Self { targets }
    }

    pub fn targets(&self) -> &LayerSelection {
        &self.targets
    }

    pub fn classify(&self, name: &str) -> TensorClass {
        let layer = if name == ROPE_FREQS_NAME {
            0
        } else if name.contains(FFN_NORM_MARKER) {
            match block_layer(name) {
                Some(layer) => layer,
                None => return TensorClass::NotCandidate,
            }
        } else {
            return TensorClass::NotCandidate;
        };

        if self.targets.contains(layer) {
            TensorClass::CandidateIncluded { layer }
        } else {
            TensorClass::CandidateExcluded { layer }
        }
    }
}
