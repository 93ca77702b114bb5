//! Core container types, I/O and run configuration.

pub mod header;
pub mod io;
pub mod types;
pub mod validation;
pub mod writer;

pub use header::{GgufHeader, DEFAULT_ALIGNMENT, INTERNAL_KEY_PREFIX, MAGIC_GGUF};
pub use io::read_container;
pub use types::{
    GgmlType, GgufContainer, MetadataArray, MetadataEntry, MetadataValue, MetadataValueType,
    TensorRecord,
};
pub use validation::{analyze_quantization_effect, QuantStats};
pub use writer::GgufBuilder;

use crate::selection::LayerSelection;
use std::path::PathBuf;

/// Report location used when stats exist but no explicit path was given.
pub const DEFAULT_STATS_PATH: &str = "results/layer0/numerical_analysis.json";

#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub target_layers: LayerSelection,
    pub stats_output: Option<PathBuf>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::new(),
            output_path: PathBuf::from("fake_quant.gguf"),
            target_layers: LayerSelection::layers([0]),
            stats_output: None,
        }
    }
}

impl TranscodeConfig {
    /// Where the report goes for a run that produced `stat_count` records.
    pub fn report_path(&self, stat_count: usize) -> Option<PathBuf> {
        match &self.stats_output {
            Some(path) => Some(path.clone()),
            None if stat_count > 0 => Some(PathBuf::from(DEFAULT_STATS_PATH)),
            None => None,
        }
    }
}

#[derive(Debug)]
pub struct TranscodeSummary {
    pub architecture: String,
    pub tensor_count: usize,
    pub metadata_copied: usize,
    pub metadata_skipped: usize,
    /// `(key, reason)` for every field the destination could not represent.
    pub metadata_failures: Vec<(String, String)>,
    pub candidate_tensors: usize,
    pub modified_tensors: usize,
    pub total_time_seconds: f32,
    pub stats: Vec<QuantStats>,
}
