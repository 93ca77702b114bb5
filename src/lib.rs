//! Selective BF16 fake quantization of GGUF model files.
//!
//! Reads a GGUF container, truncates the FFN-norm weights (and the rotary
//! frequency table) of chosen layers to BF16 precision while keeping F32
//! storage, and writes a new container with everything else unchanged.

pub mod core;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod selection;
pub mod utils;

pub use crate::core::{
    GgmlType, GgufBuilder, GgufContainer, MetadataValue, QuantStats, TensorRecord,
    TranscodeConfig, TranscodeSummary, DEFAULT_STATS_PATH,
};
pub use error::{FakeQuantError, Result};
pub use selection::{LayerSelection, TensorClass, TensorSelector};
pub use utils::{fake_quantize_bf16, fake_quantize_slice};

/// Run the full transcode and persist the stats report.
///
/// The report goes to `config.stats_output` when set (even if empty), else to
/// [`DEFAULT_STATS_PATH`] when at least one tensor was truncated.
pub fn fake_quantize_gguf(config: TranscodeConfig) -> Result<TranscodeSummary> {
    let report_config = config.clone();
    let summary = pipeline::run(config)?;
    if let Some(path) = report_config.report_path(summary.stats.len()) {
        report::save_quantization_stats(&summary.stats, &path)?;
    }
    Ok(summary)
}
