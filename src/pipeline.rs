//! Transcode pipeline: open, copy metadata, process tensors, write, close.
//!
//! Each stage is a distinct `Transcoder<S>` state, so the stages can only be
//! driven in order and nothing is written until every tensor is staged.

use crate::core::header::INTERNAL_KEY_PREFIX;
use crate::core::io::read_container;
use crate::core::types::{GgmlType, GgufContainer, TensorRecord};
use crate::core::validation::{analyze_quantization_effect, QuantStats};
use crate::core::writer::GgufBuilder;
use crate::core::{TranscodeConfig, TranscodeSummary};
use crate::error::{FakeQuantError, Result};
use crate::selection::{TensorClass, TensorSelector};
use crate::utils::{f32_to_bytes, fake_quantize_slice, tensor_to_f32};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Declared element type of every truncated tensor.
pub const FAKE_QUANT_STORAGE: GgmlType = GgmlType::F32;

#[derive(Debug, Default)]
struct MetadataOutcome {
    copied: usize,
    skipped: usize,
    failures: Vec<(String, String)>,
}

#[derive(Debug)]
struct RunContext {
    config: TranscodeConfig,
    selector: TensorSelector,
    started: Instant,
    architecture: String,
    tensor_count: usize,
    metadata: MetadataOutcome,
}

#[derive(Debug)]
pub struct Opened {
    source: GgufContainer,
}

#[derive(Debug)]
pub struct MetadataCopied {
    source: GgufContainer,
    builder: GgufBuilder,
}

#[derive(Debug)]
pub struct TensorsProcessed {
    builder: GgufBuilder,
    tally: TensorTally,
}

#[derive(Debug)]
pub struct Written {
    tally: TensorTally,
}

#[derive(Debug, Default)]
struct TensorTally {
    candidates: usize,
    modified: usize,
    stats: Vec<QuantStats>,
}

#[derive(Debug)]
pub struct Transcoder<S> {
    ctx: RunContext,
    state: S,
}

impl Transcoder<Opened> {
    /// Read the source container fully into memory.
    pub fn open(config: TranscodeConfig) -> Result<Self> {
        let started = Instant::now();
        info!("reading GGUF file: {}", config.input_path.display());
        let source = read_container(&config.input_path)?;
        if source.tensors.is_empty() {
            return Err(FakeQuantError::EmptyContainer {
                path: config.input_path.clone(),
            });
        }

        let architecture = source.architecture().to_string();
        info!("architecture: {architecture}");
        info!("tensors: {}", source.tensors.len());
        info!("target layers: {}", config.target_layers);

        Ok(Self {
            ctx: RunContext {
                selector: TensorSelector::new(config.target_layers.clone()),
                config,
                started,
                architecture,
                tensor_count: source.tensors.len(),
                metadata: MetadataOutcome::default(),
            },
            state: Opened { source },
        })
    }

    /// Copy every non-internal metadata field. Fields the destination cannot
    /// represent are skipped and recorded, never coerced.
    pub fn copy_metadata(mut self) -> Transcoder<MetadataCopied> {
        let source = self.state.source;
        let mut builder = GgufBuilder::new(source.version);
        let outcome = &mut self.ctx.metadata;

        for entry in &source.metadata {
            if entry.key.starts_with(INTERNAL_KEY_PREFIX) {
                debug!("skipping internal field {}", entry.key);
                outcome.skipped += 1;
                continue;
            }
            match builder.add_metadata(&entry.key, &entry.value) {
                Ok(()) => outcome.copied += 1,
                Err(FakeQuantError::MetadataCopyFailure { key, reason }) => {
                    warn!("skipping field {key}: {reason}");
                    outcome.failures.push((key, reason));
                }
                Err(other) => {
                    warn!("skipping field {}: {other}", entry.key);
                    outcome.failures.push((entry.key.clone(), other.to_string()));
                }
            }
        }
        info!(
            "copied {} metadata fields ({} internal skipped, {} failed)",
            outcome.copied,
            outcome.skipped,
            outcome.failures.len()
        );

        Transcoder {
            ctx: self.ctx,
            state: MetadataCopied { source, builder },
        }
    }
}

impl Transcoder<MetadataCopied> {
    /// Stage every tensor in source order, truncating the selected ones.
    pub fn process_tensors(self) -> Result<Transcoder<TensorsProcessed>> {
        let MetadataCopied {
            source,
            mut builder,
        } = self.state;
        let selector = &self.ctx.selector;
        let mut tally = TensorTally::default();

        info!("processing tensors...");
        for tensor in source.tensors {
            let class = selector.classify(&tensor.name);
            if class.is_candidate() {
                tally.candidates += 1;
            }
            match class {
                TensorClass::CandidateIncluded { layer } => {
                    let (staged, stats) = fake_quantize_tensor(&tensor, layer)?;
                    builder.add_tensor(staged)?;
                    tally.stats.push(stats);
                    tally.modified += 1;
                }
                TensorClass::CandidateExcluded { layer } => {
                    debug!("{} (layer {layer}) not in target layers, copied", tensor.name);
                    builder.add_tensor(tensor)?;
                }
                TensorClass::NotCandidate => builder.add_tensor(tensor)?,
            }
        }

        Ok(Transcoder {
            ctx: self.ctx,
            state: TensorsProcessed { builder, tally },
        })
    }
}

fn fake_quantize_tensor(tensor: &TensorRecord, layer: u64) -> Result<(TensorRecord, QuantStats)> {
    info!(
        "fake-quantizing {} (layer {layer}): {} -> BF16 truncated",
        tensor.name, tensor.dtype
    );
    let original = tensor_to_f32(tensor)?;
    let fake = fake_quantize_slice(&original);
    let stats = analyze_quantization_effect(tensor, &original, &fake, FAKE_QUANT_STORAGE)?;

    info!("  max abs diff:  {:.2e}", stats.max_abs_diff);
    info!("  mean abs diff: {:.2e}", stats.mean_abs_diff);
    info!("  max rel diff:  {:.2}%", stats.max_rel_diff * 100.0);
    info!("  mean rel diff: {:.2}%", stats.mean_rel_diff * 100.0);
    if stats.non_finite > 0 {
        warn!("  {} NaN/inf elements excluded from statistics", stats.non_finite);
    }

    let staged = TensorRecord {
        name: tensor.name.clone(),
        dtype: FAKE_QUANT_STORAGE,
        dims: tensor.dims.clone(),
        data: f32_to_bytes(&fake),
    };
    Ok((staged, stats))
}

impl Transcoder<TensorsProcessed> {
    /// Emit the destination container atomically.
    pub fn write(self) -> Result<Transcoder<Written>> {
        let path = &self.ctx.config.output_path;
        info!("writing GGUF file: {}", path.display());
        self.state.builder.write_to_path(path)?;
        Ok(Transcoder {
            ctx: self.ctx,
            state: Written {
                tally: self.state.tally,
            },
        })
    }
}

impl Transcoder<Written> {
    pub fn close(self) -> TranscodeSummary {
        let Written { tally } = self.state;
        let ctx = self.ctx;
        info!(
            "done: modified {}/{} FFN norm tensors",
            tally.modified, tally.candidates
        );
        TranscodeSummary {
            architecture: ctx.architecture,
            tensor_count: ctx.tensor_count,
            metadata_copied: ctx.metadata.copied,
            metadata_skipped: ctx.metadata.skipped,
            metadata_failures: ctx.metadata.failures,
            candidate_tensors: tally.candidates,
            modified_tensors: tally.modified,
            total_time_seconds: ctx.started.elapsed().as_secs_f32(),
            stats: tally.stats,
        }
    }
}

/// Drive every stage in order.
pub fn run(config: TranscodeConfig) -> Result<TranscodeSummary> {
    Ok(Transcoder::open(config)?
        .copy_metadata()
        .process_tensors()?
        .write()?
        .close())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MetadataArray, MetadataEntry, MetadataValue, MetadataValueType};
    use crate::selection::LayerSelection;
    use std::path::Path;

    fn f32_tensor(name: &str, values: &[f32]) -> TensorRecord {
        TensorRecord {
            name: name.into(),
            dtype: GgmlType::F32,
            dims: vec![values.len() as u64],
            data: f32_to_bytes(values),
        }
    }

    fn write_source(path: &Path, metadata: &[(&str, MetadataValue)], tensors: Vec<TensorRecord>) {
        let mut b = GgufBuilder::new(3);
        for (k, v) in metadata {
            b.add_metadata(k, v).unwrap();
        }
        for t in tensors {
            b.add_tensor(t).unwrap();
        }
        b.write_to_path(path).unwrap();
    }

    fn config(dir: &Path, layers: &str) -> TranscodeConfig {
        TranscodeConfig {
            input_path: dir.join("in.gguf"),
            output_path: dir.join("out.gguf"),
            target_layers: layers.parse().unwrap(),
            stats_output: None,
        }
    }

    #[test]
    fn counts_candidates_and_modified() {
        let dir = tempfile::tempdir().unwrap();
        write_source(
            &dir.path().join("in.gguf"),
            &[("general.architecture", MetadataValue::String("llama".into()))],
            vec![
                f32_tensor("rope_freqs.weight", &[1.1, 2.2]),
                f32_tensor("blk.0.ffn_norm.weight", &[0.3; 4]),
                f32_tensor("blk.1.ffn_norm.weight", &[0.3; 4]),
                f32_tensor("blk.1.attn_q.weight", &[0.3; 4]),
            ],
        );

        let summary = run(config(dir.path(), "1")).unwrap();
        assert_eq!(summary.tensor_count, 4);
        assert_eq!(summary.candidate_tensors, 3);
        assert_eq!(summary.modified_tensors, 1);
        assert_eq!(summary.stats.len(), 1);
        assert_eq!(summary.stats[0].name, "blk.1.ffn_norm.weight");
        assert!(summary.stats[0].max_abs_diff > 0.0);
    }

    #[test]
    fn metadata_failures_are_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = GgufContainer {
            version: 3,
            alignment: 32,
            metadata: vec![
                MetadataEntry::new("general.name", MetadataValue::String("a".into())),
                MetadataEntry::new("GGUF.kv_count", MetadataValue::U64(3)),
                MetadataEntry::new(
                    "odd.nested",
                    MetadataValue::Array(MetadataArray {
                        element_type: MetadataValueType::Array,
                        values: vec![],
                    }),
                ),
            ],
            tensors: vec![f32_tensor("blk.0.ffn_norm.weight", &[1.0; 2])],
        };
        let transcoder = Transcoder {
            ctx: RunContext {
                selector: TensorSelector::new(LayerSelection::All),
                config: config(dir.path(), "all"),
                started: Instant::now(),
                architecture: "llama".into(),
                tensor_count: 1,
                metadata: MetadataOutcome::default(),
            },
            state: Opened { source },
        };

        let copied = transcoder.copy_metadata();
        assert_eq!(copied.ctx.metadata.copied, 1);
        assert_eq!(copied.ctx.metadata.skipped, 1);
        assert_eq!(copied.ctx.metadata.failures.len(), 1);
        assert_eq!(copied.ctx.metadata.failures[0].0, "odd.nested");

        let summary = copied.process_tensors().unwrap().write().unwrap().close();
        assert_eq!(summary.metadata_failures.len(), 1);
        let out = read_container(&dir.path().join("out.gguf")).unwrap();
        assert_eq!(out.metadata.len(), 1);
        assert_eq!(out.metadata[0].key, "general.name");
    }

    #[test]
    fn empty_container_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_source(&dir.path().join("in.gguf"), &[], vec![]);
        let err = Transcoder::open(config(dir.path(), "0")).unwrap_err();
        assert!(matches!(err, FakeQuantError::EmptyContainer { .. }));
        assert!(!dir.path().join("out.gguf").exists());
    }

    #[test]
    fn quantized_target_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        write_source(
            &dir.path().join("in.gguf"),
            &[],
            vec![TensorRecord {
                name: "blk.0.ffn_norm.weight".into(),
                dtype: GgmlType::Q8_0,
                dims: vec![32],
                data: vec![0; 34],
            }],
        );
        let err = run(config(dir.path(), "0")).unwrap_err();
        assert!(matches!(err, FakeQuantError::UnsupportedTensorType { .. }));
        assert!(!dir.path().join("out.gguf").exists());
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn directory_at_output_path_is_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_source(
            &dir.path().join("in.gguf"),
            &[],
            vec![f32_tensor("blk.0.ffn_norm.weight", &[0.3; 4])],
        );
        let out = dir.path().join("out.gguf");
        std::fs::create_dir(&out).unwrap();

        let err = run(config(dir.path(), "0")).unwrap_err();
        assert!(
            matches!(err, FakeQuantError::WriteFailure { ref path, .. } if path == &out),
            "{err:?}"
        );
        assert_eq!(dir_entries(dir.path()), ["in.gguf", "out.gguf"]);
        assert!(dir_entries(&out).is_empty());
    }

    #[test]
    fn file_as_output_parent_is_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_source(
            &dir.path().join("in.gguf"),
            &[],
            vec![f32_tensor("blk.0.ffn_norm.weight", &[0.3; 4])],
        );
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"keep").unwrap();
        let mut cfg = config(dir.path(), "0");
        cfg.output_path = blocker.join("out.gguf");

        let err = run(cfg).unwrap_err();
        assert!(matches!(err, FakeQuantError::WriteFailure { .. }), "{err:?}");
        assert!(!err.is_recoverable());
        assert_eq!(std::fs::read(&blocker).unwrap(), b"keep");
        assert_eq!(dir_entries(dir.path()), ["blocker", "in.gguf"]);
    }

    #[test]
    fn f16_targets_are_widened_to_f32() {
        let dir = tempfile::tempdir().unwrap();
        let halfs: Vec<u8> = [0.1f32, -0.7, 2.5]
            .iter()
            .flat_map(|&v| half::f16::from_f32(v).to_bits().to_le_bytes())
            .collect();
        write_source(
            &dir.path().join("in.gguf"),
            &[],
            vec![TensorRecord {
                name: "blk.2.ffn_norm.weight".into(),
                dtype: GgmlType::F16,
                dims: vec![3],
                data: halfs,
            }],
        );
        let summary = run(config(dir.path(), "2")).unwrap();
        assert_eq!(summary.stats[0].dtype_orig, "F16");
        assert_eq!(summary.stats[0].dtype_fake, "F32");

        let out = read_container(&dir.path().join("out.gguf")).unwrap();
        let t = out.tensor("blk.2.ffn_norm.weight").unwrap();
        assert_eq!(t.dtype, GgmlType::F32);
        assert_eq!(t.dims, vec![3]);
        assert_eq!(t.data.len(), 12);
    }
}
