#![allow(dead_code)]

use gguf_fake_quant::core::{MetadataArray, MetadataValueType};
use gguf_fake_quant::{GgmlType, GgufBuilder, MetadataValue, TensorRecord};
use std::fs;
use std::path::Path;

pub fn f32_tensor(name: &str, dims: &[u64], values: &[f32]) -> TensorRecord {
    TensorRecord {
        name: name.to_string(),
        dtype: GgmlType::F32,
        dims: dims.to_vec(),
        data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

/// Deterministic values in [-1, 1) with non-zero low mantissa bits.
pub fn pseudo_random(n: usize, seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..n)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0 + 1.0e-3
        })
        .collect()
}

pub fn llama_metadata() -> Vec<(&'static str, MetadataValue)> {
    vec![
        ("general.architecture", MetadataValue::String("llama".into())),
        ("general.name", MetadataValue::String("tiny-test".into())),
        ("general.file_type", MetadataValue::U32(0)),
        ("llama.block_count", MetadataValue::U32(2)),
        ("llama.context_length", MetadataValue::U64(2048)),
        ("llama.rope.freq_base", MetadataValue::F32(10000.0)),
        ("tokenizer.ggml.add_bos_token", MetadataValue::Bool(true)),
        (
            "tokenizer.ggml.tokens",
            MetadataValue::Array(MetadataArray {
                element_type: MetadataValueType::String,
                values: vec![
                    MetadataValue::String("<unk>".into()),
                    MetadataValue::String("<s>".into()),
                ],
            }),
        ),
        (
            "tokenizer.ggml.token_type",
            MetadataValue::Array(MetadataArray {
                element_type: MetadataValueType::I32,
                values: vec![MetadataValue::I32(2), MetadataValue::I32(3)],
            }),
        ),
    ]
}

pub fn write_gguf(path: &Path, metadata: &[(&str, MetadataValue)], tensors: Vec<TensorRecord>) {
    let mut builder = GgufBuilder::new(3);
    for (key, value) in metadata {
        builder.add_metadata(key, value).expect("fixture metadata");
    }
    for tensor in tensors {
        builder.add_tensor(tensor).expect("fixture tensor");
    }
    builder.write_to_path(path).expect("write fixture");
}

/// Hand-assembled v3 file with `general.architecture`, an array-of-arrays
/// field at `nested_key` (which the builder refuses to stage) and `tensor`.
pub fn write_gguf_with_nested_array(path: &Path, nested_key: &str, tensor: &TensorRecord) {
    fn put_str(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }
    fn pad(buf: &mut Vec<u8>) {
        buf.resize(buf.len().div_ceil(32) * 32, 0);
    }
    const STRING: u32 = 8;
    const ARRAY: u32 = 9;

    let mut buf = b"GGUF".to_vec();
    buf.extend_from_slice(&3u32.to_le_bytes());
    buf.extend_from_slice(&1u64.to_le_bytes());
    buf.extend_from_slice(&2u64.to_le_bytes());

    put_str(&mut buf, "general.architecture");
    buf.extend_from_slice(&STRING.to_le_bytes());
    put_str(&mut buf, "llama");

    put_str(&mut buf, nested_key);
    buf.extend_from_slice(&ARRAY.to_le_bytes());
    buf.extend_from_slice(&ARRAY.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());

    put_str(&mut buf, &tensor.name);
    buf.extend_from_slice(&(tensor.dims.len() as u32).to_le_bytes());
    for d in &tensor.dims {
        buf.extend_from_slice(&d.to_le_bytes());
    }
    buf.extend_from_slice(&tensor.dtype.id().to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());
    pad(&mut buf);
    buf.extend_from_slice(&tensor.data);
    pad(&mut buf);

    fs::write(path, buf).expect("write hand-assembled fixture");
}
