//! GGUF container reading.

use super::header::{
    GgufHeader, ALIGNMENT_KEY, DEFAULT_ALIGNMENT, HEADER_SIZE, MAGIC_GGUF, MAX_ARRAY_LEN,
    MAX_DIMS, MAX_METADATA_COUNT, MAX_TENSOR_COUNT, VERSION_MAX, VERSION_MIN,
};
use super::types::{
    GgmlType, GgufContainer, MetadataArray, MetadataEntry, MetadataValue, MetadataValueType,
    TensorRecord,
};
use crate::error::{FakeQuantError, Result};
use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

/// Read a whole GGUF file into memory.
pub fn read_container(path: &Path) -> Result<GgufContainer> {
    let data = fs::read(path).map_err(|source| FakeQuantError::SourceNotFound {
        path: path.to_path_buf(),
        source,
    })?;
    GgufContainer::from_bytes(&data).map_err(|e| match e {
        FakeQuantError::Format(msg) => FakeQuantError::Format(format!("{}: {msg}", path.display())),
        other => other,
    })
}

pub(crate) fn align_up(offset: u64, alignment: u64) -> u64 {
    offset.div_ceil(alignment) * alignment
}

impl GgufContainer {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = GgufHeader::from_le_bytes(data).ok_or_else(|| {
            FakeQuantError::format(format!("file too small ({} bytes)", data.len()))
        })?;
        if header.magic != MAGIC_GGUF {
            return Err(FakeQuantError::format(format!(
                "bad magic 0x{:08X}, expected 0x{MAGIC_GGUF:08X}",
                header.magic
            )));
        }
        if !(VERSION_MIN..=VERSION_MAX).contains(&header.version) {
            return Err(FakeQuantError::format(format!(
                "unsupported version {} (supported {VERSION_MIN}..={VERSION_MAX})",
                header.version
            )));
        }
        if header.tensor_count > MAX_TENSOR_COUNT {
            return Err(FakeQuantError::format(format!(
                "tensor count {} exceeds {MAX_TENSOR_COUNT}",
                header.tensor_count
            )));
        }
        if header.metadata_count > MAX_METADATA_COUNT {
            return Err(FakeQuantError::format(format!(
                "metadata count {} exceeds {MAX_METADATA_COUNT}",
                header.metadata_count
            )));
        }

        let mut cursor = Cursor::new(data);
        cursor.set_position(HEADER_SIZE as u64);

        let mut metadata = Vec::with_capacity(header.metadata_count as usize);
        for _ in 0..header.metadata_count {
            let key = read_string(&mut cursor, "metadata key")?;
            let tag = read_u32(&mut cursor, &key)?;
            let value_type = MetadataValueType::from_u32(tag).ok_or_else(|| {
                FakeQuantError::format(format!("metadata '{key}' has unknown value type {tag}"))
            })?;
            let value = read_value(&mut cursor, value_type, &key)?;
            metadata.push(MetadataEntry { key, value });
        }

        let alignment = match metadata.iter().find(|e| e.key == ALIGNMENT_KEY) {
            Some(entry) => {
                let a = entry.value.as_u32().ok_or_else(|| {
                    FakeQuantError::format(format!("{ALIGNMENT_KEY} must be a u32"))
                })?;
                if a == 0 || !a.is_power_of_two() {
                    return Err(FakeQuantError::format(format!(
                        "{ALIGNMENT_KEY} = {a} is not a power of two"
                    )));
                }
                u64::from(a)
            }
            None => DEFAULT_ALIGNMENT,
        };

        let mut directory = Vec::with_capacity(header.tensor_count as usize);
        let mut seen = HashSet::new();
        for _ in 0..header.tensor_count {
            let name = read_string(&mut cursor, "tensor name")?;
            if !seen.insert(name.clone()) {
                return Err(FakeQuantError::format(format!("duplicate tensor '{name}'")));
            }
            let n_dims = read_u32(&mut cursor, &name)?;
            if n_dims == 0 || n_dims > MAX_DIMS {
                return Err(FakeQuantError::format(format!(
                    "tensor '{name}' has {n_dims} dimensions (allowed 1..={MAX_DIMS})"
                )));
            }
            let mut dims = Vec::with_capacity(n_dims as usize);
            for _ in 0..n_dims {
                let d = read_u64(&mut cursor, &name)?;
                if d == 0 {
                    return Err(FakeQuantError::format(format!(
                        "tensor '{name}' has a zero dimension"
                    )));
                }
                dims.push(d);
            }
            let type_id = read_u32(&mut cursor, &name)?;
            let dtype = GgmlType::from_u32(type_id).ok_or_else(|| {
                FakeQuantError::format(format!("tensor '{name}' has unknown type {type_id}"))
            })?;
            let offset = read_u64(&mut cursor, &name)?;
            directory.push((name, dtype, dims, offset));
        }

        let data_start = align_up(cursor.position(), alignment);
        let mut tensors = Vec::with_capacity(directory.len());
        for (name, dtype, dims, offset) in directory {
            if offset % alignment != 0 {
                return Err(FakeQuantError::format(format!(
                    "tensor '{name}' offset {offset} is not aligned to {alignment}"
                )));
            }
            let n_elements = dims
                .iter()
                .try_fold(1u64, |acc, &d| acc.checked_mul(d))
                .ok_or_else(|| FakeQuantError::format(format!("tensor '{name}' dims overflow")))?;
            let len = dtype.payload_len(n_elements).ok_or_else(|| {
                FakeQuantError::format(format!(
                    "tensor '{name}': {n_elements} elements do not fill {dtype} blocks of {}",
                    dtype.block_size()
                ))
            })?;
            let start = data_start
                .checked_add(offset)
                .ok_or_else(|| FakeQuantError::format(format!("tensor '{name}' offset overflow")))?;
            let end = start
                .checked_add(len)
                .filter(|&end| end <= data.len() as u64)
                .ok_or_else(|| {
                    FakeQuantError::format(format!(
                        "tensor '{name}' payload [{start}, +{len}) exceeds file size {}",
                        data.len()
                    ))
                })?;
            tensors.push(TensorRecord {
                name,
                dtype,
                dims,
                data: data[start as usize..end as usize].to_vec(),
            });
        }

        Ok(Self {
            version: header.version,
            alignment,
            metadata,
            tensors,
        })
    }
}

fn read_array<const N: usize>(cursor: &mut Cursor<&[u8]>, context: &str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    cursor.read_exact(&mut buf).map_err(|_| {
        FakeQuantError::format(format!(
            "unexpected end of file at offset {} reading {context}",
            cursor.position()
        ))
    })?;
    Ok(buf)
}

fn read_u32(cursor: &mut Cursor<&[u8]>, context: &str) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(cursor, context)?))
}

fn read_u64(cursor: &mut Cursor<&[u8]>, context: &str) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(cursor, context)?))
}

fn read_string(cursor: &mut Cursor<&[u8]>, context: &str) -> Result<String> {
    let len = read_u64(cursor, context)?;
    let remaining = (cursor.get_ref().len() as u64).saturating_sub(cursor.position());
    if len > remaining {
        return Err(FakeQuantError::format(format!(
            "string of {len} bytes in {context} runs past end of file"
        )));
    }
    let mut bytes = vec![0u8; len as usize];
    cursor
        .read_exact(&mut bytes)
        .map_err(|_| FakeQuantError::format(format!("truncated string in {context}")))?;
    String::from_utf8(bytes)
        .map_err(|e| FakeQuantError::format(format!("invalid UTF-8 in {context}: {e}")))
}

fn read_value(
    cursor: &mut Cursor<&[u8]>,
    value_type: MetadataValueType,
    key: &str,
) -> Result<MetadataValue> {
    Ok(match value_type {
        MetadataValueType::U8 => MetadataValue::U8(u8::from_le_bytes(read_array(cursor, key)?)),
        MetadataValueType::I8 => MetadataValue::I8(i8::from_le_bytes(read_array(cursor, key)?)),
        MetadataValueType::U16 => MetadataValue::U16(u16::from_le_bytes(read_array(cursor, key)?)),
        MetadataValueType::I16 => MetadataValue::I16(i16::from_le_bytes(read_array(cursor, key)?)),
        MetadataValueType::U32 => MetadataValue::U32(read_u32(cursor, key)?),
        MetadataValueType::I32 => MetadataValue::I32(i32::from_le_bytes(read_array(cursor, key)?)),
        MetadataValueType::F32 => MetadataValue::F32(f32::from_le_bytes(read_array(cursor, key)?)),
        MetadataValueType::Bool => {
            let [b] = read_array::<1>(cursor, key)?;
            match b {
                0 => MetadataValue::Bool(false),
                1 => MetadataValue::Bool(true),
                other => {
                    return Err(FakeQuantError::format(format!(
                        "metadata '{key}' has invalid bool byte {other}"
                    )))
                }
            }
        }
        MetadataValueType::String => MetadataValue::String(read_string(cursor, key)?),
        MetadataValueType::Array => {
            let tag = read_u32(cursor, key)?;
            let element_type = MetadataValueType::from_u32(tag).ok_or_else(|| {
                FakeQuantError::format(format!("array '{key}' has unknown element type {tag}"))
            })?;
            let len = read_u64(cursor, key)?;
            if len > MAX_ARRAY_LEN {
                return Err(FakeQuantError::format(format!(
                    "array '{key}' length {len} exceeds {MAX_ARRAY_LEN}"
                )));
            }
            let mut values = Vec::with_capacity(len as usize);
            for _ in 0..len {
                values.push(read_value(cursor, element_type, key)?);
            }
            MetadataValue::Array(MetadataArray {
                element_type,
                values,
            })
        }
        MetadataValueType::U64 => MetadataValue::U64(read_u64(cursor, key)?),
        MetadataValueType::I64 => MetadataValue::I64(i64::from_le_bytes(read_array(cursor, key)?)),
        MetadataValueType::F64 => MetadataValue::F64(f64::from_le_bytes(read_array(cursor, key)?)),
    })
}
