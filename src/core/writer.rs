//! GGUF container writing.

use super::header::{GgufHeader, ALIGNMENT_KEY, DEFAULT_ALIGNMENT, HEADER_SIZE, VERSION_MAX};
use super::io::align_up;
use super::types::{MetadataEntry, MetadataValue, MetadataValueType, TensorRecord};
use crate::error::{FakeQuantError, Result};
use std::collections::HashSet;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Stages metadata and tensors, then emits header, metadata, directory and
/// payloads in that order.
#[derive(Debug, Clone)]
pub struct GgufBuilder {
    version: u32,
    metadata: Vec<MetadataEntry>,
    keys: HashSet<String>,
    tensors: Vec<TensorRecord>,
    names: HashSet<String>,
}

impl Default for GgufBuilder {
    fn default() -> Self {
        Self::new(VERSION_MAX)
    }
}

impl GgufBuilder {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            metadata: Vec::new(),
            keys: HashSet::new(),
            tensors: Vec::new(),
            names: HashSet::new(),
        }
    }

    /// Stage one metadata field. Rejections are `MetadataCopyFailure`s and
    /// leave the builder unchanged.
    pub fn add_metadata(&mut self, key: &str, value: &MetadataValue) -> Result<()> {
        if key.is_empty() {
            return Err(FakeQuantError::metadata(key, "empty key"));
        }
        if self.keys.contains(key) {
            return Err(FakeQuantError::metadata(key, "duplicate key"));
        }
        if let MetadataValue::Array(array) = value {
            let nested = array.element_type == MetadataValueType::Array
                || array
                    .values
                    .iter()
                    .any(|v| v.value_type() != array.element_type);
            if nested {
                return Err(FakeQuantError::metadata(
                    key,
                    "nested or heterogeneous arrays are not supported",
                ));
            }
        }
        if key == ALIGNMENT_KEY {
            match value.as_u32() {
                Some(a) if a.is_power_of_two() => {}
                _ => {
                    return Err(FakeQuantError::metadata(
                        key,
                        "alignment must be a power-of-two u32",
                    ))
                }
            }
        }
        self.keys.insert(key.to_string());
        self.metadata.push(MetadataEntry::new(key, value.clone()));
        Ok(())
    }

    /// Stage one tensor; payload length must agree with dims and type.
    pub fn add_tensor(&mut self, tensor: TensorRecord) -> Result<()> {
        if self.names.contains(&tensor.name) {
            return Err(FakeQuantError::format(format!(
                "tensor '{}' staged twice",
                tensor.name
            )));
        }
        match tensor.expected_payload_len() {
            Some(len) if len == tensor.data.len() as u64 => {}
            expected => {
                return Err(FakeQuantError::format(format!(
                    "tensor '{}' payload is {} bytes, {} {:?} needs {:?}",
                    tensor.name,
                    tensor.data.len(),
                    tensor.dtype,
                    tensor.dims,
                    expected
                )))
            }
        }
        self.names.insert(tensor.name.clone());
        self.tensors.push(tensor);
        Ok(())
    }

    pub fn metadata(&self) -> &[MetadataEntry] {
        &self.metadata
    }

    pub fn tensors(&self) -> &[TensorRecord] {
        &self.tensors
    }

    /// Alignment the written file will declare.
    pub fn alignment(&self) -> u64 {
        self.metadata
            .iter()
            .find(|e| e.key == ALIGNMENT_KEY)
            .and_then(|e| e.value.as_u32())
            .map(u64::from)
            .unwrap_or(DEFAULT_ALIGNMENT)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let alignment = self.alignment();
        let header = GgufHeader::new(
            self.version,
            self.tensors.len() as u64,
            self.metadata.len() as u64,
        );
        w.write_all(&header.to_le_bytes())?;
        let mut pos = HEADER_SIZE as u64;

        for entry in &self.metadata {
            pos += write_string(w, &entry.key)?;
            w.write_all(&entry.value.value_type().id().to_le_bytes())?;
            pos += 4 + write_value(w, &entry.value)?;
        }

        let mut offset = 0u64;
        for tensor in &self.tensors {
            pos += write_string(w, &tensor.name)?;
            w.write_all(&(tensor.dims.len() as u32).to_le_bytes())?;
            for d in &tensor.dims {
                w.write_all(&d.to_le_bytes())?;
            }
            w.write_all(&tensor.dtype.id().to_le_bytes())?;
            w.write_all(&offset.to_le_bytes())?;
            pos += 4 + 8 * tensor.dims.len() as u64 + 4 + 8;
            offset = align_up(offset + tensor.data.len() as u64, alignment);
        }

        write_padding(w, align_up(pos, alignment) - pos)?;

        for tensor in &self.tensors {
            w.write_all(&tensor.data)?;
            let len = tensor.data.len() as u64;
            write_padding(w, align_up(len, alignment) - len)?;
        }
        Ok(())
    }

    /// Write to a temporary file beside `path`, then rename it into place.
    pub fn write_to_path(&self, path: &Path) -> Result<()> {
        let write_failure = |source: io::Error| FakeQuantError::WriteFailure {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(write_failure)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(write_failure)?;
        {
            let mut w = BufWriter::new(tmp.as_file_mut());
            self.write_to(&mut w).map_err(write_failure)?;
            w.flush().map_err(write_failure)?;
        }
        tmp.as_file().sync_all().map_err(write_failure)?;
        tmp.persist(path).map_err(|e| write_failure(e.error))?;
        Ok(())
    }
}

fn write_padding<W: Write>(w: &mut W, n: u64) -> io::Result<()> {
    if n > 0 {
        w.write_all(&vec![0u8; n as usize])?;
    }
    Ok(())
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<u64> {
    w.write_all(&(s.len() as u64).to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    Ok(8 + s.len() as u64)
}

/// Writes the value body (without its type tag), returning bytes written.
fn write_value<W: Write>(w: &mut W, value: &MetadataValue) -> io::Result<u64> {
    Ok(match value {
        MetadataValue::U8(v) => {
            w.write_all(&v.to_le_bytes())?;
            1
        }
        MetadataValue::I8(v) => {
            w.write_all(&v.to_le_bytes())?;
            1
        }
        MetadataValue::U16(v) => {
            w.write_all(&v.to_le_bytes())?;
            2
        }
        MetadataValue::I16(v) => {
            w.write_all(&v.to_le_bytes())?;
            2
        }
        MetadataValue::U32(v) => {
            w.write_all(&v.to_le_bytes())?;
            4
        }
        MetadataValue::I32(v) => {
            w.write_all(&v.to_le_bytes())?;
            4
        }
        MetadataValue::F32(v) => {
            w.write_all(&v.to_le_bytes())?;
            4
        }
        MetadataValue::Bool(v) => {
            w.write_all(&[u8::from(*v)])?;
            1
        }
        MetadataValue::String(s) => write_string(w, s)?,
        MetadataValue::Array(array) => {
            w.write_all(&array.element_type.id().to_le_bytes())?;
            w.write_all(&(array.values.len() as u64).to_le_bytes())?;
            let mut n = 12;
            for v in &array.values {
                n += write_value(w, v)?;
            }
            n
        }
        MetadataValue::U64(v) => {
            w.write_all(&v.to_le_bytes())?;
            8
        }
        MetadataValue::I64(v) => {
            w.write_all(&v.to_le_bytes())?;
            8
        }
        MetadataValue::F64(v) => {
            w.write_all(&v.to_le_bytes())?;
            8
        }
    })
}
