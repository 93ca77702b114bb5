//! In-memory GGUF container model.

use super::header::{ARCHITECTURE_KEY, DEFAULT_ARCHITECTURE};
use std::fmt;

/// ggml element encodings, with the block geometry needed to size payloads.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum GgmlType {
    F32 = 0,
    F16 = 1,
    Q4_0 = 2,
    Q4_1 = 3,
    Q5_0 = 6,
    Q5_1 = 7,
    Q8_0 = 8,
    Q8_1 = 9,
    Q2_K = 10,
    Q3_K = 11,
    Q4_K = 12,
    Q5_K = 13,
    Q6_K = 14,
    Q8_K = 15,
    IQ2_XXS = 16,
    IQ2_XS = 17,
    IQ3_XXS = 18,
    IQ1_S = 19,
    IQ4_NL = 20,
    IQ3_S = 21,
    IQ2_S = 22,
    IQ4_XS = 23,
    I8 = 24,
    I16 = 25,
    I32 = 26,
    I64 = 27,
    F64 = 28,
    IQ1_M = 29,
    BF16 = 30,
    TQ1_0 = 34,
    TQ2_0 = 35,
}

impl GgmlType {
    pub fn from_u32(id: u32) -> Option<Self> {
        use GgmlType::*;
        Some(match id {
            0 => F32,
            1 => F16,
            2 => Q4_0,
            3 => Q4_1,
            6 => Q5_0,
            7 => Q5_1,
            8 => Q8_0,
            9 => Q8_1,
            10 => Q2_K,
            11 => Q3_K,
            12 => Q4_K,
            13 => Q5_K,
            14 => Q6_K,
            15 => Q8_K,
            16 => IQ2_XXS,
            17 => IQ2_XS,
            18 => IQ3_XXS,
            19 => IQ1_S,
            20 => IQ4_NL,
            21 => IQ3_S,
            22 => IQ2_S,
            23 => IQ4_XS,
            24 => I8,
            25 => I16,
            26 => I32,
            27 => I64,
            28 => F64,
            29 => IQ1_M,
            30 => BF16,
            34 => TQ1_0,
            35 => TQ2_0,
            _ => return None,
        })
    }

    pub fn id(self) -> u32 {
        self as u32
    }

    /// Elements per block.
    pub fn block_size(self) -> u64 {
        use GgmlType::*;
        match self {
            F32 | F16 | BF16 | F64 | I8 | I16 | I32 | I64 => 1,
            Q4_0 | Q4_1 | Q5_0 | Q5_1 | Q8_0 | Q8_1 | IQ4_NL => 32,
            _ => 256,
        }
    }

    /// Bytes per block.
    pub fn type_size(self) -> u64 {
        use GgmlType::*;
        match self {
            I8 => 1,
            F16 | BF16 | I16 => 2,
            F32 | I32 => 4,
            F64 | I64 => 8,
            Q4_0 => 18,
            Q4_1 => 20,
            Q5_0 => 22,
            Q5_1 => 24,
            Q8_0 => 34,
            Q8_1 => 36,
            IQ4_NL => 18,
            Q2_K => 84,
            Q3_K => 110,
            Q4_K => 144,
            Q5_K => 176,
            Q6_K => 210,
            Q8_K => 292,
            IQ2_XXS => 66,
            IQ2_XS => 74,
            IQ3_XXS => 98,
            IQ1_S => 50,
            IQ3_S => 110,
            IQ2_S => 82,
            IQ4_XS => 136,
            IQ1_M => 56,
            TQ1_0 => 54,
            TQ2_0 => 66,
        }
    }

    /// Payload bytes for `n_elements`, or `None` if they do not fill whole blocks.
    pub fn payload_len(self, n_elements: u64) -> Option<u64> {
        let block = self.block_size();
        if n_elements % block != 0 {
            return None;
        }
        (n_elements / block).checked_mul(self.type_size())
    }
}

impl fmt::Display for GgmlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Wire tags for metadata values.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataValueType {
    U8 = 0,
    I8 = 1,
    U16 = 2,
    I16 = 3,
    U32 = 4,
    I32 = 5,
    F32 = 6,
    Bool = 7,
    String = 8,
    Array = 9,
    U64 = 10,
    I64 = 11,
    F64 = 12,
}

impl MetadataValueType {
    pub fn from_u32(tag: u32) -> Option<Self> {
        use MetadataValueType::*;
        Some(match tag {
            0 => U8,
            1 => I8,
            2 => U16,
            3 => I16,
            4 => U32,
            5 => I32,
            6 => F32,
            7 => Bool,
            8 => String,
            9 => Array,
            10 => U64,
            11 => I64,
            12 => F64,
            _ => return None,
        })
    }

    pub fn id(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
    String(String),
    Array(MetadataArray),
    U64(u64),
    I64(i64),
    F64(f64),
}

/// Homogeneous array; the element type is kept so empty arrays round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataArray {
    pub element_type: MetadataValueType,
    pub values: Vec<MetadataValue>,
}

impl MetadataValue {
    pub fn value_type(&self) -> MetadataValueType {
        match self {
            Self::U8(_) => MetadataValueType::U8,
            Self::I8(_) => MetadataValueType::I8,
            Self::U16(_) => MetadataValueType::U16,
            Self::I16(_) => MetadataValueType::I16,
            Self::U32(_) => MetadataValueType::U32,
            Self::I32(_) => MetadataValueType::I32,
            Self::F32(_) => MetadataValueType::F32,
            Self::Bool(_) => MetadataValueType::Bool,
            Self::String(_) => MetadataValueType::String,
            Self::Array(_) => MetadataValueType::Array,
            Self::U64(_) => MetadataValueType::U64,
            Self::I64(_) => MetadataValueType::I64,
            Self::F64(_) => MetadataValueType::F64,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    pub key: String,
    pub value: MetadataValue,
}

impl MetadataEntry {
    pub fn new(key: impl Into<String>, value: MetadataValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// One named tensor. `dims` are in ggml order (fastest-varying first).
#[derive(Debug, Clone, PartialEq)]
pub struct TensorRecord {
    pub name: String,
    pub dtype: GgmlType,
    pub dims: Vec<u64>,
    pub data: Vec<u8>,
}

impl TensorRecord {
    pub fn n_elements(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Row-major shape, as numpy-style tooling reports it.
    pub fn shape(&self) -> Vec<u64> {
        self.dims.iter().rev().copied().collect()
    }

    pub fn expected_payload_len(&self) -> Option<u64> {
        self.dtype.payload_len(self.n_elements())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GgufContainer {
    pub version: u32,
    pub alignment: u64,
    pub metadata: Vec<MetadataEntry>,
    pub tensors: Vec<TensorRecord>,
}

impl GgufContainer {
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.value)
    }

    pub fn tensor(&self, name: &str) -> Option<&TensorRecord> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Architecture tag, falling back to `llama` when the file has none.
    pub fn architecture(&self) -> &str {
        self.get(ARCHITECTURE_KEY)
            .and_then(MetadataValue::as_str)
            .unwrap_or(DEFAULT_ARCHITECTURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_len_matches_block_geometry() {
        assert_eq!(GgmlType::F32.payload_len(256), Some(1024));
        assert_eq!(GgmlType::F16.payload_len(256), Some(512));
        assert_eq!(GgmlType::Q4_0.payload_len(64), Some(36));
        assert_eq!(GgmlType::Q4_K.payload_len(512), Some(288));
        assert_eq!(GgmlType::Q8_0.payload_len(31), None);
    }

    #[test]
    fn type_ids_round_trip() {
        for id in 0..40 {
            if let Some(t) = GgmlType::from_u32(id) {
                assert_eq!(t.id(), id);
            }
        }
        assert!(GgmlType::from_u32(4).is_none());
        assert_eq!(GgmlType::from_u32(30), Some(GgmlType::BF16));
    }

    #[test]
    fn shape_is_reverse_of_dims() {
        let t = TensorRecord {
            name: "blk.0.attn_k.weight".into(),
            dtype: GgmlType::F32,
            dims: vec![64, 128],
            data: vec![0; 64 * 128 * 4],
        };
        assert_eq!(t.shape(), vec![128, 64]);
        assert_eq!(t.n_elements(), 8192);
        assert_eq!(t.expected_payload_len(), Some(32768));
    }

    #[test]
    fn architecture_defaults_to_llama() {
        let mut c = GgufContainer {
            version: 3,
            alignment: 32,
            metadata: vec![],
            tensors: vec![],
        };
        assert_eq!(c.architecture(), "llama");
        c.metadata.push(MetadataEntry::new(
            "general.architecture",
            MetadataValue::String("qwen2".into()),
        ));
        assert_eq!(c.architecture(), "qwen2");
    }
}
