//! GGUF file header definitions.

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct GgufHeader {
    pub magic: u32,
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_count: u64,
}

pub const MAGIC_GGUF: u32 = 0x4655_4747; // "GGUF" little-endian
pub const VERSION_MIN: u32 = 2;
pub const VERSION_MAX: u32 = 3;
pub const HEADER_SIZE: usize = std::mem::size_of::<GgufHeader>();

pub const DEFAULT_ALIGNMENT: u64 = 32;
pub const ALIGNMENT_KEY: &str = "general.alignment";
pub const ARCHITECTURE_KEY: &str = "general.architecture";
pub const DEFAULT_ARCHITECTURE: &str = "llama";

/// Keys in this namespace describe the file itself and are never copied.
pub const INTERNAL_KEY_PREFIX: &str = "GGUF.";

pub const MAX_TENSOR_COUNT: u64 = 100_000;
pub const MAX_METADATA_COUNT: u64 = 10_000;
pub const MAX_ARRAY_LEN: u64 = 10_000_000;
pub const MAX_DIMS: u32 = 8;

impl GgufHeader {
    pub fn new(version: u32, tensor_count: u64, metadata_count: u64) -> Self {
        Self {
            magic: MAGIC_GGUF,
            version,
            tensor_count,
            metadata_count,
        }
    }

    /// Decode from the first `HEADER_SIZE` bytes, little-endian on disk.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        let raw: GgufHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE]);
        Some(Self {
            magic: u32::from_le(raw.magic),
            version: u32::from_le(raw.version),
            tensor_count: u64::from_le(raw.tensor_count),
            metadata_count: u64::from_le(raw.metadata_count),
        })
    }

    pub fn to_le_bytes(&self) -> [u8; HEADER_SIZE] {
        let disk = GgufHeader {
            magic: self.magic.to_le(),
            version: self.version.to_le(),
            tensor_count: self.tensor_count.to_le(),
            metadata_count: self.metadata_count.to_le(),
        };
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(bytemuck::bytes_of(&disk));
        out
    }
}
