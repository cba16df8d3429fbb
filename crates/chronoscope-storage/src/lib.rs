mod chunk;

pub use chunk::ChunkAllocator;

/// Suggested chunk size for the closed-block + value arena (spec §4.2).
pub const BLOCK_CHUNK_SIZE: u16 = 8 * 1024;
/// Suggested chunk size for the context-switch arena (spec §4.2).
pub const SYNC_CHUNK_SIZE: u16 = 256;
