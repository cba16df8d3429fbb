use std::io::{self, Write};

/// Length-prefixed, append-only chunked byte arena (spec §4.2, C2).
///
/// Records are written via [`ChunkAllocator::push_record`], which never
/// hands out a raw pointer — Design Notes §9 calls for a typed,
/// bounds-checked write API instead of the raw-pointer `allocate()` the
/// original implementation exposes. A record never straddles two chunks: if
/// the current chunk doesn't have room, a fresh chunk is started and the
/// record goes there in full (growing past `chunk_size` only if a single
/// record is itself larger than a chunk can ever hold).
///
/// Chunks are stored in insertion order directly (`Vec::push`), which is
/// already the order [`ChunkAllocator::serialize`] needs — unlike a
/// prepend-only linked list, there is no "invert before serializing" step.
pub struct ChunkAllocator {
    chunk_size: u16,
    chunks: Vec<Vec<u8>>,
    /// Number of `push_record` calls since the last `clear`.
    count: u32,
}

const LEN_PREFIX: usize = std::mem::size_of::<u16>();

impl ChunkAllocator {
    /// `chunk_size` is the target capacity of each chunk in bytes (spec
    /// suggests ~8 KiB for block arenas, ~256 B for sync arenas).
    pub fn new(chunk_size: u16) -> Self {
        Self { chunk_size, chunks: vec![Vec::with_capacity(chunk_size as usize)], count: 0 }
    }

    /// Total number of records stored since the last `clear`.
    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Total bytes occupied across all chunks (records + length prefixes),
    /// used for the dump's "total memory used" accounting (spec §4.5 step 7).
    pub fn bytes_used(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Appends `payload` as a new length-prefixed record. `payload.len()`
    /// must fit in a `u16`; the caller is responsible for that (callers in
    /// this crate only ever write bounded records).
    pub fn push_record(&mut self, payload: &[u8]) {
        let n = u16::try_from(payload.len()).expect("record payload larger than u16::MAX");
        let needed = LEN_PREFIX + payload.len();

        let last = self.chunks.last_mut().expect("chunk list is never empty");
        if last.len() + needed > self.chunk_size as usize && !last.is_empty() {
            self.chunks.push(Vec::with_capacity(self.chunk_size.max(n + 2) as usize));
        }

        let chunk = self.chunks.last_mut().expect("chunk list is never empty");
        chunk.extend_from_slice(&n.to_le_bytes());
        chunk.extend_from_slice(payload);
        self.count += 1;
    }

    /// Writes every record across every chunk, in insertion order, as
    /// `u16 length` + `length` bytes, to `sink`. Leaves the allocator
    /// cleared (one empty chunk) afterwards, exactly like the C++
    /// `chunk_allocator::serialize`.
    pub fn serialize(&mut self, sink: &mut impl Write) -> io::Result<()> {
        for chunk in &self.chunks {
            sink.write_all(chunk)?;
        }
        self.clear();
        Ok(())
    }

    /// Clears all records, retaining a single empty chunk.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.chunks.push(Vec::with_capacity(self.chunk_size as usize));
        self.count = 0;
    }

    /// Replays every record in insertion order without consuming the
    /// allocator. Used by tests to assert the chunk-terminator invariant
    /// (spec §8) independent of the on-wire format.
    pub fn iter_records(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().flat_map(|chunk| RecordIter { data: chunk })
    }
}

struct RecordIter<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < LEN_PREFIX {
            return None;
        }
        let n = u16::from_le_bytes([self.data[0], self.data[1]]) as usize;
        if n == 0 {
            return None;
        }
        let (_, rest) = self.data.split_at(LEN_PREFIX);
        if rest.len() < n {
            return None;
        }
        let (record, rest) = rest.split_at(n);
        self.data = rest;
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_round_trip_in_insertion_order() {
        let mut alloc = ChunkAllocator::new(64);
        alloc.push_record(b"one");
        alloc.push_record(b"two-longer");
        alloc.push_record(b"3");

        let records: Vec<&[u8]> = alloc.iter_records().collect();
        assert_eq!(records, vec![b"one".as_slice(), b"two-longer".as_slice(), b"3".as_slice()]);
        assert_eq!(alloc.len(), 3);
    }

    #[test]
    fn overflow_spills_into_new_chunk_without_straddling() {
        // Chunk size 32: three 10-byte records (2-byte prefix + 8-byte
        // payload) won't all fit in one chunk, so the allocator must start a
        // second chunk rather than truncate or split a record.
        let mut alloc = ChunkAllocator::new(32);
        for i in 0..10u8 {
            alloc.push_record(&[i; 8]);
        }
        assert!(alloc.chunks.len() >= 2, "expected overflow into additional chunks");
        let records: Vec<&[u8]> = alloc.iter_records().collect();
        assert_eq!(records.len(), 10);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(*record, [i as u8; 8].as_slice());
        }
    }

    #[test]
    fn serialize_emits_records_then_clears() {
        let mut alloc = ChunkAllocator::new(64);
        alloc.push_record(b"abc");
        alloc.push_record(b"de");

        let mut out = Vec::new();
        alloc.serialize(&mut out).unwrap();

        // u16 len=3 "abc" u16 len=2 "de"
        assert_eq!(out, [3u8, 0, b'a', b'b', b'c', 2, 0, b'd', b'e']);
        assert!(alloc.is_empty());
        assert_eq!(alloc.bytes_used(), 0);
    }

    #[test]
    fn oversized_record_gets_its_own_chunk() {
        let mut alloc = ChunkAllocator::new(8);
        let big = vec![7u8; 100];
        alloc.push_record(&big);
        alloc.push_record(b"x");

        let records: Vec<&[u8]> = alloc.iter_records().collect();
        assert_eq!(records[0], big.as_slice());
        assert_eq!(records[1], b"x".as_slice());
    }
}
