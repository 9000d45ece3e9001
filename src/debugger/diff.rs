use std::fmt;

/// Run of consecutive bytes which differ between two memory images.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u16,
    pub len: u32,
}

impl MemoryRegion {
    /// One past the last byte.
    pub fn end(&self) -> u32 {
        self.start as u32 + self.len
    }

    pub fn overlaps(&self, start: u16, len: u32) -> bool {
        (start as u32) < self.end() && (self.start as u32) < start as u32 + len
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}..0x{:04x}", self.start, self.end())
    }
}

const CHUNK: usize = 64;

/// Sequential scan of two equally sized images, merging adjacent changed bytes.
///
/// Identical chunks are skipped with a slice comparison.
pub fn diff(before: &[u8], after: &[u8]) -> Vec<MemoryRegion> {
    debug_assert_eq!(before.len(), after.len());
    let mut regions: Vec<MemoryRegion> = Vec::new();
    let chunks = before.chunks(CHUNK).zip(after.chunks(CHUNK));
    for (index, (old_chunk, new_chunk)) in chunks.enumerate() {
        if old_chunk == new_chunk {
            continue;
        }
        for (offset, (old, new)) in old_chunk.iter().zip(new_chunk).enumerate() {
            if old == new {
                continue;
            }
            let address = index * CHUNK + offset;
            match regions.last_mut() {
                Some(region) if region.end() == address as u32 => region.len += 1,
                _ => regions.push(MemoryRegion {
                    start: address as u16,
                    len: 1,
                }),
            }
        }
    }
    regions
}
