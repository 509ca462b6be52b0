//! Froxel GPU Buffer Structures
//!
//! This module defines the packed per-froxel light lists consumed by the lighting
//! shader, and the compaction that produces them.
//!
//! ## Buffer Structure
//!
//! Two buffers are uploaded every frame:
//! 1. **Froxel buffer**: one [`FroxelEntry`] per froxel, `(offset, count)` into the
//!    record buffer
//! 2. **Record buffer**: one byte per light reference; a froxel's lights are the
//!    `count` bytes starting at `offset`
//!
//! Record bytes are light indices. The shader splits a byte `j` into its group
//! `j % 8` and bit `j / 8` to fetch the light.
//!
//! ## Memory Layout
//!
//! Froxel buffer: 4 bytes × 8,192 froxels = 32,768 bytes (32 KB)
//! Record buffer: 1 byte × 16,384 entries = 16,384 bytes (16 KB)

use std::ops::{BitOr, BitOrAssign};

use static_assertions::assert_eq_size;

use super::froxel_config::{
    FROXEL_BUFFER_MAX_ENTRY_COUNT, GROUP_COUNT, LIGHT_BITSET_WIDTH, LIGHT_PER_GROUP,
    MAX_LIGHT_COUNT, RECORD_BUFFER_ENTRY_COUNT,
};

// ============================================================================
// FroxelEntry - Per-froxel record descriptor
// ============================================================================

/// Record range of a single froxel.
///
/// WGSL Layout (4 bytes, read as one `u32`):
///   bits  0-15: offset (u16) - First record byte of this froxel
///   bits 16-23: count  (u8)  - Number of lights
///   bits 24-31: reserved
///
/// A froxel without lights has an all-zero entry.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FroxelEntry {
    pub offset: u16,
    pub count: u8,
    pub reserved: u8,
}

// Compile-time assertion to verify struct size is exactly 4 bytes
const _: () = {
    assert!(
        std::mem::size_of::<FroxelEntry>() == 4,
        "FroxelEntry must be exactly 4 bytes for GPU compatibility"
    );
};

impl FroxelEntry {
    pub const EMPTY: Self = Self::new(0, 0);

    #[inline]
    pub const fn new(offset: u16, count: u8) -> Self {
        Self {
            offset,
            count,
            reserved: 0,
        }
    }

    /// The entry as the shader reads it.
    #[inline]
    pub fn to_bits(self) -> u32 {
        self.offset as u32 | (self.count as u32) << 16
    }

    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        Self::new(bits as u16, (bits >> 16) as u8)
    }

    /// Record byte range covered by this entry.
    #[inline]
    pub fn range(self) -> std::ops::Range<usize> {
        self.offset as usize..self.offset as usize + self.count as usize
    }
}

/// Size of the froxel buffer at the default ceiling, in bytes.
pub const FROXEL_BUFFER_SIZE: usize =
    FROXEL_BUFFER_MAX_ENTRY_COUNT as usize * std::mem::size_of::<FroxelEntry>();

/// Size of the record buffer at the default capacity, in bytes.
pub const RECORD_BUFFER_SIZE: usize = RECORD_BUFFER_ENTRY_COUNT as usize;

// ============================================================================
// LightBitset - Per-froxel light membership
// ============================================================================

/// Fixed-width set of lights affecting one froxel.
///
/// Word `w` holds shards `2w` (low half) and `2w + 1` (high half), so bit `l`
/// belongs to shard `l / 32` and maps to light `(l % 32) * 8 + l / 32`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LightBitset {
    pub words: [u64; LIGHT_BITSET_WIDTH / 64],
}

assert_eq_size!(LightBitset, [u8; LIGHT_BITSET_WIDTH / 8]);

impl LightBitset {
    pub const EMPTY: Self = Self {
        words: [0; LIGHT_BITSET_WIDTH / 64],
    };

    /// Bit position of light `light`.
    #[inline]
    pub fn bit_of_light(light: usize) -> usize {
        (light % GROUP_COUNT) * LIGHT_PER_GROUP + light / GROUP_COUNT
    }

    /// Light stored at bit position `bit`.
    #[inline]
    pub fn light_of_bit(bit: usize) -> usize {
        (bit % LIGHT_PER_GROUP) * GROUP_COUNT + bit / LIGHT_PER_GROUP
    }

    #[inline]
    pub fn insert(&mut self, light: usize) {
        let bit = Self::bit_of_light(light);
        self.words[bit / 64] |= 1u64 << (bit % 64);
    }

    #[inline]
    pub fn contains(&self, light: usize) -> bool {
        let bit = Self::bit_of_light(light);
        self.words[bit / 64] & (1u64 << (bit % 64)) != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Light indices in bit order (the order they are written to the record buffer).
    pub fn light_indices(&self) -> impl Iterator<Item = u8> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(Self::light_of_bit(w * 64 + bit) as u8)
            })
        })
    }
}

impl BitOr for LightBitset {
    type Output = Self;

    fn bitor(mut self, rhs: Self) -> Self {
        self |= rhs;
        self
    }
}

impl BitOrAssign for LightBitset {
    fn bitor_assign(&mut self, rhs: Self) {
        for (a, b) in self.words.iter_mut().zip(rhs.words) {
            *a |= b;
        }
    }
}

// ============================================================================
// Record compaction
// ============================================================================

/// Outcome of one [`compact_records`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Light lists written to the record buffer (the all-lights block excluded)
    pub records_written: usize,
    /// Record bytes in use, the all-lights block included
    pub bytes_used: usize,
    /// Froxels that reused the list of the same column in the previous row
    pub reused_from_above: usize,
    /// First froxel that fell back to the all-lights block, if capacity ran out
    pub exhausted_at: Option<usize>,
    /// Size of the all-lights block at offset 0
    pub all_lights_count: usize,
}

/// Pack per-froxel bitsets into froxel entries and record bytes.
///
/// The union of all lights is written first, at offset 0; it is the fallback for
/// every froxel once `capacity` is exhausted. Consecutive froxels with identical
/// lists share one record block, as do froxels whose list equals the froxel
/// `row_stride` entries earlier.
///
/// `entries` and `records` must have the same length; `record_buffer` must hold at
/// least `capacity` bytes, and `capacity` must fit the all-lights block.
pub fn compact_records(
    records: &[LightBitset],
    row_stride: usize,
    entries: &mut [FroxelEntry],
    record_buffer: &mut [u8],
    capacity: usize,
) -> CompactionStats {
    debug_assert_eq!(records.len(), entries.len());
    debug_assert!(capacity <= record_buffer.len());

    let all_lights = records.iter().fold(LightBitset::EMPTY, |acc, r| acc | *r);
    let all_lights_count = all_lights.count();
    debug_assert!(all_lights_count <= MAX_LIGHT_COUNT && all_lights_count <= capacity);

    let mut offset = write_block(record_buffer, 0, &all_lights);
    let fallback = FroxelEntry::new(0, all_lights_count as u8);

    let mut stats = CompactionStats {
        all_lights_count,
        ..CompactionStats::default()
    };

    for i in 0..records.len() {
        let record = &records[i];
        if record.is_empty() {
            entries[i] = FroxelEntry::EMPTY;
            continue;
        }
        if i > 0 && records[i - 1] == *record {
            entries[i] = entries[i - 1];
            continue;
        }
        if i >= row_stride && records[i - row_stride] == *record {
            entries[i] = entries[i - row_stride];
            stats.reused_from_above += 1;
            continue;
        }

        let count = record.count();
        if offset + count > capacity {
            entries[i..].fill(fallback);
            stats.exhausted_at = Some(i);
            break;
        }
        entries[i] = FroxelEntry::new(offset as u16, count as u8);
        offset = write_block(record_buffer, offset, record);
        stats.records_written += 1;
    }

    stats.bytes_used = offset;
    stats
}

fn write_block(record_buffer: &mut [u8], offset: usize, lights: &LightBitset) -> usize {
    let mut end = offset;
    for light in lights.light_indices() {
        record_buffer[end] = light;
        end += 1;
    }
    end
}

// ============================================================================
// Tests
// ============================================================================
