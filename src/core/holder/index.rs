use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::AcqRel;
use std::sync::atomic::Ordering::Acquire;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::fence;

/// Number of derivation levels served by one allocator.
pub(crate) const LEVELS: u32 = 8;

/// Lanes packed into each counter word.
const LANES_PER_WORD: u32 = 4;

/// Bits per lane.
const LANE_BITS: u32 = 16;

/// Family-shared source of dense slot indices, one 16-bit lane per level.
///
/// Minting an index at level `L` advances the lane for `L` and every deeper
/// lane, so an index handed to an ancestor is reserved for every descendant
/// and a later mint at a deeper level can never collide with it. Keeping
/// the counters per level (rather than one global counter) keeps indices
/// dense at every level of the chain.
///
/// Lanes for levels 0-3 share the low word and advance in a single
/// read-modify-write; lanes 4-7 share the high word. A mint at a shallow
/// level updates the low word first, then catches the high word up behind a
/// full fence.
///
/// Lane overflow cannot occur: the family key budget caps successful mints
/// below `u16::MAX` and is enforced before any lane advances.
pub(crate) struct IndexAlloc {
  lo: AtomicU64,
  hi: AtomicU64,
}

impl IndexAlloc {
  #[inline]
  pub(crate) const fn new() -> Self {
    Self {
      lo: AtomicU64::new(0),
      hi: AtomicU64::new(0),
    }
  }

  /// Returns the next index for `level` and reserves it at every deeper
  /// level.
  ///
  /// # Ordering
  ///
  /// Each word advances with one `AcqRel` read-modify-write. The `SeqCst`
  /// fence keeps the high-word catch-up ordered after the low-word mint.
  pub(crate) fn next(&self, level: u8) -> u16 {
    let level: u32 = u32::from(level);

    debug_assert!(level < LEVELS);

    if level < LANES_PER_WORD {
      let prev: u64 = self.lo.fetch_add(lane_delta(level), AcqRel);

      fence(SeqCst);

      let _ignore: u64 = self.hi.fetch_add(lane_delta(0), AcqRel);

      lane_value(prev, level)
    } else {
      let lane: u32 = level - LANES_PER_WORD;
      let prev: u64 = self.hi.fetch_add(lane_delta(lane), AcqRel);

      lane_value(prev, lane)
    }
  }

  /// Snapshots the counter for `level` without advancing anything.
  pub(crate) fn read(&self, level: u8) -> u16 {
    let level: u32 = u32::from(level);

    debug_assert!(level < LEVELS);

    if level < LANES_PER_WORD {
      lane_value(self.lo.load(Acquire), level)
    } else {
      lane_value(self.hi.load(Acquire), level - LANES_PER_WORD)
    }
  }
}

/// Returns a delta advancing `lane` and every deeper lane of one word.
#[inline]
const fn lane_delta(lane: u32) -> u64 {
  let mut delta: u64 = 0;
  let mut index: u32 = lane;

  while index < LANES_PER_WORD {
    delta |= 1 << (index * LANE_BITS);
    index += 1;
  }

  delta
}

/// Extracts the 16-bit counter stored in `lane` of `word`.
#[inline]
const fn lane_value(word: u64, lane: u32) -> u16 {
  (word >> (lane * LANE_BITS)) as u16
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_lane_delta() {
    assert_eq!(lane_delta(0), 0x0001_0001_0001_0001);
    assert_eq!(lane_delta(1), 0x0001_0001_0001_0000);
    assert_eq!(lane_delta(3), 0x0001_0000_0000_0000);
  }

  #[test]
  fn test_mint_is_dense_per_level() {
    let alloc: IndexAlloc = IndexAlloc::new();

    for expected in 0..100 {
      assert_eq!(alloc.next(0), expected);
    }
  }

  #[test]
  fn test_mint_advances_deeper_levels() {
    let alloc: IndexAlloc = IndexAlloc::new();

    // Three level-0 mints reserve indices 0..3 at every level.
    for _ in 0..3 {
      let _ignore: u16 = alloc.next(0);
    }

    for level in 0..LEVELS as u8 {
      assert_eq!(alloc.read(level), 3);
    }

    // A level-5 mint continues from there, untouched at levels above.
    assert_eq!(alloc.next(5), 3);
    assert_eq!(alloc.read(0), 3);
    assert_eq!(alloc.read(4), 3);
    assert_eq!(alloc.read(5), 4);
    assert_eq!(alloc.read(7), 4);
  }

  #[test]
  fn test_mint_leaves_shallower_levels() {
    let alloc: IndexAlloc = IndexAlloc::new();

    assert_eq!(alloc.next(3), 0);
    assert_eq!(alloc.read(0), 0);
    assert_eq!(alloc.read(2), 0);
    assert_eq!(alloc.read(3), 1);
    assert_eq!(alloc.read(7), 1);
  }

  #[test]
  fn test_ancestor_index_reserved_for_descendant() {
    let alloc: IndexAlloc = IndexAlloc::new();

    // Index 0 minted at the root; a child mint must skip it.
    assert_eq!(alloc.next(0), 0);
    assert_eq!(alloc.next(1), 1);

    // And a grandchild mint skips both.
    assert_eq!(alloc.next(2), 2);
  }

  #[test]
  fn test_read_does_not_advance() {
    let alloc: IndexAlloc = IndexAlloc::new();

    let _ignore: u16 = alloc.next(0);

    assert_eq!(alloc.read(0), 1);
    assert_eq!(alloc.read(0), 1);
  }

  #[test]
  fn test_interleaved_levels_match_model() {
    let alloc: IndexAlloc = IndexAlloc::new();
    let mut model: [u16; LEVELS as usize] = [0; LEVELS as usize];

    let mint = |model: &mut [u16; LEVELS as usize], level: usize| -> u16 {
      let out: u16 = model[level];

      for lane in level..LEVELS as usize {
        model[lane] += 1;
      }

      out
    };

    for level in [0, 1, 1, 4, 2, 7, 0, 3, 5, 6, 1, 0] {
      assert_eq!(alloc.next(level as u8), mint(&mut model, level));
    }

    for level in 0..LEVELS as usize {
      assert_eq!(alloc.read(level as u8), model[level]);
    }
  }
}
