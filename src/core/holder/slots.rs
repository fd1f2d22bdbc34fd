use crossbeam_epoch::Atomic;
use crossbeam_utils::CachePadded;
use std::alloc::Layout;
use std::alloc::alloc;
use std::alloc::dealloc;
use std::alloc::handle_alloc_error;
use std::any::Any;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::slice;
use std::sync::Arc;

use crate::consts::MIN_SLOTS;
use crate::core::fatal;

/// A stored extension value, type-erased behind its key's witness.
pub type DynValue = Arc<dyn Any + Send + Sync>;

/// The assumed size of a cache line in bytes.
const CACHE_LINE: usize = size_of::<CachePadded<u8>>();

/// Returns the slot count for an array that must reach `index`.
///
/// Half again over the bare requirement, so a run of ascending indices
/// amortizes to a constant number of reallocations.
#[inline]
pub(crate) const fn required_len(index: usize) -> usize {
  (index + 1) + ((index + 1) >> 1)
}

/// Returns the slot count for a fresh array that must reach `index`.
#[inline]
pub(crate) const fn initial_len(index: usize) -> usize {
  let required: usize = required_len(index);

  if required < MIN_SLOTS { MIN_SLOTS } else { required }
}

/// A fixed-length array of atomic value cells.
///
/// The array owns its backing memory but never the cells its slots point
/// to: a cell belongs to the holder protocol, which transfers it between
/// arrays by swap and reclaims it through an epoch guard once displaced.
/// Only the array pointer itself is shared between threads, and it is
/// replaced exclusively under the holder mutex.
#[repr(C)]
pub(crate) struct Slots {
  ptr: NonNull<Atomic<DynValue>>,
  len: NonZeroUsize,
}

impl Slots {
  /// Allocates an array of `len` null cells.
  pub(crate) fn new(len: NonZeroUsize) -> Self {
    let layout: Layout = Self::layout(len);

    // SAFETY: The layout is guaranteed to have a non-zero size.
    let target: *mut u8 = unsafe { alloc(layout) };

    let Some(nonnull) = NonNull::new(target) else {
      handle_alloc_error(layout);
    };

    let ptr: NonNull<Atomic<DynValue>> = nonnull.cast();

    for index in 0..len.get() {
      // SAFETY: `index` is within the allocation created above.
      unsafe { ptr.add(index).write(Atomic::null()) };
    }

    Self { ptr, len }
  }

  /// Returns the total number of slots in the array.
  #[inline]
  pub(crate) const fn len(&self) -> NonZeroUsize {
    self.len
  }

  /// Returns the cell at `index`, or `None` when past the end.
  #[inline]
  pub(crate) fn slot(&self, index: usize) -> Option<&Atomic<DynValue>> {
    self.as_slice().get(index)
  }

  /// Extracts a slice containing every cell.
  #[inline]
  pub(crate) const fn as_slice(&self) -> &[Atomic<DynValue>] {
    // SAFETY: The buffer holds exactly `len` initialized cells.
    unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len.get()) }
  }

  #[inline]
  fn layout(len: NonZeroUsize) -> Layout {
    let mem_bytes: usize = len.get().strict_mul(size_of::<Atomic<DynValue>>());
    let mem_align: usize = mem_bytes.next_multiple_of(CACHE_LINE);

    match Layout::from_size_align(mem_align, CACHE_LINE) {
      Ok(layout) if layout.size() != 0 => layout,
      Ok(_) => fatal!("invalid slot array layout"),
      Err(error) => fatal!(error),
    }
  }
}

impl Drop for Slots {
  fn drop(&mut self) {
    let target: *mut u8 = self.ptr.as_ptr().cast();
    let layout: Layout = Self::layout(self.len);

    // SAFETY: The pointer was allocated by the global allocator using this
    //         exact layout. We're the sole owner at drop time. Cells are
    //         reclaimed by the holder protocol, never here.
    unsafe { dealloc(target, layout) }
  }
}

// SAFETY: `Slots` is safe to transfer across thread boundaries because all
//         cell accesses are atomic and cell contents are `Send + Sync`.
unsafe impl Send for Slots {}

// SAFETY: `Slots` is safe to share between threads for the same reason.
unsafe impl Sync for Slots {}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use crossbeam_epoch as epoch;
  use crossbeam_epoch::Guard;
  use std::sync::atomic::Ordering::Relaxed;

  use super::*;

  #[test]
  fn test_required_len() {
    assert_eq!(required_len(0), 1);
    assert_eq!(required_len(1), 3);
    assert_eq!(required_len(9), 15);
    assert_eq!(required_len(19_999), 30_000);
  }

  #[test]
  fn test_initial_len_floors_at_minimum() {
    assert_eq!(initial_len(0), MIN_SLOTS);
    assert_eq!(initial_len(5), MIN_SLOTS);
    assert_eq!(initial_len(6), 10);
    assert_eq!(initial_len(9), 15);
  }

  #[test]
  fn test_alignment() {
    for len in [1, 7, 10, 100, 1000] {
      let slots: Slots = Slots::new(NonZeroUsize::new(len).unwrap());

      assert_eq!(slots.as_slice().as_ptr().addr() % CACHE_LINE, 0);
    }
  }

  #[test]
  fn test_new_cells_are_null() {
    let slots: Slots = Slots::new(NonZeroUsize::new(16).unwrap());
    let guard: Guard = epoch::pin();

    for cell in slots.as_slice() {
      assert!(cell.load(Relaxed, &guard).is_null());
    }
  }

  #[test]
  fn test_slot_bounds() {
    let slots: Slots = Slots::new(NonZeroUsize::new(4).unwrap());

    assert!(slots.slot(0).is_some());
    assert!(slots.slot(3).is_some());
    assert!(slots.slot(4).is_none());
  }
}
