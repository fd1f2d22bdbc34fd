use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;

use crate::consts::MAX_FAMILY_KEYS;
use crate::core::holder::IndexAlloc;

/// Process-wide source of holder identifiers.
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Mints a fresh process-wide holder id.
#[inline]
pub(crate) fn next_holder_id() -> u64 {
  NEXT_ID.fetch_add(1, Relaxed)
}

/// State shared by every holder descended from one family root.
///
/// The family is the unit of key validity: its id stamps every minted key,
/// the allocator hands out dense per-level slot indices, and `requested`
/// enforces the family-wide key budget. Holders share the record by
/// ownership, never through parent pointers, so a family stays alive as
/// long as any of its holders does.
pub(crate) struct Family {
  /// Identifier of the family root holder.
  pub(crate) id: u64,
  /// Shared index allocator, one lane per derivation level.
  pub(crate) alloc: IndexAlloc,
  /// Total keys requested across the family.
  requested: AtomicU32,
}

impl Family {
  #[inline]
  pub(crate) fn new(id: u64) -> Self {
    Self {
      id,
      alloc: IndexAlloc::new(),
      requested: AtomicU32::new(0),
    }
  }

  /// Reserves one key from the family budget.
  ///
  /// Runs before any allocator lane advances, which is what keeps the
  /// 16-bit lanes from ever overflowing.
  ///
  /// # Implementation
  ///
  /// 1. Optimistically increment the request counter
  /// 2. If the count stays below the budget, the reservation holds
  /// 3. Otherwise, use a CAS loop to undo the increment
  ///
  /// # Ordering
  ///
  /// `Relaxed` throughout: the counter needs atomicity only, and the budget
  /// itself is a constant.
  pub(crate) fn reserve_key(&self) -> bool {
    let prev: u32 = self.requested.fetch_add(1, Relaxed);

    if prev < MAX_FAMILY_KEYS - 1 {
      return true;
    }

    let mut current: u32 = prev + 1;

    loop {
      match self
        .requested
        .compare_exchange_weak(current, current - 1, Relaxed, Relaxed)
      {
        Ok(_) => break,
        Err(next) => current = next,
      }
    }

    false
  }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
