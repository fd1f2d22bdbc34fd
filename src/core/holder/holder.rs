//! Thread-safe typed extension holders.
//!
//! This module provides [`Holder`], a per-instance heterogeneous map keyed
//! by minted [`Key`]s and optimized for many concurrent readers, infrequent
//! writers, and small working sets.
//!
//! # Architecture
//!
//! Values live in a lazily created slot array indexed directly by key. The
//! read path is a pair of acquire loads; the write path is an atomic swap
//! on the slot cell, falling back to the holder mutex only to create,
//! grow, or trim the array.
//!
//! A resize swaps in a whole new array under the mutex. The swap is
//! bracketed by two increments of a generation counter, so its parity is
//! odd exactly while cells are in flight between arrays. A fast-path
//! writer re-reads the generation around its swap: an unchanged value
//! proves the write landed on the live array, anything else sends the
//! writer through the mutex to re-apply its write and reclaim whatever it
//! left on the superseded array.
//!
//! # Families
//!
//! Holders form families through [`derive`] and [`sibling`]. All holders
//! of a family share one index allocator and key budget, and a key minted
//! anywhere in the family is accepted by every member at the minting level
//! or deeper. Values never flow between holders except through the
//! one-shot `copy_values` snapshot at creation time.
//!
//! [`derive`]: Holder::derive
//! [`sibling`]: Holder::sibling

use crossbeam_epoch as epoch;
use crossbeam_epoch::Atomic;
use crossbeam_epoch::Guard;
use crossbeam_epoch::Owned;
use crossbeam_epoch::Shared;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use parking_lot::MutexGuard;
use std::any::Any;
use std::any::TypeId;
use std::any::type_name;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::AcqRel;
use std::sync::atomic::Ordering::Acquire;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::Ordering::Release;
use tracing::trace;

use crate::consts::MAX_LEVEL;
use crate::core::HolderError;
use crate::core::fatal;
use crate::core::holder::DynKey;
use crate::core::holder::DynValue;
use crate::core::holder::Family;
use crate::core::holder::Key;
use crate::core::holder::Slots;
use crate::core::holder::TypeWitness;
use crate::core::holder::initial_len;
use crate::core::holder::next_holder_id;
use crate::core::holder::required_len;

// -----------------------------------------------------------------------------
// Volatile State
// -----------------------------------------------------------------------------

/// Frequently accessed holder state, cache-padded as one unit.
#[repr(C)]
struct Volatile {
  /// Current slot array; null until the first write.
  array: Atomic<Slots>,
  /// Structural-change counter; odd while an array swap is in flight.
  resize_gen: AtomicU64,
}

// -----------------------------------------------------------------------------
// Holder
// -----------------------------------------------------------------------------

/// A thread-safe, per-instance typed extension container.
///
/// Every holder stores its own values; what holders of one family share is
/// the *key space*. Reads never block. Writes block only on a structural
/// change of the same holder, so writers on different holders never
/// contend.
pub struct Holder {
  /// Process-wide unique identifier of this holder.
  id: u64,
  /// Depth in the family derivation chain; a root sits at 0.
  level: u8,
  /// Family-shared allocator and key budget.
  family: triomphe::Arc<Family>,
  /// Serializes array creation, growth, trim, and write repair.
  lock: Mutex<()>,
  volatile: CachePadded<Volatile>,
}

impl Holder {
  /// Creates a new family root at level 0.
  #[must_use]
  pub fn new() -> Self {
    let id: u64 = next_holder_id();

    Self::with_family(id, 0, triomphe::Arc::new(Family::new(id)), Atomic::null())
  }

  #[inline]
  fn with_family(
    id: u64,
    level: u8,
    family: triomphe::Arc<Family>,
    array: Atomic<Slots>,
  ) -> Self {
    Self {
      id,
      level,
      family,
      lock: Mutex::new(()),
      volatile: CachePadded::new(Volatile {
        array,
        resize_gen: AtomicU64::new(0),
      }),
    }
  }

  /// Returns the process-wide identifier of this holder.
  #[inline]
  pub const fn id(&self) -> u64 {
    self.id
  }

  /// Returns this holder's depth in its family; a root sits at 0.
  #[inline]
  pub const fn level(&self) -> u8 {
    self.level
  }

  // ---------------------------------------------------------------------------
  // Key Minting
  // ---------------------------------------------------------------------------

  /// Mints a typed key valid for this holder and its whole subtree.
  ///
  /// # Errors
  ///
  /// Returns [`HolderError::KeysExhausted`] when the family key budget is
  /// spent.
  pub fn request_key<T>(&self) -> Result<Key<T>, HolderError>
  where
    T: Any + Send + Sync,
  {
    self
      .request_key_dyn(TypeWitness::of::<T>())
      .map(Key::from_raw)
  }

  /// Mints a type-erased key for `witness`.
  ///
  /// The budget is charged before the allocator advances, so a rejected
  /// request consumes no index at any level.
  ///
  /// # Errors
  ///
  /// Returns [`HolderError::KeysExhausted`] when the family key budget is
  /// spent.
  pub fn request_key_dyn(&self, witness: TypeWitness) -> Result<DynKey, HolderError> {
    if !self.family.reserve_key() {
      return Err(HolderError::KeysExhausted);
    }

    let index: u16 = self.family.alloc.next(self.level);

    Ok(DynKey::new(witness, index, self.id, self.family.id, self.level))
  }

  /// Checks that `key` is valid for this holder.
  ///
  /// Keys flow down a derivation chain, never up, and freely across
  /// siblings once both descend from the level the key was minted at.
  fn validate(&self, key: &DynKey) -> Result<(), HolderError> {
    if key.holder() == self.id {
      return Ok(());
    }

    if key.family() == self.family.id && key.level() <= self.level {
      return Ok(());
    }

    Err(HolderError::ForeignKey {
      key_family: key.family(),
      key_level: key.level(),
      holder_family: self.family.id,
      holder_level: self.level,
    })
  }

  // ---------------------------------------------------------------------------
  // Reading
  // ---------------------------------------------------------------------------

  /// Returns the value stored for `key`, if any.
  ///
  /// Never blocks and never takes the holder mutex.
  ///
  /// # Ordering
  ///
  /// Acquire loads on the array pointer and the slot cell pair with the
  /// release stores of the publishing writer, so an observed value
  /// happens-after the write that stored it.
  ///
  /// # Errors
  ///
  /// Returns [`HolderError::ForeignKey`] if `key` is not valid here.
  pub fn get<T>(&self, key: &Key<T>) -> Result<Option<Arc<T>>, HolderError>
  where
    T: Any + Send + Sync,
  {
    match self.get_dyn(key.as_dyn())? {
      None => Ok(None),
      Some(value) => downcast::<T>(value).map(Some),
    }
  }

  /// Returns the erased value stored for `key`, if any.
  ///
  /// # Errors
  ///
  /// Returns [`HolderError::ForeignKey`] if `key` is not valid here.
  pub fn get_dyn(&self, key: &DynKey) -> Result<Option<DynValue>, HolderError> {
    self.validate(key)?;

    let guard: Guard = epoch::pin();
    let array: Shared<'_, Slots> = self.volatile.array.load(Acquire, &guard);

    // SAFETY: A published array is reclaimed only after every pinned guard
    //         drops, so the reference is valid for the life of `guard`.
    let Some(slots) = (unsafe { array.as_ref() }) else {
      return Ok(None);
    };

    let Some(slot) = slots.slot(usize::from(key.index())) else {
      return Ok(None);
    };

    let cell: Shared<'_, DynValue> = slot.load(Acquire, &guard);

    // SAFETY: Displaced cells are destroyed through the guard, so a loaded
    //         cell stays valid while `guard` is pinned.
    Ok(unsafe { cell.as_ref() }.cloned())
  }

  /// Returns the value for `key`, or builds one with `default`.
  ///
  /// The default runs on the calling thread, is not stored, and is built
  /// again on every miss.
  ///
  /// # Errors
  ///
  /// Returns [`HolderError::ForeignKey`] if `key` is not valid here.
  pub fn get_or_else<T, F>(&self, key: &Key<T>, default: F) -> Result<Arc<T>, HolderError>
  where
    T: Any + Send + Sync,
    F: FnOnce() -> T,
  {
    match self.get(key)? {
      Some(value) => Ok(value),
      None => Ok(Arc::new(default())),
    }
  }

  // ---------------------------------------------------------------------------
  // Writing
  // ---------------------------------------------------------------------------

  /// Stores `value` for `key`, returning the displaced value.
  ///
  /// Uncontended writes are a single atomic swap on the slot cell. The
  /// holder mutex is taken only to create or replace the array, or to
  /// repair a write that raced such a replacement.
  ///
  /// # Errors
  ///
  /// Returns [`HolderError::ForeignKey`] if `key` is not valid here.
  pub fn set<T>(&self, key: &Key<T>, value: T) -> Result<Option<Arc<T>>, HolderError>
  where
    T: Any + Send + Sync,
  {
    match self.put(key.as_dyn(), Arc::new(value))? {
      None => Ok(None),
      Some(prev) => downcast::<T>(prev).map(Some),
    }
  }

  /// Stores an erased `value` for `key`, returning the displaced value.
  ///
  /// # Errors
  ///
  /// Returns [`HolderError::ForeignKey`] if `key` is not valid here, and
  /// [`HolderError::TypeMismatch`] if the runtime type of `value` is not
  /// the key's witnessed type.
  pub fn set_dyn(&self, key: &DynKey, value: DynValue) -> Result<Option<DynValue>, HolderError> {
    check_witness(key, &value)?;
    self.put(key, value)
  }

  /// Stores `value` for `key` only when no value is present.
  ///
  /// Returns `true` when this call performed the absent-to-present
  /// transition.
  ///
  /// # Errors
  ///
  /// Returns [`HolderError::ForeignKey`] if `key` is not valid here.
  pub fn set_if_absent<T>(&self, key: &Key<T>, value: T) -> Result<bool, HolderError>
  where
    T: Any + Send + Sync,
  {
    self.put_if_absent(key.as_dyn(), Arc::new(value))
  }

  /// Stores an erased `value` for `key` only when no value is present.
  ///
  /// # Errors
  ///
  /// Returns [`HolderError::ForeignKey`] if `key` is not valid here, and
  /// [`HolderError::TypeMismatch`] if the runtime type of `value` is not
  /// the key's witnessed type.
  pub fn set_dyn_if_absent(&self, key: &DynKey, value: DynValue) -> Result<bool, HolderError> {
    check_witness(key, &value)?;
    self.put_if_absent(key, value)
  }

  /// Erased write path shared by [`set`][Self::set] and
  /// [`set_dyn`][Self::set_dyn].
  ///
  /// # Ordering
  ///
  /// The generation counter is read before the array pointer: a generation
  /// observed even proves the subsequently loaded pointer was current at
  /// that moment, and the re-read after the swap proves no replacement ran
  /// in between. Both proofs together pin the swap to the live array.
  fn put(&self, key: &DynKey, value: DynValue) -> Result<Option<DynValue>, HolderError> {
    self.validate(key)?;

    let index: usize = usize::from(key.index());
    let guard: Guard = epoch::pin();
    let gen_before: u64 = self.volatile.resize_gen.load(Acquire);

    if gen_before & 1 == 0 {
      let array: Shared<'_, Slots> = self.volatile.array.load(Acquire, &guard);

      // SAFETY: A published array outlives every pinned guard.
      if let Some(slots) = unsafe { array.as_ref() } {
        if let Some(slot) = slots.slot(index) {
          let prev: Shared<'_, DynValue> = slot.swap(Owned::new(value.clone()), AcqRel, &guard);
          let gen_after: u64 = self.volatile.resize_gen.load(Acquire);

          // SAFETY: The swap transferred cell ownership to this thread;
          //         readers may still hold it, so destruction is deferred.
          let displaced: Option<DynValue> = unsafe { take_cell(prev, &guard) };

          if gen_before == gen_after {
            return Ok(displaced);
          }

          // An array replacement raced the swap above. Redo the write
          // under the lock and report the fast-path displacement as the
          // prior value.
          return Ok(self.repair(index, value, displaced, slots, &guard));
        }
      }
    }

    Ok(self.put_slow(index, value, &guard))
  }

  /// Erased conditional write path shared by
  /// [`set_if_absent`][Self::set_if_absent] and
  /// [`set_dyn_if_absent`][Self::set_dyn_if_absent].
  ///
  /// A failed compare-exchange settles the call immediately: the slot was
  /// occupied, and no resize can make it unoccupied again.
  fn put_if_absent(&self, key: &DynKey, value: DynValue) -> Result<bool, HolderError> {
    self.validate(key)?;

    let index: usize = usize::from(key.index());
    let guard: Guard = epoch::pin();
    let gen_before: u64 = self.volatile.resize_gen.load(Acquire);

    if gen_before & 1 == 0 {
      let array: Shared<'_, Slots> = self.volatile.array.load(Acquire, &guard);

      // SAFETY: A published array outlives every pinned guard.
      if let Some(slots) = unsafe { array.as_ref() } {
        if let Some(slot) = slots.slot(index) {
          let result = slot.compare_exchange(
            Shared::null(),
            Owned::new(value.clone()),
            AcqRel,
            Acquire,
            &guard,
          );

          if result.is_err() {
            return Ok(false);
          }

          let gen_after: u64 = self.volatile.resize_gen.load(Acquire);

          if gen_before == gen_after {
            return Ok(true);
          }

          // The compare-exchange may have won against a slot the
          // replacement sweep had already emptied; settle the outcome
          // against the current array.
          return Ok(self.repair_absent(index, value, slots, &guard));
        }
      }
    }

    Ok(self.put_if_absent_slow(index, value, &guard))
  }

  /// Slow write path: create, grow, or write under the lock.
  fn put_slow(&self, index: usize, value: DynValue, guard: &Guard) -> Option<DynValue> {
    let _lock: MutexGuard<'_, ()> = self.lock.lock();

    self.install(index, value, guard)
  }

  /// Slow conditional write path.
  fn put_if_absent_slow(&self, index: usize, value: DynValue, guard: &Guard) -> bool {
    let _lock: MutexGuard<'_, ()> = self.lock.lock();

    self.install_if_absent(index, value, guard)
  }

  /// Re-applies a fast-path write that raced an array replacement.
  ///
  /// The raced swap landed on an array that was being (or has been)
  /// superseded, and the replacement sweep may or may not have carried the
  /// written cell across. Under the lock: reclaim whatever this write
  /// stranded on the raced array, then install the value on the current
  /// one.
  ///
  /// Returns the fast-path displacement when there was one. A null
  /// fast-path displacement means the sweep claimed the slot first, in
  /// which case the prior value travelled into the replacement array and
  /// comes back out of the repair swap instead; both cannot be non-null.
  fn repair(
    &self,
    index: usize,
    value: DynValue,
    displaced: Option<DynValue>,
    raced: &Slots,
    guard: &Guard,
  ) -> Option<DynValue> {
    let _lock: MutexGuard<'_, ()> = self.lock.lock();

    self.reclaim_stranded(raced, index, guard);

    let repair_prev: Option<DynValue> = self.install(index, value.clone(), guard);

    if displaced.is_some() {
      return displaced;
    }

    match repair_prev {
      // The sweep carried our own write across; the slot was empty before.
      Some(prev) if Arc::ptr_eq(&prev, &value) => None,
      other => other,
    }
  }

  /// Settles an absent-to-present transition that raced a replacement.
  ///
  /// The fast-path compare-exchange may have won on an array that was
  /// already superseded, where the sweep had nulled a slot whose real
  /// value travelled on. The authoritative slot is on the current array:
  /// empty means the transition stands and is re-applied, our own carried
  /// value means the sweep already applied it, anything else means the
  /// slot was occupied all along.
  fn repair_absent(&self, index: usize, value: DynValue, raced: &Slots, guard: &Guard) -> bool {
    let _lock: MutexGuard<'_, ()> = self.lock.lock();

    self.reclaim_stranded(raced, index, guard);

    let array: Shared<'_, Slots> = self.volatile.array.load(Acquire, guard);

    // SAFETY: Arrays are replaced only under the held lock.
    let Some(slots) = (unsafe { array.as_ref() }) else {
      self.create_array(index, value);
      return true;
    };

    let Some(slot) = slots.slot(index) else {
      // Trimmed below this index; the slot is empty by construction.
      return self.install_if_absent(index, value, guard);
    };

    let current: Shared<'_, DynValue> = slot.load(Acquire, guard);

    // SAFETY: Cells stay valid while the guard is pinned.
    match unsafe { current.as_ref() } {
      None => slot
        .compare_exchange(Shared::null(), Owned::new(value), AcqRel, Acquire, guard)
        .is_ok(),
      Some(carried) => Arc::ptr_eq(carried, &value),
    }
  }

  /// Takes back whatever a raced fast-path write left on a superseded
  /// array.
  ///
  /// Requires the holder lock. The caller's guard must have been pinned
  /// since before the raced write, which is what keeps the superseded
  /// array alive here.
  fn reclaim_stranded(&self, raced: &Slots, index: usize, guard: &Guard) {
    let Some(slot) = raced.slot(index) else {
      return;
    };

    let stranded: Shared<'_, DynValue> = slot.swap(Shared::null(), AcqRel, guard);

    if !stranded.is_null() {
      // SAFETY: The swap transferred ownership of the stranded cell.
      unsafe { guard.defer_destroy(stranded) };
    }
  }

  /// Installs `value` at `index` on the current array, growing as needed.
  ///
  /// Requires the holder lock: the array pointer cannot change underneath
  /// this method, so a plain swap settles the write.
  fn install(&self, index: usize, value: DynValue, guard: &Guard) -> Option<DynValue> {
    let mut array: Shared<'_, Slots> = self.volatile.array.load(Acquire, guard);

    // SAFETY: Arrays are replaced only under the held lock.
    let Some(mut slots) = (unsafe { array.as_ref() }) else {
      self.create_array(index, value);
      return None;
    };

    if slots.slot(index).is_none() {
      self.replace_array(slots, array, required_len(index), guard);

      array = self.volatile.array.load(Acquire, guard);

      // SAFETY: Just published under this lock.
      slots = match unsafe { array.as_ref() } {
        Some(slots) => slots,
        None => fatal!("slot array vanished during growth"),
      };
    }

    let Some(slot) = slots.slot(index) else {
      fatal!("grown slot array shorter than its target index");
    };

    let prev: Shared<'_, DynValue> = slot.swap(Owned::new(value), AcqRel, guard);

    // SAFETY: The swap transferred ownership of the displaced cell.
    unsafe { take_cell(prev, guard) }
  }

  /// Installs `value` at `index` only when the slot is empty.
  ///
  /// Requires the holder lock. Fast-path writers of plain `set` may still
  /// race the compare-exchange; whoever fills the slot first wins.
  fn install_if_absent(&self, index: usize, value: DynValue, guard: &Guard) -> bool {
    let mut array: Shared<'_, Slots> = self.volatile.array.load(Acquire, guard);

    // SAFETY: Arrays are replaced only under the held lock.
    let Some(mut slots) = (unsafe { array.as_ref() }) else {
      self.create_array(index, value);
      return true;
    };

    if slots.slot(index).is_none() {
      self.replace_array(slots, array, required_len(index), guard);

      array = self.volatile.array.load(Acquire, guard);

      // SAFETY: Just published under this lock.
      slots = match unsafe { array.as_ref() } {
        Some(slots) => slots,
        None => fatal!("slot array vanished during growth"),
      };
    }

    let Some(slot) = slots.slot(index) else {
      fatal!("grown slot array shorter than its target index");
    };

    slot
      .compare_exchange(Shared::null(), Owned::new(value), AcqRel, Acquire, guard)
      .is_ok()
  }

  /// Creates the initial array with `value` placed, then publishes it.
  ///
  /// Requires the holder lock.
  fn create_array(&self, index: usize, value: DynValue) {
    let len: NonZeroUsize = nonzero(initial_len(index));
    let slots: Slots = Slots::new(len);

    let Some(slot) = slots.slot(index) else {
      fatal!("fresh slot array shorter than its target index");
    };

    // Not yet published; relaxed stores cannot be observed early.
    slot.store(Owned::new(value), Relaxed);
    self.volatile.array.store(Owned::new(slots), Release);

    trace!(holder = self.id, len = len.get(), "slot array created");
  }

  /// Swaps in a new array of `len` slots, carrying every live cell across.
  ///
  /// Requires the holder lock. The transfer is bracketed by generation
  /// increments so its parity is odd for exactly the duration of the swap;
  /// fast-path writers that observe the bracket re-apply their write.
  ///
  /// # Ordering
  ///
  /// Cells move by `AcqRel` swap-to-null so each keeps a single owner even
  /// when a raced fast-path writer lands on the old array mid-transfer.
  /// The replacement array is published with `Release` before the closing
  /// increment.
  fn replace_array(&self, old: &Slots, old_ptr: Shared<'_, Slots>, len: usize, guard: &Guard) {
    let _opening: u64 = self.volatile.resize_gen.fetch_add(1, AcqRel);

    let next: Slots = Slots::new(nonzero(len));
    let new_cells: &[Atomic<DynValue>] = next.as_slice();

    for (index, cell) in old.as_slice().iter().enumerate() {
      let taken: Shared<'_, DynValue> = cell.swap(Shared::null(), AcqRel, guard);

      if taken.is_null() {
        continue;
      }

      if index < new_cells.len() {
        new_cells[index].store(taken, Relaxed);
      } else {
        // Trimmed past the end; the cell is no longer reachable.
        // SAFETY: The swap above transferred ownership of the cell.
        unsafe { guard.defer_destroy(taken) };
      }
    }

    self.volatile.array.store(Owned::new(next), Release);

    // SAFETY: Unreachable for new readers once the store above is visible;
    //         pinned readers keep the memory alive until their guards drop.
    unsafe { guard.defer_destroy(old_ptr) };

    let _closing: u64 = self.volatile.resize_gen.fetch_add(1, AcqRel);

    trace!(
      holder = self.id,
      from = old.len().get(),
      to = len,
      "slot array replaced",
    );
  }

  // ---------------------------------------------------------------------------
  // Lifecycle
  // ---------------------------------------------------------------------------

  /// Creates a holder one level deeper in this family.
  ///
  /// The child accepts every key this holder accepts plus its own mints,
  /// stores values independently, and shares the family allocator and key
  /// budget. With `copy_values` the child starts from a snapshot of this
  /// holder's current values; the snapshot establishes no ordering with
  /// later parent writes.
  ///
  /// # Errors
  ///
  /// Returns [`HolderError::DepthExceeded`] when this holder is already at
  /// the maximum level.
  pub fn derive(&self, copy_values: bool) -> Result<Holder, HolderError> {
    if self.level >= MAX_LEVEL {
      return Err(HolderError::DepthExceeded { level: self.level });
    }

    let array: Atomic<Slots> = if copy_values {
      self.snapshot()
    } else {
      Atomic::null()
    };

    let child: Holder = Self::with_family(
      next_holder_id(),
      self.level + 1,
      triomphe::Arc::clone(&self.family),
      array,
    );

    trace!(
      parent = self.id,
      child = child.id,
      level = child.level,
      "holder derived",
    );

    Ok(child)
  }

  /// Creates a holder beside this one.
  ///
  /// A sibling of a family root is a fresh root with its own family, key
  /// space, and budget. A sibling of any deeper holder shares this
  /// holder's family and level, so keys minted by either are valid at
  /// both. `copy_values` snapshots as in [`derive`][Self::derive].
  pub fn sibling(&self, copy_values: bool) -> Holder {
    let id: u64 = next_holder_id();

    let family: triomphe::Arc<Family> = if self.level == 0 {
      triomphe::Arc::new(Family::new(id))
    } else {
      triomphe::Arc::clone(&self.family)
    };

    let array: Atomic<Slots> = if copy_values {
      self.snapshot()
    } else {
      Atomic::null()
    };

    let out: Holder = Self::with_family(id, self.level, family, array);

    trace!(origin = self.id, sibling = out.id, "holder sibling created");

    out
  }

  /// Resizes the array to exactly the high-water mark of indices minted
  /// for this holder's level, releasing it outright when no key has ever
  /// been valid here.
  ///
  /// Intended for quiescent moments after setup. Concurrent writers are
  /// tolerated and repaired like any other replacement race; concurrent
  /// key minting merely wastes the trim.
  pub fn trim(&self) {
    let guard: Guard = epoch::pin();
    let _lock: MutexGuard<'_, ()> = self.lock.lock();

    let used: usize = usize::from(self.family.alloc.read(self.level));
    let array: Shared<'_, Slots> = self.volatile.array.load(Acquire, &guard);

    // SAFETY: Arrays are replaced only under the held lock.
    let Some(slots) = (unsafe { array.as_ref() }) else {
      return;
    };

    if used == slots.len().get() {
      return;
    }

    if used == 0 {
      self.release_array(slots, array, &guard);
      return;
    }

    self.replace_array(slots, array, used, &guard);
  }

  /// Drops the array entirely; no key has ever been valid for this holder.
  ///
  /// Requires the holder lock.
  fn release_array(&self, slots: &Slots, array: Shared<'_, Slots>, guard: &Guard) {
    let _opening: u64 = self.volatile.resize_gen.fetch_add(1, AcqRel);

    for cell in slots.as_slice() {
      let taken: Shared<'_, DynValue> = cell.swap(Shared::null(), AcqRel, guard);

      if !taken.is_null() {
        // SAFETY: The swap transferred ownership of the cell.
        unsafe { guard.defer_destroy(taken) };
      }
    }

    self.volatile.array.store(Shared::null(), Release);

    // SAFETY: Unreachable once the null store above is visible.
    unsafe { guard.defer_destroy(array) };

    let _closing: u64 = self.volatile.resize_gen.fetch_add(1, AcqRel);

    trace!(holder = self.id, "slot array released");
  }

  /// Takes a one-shot snapshot of the current values as a fresh array.
  ///
  /// Cells are cloned, not shared: the snapshot and the source array own
  /// disjoint cells referring to the same values.
  fn snapshot(&self) -> Atomic<Slots> {
    let guard: Guard = epoch::pin();
    let array: Shared<'_, Slots> = self.volatile.array.load(Acquire, &guard);

    // SAFETY: A published array outlives every pinned guard.
    let Some(slots) = (unsafe { array.as_ref() }) else {
      return Atomic::null();
    };

    let copy: Slots = Slots::new(slots.len());

    for (cell, target) in slots.as_slice().iter().zip(copy.as_slice()) {
      let value: Shared<'_, DynValue> = cell.load(Acquire, &guard);

      // SAFETY: Displaced cells are destroyed through the guard, so the
      //         loaded cell stays valid while `guard` is pinned.
      if let Some(value) = unsafe { value.as_ref() } {
        target.store(Owned::new(value.clone()), Relaxed);
      }
    }

    Atomic::new(copy)
  }
}

impl Default for Holder {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for Holder {
  fn drop(&mut self) {
    let guard: Guard = epoch::pin();
    let array: Shared<'_, Slots> = self.volatile.array.load(Acquire, &guard);

    // SAFETY: We have exclusive access during drop.
    let Some(slots) = (unsafe { array.as_ref() }) else {
      return;
    };

    for cell in slots.as_slice() {
      let value: Shared<'_, DynValue> = cell.swap(Shared::null(), Acquire, &guard);

      // SAFETY: Exclusive access; no reader can observe these cells.
      if let Some(owned) = unsafe { value.try_into_owned() } {
        drop(owned);
      }
    }

    // SAFETY: The array pointer can no longer be observed either.
    if let Some(owned) = unsafe { array.try_into_owned() } {
      drop(owned);
    }
  }
}

impl Debug for Holder {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.debug_struct("Holder")
      .field("id", &self.id)
      .field("family", &self.family.id)
      .field("level", &self.level)
      .field("resize_gen", &self.volatile.resize_gen)
      .finish_non_exhaustive()
  }
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

/// Clones the value out of a displaced cell and defers its destruction.
///
/// # Safety
///
/// The caller must own `cell`, i.e. have atomically displaced it from a
/// slot while `guard` was pinned.
unsafe fn take_cell(cell: Shared<'_, DynValue>, guard: &Guard) -> Option<DynValue> {
  // SAFETY: The cell is valid while `guard` is pinned.
  let value: Option<DynValue> = unsafe { cell.as_ref() }.cloned();

  if !cell.is_null() {
    // SAFETY: Ownership was transferred by the displacing swap.
    unsafe { guard.defer_destroy(cell) };
  }

  value
}

/// Checks an erased value's runtime type against the key's witness.
#[inline]
fn check_witness(key: &DynKey, value: &DynValue) -> Result<(), HolderError> {
  let actual: TypeId = value.as_ref().type_id();

  if actual == key.witness().id() {
    Ok(())
  } else {
    Err(HolderError::TypeMismatch {
      expected: key.witness().name(),
    })
  }
}

/// Recovers the typed form of a stored value.
#[inline]
fn downcast<T>(value: DynValue) -> Result<Arc<T>, HolderError>
where
  T: Any + Send + Sync,
{
  value.downcast().map_err(|_| HolderError::TypeMismatch {
    expected: type_name::<T>(),
  })
}

#[inline]
fn nonzero(len: usize) -> NonZeroUsize {
  match NonZeroUsize::new(len) {
    Some(len) => len,
    None => fatal!("zero-length slot array"),
  }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
