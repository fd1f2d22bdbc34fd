use std::any::Any;
use std::any::TypeId;
use std::any::type_name;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::marker::PhantomData;

/// Runtime type evidence carried by a key.
///
/// The witness pins the exact type a key's slot may hold; dynamic writes
/// are checked against it, typed writes satisfy it by construction. To
/// store a closed set of concrete types behind one key, mint the key at an
/// enum or boxed trait-object type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeWitness {
  id: TypeId,
  name: &'static str,
}

impl TypeWitness {
  /// Builds the witness for `T`.
  #[inline]
  #[must_use]
  pub fn of<T>() -> Self
  where
    T: Any,
  {
    Self {
      id: TypeId::of::<T>(),
      name: type_name::<T>(),
    }
  }

  /// Returns the witnessed [`TypeId`].
  #[inline]
  pub const fn id(&self) -> TypeId {
    self.id
  }

  /// Returns the witnessed type name. Diagnostics only; names are not
  /// unique across crate versions.
  #[inline]
  pub const fn name(&self) -> &'static str {
    self.name
  }
}

// -----------------------------------------------------------------------------
// Dynamic Key
// -----------------------------------------------------------------------------

/// A type-erased extension key: a slot index plus minting provenance.
///
/// Dynamic keys are what registries hold when value types are only known at
/// registration time; [`Key`] wraps one with a compile-time type. The
/// provenance decides which holders accept the key: the minting holder
/// itself, and every holder of the same family at the minting level or
/// deeper.
#[derive(Clone, Copy, Debug)]
pub struct DynKey {
  witness: TypeWitness,
  index: u16,
  holder: u64,
  family: u64,
  level: u8,
}

impl DynKey {
  #[inline]
  pub(crate) const fn new(
    witness: TypeWitness,
    index: u16,
    holder: u64,
    family: u64,
    level: u8,
  ) -> Self {
    Self {
      witness,
      index,
      holder,
      family,
      level,
    }
  }

  /// Returns the slot index assigned at mint time.
  #[inline]
  pub const fn index(&self) -> u16 {
    self.index
  }

  /// Returns the level of the holder that minted this key.
  #[inline]
  pub const fn level(&self) -> u8 {
    self.level
  }

  /// Returns the type witness this key was minted with.
  #[inline]
  pub const fn witness(&self) -> TypeWitness {
    self.witness
  }

  #[inline]
  pub(crate) const fn holder(&self) -> u64 {
    self.holder
  }

  #[inline]
  pub(crate) const fn family(&self) -> u64 {
    self.family
  }
}

// -----------------------------------------------------------------------------
// Typed Key
// -----------------------------------------------------------------------------

/// A typed extension key minted by a holder.
///
/// Keys are plain values: copy them freely, send them across threads, keep
/// them for the life of the process. The type parameter ties the key to the
/// value type it stores and retrieves.
pub struct Key<T> {
  raw: DynKey,
  marker: PhantomData<fn(T) -> T>,
}

impl<T> Key<T> {
  #[inline]
  pub(crate) const fn from_raw(raw: DynKey) -> Self {
    Self {
      raw,
      marker: PhantomData,
    }
  }

  /// Returns the erased form of this key.
  #[inline]
  pub const fn as_dyn(&self) -> &DynKey {
    &self.raw
  }

  /// Returns the slot index assigned at mint time.
  #[inline]
  pub const fn index(&self) -> u16 {
    self.raw.index()
  }

  /// Returns the level of the holder that minted this key.
  #[inline]
  pub const fn level(&self) -> u8 {
    self.raw.level()
  }
}

impl<T> Clone for Key<T> {
  #[inline]
  fn clone(&self) -> Self {
    *self
  }
}

impl<T> Copy for Key<T> {}

impl<T> Debug for Key<T> {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    write!(
      f,
      "Key<{}>({}@{})",
      self.raw.witness().name(),
      self.raw.index(),
      self.raw.level(),
    )
  }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_witness_identity() {
    assert_eq!(TypeWitness::of::<String>(), TypeWitness::of::<String>());
    assert_ne!(TypeWitness::of::<String>(), TypeWitness::of::<u64>());
    assert_eq!(TypeWitness::of::<u64>().id(), TypeId::of::<u64>());
  }

  #[test]
  fn test_key_is_copy() {
    let raw: DynKey = DynKey::new(TypeWitness::of::<String>(), 4, 1, 1, 0);
    let key: Key<String> = Key::from_raw(raw);
    let copy: Key<String> = key;

    assert_eq!(key.index(), copy.index());
    assert_eq!(key.as_dyn().family(), copy.as_dyn().family());
  }

  #[test]
  fn test_debug_format() {
    let raw: DynKey = DynKey::new(TypeWitness::of::<u64>(), 7, 1, 1, 2);
    let key: Key<u64> = Key::from_raw(raw);

    assert_eq!(format!("{key:?}"), "Key<u64>(7@2)");
  }
}
