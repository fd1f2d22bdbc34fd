//! Container limits and sizing constants.
//!
//! These constants bound the derivation depth of holder families, the key
//! budget shared by a family, and the sizing of slot arrays. The depth and
//! budget limits interlock with the index allocator: eight levels fill its
//! two lane words exactly, and the budget keeps every 16-bit lane from
//! overflowing.

// -----------------------------------------------------------------------------
// Family Limits
// -----------------------------------------------------------------------------

/// Maximum derivation depth of a holder family.
///
/// A family root sits at level 0 and [`derive`] refuses to go past level 7,
/// so a derivation chain spans at most eight holders.
///
/// [`derive`]: crate::types::Holder::derive
pub const MAX_LEVEL: u8 = 7;

/// Maximum number of keys a single family may request.
///
/// The request that would reach this count is rejected with
/// [`KeysExhausted`]. Enforcing the budget before the allocator advances
/// keeps every lane strictly below `u16::MAX`, so lane overflow cannot
/// occur.
///
/// [`KeysExhausted`]: crate::error::HolderError::KeysExhausted
pub const MAX_FAMILY_KEYS: u32 = 1 << 16;

// -----------------------------------------------------------------------------
// Slot Array Sizing
// -----------------------------------------------------------------------------

/// Smallest slot count ever allocated for a fresh array.
///
/// Arrays created by the first write to a holder reserve at least this many
/// slots so a handful of early keys never trigger a reallocation.
pub const MIN_SLOTS: usize = 10;
