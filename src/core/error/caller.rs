use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

/// Caller errors surfaced by holder operations.
///
/// Every variant reports a misuse of the API at the call site. None of them
/// are transient: retrying the same call yields the same error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum HolderError {
  /// The key is not valid for the target holder.
  ///
  /// A key is accepted by the holder that minted it, and by every holder of
  /// the same family whose level is at least the key's level of origin.
  /// Everything else is foreign.
  ForeignKey {
    /// Family of the rejected key.
    key_family: u64,
    /// Level of the holder that minted the rejected key.
    key_level: u8,
    /// Family of the holder that rejected it.
    holder_family: u64,
    /// Level of the holder that rejected it.
    holder_level: u8,
  },
  /// A dynamic value's runtime type is not the key's witnessed type.
  TypeMismatch {
    /// Name of the witnessed type.
    expected: &'static str,
  },
  /// `derive` was called on a holder already at the maximum level.
  DepthExceeded {
    /// Level of the holder that refused to derive.
    level: u8,
  },
  /// The family has spent its entire key budget.
  KeysExhausted,
}

impl Display for HolderError {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    match self {
      Self::ForeignKey {
        key_family,
        key_level,
        holder_family,
        holder_level,
      } => {
        write!(
          f,
          "foreign key: minted at level {key_level} of family {key_family}, \
           rejected by level {holder_level} of family {holder_family}",
        )
      }
      Self::TypeMismatch { expected } => {
        write!(f, "value is not a `{expected}`")
      }
      Self::DepthExceeded { level } => {
        write!(f, "cannot derive past level {level}")
      }
      Self::KeysExhausted => f.write_str("family key budget exhausted"),
    }
  }
}

impl Error for HolderError {}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
