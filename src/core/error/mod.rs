//! Error handling for holder operations.

mod caller;
mod macros;

pub(crate) use self::macros::fatal;

pub use self::caller::HolderError;
