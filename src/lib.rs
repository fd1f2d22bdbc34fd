//! Holdall - typed extension containers for game-backend state

mod core;

pub mod consts;

pub mod error {
  //! Holdall errors.

  pub use crate::core::HolderError;
}

pub mod types {
  //! Core types of the extension container.

  pub use crate::core::DynKey;
  pub use crate::core::DynValue;
  pub use crate::core::Holder;
  pub use crate::core::Key;
  pub use crate::core::TypeWitness;
}
