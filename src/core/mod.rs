mod error;
mod holder;

pub(crate) use self::error::fatal;

pub use self::error::HolderError;

pub use self::holder::DynKey;
pub use self::holder::DynValue;
pub use self::holder::Holder;
pub use self::holder::Key;
pub use self::holder::TypeWitness;
