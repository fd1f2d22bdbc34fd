mod family;
mod holder;
mod index;
mod key;
mod slots;

pub(crate) use self::family::Family;
pub(crate) use self::family::next_holder_id;

pub(crate) use self::index::IndexAlloc;

pub(crate) use self::slots::Slots;
pub(crate) use self::slots::initial_len;
pub(crate) use self::slots::required_len;

pub use self::holder::Holder;
pub use self::key::DynKey;
pub use self::key::Key;
pub use self::key::TypeWitness;
pub use self::slots::DynValue;
