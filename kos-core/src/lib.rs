//! Object model shared by every other `kos-*` crate: the envelope, the
//! concrete kinds, label-selector matching, CPU/memory quantity parsing,
//! and the error type threaded through the store, admission and
//! controllers.

pub mod error;
pub mod kinds;
pub mod object;
pub mod quantity;
pub mod selector;

pub use error::{Error, Result};
pub use object::{Kind, Object, ObjectMeta, OwnerReference};
