#![doc = include_str!("../README.md")]

mod bytes;
mod decoder;
mod error;
pub mod frame;
mod summary;
mod synchronizer;

pub use decoder::*;
pub use error::{Error, Result};
pub use frame::{Frame, Reading};
pub use summary::*;
pub use synchronizer::{Lock, REQUIRED_SYNC_FRAMES};

pub(crate) mod prelude {
    pub use crate::error::{Error, Result};
}
