pub mod error;
pub mod net;
pub mod order;
pub mod sync;

pub use error::{Error, Result};
