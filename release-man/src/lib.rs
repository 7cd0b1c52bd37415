pub mod defaults;
mod error;
pub mod extract;
pub mod platform;
pub mod release;

pub use error::{Error, Result};
pub use platform::{Platform, PlatformProfile};
pub use release::*;
