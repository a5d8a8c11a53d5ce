mod types;
pub use types::*;

pub mod kdf;

mod crypto;

mod ratchet;
pub use ratchet::*;

mod group;
pub use group::*;

mod error;
pub use error::Error;

mod config;
pub use config::{GroupConfig, RatchetConfig};
