//! Provider-facing pieces:
//! - `config`: the static provider table (family, auth scheme, defaults)
//! - `verify`: the connection tester
//! Request shapes live in `chat_manager::provider_adapter`; this module only
//! describes providers.
pub mod config;
pub mod verify;
pub(crate) mod util;

pub use config::*;
pub use verify::*;
