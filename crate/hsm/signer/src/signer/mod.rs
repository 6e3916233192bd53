//! Signature engines.

mod engine;
mod hmac;
mod pss;
mod state;

pub use engine::{SignatureEngine, SignatureScheme};
pub use hmac::HmacContentSigner;
pub use pss::{PssEncodedMessage, PssEncoder, PssParameters, TRAILER_FIELD_BC};
pub use state::EngineState;
