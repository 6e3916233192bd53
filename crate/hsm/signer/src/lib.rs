//! Copyright 2026 PKI Toolkit Developers
//!
//! Policy governed signing with keys held in PKCS#11 tokens.
//!
//! A [`ModuleConfig`] decides which slots of a module are used, which mechanisms each slot may
//! run and how to log into it. A [`Pkcs11Module`] manages the included slots; a [`KeyHandle`]
//! designates one private key; [`SignatureEngine`] and [`HmacContentSigner`] produce
//! standard signatures, hashing and padding in software and delegating only the raw private
//! key operation to the token.

pub use backend::{
    KeyIdentifier, MechanismParams, ObjectHandle, PublicKeyInfo, RawSession, SlotBackend,
};
pub use config::{
    CKU_CONTEXT_SPECIFIC, CKU_SO, CKU_USER, MIN_MESSAGE_SIZE, MechanismFilterDescriptor,
    MechanismSetDescriptor, ModuleConfig, ModuleDescriptor, NativeLibraryDescriptor,
    PasswordSetDescriptor, Pkcs11Conf, SlotDescriptor,
};
pub use digest::DigestAlgorithm;
pub use error::{ErrorCategory, HError, HResult};
pub use key::{EcdsaEncoding, KeyAlgorithm, KeyHandle};
pub use mechanism::{
    CKM_DSA, CKM_ECDSA, CKM_RSA_PKCS, CKM_RSA_PKCS_PSS, CKM_RSA_X_509, CKM_VENDOR_DEFINED,
    Mechanism, MechanismCatalog, MechanismSelector,
};
pub use module::Pkcs11Module;
pub use policy::{
    DefaultPasswordResolver, MechanismGrant, MechanismPolicy, PasswordPolicy, PasswordResolver,
};
pub use session_pool::{PooledSession, SessionPool};
pub use signer::{
    EngineState, HmacContentSigner, PssEncodedMessage, PssEncoder, PssParameters,
    SignatureEngine, SignatureScheme, TRAILER_FIELD_BC,
};
pub use slot::{SlotFilter, SlotFilterSet, SlotIdentifier, parse_slot_id};
pub use slots::{ObjectHandlesCache, SlotManager};

mod backend;
mod config;
mod digest;
mod error;
mod key;
mod mechanism;
mod module;
pub mod pkcs11;
mod policy;
mod session_pool;
mod signer;
mod slot;
mod slots;

#[cfg(test)]
mod tests;
