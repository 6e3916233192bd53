#![allow(clippy::unwrap_used, clippy::panic_in_result_fn)]

use std::sync::{Arc, LazyLock};

use openssl::{
    ec::{EcGroup, EcKey},
    nid::Nid,
    pkey::Private,
    rsa::Rsa,
};
use pki_logger::log_init;

use crate::{
    DefaultPasswordResolver, KeyHandle, KeyIdentifier, MechanismCatalog, ModuleConfig,
    ModuleDescriptor, Pkcs11Module, SlotBackend, SlotIdentifier,
};

mod soft_token;

use soft_token::SoftToken;

/// One module, one unrestricted library, every mechanism allowed on every slot.
pub(crate) const ALLOW_ALL: &str = r#"
name = "soft"

[[native_libraries]]
path = "/opt/soft/libsoftpkcs11.so"

[[mechanism_sets]]
name = "all"
mechanisms = ["ALL"]

[[mechanism_filters]]
mechanism_set = "all"
"#;

static RSA_2048: LazyLock<Rsa<Private>> = LazyLock::new(|| Rsa::generate(2048).unwrap());

pub(crate) fn rsa_2048() -> Rsa<Private> {
    RSA_2048.clone()
}

pub(crate) fn ec_key(curve: Nid) -> EcKey<Private> {
    EcKey::generate(&EcGroup::from_curve_name(curve).unwrap()).unwrap()
}

pub(crate) fn module_config(toml: &str) -> ModuleConfig {
    log_init("info,pki_hsm_signer=debug");
    let descriptor = ModuleDescriptor::from_toml_str(toml).unwrap();
    ModuleConfig::new_for_os(
        &descriptor,
        &MechanismCatalog::new(),
        Arc::new(DefaultPasswordResolver),
        "linux",
    )
    .unwrap()
}

/// A module whose only slot (index 0) is `token`.
pub(crate) fn single_slot_module(toml: &str, token: &Arc<SoftToken>) -> Pkcs11Module {
    Pkcs11Module::with_backends(
        module_config(toml),
        vec![token.clone() as Arc<dyn SlotBackend>],
    )
    .unwrap()
}

/// The key labelled `label` in slot index 0 of `module`.
pub(crate) fn key(module: &Pkcs11Module, label: &str) -> KeyHandle {
    let slot = module.slot_by_index(0).unwrap().slot();
    module
        .key_handle(&slot, KeyIdentifier::Label(label.to_owned()))
        .unwrap()
}

pub(crate) fn slot_zero(token: &SoftToken) -> SlotIdentifier {
    SlotIdentifier::new(0, token.slot_id())
}

pub(crate) fn from_hex(hex: &str) -> Vec<u8> {
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
        .collect()
}
