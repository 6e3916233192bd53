//! Copyright 2026 PKI Toolkit Developers
//!
//! SoftHSM2 support: a module descriptor matching what SoftHSM2 implements.

use std::path::PathBuf;

use pki_hsm_signer::{
    HResult, MechanismCatalog, MechanismFilterDescriptor, MechanismSetDescriptor, ModuleConfig,
    ModuleDescriptor, NativeLibraryDescriptor, PasswordSetDescriptor, Pkcs11Module,
    SlotDescriptor,
};
use pki_logger::info;


pub const SOFTHSM2_PKCS11_LIB: &str = "/usr/lib/softhsm/libsofthsm2.so";

/// The signing mechanisms of SoftHSM2 the signer relies on.
pub const SOFTHSM2_SIGNING_MECHANISMS: [&str; 4] =
    ["CKM_RSA_PKCS", "CKM_RSA_X_509", "CKM_RSA_PKCS_PSS", "CKM_ECDSA"];

/// Describe a SoftHSM2 module restricted to `slot_id` (all slots when `None`), logging in
/// with the password designated by `password_source` (`env:NAME`, `file:PATH` or a literal).
#[must_use]
pub fn softhsm2_descriptor(
    lib_path: &str,
    slot_id: Option<u64>,
    password_source: &str,
) -> ModuleDescriptor {
    let slots: Vec<SlotDescriptor> = slot_id
        .map(|id| SlotDescriptor {
            index: None,
            id: Some(format!("{id:#x}")),
        })
        .into_iter()
        .collect();
    ModuleDescriptor {
        name: "softhsm2".to_owned(),
        native_libraries: vec![NativeLibraryDescriptor {
            path: PathBuf::from(lib_path),
            operating_systems: Vec::new(),
        }],
        mechanism_sets: vec![MechanismSetDescriptor {
            name: "signing".to_owned(),
            mechanisms: SOFTHSM2_SIGNING_MECHANISMS
                .iter()
                .map(|&mechanism| mechanism.to_owned())
                .collect(),
        }],
        mechanism_filters: vec![MechanismFilterDescriptor {
            slots: Vec::new(),
            mechanism_set: "signing".to_owned(),
        }],
        password_sets: vec![PasswordSetDescriptor {
            slots: slots.clone(),
            passwords: vec![password_source.to_owned()],
        }],
        include_slots: slots,
        ..ModuleDescriptor::default()
    }
}

/// Load SoftHSM2 from `lib_path` and log into the selected slots.
pub fn load_softhsm2(
    lib_path: &str,
    slot_id: Option<u64>,
    password_source: &str,
) -> HResult<Pkcs11Module> {
    let descriptor = softhsm2_descriptor(lib_path, slot_id, password_source);
    let config = ModuleConfig::with_default_resolver(&descriptor, &MechanismCatalog::new())?;
    let module = Pkcs11Module::load(config)?;
    info!("SoftHSM2 loaded with slots {:?}", module.slot_ids());
    Ok(module)
}
