use std::sync::Arc;

use pki_logger::{debug, info};

use crate::{
    HError, HResult, KeyHandle, KeyIdentifier, ModuleConfig, SlotBackend, SlotIdentifier,
    SlotManager,
    pkcs11::{HsmLib, Pkcs11Slot},
};

/// A configured PKCS#11 module and the slots it exposes.
///
/// Slots excluded by the configuration are listed but never opened.
pub struct Pkcs11Module {
    config: Arc<ModuleConfig>,
    slots: Vec<Arc<SlotManager>>,
    excluded: Vec<SlotIdentifier>,
}

impl Pkcs11Module {
    /// Load the native library of `config` and manage every included slot holding a token.
    ///
    /// # Errors
    /// * the library cannot be loaded or initialised
    /// * the slots cannot be listed
    /// * logging into an included slot fails
    pub fn load(config: ModuleConfig) -> HResult<Self> {
        let hsm_lib = Arc::new(HsmLib::instantiate(config.native_library())?);
        let backends = hsm_lib
            .slot_list()?
            .into_iter()
            .map(|slot_id| Arc::new(Pkcs11Slot::new(hsm_lib.clone(), slot_id)) as Arc<dyn SlotBackend>)
            .collect();
        Self::with_backends(config, backends)
    }

    /// Manage `backends`, in this order, as the slots of the module.
    pub fn with_backends(config: ModuleConfig, backends: Vec<Arc<dyn SlotBackend>>) -> HResult<Self> {
        let config = Arc::new(config);
        let mut slots = Vec::new();
        let mut excluded = Vec::new();
        for (index, backend) in backends.into_iter().enumerate() {
            let slot = SlotIdentifier::new(index, backend.slot_id());
            if !config.is_slot_included(&slot) {
                debug!("Slot {slot} of module {} is excluded", config.name());
                excluded.push(slot);
                continue;
            }
            slots.push(Arc::new(SlotManager::instantiate(
                slot,
                config.clone(),
                backend,
            )?));
        }
        info!(
            "PKCS#11 module {}: {} slot(s) in use, {} excluded",
            config.name(),
            slots.len(),
            excluded.len()
        );
        Ok(Self {
            config,
            slots,
            excluded,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.config.name()
    }

    #[must_use]
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// The included slots.
    #[must_use]
    pub fn slot_ids(&self) -> Vec<SlotIdentifier> {
        self.slots.iter().map(|slot| slot.slot()).collect()
    }

    /// # Errors
    /// * [`HError::SlotExcluded`] if the configuration excludes the slot
    /// * [`HError::InvalidParameter`] if the module has no such slot
    pub fn slot(&self, slot: &SlotIdentifier) -> HResult<Arc<SlotManager>> {
        self.find_slot(|candidate| candidate == *slot)
            .ok_or_else(|| HError::InvalidParameter(format!("unknown slot {slot}")))
            .and_then(|found| found)
    }

    pub fn slot_by_index(&self, index: usize) -> HResult<Arc<SlotManager>> {
        self.find_slot(|candidate| candidate.index == index)
            .ok_or_else(|| HError::InvalidParameter(format!("no slot with index {index}")))
            .and_then(|found| found)
    }

    pub fn slot_by_id(&self, id: u64) -> HResult<Arc<SlotManager>> {
        self.find_slot(|candidate| candidate.id == id)
            .ok_or_else(|| HError::InvalidParameter(format!("no slot with id {id:#x}")))
            .and_then(|found| found)
    }

    /// A handle on the private key `key_id` of `slot`.
    pub fn key_handle(&self, slot: &SlotIdentifier, key_id: KeyIdentifier) -> HResult<KeyHandle> {
        KeyHandle::new(self.slot(slot)?, key_id)
    }

    fn find_slot<P>(&self, predicate: P) -> Option<HResult<Arc<SlotManager>>>
    where
        P: Fn(SlotIdentifier) -> bool,
    {
        if let Some(slot) = self.excluded.iter().copied().find(|&slot| predicate(slot)) {
            return Some(Err(HError::SlotExcluded(slot)));
        }
        self.slots
            .iter()
            .find(|manager| predicate(manager.slot()))
            .map(|manager| Ok(manager.clone()))
    }
}
