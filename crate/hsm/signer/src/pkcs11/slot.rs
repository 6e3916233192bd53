use std::{collections::HashSet, ptr, sync::Arc};

use pkcs11_sys::{CK_FLAGS, CK_SESSION_HANDLE, CK_SLOT_ID, CKF_RW_SESSION, CKF_SERIAL_SESSION};

use crate::{
    HResult, Mechanism, RawSession, SlotBackend,
    pkcs11::{HsmLib, Pkcs11Session, ck_ulong},
};

/// One slot of a loaded PKCS#11 library.
pub struct Pkcs11Slot {
    hsm_lib: Arc<HsmLib>,
    slot_id: u64,
}

impl Pkcs11Slot {
    #[must_use]
    pub const fn new(hsm_lib: Arc<HsmLib>, slot_id: u64) -> Self {
        Self { hsm_lib, slot_id }
    }
}

impl SlotBackend for Pkcs11Slot {
    fn slot_id(&self) -> u64 {
        self.slot_id
    }

    fn supported_mechanisms(&self) -> HResult<HashSet<Mechanism>> {
        Ok(self
            .hsm_lib
            .mechanism_list(self.slot_id)?
            .into_iter()
            .collect())
    }

    fn open_session(&self, read_write: bool) -> HResult<Box<dyn RawSession>> {
        let slot_id: CK_SLOT_ID = ck_ulong(self.slot_id)?;
        let flags: CK_FLAGS = if read_write {
            CKF_RW_SESSION | CKF_SERIAL_SESSION
        } else {
            CKF_SERIAL_SESSION
        };
        let mut session_handle: CK_SESSION_HANDLE = 0;
        hsm_call!(
            self.hsm_lib,
            format!("Failed opening a session on slot {slot_id}"),
            C_OpenSession,
            slot_id,
            flags,
            ptr::null_mut(),
            None,
            &raw mut session_handle
        );
        Ok(Box::new(Pkcs11Session::new(
            self.hsm_lib.clone(),
            session_handle,
        )))
    }
}
