use std::{ffi::OsStr, ptr};

use libloading::Library;
use pki_logger::{debug, trace};
use pkcs11_sys::{
    CK_BBOOL, CK_C_CloseSession, CK_C_Finalize, CK_C_FindObjects, CK_C_FindObjectsFinal,
    CK_C_FindObjectsInit, CK_C_GetAttributeValue, CK_C_GetMechanismList, CK_C_GetSlotList,
    CK_C_INITIALIZE_ARGS, CK_C_Initialize, CK_C_Login, CK_C_Logout, CK_C_OpenSession, CK_C_Sign,
    CK_C_SignFinal, CK_C_SignInit, CK_C_SignUpdate, CK_MECHANISM_TYPE, CK_SLOT_ID, CK_TRUE,
    CK_ULONG, CK_VOID_PTR,
    CKF_OS_LOCKING_OK, CKR_CRYPTOKI_ALREADY_INITIALIZED, CKR_OK,
};

use crate::{HError, HResult, Mechanism, pkcs11::ck_ulong};

/// A loaded PKCS#11 library.
///
/// Only the functions needed to sign with keys held by the token are resolved. The library
/// is initialised with `CKF_OS_LOCKING_OK` when loaded and finalised when dropped.
pub struct HsmLib {
    _library: Library,
    pub(crate) C_Initialize: CK_C_Initialize,
    pub(crate) C_Finalize: CK_C_Finalize,

    pub(crate) C_GetSlotList: CK_C_GetSlotList,
    pub(crate) C_GetMechanismList: CK_C_GetMechanismList,

    pub(crate) C_OpenSession: CK_C_OpenSession,
    pub(crate) C_CloseSession: CK_C_CloseSession,

    pub(crate) C_Login: CK_C_Login,
    pub(crate) C_Logout: CK_C_Logout,

    pub(crate) C_FindObjectsInit: CK_C_FindObjectsInit,
    pub(crate) C_FindObjects: CK_C_FindObjects,
    pub(crate) C_FindObjectsFinal: CK_C_FindObjectsFinal,

    pub(crate) C_GetAttributeValue: CK_C_GetAttributeValue,

    pub(crate) C_SignInit: CK_C_SignInit,
    pub(crate) C_Sign: CK_C_Sign,
    pub(crate) C_SignUpdate: CK_C_SignUpdate,
    pub(crate) C_SignFinal: CK_C_SignFinal,
}

impl HsmLib {
    /// Load and initialise the library at `path`.
    ///
    /// # Errors
    /// * the library cannot be loaded or lacks one of the required functions
    /// * `C_Initialize` fails
    pub fn instantiate<P>(path: P) -> HResult<Self>
    where
        P: AsRef<OsStr>,
    {
        debug!("Loading PKCS#11 library {}", path.as_ref().to_string_lossy());
        #[allow(unsafe_code)]
        let hsm_lib = unsafe {
            let library = Library::new(path)?;
            Self {
                C_Initialize: Some(*library.get(b"C_Initialize")?),
                C_Finalize: Some(*library.get(b"C_Finalize")?),
                C_GetSlotList: Some(*library.get(b"C_GetSlotList")?),
                C_GetMechanismList: Some(*library.get(b"C_GetMechanismList")?),
                C_OpenSession: Some(*library.get(b"C_OpenSession")?),
                C_CloseSession: Some(*library.get(b"C_CloseSession")?),
                C_Login: Some(*library.get(b"C_Login")?),
                C_Logout: Some(*library.get(b"C_Logout")?),
                C_FindObjectsInit: Some(*library.get(b"C_FindObjectsInit")?),
                C_FindObjects: Some(*library.get(b"C_FindObjects")?),
                C_FindObjectsFinal: Some(*library.get(b"C_FindObjectsFinal")?),
                C_GetAttributeValue: Some(*library.get(b"C_GetAttributeValue")?),
                C_SignInit: Some(*library.get(b"C_SignInit")?),
                C_Sign: Some(*library.get(b"C_Sign")?),
                C_SignUpdate: Some(*library.get(b"C_SignUpdate")?),
                C_SignFinal: Some(*library.get(b"C_SignFinal")?),
                // the function pointers above are only valid while the library is loaded
                _library: library,
            }
        };
        hsm_lib.initialize()?;
        Ok(hsm_lib)
    }

    fn initialize(&self) -> HResult<()> {
        let mut init_args = CK_C_INITIALIZE_ARGS {
            CreateMutex: None,
            DestroyMutex: None,
            LockMutex: None,
            UnlockMutex: None,
            flags: CKF_OS_LOCKING_OK,
            pReserved: ptr::null_mut(),
        };
        #[allow(unsafe_code)]
        let rv = unsafe {
            self.C_Initialize.ok_or_else(|| {
                HError::Default("C_Initialize not available on library".to_owned())
            })?((&raw mut init_args).cast())
        };
        // another user of the same library in this process already initialised it
        if rv != CKR_OK && rv != CKR_CRYPTOKI_ALREADY_INITIALIZED {
            return Err(HError::Token(format!(
                "Failed initializing the PKCS#11 library: {rv:#x}"
            )));
        }
        Ok(())
    }

    fn finalize(&self) -> HResult<()> {
        let reserved: CK_VOID_PTR = ptr::null_mut();
        hsm_call!(
            self,
            "Failed to finalize the PKCS#11 library",
            C_Finalize,
            reserved
        );
        Ok(())
    }

    /// IDs of the slots holding a token, in the order the library lists them.
    pub fn slot_list(&self) -> HResult<Vec<u64>> {
        let token_present = CK_TRUE as CK_BBOOL;
        let mut count: CK_ULONG = 0;
        hsm_call!(
            self,
            "Failed to count the slots",
            C_GetSlotList,
            token_present,
            ptr::null_mut(),
            &raw mut count
        );
        let mut slots: Vec<CK_SLOT_ID> = vec![0; usize::try_from(count)?];
        hsm_call!(
            self,
            "Failed to list the slots",
            C_GetSlotList,
            token_present,
            slots.as_mut_ptr(),
            &raw mut count
        );
        slots.truncate(usize::try_from(count)?);
        trace!("Found {count} slots with a token");
        Ok(slots.into_iter().map(u64::from).collect())
    }

    /// Mechanisms implemented by the token in `slot_id`.
    pub fn mechanism_list(&self, slot_id: u64) -> HResult<Vec<Mechanism>> {
        let slot_id: CK_SLOT_ID = ck_ulong(slot_id)?;
        let mut count: CK_ULONG = 0;
        hsm_call!(
            self,
            "Failed to count the mechanisms",
            C_GetMechanismList,
            slot_id,
            ptr::null_mut(),
            &raw mut count
        );
        let mut mechanisms: Vec<CK_MECHANISM_TYPE> = vec![0; usize::try_from(count)?];
        hsm_call!(
            self,
            "Failed to list the mechanisms",
            C_GetMechanismList,
            slot_id,
            mechanisms.as_mut_ptr(),
            &raw mut count
        );
        mechanisms.truncate(usize::try_from(count)?);
        Ok(mechanisms.into_iter().map(u64::from).collect())
    }
}

impl Drop for HsmLib {
    fn drop(&mut self) {
        drop(self.finalize());
    }
}
