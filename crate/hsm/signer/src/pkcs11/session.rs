use std::{
    ffi::c_void,
    ptr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use pki_logger::{debug, trace, warn};
use pkcs11_sys::{
    CK_ATTRIBUTE, CK_ATTRIBUTE_TYPE, CK_KEY_TYPE, CK_MECHANISM, CK_OBJECT_CLASS,
    CK_OBJECT_HANDLE, CK_RSA_PKCS_PSS_PARAMS, CK_SESSION_HANDLE, CK_ULONG, CK_UTF8CHAR_PTR,
    CKA_CLASS, CKA_EC_PARAMS, CKA_ID, CKA_KEY_TYPE, CKA_LABEL, CKA_MODULUS, CKA_PRIME, CKA_PUBLIC_EXPONENT, CKK_DSA, CKK_EC,
    CKK_RSA, CKO_PRIVATE_KEY, CKO_PUBLIC_KEY, CKR_ATTRIBUTE_SENSITIVE,
    CKR_ATTRIBUTE_TYPE_INVALID, CKR_OK, CKR_USER_ALREADY_LOGGED_IN,
};
use zeroize::Zeroizing;

use crate::{
    HError, HResult, KeyIdentifier, Mechanism, MechanismParams, ObjectHandle, PublicKeyInfo,
    RawSession,
    pkcs11::{HsmLib, ck_ulong},
};

/// Handles fetched per `C_FindObjects` call.
const FIND_BATCH_SIZE: usize = 16;

/// A session opened with `C_OpenSession`. It is closed, and logged out when it logged in,
/// when dropped.
pub struct Pkcs11Session {
    hsm: Arc<HsmLib>,
    handle: CK_SESSION_HANDLE,
    logged_in: AtomicBool,
}

impl Pkcs11Session {
    pub(crate) fn new(hsm: Arc<HsmLib>, handle: CK_SESSION_HANDLE) -> Self {
        debug!("Opened PKCS#11 session {handle}");
        Self {
            hsm,
            handle,
            logged_in: AtomicBool::new(false),
        }
    }

    /// Log out when this session logged in, then close it.
    fn close(&self) -> HResult<()> {
        let logged_in = self.logged_in.swap(false, Ordering::AcqRel);
        logout_then_close(
            || if logged_in { self.logout() } else { Ok(()) },
            || self.close_session(),
        )
    }

    fn logout(&self) -> HResult<()> {
        hsm_call!(self.hsm, "Failed logging out", C_Logout, self.handle);
        Ok(())
    }

    fn close_session(&self) -> HResult<()> {
        hsm_call!(
            self.hsm,
            "Failed closing a session",
            C_CloseSession,
            self.handle
        );
        debug!("Closed PKCS#11 session {}", self.handle);
        Ok(())
    }

    /// `C_SignInit` with `mechanism` and its marshalled `params`.
    fn sign_init(
        &self,
        private_key: ObjectHandle,
        mechanism: Mechanism,
        params: Option<&MechanismParams>,
    ) -> HResult<()> {
        let mut pss_params;
        let mut user_id;
        let mut ck_mechanism = CK_MECHANISM {
            mechanism: ck_ulong(mechanism)?,
            pParameter: ptr::null_mut(),
            ulParameterLen: 0,
        };
        match params {
            Some(MechanismParams::RsaPss {
                hash,
                mgf,
                salt_len,
            }) => {
                pss_params = CK_RSA_PKCS_PSS_PARAMS {
                    hashAlg: ck_ulong(*hash)?,
                    mgf: ck_ulong(*mgf)?,
                    sLen: CK_ULONG::try_from(*salt_len)?,
                };
                ck_mechanism.pParameter = (&raw mut pss_params).cast::<c_void>();
                ck_mechanism.ulParameterLen =
                    CK_ULONG::try_from(size_of::<CK_RSA_PKCS_PSS_PARAMS>())?;
            }
            Some(MechanismParams::UserId(id)) => {
                user_id = id.clone();
                ck_mechanism.pParameter = user_id.as_mut_ptr().cast::<c_void>();
                ck_mechanism.ulParameterLen = CK_ULONG::try_from(user_id.len())?;
            }
            None => {}
        }
        let private_key: CK_OBJECT_HANDLE = ck_ulong(private_key)?;
        hsm_call!(
            self.hsm,
            "Failed to initialize the signature",
            C_SignInit,
            self.handle,
            &raw mut ck_mechanism,
            private_key
        );
        Ok(())
    }

    fn find_object_handles(&self, template: &mut [CK_ATTRIBUTE]) -> HResult<Vec<CK_OBJECT_HANDLE>> {
        hsm_call!(
            self.hsm,
            "Failed to initialize object search: C_FindObjectsInit failed",
            C_FindObjectsInit,
            self.handle,
            template.as_mut_ptr(),
            CK_ULONG::try_from(template.len())?
        );
        let mut object_handles = Vec::new();
        let mut handles_buf = [CK_OBJECT_HANDLE::default(); FIND_BATCH_SIZE];
        let mut object_count: CK_ULONG = 0;
        loop {
            hsm_call!(
                self.hsm,
                "Failed to find objects",
                C_FindObjects,
                self.handle,
                handles_buf.as_mut_ptr(),
                CK_ULONG::try_from(FIND_BATCH_SIZE)?,
                &raw mut object_count
            );
            if object_count == 0 {
                break;
            }
            object_handles.extend_from_slice(
                handles_buf
                    .get(..usize::try_from(object_count)?)
                    .ok_or_else(|| {
                        HError::Token("More objects returned than requested".to_owned())
                    })?,
            );
        }
        hsm_call!(
            self.hsm,
            "Failed to finalize object search",
            C_FindObjectsFinal,
            self.handle
        );
        trace!("Found {} objects", object_handles.len());
        Ok(object_handles)
    }

    fn find_key(
        &self,
        class: CK_OBJECT_CLASS,
        key_id: &KeyIdentifier,
    ) -> HResult<Option<CK_OBJECT_HANDLE>> {
        let mut class = class;
        let (id_type, id_value): (CK_ATTRIBUTE_TYPE, &[u8]) = match key_id {
            KeyIdentifier::Label(label) => (CKA_LABEL, label.as_bytes()),
            KeyIdentifier::Id(id) => (CKA_ID, id.as_slice()),
        };
        let mut template = [
            CK_ATTRIBUTE {
                type_: CKA_CLASS,
                pValue: (&raw mut class).cast::<c_void>(),
                ulValueLen: CK_ULONG::try_from(size_of::<CK_OBJECT_CLASS>())?,
            },
            CK_ATTRIBUTE {
                type_: id_type,
                pValue: id_value.as_ptr().cast::<c_void>().cast_mut(),
                ulValueLen: CK_ULONG::try_from(id_value.len())?,
            },
        ];
        let handles = self.find_object_handles(&mut template)?;
        if handles.len() > 1 {
            warn!(
                "{} objects match {key_id}, using the first one",
                handles.len()
            );
        }
        Ok(handles.first().copied())
    }

    /// Read one variable length attribute. `None` when the object does not have it or it
    /// cannot be revealed.
    fn attribute_bytes(
        &self,
        object: CK_OBJECT_HANDLE,
        attribute: CK_ATTRIBUTE_TYPE,
    ) -> HResult<Option<Vec<u8>>> {
        let mut template = [CK_ATTRIBUTE {
            type_: attribute,
            pValue: ptr::null_mut(),
            ulValueLen: 0,
        }];
        if !self.call_get_attributes(object, &mut template)? {
            return Ok(None);
        }
        let mut value = vec![0_u8; usize::try_from(template[0].ulValueLen)?];
        let mut template = [CK_ATTRIBUTE {
            type_: attribute,
            pValue: value.as_mut_ptr().cast::<c_void>(),
            ulValueLen: CK_ULONG::try_from(value.len())?,
        }];
        if !self.call_get_attributes(object, &mut template)? {
            return Ok(None);
        }
        value.truncate(usize::try_from(template[0].ulValueLen)?);
        Ok(Some(value))
    }

    fn key_type(&self, object: CK_OBJECT_HANDLE) -> HResult<CK_KEY_TYPE> {
        let mut key_type: CK_KEY_TYPE = 0;
        let mut template = [CK_ATTRIBUTE {
            type_: CKA_KEY_TYPE,
            pValue: (&raw mut key_type).cast::<c_void>(),
            ulValueLen: CK_ULONG::try_from(size_of::<CK_KEY_TYPE>())?,
        }];
        if !self.call_get_attributes(object, &mut template)? {
            return Err(HError::Token(format!(
                "object {object} has no key type"
            )));
        }
        Ok(key_type)
    }

    fn call_get_attributes(
        &self,
        object: CK_OBJECT_HANDLE,
        template: &mut [CK_ATTRIBUTE],
    ) -> HResult<bool> {
        #[allow(unsafe_code)]
        let rv = match self.hsm.C_GetAttributeValue {
            Some(func) => unsafe {
                func(
                    self.handle,
                    object,
                    template.as_mut_ptr(),
                    CK_ULONG::try_from(template.len())?,
                )
            },
            None => {
                return Err(HError::Default(
                    "C_GetAttributeValue not available on library".to_owned(),
                ));
            }
        };
        if rv == CKR_ATTRIBUTE_TYPE_INVALID || rv == CKR_ATTRIBUTE_SENSITIVE {
            return Ok(false);
        }
        if rv != CKR_OK {
            return Err(HError::Token(format!(
                "Failed to get the attributes of object {object}: {rv:#x}"
            )));
        }
        Ok(true)
    }

    /// Read `attribute` from the public key, falling back to the private key.
    fn key_pair_attribute(
        &self,
        public_key: Option<CK_OBJECT_HANDLE>,
        private_key: CK_OBJECT_HANDLE,
        attribute: CK_ATTRIBUTE_TYPE,
    ) -> HResult<Vec<u8>> {
        if let Some(public_key) = public_key {
            if let Some(value) = self.attribute_bytes(public_key, attribute)? {
                return Ok(value);
            }
        }
        self.attribute_bytes(private_key, attribute)?
            .ok_or_else(|| {
                HError::Token(format!(
                    "attribute {attribute:#x} is not available on key {private_key}"
                ))
            })
    }
}

impl RawSession for Pkcs11Session {
    fn login(&self, user_type: u64, pin: &[u8]) -> HResult<()> {
        let mut pin = Zeroizing::new(pin.to_vec());
        #[allow(unsafe_code)]
        let rv = unsafe {
            self.hsm
                .C_Login
                .ok_or_else(|| HError::Default("C_Login not available on library".to_owned()))?(
                self.handle,
                ck_ulong(user_type)?,
                pin.as_mut_ptr() as CK_UTF8CHAR_PTR,
                CK_ULONG::try_from(pin.len())?,
            )
        };
        if rv == CKR_USER_ALREADY_LOGGED_IN {
            warn!("user already logged in, ignoring logging");
            return Ok(());
        }
        if rv != CKR_OK {
            return Err(HError::Token(format!("Failed logging in: {rv:#x}")));
        }
        // the login state is shared by all sessions of the application: only the session
        // that logged in logs out
        self.logged_in.store(true, Ordering::Release);
        Ok(())
    }

    fn find_private_key(&self, key_id: &KeyIdentifier) -> HResult<Option<ObjectHandle>> {
        Ok(self
            .find_key(CKO_PRIVATE_KEY, key_id)?
            .map(u64::from))
    }

    fn public_key_info(
        &self,
        private_key: ObjectHandle,
        key_id: &KeyIdentifier,
    ) -> HResult<PublicKeyInfo> {
        let private_key: CK_OBJECT_HANDLE = ck_ulong(private_key)?;
        let public_key = self.find_key(CKO_PUBLIC_KEY, key_id)?;
        let key_type = self.key_type(private_key)?;
        Ok(match key_type {
            CKK_RSA => PublicKeyInfo::Rsa {
                modulus: self.key_pair_attribute(public_key, private_key, CKA_MODULUS)?,
                public_exponent: self.key_pair_attribute(
                    public_key,
                    private_key,
                    CKA_PUBLIC_EXPONENT,
                )?,
            },
            CKK_DSA => PublicKeyInfo::Dsa {
                prime: self.key_pair_attribute(public_key, private_key, CKA_PRIME)?,
            },
            CKK_EC => PublicKeyInfo::Ec {
                params: self.key_pair_attribute(public_key, private_key, CKA_EC_PARAMS)?,
            },
            other => PublicKeyInfo::Other(u64::from(other)),
        })
    }

    fn sign(
        &self,
        private_key: ObjectHandle,
        mechanism: Mechanism,
        params: Option<&MechanismParams>,
        data: &[u8],
    ) -> HResult<Vec<u8>> {
        self.sign_init(private_key, mechanism, params)?;
        let mut data = data.to_vec();
        let mut signature_len: CK_ULONG = 0;
        hsm_call!(
            self.hsm,
            "Failed to get the signature length",
            C_Sign,
            self.handle,
            data.as_mut_ptr(),
            CK_ULONG::try_from(data.len())?,
            ptr::null_mut(),
            &raw mut signature_len
        );
        let mut signature = vec![0_u8; usize::try_from(signature_len)?];
        hsm_call!(
            self.hsm,
            "Failed to sign",
            C_Sign,
            self.handle,
            data.as_mut_ptr(),
            CK_ULONG::try_from(data.len())?,
            signature.as_mut_ptr(),
            &raw mut signature_len
        );
        signature.truncate(usize::try_from(signature_len)?);
        trace!(
            "Signed {} bytes with mechanism {mechanism:#x}: {} bytes signature",
            data.len(),
            signature.len()
        );
        Ok(signature)
    }

    fn sign_multi_part(
        &self,
        private_key: ObjectHandle,
        mechanism: Mechanism,
        params: Option<&MechanismParams>,
        parts: &[&[u8]],
    ) -> HResult<Vec<u8>> {
        self.sign_init(private_key, mechanism, params)?;
        for part in parts {
            let mut part = part.to_vec();
            hsm_call!(
                self.hsm,
                "Failed to feed the signature",
                C_SignUpdate,
                self.handle,
                part.as_mut_ptr(),
                CK_ULONG::try_from(part.len())?
            );
        }
        let mut signature_len: CK_ULONG = 0;
        hsm_call!(
            self.hsm,
            "Failed to get the signature length",
            C_SignFinal,
            self.handle,
            ptr::null_mut(),
            &raw mut signature_len
        );
        let mut signature = vec![0_u8; usize::try_from(signature_len)?];
        hsm_call!(
            self.hsm,
            "Failed to sign",
            C_SignFinal,
            self.handle,
            signature.as_mut_ptr(),
            &raw mut signature_len
        );
        signature.truncate(usize::try_from(signature_len)?);
        trace!(
            "Signed {} parts with mechanism {mechanism:#x}: {} bytes signature",
            parts.len(),
            signature.len()
        );
        Ok(signature)
    }
}

impl Drop for Pkcs11Session {
    fn drop(&mut self) {
        drop(self.close());
    }
}

/// Run `close` whatever `logout` returns; the first failure is reported.
fn logout_then_close<L, C>(logout: L, close: C) -> HResult<()>
where
    L: FnOnce() -> HResult<()>,
    C: FnOnce() -> HResult<()>,
{
    let logged_out = logout();
    let closed = close();
    logged_out.and(closed)
}
