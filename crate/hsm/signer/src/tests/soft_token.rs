//! An in-memory token backed by OpenSSL keys, standing in for a PKCS#11 library.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use openssl::{
    ec::EcKey,
    ecdsa::EcdsaSig,
    nid::Nid,
    pkey::{PKey, Private},
    pkey_ctx::PkeyCtx,
    rsa::{Padding, Rsa},
    sign::RsaPssSaltlen,
};

use crate::{
    CKM_ECDSA, CKM_RSA_PKCS, CKM_RSA_PKCS_PSS, CKM_RSA_X_509, DigestAlgorithm, HError, HResult,
    KeyIdentifier, Mechanism, MechanismParams, ObjectHandle, PublicKeyInfo, RawSession,
    SlotBackend,
};

/// DER `OBJECT IDENTIFIER` of P-256
pub(crate) const P256_PARAMS: &[u8] = &[0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
/// DER `OBJECT IDENTIFIER` of P-384
pub(crate) const P384_PARAMS: &[u8] = &[0x06, 0x05, 0x2b, 0x81, 0x04, 0x00, 0x22];

const CKR_MECHANISM_INVALID: u64 = 0x70;
const CKR_MECHANISM_PARAM_INVALID: u64 = 0x71;
const CKR_PIN_INCORRECT: u64 = 0xa0;

pub(crate) enum SoftKeyMaterial {
    Rsa(Rsa<Private>),
    Ec(EcKey<Private>),
    /// A key the token can describe but not use
    Public(PublicKeyInfo),
    /// An EC key whose `CKM_ECDSA` output is always `raw`
    FixedEcdsa { params: Vec<u8>, raw: Vec<u8> },
}

struct SoftKey {
    label: String,
    id: Vec<u8>,
    material: SoftKeyMaterial,
}

/// One signing operation as the token received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignCall {
    pub mechanism: Mechanism,
    pub params: Option<MechanismParams>,
    /// Length of each part; a single element for `C_Sign`
    pub parts: Vec<usize>,
}

/// What the token observed.
#[derive(Default)]
pub(crate) struct TokenStats {
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub sessions_opened: AtomicUsize,
    pub key_lookups: AtomicUsize,
    pub logins: Mutex<Vec<Vec<u8>>>,
    pub sign_calls: Mutex<Vec<SignCall>>,
}

impl TokenStats {
    pub(crate) fn logins(&self) -> Vec<Vec<u8>> {
        self.logins.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub(crate) fn sign_calls(&self) -> Vec<Mechanism> {
        self.calls().into_iter().map(|call| call.mechanism).collect()
    }

    pub(crate) fn calls(&self) -> Vec<SignCall> {
        self.sign_calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    pub(crate) fn key_lookups(&self) -> usize {
        self.key_lookups.load(Ordering::SeqCst)
    }
}

struct TokenInner {
    slot_id: u64,
    mechanisms: HashSet<Mechanism>,
    keys: Vec<SoftKey>,
    pins: Vec<Vec<u8>>,
    sign_delay: Duration,
    stats: TokenStats,
}

pub(crate) struct SoftToken(Arc<TokenInner>);

impl SoftToken {
    pub(crate) fn builder(slot_id: u64) -> SoftTokenBuilder {
        SoftTokenBuilder {
            slot_id,
            mechanisms: HashSet::from([CKM_RSA_PKCS, CKM_RSA_X_509, CKM_ECDSA]),
            keys: Vec::new(),
            pins: Vec::new(),
            sign_delay: Duration::ZERO,
        }
    }

    pub(crate) fn stats(&self) -> &TokenStats {
        &self.0.stats
    }
}

pub(crate) struct SoftTokenBuilder {
    slot_id: u64,
    mechanisms: HashSet<Mechanism>,
    keys: Vec<SoftKey>,
    pins: Vec<Vec<u8>>,
    sign_delay: Duration,
}

impl SoftTokenBuilder {
    pub(crate) fn mechanisms(mut self, mechanisms: &[Mechanism]) -> Self {
        self.mechanisms = mechanisms.iter().copied().collect();
        self
    }

    pub(crate) fn key(mut self, label: &str, id: &[u8], material: SoftKeyMaterial) -> Self {
        self.keys.push(SoftKey {
            label: label.to_owned(),
            id: id.to_vec(),
            material,
        });
        self
    }

    /// Only these PINs are accepted; any PIN is accepted when none is set.
    pub(crate) fn pins(mut self, pins: &[&str]) -> Self {
        self.pins = pins.iter().map(|pin| pin.as_bytes().to_vec()).collect();
        self
    }

    pub(crate) const fn sign_delay(mut self, delay: Duration) -> Self {
        self.sign_delay = delay;
        self
    }

    pub(crate) fn build(self) -> SoftToken {
        SoftToken(Arc::new(TokenInner {
            slot_id: self.slot_id,
            mechanisms: self.mechanisms,
            keys: self.keys,
            pins: self.pins,
            sign_delay: self.sign_delay,
            stats: TokenStats::default(),
        }))
    }
}

impl SlotBackend for SoftToken {
    fn slot_id(&self) -> u64 {
        self.0.slot_id
    }

    fn supported_mechanisms(&self) -> HResult<HashSet<Mechanism>> {
        Ok(self.0.mechanisms.clone())
    }

    fn open_session(&self, _read_write: bool) -> HResult<Box<dyn RawSession>> {
        self.0.stats.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SoftSession(self.0.clone())))
    }
}

struct SoftSession(Arc<TokenInner>);

impl SoftSession {
    fn key(&self, handle: ObjectHandle) -> HResult<&SoftKey> {
        usize::try_from(handle)
            .ok()
            .and_then(|handle| handle.checked_sub(1))
            .and_then(|index| self.0.keys.get(index))
            .ok_or_else(|| HError::Token("C_SignInit: 0x60".to_owned()))
    }

    fn raw_sign(
        &self,
        handle: ObjectHandle,
        mechanism: Mechanism,
        params: Option<&MechanismParams>,
        data: &[u8],
    ) -> HResult<Vec<u8>> {
        match (&self.key(handle)?.material, mechanism) {
            (SoftKeyMaterial::Rsa(rsa), CKM_RSA_X_509) => rsa_private(rsa, data, Padding::NONE),
            (SoftKeyMaterial::Rsa(rsa), CKM_RSA_PKCS) => rsa_private(rsa, data, Padding::PKCS1),
            (SoftKeyMaterial::Rsa(rsa), CKM_RSA_PKCS_PSS) => rsa_pss(rsa, params, data),
            (SoftKeyMaterial::Ec(ec), CKM_ECDSA) => {
                let signature = EcdsaSig::sign(data, ec)?;
                let len = i32::try_from(ec.group().degree().div_ceil(8))?;
                let mut raw = signature.r().to_vec_padded(len)?;
                raw.extend_from_slice(&signature.s().to_vec_padded(len)?);
                Ok(raw)
            }
            (SoftKeyMaterial::FixedEcdsa { raw, .. }, CKM_ECDSA) => Ok(raw.clone()),
            _ => Err(HError::Token(format!(
                "C_SignInit: {CKR_MECHANISM_INVALID:#x}"
            ))),
        }
    }

    fn record_sign(
        &self,
        private_key: ObjectHandle,
        mechanism: Mechanism,
        params: Option<&MechanismParams>,
        parts: &[&[u8]],
    ) -> HResult<Vec<u8>> {
        let stats = &self.0.stats;
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.0.sign_delay.is_zero() {
            thread::sleep(self.0.sign_delay);
        }
        let result = self.raw_sign(private_key, mechanism, params, &parts.concat());
        stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Ok(mut calls) = stats.sign_calls.lock() {
            calls.push(SignCall {
                mechanism,
                params: params.cloned(),
                parts: parts.iter().map(|part| part.len()).collect(),
            });
        }
        result
    }
}

impl RawSession for SoftSession {
    fn login(&self, _user_type: u64, pin: &[u8]) -> HResult<()> {
        if let Ok(mut logins) = self.0.stats.logins.lock() {
            logins.push(pin.to_vec());
        }
        if !self.0.pins.is_empty() && !self.0.pins.iter().any(|accepted| accepted == pin) {
            return Err(HError::Token(format!("C_Login: {CKR_PIN_INCORRECT:#x}")));
        }
        Ok(())
    }

    fn find_private_key(&self, key_id: &KeyIdentifier) -> HResult<Option<ObjectHandle>> {
        self.0.stats.key_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .0
            .keys
            .iter()
            .position(|key| match key_id {
                KeyIdentifier::Label(label) => &key.label == label,
                KeyIdentifier::Id(id) => &key.id == id,
            })
            .map(|index| index as u64 + 1))
    }

    fn public_key_info(
        &self,
        private_key: ObjectHandle,
        _key_id: &KeyIdentifier,
    ) -> HResult<PublicKeyInfo> {
        Ok(match &self.key(private_key)?.material {
            SoftKeyMaterial::Rsa(rsa) => PublicKeyInfo::Rsa {
                modulus: rsa.n().to_vec(),
                public_exponent: rsa.e().to_vec(),
            },
            SoftKeyMaterial::Ec(ec) => PublicKeyInfo::Ec {
                params: match ec.group().curve_name() {
                    Some(Nid::X9_62_PRIME256V1) => P256_PARAMS.to_vec(),
                    Some(Nid::SECP384R1) => P384_PARAMS.to_vec(),
                    _ => return Err(HError::Token("unsupported test curve".to_owned())),
                },
            },
            SoftKeyMaterial::Public(info) => info.clone(),
            SoftKeyMaterial::FixedEcdsa { params, .. } => PublicKeyInfo::Ec {
                params: params.clone(),
            },
        })
    }

    fn sign(
        &self,
        private_key: ObjectHandle,
        mechanism: Mechanism,
        params: Option<&MechanismParams>,
        data: &[u8],
    ) -> HResult<Vec<u8>> {
        self.record_sign(private_key, mechanism, params, &[data])
    }

    fn sign_multi_part(
        &self,
        private_key: ObjectHandle,
        mechanism: Mechanism,
        params: Option<&MechanismParams>,
        parts: &[&[u8]],
    ) -> HResult<Vec<u8>> {
        self.record_sign(private_key, mechanism, params, parts)
    }
}

/// `CKM_RSA_PKCS_PSS` over an already computed hash.
fn rsa_pss(
    rsa: &Rsa<Private>,
    params: Option<&MechanismParams>,
    hash: &[u8],
) -> HResult<Vec<u8>> {
    let invalid = || HError::Token(format!("C_SignInit: {CKR_MECHANISM_PARAM_INVALID:#x}"));
    let Some(MechanismParams::RsaPss {
        hash: hash_mechanism,
        mgf,
        salt_len,
    }) = params
    else {
        return Err(invalid());
    };
    let digest = DigestAlgorithm::ALL
        .into_iter()
        .find(|digest| digest.hash_mechanism() == *hash_mechanism)
        .ok_or_else(invalid)?;
    let mgf_digest = DigestAlgorithm::ALL
        .into_iter()
        .find(|digest| digest.mgf1() == *mgf)
        .ok_or_else(invalid)?;
    let key = PKey::from_rsa(rsa.clone())?;
    let mut ctx = PkeyCtx::new(&key)?;
    ctx.sign_init()?;
    ctx.set_rsa_padding(Padding::PKCS1_PSS)?;
    ctx.set_signature_md(digest.md())?;
    ctx.set_rsa_mgf1_md(mgf_digest.md())?;
    ctx.set_rsa_pss_saltlen(RsaPssSaltlen::custom(i32::try_from(*salt_len)?))?;
    let mut signature = Vec::new();
    ctx.sign_to_vec(hash, &mut signature)?;
    Ok(signature)
}

fn rsa_private(rsa: &Rsa<Private>, data: &[u8], padding: Padding) -> HResult<Vec<u8>> {
    let mut signature = vec![0_u8; usize::try_from(rsa.size())?];
    let len = rsa.private_encrypt(data, &mut signature, padding)?;
    signature.truncate(len);
    Ok(signature)
}
