//! Handles on private keys held by a token.

use std::{
    fmt::{self, Debug, Display, Formatter},
    sync::Arc,
};

use der::{Decode, asn1::ObjectIdentifier};
use openssl::{asn1::Asn1Object, bn::BigNum, ec::EcGroup, ecdsa::EcdsaSig};
use pki_logger::debug;

use crate::{
    CKM_ECDSA, CKM_RSA_PKCS, CKM_RSA_PKCS_PSS, CKM_RSA_X_509, DigestAlgorithm, HError, HResult,
    KeyIdentifier, Mechanism, MechanismParams, ObjectHandle, PssEncodedMessage, PssEncoder,
    PssParameters, PublicKeyInfo, SlotIdentifier, SlotManager,
};

/// Public key algorithm of a key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Rsa,
    Dsa,
    Ec,
}

impl Display for KeyAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rsa => "RSA",
            Self::Dsa => "DSA",
            Self::Ec => "EC",
        })
    }
}

/// Output encoding of an ECDSA signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcdsaEncoding {
    /// DER `SEQUENCE { INTEGER r, INTEGER s }` (X9.62)
    Der,
    /// `r || s`, each left-padded to the field size
    Plain,
}

/// A reference to a private key inside a slot.
///
/// The handle knows the public algorithm and size of the key; it never holds key material.
/// Every signing request goes through the slot, which applies the module policies.
#[derive(Clone)]
pub struct KeyHandle {
    slot: Arc<SlotManager>,
    key_id: KeyIdentifier,
    object: ObjectHandle,
    algorithm: KeyAlgorithm,
    key_size: usize,
}

impl KeyHandle {
    /// Look the key up in `slot` and classify its public counterpart.
    ///
    /// # Errors
    /// * [`HError::InvalidKey`] if the slot holds no such private key
    /// * [`HError::UnsupportedKeyType`] if the key is neither RSA, DSA nor EC, or its curve
    ///   is unknown
    pub fn new(slot: Arc<SlotManager>, key_id: KeyIdentifier) -> HResult<Self> {
        let object = slot.find_key(&key_id)?;
        let public_key = slot.public_key_info(object, &key_id)?;
        let (algorithm, key_size) = classify(&public_key)?;
        debug!(
            "Key {key_id} of slot {}: {algorithm} {key_size} bits",
            slot.slot()
        );
        Ok(Self {
            slot,
            key_id,
            object,
            algorithm,
            key_size,
        })
    }

    #[must_use]
    pub fn slot(&self) -> SlotIdentifier {
        self.slot.slot()
    }

    #[must_use]
    pub const fn key_id(&self) -> &KeyIdentifier {
        &self.key_id
    }

    #[must_use]
    pub const fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Modulus bits (RSA), prime bits (DSA) or field bits (EC).
    #[must_use]
    pub const fn key_size(&self) -> usize {
        self.key_size
    }

    /// Key size in bytes, rounded up.
    #[must_use]
    pub const fn key_len(&self) -> usize {
        self.key_size.div_ceil(8)
    }

    /// Whether the slot can sign with `mechanism`: the token implements it and the module
    /// policy allows it.
    #[must_use]
    pub fn supports_mechanism(&self, mechanism: Mechanism) -> bool {
        self.slot.supports_mechanism(mechanism)
    }

    /// One raw signing operation with `mechanism` on the token.
    ///
    /// # Errors
    /// * [`HError::MechanismNotPermitted`] if the module policy denies the mechanism
    /// * [`HError::Security`] if the token does not implement the mechanism
    /// * [`HError::Token`] if the token fails
    pub fn sign(
        &self,
        mechanism: Mechanism,
        params: Option<&MechanismParams>,
        content: &[u8],
    ) -> HResult<Vec<u8>> {
        self.slot.sign(self.object, mechanism, params, content)
    }

    /// RSASSA-PKCS1-v1_5 over an already computed `hash`.
    ///
    /// The `DigestInfo` is signed with `CKM_RSA_PKCS` when the slot supports it; otherwise
    /// the block is padded here and signed with `CKM_RSA_X_509`.
    pub fn sign_pkcs1(&self, digest: DigestAlgorithm, hash: &[u8]) -> HResult<Vec<u8>> {
        self.expect_algorithm(KeyAlgorithm::Rsa)?;
        if hash.len() != digest.output_len() {
            return Err(HError::InvalidParameter(format!(
                "a {digest} hash is {} bytes, got {}",
                digest.output_len(),
                hash.len()
            )));
        }
        let prefix = digest.digest_info_prefix();
        let mut digest_info = Vec::with_capacity(prefix.len() + hash.len());
        digest_info.extend_from_slice(prefix);
        digest_info.extend_from_slice(hash);
        if self.supports_mechanism(CKM_RSA_PKCS) {
            return self.sign(CKM_RSA_PKCS, None, &digest_info);
        }
        let block = emsa_pkcs1_v1_5(&digest_info, self.key_len())?;
        self.sign(CKM_RSA_X_509, None, &block)
    }

    /// RSASSA-PSS over an already computed `hash`.
    ///
    /// The token encodes the hash itself with `CKM_RSA_PKCS_PSS` when the slot supports it;
    /// otherwise the message is encoded here and signed with `CKM_RSA_X_509`.
    pub fn sign_pss(&self, params: &PssParameters, hash: &[u8]) -> HResult<Vec<u8>> {
        self.expect_algorithm(KeyAlgorithm::Rsa)?;
        let digest = params.digest();
        if hash.len() != digest.output_len() {
            return Err(HError::InvalidParameter(format!(
                "a {digest} hash is {} bytes, got {}",
                digest.output_len(),
                hash.len()
            )));
        }
        if self.supports_mechanism(CKM_RSA_PKCS_PSS) {
            let mechanism_params = MechanismParams::RsaPss {
                hash: digest.hash_mechanism(),
                mgf: params.mgf_digest().mgf1(),
                salt_len: params.salt_len(),
            };
            return self.sign(CKM_RSA_PKCS_PSS, Some(&mechanism_params), hash);
        }
        let encoded = PssEncoder::new(*params, self.key_size).encode_digest(hash)?;
        self.sign_pss_encoded(&encoded)
    }

    /// Apply the raw RSA primitive to a PSS encoded message.
    pub fn sign_pss_encoded(&self, encoded: &PssEncodedMessage) -> HResult<Vec<u8>> {
        self.expect_algorithm(KeyAlgorithm::Rsa)?;
        let k = self.key_len();
        let em = encoded.as_bytes();
        if em.len() > k {
            return Err(HError::InvalidParameter(format!(
                "encoded message of {} bytes does not fit a {}-bit modulus",
                em.len(),
                self.key_size
            )));
        }
        let mut block = vec![0_u8; k - em.len()];
        block.extend_from_slice(em);
        self.sign(CKM_RSA_X_509, None, &block)
    }

    /// ECDSA over an already computed `hash`, in the requested `encoding`.
    pub fn sign_ecdsa(&self, hash: &[u8], encoding: EcdsaEncoding) -> HResult<Vec<u8>> {
        self.expect_algorithm(KeyAlgorithm::Ec)?;
        let raw = self.sign(CKM_ECDSA, None, hash)?;
        encode_ecdsa_signature(&raw, self.key_len(), encoding)
    }

    fn expect_algorithm(&self, expected: KeyAlgorithm) -> HResult<()> {
        if self.algorithm != expected {
            return Err(HError::InvalidKey(format!(
                "{expected} key required, {} is a {} key",
                self.key_id, self.algorithm
            )));
        }
        Ok(())
    }
}

impl Debug for KeyHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("slot", &self.slot.slot())
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("key_size", &self.key_size)
            .finish_non_exhaustive()
    }
}

fn classify(public_key: &PublicKeyInfo) -> HResult<(KeyAlgorithm, usize)> {
    Ok(match public_key {
        PublicKeyInfo::Rsa { modulus, .. } => (KeyAlgorithm::Rsa, bit_length(modulus)),
        PublicKeyInfo::Dsa { prime } => (KeyAlgorithm::Dsa, bit_length(prime)),
        PublicKeyInfo::Ec { params } => (KeyAlgorithm::Ec, ec_field_size(params)?),
        PublicKeyInfo::Other(key_type) => {
            return Err(HError::UnsupportedKeyType(format!(
                "key type {key_type:#x}"
            )));
        }
    })
}

/// Bit length of a big-endian unsigned integer.
fn bit_length(value: &[u8]) -> usize {
    let Some(first) = value.iter().position(|&b| b != 0) else {
        return 0;
    };
    (value.len() - first) * 8 - value[first].leading_zeros() as usize
}

/// Field size in bits of the named curve in DER `ECParameters`.
fn ec_field_size(params: &[u8]) -> HResult<usize> {
    let oid = ObjectIdentifier::from_der(params).map_err(|e| {
        HError::UnsupportedKeyType(format!("EC parameters are not a named curve: {e}"))
    })?;
    let nid = Asn1Object::from_str(&oid.to_string())?.nid();
    let group = EcGroup::from_curve_name(nid)
        .map_err(|e| HError::UnsupportedKeyType(format!("unknown curve {oid}: {e}")))?;
    Ok(usize::try_from(group.degree())?)
}

/// EMSA-PKCS1-v1_5 encoding (RFC 8017 9.2) of a DER `DigestInfo` into a `k` bytes block.
fn emsa_pkcs1_v1_5(digest_info: &[u8], k: usize) -> HResult<Vec<u8>> {
    if k < digest_info.len() + 11 {
        return Err(HError::InvalidKey(
            "intended encoded message length too short".to_owned(),
        ));
    }
    let mut block = Vec::with_capacity(k);
    block.extend_from_slice(&[0x00, 0x01]);
    block.resize(k - digest_info.len() - 1, 0xff);
    block.push(0x00);
    block.extend_from_slice(digest_info);
    Ok(block)
}

/// Re-encode the `r || s` output of `CKM_ECDSA`.
pub(crate) fn encode_ecdsa_signature(
    raw: &[u8],
    field_len: usize,
    encoding: EcdsaEncoding,
) -> HResult<Vec<u8>> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(HError::Token(format!(
            "invalid ECDSA signature length {}",
            raw.len()
        )));
    }
    let (r, s) = raw.split_at(raw.len() / 2);
    match encoding {
        EcdsaEncoding::Der => Ok(EcdsaSig::from_private_components(
            BigNum::from_slice(r)?,
            BigNum::from_slice(s)?,
        )?
        .to_der()?),
        EcdsaEncoding::Plain => {
            let mut plain = Vec::with_capacity(2 * field_len);
            for half in [r, s] {
                let first = half.iter().position(|&b| b != 0).unwrap_or(half.len());
                let significant = &half[first..];
                if significant.len() > field_len {
                    return Err(HError::Token(format!(
                        "ECDSA signature component larger than {field_len} bytes"
                    )));
                }
                plain.resize(plain.len() + field_len - significant.len(), 0);
                plain.extend_from_slice(significant);
            }
            Ok(plain)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bit_lengths() {
        assert_eq!(bit_length(&[]), 0);
        assert_eq!(bit_length(&[0, 0]), 0);
        assert_eq!(bit_length(&[0x01]), 1);
        assert_eq!(bit_length(&[0x00, 0x80, 0x00]), 16);
        assert_eq!(bit_length(&[0x7f; 4]), 31);
    }

    #[test]
    fn named_curve_sizes() {
        // prime256v1
        let p256 = [0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
        assert_eq!(ec_field_size(&p256).unwrap(), 256);
        // secp384r1
        let p384 = [0x06, 0x05, 0x2b, 0x81, 0x04, 0x00, 0x22];
        assert_eq!(ec_field_size(&p384).unwrap(), 384);
        // secp521r1
        let p521 = [0x06, 0x05, 0x2b, 0x81, 0x04, 0x00, 0x23];
        assert_eq!(ec_field_size(&p521).unwrap(), 521);
        // a NULL (implicitlyCA) is not a named curve
        assert!(matches!(
            ec_field_size(&[0x05, 0x00]),
            Err(HError::UnsupportedKeyType(_))
        ));
    }

    #[test]
    fn pkcs1_block() {
        let digest_info = [0xaa; 35];
        let block = emsa_pkcs1_v1_5(&digest_info, 64).unwrap();
        assert_eq!(block.len(), 64);
        assert_eq!(&block[..2], &[0x00, 0x01]);
        assert!(block[2..64 - 36].iter().all(|&b| b == 0xff));
        assert_eq!(block[64 - 36], 0x00);
        assert_eq!(&block[64 - 35..], &digest_info);
        assert!(emsa_pkcs1_v1_5(&digest_info, 45).is_err());
    }

    #[test]
    fn ecdsa_encodings() {
        // r has a leading zero byte, s has its high bit set
        let mut raw = vec![0x00, 0x01, 0x02, 0x03];
        raw.extend_from_slice(&[0x80, 0x00, 0x00, 0x01]);

        let der = encode_ecdsa_signature(&raw, 4, EcdsaEncoding::Der).unwrap();
        assert_eq!(
            der,
            vec![
                0x30, 0x0c, 0x02, 0x03, 0x01, 0x02, 0x03, 0x02, 0x05, 0x00, 0x80, 0x00, 0x00,
                0x01
            ]
        );

        let plain = encode_ecdsa_signature(&raw, 4, EcdsaEncoding::Plain).unwrap();
        assert_eq!(plain, raw);

        // wider field than the token output
        let plain = encode_ecdsa_signature(&raw, 5, EcdsaEncoding::Plain).unwrap();
        assert_eq!(plain.len(), 10);
        assert_eq!(&plain[..5], &[0x00, 0x00, 0x01, 0x02, 0x03]);

        assert!(encode_ecdsa_signature(&raw[..3], 4, EcdsaEncoding::Plain).is_err());
    }
}
