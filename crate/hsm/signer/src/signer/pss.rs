//! EMSA-PSS encoding (RFC 8017 section 9.1) done in software.
//!
//! Signing with PSS is split into two typed steps: [`PssEncoder::encode_digest`] produces a
//! [`PssEncodedMessage`] without touching the token, then
//! [`crate::KeyHandle::sign_pss_encoded`] applies the raw RSA primitive to it. Callers that
//! already hold an encoded message skip the first step with [`PssEncodedMessage::from_bytes`].

use rand::{TryRngCore, rngs::OsRng};
use zeroize::Zeroizing;

use crate::{DigestAlgorithm, HError, HResult};

/// The only supported trailer field, meaning a `0xbc` trailer byte.
pub const TRAILER_FIELD_BC: u32 = 1;

const TRAILER_BYTE: u8 = 0xbc;

/// RSASSA-PSS parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PssParameters {
    digest: DigestAlgorithm,
    mgf_digest: DigestAlgorithm,
    salt_len: usize,
    trailer_field: u32,
}

impl Default for PssParameters {
    /// SHA-1, MGF1 with SHA-1, 20 bytes of salt.
    fn default() -> Self {
        Self {
            digest: DigestAlgorithm::Sha1,
            mgf_digest: DigestAlgorithm::Sha1,
            salt_len: 20,
            trailer_field: TRAILER_FIELD_BC,
        }
    }
}

impl PssParameters {
    /// # Errors
    /// * [`HError::InvalidParameter`] if the MGF1 digest differs from the content digest
    /// * [`HError::UnsupportedTrailer`] for any trailer field but 1
    pub fn new(
        digest: DigestAlgorithm,
        mgf_digest: DigestAlgorithm,
        salt_len: usize,
        trailer_field: u32,
    ) -> HResult<Self> {
        if mgf_digest != digest {
            return Err(HError::InvalidParameter(format!(
                "the MGF1 digest {mgf_digest} differs from the content digest {digest}"
            )));
        }
        if trailer_field != TRAILER_FIELD_BC {
            return Err(HError::UnsupportedTrailer(trailer_field));
        }
        Ok(Self {
            digest,
            mgf_digest,
            salt_len,
            trailer_field,
        })
    }

    /// `digest` for both the content and MGF1, with a salt as long as the digest output.
    #[must_use]
    pub const fn for_digest(digest: DigestAlgorithm) -> Self {
        Self {
            digest,
            mgf_digest: digest,
            salt_len: digest.output_len(),
            trailer_field: TRAILER_FIELD_BC,
        }
    }

    #[must_use]
    pub const fn digest(&self) -> DigestAlgorithm {
        self.digest
    }

    #[must_use]
    pub const fn mgf_digest(&self) -> DigestAlgorithm {
        self.mgf_digest
    }

    #[must_use]
    pub const fn salt_len(&self) -> usize {
        self.salt_len
    }

    #[must_use]
    pub const fn trailer_field(&self) -> u32 {
        self.trailer_field
    }
}

/// An EMSA-PSS encoded message, ready for the raw RSA primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PssEncodedMessage(Vec<u8>);

impl PssEncodedMessage {
    /// Wrap a message encoded elsewhere.
    ///
    /// # Errors
    /// [`HError::InvalidParameter`] if the message does not end with the `0xbc` trailer.
    pub fn from_bytes(encoded: Vec<u8>) -> HResult<Self> {
        if encoded.last() != Some(&TRAILER_BYTE) {
            return Err(HError::InvalidParameter(
                "a PSS encoded message ends with 0xbc".to_owned(),
            ));
        }
        Ok(Self(encoded))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Encodes message hashes for one RSA modulus size.
#[derive(Debug, Clone, Copy)]
pub struct PssEncoder {
    params: PssParameters,
    modulus_bits: usize,
}

impl PssEncoder {
    #[must_use]
    pub const fn new(params: PssParameters, modulus_bits: usize) -> Self {
        Self {
            params,
            modulus_bits,
        }
    }

    /// Encode `m_hash` with a fresh random salt.
    pub fn encode_digest(&self, m_hash: &[u8]) -> HResult<PssEncodedMessage> {
        let mut salt = Zeroizing::new(vec![0_u8; self.params.salt_len]);
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|e| HError::Default(format!("Error generating the PSS salt: {e}")))?;
        self.encode_digest_with_salt(m_hash, &salt)
    }

    /// Encode `m_hash` with the given salt.
    ///
    /// # Errors
    /// [`HError::InvalidParameter`] if the hash or salt length does not match the parameters,
    /// or the modulus is too small for them.
    pub fn encode_digest_with_salt(&self, m_hash: &[u8], salt: &[u8]) -> HResult<PssEncodedMessage> {
        let digest = self.params.digest;
        let h_len = digest.output_len();
        if m_hash.len() != h_len {
            return Err(HError::InvalidParameter(format!(
                "a {digest} hash is {h_len} bytes, got {}",
                m_hash.len()
            )));
        }
        if salt.len() != self.params.salt_len {
            return Err(HError::InvalidParameter(format!(
                "expected {} bytes of salt, got {}",
                self.params.salt_len,
                salt.len()
            )));
        }
        let em_bits = self.modulus_bits.saturating_sub(1);
        let em_len = em_bits.div_ceil(8);
        if em_len < h_len + salt.len() + 2 {
            return Err(HError::InvalidParameter(format!(
                "a {}-bit modulus is too small for {digest} with {} bytes of salt",
                self.modulus_bits,
                salt.len()
            )));
        }

        // H = Hash(0x00 * 8 || mHash || salt)
        let mut hasher = digest.hasher()?;
        hasher.update(&[0_u8; 8])?;
        hasher.update(m_hash)?;
        hasher.update(salt)?;
        let h = hasher.finish()?;

        // DB = PS || 0x01 || salt, masked with MGF1(H)
        let db_len = em_len - h_len - 1;
        let mut db = vec![0_u8; db_len - salt.len() - 1];
        db.push(0x01);
        db.extend_from_slice(salt);
        let mask = mgf1(self.params.mgf_digest, &h, db_len)?;
        for (byte, mask_byte) in db.iter_mut().zip(mask.iter()) {
            *byte ^= mask_byte;
        }
        let unused_bits = 8 * em_len - em_bits;
        if let Some(first) = db.first_mut() {
            *first &= 0xff_u8 >> unused_bits;
        }

        let mut em = db;
        em.extend_from_slice(&h);
        em.push(TRAILER_BYTE);
        Ok(PssEncodedMessage(em))
    }
}

/// MGF1 (RFC 8017 appendix B.2.1).
fn mgf1(digest: DigestAlgorithm, seed: &[u8], mask_len: usize) -> HResult<Vec<u8>> {
    let mut mask = Vec::with_capacity(mask_len + digest.output_len());
    let mut counter: u32 = 0;
    while mask.len() < mask_len {
        let mut hasher = digest.hasher()?;
        hasher.update(seed)?;
        hasher.update(&counter.to_be_bytes())?;
        mask.extend_from_slice(&hasher.finish()?);
        counter += 1;
    }
    mask.truncate(mask_len);
    Ok(mask)
}
