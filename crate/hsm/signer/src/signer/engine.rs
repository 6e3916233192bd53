use std::fmt::{self, Debug, Formatter};

use openssl::hash::Hasher;
use pki_logger::trace;

use crate::{
    DigestAlgorithm, EcdsaEncoding, EngineState, HError, HResult, KeyAlgorithm, KeyHandle,
    PssEncodedMessage, PssEncoder, PssParameters,
};

/// The signature scheme an engine implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// RSASSA-PKCS1-v1_5
    RsaPkcs1 { digest: DigestAlgorithm },
    /// RSASSA-PSS. With a `digest`, the content digest is fixed and parameters using another
    /// one are rejected; without, any parameters are accepted.
    RsaPss { digest: Option<DigestAlgorithm> },
    /// ECDSA in DER or plain encoding
    Ecdsa {
        digest: DigestAlgorithm,
        encoding: EcdsaEncoding,
    },
}

impl SignatureScheme {
    const fn key_algorithm(self) -> KeyAlgorithm {
        match self {
            Self::RsaPkcs1 { .. } | Self::RsaPss { .. } => KeyAlgorithm::Rsa,
            Self::Ecdsa { .. } => KeyAlgorithm::Ec,
        }
    }
}

/// A streaming signer backed by a key held in a token.
///
/// The message is hashed in this process and only the final primitive runs on the token, in
/// exactly one call. PSS messages are encoded here too, unless the slot implements
/// `CKM_RSA_PKCS_PSS`.
///
/// ```text
/// Uninitialized --init_sign--> Initialized --update--> Accumulating --sign--> Finalized
/// ```
///
/// `init_sign` may be called in any state and starts a new operation. Verification is not
/// supported: the token is used as a signing oracle only.
pub struct SignatureEngine {
    scheme: SignatureScheme,
    pss_params: Option<PssParameters>,
    key: Option<KeyHandle>,
    hasher: Option<Hasher>,
    state: EngineState,
}

impl SignatureEngine {
    #[must_use]
    pub fn new(scheme: SignatureScheme) -> Self {
        let pss_params = match scheme {
            SignatureScheme::RsaPss { digest: Some(digest) } => {
                Some(PssParameters::for_digest(digest))
            }
            SignatureScheme::RsaPss { digest: None } => Some(PssParameters::default()),
            SignatureScheme::RsaPkcs1 { .. } | SignatureScheme::Ecdsa { .. } => None,
        };
        Self {
            scheme,
            pss_params,
            key: None,
            hasher: None,
            state: EngineState::Uninitialized,
        }
    }

    #[must_use]
    pub fn rsa_pkcs1(digest: DigestAlgorithm) -> Self {
        Self::new(SignatureScheme::RsaPkcs1 { digest })
    }

    /// RSASSA-PSS with default parameters until [`SignatureEngine::set_parameters`] is called.
    #[must_use]
    pub fn rsa_pss() -> Self {
        Self::new(SignatureScheme::RsaPss { digest: None })
    }

    /// RSASSA-PSS with `digest` for the content and MGF1, and a salt of the digest length.
    #[must_use]
    pub fn rsa_pss_with_digest(digest: DigestAlgorithm) -> Self {
        Self::new(SignatureScheme::RsaPss {
            digest: Some(digest),
        })
    }

    #[must_use]
    pub fn ecdsa(digest: DigestAlgorithm, encoding: EcdsaEncoding) -> Self {
        Self::new(SignatureScheme::Ecdsa { digest, encoding })
    }

    #[must_use]
    pub const fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    #[must_use]
    pub const fn pss_parameters(&self) -> Option<&PssParameters> {
        self.pss_params.as_ref()
    }

    /// The digest applied to the content.
    #[must_use]
    pub fn digest(&self) -> DigestAlgorithm {
        match (self.scheme, &self.pss_params) {
            (SignatureScheme::RsaPkcs1 { digest } | SignatureScheme::Ecdsa { digest, .. }, _) => {
                digest
            }
            (SignatureScheme::RsaPss { .. }, Some(params)) => params.digest(),
            (SignatureScheme::RsaPss { digest }, None) => {
                digest.unwrap_or(DigestAlgorithm::Sha1)
            }
        }
    }

    /// Replace the PSS parameters.
    ///
    /// # Errors
    /// * [`HError::InvalidParameter`] if the scheme is not PSS, or the engine was created for
    ///   a fixed digest and `params` uses another one
    /// * [`HError::IllegalState`] once data has been fed
    pub fn set_parameters(&mut self, params: PssParameters) -> HResult<()> {
        let SignatureScheme::RsaPss { digest: fixed } = self.scheme else {
            return Err(HError::InvalidParameter(
                "only RSA-PSS engines take parameters".to_owned(),
            ));
        };
        if self.state == EngineState::Accumulating {
            return Err(HError::IllegalState(
                "parameters cannot change once data has been fed".to_owned(),
            ));
        }
        if let Some(fixed) = fixed {
            if params.digest() != fixed {
                return Err(HError::InvalidParameter(format!(
                    "this engine signs with {fixed}, not {}",
                    params.digest()
                )));
            }
        }
        self.pss_params = Some(params);
        if self.state == EngineState::Initialized {
            self.hasher = Some(params.digest().hasher()?);
        }
        Ok(())
    }

    /// Bind `key` and start a new signing operation.
    ///
    /// # Errors
    /// [`HError::InvalidKey`] if the key algorithm does not fit the scheme.
    pub fn init_sign(&mut self, key: &KeyHandle) -> HResult<()> {
        let expected = self.scheme.key_algorithm();
        if key.algorithm() != expected {
            return Err(HError::InvalidKey(format!(
                "{expected} key required, {} is a {} key",
                key.key_id(),
                key.algorithm()
            )));
        }
        self.hasher = Some(self.digest().hasher()?);
        self.key = Some(key.clone());
        self.state = EngineState::Initialized;
        Ok(())
    }

    pub fn update(&mut self, data: &[u8]) -> HResult<()> {
        self.state.check_update()?;
        self.hasher
            .as_mut()
            .ok_or_else(|| HError::IllegalState("no running digest".to_owned()))?
            .update(data)?;
        self.state = EngineState::Accumulating;
        Ok(())
    }

    /// Produce the signature of everything fed since `init_sign`.
    ///
    /// # Errors
    /// * [`HError::IllegalState`] before `init_sign`, or when called twice
    /// * any error of the token call; the engine is finalised anyway
    pub fn sign(&mut self) -> HResult<Vec<u8>> {
        let (key, hash) = self.finalize_digest()?;
        trace!("signing a {} hash with {:?}", self.digest(), self.scheme);
        match self.scheme {
            SignatureScheme::RsaPkcs1 { digest } => key.sign_pkcs1(digest, &hash),
            SignatureScheme::RsaPss { .. } => {
                key.sign_pss(&self.current_pss_parameters()?, &hash)
            }
            SignatureScheme::Ecdsa { encoding, .. } => key.sign_ecdsa(&hash, encoding),
        }
    }

    /// First half of a PSS signature: hash and encode the content without calling the token.
    /// Finish with [`KeyHandle::sign_pss_encoded`].
    ///
    /// # Errors
    /// * [`HError::UnsupportedOperation`] if the scheme is not PSS
    /// * [`HError::IllegalState`] as for [`SignatureEngine::sign`]
    pub fn encode_pss(&mut self) -> HResult<PssEncodedMessage> {
        if !matches!(self.scheme, SignatureScheme::RsaPss { .. }) {
            return Err(HError::UnsupportedOperation(
                "only RSA-PSS engines produce encoded messages".to_owned(),
            ));
        }
        let (key, hash) = self.finalize_digest()?;
        PssEncoder::new(self.current_pss_parameters()?, key.key_size()).encode_digest(&hash)
    }

    /// Verification is not available with token keys.
    pub fn init_verify(&mut self, _key: &KeyHandle) -> HResult<()> {
        Err(HError::UnsupportedOperation(
            "signature verification is not supported".to_owned(),
        ))
    }

    /// Verification is not available with token keys.
    pub fn verify(&mut self, _signature: &[u8]) -> HResult<bool> {
        Err(HError::UnsupportedOperation(
            "signature verification is not supported".to_owned(),
        ))
    }

    fn finalize_digest(&mut self) -> HResult<(KeyHandle, Vec<u8>)> {
        self.state.check_finish()?;
        self.state = EngineState::Finalized;
        let mut hasher = self
            .hasher
            .take()
            .ok_or_else(|| HError::IllegalState("no running digest".to_owned()))?;
        let key = self
            .key
            .clone()
            .ok_or_else(|| HError::IllegalState("no key bound".to_owned()))?;
        Ok((key, hasher.finish()?.to_vec()))
    }

    fn current_pss_parameters(&self) -> HResult<PssParameters> {
        self.pss_params
            .ok_or_else(|| HError::IllegalState("no PSS parameters".to_owned()))
    }
}

impl Debug for SignatureEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureEngine")
            .field("scheme", &self.scheme)
            .field("pss_params", &self.pss_params)
            .field("key", &self.key)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
