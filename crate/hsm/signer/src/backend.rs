//! The seam between slot management and a token.
//!
//! [`SlotBackend`] and [`RawSession`] are implemented over a native PKCS#11 library by
//! [`crate::pkcs11`]; any other token (or a test double) can implement them as well.

use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
};

use crate::{HResult, Mechanism};

/// A token-local object handle.
pub type ObjectHandle = u64;

/// How a key is looked up in its slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyIdentifier {
    /// `CKA_LABEL`
    Label(String),
    /// `CKA_ID`
    Id(Vec<u8>),
}

impl KeyIdentifier {
    /// Key of the object handles cache; labels and ids never collide.
    pub(crate) fn cache_key(&self) -> Vec<u8> {
        let (tag, value) = match self {
            Self::Label(label) => (b'L', label.as_bytes()),
            Self::Id(id) => (b'I', id.as_slice()),
        };
        let mut key = Vec::with_capacity(value.len() + 1);
        key.push(tag);
        key.extend_from_slice(value);
        key
    }
}

impl Display for KeyIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(label) => write!(f, "label '{label}'"),
            Self::Id(id) => {
                f.write_str("id 0x")?;
                for b in id {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Public attributes of a key pair, as read from the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeyInfo {
    Rsa {
        /// Big-endian, as stored in `CKA_MODULUS`
        modulus: Vec<u8>,
        public_exponent: Vec<u8>,
    },
    Dsa {
        /// Big-endian, as stored in `CKA_PRIME`
        prime: Vec<u8>,
    },
    Ec {
        /// DER `ECParameters`, as stored in `CKA_EC_PARAMS`
        params: Vec<u8>,
    },
    /// Any other `CKK_*` key type
    Other(u64),
}

/// Parameters attached to a mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MechanismParams {
    /// `CK_RSA_PKCS_PSS_PARAMS`
    RsaPss {
        hash: Mechanism,
        mgf: u64,
        salt_len: usize,
    },
    /// User identity bytes of identity based schemes
    UserId(Vec<u8>),
}

/// An open session on a token.
pub trait RawSession: Send {
    /// Present one PIN for `user_type`. A user that is already logged in is not an error.
    fn login(&self, user_type: u64, pin: &[u8]) -> HResult<()>;

    /// Find the private key designated by `key_id`.
    fn find_private_key(&self, key_id: &KeyIdentifier) -> HResult<Option<ObjectHandle>>;

    /// Read the public attributes of the key pair of `private_key`.
    ///
    /// The public counterpart carrying the same identifier is preferred; the private object
    /// is used when the token has no public object for the key.
    fn public_key_info(
        &self,
        private_key: ObjectHandle,
        key_id: &KeyIdentifier,
    ) -> HResult<PublicKeyInfo>;

    /// One raw signing operation (`C_SignInit` + `C_Sign`).
    fn sign(
        &self,
        private_key: ObjectHandle,
        mechanism: Mechanism,
        params: Option<&MechanismParams>,
        data: &[u8],
    ) -> HResult<Vec<u8>>;

    /// One signing operation fed in `parts` (`C_SignInit`, `C_SignUpdate` per part,
    /// `C_SignFinal`).
    fn sign_multi_part(
        &self,
        private_key: ObjectHandle,
        mechanism: Mechanism,
        params: Option<&MechanismParams>,
        parts: &[&[u8]],
    ) -> HResult<Vec<u8>>;
}

/// A slot of a token.
pub trait SlotBackend: Send + Sync {
    /// The PKCS#11 slot ID.
    fn slot_id(&self) -> u64;

    /// The mechanisms the token implements on this slot.
    fn supported_mechanisms(&self) -> HResult<HashSet<Mechanism>>;

    fn open_session(&self, read_write: bool) -> HResult<Box<dyn RawSession>>;
}
