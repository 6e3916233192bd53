use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use openssl::{
    hash::{Hasher, MessageDigest},
    md::{Md, MdRef},
};

use crate::{HError, HResult, Mechanism};

const SHA1_DIGEST_INFO: &[u8] = &[
    0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04, 0x14,
];
const SHA224_DIGEST_INFO: &[u8] = &[
    0x30, 0x2d, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x04,
    0x05, 0x00, 0x04, 0x1c,
];
const SHA256_DIGEST_INFO: &[u8] = &[
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    0x05, 0x00, 0x04, 0x20,
];
const SHA384_DIGEST_INFO: &[u8] = &[
    0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02,
    0x05, 0x00, 0x04, 0x30,
];
const SHA512_DIGEST_INFO: &[u8] = &[
    0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03,
    0x05, 0x00, 0x04, 0x40,
];
const SHA3_224_DIGEST_INFO: &[u8] = &[
    0x30, 0x2d, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x07,
    0x05, 0x00, 0x04, 0x1c,
];
const SHA3_256_DIGEST_INFO: &[u8] = &[
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x08,
    0x05, 0x00, 0x04, 0x20,
];
const SHA3_384_DIGEST_INFO: &[u8] = &[
    0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x09,
    0x05, 0x00, 0x04, 0x30,
];
const SHA3_512_DIGEST_INFO: &[u8] = &[
    0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x0a,
    0x05, 0x00, 0x04, 0x40,
];

/// Message digests usable by the signature engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
}

impl DigestAlgorithm {
    pub const ALL: [Self; 9] = [
        Self::Sha1,
        Self::Sha224,
        Self::Sha256,
        Self::Sha384,
        Self::Sha512,
        Self::Sha3_224,
        Self::Sha3_256,
        Self::Sha3_384,
        Self::Sha3_512,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "SHA-1",
            Self::Sha224 => "SHA-224",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
            Self::Sha3_224 => "SHA3-224",
            Self::Sha3_256 => "SHA3-256",
            Self::Sha3_384 => "SHA3-384",
            Self::Sha3_512 => "SHA3-512",
        }
    }

    /// Output length in bytes.
    #[must_use]
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha224 | Self::Sha3_224 => 28,
            Self::Sha256 | Self::Sha3_256 => 32,
            Self::Sha384 | Self::Sha3_384 => 48,
            Self::Sha512 | Self::Sha3_512 => 64,
        }
    }

    #[must_use]
    pub fn message_digest(self) -> MessageDigest {
        match self {
            Self::Sha1 => MessageDigest::sha1(),
            Self::Sha224 => MessageDigest::sha224(),
            Self::Sha256 => MessageDigest::sha256(),
            Self::Sha384 => MessageDigest::sha384(),
            Self::Sha512 => MessageDigest::sha512(),
            Self::Sha3_224 => MessageDigest::sha3_224(),
            Self::Sha3_256 => MessageDigest::sha3_256(),
            Self::Sha3_384 => MessageDigest::sha3_384(),
            Self::Sha3_512 => MessageDigest::sha3_512(),
        }
    }

    /// The same digest for the `EVP_MD_CTX` based APIs.
    #[must_use]
    pub fn md(self) -> &'static MdRef {
        match self {
            Self::Sha1 => Md::sha1(),
            Self::Sha224 => Md::sha224(),
            Self::Sha256 => Md::sha256(),
            Self::Sha384 => Md::sha384(),
            Self::Sha512 => Md::sha512(),
            Self::Sha3_224 => Md::sha3_224(),
            Self::Sha3_256 => Md::sha3_256(),
            Self::Sha3_384 => Md::sha3_384(),
            Self::Sha3_512 => Md::sha3_512(),
        }
    }

    /// DER encoding of the PKCS#1 `DigestInfo` up to, and excluding, the digest value.
    #[must_use]
    pub const fn digest_info_prefix(self) -> &'static [u8] {
        match self {
            Self::Sha1 => SHA1_DIGEST_INFO,
            Self::Sha224 => SHA224_DIGEST_INFO,
            Self::Sha256 => SHA256_DIGEST_INFO,
            Self::Sha384 => SHA384_DIGEST_INFO,
            Self::Sha512 => SHA512_DIGEST_INFO,
            Self::Sha3_224 => SHA3_224_DIGEST_INFO,
            Self::Sha3_256 => SHA3_256_DIGEST_INFO,
            Self::Sha3_384 => SHA3_384_DIGEST_INFO,
            Self::Sha3_512 => SHA3_512_DIGEST_INFO,
        }
    }

    /// The PKCS#11 `CKM_SHA*` mechanism of this digest.
    #[must_use]
    pub const fn hash_mechanism(self) -> Mechanism {
        match self {
            Self::Sha1 => 0x0220,
            Self::Sha224 => 0x0255,
            Self::Sha256 => 0x0250,
            Self::Sha384 => 0x0260,
            Self::Sha512 => 0x0270,
            Self::Sha3_224 => 0x02B5,
            Self::Sha3_256 => 0x02B0,
            Self::Sha3_384 => 0x02C0,
            Self::Sha3_512 => 0x02D0,
        }
    }

    /// The PKCS#11 `CKG_MGF1_*` code of MGF1 over this digest.
    #[must_use]
    pub const fn mgf1(self) -> u64 {
        match self {
            Self::Sha1 => 0x01,
            Self::Sha256 => 0x02,
            Self::Sha384 => 0x03,
            Self::Sha512 => 0x04,
            Self::Sha224 => 0x05,
            Self::Sha3_224 => 0x06,
            Self::Sha3_256 => 0x07,
            Self::Sha3_384 => 0x08,
            Self::Sha3_512 => 0x09,
        }
    }

    pub fn hasher(self) -> HResult<Hasher> {
        Ok(Hasher::new(self.message_digest())?)
    }

    /// One-shot digest of `data`.
    pub fn digest(self, data: &[u8]) -> HResult<Vec<u8>> {
        Ok(openssl::hash::hash(self.message_digest(), data)?.to_vec())
    }
}

impl Display for DigestAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = HError;

    /// Accepts `SHA-256`, `SHA256`, `sha3-256`, `SHA3_256` and the like.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .collect::<String>()
            .to_ascii_uppercase();
        Ok(match normalized.as_str() {
            "SHA1" => Self::Sha1,
            "SHA224" => Self::Sha224,
            "SHA256" => Self::Sha256,
            "SHA384" => Self::Sha384,
            "SHA512" => Self::Sha512,
            "SHA3224" => Self::Sha3_224,
            "SHA3256" => Self::Sha3_256,
            "SHA3384" => Self::Sha3_384,
            "SHA3512" => Self::Sha3_512,
            _ => {
                return Err(HError::InvalidParameter(format!(
                    "unsupported digest algorithm '{s}'"
                )));
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_names() {
        assert_eq!("SHA-256".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha256);
        assert_eq!("sha1".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha1);
        assert_eq!("SHA3_384".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha3_384);
        assert_eq!("sha3-512".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha3_512);
        assert!("MD5".parse::<DigestAlgorithm>().is_err());
        for digest in DigestAlgorithm::ALL {
            assert_eq!(digest.name().parse::<DigestAlgorithm>().unwrap(), digest);
        }
    }

    #[test]
    fn digest_info_prefixes_are_consistent() {
        for digest in DigestAlgorithm::ALL {
            let prefix = digest.digest_info_prefix();
            // outer SEQUENCE length covers the rest of the prefix and the digest
            assert_eq!(usize::from(prefix[1]), prefix.len() - 2 + digest.output_len());
            assert_eq!(usize::from(prefix[prefix.len() - 1]), digest.output_len());
            assert_eq!(digest.message_digest().size(), digest.output_len());
        }
    }
}
