//! Symbolic and numeric PKCS#11 mechanism identifiers.
//!
//! The [`MechanismCatalog`] is built once and handed by reference to whatever needs to turn
//! configuration tokens into mechanism codes; it is never mutated afterwards.

use std::collections::HashMap;

use crate::{HError, HResult, slot::parse_u64_literal};

/// A PKCS#11 mechanism code (`CK_MECHANISM_TYPE`).
pub type Mechanism = u64;

pub const CKM_RSA_PKCS: Mechanism = 0x0001;
pub const CKM_RSA_X_509: Mechanism = 0x0003;
pub const CKM_RSA_PKCS_PSS: Mechanism = 0x000D;
pub const CKM_DSA: Mechanism = 0x0011;
pub const CKM_ECDSA: Mechanism = 0x1041;
pub const CKM_VENDOR_DEFINED: Mechanism = 0x8000_0000;

/// The result of resolving a mechanism token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MechanismSelector {
    /// The reserved `ALL` token: every mechanism is accepted.
    All,
    Code(Mechanism),
}

const MECHANISMS: &[(&str, Mechanism)] = &[
    ("CKM_RSA_PKCS_KEY_PAIR_GEN", 0x0000),
    ("CKM_RSA_PKCS", CKM_RSA_PKCS),
    ("CKM_RSA_9796", 0x0002),
    ("CKM_RSA_X_509", CKM_RSA_X_509),
    ("CKM_MD2_RSA_PKCS", 0x0004),
    ("CKM_MD5_RSA_PKCS", 0x0005),
    ("CKM_SHA1_RSA_PKCS", 0x0006),
    ("CKM_RIPEMD128_RSA_PKCS", 0x0007),
    ("CKM_RIPEMD160_RSA_PKCS", 0x0008),
    ("CKM_RSA_PKCS_OAEP", 0x0009),
    ("CKM_RSA_X9_31_KEY_PAIR_GEN", 0x000A),
    ("CKM_RSA_X9_31", 0x000B),
    ("CKM_SHA1_RSA_X9_31", 0x000C),
    ("CKM_RSA_PKCS_PSS", CKM_RSA_PKCS_PSS),
    ("CKM_SHA1_RSA_PKCS_PSS", 0x000E),
    ("CKM_DSA_KEY_PAIR_GEN", 0x0010),
    ("CKM_DSA", CKM_DSA),
    ("CKM_DSA_SHA1", 0x0012),
    ("CKM_DSA_SHA224", 0x0013),
    ("CKM_DSA_SHA256", 0x0014),
    ("CKM_DSA_SHA384", 0x0015),
    ("CKM_DSA_SHA512", 0x0016),
    ("CKM_DSA_SHA3_224", 0x0018),
    ("CKM_DSA_SHA3_256", 0x0019),
    ("CKM_DSA_SHA3_384", 0x001A),
    ("CKM_DSA_SHA3_512", 0x001B),
    ("CKM_DH_PKCS_KEY_PAIR_GEN", 0x0020),
    ("CKM_DH_PKCS_DERIVE", 0x0021),
    ("CKM_SHA256_RSA_PKCS", 0x0040),
    ("CKM_SHA384_RSA_PKCS", 0x0041),
    ("CKM_SHA512_RSA_PKCS", 0x0042),
    ("CKM_SHA256_RSA_PKCS_PSS", 0x0043),
    ("CKM_SHA384_RSA_PKCS_PSS", 0x0044),
    ("CKM_SHA512_RSA_PKCS_PSS", 0x0045),
    ("CKM_SHA224_RSA_PKCS", 0x0046),
    ("CKM_SHA224_RSA_PKCS_PSS", 0x0047),
    ("CKM_SHA512_224", 0x0048),
    ("CKM_SHA512_256", 0x004C),
    ("CKM_SHA3_256_RSA_PKCS", 0x0060),
    ("CKM_SHA3_384_RSA_PKCS", 0x0061),
    ("CKM_SHA3_512_RSA_PKCS", 0x0062),
    ("CKM_SHA3_256_RSA_PKCS_PSS", 0x0063),
    ("CKM_SHA3_384_RSA_PKCS_PSS", 0x0064),
    ("CKM_SHA3_512_RSA_PKCS_PSS", 0x0065),
    ("CKM_SHA3_224_RSA_PKCS", 0x0066),
    ("CKM_SHA3_224_RSA_PKCS_PSS", 0x0067),
    ("CKM_SHA_1", 0x0220),
    ("CKM_SHA_1_HMAC", 0x0221),
    ("CKM_SHA256", 0x0250),
    ("CKM_SHA256_HMAC", 0x0251),
    ("CKM_SHA224", 0x0255),
    ("CKM_SHA224_HMAC", 0x0256),
    ("CKM_SHA384", 0x0260),
    ("CKM_SHA384_HMAC", 0x0261),
    ("CKM_SHA512", 0x0270),
    ("CKM_SHA512_HMAC", 0x0271),
    ("CKM_SHA3_256", 0x02B0),
    ("CKM_SHA3_256_HMAC", 0x02B1),
    ("CKM_SHA3_224", 0x02B5),
    ("CKM_SHA3_224_HMAC", 0x02B6),
    ("CKM_SHA3_384", 0x02C0),
    ("CKM_SHA3_384_HMAC", 0x02C1),
    ("CKM_SHA3_512", 0x02D0),
    ("CKM_SHA3_512_HMAC", 0x02D1),
    ("CKM_GENERIC_SECRET_KEY_GEN", 0x0350),
    ("CKM_EC_KEY_PAIR_GEN", 0x1040),
    ("CKM_ECDSA", CKM_ECDSA),
    ("CKM_ECDSA_SHA1", 0x1042),
    ("CKM_ECDSA_SHA224", 0x1043),
    ("CKM_ECDSA_SHA256", 0x1044),
    ("CKM_ECDSA_SHA384", 0x1045),
    ("CKM_ECDSA_SHA512", 0x1046),
    ("CKM_ECDSA_SHA3_224", 0x1047),
    ("CKM_ECDSA_SHA3_256", 0x1048),
    ("CKM_ECDSA_SHA3_384", 0x1049),
    ("CKM_ECDSA_SHA3_512", 0x104A),
    ("CKM_ECDH1_DERIVE", 0x1050),
    ("CKM_EC_EDWARDS_KEY_PAIR_GEN", 0x1055),
    ("CKM_EDDSA", 0x1057),
    ("CKM_AES_KEY_GEN", 0x1080),
    ("CKM_AES_ECB", 0x1081),
    ("CKM_AES_CBC", 0x1082),
    ("CKM_AES_MAC", 0x1083),
    ("CKM_AES_CBC_PAD", 0x1085),
    ("CKM_AES_CTR", 0x1086),
    ("CKM_AES_GCM", 0x1087),
    ("CKM_AES_CMAC", 0x108A),
    ("CKM_AES_KEY_WRAP", 0x2109),
    ("CKM_AES_KEY_WRAP_PAD", 0x210A),
    ("CKM_VENDOR_DEFINED", CKM_VENDOR_DEFINED),
];

/// Alternative spellings found in vendor documentation and older configuration files.
const ALIASES: &[(&str, &str)] = &[
    ("CKM_SHA1", "CKM_SHA_1"),
    ("CKM_SHA1_HMAC", "CKM_SHA_1_HMAC"),
    ("CKM_ECDSA_KEY_PAIR_GEN", "CKM_EC_KEY_PAIR_GEN"),
];

/// Immutable name <-> code table of PKCS#11 mechanisms.
#[derive(Debug, Clone)]
pub struct MechanismCatalog {
    by_name: HashMap<&'static str, Mechanism>,
    by_code: HashMap<Mechanism, &'static str>,
}

impl Default for MechanismCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MechanismCatalog {
    #[must_use]
    pub fn new() -> Self {
        let mut by_name: HashMap<&'static str, Mechanism> = MECHANISMS.iter().copied().collect();
        let by_code = MECHANISMS.iter().map(|&(name, code)| (code, name)).collect();
        for &(alias, canonical) in ALIASES {
            if let Some(&code) = by_name.get(canonical) {
                by_name.insert(alias, code);
            }
        }
        Self { by_name, by_code }
    }

    /// Resolve a configuration token into a mechanism selector.
    ///
    /// Accepted forms, all case-insensitive and trimmed:
    /// * `ALL`, the accept-everything sentinel
    /// * a symbolic name, with or without its `CKM_` prefix (`CKM_RSA_PKCS`, `ecdsa`)
    /// * a decimal or `0x` hexadecimal literal, optionally with a `L`/`UL` suffix
    ///
    /// # Errors
    /// `HError::UnknownMechanism` when the token matches none of these forms.
    pub fn resolve(&self, token: &str) -> HResult<MechanismSelector> {
        let normalized = token.trim().to_ascii_uppercase();
        if normalized == "ALL" {
            return Ok(MechanismSelector::All);
        }
        if normalized.starts_with("CKM_") {
            return self
                .by_name
                .get(normalized.as_str())
                .map(|&code| MechanismSelector::Code(code))
                .ok_or_else(|| HError::UnknownMechanism(token.to_owned()));
        }
        if let Some(code) = parse_u64_literal(&normalized, true) {
            return Ok(MechanismSelector::Code(code));
        }
        self.by_name
            .get(format!("CKM_{normalized}").as_str())
            .map(|&code| MechanismSelector::Code(code))
            .ok_or_else(|| HError::UnknownMechanism(token.to_owned()))
    }

    /// Resolve a token that must name a single mechanism.
    pub fn resolve_code(&self, token: &str) -> HResult<Mechanism> {
        match self.resolve(token)? {
            MechanismSelector::Code(code) => Ok(code),
            MechanismSelector::All => Err(HError::InvalidParameter(format!(
                "'{token}' does not designate a single mechanism"
            ))),
        }
    }

    /// The canonical name of a mechanism, if the catalog knows it.
    #[must_use]
    pub fn name_of(&self, mechanism: Mechanism) -> Option<&'static str> {
        self.by_code.get(&mechanism).copied()
    }

    /// A printable form: the canonical name, or the hexadecimal code.
    #[must_use]
    pub fn describe(&self, mechanism: Mechanism) -> String {
        self.name_of(mechanism).map_or_else(
            || {
                if mechanism >= CKM_VENDOR_DEFINED {
                    format!("CKM_VENDOR_DEFINED|{:#x}", mechanism - CKM_VENDOR_DEFINED)
                } else {
                    format!("{mechanism:#x}")
                }
            },
            ToOwned::to_owned,
        )
    }
}
