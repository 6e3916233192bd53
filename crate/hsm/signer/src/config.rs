//! Module configuration.
//!
//! A [`ModuleDescriptor`] is the declarative form read from TOML; a [`ModuleConfig`] is the
//! validated, immutable result. Construction of the latter is the only place configuration
//! errors are raised.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use pki_logger::{debug, warn};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    HError, HResult, Mechanism, MechanismCatalog, MechanismGrant, MechanismPolicy,
    MechanismSelector, PasswordPolicy, PasswordResolver, SlotFilter, SlotFilterSet,
    SlotIdentifier,
    policy::DefaultPasswordResolver,
    slot::{parse_slot_id, parse_u64_literal},
};

pub const CKU_SO: u64 = 0;
pub const CKU_USER: u64 = 1;
pub const CKU_CONTEXT_SPECIFIC: u64 = 2;

/// Smallest accepted `max_message_size`, in bytes.
pub const MIN_MESSAGE_SIZE: usize = 128;

const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024;
const DEFAULT_MAX_SESSIONS_PER_SLOT: usize = 8;

/// A slot reference in the configuration: an index, a slot ID literal, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlotDescriptor {
    pub index: Option<usize>,
    /// Decimal or `0x` hexadecimal
    pub id: Option<String>,
}

/// A native PKCS#11 library, optionally restricted to some operating systems.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NativeLibraryDescriptor {
    pub path: PathBuf,
    #[serde(default)]
    pub operating_systems: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MechanismSetDescriptor {
    pub name: String,
    /// Mechanism names, numeric literals, or `ALL`
    pub mechanisms: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MechanismFilterDescriptor {
    #[serde(default)]
    pub slots: Vec<SlotDescriptor>,
    pub mechanism_set: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordSetDescriptor {
    #[serde(default)]
    pub slots: Vec<SlotDescriptor>,
    pub passwords: Vec<String>,
}

fn default_user() -> String {
    "CKU_USER".to_owned()
}

const fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

const fn default_max_sessions_per_slot() -> usize {
    DEFAULT_MAX_SESSIONS_PER_SLOT
}

/// Declarative description of one PKCS#11 module.
///
/// ```toml
/// name = "softhsm"
/// user = "CKU_USER"
///
/// [[native_libraries]]
/// path = "/usr/lib/softhsm/libsofthsm2.so"
/// operating_systems = ["linux"]
///
/// [[mechanism_sets]]
/// name = "signing"
/// mechanisms = ["CKM_RSA_X_509", "CKM_RSA_PKCS", "CKM_ECDSA"]
///
/// [[mechanism_filters]]
/// mechanism_set = "signing"
///
/// [[password_sets]]
/// slots = [{ index = 0 }]
/// passwords = ["env:HSM_USER_PASSWORD"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDescriptor {
    pub name: String,
    #[serde(default)]
    pub read_only: bool,
    /// `CKU_USER`, `CKU_SO`, `CKU_CONTEXT_SPECIFIC` or a numeric literal
    #[serde(default = "default_user")]
    pub user: String,
    /// Longest message passed to the token in one call; longer ones are signed in parts
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_max_sessions_per_slot")]
    pub max_sessions_per_slot: usize,
    /// How long a signer waits for a free session; forever when absent
    #[serde(default)]
    pub session_wait_timeout_ms: Option<u64>,
    #[serde(default)]
    pub native_libraries: Vec<NativeLibraryDescriptor>,
    #[serde(default)]
    pub mechanism_sets: Vec<MechanismSetDescriptor>,
    #[serde(default)]
    pub mechanism_filters: Vec<MechanismFilterDescriptor>,
    #[serde(default)]
    pub password_sets: Vec<PasswordSetDescriptor>,
    #[serde(default)]
    pub include_slots: Vec<SlotDescriptor>,
    #[serde(default)]
    pub exclude_slots: Vec<SlotDescriptor>,
}

impl Default for ModuleDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            read_only: false,
            user: default_user(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_sessions_per_slot: DEFAULT_MAX_SESSIONS_PER_SLOT,
            session_wait_timeout_ms: None,
            native_libraries: Vec::new(),
            mechanism_sets: Vec::new(),
            mechanism_filters: Vec::new(),
            password_sets: Vec::new(),
            include_slots: Vec::new(),
            exclude_slots: Vec::new(),
        }
    }
}

impl ModuleDescriptor {
    pub fn from_toml_str(content: &str) -> HResult<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// A configuration file holding several modules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pkcs11Conf {
    #[serde(default)]
    pub modules: Vec<ModuleDescriptor>,
}

impl Pkcs11Conf {
    pub fn from_toml_str(content: &str) -> HResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> HResult<Self> {
        debug!("Reading PKCS#11 configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// Validated configuration of one module. Immutable once built.
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    name: String,
    native_library: PathBuf,
    read_only: bool,
    user_type: u64,
    max_message_size: usize,
    max_sessions_per_slot: usize,
    session_wait_timeout: Option<Duration>,
    include_slots: SlotFilterSet,
    exclude_slots: SlotFilterSet,
    mechanism_policy: MechanismPolicy,
    password_policy: PasswordPolicy,
    catalog: Arc<MechanismCatalog>,
}

impl ModuleConfig {
    /// Validate a descriptor for the operating system this process runs on.
    pub fn new(
        descriptor: &ModuleDescriptor,
        catalog: &MechanismCatalog,
        password_resolver: Arc<dyn PasswordResolver>,
    ) -> HResult<Self> {
        Self::new_for_os(descriptor, catalog, password_resolver, std::env::consts::OS)
    }

    /// Same as [`ModuleConfig::new`] with the default password resolver.
    pub fn with_default_resolver(
        descriptor: &ModuleDescriptor,
        catalog: &MechanismCatalog,
    ) -> HResult<Self> {
        Self::new(descriptor, catalog, Arc::new(DefaultPasswordResolver))
    }

    /// Validate a descriptor, selecting the native library for `os_name`.
    ///
    /// Steps run in order and the first failure aborts construction:
    /// user type, message size, mechanism sets, mechanism filters, password sets,
    /// include/exclude slots, native library.
    pub fn new_for_os(
        descriptor: &ModuleDescriptor,
        catalog: &MechanismCatalog,
        password_resolver: Arc<dyn PasswordResolver>,
        os_name: &str,
    ) -> HResult<Self> {
        let name = descriptor.name.trim();
        if name.is_empty() {
            return Err(HError::InvalidConfiguration(
                "the module name must not be empty".to_owned(),
            ));
        }

        let user_type = parse_user_type(&descriptor.user)?;

        if descriptor.max_message_size < MIN_MESSAGE_SIZE {
            return Err(HError::InvalidConfiguration(format!(
                "invalid max_message_size (< {MIN_MESSAGE_SIZE}): {}",
                descriptor.max_message_size
            )));
        }
        if descriptor.max_sessions_per_slot == 0 {
            return Err(HError::InvalidConfiguration(
                "max_sessions_per_slot must be at least 1".to_owned(),
            ));
        }

        let mechanism_sets = build_mechanism_sets(&descriptor.mechanism_sets, catalog)?;

        let mut mechanism_policy = MechanismPolicy::new();
        for filter in &descriptor.mechanism_filters {
            let slots = build_slot_filters(&filter.slots)?;
            let grant = mechanism_sets.get(&filter.mechanism_set).ok_or_else(|| {
                HError::InvalidConfiguration(format!(
                    "mechanism set '{}' is not defined",
                    filter.mechanism_set
                ))
            })?;
            mechanism_policy.add_rule(slots, grant.clone());
        }

        let mut password_policy = PasswordPolicy::new(password_resolver);
        for password_set in &descriptor.password_sets {
            let slots = build_slot_filters(&password_set.slots)?;
            password_policy.add_rule(slots, password_set.passwords.clone());
        }

        let include_slots = build_slot_filters(&descriptor.include_slots)?;
        let exclude_slots = build_slot_filters(&descriptor.exclude_slots)?;

        let native_library = select_native_library(&descriptor.native_libraries, os_name)?;
        debug!(
            "PKCS#11 module '{name}' uses library {}",
            native_library.display()
        );

        Ok(Self {
            name: name.to_owned(),
            native_library,
            read_only: descriptor.read_only,
            user_type,
            max_message_size: descriptor.max_message_size,
            max_sessions_per_slot: descriptor.max_sessions_per_slot,
            session_wait_timeout: descriptor.session_wait_timeout_ms.map(Duration::from_millis),
            include_slots,
            exclude_slots,
            mechanism_policy,
            password_policy,
            catalog: Arc::new(catalog.clone()),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn native_library(&self) -> &Path {
        &self.native_library
    }

    #[must_use]
    pub const fn read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub const fn user_type(&self) -> u64 {
        self.user_type
    }

    /// Messages longer than this are fed to the token in parts.
    #[must_use]
    pub const fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    #[must_use]
    pub const fn max_sessions_per_slot(&self) -> usize {
        self.max_sessions_per_slot
    }

    #[must_use]
    pub const fn session_wait_timeout(&self) -> Option<Duration> {
        self.session_wait_timeout
    }

    #[must_use]
    pub const fn mechanism_policy(&self) -> &MechanismPolicy {
        &self.mechanism_policy
    }

    #[must_use]
    pub const fn password_policy(&self) -> &PasswordPolicy {
        &self.password_policy
    }

    /// A slot is included when it matches an include filter (or there are none)
    /// and matches no exclude filter.
    #[must_use]
    pub fn is_slot_included(&self, slot: &SlotIdentifier) -> bool {
        let included = self.include_slots.is_empty() || self.include_slots.matches_any(slot);
        included && !self.exclude_slots.matches_any(slot)
    }

    #[must_use]
    pub fn is_mechanism_allowed(&self, slot: &SlotIdentifier, mechanism: Mechanism) -> bool {
        self.mechanism_policy.is_allowed(slot, mechanism)
    }

    /// Printable name of a mechanism, for diagnostics.
    #[must_use]
    pub fn describe_mechanism(&self, mechanism: Mechanism) -> String {
        self.catalog.describe(mechanism)
    }

    /// The passwords to log into `slot` with, or `None` to use it without logging in.
    pub fn password_for(&self, slot: &SlotIdentifier) -> HResult<Option<Vec<Zeroizing<Vec<u8>>>>> {
        self.password_policy.resolve(slot)
    }
}

fn parse_user_type(token: &str) -> HResult<u64> {
    let normalized = token.trim().to_ascii_uppercase();
    match normalized.as_str() {
        "" => Err(HError::InvalidConfiguration(
            "the user type must not be empty".to_owned(),
        )),
        "CKU_SO" => Ok(CKU_SO),
        "CKU_USER" => Ok(CKU_USER),
        "CKU_CONTEXT_SPECIFIC" => Ok(CKU_CONTEXT_SPECIFIC),
        literal => parse_u64_literal(literal, false)
            .ok_or_else(|| HError::InvalidConfiguration(format!("invalid user '{token}'"))),
    }
}

fn build_mechanism_sets(
    descriptors: &[MechanismSetDescriptor],
    catalog: &MechanismCatalog,
) -> HResult<HashMap<String, MechanismGrant>> {
    let mut sets = HashMap::with_capacity(descriptors.len());
    for descriptor in descriptors {
        if sets.contains_key(&descriptor.name) {
            return Err(HError::InvalidConfiguration(format!(
                "duplicate mechanism set named '{}'",
                descriptor.name
            )));
        }
        let mut mechanisms = HashSet::new();
        let mut grant = None;
        for token in &descriptor.mechanisms {
            match catalog.resolve(token) {
                Ok(MechanismSelector::All) => {
                    grant = Some(MechanismGrant::All);
                    break;
                }
                Ok(MechanismSelector::Code(code)) => {
                    mechanisms.insert(code);
                }
                Err(HError::UnknownMechanism(_)) => {
                    warn!(
                        "skipped unknown mechanism '{token}' in mechanism set '{}'",
                        descriptor.name
                    );
                }
                Err(e) => return Err(e),
            }
        }
        sets.insert(
            descriptor.name.clone(),
            grant.unwrap_or(MechanismGrant::Only(mechanisms)),
        );
    }
    Ok(sets)
}

fn build_slot_filters(descriptors: &[SlotDescriptor]) -> HResult<SlotFilterSet> {
    descriptors
        .iter()
        .map(|descriptor| {
            let id = descriptor.id.as_deref().map(parse_slot_id).transpose()?;
            SlotFilter::new(descriptor.index, id)
        })
        .collect::<HResult<Vec<_>>>()
        .map(SlotFilterSet::new)
}

fn select_native_library(
    libraries: &[NativeLibraryDescriptor],
    os_name: &str,
) -> HResult<PathBuf> {
    let os_name = os_name.to_lowercase();
    libraries
        .iter()
        .find(|library| {
            library.operating_systems.is_empty()
                || library
                    .operating_systems
                    .iter()
                    .any(|os| os_name.contains(&os.trim().to_lowercase()))
        })
        .map(|library| library.path.clone())
        .ok_or(HError::NoLibraryForPlatform(os_name))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{CKM_ECDSA, CKM_RSA_PKCS, CKM_RSA_X_509};

    fn library(path: &str, oses: &[&str]) -> NativeLibraryDescriptor {
        NativeLibraryDescriptor {
            path: PathBuf::from(path),
            operating_systems: oses.iter().map(|&os| os.to_owned()).collect(),
        }
    }

    fn descriptor() -> ModuleDescriptor {
        ModuleDescriptor {
            name: "test".to_owned(),
            max_message_size: 256,
            native_libraries: vec![library("/opt/any/libpkcs11.so", &[])],
            ..ModuleDescriptor::default()
        }
    }

    fn build(descriptor: &ModuleDescriptor, os: &str) -> HResult<ModuleConfig> {
        ModuleConfig::new_for_os(
            descriptor,
            &MechanismCatalog::new(),
            Arc::new(DefaultPasswordResolver),
            os,
        )
    }

    #[test]
    fn message_size_too_small() {
        let mut d = descriptor();
        d.max_message_size = 64;
        let err = build(&d, "linux").unwrap_err();
        assert!(matches!(err, HError::InvalidConfiguration(ref m) if m.contains("max_message_size")));
    }

    #[test]
    fn unrestricted_library_is_selected_on_any_os() {
        let d = descriptor();
        for os in ["linux", "windows", "macos", "freebsd"] {
            let config = build(&d, os).unwrap();
            assert_eq!(config.native_library(), Path::new("/opt/any/libpkcs11.so"));
            assert_eq!(config.max_message_size(), 256);
        }
    }

    #[test]
    fn library_selection_by_os() {
        let mut d = descriptor();
        d.native_libraries = vec![
            library("C:\\hsm\\cryptoki.dll", &["Windows"]),
            library("/usr/lib/libcryptoki.so", &["linux", "freebsd"]),
            library("/fallback.so", &[]),
        ];
        assert_eq!(
            build(&d, "windows").unwrap().native_library(),
            Path::new("C:\\hsm\\cryptoki.dll")
        );
        assert_eq!(
            build(&d, "Linux").unwrap().native_library(),
            Path::new("/usr/lib/libcryptoki.so")
        );
        assert_eq!(build(&d, "macos").unwrap().native_library(), Path::new("/fallback.so"));

        d.native_libraries.pop();
        assert!(matches!(
            build(&d, "macos"),
            Err(HError::NoLibraryForPlatform(os)) if os == "macos"
        ));
    }

    #[test]
    fn user_types() {
        let mut d = descriptor();
        for (token, expected) in [
            ("CKU_SO", CKU_SO),
            ("cku_user", CKU_USER),
            ("CKU_CONTEXT_SPECIFIC", CKU_CONTEXT_SPECIFIC),
            ("0x80000001", 0x8000_0001),
            ("5", 5),
        ] {
            d.user = token.to_owned();
            assert_eq!(build(&d, "linux").unwrap().user_type(), expected);
        }
        d.user = "operator".to_owned();
        assert!(matches!(build(&d, "linux"), Err(HError::InvalidConfiguration(_))));
        d.user = " ".to_owned();
        assert!(matches!(build(&d, "linux"), Err(HError::InvalidConfiguration(_))));
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut d = descriptor();
        d.name = String::new();
        assert!(matches!(build(&d, "linux"), Err(HError::InvalidConfiguration(_))));
    }

    #[test]
    fn duplicate_and_undefined_mechanism_sets() {
        let mut d = descriptor();
        d.mechanism_sets = vec![
            MechanismSetDescriptor {
                name: "a".to_owned(),
                mechanisms: vec!["CKM_RSA_PKCS".to_owned()],
            },
            MechanismSetDescriptor {
                name: "a".to_owned(),
                mechanisms: vec!["CKM_ECDSA".to_owned()],
            },
        ];
        assert!(matches!(
            build(&d, "linux"),
            Err(HError::InvalidConfiguration(m)) if m.contains("duplicate")
        ));

        d.mechanism_sets.pop();
        d.mechanism_filters = vec![MechanismFilterDescriptor {
            slots: vec![],
            mechanism_set: "b".to_owned(),
        }];
        assert!(matches!(
            build(&d, "linux"),
            Err(HError::InvalidConfiguration(m)) if m.contains("'b'")
        ));
    }

    #[test]
    fn unknown_mechanisms_are_skipped() {
        let mut d = descriptor();
        d.mechanism_sets = vec![MechanismSetDescriptor {
            name: "signing".to_owned(),
            mechanisms: vec![
                "CKM_RSA_PKCS".to_owned(),
                "CKM_FUTURE_MECHANISM".to_owned(),
                "0x1041".to_owned(),
            ],
        }];
        d.mechanism_filters = vec![MechanismFilterDescriptor {
            slots: vec![],
            mechanism_set: "signing".to_owned(),
        }];
        let config = build(&d, "linux").unwrap();
        let slot = SlotIdentifier::new(0, 0);
        assert!(config.is_mechanism_allowed(&slot, CKM_RSA_PKCS));
        assert!(config.is_mechanism_allowed(&slot, CKM_ECDSA));
        assert!(!config.is_mechanism_allowed(&slot, CKM_RSA_X_509));
    }

    #[test]
    fn all_short_circuits_the_set() {
        let mut d = descriptor();
        d.mechanism_sets = vec![MechanismSetDescriptor {
            name: "everything".to_owned(),
            mechanisms: vec!["CKM_RSA_PKCS".to_owned(), "all".to_owned(), "bogus".to_owned()],
        }];
        d.mechanism_filters = vec![MechanismFilterDescriptor {
            slots: vec![SlotDescriptor {
                index: Some(1),
                id: None,
            }],
            mechanism_set: "everything".to_owned(),
        }];
        let config = build(&d, "linux").unwrap();
        assert!(config.is_mechanism_allowed(&SlotIdentifier::new(1, 9), 0x4242));
        assert!(!config.is_mechanism_allowed(&SlotIdentifier::new(0, 9), CKM_RSA_PKCS));
    }

    #[test]
    fn malformed_slot_id() {
        let mut d = descriptor();
        d.exclude_slots = vec![SlotDescriptor {
            index: None,
            id: Some("0xZZ".to_owned()),
        }];
        assert!(matches!(
            build(&d, "linux"),
            Err(HError::InvalidConfiguration(m)) if m.contains("0xZZ")
        ));
    }

    #[test]
    fn slot_inclusion() {
        let mut d = descriptor();
        d.exclude_slots = vec![SlotDescriptor {
            index: None,
            id: Some("0x2".to_owned()),
        }];
        let config = build(&d, "linux").unwrap();
        assert!(config.is_slot_included(&SlotIdentifier::new(0, 1)));
        assert!(!config.is_slot_included(&SlotIdentifier::new(1, 2)));

        d.include_slots = vec![
            SlotDescriptor {
                index: Some(0),
                id: None,
            },
            SlotDescriptor {
                index: Some(1),
                id: None,
            },
        ];
        let config = build(&d, "linux").unwrap();
        assert!(config.is_slot_included(&SlotIdentifier::new(0, 1)));
        // included by index but excluded by id
        assert!(!config.is_slot_included(&SlotIdentifier::new(1, 2)));
        assert!(!config.is_slot_included(&SlotIdentifier::new(2, 3)));
    }

    #[test]
    fn overlapping_password_rules() {
        let mut d = descriptor();
        d.password_sets = vec![
            PasswordSetDescriptor {
                slots: vec![SlotDescriptor {
                    index: Some(0),
                    id: None,
                }],
                passwords: vec!["first-pin".to_owned()],
            },
            PasswordSetDescriptor {
                slots: vec![SlotDescriptor {
                    index: None,
                    id: Some("1".to_owned()),
                }],
                passwords: vec!["second-pin".to_owned()],
            },
        ];
        let config = build(&d, "linux").unwrap();
        let passwords = config
            .password_for(&SlotIdentifier::new(0, 1))
            .unwrap()
            .unwrap();
        assert_eq!(passwords.len(), 1);
        assert_eq!(passwords[0].as_slice(), b"first-pin");
        assert!(config.password_for(&SlotIdentifier::new(3, 3)).unwrap().is_none());
    }

    #[test]
    fn parse_toml_module() {
        let conf = Pkcs11Conf::from_toml_str(
            r#"
            [[modules]]
            name = "softhsm"
            user = "CKU_USER"
            max_message_size = 4096
            max_sessions_per_slot = 2
            session_wait_timeout_ms = 1500

            [[modules.native_libraries]]
            path = "/usr/lib/softhsm/libsofthsm2.so"
            operating_systems = ["linux"]

            [[modules.native_libraries]]
            path = "/usr/local/lib/softhsm/libsofthsm2.so"

            [[modules.mechanism_sets]]
            name = "signing"
            mechanisms = ["CKM_RSA_X_509", "CKM_RSA_PKCS", "CKM_ECDSA"]

            [[modules.mechanism_filters]]
            mechanism_set = "signing"
            slots = [{ index = 0 }, { id = "0x2a" }]

            [[modules.password_sets]]
            passwords = ["1234"]

            [[modules.exclude_slots]]
            index = 3
            "#,
        )
        .unwrap();
        assert_eq!(conf.modules.len(), 1);
        let config = build(&conf.modules[0], "macos").unwrap();
        assert_eq!(config.name(), "softhsm");
        assert_eq!(
            config.native_library(),
            Path::new("/usr/local/lib/softhsm/libsofthsm2.so")
        );
        assert_eq!(config.max_sessions_per_slot(), 2);
        assert_eq!(config.session_wait_timeout(), Some(Duration::from_millis(1500)));
        assert!(config.is_mechanism_allowed(&SlotIdentifier::new(5, 42), CKM_ECDSA));
        assert!(!config.is_slot_included(&SlotIdentifier::new(3, 42)));
        assert!(!config.read_only());
    }

    #[test]
    fn read_configuration_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"[[modules]]\nname = \"a\"\n\n[[modules]]\nname = \"b\"\nread_only = true\n",
        )
        .unwrap();
        let conf = Pkcs11Conf::from_file(file.path()).unwrap();
        assert_eq!(conf.modules.len(), 2);
        assert!(conf.modules[1].read_only);
        assert_eq!(conf.modules[1].user, "CKU_USER");
        assert_eq!(conf.modules[0].max_sessions_per_slot, DEFAULT_MAX_SESSIONS_PER_SLOT);

        assert!(matches!(
            Pkcs11Conf::from_file(Path::new("/nonexistent/pkcs11.toml")),
            Err(HError::Io(_))
        ));
    }

    #[test]
    fn unknown_toml_keys_are_rejected() {
        assert!(matches!(
            ModuleDescriptor::from_toml_str("name = \"x\"\nlibrary = \"/x.so\"\n"),
            Err(HError::Toml(_))
        ));
    }
}
