//! Per-slot mechanism and password policies of a module.
//!
//! The two policies deliberately combine their rules differently: the mechanism policy is the
//! union of every matching rule and denies when nothing matches, the password policy takes the
//! first matching rule only.

use std::{collections::HashSet, fmt, path::PathBuf, sync::Arc};

use pki_logger::trace;
use zeroize::Zeroizing;

use crate::{HError, HResult, Mechanism, SlotFilterSet, SlotIdentifier};

/// The mechanisms a rule grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MechanismGrant {
    All,
    Only(HashSet<Mechanism>),
}

impl MechanismGrant {
    #[must_use]
    pub fn contains(&self, mechanism: Mechanism) -> bool {
        match self {
            Self::All => true,
            Self::Only(mechanisms) => mechanisms.contains(&mechanism),
        }
    }
}

#[derive(Debug, Clone)]
struct MechanismRule {
    slots: SlotFilterSet,
    grant: MechanismGrant,
}

/// Allow-list of mechanisms per slot.
#[derive(Debug, Clone, Default)]
pub struct MechanismPolicy {
    rules: Vec<MechanismRule>,
}

impl MechanismPolicy {
    #[must_use]
    pub const fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, slots: SlotFilterSet, grant: MechanismGrant) {
        self.rules.push(MechanismRule { slots, grant });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// A mechanism is allowed on a slot iff some rule matching the slot grants it.
    /// Without any matching rule the mechanism is denied.
    #[must_use]
    pub fn is_allowed(&self, slot: &SlotIdentifier, mechanism: Mechanism) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.slots.matches(slot) && rule.grant.contains(mechanism))
    }
}

/// Turns a configured password source into the secret it designates.
pub trait PasswordResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, source: &str) -> HResult<Zeroizing<Vec<u8>>>;
}

/// Resolves `env:NAME` from the environment, `file:PATH` from the first line of a file,
/// and uses anything else literally.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPasswordResolver;

impl PasswordResolver for DefaultPasswordResolver {
    fn resolve(&self, source: &str) -> HResult<Zeroizing<Vec<u8>>> {
        if let Some(name) = source.strip_prefix("env:") {
            let value = std::env::var(name).map_err(|e| {
                HError::InvalidConfiguration(format!(
                    "password environment variable {name} is not usable: {e}"
                ))
            })?;
            return Ok(Zeroizing::new(value.into_bytes()));
        }
        if let Some(path) = source.strip_prefix("file:") {
            let content = Zeroizing::new(std::fs::read_to_string(PathBuf::from(path))?);
            let first_line = content.lines().next().unwrap_or_default();
            return Ok(Zeroizing::new(first_line.trim_end().as_bytes().to_vec()));
        }
        Ok(Zeroizing::new(source.as_bytes().to_vec()))
    }
}

#[derive(Debug, Clone)]
struct PasswordRule {
    slots: SlotFilterSet,
    sources: Vec<String>,
}

/// Ordered password rules; sources are kept unresolved until a slot asks for them.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    rules: Vec<PasswordRule>,
    resolver: Arc<dyn PasswordResolver>,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::new(Arc::new(DefaultPasswordResolver))
    }
}

impl PasswordPolicy {
    #[must_use]
    pub fn new(resolver: Arc<dyn PasswordResolver>) -> Self {
        Self {
            rules: Vec::new(),
            resolver,
        }
    }

    pub fn add_rule(&mut self, slots: SlotFilterSet, sources: Vec<String>) {
        self.rules.push(PasswordRule { slots, sources });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolve the passwords of the first rule matching the slot.
    ///
    /// Later matching rules are ignored. `None` means no rule matched and the slot is used
    /// without logging in.
    pub fn resolve(&self, slot: &SlotIdentifier) -> HResult<Option<Vec<Zeroizing<Vec<u8>>>>> {
        let Some(rule) = self.rules.iter().find(|rule| rule.slots.matches(slot)) else {
            return Ok(None);
        };
        trace!(
            "resolving {} password source(s) for slot {slot}",
            rule.sources.len()
        );
        rule.sources
            .iter()
            .map(|source| self.resolver.resolve(source))
            .collect::<HResult<Vec<_>>>()
            .map(Some)
    }
}
