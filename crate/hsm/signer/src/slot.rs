use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{HError, HResult};

/// A concrete slot of a module: its position in the slot list and its PKCS#11 slot ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotIdentifier {
    pub index: usize,
    pub id: u64,
}

impl SlotIdentifier {
    #[must_use]
    pub const fn new(index: usize, id: u64) -> Self {
        Self { index, id }
    }
}

impl Display for SlotIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "(index = {}, id = {:#x})", self.index, self.id)
    }
}

/// Predicate over slots.
///
/// Every attribute the filter specifies must equal the slot's; unspecified attributes match
/// anything. A filter always specifies at least one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotFilter {
    index: Option<usize>,
    id: Option<u64>,
}

impl SlotFilter {
    pub fn new(index: Option<usize>, id: Option<u64>) -> HResult<Self> {
        if index.is_none() && id.is_none() {
            return Err(HError::InvalidConfiguration(
                "a slot filter must specify an index, an id, or both".to_owned(),
            ));
        }
        Ok(Self { index, id })
    }

    #[must_use]
    pub const fn index(&self) -> Option<usize> {
        self.index
    }

    #[must_use]
    pub const fn id(&self) -> Option<u64> {
        self.id
    }

    #[must_use]
    pub fn matches(&self, slot: &SlotIdentifier) -> bool {
        self.index.is_none_or(|index| index == slot.index)
            && self.id.is_none_or(|id| id == slot.id)
    }
}

/// A set of slot filters attached to a policy rule.
///
/// An empty set places no restriction and matches every slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotFilterSet(Vec<SlotFilter>);

impl SlotFilterSet {
    #[must_use]
    pub const fn new(filters: Vec<SlotFilter>) -> Self {
        Self(filters)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn filters(&self) -> &[SlotFilter] {
        &self.0
    }

    /// True when the set is empty or one of its filters matches.
    #[must_use]
    pub fn matches(&self, slot: &SlotIdentifier) -> bool {
        self.0.is_empty() || self.matches_any(slot)
    }

    /// True only when one of the filters matches; an empty set matches nothing.
    #[must_use]
    pub fn matches_any(&self, slot: &SlotIdentifier) -> bool {
        self.0.iter().any(|filter| filter.matches(slot))
    }
}

/// Parse an unsigned integer literal written in decimal or hexadecimal (`0x` prefix,
/// case-insensitive). C-style `L`/`UL` suffixes are accepted when `allow_suffix` is set.
pub(crate) fn parse_u64_literal(literal: &str, allow_suffix: bool) -> Option<u64> {
    let upper = literal.trim().to_ascii_uppercase();
    let (digits, radix) = match upper.strip_prefix("0X") {
        Some(hex) => (hex, 16),
        None => (upper.as_str(), 10),
    };
    let digits = if allow_suffix {
        digits
            .strip_suffix("UL")
            .or_else(|| digits.strip_suffix('L'))
            .unwrap_or(digits)
    } else {
        digits
    };
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

/// Parse a configured slot ID literal (`"17"`, `"0x11"`).
pub fn parse_slot_id(literal: &str) -> HResult<u64> {
    parse_u64_literal(literal, false)
        .ok_or_else(|| HError::InvalidConfiguration(format!("invalid slot id '{literal}'")))
}
