//! Permission bitset carried by authorization nodes.
//!
//! The set of capabilities is closed: every deployment knows the same
//! flags. A node's permissions are persisted as the integer returned by
//! [`Permissions::bits`]; forms render one checkbox per entry of
//! [`Permissions::CATALOG`].

use std::fmt;
use std::str::FromStr;

use bitmask_enum::bitmask;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::NidoError;

#[bitmask(u32)]
pub enum Permissions {
    CanDelegate,
    ModifyBillingSettings,
    ModifyReportingSettings,
    ReadErContacts,
}

impl Permissions {
    /// Every flag with its stable external name, in declaration order.
    pub const CATALOG: [(&'static str, Permissions); 4] = [
        ("CAN_DELEGATE", Permissions::CanDelegate),
        ("MODIFY_BILLING_SETTINGS", Permissions::ModifyBillingSettings),
        ("MODIFY_REPORTING_SETTINGS", Permissions::ModifyReportingSettings),
        ("READ_ER_CONTACTS", Permissions::ReadErContacts),
    ];

    /// Build a set from persisted bits, dropping bits no flag defines.
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self::from(bits) & Self::all_flags()
    }

    /// `true` if every flag in `self` is also in `other`.
    pub fn is_subset_of(self, other: Self) -> bool {
        self & other == self
    }

    /// Iterate over the flags held by this set.
    pub fn iter(self) -> impl Iterator<Item = (&'static str, Permissions)> {
        Self::CATALOG
            .into_iter()
            .filter(move |(_, flag)| self.contains(*flag))
    }

    pub fn names(self) -> Vec<&'static str> {
        self.iter().map(|(name, _)| name).collect()
    }

    /// Boolean-per-flag view, one entry per catalog flag.
    pub fn flags(self) -> Vec<(&'static str, bool)> {
        Self::CATALOG
            .iter()
            .map(|(name, flag)| (*name, self.contains(*flag)))
            .collect()
    }

    /// Inverse of [`Permissions::flags`]. Unknown names are rejected.
    pub fn from_flags<'a, I>(flags: I) -> Result<Self, NidoError>
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        flags
            .into_iter()
            .try_fold(Self::none(), |acc, (name, set)| {
                let flag = Self::by_name(name)?;
                Ok(if set { acc | flag } else { acc })
            })
    }

    /// The first flag of `self` that `parent` does not hold.
    pub fn first_missing_from(self, parent: Self) -> Option<(&'static str, Permissions)> {
        self.iter().find(|(_, flag)| !parent.contains(*flag))
    }

    fn by_name(name: &str) -> Result<Self, NidoError> {
        Self::CATALOG
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name.trim()))
            .map(|(_, flag)| *flag)
            .ok_or_else(|| NidoError::validation(format!("unknown permission: {name}")))
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("NONE");
        }
        f.write_str(&self.names().join(", "))
    }
}

/// Parses a comma separated list of flag names. `NONE` and the empty
/// string parse to the empty set.
impl FromStr for Permissions {
    type Err = NidoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("NONE") {
            return Ok(Self::none());
        }
        s.split(',')
            .try_fold(Self::none(), |acc, name| Ok(acc | Self::by_name(name)?))
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(Self::from_bits_truncate)
    }
}
