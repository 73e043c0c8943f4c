//! Org unit (position) domain model.
//!
//! An org unit is a named roster bound to exactly one authorization node.
//! Its members exercise that node's permissions. Optional size bounds are
//! checked whenever the roster changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{NidoError, NidoResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgUnit {
    pub id: Uuid,
    pub community_id: Uuid,
    pub auth_node_id: Uuid,
    pub name: String,
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrgUnit {
    /// Check that one more member fits, given the current distinct
    /// member count.
    pub fn check_can_add(&self, current: u64) -> NidoResult<()> {
        match self.max_size {
            Some(max) if current >= u64::from(max) => Err(NidoError::CapacityExceeded {
                org_unit_id: self.id,
                max_size: max,
            }),
            _ => Ok(()),
        }
    }

    /// Check that one member can leave, given the current distinct
    /// member count.
    pub fn check_can_remove(&self, current: u64) -> NidoResult<()> {
        match self.min_size {
            Some(min) if current <= u64::from(min) => Err(NidoError::BelowMinimum {
                org_unit_id: self.id,
                min_size: min,
            }),
            _ => Ok(()),
        }
    }
}

/// Reject bounds where the minimum exceeds the maximum.
pub fn validate_size_bounds(min_size: Option<u32>, max_size: Option<u32>) -> NidoResult<()> {
    match (min_size, max_size) {
        (Some(min), Some(max)) if min > max => Err(NidoError::validation(format!(
            "min_size {min} is greater than max_size {max}"
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrgUnit {
    pub community_id: Uuid,
    pub auth_node_id: Uuid,
    pub name: String,
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateOrgUnit {
    pub name: Option<String>,
    /// `Some(Some(n))` = set, `Some(None)` = clear, `None` = no change.
    pub min_size: Option<Option<u32>>,
    /// `Some(Some(n))` = set, `Some(None)` = clear, `None` = no change.
    pub max_size: Option<Option<u32>>,
}

impl UpdateOrgUnit {
    /// The bounds the unit would have after applying this update.
    pub fn resulting_bounds(&self, unit: &OrgUnit) -> (Option<u32>, Option<u32>) {
        (
            self.min_size.unwrap_or(unit.min_size),
            self.max_size.unwrap_or(unit.max_size),
        )
    }
}
