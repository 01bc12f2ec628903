//! Status machines for changesets and shipments

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lifecycle state of a changeset.
///
/// ```text
/// DEV ──promote──▶ RC ──ship──▶ RELEASED
///  │ ▲             │
///  │ └──abandon────┘
///  ├──abandon──▶ ABANDONED ──start──▶ DEV
///  └──hotfix───▶ HOTFIX ──ship──▶ RELEASED      (RC ──hotfix──▶ HOTFIX too)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangesetStatus {
    Dev,
    Rc,
    Released,
    Hotfix,
    Abandoned,
}

impl ChangesetStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dev => "DEV",
            Self::Rc => "RC",
            Self::Released => "RELEASED",
            Self::Hotfix => "HOTFIX",
            Self::Abandoned => "ABANDONED",
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use ChangesetStatus::*;
        matches!(
            (self, next),
            (Dev, Rc | Abandoned | Hotfix)
                | (Rc, Dev | Released | Hotfix)
                | (Abandoned, Dev)
                | (Hotfix, Released)
        )
    }

    /// Validate the move to `next`, failing with a user-facing error.
    pub fn transition(self, next: Self) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else if self == Self::Released {
            Err(Error::build(format!(
                "Changeset is RELEASED and can no longer change (requested {next})"
            )))
        } else {
            Err(Error::build(format!("Cannot move changeset from {self} to {next}")))
        }
    }
}

impl fmt::Display for ChangesetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a shipment: `PENDING ──ship──▶ SHIPPED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShipmentStatus {
    Pending,
    Shipped,
}

impl ShipmentStatus {
    pub fn transition(self, next: Self) -> Result<Self> {
        match (self, next) {
            (Self::Pending, Self::Shipped) => Ok(next),
            _ => Err(Error::build(format!("Cannot move shipment from {self} to {next}"))),
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Shipped => "SHIPPED",
        })
    }
}
