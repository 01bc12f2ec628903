//! Changeset, shipment and alias identifiers
//!
//! Ids arrive from the command line in a compact `bundle:rest` form and are
//! immutable once parsed.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

static BUNDLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap());
static TRACKING_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z][A-Z0-9]*)-([0-9]+)$").unwrap());
static TRUNK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][\w.-]{2,}$").unwrap());
static ALIAS_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][\w.-]*$").unwrap());

/// Split `value` at the first `:` into a validated bundle name and the rest.
fn split_bundle<'a>(value: &'a str, kind: &str, form: &str) -> Result<(&'a str, &'a str)> {
    let invalid = || Error::build(format!("Invalid {kind} '{value}': expected {form}"));
    let (bundle, rest) = value.split_once(':').ok_or_else(invalid)?;
    if !BUNDLE_NAME.is_match(bundle) || rest.is_empty() {
        return Err(invalid());
    }
    Ok((bundle, rest))
}

/// Validate a trunk name.
pub fn validate_trunk_name(name: &str) -> Result<()> {
    if TRUNK_NAME.is_match(name) {
        Ok(())
    } else {
        Err(Error::build(format!(
            "Invalid trunk name '{name}': must start with a letter and have at least 3 characters"
        )))
    }
}

/// Identifier of a changeset: `bundle:QUAL-123` or `bundle:QUAL-123:TICKET-456`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangesetId {
    pub bundle_name: String,
    /// `qualifier-qualifier_id`, e.g. `VCTRS-1234`
    pub tracking_id: String,
    pub qualifier: String,
    pub qualifier_id: u64,
    /// Ticket the work is filed under; the tracking id unless given explicitly
    pub ticket_id: String,
}

const CHANGESET_FORM: &str = "bundle:QUALIFIER-123[:TICKET-456]";

impl ChangesetId {
    /// Branch carrying this changeset in every project repository.
    pub fn branch_name(&self) -> String {
        format!("changeset/{}", self.tracking_id)
    }
}

impl FromStr for ChangesetId {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let (bundle, rest) = split_bundle(value, "changeset id", CHANGESET_FORM)?;
        let invalid =
            || Error::build(format!("Invalid changeset id '{value}': expected {CHANGESET_FORM}"));

        let (tracking, ticket) = match rest.split_once(':') {
            Some((tracking, ticket)) => (tracking, Some(ticket)),
            None => (rest, None),
        };
        let captures = TRACKING_ID.captures(tracking).ok_or_else(invalid)?;
        let qualifier_id = captures[2].parse::<u64>().map_err(|_| invalid())?;
        if let Some(ticket) = ticket
            && !TRACKING_ID.is_match(ticket)
        {
            return Err(invalid());
        }

        Ok(Self {
            bundle_name: bundle.to_string(),
            tracking_id: tracking.to_string(),
            qualifier: captures[1].to_string(),
            qualifier_id,
            ticket_id: ticket.unwrap_or(tracking).to_string(),
        })
    }
}

impl fmt::Display for ChangesetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ticket_id == self.tracking_id {
            write!(f, "{}:{}", self.bundle_name, self.tracking_id)
        } else {
            write!(f, "{}:{}:{}", self.bundle_name, self.tracking_id, self.ticket_id)
        }
    }
}

/// Identifier of a shipment: `bundle:version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShipmentId {
    pub bundle_name: String,
    pub version: String,
}

impl FromStr for ShipmentId {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let (bundle, version) = split_bundle(value, "shipment id", "bundle:version")?;
        if version.contains(['/', '\\', ':']) || version.starts_with('.') {
            return Err(Error::build(format!(
                "Invalid shipment id '{value}': version may not contain path separators"
            )));
        }
        Ok(Self {
            bundle_name: bundle.to_string(),
            version: version.to_string(),
        })
    }
}

impl fmt::Display for ShipmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bundle_name, self.version)
    }
}

/// Identifier of an alias: `bundle:ALIAS`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AliasId {
    pub bundle_name: String,
    pub alias: String,
}

impl AliasId {
    pub fn new(bundle_name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            bundle_name: bundle_name.into(),
            alias: alias.into(),
        }
    }
}

impl FromStr for AliasId {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let (bundle, alias) = split_bundle(value, "alias id", "bundle:ALIAS")?;
        if !ALIAS_NAME.is_match(alias) {
            return Err(Error::build(format!("Invalid alias id '{value}': expected bundle:ALIAS")));
        }
        Ok(Self::new(bundle, alias))
    }
}

impl fmt::Display for AliasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bundle_name, self.alias)
    }
}
