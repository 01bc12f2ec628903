//! Git abstraction for Convoy
//!
//! [`ConfigRepository`] is a resettable clone of the release metadata
//! repository: every bundle, changeset, shipment and trunk file lives there.
//! The [`marker`] module publishes small records as detached refs on the same
//! remote, and [`remote`] queries or checks out project repositories.

pub mod error;
pub mod marker;
pub mod remote;
pub mod repository;

pub use error::{Error, Result};
pub use repository::ConfigRepository;
