//! Shared test utilities for the convoy workspace.
//!
//! This crate provides git fixtures used across crate test suites. It is a
//! dev-dependency only and never published.
//!
//! # Modules
//!
//! - [`git`]: bare metadata and project remotes seeded through the `git` CLI

pub mod git;
