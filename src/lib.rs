//! diffit: visual regression snapshot reconciliation.
//!
//! `domain` holds the data model and error taxonomy, `application` the
//! reconciliation engine and its use-cases, `infra` the SQLite, filesystem and
//! image-crate adapters.

pub mod application;
pub mod domain;
pub mod infra;
