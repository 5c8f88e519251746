//! Platform Controller Library
//!
//! Core functionality for the adhar platform controller: the
//! `platform.adhar.io/v1alpha1` CRD types, the three reconcile loops, the
//! git provider clients, manifest rendering, and the git sync machinery.
//! Tests live in the module files and under `tests/`.

pub mod controller;
pub mod crd;
pub mod error;
pub mod git;
pub mod install;
pub mod manifests;
pub mod observability;
pub mod provider;
pub mod repo_lock;
pub mod server;

pub use crd::{CustomPackage, GitRepository, Platform};
pub use error::{Error, Result};
