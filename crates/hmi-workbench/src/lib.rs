//! `hmi-workbench` - dashboard authoring workbench for process-control HMIs.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Candidate layout generation and scoring.
pub mod candidate;
/// Binding catalog resolution and canonical widget identity.
pub mod catalog;
/// Control-channel client (newline-delimited JSON over TCP/Unix sockets).
pub mod control;
/// Workbench errors.
pub mod error;
/// Evidence run store and retention pruning.
pub mod evidence;
/// Scripted journey execution with a local write-policy guard.
pub mod journey;
/// Layout descriptor store.
pub mod layout;
/// Binding lock file with per-widget fingerprints.
pub mod lock;
/// Patch reconciliation over the descriptor set.
pub mod patch;
/// Deterministic SVG snapshot rendering.
pub mod snapshot;
/// Validation checks and lock building.
pub mod validate;

pub use catalog::{canonical_widget_id, slug, BindingCatalogEntry, CatalogOutcome};
pub use control::{CancelToken, ControlEndpoint, ControlTransport, OneShotClient};
pub use error::WorkbenchError;
pub use layout::LayoutSnapshot;
