//! Generation job lifecycle: submit, poll, download, record.
//!
//! [`backend`] holds the tagged backend enum and the per-service clients,
//! [`fetcher`] downloads finished artifacts, [`registry`] persists task
//! state per run directory, [`worklist`] derives the units of work from
//! the run directory layout, and [`orchestrator`] drives the two-phase
//! submission and completion sweeps.

pub mod artifact;
pub mod backend;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod pacing;
pub mod registry;
pub mod worklist;
