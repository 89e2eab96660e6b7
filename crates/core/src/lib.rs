//! Shared types and helpers for the reelforge generation pipeline.
//!
//! Holds the identifiers and lifecycle states exchanged between the
//! backend clients, the task registry and the orchestrator, plus the
//! file naming conventions, data-URI encoding and ffmpeg frame
//! extraction used across crates.

pub mod encoding;
pub mod error;
pub mod ffmpeg;
pub mod naming;
pub mod types;
