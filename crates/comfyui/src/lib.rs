//! ComfyUI REST client library.
//!
//! Provides typed parsing of the queue and history endpoints, an HTTP
//! API wrapper for submission, upload and file retrieval, and workflow
//! template loading with `"<node>.<input>"` parameter overrides for
//! driving a local ComfyUI generation engine.

pub mod api;
pub mod responses;
pub mod workflow;
