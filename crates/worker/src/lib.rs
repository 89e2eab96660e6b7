//! The `reelforge` command: configuration and reporting around the
//! generation pipeline.

pub mod config;
pub mod summary;
