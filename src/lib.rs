#![doc = "docsync: synchronise local Markdown documentation with a block-structured remote workspace."]

//! This crate contains the content block model, the Markdown↔remote-block
//! converter, the async remote client, the per-mapping sync bridge, the
//! file-change monitor and the sync agent state machine.
//!
//! # Usage
//! Add this as a dependency for the conversion, sync and monitoring code;
//! the `docsync` binary is thin CLI glue over [`bridge::SyncBridge`].

pub mod agent;
pub mod blocks;
pub mod bridge;
pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod filters;
pub mod load_config;
pub mod monitor;
