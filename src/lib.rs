//! ka-runner daemon library
//!
//! This crate runs untrusted Khan Academy live-editor programs in a headless
//! browser and returns what they produced:
//! - Configuration parsing from JSON and environment overrides
//! - Browser backend trait and the Chrome DevTools implementation
//! - The evaluation pipeline and per-environment capture adapters
//! - MCP server implementation using rmcp

pub mod backend;
pub mod capture;
pub mod completion;
pub mod config;
pub mod logs;
pub mod mcp;
pub mod pipeline;
pub mod request;
pub mod runner;
pub mod session;
pub mod target;

#[cfg(test)]
mod testing;
