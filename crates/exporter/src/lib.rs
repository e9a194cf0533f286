//! Prometheus exporter for Varnish transaction logs.
//!
//! Records from `varnishlog` are grouped into per-request sessions, each
//! session is classified (hit, miss, pass, ...) and turned into facts, and
//! every fact is counted by a single-writer accumulator per metric family.

pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod probe;
pub mod runtime;
pub mod session;
pub mod source;
pub mod state;
pub mod supervisor;
