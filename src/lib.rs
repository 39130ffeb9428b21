//! Privacy-focused web analytics: event collection and dashboard aggregation.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod ingest;
pub mod server;
pub mod storage;
