//! Integration tests for dbathena-adapter.
//!
//! These run against an in-memory engine and need no AWS credentials.
//! Tests marked with `#[ignore]` talk to real AWS and must be run explicitly.

mod client;
mod config;
mod materialize;
mod result;
