//! BANKFETCH: banking session client and ledger exporter
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod client;
pub mod config;
pub mod handshake;
pub mod ledger;
pub mod mfa;
pub mod session;
pub mod surfaces;
pub mod transport;
pub mod types;
