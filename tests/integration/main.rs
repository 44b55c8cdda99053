//! Integration tests: complete runs against an in-memory bank, and the
//! HTTP transport against a local server.

mod end_to_end;
mod fake_bank;
mod reqwest_transport;
