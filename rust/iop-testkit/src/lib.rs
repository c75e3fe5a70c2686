//! Shared test fixtures for the IOP-RPC channel crates (§10.1, §10.5): a
//! connected in-memory channel pair, a few trivial dispatch tables, and
//! deterministic-clock helpers for timeout/watch-activity tests. Used by
//! `#[cfg(test)]` modules and `iop-channel`'s `tests/` integration suite;
//! never compiled into a production binary (`publish = false`).

pub mod clock;
pub mod fixtures;

pub use fixtures::{
    client_server_pair, echo_dispatch_table, local_pair, shared_runtime, silent_dispatch_table,
    throwing_dispatch_table, FIXTURE_CMD,
};
