//! Helpers for tests that need a frame ledger in a specific state. They are part of the regular
//!  (non-#[cfg(test)]) code so that code driving a simulation from outside this crate can use
//!  them as well.

pub mod ledger;
