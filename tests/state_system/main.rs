//! State System Integration Tests
//!
//! End-to-end tests through the public facade: stack protocol, queries
//! merging ongoing and stored state, persistence and concurrent contexts.

mod common;

mod concurrency;
mod persistence;
mod properties;
mod scenarios;
mod stack_protocol;
