//! Read-through cache and event ingester for the escrow marketplace contracts.
//!
//! Mirrors deals, arbiters and wallet activity from the chain into a relational
//! store and serves them through a read API. Shared by the `escrow-cache`
//! binary and the tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod events;
pub mod models;
pub mod onchain;
pub mod services;
pub mod store;

#[cfg(test)]
pub mod testing;
