//! The three cache services.
//!
//! - `ArbiterService`: arbiter cache, registry enumeration, arbiter events
//! - `EscrowService`: deal cache, factory enumeration, deal-creation events.
//!   Resolves each deal's arbiter through `ArbiterService`.
//! - `WalletService`: per-wallet views and stats over the deal cache. Owns
//!   only the user-profile rows.
//!
//! Services receive their gateway and store handles at construction and are
//! shared behind `Arc` between the HTTP handlers and the watcher tasks.

pub mod arbiter;
pub mod escrow;
pub mod wallet;

pub use arbiter::ArbiterService;
pub use escrow::EscrowService;
pub use wallet::{calculate_wallet_stats, WalletService, PLACEHOLDER_TOKEN_BALANCE};

use crate::cache::CacheError;
use crate::onchain::parse_address;
use alloy::primitives::Address;

/// Parse caller-supplied input, rejecting it before any store or chain access.
pub fn require_address(input: &str) -> Result<Address, CacheError> {
    parse_address(input).ok_or_else(|| CacheError::InvalidAddress(input.to_string()))
}
