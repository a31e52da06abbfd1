//! Chain access for the escrow marketplace contracts.
//!
//! Everything the cache needs from the chain goes through [`ChainGateway`]:
//! 1. Registry reads: `arbiterList(i)` probing, `arbiters(addr)` detail and
//!    the `isArbiterActive(addr)` flag
//! 2. Factory reads: the full list of deployed escrow contracts
//! 3. Per-escrow reads: `getProjectDetails()` and the payment `token()`
//! 4. Log subscriptions: ArbiterAdded, ArbiterRemoved, EscrowCreated
//!
//! Architecture:
//! - `AlloyGateway`: one shared WebSocket provider; typed calls via `sol!`
//!   bindings, subscriptions as decoded log streams
//! - Subscriptions end when the stream yields an error or closes; callers
//!   decide what that means (the event watchers treat it as fatal)

pub mod abi;
pub mod gateway;
pub mod types;

pub use gateway::AlloyGateway;
pub use types::{
    ArbiterAddedLog, ArbiterRecord, ArbiterRemovedLog, EscrowCreatedLog, ProjectDetails,
};

use alloy::primitives::Address;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("call {method} on {contract} failed: {reason}")]
    Call {
        method: &'static str,
        contract: Address,
        reason: String,
    },
    #[error("failed to subscribe to {event}: {reason}")]
    Subscribe { event: &'static str, reason: String },
    #[error("failed to decode {event} log: {reason}")]
    Decode { event: &'static str, reason: String },
}

/// A live log subscription. Ends (`None`) when the underlying subscription drops.
pub type EventStream<T> = BoxStream<'static, Result<T, GatewayError>>;

/// Typed read/subscribe access to the registry, the factory and escrow contracts.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// `arbiterList(index)`. Past the end of the array this either errors or
    /// returns the zero address depending on the node.
    async fn arbiter_at(&self, index: u64) -> Result<Address, GatewayError>;

    async fn arbiter_record(&self, arbiter: Address) -> Result<ArbiterRecord, GatewayError>;

    async fn is_arbiter_active(&self, arbiter: Address) -> Result<bool, GatewayError>;

    async fn escrow_contracts(&self) -> Result<Vec<Address>, GatewayError>;

    async fn project_details(&self, escrow: Address) -> Result<ProjectDetails, GatewayError>;

    async fn escrow_token(&self, escrow: Address) -> Result<Address, GatewayError>;

    async fn subscribe_arbiter_added(&self) -> Result<EventStream<ArbiterAddedLog>, GatewayError>;

    async fn subscribe_arbiter_removed(
        &self,
    ) -> Result<EventStream<ArbiterRemovedLog>, GatewayError>;

    async fn subscribe_escrow_created(
        &self,
    ) -> Result<EventStream<EscrowCreatedLog>, GatewayError>;
}

/// Parse a 20-byte hex address, with or without the `0x` prefix.
/// Checksum casing is not enforced; surrounding whitespace is rejected.
pub fn parse_address(input: &str) -> Option<Address> {
    if input.is_empty() || input.trim() != input {
        return None;
    }
    Address::from_str(input).ok()
}

/// Canonical string form used for every persisted address.
pub fn checksum(address: &Address) -> String {
    address.to_checksum(None)
}
