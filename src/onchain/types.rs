//! Decoded contract reads and event logs handed out by the chain gateway.

use alloy::primitives::{Address, U256};

/// `ArbiterRegistry.arbiters(address)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterRecord {
    pub name: String,
    pub profile_hash: String,
    pub is_active: bool,
}

/// `Escrow.getProjectDetails()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDetails {
    pub client: Address,
    pub freelancer: Address,
    pub arbiter: Address,
    pub total_amount: U256,
    pub project_description: String,
    pub status: u8,
    pub work_status: u8,
    pub work_submission: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterAddedLog {
    pub arbiter: Address,
    pub name: String,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterRemovedLog {
    pub arbiter: Address,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowCreatedLog {
    pub escrow: Address,
    pub client: Address,
    pub freelancer: Address,
    pub total_amount: U256,
    pub block_number: Option<u64>,
}

impl std::fmt::Display for ArbiterAddedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArbiterAdded({}, {:?})", self.arbiter, self.name)
    }
}

impl std::fmt::Display for ArbiterRemovedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArbiterRemoved({})", self.arbiter)
    }
}

impl std::fmt::Display for EscrowCreatedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EscrowCreated({}, amount={})", self.escrow, self.total_amount)
    }
}
