//! Cached marketplace records and the request-scoped wallet views built on them.
//!
//! Addresses are carried as EIP-55 checksummed strings, the same form they
//! are persisted in. An empty string means "not known" (e.g. a token address
//! whose best-effort read failed).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placeholder rating until a review system exists on-chain.
pub const PLACEHOLDER_RATING: f64 = 4.5;

/// One escrow engagement, keyed by its contract address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub contract_address: String,
    pub client_address: String,
    pub freelancer_address: String,
    pub arbiter_address: String,
    pub token_address: String,
    /// uint256 rendered as a decimal string.
    pub total_amount: String,
    pub status: i32,
    pub work_status: i32,
    pub project_description: String,
    pub work_submission: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Resolved at fetch time, never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arbiter: Option<Arbiter>,
}

impl Deal {
    /// True if `wallet` fills any of the three roles on this deal.
    pub fn involves(&self, wallet: &str) -> bool {
        self.client_address.eq_ignore_ascii_case(wallet)
            || self.freelancer_address.eq_ignore_ascii_case(wallet)
            || self.arbiter_address.eq_ignore_ascii_case(wallet)
    }

    pub fn deal_status(&self) -> Option<DealStatus> {
        DealStatus::from_code(self.status)
    }
}

/// Contract-level deal status. Codes outside this set are stored as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealStatus {
    Active,
    Completed,
    Disputed,
}

impl DealStatus {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Active),
            1 => Some(Self::Completed),
            2 => Some(Self::Disputed),
            _ => None,
        }
    }
}

/// A registered dispute-resolution party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arbiter {
    pub address: String,
    pub name: String,
    pub profile_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Arbiter {
    /// The registry answers any address with a default record; a blank,
    /// inactive one means the address was never registered.
    pub fn is_registered(&self) -> bool {
        self.is_active || !self.name.is_empty()
    }
}

/// Off-chain profile data, written out-of-band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub address: String,
    pub name: String,
    pub bio: String,
    pub avatar_hash: String,
    pub skills: Vec<String>,
    pub rating: f64,
    pub review_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Skills are persisted as a single comma-delimited column.
    pub fn skills_column(&self) -> String {
        self.skills.join(",")
    }

    pub fn parse_skills(column: &str) -> Vec<String> {
        if column.is_empty() {
            return Vec::new();
        }
        column.split(',').map(str::to_string).collect()
    }
}

/// Everything known about one wallet, assembled per request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletData {
    pub address: String,
    pub deals: Vec<Deal>,
    pub arbiters: Vec<Arbiter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
    /// token address → balance (wei, decimal string)
    pub token_balances: BTreeMap<String, String>,
    pub stats: WalletStats,
}

/// Aggregate over a deal set. Recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStats {
    pub total_deals_as_client: u64,
    pub total_deals_as_freelancer: u64,
    pub total_deals_as_arbiter: u64,
    pub total_volume: String,
    pub active_deals: u64,
    pub completed_deals: u64,
    pub disputed_deals: u64,
    pub average_rating: f64,
}

impl Default for WalletStats {
    fn default() -> Self {
        Self {
            total_deals_as_client: 0,
            total_deals_as_freelancer: 0,
            total_deals_as_arbiter: 0,
            total_volume: "0".to_string(),
            active_deals: 0,
            completed_deals: 0,
            disputed_deals: 0,
            average_rating: 0.0,
        }
    }
}

/// One (client, freelancer, arbiter) combination and how many cached deals share it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantGroup {
    pub client_address: String,
    pub freelancer_address: String,
    pub arbiter_address: String,
    pub deal_count: i64,
}

impl ParticipantGroup {
    pub fn addresses(&self) -> [&str; 3] {
        [
            &self.client_address,
            &self.freelancer_address,
            &self.arbiter_address,
        ]
    }
}
