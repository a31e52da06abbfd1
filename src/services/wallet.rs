//! Per-wallet views assembled from the deal and arbiter caches.

use super::{require_address, ArbiterService, EscrowService};
use crate::cache::CacheError;
use crate::models::{Deal, DealStatus, UserProfile, WalletData, WalletStats, PLACEHOLDER_RATING};
use crate::onchain::checksum;
use crate::store::CacheStore;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reported for every token a wallet has dealt in until balances are read
/// from the token contracts (1 token at 18 decimals).
pub const PLACEHOLDER_TOKEN_BALANCE: &str = "1000000000000000000";

pub struct WalletService {
    escrow: Arc<EscrowService>,
    arbiters: Arc<ArbiterService>,
    store: Arc<dyn CacheStore>,
}

impl WalletService {
    pub fn new(
        escrow: Arc<EscrowService>,
        arbiters: Arc<ArbiterService>,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            escrow,
            arbiters,
            store,
        }
    }

    /// Everything known about `wallet`. Only a malformed address fails; every
    /// other part degrades to empty.
    pub async fn get_wallet_data(&self, wallet: &str) -> Result<WalletData, CacheError> {
        let parsed = require_address(wallet)?;
        let address = checksum(&parsed);
        debug!(wallet = %address, "assembling wallet data");

        let deals = match self.escrow.get_deals_by_wallet(&parsed).await {
            Ok(deals) => deals,
            Err(e) => {
                warn!(wallet = %address, error = %e, "failed to fetch wallet deals");
                Vec::new()
            }
        };

        let arbiters = match self.arbiters.get_arbiter_by_address(&parsed).await {
            Ok(arbiter) if arbiter.is_registered() => vec![arbiter],
            Ok(_) => Vec::new(),
            Err(e) => {
                debug!(wallet = %address, error = %e, "arbiter lookup failed");
                Vec::new()
            }
        };

        let profile = match self.store.profile(&address).await {
            Ok(profile) => profile,
            Err(e) => {
                debug!(wallet = %address, error = %e, "profile lookup failed");
                None
            }
        };

        let token_balances = token_balances(&deals);
        let stats = calculate_wallet_stats(&deals);

        Ok(WalletData {
            address,
            deals,
            arbiters,
            profile,
            token_balances,
            stats,
        })
    }

    /// Stats only. Unlike `get_wallet_data`, a failed deal fetch propagates.
    pub async fn get_wallet_stats(&self, wallet: &str) -> Result<WalletStats, CacheError> {
        let parsed = require_address(wallet)?;
        let deals = self.escrow.get_deals_by_wallet(&parsed).await?;
        Ok(calculate_wallet_stats(&deals))
    }

    /// Wallet views for the participants of the `limit` most frequent
    /// (client, freelancer, arbiter) groups. Each address appears once.
    pub async fn get_top_wallets(&self, limit: usize) -> Result<Vec<WalletData>, CacheError> {
        let groups = self.store.top_participant_groups(limit).await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut wallets = Vec::new();
        for group in &groups {
            for address in group.addresses() {
                if address.is_empty() || !seen.insert(address.to_string()) {
                    continue;
                }
                match self.get_wallet_data(address).await {
                    Ok(data) => wallets.push(data),
                    Err(e) => warn!(wallet = %address, error = %e, "skipping top wallet"),
                }
            }
        }

        info!(groups = groups.len(), wallets = wallets.len(), "top wallets assembled");
        Ok(wallets)
    }

    /// Write a profile row. The address is normalized to its checksummed form.
    pub async fn cache_user_profile(&self, profile: &UserProfile) -> Result<(), CacheError> {
        let parsed = require_address(&profile.address)?;
        let normalized = UserProfile {
            address: checksum(&parsed),
            ..profile.clone()
        };
        self.store.upsert_profile(&normalized).await?;
        debug!(wallet = %normalized.address, "profile cached");
        Ok(())
    }
}

/// Placeholder balance for each distinct non-empty token across `deals`.
fn token_balances(deals: &[Deal]) -> BTreeMap<String, String> {
    deals
        .iter()
        .filter(|d| !d.token_address.is_empty())
        .map(|d| (d.token_address.clone(), PLACEHOLDER_TOKEN_BALANCE.to_string()))
        .collect()
}

/// Aggregate a deal set.
///
/// A deal whose amount does not parse as a signed 64-bit integer is left out
/// entirely, role and status counters included. Role counters count filled
/// role fields, not matches against any particular wallet.
pub fn calculate_wallet_stats(deals: &[Deal]) -> WalletStats {
    let mut stats = WalletStats::default();
    let mut volume: i128 = 0;

    for deal in deals {
        let Ok(amount) = deal.total_amount.parse::<i64>() else {
            continue;
        };

        if !deal.client_address.is_empty() {
            stats.total_deals_as_client += 1;
        }
        if !deal.freelancer_address.is_empty() {
            stats.total_deals_as_freelancer += 1;
        }
        if !deal.arbiter_address.is_empty() {
            stats.total_deals_as_arbiter += 1;
        }

        match deal.deal_status() {
            Some(DealStatus::Active) => stats.active_deals += 1,
            Some(DealStatus::Completed) => stats.completed_deals += 1,
            Some(DealStatus::Disputed) => stats.disputed_deals += 1,
            None => {}
        }

        volume += i128::from(amount);
    }

    stats.total_volume = volume.to_string();
    stats.average_rating = PLACEHOLDER_RATING;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onchain::ArbiterRecord;
    use crate::store::MemoryStore;
    use crate::testing::{addr, details, MockGateway};
    use alloy::primitives::Address;
    use chrono::Utc;

    fn deal(amount: &str, status: i32) -> Deal {
        let now = Utc::now();
        Deal {
            contract_address: "0xd".to_string(),
            client_address: "0xc".to_string(),
            freelancer_address: "0xf".to_string(),
            arbiter_address: String::new(),
            token_address: String::new(),
            total_amount: amount.to_string(),
            status,
            work_status: 0,
            project_description: String::new(),
            work_submission: String::new(),
            created_at: now,
            updated_at: now,
            arbiter: None,
        }
    }

    fn wallet_service(gateway: &Arc<MockGateway>, store: &Arc<MemoryStore>) -> WalletService {
        let arbiters = Arc::new(ArbiterService::new(gateway.clone(), store.clone()));
        let escrow = Arc::new(EscrowService::new(
            gateway.clone(),
            store.clone(),
            arbiters.clone(),
        ));
        WalletService::new(escrow, arbiters, store.clone())
    }

    #[test]
    fn test_stats_empty() {
        let stats = calculate_wallet_stats(&[]);
        assert_eq!(stats.total_volume, "0");
        assert_eq!(stats.total_deals_as_client, 0);
        assert_eq!(stats.total_deals_as_freelancer, 0);
        assert_eq!(stats.total_deals_as_arbiter, 0);
        assert_eq!(stats.active_deals + stats.completed_deals + stats.disputed_deals, 0);
    }

    #[test]
    fn test_stats_skip_unparseable_amount() {
        let deals = vec![deal("100", 0), deal("abc", 1), deal("50", 2)];
        let stats = calculate_wallet_stats(&deals);
        assert_eq!(stats.total_volume, "150");
        assert_eq!(stats.total_deals_as_client, 2);
        assert_eq!(stats.total_deals_as_arbiter, 0);
        assert_eq!(stats.active_deals, 1);
        assert_eq!(stats.completed_deals, 0);
        assert_eq!(stats.disputed_deals, 1);
        assert_eq!(stats.average_rating, PLACEHOLDER_RATING);
    }

    #[test]
    fn test_stats_amount_beyond_i64_is_skipped() {
        // 10^19 fits in u256 but not in i64
        let deals = vec![deal("10000000000000000000", 0), deal("7", 9)];
        let stats = calculate_wallet_stats(&deals);
        assert_eq!(stats.total_volume, "7");
        assert_eq!(stats.active_deals, 0);
        assert_eq!(stats.total_deals_as_client, 1);
    }

    #[test]
    fn test_stats_volume_does_not_overflow() {
        let max = i64::MAX.to_string();
        let stats = calculate_wallet_stats(&[deal(&max, 0), deal(&max, 0)]);
        assert_eq!(stats.total_volume, (i128::from(i64::MAX) * 2).to_string());
    }

    #[tokio::test]
    async fn test_invalid_address_rejected_before_fetch() {
        let gateway = Arc::new(MockGateway::new());
        let store = Arc::new(MemoryStore::new());
        let svc = wallet_service(&gateway, &store);

        let err = svc.get_wallet_data("not-an-address").await.unwrap_err();
        assert!(err.is_invalid_input());
        assert!(svc.get_wallet_stats("not-an-address").await.is_err());

        let padded = format!(" {}", checksum(&addr(1)));
        let err = svc.get_wallet_data(&padded).await.unwrap_err();
        assert!(err.is_invalid_input());
        assert_eq!(gateway.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_wallet_data_composition() {
        let gateway = Arc::new(MockGateway::new());
        gateway.add_arbiter(
            addr(30),
            ArbiterRecord {
                name: "judge".to_string(),
                profile_hash: String::new(),
                is_active: true,
            },
        );
        gateway.add_escrow(addr(100), details(addr(10), addr(20), addr(30), 100), Some(addr(77)));
        gateway.add_escrow(addr(101), details(addr(10), addr(21), Address::ZERO, 50), Some(addr(77)));
        let store = Arc::new(MemoryStore::new());
        let svc = wallet_service(&gateway, &store);

        let client = svc.get_wallet_data(&checksum(&addr(10))).await.unwrap();
        assert_eq!(client.deals.len(), 2);
        assert!(client.arbiters.is_empty());
        assert!(client.profile.is_none());
        assert_eq!(client.stats.total_volume, "150");
        assert_eq!(
            client.token_balances.get(&checksum(&addr(77))).map(String::as_str),
            Some(PLACEHOLDER_TOKEN_BALANCE)
        );

        let arbiter = svc.get_wallet_data(&checksum(&addr(30))).await.unwrap();
        assert_eq!(arbiter.arbiters.len(), 1);
        assert_eq!(arbiter.arbiters[0].name, "judge");
        assert_eq!(arbiter.deals.len(), 1);
    }

    #[tokio::test]
    async fn test_wallet_data_survives_upstream_failure() {
        let gateway = Arc::new(MockGateway::new());
        gateway.fail_escrow_list();
        let store = Arc::new(MemoryStore::new());
        let svc = wallet_service(&gateway, &store);

        let data = svc.get_wallet_data(&checksum(&addr(10))).await.unwrap();
        assert!(data.deals.is_empty());
        assert_eq!(data.stats.total_volume, "0");

        assert!(svc.get_wallet_stats(&checksum(&addr(10))).await.is_err());
    }

    #[tokio::test]
    async fn test_profile_round_trip_normalizes_address() {
        let gateway = Arc::new(MockGateway::new());
        let store = Arc::new(MemoryStore::new());
        let svc = wallet_service(&gateway, &store);
        let now = Utc::now();

        let profile = UserProfile {
            address: checksum(&addr(10)).to_lowercase(),
            name: "carol".to_string(),
            bio: "builder".to_string(),
            avatar_hash: String::new(),
            skills: vec!["rust".to_string(), "solidity".to_string()],
            rating: 4.8,
            review_count: 12,
            created_at: now,
            updated_at: now,
        };
        svc.cache_user_profile(&profile).await.unwrap();

        let data = svc.get_wallet_data(&checksum(&addr(10))).await.unwrap();
        let cached = data.profile.unwrap();
        assert_eq!(cached.address, checksum(&addr(10)));
        assert_eq!(cached.skills, profile.skills);
    }

    #[tokio::test]
    async fn test_top_wallets_dedupes_addresses() {
        let gateway = Arc::new(MockGateway::new());
        // (10, 20, 0) x3, (10, 21, 0) x2, (11, 20, 0) x1
        let groups = [(10u8, 20u8, 3u8), (10, 21, 2), (11, 20, 1)];
        let mut escrow = 100u8;
        for (client, freelancer, count) in groups {
            for _ in 0..count {
                gateway.add_escrow(
                    addr(escrow),
                    details(addr(client), addr(freelancer), Address::ZERO, 1),
                    None,
                );
                escrow += 1;
            }
        }
        let store = Arc::new(MemoryStore::new());
        let svc = wallet_service(&gateway, &store);
        svc.escrow.get_all_deals().await.unwrap();

        let top = svc.get_top_wallets(5).await.unwrap();
        let addresses: Vec<&str> = top.iter().map(|w| w.address.as_str()).collect();
        let unique: HashSet<&str> = addresses.iter().copied().collect();
        assert_eq!(addresses.len(), unique.len());
        // 10, 20, zero arbiter, 21, 11
        assert_eq!(addresses.len(), 5);

        let first_group = svc.get_top_wallets(1).await.unwrap();
        assert_eq!(first_group.len(), 3);
        assert_eq!(first_group[0].address, checksum(&addr(10)));
    }
}
