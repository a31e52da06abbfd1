//! In-process backend for local runs without Postgres, and for tests.
//!
//! Same upsert semantics as the SQL backend: deal and profile upserts keep
//! the stored `created_at`, arbiter upserts overwrite it.

use super::{CacheStore, StoreError};
use crate::models::{Arbiter, Deal, ParticipantGroup, UserProfile};

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryStore {
    /// address → arbiter
    arbiters: Arc<DashMap<String, Arbiter>>,
    /// contract address → deal (never carries the nested arbiter)
    deals: Arc<DashMap<String, Deal>>,
    /// address → profile
    profiles: Arc<DashMap<String, UserProfile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deal_count(&self) -> usize {
        self.deals.len()
    }

    pub fn arbiter_count(&self) -> usize {
        self.arbiters.len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn upsert_arbiter(&self, arbiter: &Arbiter) -> Result<(), StoreError> {
        self.arbiters
            .insert(arbiter.address.clone(), arbiter.clone());
        Ok(())
    }

    async fn arbiter(&self, address: &str) -> Result<Option<Arbiter>, StoreError> {
        Ok(self.arbiters.get(address).map(|a| a.clone()))
    }

    async fn deactivate_arbiter(&self, address: &str) -> Result<(), StoreError> {
        if let Some(mut entry) = self.arbiters.get_mut(address) {
            entry.is_active = false;
        }
        Ok(())
    }

    async fn upsert_deal(&self, deal: &Deal) -> Result<(), StoreError> {
        let mut row = deal.clone();
        row.arbiter = None;
        self.deals
            .entry(deal.contract_address.clone())
            .and_modify(|existing| {
                let created_at = existing.created_at;
                *existing = Deal {
                    created_at,
                    ..row.clone()
                };
            })
            .or_insert(row);
        Ok(())
    }

    async fn deal(&self, contract_address: &str) -> Result<Option<Deal>, StoreError> {
        Ok(self.deals.get(contract_address).map(|d| d.clone()))
    }

    async fn deals_by_wallet(&self, wallet: &str) -> Result<Vec<Deal>, StoreError> {
        let mut deals: Vec<Deal> = self
            .deals
            .iter()
            .filter(|d| {
                d.client_address == wallet
                    || d.freelancer_address == wallet
                    || d.arbiter_address == wallet
            })
            .map(|d| d.clone())
            .collect();
        deals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deals)
    }

    async fn top_participant_groups(
        &self,
        limit: usize,
    ) -> Result<Vec<ParticipantGroup>, StoreError> {
        let mut counts: HashMap<(String, String, String), i64> = HashMap::new();
        for deal in self.deals.iter() {
            let key = (
                deal.client_address.clone(),
                deal.freelancer_address.clone(),
                deal.arbiter_address.clone(),
            );
            *counts.entry(key).or_insert(0) += 1;
        }

        let mut groups: Vec<ParticipantGroup> = counts
            .into_iter()
            .map(|((client, freelancer, arbiter), count)| ParticipantGroup {
                client_address: client,
                freelancer_address: freelancer,
                arbiter_address: arbiter,
                deal_count: count,
            })
            .collect();

        // Ties broken on the triple so results are stable across calls.
        groups.sort_by(|a, b| {
            b.deal_count
                .cmp(&a.deal_count)
                .then_with(|| a.addresses().cmp(&b.addresses()))
        });
        groups.truncate(limit);
        Ok(groups)
    }

    async fn profile(&self, address: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.profiles.get(address).map(|p| p.clone()))
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        self.profiles
            .entry(profile.address.clone())
            .and_modify(|existing| {
                let created_at = existing.created_at;
                *existing = UserProfile {
                    created_at,
                    ..profile.clone()
                };
            })
            .or_insert_with(|| profile.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn deal(contract: &str, client: &str, freelancer: &str, arbiter: &str) -> Deal {
        let now = Utc::now();
        Deal {
            contract_address: contract.to_string(),
            client_address: client.to_string(),
            freelancer_address: freelancer.to_string(),
            arbiter_address: arbiter.to_string(),
            token_address: String::new(),
            total_amount: "100".to_string(),
            status: 0,
            work_status: 0,
            project_description: "logo design".to_string(),
            work_submission: String::new(),
            created_at: now,
            updated_at: now,
            arbiter: None,
        }
    }

    #[tokio::test]
    async fn test_deal_upsert_keeps_created_at() {
        let store = MemoryStore::new();
        let first = deal("0xd1", "0xc", "0xf", "0xa");
        store.upsert_deal(&first).await.unwrap();

        let mut second = first.clone();
        second.created_at = first.created_at + Duration::hours(1);
        second.updated_at = first.updated_at + Duration::hours(1);
        second.status = 1;
        store.upsert_deal(&second).await.unwrap();

        let stored = store.deal("0xd1").await.unwrap().unwrap();
        assert_eq!(stored.created_at, first.created_at);
        assert_eq!(stored.updated_at, second.updated_at);
        assert_eq!(stored.status, 1);
        assert_eq!(store.deal_count(), 1);
    }

    #[tokio::test]
    async fn test_deal_upsert_drops_nested_arbiter() {
        let store = MemoryStore::new();
        let mut d = deal("0xd1", "0xc", "0xf", "0xa");
        d.arbiter = Some(Arbiter {
            address: "0xa".to_string(),
            name: "alice".to_string(),
            profile_hash: String::new(),
            is_active: true,
            created_at: Utc::now(),
        });
        store.upsert_deal(&d).await.unwrap();
        assert!(store.deal("0xd1").await.unwrap().unwrap().arbiter.is_none());
    }

    #[tokio::test]
    async fn test_deactivate_keeps_name_and_hash() {
        let store = MemoryStore::new();
        store
            .upsert_arbiter(&Arbiter {
                address: "0xa".to_string(),
                name: "alice".to_string(),
                profile_hash: "Qm123".to_string(),
                is_active: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        store.deactivate_arbiter("0xa").await.unwrap();
        store.deactivate_arbiter("0xmissing").await.unwrap();

        let stored = store.arbiter("0xa").await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.name, "alice");
        assert_eq!(stored.profile_hash, "Qm123");
        assert!(store.arbiter("0xmissing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deals_by_wallet_newest_first() {
        let store = MemoryStore::new();
        let mut old = deal("0xd1", "0xc", "0xf", "0xa");
        old.created_at = old.created_at - Duration::days(2);
        let new = deal("0xd2", "0xother", "0xc", "");
        let unrelated = deal("0xd3", "0xx", "0xy", "0xz");
        for d in [&old, &new, &unrelated] {
            store.upsert_deal(d).await.unwrap();
        }

        let found = store.deals_by_wallet("0xc").await.unwrap();
        let keys: Vec<&str> = found.iter().map(|d| d.contract_address.as_str()).collect();
        assert_eq!(keys, vec!["0xd2", "0xd1"]);
    }

    #[tokio::test]
    async fn test_top_groups_by_count() {
        let store = MemoryStore::new();
        store.upsert_deal(&deal("0xd1", "0xc", "0xf", "0xa")).await.unwrap();
        store.upsert_deal(&deal("0xd2", "0xc", "0xf", "0xa")).await.unwrap();
        store.upsert_deal(&deal("0xd3", "0xc", "0xg", "0xa")).await.unwrap();

        let groups = store.top_participant_groups(5).await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].deal_count, 2);
        assert_eq!(groups[0].freelancer_address, "0xf");

        let one = store.top_participant_groups(1).await.unwrap();
        assert_eq!(one.len(), 1);
    }

    #[tokio::test]
    async fn test_profile_upsert_keeps_created_at() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut profile = UserProfile {
            address: "0xc".to_string(),
            name: "carol".to_string(),
            bio: String::new(),
            avatar_hash: String::new(),
            skills: vec!["rust".to_string()],
            rating: 4.0,
            review_count: 3,
            created_at: now,
            updated_at: now,
        };
        store.upsert_profile(&profile).await.unwrap();

        profile.created_at = now + Duration::days(1);
        profile.name = "carol b".to_string();
        store.upsert_profile(&profile).await.unwrap();

        let stored = store.profile("0xc").await.unwrap().unwrap();
        assert_eq!(stored.created_at, now);
        assert_eq!(stored.name, "carol b");
    }
}
