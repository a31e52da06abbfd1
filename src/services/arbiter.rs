//! Arbiter cache over the on-chain registry.

use crate::cache::{self, BulkOutcome, BulkPolicy, CacheError, CacheSource};
use crate::events::{self, EventKind, EventSender, EventUpdate};
use crate::models::Arbiter;
use crate::onchain::{checksum, ArbiterAddedLog, ArbiterRemovedLog, ChainGateway};
use crate::store::{CacheStore, StoreError};

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on `arbiterList(i)` probes per enumeration.
pub const DEFAULT_PROBE_LIMIT: u64 = 1000;

pub struct ArbiterService {
    gateway: Arc<dyn ChainGateway>,
    store: Arc<dyn CacheStore>,
    policy: BulkPolicy,
    probe_limit: u64,
}

impl ArbiterService {
    pub fn new(gateway: Arc<dyn ChainGateway>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            gateway,
            store,
            policy: BulkPolicy::default(),
            probe_limit: DEFAULT_PROBE_LIMIT,
        }
    }

    pub fn with_policy(mut self, policy: BulkPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_probe_limit(mut self, probe_limit: u64) -> Self {
        self.probe_limit = probe_limit;
        self
    }

    /// Walk `arbiterList(0..)` until a probe fails, returns the zero address,
    /// or the probe limit is reached. The registry exposes no length getter.
    pub async fn arbiter_addresses(&self) -> Vec<Address> {
        let mut addresses = Vec::new();
        for index in 0..self.probe_limit {
            match self.gateway.arbiter_at(index).await {
                Ok(address) if address.is_zero() => break,
                Ok(address) => addresses.push(address),
                Err(e) => {
                    debug!(index = index, error = %e, "arbiter probe ended");
                    break;
                }
            }
        }
        addresses
    }

    /// Enumerate the registry, refresh every arbiter's cached row.
    pub async fn get_all_arbiters(&self) -> Result<BulkOutcome<Arbiter>, CacheError> {
        let addresses = self.arbiter_addresses().await;
        info!(count = addresses.len(), "arbiters found in registry");

        let outcome = cache::collect_bulk(self, &addresses, self.policy).await?;
        if outcome.skipped > 0 {
            warn!(skipped = outcome.skipped, "arbiter sync skipped entries");
        }
        Ok(outcome)
    }

    pub async fn get_active_arbiters(&self) -> Result<Vec<Arbiter>, CacheError> {
        let all = self.get_all_arbiters().await?;
        Ok(all.items.into_iter().filter(|a| a.is_active).collect())
    }

    /// Cache-first single lookup.
    pub async fn get_arbiter_by_address(&self, address: &Address) -> Result<Arbiter, CacheError> {
        cache::read_through(self, address).await
    }

    /// Live `isArbiterActive` read, bypassing the cache.
    pub async fn is_arbiter_active(&self, address: &Address) -> Result<bool, CacheError> {
        Ok(self.gateway.is_arbiter_active(*address).await?)
    }

    /// Consume ArbiterAdded / ArbiterRemoved, each on its own task, until
    /// `cancel` fires (Ok) or either subscription fails (Err). Both
    /// subscriptions are opened before any event is processed.
    pub async fn watch_arbiter_events(
        self: Arc<Self>,
        cancel: CancellationToken,
        sink: EventSender,
    ) -> Result<(), CacheError> {
        let added = self.gateway.subscribe_arbiter_added().await?;
        let removed = self.gateway.subscribe_arbiter_removed().await?;
        info!("watching arbiter registry events");

        // Stops both loops when either one fails or this call is dropped.
        let scope = cancel.child_token();
        let _guard = scope.clone().drop_guard();

        let added_task = {
            let svc = self.clone();
            let scope = scope.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                let result = events::drive("ArbiterAdded", added, &scope, &sink, |log| {
                    svc.on_arbiter_added(log)
                })
                .await;
                if result.is_err() {
                    scope.cancel();
                }
                result
            })
        };

        let removed_task = {
            let svc = self.clone();
            let scope = scope.clone();
            tokio::spawn(async move {
                let result = events::drive("ArbiterRemoved", removed, &scope, &sink, |log| {
                    svc.on_arbiter_removed(log)
                })
                .await;
                if result.is_err() {
                    scope.cancel();
                }
                result
            })
        };

        let (added, removed) = tokio::join!(added_task, removed_task);
        joined("ArbiterAdded", added)?;
        joined("ArbiterRemoved", removed)
    }

    async fn on_arbiter_added(&self, log: ArbiterAddedLog) -> Option<EventUpdate> {
        info!(event = %log, block = ?log.block_number, "arbiter added");
        match cache::fetch_and_persist(self, &log.arbiter).await {
            Ok(arbiter) => Some(EventUpdate::new(
                EventKind::ArbiterAdded,
                arbiter.address.clone(),
                serde_json::to_value(&arbiter).unwrap_or_default(),
            )),
            Err(e) => {
                warn!(arbiter = %log.arbiter, error = %e, "failed to fetch added arbiter");
                None
            }
        }
    }

    async fn on_arbiter_removed(&self, log: ArbiterRemovedLog) -> Option<EventUpdate> {
        info!(event = %log, block = ?log.block_number, "arbiter removed");
        let address = checksum(&log.arbiter);
        if let Err(e) = self.store.deactivate_arbiter(&address).await {
            warn!(arbiter = %address, error = %e, "failed to deactivate arbiter");
        }
        Some(EventUpdate::new(
            EventKind::ArbiterRemoved,
            address,
            json!({ "isActive": false }),
        ))
    }
}

fn joined(
    subscription: &'static str,
    result: Result<Result<(), CacheError>, JoinError>,
) -> Result<(), CacheError> {
    result.map_err(|e| CacheError::Subscription(format!("{subscription}: task failed: {e}")))?
}

#[async_trait]
impl CacheSource<Address, Arbiter> for ArbiterService {
    async fn lookup(&self, key: &Address) -> Result<Option<Arbiter>, StoreError> {
        self.store.arbiter(&checksum(key)).await
    }

    async fn fetch(&self, key: &Address) -> Result<Arbiter, CacheError> {
        let record = self.gateway.arbiter_record(*key).await?;
        Ok(Arbiter {
            address: checksum(key),
            name: record.name,
            profile_hash: record.profile_hash,
            is_active: record.is_active,
            created_at: Utc::now(),
        })
    }

    async fn persist(&self, value: &Arbiter) -> Result<(), StoreError> {
        self.store.upsert_arbiter(value).await
    }
}
