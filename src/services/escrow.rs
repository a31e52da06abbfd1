//! Deal cache over the escrow factory and the per-deal escrow contracts.

use super::ArbiterService;
use crate::cache::{self, BulkOutcome, BulkPolicy, CacheError, CacheSource};
use crate::events::{self, EventKind, EventSender, EventUpdate};
use crate::models::Deal;
use crate::onchain::{checksum, ChainGateway, EscrowCreatedLog};
use crate::store::{CacheStore, StoreError};

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct EscrowService {
    gateway: Arc<dyn ChainGateway>,
    store: Arc<dyn CacheStore>,
    arbiters: Arc<ArbiterService>,
    policy: BulkPolicy,
}

impl EscrowService {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        store: Arc<dyn CacheStore>,
        arbiters: Arc<ArbiterService>,
    ) -> Self {
        Self {
            gateway,
            store,
            arbiters,
            policy: BulkPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BulkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Read one escrow contract into a `Deal`.
    ///
    /// `getProjectDetails()` must succeed. The `token()` read is best-effort
    /// and leaves the token address empty on failure. A non-zero arbiter is
    /// resolved through the arbiter cache and attached in memory only.
    pub async fn fetch_deal(&self, escrow: &Address) -> Result<Deal, CacheError> {
        let details = self.gateway.project_details(*escrow).await?;

        let token_address = match self.gateway.escrow_token(*escrow).await {
            Ok(token) => checksum(&token),
            Err(e) => {
                warn!(escrow = %escrow, error = %e, "failed to read escrow token");
                String::new()
            }
        };

        let arbiter = if details.arbiter.is_zero() {
            None
        } else {
            match self.arbiters.get_arbiter_by_address(&details.arbiter).await {
                Ok(arbiter) => Some(arbiter),
                Err(e) => {
                    debug!(arbiter = %details.arbiter, error = %e, "arbiter enrichment failed");
                    None
                }
            }
        };

        let now = Utc::now();
        Ok(Deal {
            contract_address: checksum(escrow),
            client_address: checksum(&details.client),
            freelancer_address: checksum(&details.freelancer),
            arbiter_address: checksum(&details.arbiter),
            token_address,
            total_amount: details.total_amount.to_string(),
            status: i32::from(details.status),
            work_status: i32::from(details.work_status),
            project_description: details.project_description,
            work_submission: details.work_submission,
            created_at: now,
            updated_at: now,
            arbiter,
        })
    }

    /// Enumerate the factory and refresh every deal's cached row.
    /// Failing to list the factory's contracts fails the whole sync.
    pub async fn get_all_deals(&self) -> Result<BulkOutcome<Deal>, CacheError> {
        let contracts = self.gateway.escrow_contracts().await?;
        info!(count = contracts.len(), "escrow contracts found in factory");

        let outcome = cache::collect_bulk(self, &contracts, self.policy).await?;
        if outcome.skipped > 0 {
            warn!(skipped = outcome.skipped, "deal sync skipped entries");
        }
        Ok(outcome)
    }

    /// Deals the wallet takes part in. A cache miss (zero rows, or a store
    /// error) triggers one full sync filtered in memory.
    pub async fn get_deals_by_wallet(&self, wallet: &Address) -> Result<Vec<Deal>, CacheError> {
        let wallet = checksum(wallet);
        match self.store.deals_by_wallet(&wallet).await {
            Ok(deals) if !deals.is_empty() => {
                debug!(wallet = %wallet, deals = deals.len(), "wallet deals served from cache");
                return Ok(deals);
            }
            Ok(_) => debug!(wallet = %wallet, "no cached deals for wallet, syncing"),
            Err(e) => debug!(wallet = %wallet, error = %e, "wallet deal lookup failed, syncing"),
        }

        let all = self.get_all_deals().await?;
        Ok(all.items.into_iter().filter(|d| d.involves(&wallet)).collect())
    }

    /// Cache-first single lookup.
    pub async fn get_deal_by_address(&self, escrow: &Address) -> Result<Deal, CacheError> {
        cache::read_through(self, escrow).await
    }

    /// Consume EscrowCreated until `cancel` fires (Ok) or the subscription
    /// fails (Err).
    pub async fn watch_escrow_events(
        &self,
        cancel: CancellationToken,
        sink: EventSender,
    ) -> Result<(), CacheError> {
        let created = self.gateway.subscribe_escrow_created().await?;
        info!("watching escrow factory events");

        events::drive("EscrowCreated", created, &cancel, &sink, |log| {
            self.on_escrow_created(log)
        })
        .await
    }

    async fn on_escrow_created(&self, log: EscrowCreatedLog) -> Option<EventUpdate> {
        info!(
            event = %log,
            client = %log.client,
            freelancer = %log.freelancer,
            block = ?log.block_number,
            "escrow created"
        );
        match cache::fetch_and_persist(self, &log.escrow).await {
            Ok(deal) => Some(EventUpdate::new(
                EventKind::DealCreated,
                deal.contract_address.clone(),
                serde_json::to_value(&deal).unwrap_or_default(),
            )),
            Err(e) => {
                warn!(escrow = %log.escrow, error = %e, "failed to fetch created deal");
                None
            }
        }
    }
}

#[async_trait]
impl CacheSource<Address, Deal> for EscrowService {
    async fn lookup(&self, key: &Address) -> Result<Option<Deal>, StoreError> {
        self.store.deal(&checksum(key)).await
    }

    async fn fetch(&self, key: &Address) -> Result<Deal, CacheError> {
        self.fetch_deal(key).await
    }

    async fn persist(&self, value: &Deal) -> Result<(), StoreError> {
        self.store.upsert_deal(value).await
    }
}
