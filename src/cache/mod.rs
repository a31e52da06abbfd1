//! Read-through plumbing shared by the services.
//!
//! Every single-entity lookup follows the same contract:
//! 1. Ask the store. A hit is returned as-is.
//! 2. A miss, or a store error, falls through to the chain.
//! 3. The fetched value is persisted before it is returned. A failed write is
//!    logged and does not fail the lookup.
//!
//! Bulk syncs walk a list of chain entities and apply [`BulkPolicy`] to
//! per-entity failures.

use crate::onchain::GatewayError;
use crate::store::StoreError;

use async_trait::async_trait;
use std::fmt::Display;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("subscription ended: {0}")]
    Subscription(String),
}

impl CacheError {
    /// Client-side fault, as opposed to an upstream or storage failure.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, CacheError::InvalidAddress(_))
    }
}

/// One cacheable entity kind: where it lives in the store and how to get it
/// from the chain.
#[async_trait]
pub trait CacheSource<K, V>: Send + Sync
where
    K: ?Sized + Sync,
    V: Send + Sync,
{
    async fn lookup(&self, key: &K) -> Result<Option<V>, StoreError>;

    async fn fetch(&self, key: &K) -> Result<V, CacheError>;

    async fn persist(&self, value: &V) -> Result<(), StoreError>;
}

/// Store first, chain on miss, persist what the chain returned.
pub async fn read_through<K, V, S>(source: &S, key: &K) -> Result<V, CacheError>
where
    S: CacheSource<K, V> + ?Sized,
    K: ?Sized + Sync + Display,
    V: Send + Sync,
{
    match source.lookup(key).await {
        Ok(Some(value)) => {
            debug!(key = %key, "cache hit");
            return Ok(value);
        }
        Ok(None) => debug!(key = %key, "cache miss"),
        Err(e) => debug!(key = %key, error = %e, "cache lookup failed, treating as miss"),
    }

    fetch_and_persist(source, key).await
}

/// Skip the store read; always go to the chain and refresh the cached row.
pub async fn fetch_and_persist<K, V, S>(source: &S, key: &K) -> Result<V, CacheError>
where
    S: CacheSource<K, V> + ?Sized,
    K: ?Sized + Sync + Display,
    V: Send + Sync,
{
    let value = source.fetch(key).await?;
    if let Err(e) = source.persist(&value).await {
        warn!(key = %key, error = %e, "failed to cache fetched entity");
    }
    Ok(value)
}

/// What a bulk sync does when one entity fails to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkPolicy {
    /// Log and skip the entity (true) or abort the whole sync (false).
    pub continue_on_entity_error: bool,
}

impl Default for BulkPolicy {
    fn default() -> Self {
        Self {
            continue_on_entity_error: true,
        }
    }
}

/// Result of a bulk sync: the entities that made it and how many did not.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOutcome<T> {
    pub items: Vec<T>,
    pub skipped: usize,
}

impl<T> BulkOutcome<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            skipped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for BulkOutcome<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `fetch_and_persist` over every key, in order, applying `policy` to
/// per-entity failures.
pub async fn collect_bulk<K, V, S>(
    source: &S,
    keys: &[K],
    policy: BulkPolicy,
) -> Result<BulkOutcome<V>, CacheError>
where
    S: CacheSource<K, V> + ?Sized,
    K: Sync + Display,
    V: Send + Sync,
{
    let mut outcome = BulkOutcome::new();
    for key in keys {
        match fetch_and_persist(source, key).await {
            Ok(value) => outcome.items.push(value),
            Err(e) if policy.continue_on_entity_error => {
                warn!(key = %key, error = %e, "skipping entity");
                outcome.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(outcome)
}
