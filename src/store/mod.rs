//! Relational cache store for arbiters, deals and user profiles.
//!
//! Data model (Postgres):
//!   arbiters(address UNIQUE, name, profile_hash, is_active, created_at)
//!   deals(contract_address UNIQUE, client/freelancer/arbiter/token addresses,
//!         total_amount, status, work_status, project_description,
//!         work_submission, created_at, updated_at)
//!   user_profiles(address UNIQUE, name, bio, avatar_hash, skills, rating,
//!                 review_count, created_at, updated_at)
//!
//! Every write is an upsert keyed on the unique column, last writer wins.
//! Concurrent writers to the same key rely on the backend making the upsert
//! atomic per row; nothing here takes an in-process lock around it.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::{Arbiter, Deal, ParticipantGroup, UserProfile};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

/// Storage backend shared by all services.
///
/// Lookups return `Ok(None)` on a miss. Addresses are compared in the
/// checksummed form the services write them in.
#[async_trait]
pub trait CacheStore: Send + Sync {
    // --- Arbiters ---

    /// Insert or overwrite name, profile hash, active flag and created_at.
    async fn upsert_arbiter(&self, arbiter: &Arbiter) -> Result<(), StoreError>;

    async fn arbiter(&self, address: &str) -> Result<Option<Arbiter>, StoreError>;

    /// Flip the active flag off. A missing row is left missing.
    async fn deactivate_arbiter(&self, address: &str) -> Result<(), StoreError>;

    // --- Deals ---

    /// Insert or overwrite every mutable column. `created_at` of an existing
    /// row is kept.
    async fn upsert_deal(&self, deal: &Deal) -> Result<(), StoreError>;

    async fn deal(&self, contract_address: &str) -> Result<Option<Deal>, StoreError>;

    /// Deals where `wallet` is client, freelancer or arbiter, newest first.
    async fn deals_by_wallet(&self, wallet: &str) -> Result<Vec<Deal>, StoreError>;

    /// Cached deals grouped by the exact (client, freelancer, arbiter) triple,
    /// most frequent first.
    async fn top_participant_groups(
        &self,
        limit: usize,
    ) -> Result<Vec<ParticipantGroup>, StoreError>;

    // --- Profiles ---

    async fn profile(&self, address: &str) -> Result<Option<UserProfile>, StoreError>;

    /// Insert or overwrite everything except `created_at`.
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError>;
}
