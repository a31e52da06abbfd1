//! Postgres backend.

use super::{CacheStore, StoreError};
use crate::models::{Arbiter, Deal, ParticipantGroup, UserProfile};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};

const DEAL_COLUMNS: &str = r#"
    contract_address,
    COALESCE(client_address, '') AS client_address,
    COALESCE(freelancer_address, '') AS freelancer_address,
    COALESCE(arbiter_address, '') AS arbiter_address,
    COALESCE(token_address, '') AS token_address,
    COALESCE(total_amount::text, '0') AS total_amount,
    COALESCE(status, 0) AS status,
    COALESCE(work_status, 0) AS work_status,
    COALESCE(project_description, '') AS project_description,
    COALESCE(work_submission, '') AS work_submission,
    COALESCE(created_at, NOW()) AS created_at,
    COALESCE(updated_at, NOW()) AS updated_at
"#;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS arbiters (
        id SERIAL PRIMARY KEY,
        address VARCHAR(42) NOT NULL UNIQUE,
        name VARCHAR(255) NOT NULL,
        profile_hash TEXT,
        is_active BOOLEAN DEFAULT true,
        created_at TIMESTAMPTZ DEFAULT NOW(),
        updated_at TIMESTAMPTZ DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS deals (
        id SERIAL PRIMARY KEY,
        contract_address VARCHAR(42) NOT NULL UNIQUE,
        client_address VARCHAR(42),
        freelancer_address VARCHAR(42),
        arbiter_address VARCHAR(42),
        token_address VARCHAR(42),
        total_amount TEXT,
        status INTEGER DEFAULT 0,
        work_status INTEGER DEFAULT 0,
        project_description TEXT,
        work_submission TEXT,
        created_at TIMESTAMPTZ DEFAULT NOW(),
        updated_at TIMESTAMPTZ DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS user_profiles (
        id SERIAL PRIMARY KEY,
        address VARCHAR(42) NOT NULL UNIQUE,
        name VARCHAR(255),
        bio TEXT,
        avatar_hash TEXT,
        skills TEXT,
        rating DECIMAL(3,2) DEFAULT 0.00,
        review_count INTEGER DEFAULT 0,
        created_at TIMESTAMPTZ DEFAULT NOW(),
        updated_at TIMESTAMPTZ DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_arbiters_active ON arbiters(is_active)",
    "CREATE INDEX IF NOT EXISTS idx_user_profiles_rating ON user_profiles(rating)",
    "CREATE INDEX IF NOT EXISTS idx_deals_client ON deals(client_address)",
    "CREATE INDEX IF NOT EXISTS idx_deals_freelancer ON deals(freelancer_address)",
    "CREATE INDEX IF NOT EXISTS idx_deals_arbiter ON deals(arbiter_address)",
    "CREATE INDEX IF NOT EXISTS idx_deals_token ON deals(token_address)",
    "CREATE INDEX IF NOT EXISTS idx_deals_status ON deals(status)",
    "CREATE INDEX IF NOT EXISTS idx_deals_work_status ON deals(work_status)",
    "CREATE INDEX IF NOT EXISTS idx_deals_created_at ON deals(created_at)",
];

#[derive(Debug, FromRow)]
struct ArbiterRow {
    address: String,
    name: String,
    profile_hash: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<ArbiterRow> for Arbiter {
    fn from(row: ArbiterRow) -> Self {
        Arbiter {
            address: row.address,
            name: row.name,
            profile_hash: row.profile_hash,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct DealRow {
    contract_address: String,
    client_address: String,
    freelancer_address: String,
    arbiter_address: String,
    token_address: String,
    total_amount: String,
    status: i32,
    work_status: i32,
    project_description: String,
    work_submission: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DealRow> for Deal {
    fn from(row: DealRow) -> Self {
        Deal {
            contract_address: row.contract_address,
            client_address: row.client_address,
            freelancer_address: row.freelancer_address,
            arbiter_address: row.arbiter_address,
            token_address: row.token_address,
            total_amount: row.total_amount,
            status: row.status,
            work_status: row.work_status,
            project_description: row.project_description,
            work_submission: row.work_submission,
            created_at: row.created_at,
            updated_at: row.updated_at,
            arbiter: None,
        }
    }
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    address: String,
    name: String,
    bio: String,
    avatar_hash: String,
    skills: String,
    rating: f64,
    review_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProfileRow> for UserProfile {
    fn from(row: ProfileRow) -> Self {
        UserProfile {
            skills: UserProfile::parse_skills(&row.skills),
            address: row.address,
            name: row.name,
            bio: row.bio,
            avatar_hash: row.avatar_hash,
            rating: row.rating,
            review_count: row.review_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct GroupRow {
    client_address: String,
    freelancer_address: String,
    arbiter_address: String,
    deal_count: i64,
}

/// Pooled Postgres connection shared by every service and task.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!(max_connections = max_connections, "connected to Postgres");
        Ok(Self { pool })
    }

    /// Create the cache tables and lookup indexes if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!(statements = SCHEMA.len(), "cache schema ensured");
        Ok(())
    }
}

#[async_trait]
impl CacheStore for PgStore {
    async fn upsert_arbiter(&self, arbiter: &Arbiter) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO arbiters (address, name, profile_hash, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (address) DO UPDATE SET
                name = EXCLUDED.name,
                profile_hash = EXCLUDED.profile_hash,
                is_active = EXCLUDED.is_active,
                created_at = EXCLUDED.created_at,
                updated_at = NOW()
            "#,
        )
        .bind(&arbiter.address)
        .bind(&arbiter.name)
        .bind(&arbiter.profile_hash)
        .bind(arbiter.is_active)
        .bind(arbiter.created_at)
        .execute(&self.pool)
        .await?;

        debug!(address = %arbiter.address, "arbiter upserted");
        Ok(())
    }

    async fn arbiter(&self, address: &str) -> Result<Option<Arbiter>, StoreError> {
        let row = sqlx::query_as::<_, ArbiterRow>(
            r#"
            SELECT address, name, COALESCE(profile_hash, '') AS profile_hash,
                   COALESCE(is_active, false) AS is_active,
                   COALESCE(created_at, NOW()) AS created_at
            FROM arbiters WHERE address = $1
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Arbiter::from))
    }

    async fn deactivate_arbiter(&self, address: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE arbiters SET is_active = false, updated_at = NOW() WHERE address = $1",
        )
        .bind(address)
        .execute(&self.pool)
        .await?;

        debug!(address = %address, rows = result.rows_affected(), "arbiter deactivated");
        Ok(())
    }

    async fn upsert_deal(&self, deal: &Deal) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO deals (
                contract_address, client_address, freelancer_address, arbiter_address,
                token_address, total_amount, status, work_status, project_description,
                work_submission, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (contract_address) DO UPDATE SET
                client_address = EXCLUDED.client_address,
                freelancer_address = EXCLUDED.freelancer_address,
                arbiter_address = EXCLUDED.arbiter_address,
                token_address = EXCLUDED.token_address,
                total_amount = EXCLUDED.total_amount,
                status = EXCLUDED.status,
                work_status = EXCLUDED.work_status,
                project_description = EXCLUDED.project_description,
                work_submission = EXCLUDED.work_submission,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&deal.contract_address)
        .bind(&deal.client_address)
        .bind(&deal.freelancer_address)
        .bind(&deal.arbiter_address)
        .bind(&deal.token_address)
        .bind(&deal.total_amount)
        .bind(deal.status)
        .bind(deal.work_status)
        .bind(&deal.project_description)
        .bind(&deal.work_submission)
        .bind(deal.created_at)
        .bind(deal.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(contract = %deal.contract_address, "deal upserted");
        Ok(())
    }

    async fn deal(&self, contract_address: &str) -> Result<Option<Deal>, StoreError> {
        let sql = format!("SELECT {DEAL_COLUMNS} FROM deals WHERE contract_address = $1");
        let row = sqlx::query_as::<_, DealRow>(&sql)
            .bind(contract_address)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Deal::from))
    }

    async fn deals_by_wallet(&self, wallet: &str) -> Result<Vec<Deal>, StoreError> {
        let sql = format!(
            "SELECT {DEAL_COLUMNS} FROM deals \
             WHERE client_address = $1 OR freelancer_address = $1 OR arbiter_address = $1 \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, DealRow>(&sql)
            .bind(wallet)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Deal::from).collect())
    }

    async fn top_participant_groups(
        &self,
        limit: usize,
    ) -> Result<Vec<ParticipantGroup>, StoreError> {
        let limit = i64::try_from(limit).map_err(|_| StoreError::Corrupt {
            table: "deals",
            reason: format!("group limit {limit} out of range"),
        })?;

        let rows = sqlx::query_as::<_, GroupRow>(
            r#"
            SELECT
                COALESCE(client_address, '') AS client_address,
                COALESCE(freelancer_address, '') AS freelancer_address,
                COALESCE(arbiter_address, '') AS arbiter_address,
                COUNT(*) AS deal_count
            FROM deals
            GROUP BY client_address, freelancer_address, arbiter_address
            ORDER BY COUNT(*) DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ParticipantGroup {
                client_address: r.client_address,
                freelancer_address: r.freelancer_address,
                arbiter_address: r.arbiter_address,
                deal_count: r.deal_count,
            })
            .collect())
    }

    async fn profile(&self, address: &str) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT address,
                   COALESCE(name, '') AS name,
                   COALESCE(bio, '') AS bio,
                   COALESCE(avatar_hash, '') AS avatar_hash,
                   COALESCE(skills, '') AS skills,
                   COALESCE(rating, 0)::float8 AS rating,
                   COALESCE(review_count, 0) AS review_count,
                   COALESCE(created_at, NOW()) AS created_at,
                   COALESCE(updated_at, NOW()) AS updated_at
            FROM user_profiles WHERE address = $1
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserProfile::from))
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (
                address, name, bio, avatar_hash, skills, rating, review_count,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (address) DO UPDATE SET
                name = EXCLUDED.name,
                bio = EXCLUDED.bio,
                avatar_hash = EXCLUDED.avatar_hash,
                skills = EXCLUDED.skills,
                rating = EXCLUDED.rating,
                review_count = EXCLUDED.review_count,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&profile.address)
        .bind(&profile.name)
        .bind(&profile.bio)
        .bind(&profile.avatar_hash)
        .bind(profile.skills_column())
        .bind(profile.rating)
        .bind(profile.review_count)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(address = %profile.address, "profile upserted");
        Ok(())
    }
}
