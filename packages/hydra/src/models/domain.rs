//! Domain (tenant) metadata. The domain name is the partition key for every
//! queue, worker pool, and history query in the system.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub domain: String,
    pub display_name: String,
    pub description: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "domain, display_name, description, token_hash, created_at, updated_at";

impl Domain {
    pub async fn find(domain: &str, db: &PgPool) -> Result<Option<Self>> {
        let doc =
            sqlx::query_as::<_, Self>(&format!("SELECT {COLUMNS} FROM domains WHERE domain = $1"))
                .bind(domain)
                .fetch_optional(db)
                .await?;

        Ok(doc)
    }

    /// Resolve a caller's domain from the SHA-256 hash of its token.
    pub async fn find_by_token_hash(token_hash: &str, db: &PgPool) -> Result<Option<Self>> {
        let doc = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM domains WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(db)
        .await?;

        Ok(doc)
    }

    pub async fn list(db: &PgPool) -> Result<Vec<Self>> {
        let docs = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM domains ORDER BY domain"
        ))
        .fetch_all(db)
        .await?;

        Ok(docs)
    }

    /// Create or update domain metadata; rotating the token is just an upsert
    /// with a fresh hash.
    pub async fn upsert(
        domain: &str,
        display_name: &str,
        description: &str,
        token_hash: &str,
        db: &PgPool,
    ) -> Result<Self> {
        let doc = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO domains (domain, display_name, description, token_hash)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (domain) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                description = EXCLUDED.description,
                token_hash = EXCLUDED.token_hash,
                updated_at = NOW()
            RETURNING {COLUMNS}
            "#
        ))
        .bind(domain)
        .bind(display_name)
        .bind(description)
        .bind(token_hash)
        .fetch_one(db)
        .await?;

        Ok(doc)
    }

    /// Update metadata without touching the token.
    pub async fn update_metadata(
        domain: &str,
        display_name: &str,
        description: &str,
        db: &PgPool,
    ) -> Result<Option<Self>> {
        let doc = sqlx::query_as::<_, Self>(&format!(
            r#"
            UPDATE domains
            SET display_name = $1, description = $2, updated_at = NOW()
            WHERE domain = $3
            RETURNING {COLUMNS}
            "#
        ))
        .bind(display_name)
        .bind(description)
        .bind(domain)
        .fetch_optional(db)
        .await?;

        Ok(doc)
    }

    pub async fn rotate_token(domain: &str, token_hash: &str, db: &PgPool) -> Result<Option<Self>> {
        let doc = sqlx::query_as::<_, Self>(&format!(
            r#"
            UPDATE domains
            SET token_hash = $1, updated_at = NOW()
            WHERE domain = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(token_hash)
        .bind(domain)
        .fetch_optional(db)
        .await?;

        Ok(doc)
    }

    pub async fn delete(domain: &str, db: &PgPool) -> Result<bool> {
        let result = sqlx::query("DELETE FROM domains WHERE domain = $1")
            .bind(domain)
            .execute(db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
