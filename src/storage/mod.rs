//! Persistent store collaborator.
//!
//! Row-level CRUD over the logical tables the security core needs. This
//! module owns no business rules; services call it and translate failures
//! into the crate's error taxonomy.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::config::StorageConfig;
use crate::core::domain::{
    AccountSecurityState, AuditEvent, Card, CardStatus, StoredTransaction, Wallet,
};
use crate::crypto::envelope::EncryptedEnvelope;

const DEFAULT_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug)]
pub struct VaultStorage {
    pool: SqlitePool,
    is_memory: bool,
}

impl VaultStorage {
    /// Open a store from configuration; pool sizing and acquire timeout
    /// come from the config, falling back to the built-in defaults.
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        Self::connect(
            &config.database_url,
            config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
            Duration::from_secs(
                config.connection_timeout_seconds.unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            ),
        )
        .await
    }

    pub async fn new_with_url(database_url: &str) -> Result<Self> {
        Self::connect(
            database_url,
            DEFAULT_MAX_CONNECTIONS,
            Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
        .await
    }

    async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        // normalize sqlite URLs: accept "sqlite:" or "sqlite://"
        let mut db_url = database_url.to_string();
        if db_url.starts_with("sqlite:") && !db_url.starts_with("sqlite://") {
            db_url = db_url.replacen("sqlite:", "sqlite://", 1);
        }

        // ensure parent directory exists for file-backed sqlite URLs
        if let Some(path) = db_url.strip_prefix("sqlite://") {
            let path_only = path.split('?').next().unwrap_or(path);
            if path_only != ":memory:" && !path_only.is_empty() {
                if let Some(parent) = std::path::Path::new(path_only).parent() {
                    if !parent.as_os_str().is_empty() {
                        if let Err(e) = std::fs::create_dir_all(parent) {
                            warn!("Failed to create database dir {:?}: {}", parent, e);
                        }
                    }
                }
            }
        }

        // Avoid logging the full DB URL; it may carry credentials.
        let safe_db_url_info = if let Some((scheme, rest)) = db_url.split_once("://") {
            format!("{}://(redacted, len={})", scheme, rest.len())
        } else {
            "(invalid db_url format)".to_string()
        };
        info!(db = %safe_db_url_info, "connecting to database");
        let is_memory = db_url.contains(":memory:");

        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
        use std::str::FromStr;

        let connect_options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| anyhow::anyhow!("Invalid database URL: {}", e))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(max_connections.min(2))
            .acquire_timeout(acquire_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

        let storage = Self { pool, is_memory };
        storage.initialize_schema().await?;

        info!("Vault storage initialized");
        Ok(storage)
    }

    pub fn is_in_memory(&self) -> bool {
        self.is_memory
    }

    async fn initialize_schema(&self) -> Result<()> {
        debug!("Initializing database schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                chain TEXT NOT NULL,
                address TEXT NOT NULL,
                encrypted_key BLOB NOT NULL,
                active BOOLEAN NOT NULL,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create wallets table: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                masked_pan TEXT NOT NULL,
                encrypted_payload BLOB NOT NULL,
                balance TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create cards table: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_security (
                owner_id TEXT PRIMARY KEY,
                pin_hash BLOB NOT NULL,
                pin_salt BLOB NOT NULL,
                failed_attempts INTEGER NOT NULL DEFAULT 0,
                locked_until DATETIME,
                last_attempt DATETIME
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create account_security table: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                action TEXT NOT NULL,
                metadata TEXT,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create audit_log table: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                status TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create transactions table: {}", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_wallets_owner ON wallets (owner_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cards_owner ON cards (owner_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log (entity_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_owner ON transactions (owner_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        debug!("Database schema initialized");
        Ok(())
    }

    fn wallet_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Wallet> {
        let blob: Vec<u8> = row.get("encrypted_key");
        let encrypted_key = EncryptedEnvelope::from_blob(&blob)
            .map_err(|e| anyhow::anyhow!("Corrupt wallet envelope: {}", e))?;
        Ok(Wallet {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            chain: row.get("chain"),
            address: row.get("address"),
            encrypted_key,
            active: row.get("active"),
            created_at: row.get("created_at"),
        })
    }

    fn card_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Card> {
        let blob: Vec<u8> = row.get("encrypted_payload");
        let encrypted_payload = EncryptedEnvelope::from_blob(&blob)
            .map_err(|e| anyhow::anyhow!("Corrupt card envelope: {}", e))?;
        let status_str: String = row.get("status");
        let status = CardStatus::parse(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Unknown card status: {}", status_str))?;
        Ok(Card {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            masked_pan: row.get("masked_pan"),
            encrypted_payload,
            balance: row.get("balance"),
            status,
            created_at: row.get("created_at"),
        })
    }
}

impl Clone for VaultStorage {
    fn clone(&self) -> Self {
        Self { pool: self.pool.clone(), is_memory: self.is_memory }
    }
}

/// Store operations the security core depends on. Object-safe so services
/// and tests can inject alternatives.
#[async_trait]
pub trait VaultStorageTrait: Send + Sync {
    async fn store_wallet(&self, wallet: &Wallet) -> Result<()>;
    async fn load_wallet(&self, owner_id: &str, wallet_id: &str) -> Result<Option<Wallet>>;
    async fn list_wallets(&self, owner_id: &str) -> Result<Vec<Wallet>>;

    async fn store_card(&self, card: &Card) -> Result<()>;
    async fn load_card(&self, owner_id: &str, card_id: &str) -> Result<Option<Card>>;

    async fn get_security_state(&self, owner_id: &str) -> Result<Option<AccountSecurityState>>;
    async fn upsert_security_state(&self, state: &AccountSecurityState) -> Result<()>;

    async fn log_audit(&self, event: &AuditEvent) -> Result<()>;
    async fn audit_events_for(&self, entity_id: &str) -> Result<Vec<AuditEvent>>;

    async fn insert_transaction(&self, tx: &StoredTransaction) -> Result<()>;
    async fn transactions_since(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredTransaction>>;
}

#[async_trait]
impl VaultStorageTrait for VaultStorage {
    async fn store_wallet(&self, wallet: &Wallet) -> Result<()> {
        debug!(wallet_id = %wallet.id, chain = %wallet.chain, "storing wallet");
        let blob = wallet
            .encrypted_key
            .to_blob()
            .map_err(|e| anyhow::anyhow!("Envelope serialization failed: {}", e))?;

        // The envelope is a column of the wallet row: one INSERT, one unit.
        // A wallet row can never exist without its encrypted key.
        sqlx::query(
            r#"
            INSERT INTO wallets (id, owner_id, chain, address, encrypted_key, active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&wallet.id)
        .bind(&wallet.owner_id)
        .bind(&wallet.chain)
        .bind(&wallet.address)
        .bind(blob)
        .bind(wallet.active)
        .bind(wallet.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to store wallet: {}", e))?;
        Ok(())
    }

    async fn load_wallet(&self, owner_id: &str, wallet_id: &str) -> Result<Option<Wallet>> {
        let row = sqlx::query("SELECT * FROM wallets WHERE id = ?1 AND owner_id = ?2")
            .bind(wallet_id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load wallet: {}", e))?;
        row.map(|r| Self::wallet_from_row(&r)).transpose()
    }

    async fn list_wallets(&self, owner_id: &str) -> Result<Vec<Wallet>> {
        let rows = sqlx::query(
            "SELECT * FROM wallets WHERE owner_id = ?1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list wallets: {}", e))?;
        rows.iter().map(Self::wallet_from_row).collect()
    }

    async fn store_card(&self, card: &Card) -> Result<()> {
        debug!(card_id = %card.id, "storing card");
        let blob = card
            .encrypted_payload
            .to_blob()
            .map_err(|e| anyhow::anyhow!("Envelope serialization failed: {}", e))?;

        sqlx::query(
            r#"
            INSERT INTO cards (id, owner_id, masked_pan, encrypted_payload, balance, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&card.id)
        .bind(&card.owner_id)
        .bind(&card.masked_pan)
        .bind(blob)
        .bind(&card.balance)
        .bind(card.status.as_str())
        .bind(card.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to store card: {}", e))?;
        Ok(())
    }

    async fn load_card(&self, owner_id: &str, card_id: &str) -> Result<Option<Card>> {
        let row = sqlx::query("SELECT * FROM cards WHERE id = ?1 AND owner_id = ?2")
            .bind(card_id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load card: {}", e))?;
        row.map(|r| Self::card_from_row(&r)).transpose()
    }

    async fn get_security_state(&self, owner_id: &str) -> Result<Option<AccountSecurityState>> {
        let row = sqlx::query("SELECT * FROM account_security WHERE owner_id = ?1")
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load security state: {}", e))?;
        Ok(row.map(|r| AccountSecurityState {
            owner_id: r.get("owner_id"),
            pin_hash: r.get("pin_hash"),
            pin_salt: r.get("pin_salt"),
            failed_attempts: r.get::<i64, _>("failed_attempts") as u32,
            locked_until: r.get("locked_until"),
            last_attempt: r.get("last_attempt"),
        }))
    }

    async fn upsert_security_state(&self, state: &AccountSecurityState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_security (owner_id, pin_hash, pin_salt, failed_attempts, locked_until, last_attempt)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(owner_id) DO UPDATE SET
                pin_hash = excluded.pin_hash,
                pin_salt = excluded.pin_salt,
                failed_attempts = excluded.failed_attempts,
                locked_until = excluded.locked_until,
                last_attempt = excluded.last_attempt
            "#,
        )
        .bind(&state.owner_id)
        .bind(&state.pin_hash)
        .bind(&state.pin_salt)
        .bind(state.failed_attempts as i64)
        .bind(state.locked_until)
        .bind(state.last_attempt)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to upsert security state: {}", e))?;
        Ok(())
    }

    async fn log_audit(&self, event: &AuditEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (actor_id, entity_type, entity_id, action, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&event.actor_id)
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(&event.action)
        .bind(event.metadata.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to log audit event: {}", e))?;
        Ok(())
    }

    async fn audit_events_for(&self, entity_id: &str) -> Result<Vec<AuditEvent>> {
        let rows =
            sqlx::query("SELECT * FROM audit_log WHERE entity_id = ?1 ORDER BY created_at DESC")
                .bind(entity_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read audit log: {}", e))?;
        rows.iter()
            .map(|r| {
                let metadata: String = r.get("metadata");
                Ok(AuditEvent {
                    actor_id: r.get("actor_id"),
                    entity_type: r.get("entity_type"),
                    entity_id: r.get("entity_id"),
                    action: r.get("action"),
                    metadata: serde_json::from_str(&metadata)
                        .unwrap_or(serde_json::Value::Null),
                })
            })
            .collect()
    }

    async fn insert_transaction(&self, tx: &StoredTransaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (owner_id, amount, created_at, status)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&tx.owner_id)
        .bind(&tx.amount)
        .bind(tx.created_at)
        .bind(&tx.status)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to insert transaction: {}", e))?;
        Ok(())
    }

    async fn transactions_since(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredTransaction>> {
        let rows = sqlx::query(
            "SELECT * FROM transactions WHERE owner_id = ?1 AND created_at >= ?2 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read transactions: {}", e))?;
        Ok(rows
            .iter()
            .map(|r| StoredTransaction {
                owner_id: r.get("owner_id"),
                amount: r.get("amount"),
                created_at: r.get("created_at"),
                status: r.get("status"),
            })
            .collect())
    }
}
