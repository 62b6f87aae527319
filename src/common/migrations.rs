// src/common/migrations.rs
//! Database migration and schema management

use sqlx::SqlitePool;
use std::env;
use tracing::{info, warn};

/// Run all database migrations
///
/// Tables are created if missing. Setting `RESET_DB=true` drops every auth
/// table first.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let should_reset_db = env::var("RESET_DB").unwrap_or_else(|_| "false".to_string()) == "true";

    if should_reset_db {
        warn!("⚠️  RESET_DB=true - Dropping all tables and recreating schema...");
        drop_all_tables(pool).await?;
        info!("✅ Dropped old tables");
    } else {
        info!("ℹ️  Skipping table drop (RESET_DB not set). Tables will be created if they don't exist.");
    }

    create_schema(pool).await?;

    info!("✅ Database migration completed successfully!");
    Ok(())
}

/// Create every table and index, idempotently
///
/// Split out from [`run_migrations`] so tests can build a schema on an
/// in-memory pool without touching the environment.
pub async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    create_user_tables(pool).await?;
    create_oauth_tables(pool).await?;
    create_api_key_tables(pool).await?;
    create_indexes(pool).await?;
    Ok(())
}

async fn drop_all_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Drop tables in reverse dependency order
    let tables = vec![
        "api_keys",
        "oauth_pending_registrations",
        "oauth_device_codes",
        "oauth_states",
        "oauth_accounts",
        "users",
    ];

    for table in tables {
        let _ = sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(pool)
            .await;
    }

    Ok(())
}

async fn create_user_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Users table. Emails are stored lower-cased; usernames compare
    // case-insensitively.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            username TEXT UNIQUE NOT NULL COLLATE NOCASE,
            role TEXT NOT NULL DEFAULT 'user',
            password_hash TEXT,
            email_verified INTEGER NOT NULL DEFAULT 0,
            display_name TEXT,
            avatar TEXT,
            bio TEXT,
            location TEXT,
            website TEXT,
            last_login_at INTEGER,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_oauth_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Linked provider identities
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS oauth_accounts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            provider_email TEXT,
            provider_username TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(provider, provider_id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // CSRF state for the redirect flow
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS oauth_states (
            state TEXT PRIMARY KEY,
            nonce TEXT NOT NULL,
            provider TEXT NOT NULL,
            action TEXT NOT NULL,
            redirect_url TEXT,
            client_ip TEXT,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Device authorization grants awaiting completion
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS oauth_device_codes (
            device_code TEXT PRIMARY KEY,
            user_code TEXT NOT NULL,
            provider TEXT NOT NULL,
            action TEXT NOT NULL,
            client_ip TEXT,
            user_agent TEXT,
            scopes TEXT NOT NULL DEFAULT '',
            poll_interval INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_poll_at INTEGER,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Provider identities waiting for a username
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS oauth_pending_registrations (
            temp_token TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            email TEXT NOT NULL,
            provider_username TEXT,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_api_key_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS api_keys (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            lookup_prefix TEXT NOT NULL,
            key_hash TEXT NOT NULL,
            scopes TEXT NOT NULL DEFAULT '',
            last_used_at INTEGER,
            expires_at INTEGER,
            revoked_at INTEGER,
            created_at INTEGER NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let indexes = vec![
        "CREATE INDEX IF NOT EXISTS idx_oauth_accounts_user_id ON oauth_accounts(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_api_keys_lookup_prefix ON api_keys(lookup_prefix)",
        "CREATE INDEX IF NOT EXISTS idx_oauth_states_client_ip ON oauth_states(client_ip, expires_at)",
        "CREATE INDEX IF NOT EXISTS idx_oauth_states_expires_at ON oauth_states(expires_at)",
        "CREATE INDEX IF NOT EXISTS idx_oauth_device_codes_expires_at ON oauth_device_codes(expires_at)",
        "CREATE INDEX IF NOT EXISTS idx_oauth_pending_registrations_expires_at ON oauth_pending_registrations(expires_at)",
        "CREATE INDEX IF NOT EXISTS idx_api_keys_user_id ON api_keys(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_api_keys_active ON api_keys(revoked_at, expires_at)",
    ];

    for index in indexes {
        sqlx::query(index).execute(pool).await?;
    }

    Ok(())
}
