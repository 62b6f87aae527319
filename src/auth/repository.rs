//! User, linked-account and API key persistence

use sqlx::SqlitePool;
use tracing::{debug, error, info};

use super::models::{
    ApiKey, OAuthLinkedAccount, OAuthPendingRegistration, Provider, Role, User,
};
use crate::common::{generate_linked_account_id, generate_user_id, now_ts, safe_email_log};

/// Fields needed to insert a user
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password_hash: Option<&'a str>,
    pub email_verified: bool,
    pub display_name: Option<&'a str>,
}

/// Whether an error is a UNIQUE constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct AccountStore {
    db: SqlitePool,
}

impl AccountStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.db)
            .await
    }

    /// Case-insensitive username lookup
    pub async fn username_exists(&self, username: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?")
            .bind(username.trim())
            .fetch_optional(&self.db)
            .await?;
        Ok(row.is_some())
    }

    pub async fn find_linked_account(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<OAuthLinkedAccount>, sqlx::Error> {
        sqlx::query_as::<_, OAuthLinkedAccount>(
            "SELECT * FROM oauth_accounts WHERE provider = ? AND provider_id = ?",
        )
        .bind(provider)
        .bind(provider_id)
        .fetch_optional(&self.db)
        .await
    }

    /// Link a provider identity to a user
    ///
    /// A link that already exists for `(provider, provider_id)` is kept as is,
    /// so replaying a login never creates a second row.
    pub async fn link_account(
        &self,
        user_id: &str,
        provider: Provider,
        provider_id: &str,
        provider_email: Option<&str>,
        provider_username: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO oauth_accounts (id, user_id, provider, provider_id, provider_email, provider_username)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider, provider_id) DO NOTHING
            "#,
        )
        .bind(generate_linked_account_id())
        .bind(user_id)
        .bind(provider)
        .bind(provider_id)
        .bind(provider_email)
        .bind(provider_username)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 1 {
            info!(user_id = %user_id, provider = %provider, "Linked OAuth account to existing user");
        } else {
            debug!(user_id = %user_id, provider = %provider, "OAuth account already linked");
        }
        Ok(())
    }

    pub async fn create_user(&self, new_user: NewUser<'_>) -> Result<User, sqlx::Error> {
        let id = generate_user_id();
        sqlx::query(
            r#"
            INSERT INTO users (id, email, username, role, password_hash, email_verified, display_name)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(new_user.email.trim().to_lowercase())
        .bind(new_user.username.trim())
        .bind(Role::User)
        .bind(new_user.password_hash)
        .bind(new_user.email_verified)
        .bind(new_user.display_name)
        .execute(&self.db)
        .await
        .map_err(|e| {
            error!(
                error = %e,
                email = %safe_email_log(new_user.email),
                "Database error inserting new user"
            );
            e
        })?;

        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.db)
            .await
    }

    /// Turn a pending OAuth registration into a user plus linked account
    ///
    /// Runs in one transaction that also deletes the pending row. Returns
    /// `None` when the pending row was already consumed.
    pub async fn complete_pending_registration(
        &self,
        pending: &OAuthPendingRegistration,
        username: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let mut tx = self.db.begin().await?;

        let consumed = sqlx::query("DELETE FROM oauth_pending_registrations WHERE temp_token = ?")
            .bind(&pending.temp_token)
            .execute(&mut *tx)
            .await?;
        if consumed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let user_id = generate_user_id();
        sqlx::query(
            r#"
            INSERT INTO users (id, email, username, role, password_hash, email_verified, display_name)
            VALUES (?, ?, ?, ?, NULL, 1, ?)
            "#,
        )
        .bind(&user_id)
        .bind(pending.email.trim().to_lowercase())
        .bind(username.trim())
        .bind(Role::User)
        .bind(pending.provider_username.as_deref())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO oauth_accounts (id, user_id, provider, provider_id, provider_email, provider_username)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(generate_linked_account_id())
        .bind(&user_id)
        .bind(pending.provider)
        .bind(&pending.provider_id)
        .bind(&pending.email)
        .bind(pending.provider_username.as_deref())
        .execute(&mut *tx)
        .await?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(&user_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            user_id = %user.id,
            email = %safe_email_log(&user.email),
            provider = %pending.provider,
            "New user account created via OAuth registration"
        );
        Ok(Some(user))
    }

    pub async fn touch_last_login(&self, user_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login_at = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(now_ts())
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    // ---- API keys ----

    pub async fn insert_api_key(&self, key: &ApiKey) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (id, user_id, name, lookup_prefix, key_hash, scopes, last_used_at, expires_at, revoked_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.id)
        .bind(&key.user_id)
        .bind(&key.name)
        .bind(&key.lookup_prefix)
        .bind(&key.key_hash)
        .bind(&key.scopes)
        .bind(key.last_used_at)
        .bind(key.expires_at)
        .bind(key.revoked_at)
        .bind(key.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Keys under `lookup_prefix` that are neither revoked nor expired at `now`
    pub async fn find_active_api_keys(
        &self,
        lookup_prefix: &str,
        now: i64,
    ) -> Result<Vec<ApiKey>, sqlx::Error> {
        sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT * FROM api_keys
            WHERE lookup_prefix = ?
              AND revoked_at IS NULL
              AND (expires_at IS NULL OR expires_at > ?)
            "#,
        )
        .bind(lookup_prefix)
        .bind(now)
        .fetch_all(&self.db)
        .await
    }

    pub async fn mark_api_key_used(&self, key_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(now_ts())
            .bind(key_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Revoke one of the user's keys; `false` when no active key matched
    pub async fn revoke_api_key(&self, key_id: &str, user_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE api_keys SET revoked_at = ? WHERE id = ? AND user_id = ? AND revoked_at IS NULL",
        )
        .bind(now_ts())
        .bind(key_id)
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
