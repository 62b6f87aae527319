//! Ephemeral OAuth records
//!
//! CSRF states, device codes and pending registrations live in the relational
//! store; they are how the two halves of a flow find each other. Single use is
//! enforced by deleting the row: consumption goes through `DELETE ...
//! RETURNING`, so of two racing callers at most one gets the row back.
//! Expiry is checked by the callers on every read; sweeping only reclaims
//! space.

use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::models::{OAuthCsrfState, OAuthDeviceCode, OAuthPendingRegistration};
use crate::common::now_ts;

/// Rows removed by one expiry sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub states: u64,
    pub device_codes: u64,
    pub pending_registrations: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.states + self.device_codes + self.pending_registrations
    }
}

#[derive(Debug, Clone)]
pub struct OAuthStateStore {
    db: SqlitePool,
}

impl OAuthStateStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    // ---- CSRF state ----

    pub async fn insert_state(&self, state: &OAuthCsrfState) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO oauth_states (state, nonce, provider, action, redirect_url, client_ip, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&state.state)
        .bind(&state.nonce)
        .bind(state.provider)
        .bind(state.action)
        .bind(&state.redirect_url)
        .bind(&state.client_ip)
        .bind(state.created_at)
        .bind(state.expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Unexpired states created from `client_ip`
    pub async fn count_pending_states_for_ip(
        &self,
        client_ip: &str,
        now: i64,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM oauth_states WHERE client_ip = ? AND expires_at > ?")
                .bind(client_ip)
                .bind(now)
                .fetch_one(&self.db)
                .await?;
        Ok(count)
    }

    /// Atomically fetch and delete a state row
    pub async fn take_state(&self, state: &str) -> Result<Option<OAuthCsrfState>, sqlx::Error> {
        sqlx::query_as::<_, OAuthCsrfState>(
            r#"
            DELETE FROM oauth_states WHERE state = ?
            RETURNING state, nonce, provider, action, redirect_url, client_ip, created_at, expires_at
            "#,
        )
        .bind(state)
        .fetch_optional(&self.db)
        .await
    }

    // ---- device codes ----

    pub async fn insert_device_code(&self, device: &OAuthDeviceCode) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO oauth_device_codes
                (device_code, user_code, provider, action, client_ip, user_agent, scopes,
                 poll_interval, attempts, last_poll_at, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&device.device_code)
        .bind(&device.user_code)
        .bind(device.provider)
        .bind(device.action)
        .bind(&device.client_ip)
        .bind(&device.user_agent)
        .bind(&device.scopes)
        .bind(device.poll_interval)
        .bind(device.attempts)
        .bind(device.last_poll_at)
        .bind(device.created_at)
        .bind(device.expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn find_device_code(
        &self,
        device_code: &str,
    ) -> Result<Option<OAuthDeviceCode>, sqlx::Error> {
        sqlx::query_as::<_, OAuthDeviceCode>(
            "SELECT * FROM oauth_device_codes WHERE device_code = ?",
        )
        .bind(device_code)
        .fetch_optional(&self.db)
        .await
    }

    /// Count one poll attempt and stamp its time
    pub async fn record_poll(&self, device_code: &str, now: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE oauth_device_codes SET attempts = attempts + 1, last_poll_at = ? WHERE device_code = ?",
        )
        .bind(now)
        .bind(device_code)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Widen the minimum spacing between polls after a `slow_down`
    pub async fn slow_down(&self, device_code: &str, by_seconds: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE oauth_device_codes SET poll_interval = poll_interval + ? WHERE device_code = ?",
        )
        .bind(by_seconds)
        .bind(device_code)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Delete a device code; `false` if it was already gone
    pub async fn delete_device_code(&self, device_code: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM oauth_device_codes WHERE device_code = ?")
            .bind(device_code)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    // ---- pending registrations ----

    pub async fn insert_pending_registration(
        &self,
        pending: &OAuthPendingRegistration,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO oauth_pending_registrations
                (temp_token, provider, provider_id, email, provider_username, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&pending.temp_token)
        .bind(pending.provider)
        .bind(&pending.provider_id)
        .bind(&pending.email)
        .bind(&pending.provider_username)
        .bind(pending.created_at)
        .bind(pending.expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn find_pending_registration(
        &self,
        temp_token: &str,
    ) -> Result<Option<OAuthPendingRegistration>, sqlx::Error> {
        sqlx::query_as::<_, OAuthPendingRegistration>(
            "SELECT * FROM oauth_pending_registrations WHERE temp_token = ?",
        )
        .bind(temp_token)
        .fetch_optional(&self.db)
        .await
    }

    pub async fn delete_pending_registration(&self, temp_token: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM oauth_pending_registrations WHERE temp_token = ?")
            .bind(temp_token)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    // ---- expiry ----

    /// Delete every ephemeral row whose expiry is at or before `now`
    pub async fn sweep_expired(&self, now: i64) -> Result<SweepReport, sqlx::Error> {
        let states = sqlx::query("DELETE FROM oauth_states WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.db)
            .await?
            .rows_affected();
        let device_codes = sqlx::query("DELETE FROM oauth_device_codes WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.db)
            .await?
            .rows_affected();
        let pending_registrations =
            sqlx::query("DELETE FROM oauth_pending_registrations WHERE expires_at <= ?")
                .bind(now)
                .execute(&self.db)
                .await?
                .rows_affected();

        let report = SweepReport {
            states,
            device_codes,
            pending_registrations,
        };
        if report.total() > 0 {
            debug!(
                states = report.states,
                device_codes = report.device_codes,
                pending_registrations = report.pending_registrations,
                "Swept expired OAuth records"
            );
        }
        Ok(report)
    }

    /// Run [`sweep_expired`](Self::sweep_expired) on a fixed interval
    pub fn start_sweep_task(self, every: Duration) {
        info!(interval_secs = every.as_secs(), "OAuth expiry sweeper started");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = self.sweep_expired(now_ts()).await {
                    warn!(error = %e, "OAuth expiry sweep failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::{OAuthAction, Provider};
    use crate::common::migrations::create_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_store() -> OAuthStateStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        OAuthStateStore::new(pool)
    }

    fn state_row(state: &str, ip: &str, expires_at: i64) -> OAuthCsrfState {
        OAuthCsrfState {
            state: state.to_string(),
            nonce: "nonce".to_string(),
            provider: Provider::GitHub,
            action: OAuthAction::Login,
            redirect_url: Some("/dashboard".to_string()),
            client_ip: Some(ip.to_string()),
            created_at: expires_at - 600,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_take_state_is_single_use() {
        let store = setup_store().await;
        let now = now_ts();
        store.insert_state(&state_row("abc", "10.0.0.1", now + 600)).await.unwrap();

        let first = store.take_state("abc").await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().redirect_url.as_deref(), Some("/dashboard"));

        let second = store.take_state("abc").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_count_pending_states_ignores_expired() {
        let store = setup_store().await;
        let now = now_ts();
        store.insert_state(&state_row("a", "10.0.0.1", now + 600)).await.unwrap();
        store.insert_state(&state_row("b", "10.0.0.1", now - 1)).await.unwrap();
        store.insert_state(&state_row("c", "10.0.0.2", now + 600)).await.unwrap();

        assert_eq!(store.count_pending_states_for_ip("10.0.0.1", now).await.unwrap(), 1);
        assert_eq!(store.count_pending_states_for_ip("10.0.0.3", now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_poll_increments_attempts() {
        let store = setup_store().await;
        let now = now_ts();
        let device = OAuthDeviceCode {
            device_code: "dev-1".to_string(),
            user_code: "ABCD-1234".to_string(),
            provider: Provider::GitHub,
            action: OAuthAction::Register,
            client_ip: None,
            user_agent: Some("cli/1.0".to_string()),
            scopes: "read:user user:email".to_string(),
            poll_interval: 5,
            attempts: 0,
            last_poll_at: None,
            created_at: now,
            expires_at: now + 900,
        };
        store.insert_device_code(&device).await.unwrap();

        store.record_poll("dev-1", now).await.unwrap();
        store.record_poll("dev-1", now + 6).await.unwrap();

        let row = store.find_device_code("dev-1").await.unwrap().unwrap();
        assert_eq!(row.attempts, 2);
        assert_eq!(row.last_poll_at, Some(now + 6));

        store.slow_down("dev-1", 5).await.unwrap();
        store.slow_down("dev-1", 5).await.unwrap();
        let row = store.find_device_code("dev-1").await.unwrap().unwrap();
        assert_eq!(row.poll_interval, 15);
        assert_eq!(row.attempts, 2);

        assert!(store.delete_device_code("dev-1").await.unwrap());
        assert!(!store.delete_device_code("dev-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_expired_removes_only_expired_rows() {
        let store = setup_store().await;
        let now = now_ts();
        store.insert_state(&state_row("live", "10.0.0.1", now + 600)).await.unwrap();
        store.insert_state(&state_row("dead", "10.0.0.1", now - 5)).await.unwrap();
        store
            .insert_pending_registration(&OAuthPendingRegistration {
                temp_token: "tmp".to_string(),
                provider: Provider::GitHub,
                provider_id: "42".to_string(),
                email: "a@example.com".to_string(),
                provider_username: None,
                created_at: now - 4000,
                expires_at: now - 400,
            })
            .await
            .unwrap();

        let report = store.sweep_expired(now).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                states: 1,
                device_codes: 0,
                pending_registrations: 1
            }
        );
        assert!(store.take_state("live").await.unwrap().is_some());
    }
}
