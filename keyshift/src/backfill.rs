//! Fills a field of migrated objects from an external, rate-limited
//! billing provider.

use async_trait::async_trait;
use keyshift_store::{FieldMap, Store};
use serde_json::Value;
use std::{future::Future, time::Duration};
use tracing::{info, warn};

use crate::{
    config::{MigrateConfig, RetryPolicy},
    controller::Migration,
    error::{MigrateError, Result},
    stats::{RunStats, Stat},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub plan_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited")]
    RateLimited,

    #[error("resource no longer exists")]
    Gone,

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn fetch_subscription(
        &self,
        customer_ref: &str,
    ) -> std::result::Result<SubscriptionInfo, ProviderError>;
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Calls `f` until it succeeds, retrying rate-limit failures after
/// `base, 2×base, …` up to `policy.max_retries` times.
///
/// `Gone` maps to [`MigrateError::ResourceGone`]; any other failure is
/// returned without retrying.
pub async fn call_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
    key: &str,
    stats: &mut RunStats,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, ProviderError>>,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(ProviderError::RateLimited) if attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                warn!(key, attempt, ?delay, "rate limited, backing off");
                stats.incr(Stat::Retries);
                sleeper.sleep(delay).await;
            }
            Err(ProviderError::RateLimited) => {
                return Err(MigrateError::RateLimited(key.to_owned(), attempt + 1))
            }
            Err(ProviderError::Gone) => return Err(MigrateError::ResourceGone(key.to_owned())),
            Err(ProviderError::Other(message)) => {
                return Err(MigrateError::General {
                    key: key.to_owned(),
                    message,
                })
            }
        }
    }
}

pub const DEFAULT_BACKFILL_PATTERN: &str = "organization:*:object";
pub const DEFAULT_BACKFILL_FIELD: &str = "planid";
pub const DEFAULT_CUSTOMER_REF_FIELD: &str = "stripe_customer_id";

/// Non-empty string value of a JSON-encoded hash field.
fn json_str(raw: Option<Vec<u8>>) -> Option<String> {
    let raw = raw?;

    match serde_json::from_slice::<Value>(&raw) {
        Ok(Value::String(text)) => Some(text),
        Ok(_) => None,
        Err(_) => Some(String::from_utf8_lossy(&raw).into_owned()),
    }
    .filter(|text| !text.is_empty())
}

/// Sets `planid` on organizations that lack it, from their billing
/// subscription.
pub struct BackfillMigration<P> {
    store: Store,
    provider: P,
    sleeper: Box<dyn Sleeper>,
    config: MigrateConfig,
    pattern: String,
    field: String,
    ref_field: String,
}

impl<P: BillingProvider> BackfillMigration<P> {
    pub fn new(store: Store, provider: P, config: MigrateConfig) -> Self {
        Self {
            store,
            provider,
            sleeper: Box::new(TokioSleeper),
            config,
            pattern: DEFAULT_BACKFILL_PATTERN.to_owned(),
            field: DEFAULT_BACKFILL_FIELD.to_owned(),
            ref_field: DEFAULT_CUSTOMER_REF_FIELD.to_owned(),
        }
    }

    pub fn sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    async fn backfill_key(&self, key: &str, dry_run: bool, calls: u64, stats: &mut RunStats) -> Result<bool> {
        if json_str(self.store.hget(key, &self.field).await?).is_some() {
            stats.incr(Stat::SkippedExisting);
            return Ok(false);
        }

        let Some(customer_ref) = json_str(self.store.hget(key, &self.ref_field).await?) else {
            stats.incr(Stat::SkippedUnlinked);
            return Ok(false);
        };

        if calls > 0 && !self.config.rate_limit_pause.is_zero() {
            self.sleeper.sleep(self.config.rate_limit_pause).await;
        }

        let provider = &self.provider;
        let customer = customer_ref.as_str();
        let res = call_with_retry(self.config.retry, self.sleeper.as_ref(), key, stats, move || {
            provider.fetch_subscription(customer)
        })
        .await;

        let info = match res {
            Ok(info) => info,
            Err(MigrateError::ResourceGone(_)) => {
                info!(key, customer_ref, "subscription gone, skipping");
                stats.incr(Stat::SkippedDeleted);
                return Ok(true);
            }
            Err(err) => {
                stats.record_error("organization", key, &err);
                return Ok(true);
            }
        };

        if !dry_run {
            let value = Value::String(info.plan_id).to_string().into_bytes();
            self.store
                .hset(key, &FieldMap::from([(self.field.clone(), value)]))
                .await?;
        }

        stats.incr(Stat::Updated);

        Ok(true)
    }
}

#[async_trait]
impl<P: BillingProvider> Migration for BackfillMigration<P> {
    fn name(&self) -> &str {
        "backfill"
    }

    async fn prepare(&mut self) -> Result<()> {
        self.store.ping().await?;

        Ok(())
    }

    async fn migration_needed(&mut self, _stats: &mut RunStats) -> Result<bool> {
        for key in self.store.scan_all_with(&self.pattern, self.config.scan_count).await? {
            if json_str(self.store.hget(&key, &self.field).await?).is_none() {
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn migrate(&mut self, dry_run: bool, stats: &mut RunStats) -> Result<bool> {
        let keys = self.store.scan_all_with(&self.pattern, self.config.scan_count).await?;
        let mut calls = 0;

        for key in keys {
            stats.incr(Stat::Processed);

            match self.backfill_key(&key, dry_run, calls, stats).await {
                Ok(true) => calls += 1,
                Ok(false) => {}
                Err(err) => stats.record_error("organization", &key, &err),
            }
        }

        info!(calls, updated = stats.updated, "backfill finished");

        Ok(true)
    }
}
