use crate::error::ApiError;
use crate::rate_limit::RateLimits;
use anyhow::Context;
use std::sync::Arc;
use tempbox_config::AppConfig;
use tempbox_core::{Account, AccountCredentials};
use tempbox_email::{BrandResolver, MessageEnricher, ProviderManager};
use tempbox_storage::{account_key, SessionStore};

pub struct AppState {
    pub(crate) config: AppConfig,
    pub(crate) providers: ProviderManager,
    pub(crate) sessions: SessionStore,
    pub(crate) enricher: MessageEnricher,
    pub(crate) rate_limits: RateLimits,
}

impl AppState {
    pub async fn initialize(config: AppConfig) -> anyhow::Result<Self> {
        let providers =
            ProviderManager::from_config(&config).context("initialize email providers")?;
        let brand = BrandResolver::from_config(&config.brand).context("initialize brand resolver")?;
        let sessions = SessionStore::from_config(&config.cache).await;

        tracing::info!(
            providers = ?providers.providers(),
            default = %providers.default_provider(),
            cache = sessions.backend_name(),
            "app state ready"
        );

        Ok(Self::new(
            config,
            providers,
            sessions,
            MessageEnricher::new(Arc::new(brand)),
        ))
    }

    pub fn new(
        config: AppConfig,
        providers: ProviderManager,
        sessions: SessionStore,
        enricher: MessageEnricher,
    ) -> Self {
        let rate_limits = RateLimits::from_config(&config.rate_limit);
        Self {
            config,
            providers,
            sessions,
            enricher,
            rate_limits,
        }
    }

    pub(crate) fn redis_connected(&self) -> bool {
        self.sessions.backend_name() == "redis" && self.sessions.is_connected()
    }

    pub(crate) async fn persist_account(&self, account: &Account) {
        if !self
            .sessions
            .set(&account_key(&account.email), account, None)
            .await
        {
            tracing::debug!(address = %account.email, "account kept in memory only");
        }
    }

    /// Session store first, then the provider maps, then the client's
    /// credential blob. A restored account is installed and persisted.
    pub(crate) async fn resolve_account(
        &self,
        address: &str,
        credentials: Option<&str>,
    ) -> Result<Account, ApiError> {
        if let Some(cached) = self.sessions.get::<Account>(&account_key(address)).await {
            if let Some(live) = self.providers.get_account(address, cached.provider).await {
                return Ok(live);
            }
            self.providers.set_account(cached.clone()).await?;
            return Ok(cached);
        }

        if let Some(live) = self.providers.find_account(address).await {
            self.persist_account(&live).await;
            return Ok(live);
        }

        let Some(raw) = credentials.filter(|raw| !raw.trim().is_empty()) else {
            return Err(ApiError::NeedsRestore(address.to_string()));
        };
        let blob = AccountCredentials::parse(raw).map_err(|err| {
            tracing::warn!(address, "credential blob rejected: {err}");
            ApiError::NeedsRestore(address.to_string())
        })?;

        let mailsac_domain = &self.config.providers.mailsac.domain;
        let account = Account::from_credentials(address, blob, mailsac_domain);
        self.providers.set_account(account.clone()).await?;
        self.persist_account(&account).await;
        tracing::info!(address, provider = %account.provider, "account restored from client credentials");
        Ok(account)
    }

    /// Writes back a token the adapter refreshed while serving a request.
    pub(crate) async fn sync_token(&self, before: &Account) {
        let Some(after) = self.providers.get_account(&before.email, before.provider).await else {
            return;
        };
        if after.token != before.token {
            tracing::debug!(address = %after.email, "persisting refreshed token");
            self.persist_account(&after).await;
        }
    }
}
