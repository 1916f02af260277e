use crate::{EmailError, MailTmBackend, MailsacBackend, ProviderBackend, RetryPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempbox_config::AppConfig;
use tempbox_core::{Account, MailMessage, ProviderKind, ProviderStats};
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_ROTATION_WINDOW: Duration = Duration::from_secs(300);

struct SelectionState {
    failures: BTreeMap<ProviderKind, u32>,
    usage: BTreeMap<ProviderKind, u64>,
    last_rotation: Instant,
    last_used: Option<ProviderKind>,
}

impl SelectionState {
    fn new(providers: &[ProviderKind]) -> Self {
        Self {
            failures: providers.iter().map(|p| (*p, 0)).collect(),
            usage: providers.iter().map(|p| (*p, 0)).collect(),
            last_rotation: Instant::now(),
            last_used: None,
        }
    }

    fn failures(&self, provider: ProviderKind) -> u32 {
        self.failures.get(&provider).copied().unwrap_or(0)
    }

    fn usage(&self, provider: ProviderKind) -> u64 {
        self.usage.get(&provider).copied().unwrap_or(0)
    }
}

/// Outcome of a selection pass, applied to the state only when committing.
enum Selection {
    Reset(ProviderKind),
    Rotate(ProviderKind),
    Pick(ProviderKind),
}

impl Selection {
    fn provider(&self) -> ProviderKind {
        match self {
            Self::Reset(p) | Self::Rotate(p) | Self::Pick(p) => *p,
        }
    }
}

/// Picks a provider for new inboxes and routes inbox operations to the
/// backend that owns them.
pub struct ProviderManager {
    backends: Vec<Arc<dyn ProviderBackend>>,
    default_provider: ProviderKind,
    failure_threshold: u32,
    rotation_window: Duration,
    state: Mutex<SelectionState>,
}

impl ProviderManager {
    /// `backends` order is the failover order. An unconfigured default falls
    /// back to the first backend.
    pub fn new(
        backends: Vec<Arc<dyn ProviderBackend>>,
        default_provider: ProviderKind,
    ) -> Result<Self, EmailError> {
        let providers: Vec<ProviderKind> = backends.iter().map(|b| b.kind()).collect();
        let Some(first) = providers.first().copied() else {
            return Err(EmailError::AllProvidersFailed(
                "no email providers are enabled".to_string(),
            ));
        };
        let default_provider = if providers.contains(&default_provider) {
            default_provider
        } else {
            tracing::warn!(%default_provider, fallback = %first, "default provider is not enabled");
            first
        };

        Ok(Self {
            state: Mutex::new(SelectionState::new(&providers)),
            backends,
            default_provider,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            rotation_window: DEFAULT_ROTATION_WINDOW,
        })
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_rotation_window(mut self, window: Duration) -> Self {
        self.rotation_window = window;
        self
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, EmailError> {
        let providers = &config.providers;
        let mut backends: Vec<Arc<dyn ProviderBackend>> = Vec::new();
        if providers.mailtm.enabled {
            let retry = RetryPolicy::from_config(&config.retry);
            backends.push(Arc::new(MailTmBackend::from_config(&providers.mailtm, retry)?));
        }
        if providers.mailsac.enabled {
            backends.push(Arc::new(MailsacBackend::from_config(&providers.mailsac)?));
        }

        Ok(Self::new(backends, providers.default_provider)?
            .with_failure_threshold(providers.failure_threshold)
            .with_rotation_window(Duration::from_secs(providers.rotation_window_secs)))
    }

    pub fn providers(&self) -> Vec<ProviderKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    pub fn default_provider(&self) -> ProviderKind {
        self.default_provider
    }

    pub fn backend(&self, provider: ProviderKind) -> Result<&Arc<dyn ProviderBackend>, EmailError> {
        self.backends
            .iter()
            .find(|b| b.kind() == provider)
            .ok_or(EmailError::ProviderDisabled(provider))
    }

    /// Default first, then declaration order.
    fn preference_order(&self) -> Vec<ProviderKind> {
        let mut order = vec![self.default_provider];
        order.extend(self.providers().into_iter().filter(|p| *p != self.default_provider));
        order
    }

    fn select(&self, state: &SelectionState) -> Selection {
        let available: Vec<ProviderKind> = self
            .preference_order()
            .into_iter()
            .filter(|p| state.failures(*p) < self.failure_threshold)
            .collect();

        match available.as_slice() {
            [] => return Selection::Reset(self.default_provider),
            [only] => return Selection::Pick(*only),
            _ => {}
        }

        if state.last_rotation.elapsed() > self.rotation_window {
            let least_used = available
                .iter()
                .copied()
                .reduce(|best, p| if state.usage(p) < state.usage(best) { p } else { best });
            if let Some(candidate) = least_used.filter(|p| Some(*p) != state.last_used) {
                return Selection::Rotate(candidate);
            }
        }

        let least_failing = available
            .iter()
            .copied()
            .reduce(|best, p| if state.failures(p) < state.failures(best) { p } else { best })
            .unwrap_or(self.default_provider);
        Selection::Pick(least_failing)
    }

    /// Provider for the next new inbox.
    pub async fn best_provider(&self) -> ProviderKind {
        let mut state = self.state.lock().await;
        let selection = self.select(&state);
        match selection {
            Selection::Reset(provider) => {
                tracing::warn!("every provider is over the failure threshold, resetting counters");
                state.failures.values_mut().for_each(|f| *f = 0);
                provider
            }
            Selection::Rotate(provider) => {
                tracing::info!(%provider, usage = state.usage(provider), "rotating provider");
                state.last_rotation = Instant::now();
                state.last_used = Some(provider);
                provider
            }
            Selection::Pick(provider) => provider,
        }
    }

    async fn record_dispatch(&self, provider: ProviderKind) {
        *self.state.lock().await.usage.entry(provider).or_insert(0) += 1;
    }

    async fn record_success(&self, provider: ProviderKind) {
        self.state.lock().await.failures.insert(provider, 0);
    }

    async fn record_failure(&self, provider: ProviderKind) {
        let mut state = self.state.lock().await;
        let failures = state.failures.entry(provider).or_insert(0);
        *failures += 1;
        tracing::debug!(%provider, failures = *failures, "provider failure recorded");
    }

    /// Creates an inbox on `preferred` (or the best provider) and fails over
    /// to every other provider once before giving up.
    pub async fn create_account(
        &self,
        preferred: Option<ProviderKind>,
    ) -> Result<Account, EmailError> {
        let first = match preferred {
            Some(provider) => {
                self.backend(provider)?;
                provider
            }
            None => self.best_provider().await,
        };

        let mut attempts = vec![first];
        attempts.extend(self.providers().into_iter().filter(|p| *p != first));

        let mut errors = Vec::new();
        for provider in attempts {
            let backend = self.backend(provider)?;
            self.record_dispatch(provider).await;
            match backend.create_account().await {
                Ok(mut account) => {
                    account.provider = provider;
                    let mut state = self.state.lock().await;
                    state.failures.insert(provider, 0);
                    state.last_used = Some(provider);
                    if provider != first {
                        tracing::info!(%provider, failed = %first, "failed over to alternate provider");
                    }
                    return Ok(account);
                }
                Err(err) => {
                    tracing::error!(%provider, "account creation failed: {err}");
                    self.record_failure(provider).await;
                    errors.push(format!("{provider}: {err}"));
                }
            }
        }

        Err(EmailError::AllProvidersFailed(errors.join("; ")))
    }

    /// Read path: failures are counted and degrade to an empty inbox.
    pub async fn get_messages(&self, address: &str, provider: ProviderKind) -> Vec<MailMessage> {
        let backend = match self.backend(provider) {
            Ok(backend) => backend,
            Err(err) => {
                tracing::warn!(address, "cannot list messages: {err}");
                return Vec::new();
            }
        };

        match backend.list_messages(address).await {
            Ok(messages) => {
                self.record_success(provider).await;
                messages
            }
            Err(err) => {
                tracing::warn!(%provider, address, "listing messages failed: {err}");
                self.record_failure(provider).await;
                Vec::new()
            }
        }
    }

    pub async fn get_message(
        &self,
        address: &str,
        provider: ProviderKind,
        message_id: &str,
    ) -> Result<MailMessage, EmailError> {
        let result = self.backend(provider)?.get_message(address, message_id).await;
        self.observe(provider, &result).await;
        result
    }

    pub async fn delete_message(
        &self,
        address: &str,
        provider: ProviderKind,
        message_id: &str,
    ) -> Result<(), EmailError> {
        let result = self
            .backend(provider)?
            .delete_message(address, message_id)
            .await;
        self.observe(provider, &result).await;
        result
    }

    async fn observe<T>(&self, provider: ProviderKind, result: &Result<T, EmailError>) {
        match result {
            Ok(_) => self.record_success(provider).await,
            Err(err) if err.is_provider_fault() => self.record_failure(provider).await,
            Err(_) => {}
        }
    }

    pub async fn get_account(&self, address: &str, provider: ProviderKind) -> Option<Account> {
        self.backend(provider).ok()?.get_account(address).await
    }

    pub async fn set_account(&self, account: Account) -> Result<(), EmailError> {
        self.backend(account.provider)?.set_account(account).await;
        Ok(())
    }

    /// Removes the address from every backend that knows it.
    pub async fn remove_account(&self, address: &str) -> Option<Account> {
        let mut removed = None;
        for backend in &self.backends {
            if let Some(account) = backend.remove_account(address).await {
                removed = Some(account);
            }
        }
        removed
    }

    pub async fn find_account(&self, address: &str) -> Option<Account> {
        for backend in &self.backends {
            if let Some(account) = backend.get_account(address).await {
                return Some(account);
            }
        }
        None
    }

    /// Counters plus the provider the next inbox would go to. Unlike
    /// [`Self::best_provider`] this never resets or rotates.
    pub async fn stats(&self) -> ProviderStats {
        let state = self.state.lock().await;
        ProviderStats {
            providers: self.providers(),
            best_provider: self.select(&state).provider(),
            failures: state.failures.clone(),
            usage: state.usage.clone(),
            seconds_since_rotation: state.last_rotation.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend whose next `failing_creates` creations fail.
    struct FakeBackend {
        kind: ProviderKind,
        failing_creates: AtomicU32,
        creates: AtomicU32,
        list_fails: bool,
        accounts: crate::backend::AccountMap,
    }

    impl FakeBackend {
        fn new(kind: ProviderKind) -> Self {
            Self {
                kind,
                failing_creates: AtomicU32::new(0),
                creates: AtomicU32::new(0),
                list_fails: false,
                accounts: Default::default(),
            }
        }

        fn failing(kind: ProviderKind, times: u32) -> Self {
            let backend = Self::new(kind);
            backend.failing_creates.store(times, Ordering::SeqCst);
            backend
        }

        fn creates(&self) -> u32 {
            self.creates.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderBackend for FakeBackend {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn create_account(&self) -> Result<Account, EmailError> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failing_creates.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_creates.store(remaining - 1, Ordering::SeqCst);
                return Err(EmailError::ProviderUnavailable {
                    provider: self.kind,
                    message: "upstream down".to_string(),
                });
            }
            let account = Account::new(format!("box{n}@{}.test", self.kind.as_str()), self.kind);
            self.accounts.insert(account.clone()).await;
            Ok(account)
        }

        async fn list_messages(&self, _address: &str) -> Result<Vec<MailMessage>, EmailError> {
            if self.list_fails {
                Err(EmailError::Upstream {
                    provider: self.kind,
                    status: 503,
                    message: "unavailable".to_string(),
                })
            } else {
                Ok(Vec::new())
            }
        }

        async fn get_message(&self, _: &str, id: &str) -> Result<MailMessage, EmailError> {
            Err(EmailError::NotFound(id.to_string()))
        }

        async fn delete_message(&self, _: &str, _: &str) -> Result<(), EmailError> {
            Err(EmailError::Upstream {
                provider: self.kind,
                status: 500,
                message: "boom".to_string(),
            })
        }

        async fn get_account(&self, address: &str) -> Option<Account> {
            self.accounts.get(address).await
        }

        async fn set_account(&self, account: Account) {
            self.accounts.insert(account).await;
        }

        async fn remove_account(&self, address: &str) -> Option<Account> {
            self.accounts.remove(address).await
        }
    }

    fn manager(a: Arc<FakeBackend>, b: Arc<FakeBackend>) -> ProviderManager {
        let backends: Vec<Arc<dyn ProviderBackend>> = vec![a, b];
        ProviderManager::new(backends, ProviderKind::MailTm).expect("manager built")
    }

    async fn failures(manager: &ProviderManager, provider: ProviderKind) -> u32 {
        manager.stats().await.failures[&provider]
    }

    #[tokio::test]
    async fn healthy_default_provider_is_used() {
        let mailtm = Arc::new(FakeBackend::new(ProviderKind::MailTm));
        let mailsac = Arc::new(FakeBackend::new(ProviderKind::Mailsac));
        let manager = manager(mailtm.clone(), mailsac.clone());

        let account = manager.create_account(None).await.expect("created");
        assert_eq!(account.provider, ProviderKind::MailTm);
        assert_eq!(mailtm.creates(), 1);
        assert_eq!(mailsac.creates(), 0);
    }

    #[tokio::test]
    async fn fails_over_once_per_provider() {
        let mailtm = Arc::new(FakeBackend::failing(ProviderKind::MailTm, 1));
        let mailsac = Arc::new(FakeBackend::new(ProviderKind::Mailsac));
        let manager = manager(mailtm.clone(), mailsac.clone());

        let account = manager.create_account(None).await.expect("failover succeeds");
        assert_eq!(account.provider, ProviderKind::Mailsac);
        assert_eq!(mailtm.creates(), 1);
        assert_eq!(mailsac.creates(), 1);
        assert_eq!(failures(&manager, ProviderKind::MailTm).await, 1);
        assert_eq!(failures(&manager, ProviderKind::Mailsac).await, 0);
    }

    #[tokio::test]
    async fn exhausting_every_provider_aggregates_errors() {
        let mailtm = Arc::new(FakeBackend::failing(ProviderKind::MailTm, 5));
        let mailsac = Arc::new(FakeBackend::failing(ProviderKind::Mailsac, 5));
        let manager = manager(mailtm.clone(), mailsac.clone());

        let err = manager.create_account(None).await.expect_err("all fail");
        match err {
            EmailError::AllProvidersFailed(message) => {
                assert!(message.contains("mail.tm"));
                assert!(message.contains("mailsac"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(mailtm.creates(), 1);
        assert_eq!(mailsac.creates(), 1);
    }

    #[tokio::test]
    async fn provider_failing_twice_routes_to_the_other() {
        let mailtm = Arc::new(FakeBackend::failing(ProviderKind::MailTm, 2));
        let mailsac = Arc::new(FakeBackend::new(ProviderKind::Mailsac));
        let manager = manager(mailtm.clone(), mailsac.clone());

        for _ in 0..2 {
            let account = manager
                .create_account(Some(ProviderKind::MailTm))
                .await
                .expect("created");
            assert_eq!(account.provider, ProviderKind::Mailsac);
        }
        assert_eq!(mailtm.creates(), 2);
        assert_eq!(failures(&manager, ProviderKind::MailTm).await, 2);
        assert_eq!(manager.best_provider().await, ProviderKind::Mailsac);
    }

    #[tokio::test]
    async fn one_failure_costs_the_default_its_preference() {
        let mailtm = Arc::new(FakeBackend::failing(ProviderKind::MailTm, 1));
        let mailsac = Arc::new(FakeBackend::new(ProviderKind::Mailsac));
        let manager = manager(mailtm.clone(), mailsac.clone());

        manager.create_account(None).await.expect("failover succeeds");
        let account = manager.create_account(None).await.expect("created");
        assert_eq!(account.provider, ProviderKind::Mailsac);
        assert_eq!(mailtm.creates(), 1);
    }

    #[tokio::test]
    async fn providers_at_threshold_are_skipped_and_reset_when_all_are() {
        let mailtm = Arc::new(FakeBackend::failing(ProviderKind::MailTm, 10));
        let mailsac = Arc::new(FakeBackend::failing(ProviderKind::Mailsac, 10));
        let manager = manager(mailtm, mailsac).with_failure_threshold(2);

        let _ = manager.create_account(Some(ProviderKind::Mailsac)).await;
        let _ = manager.create_account(Some(ProviderKind::Mailsac)).await;
        assert_eq!(failures(&manager, ProviderKind::MailTm).await, 2);
        assert_eq!(failures(&manager, ProviderKind::Mailsac).await, 2);

        assert_eq!(manager.best_provider().await, ProviderKind::MailTm);
        assert_eq!(failures(&manager, ProviderKind::MailTm).await, 0);
        assert_eq!(failures(&manager, ProviderKind::Mailsac).await, 0);
    }

    #[tokio::test]
    async fn single_available_provider_wins() {
        let mailtm = Arc::new(FakeBackend::failing(ProviderKind::MailTm, 3));
        let mailsac = Arc::new(FakeBackend::new(ProviderKind::Mailsac));
        let manager = manager(mailtm, mailsac);

        for _ in 0..3 {
            manager
                .create_account(Some(ProviderKind::MailTm))
                .await
                .expect("fails over");
        }
        assert_eq!(failures(&manager, ProviderKind::MailTm).await, 3);
        assert_eq!(manager.best_provider().await, ProviderKind::Mailsac);
    }

    #[tokio::test]
    async fn unknown_preferred_provider_is_rejected() {
        let mailtm = Arc::new(FakeBackend::new(ProviderKind::MailTm));
        let backends: Vec<Arc<dyn ProviderBackend>> = vec![mailtm];
        let manager = ProviderManager::new(backends, ProviderKind::MailTm).expect("built");

        let err = manager
            .create_account(Some(ProviderKind::Mailsac))
            .await
            .expect_err("mailsac disabled");
        assert!(matches!(err, EmailError::ProviderDisabled(ProviderKind::Mailsac)));
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_spreads_accounts_after_the_window() {
        let mailtm = Arc::new(FakeBackend::new(ProviderKind::MailTm));
        let mailsac = Arc::new(FakeBackend::new(ProviderKind::Mailsac));
        let manager = manager(mailtm.clone(), mailsac.clone());

        for _ in 0..3 {
            manager.create_account(None).await.expect("created");
        }
        assert_eq!(mailtm.creates(), 3);

        tokio::time::advance(Duration::from_secs(301)).await;
        let account = manager.create_account(None).await.expect("created");
        assert_eq!(account.provider, ProviderKind::Mailsac);
        assert_eq!(manager.stats().await.seconds_since_rotation, 0);

        // The window restarted, so selection falls back to failure counts.
        let account = manager.create_account(None).await.expect("created");
        assert_eq!(account.provider, ProviderKind::MailTm);
        assert_eq!(manager.stats().await.usage[&ProviderKind::MailTm], 4);
        assert_eq!(manager.stats().await.usage[&ProviderKind::Mailsac], 1);
    }

    #[tokio::test]
    async fn list_failures_degrade_and_count() {
        let mut failing = FakeBackend::new(ProviderKind::MailTm);
        failing.list_fails = true;
        let manager = manager(
            Arc::new(failing),
            Arc::new(FakeBackend::new(ProviderKind::Mailsac)),
        );

        let messages = manager.get_messages("box@x.test", ProviderKind::MailTm).await;
        assert!(messages.is_empty());
        assert_eq!(failures(&manager, ProviderKind::MailTm).await, 1);

        manager.get_messages("box@x.test", ProviderKind::Mailsac).await;
        assert_eq!(failures(&manager, ProviderKind::Mailsac).await, 0);
    }

    #[tokio::test]
    async fn caller_errors_are_not_counted_as_provider_failures() {
        let manager = manager(
            Arc::new(FakeBackend::new(ProviderKind::MailTm)),
            Arc::new(FakeBackend::new(ProviderKind::Mailsac)),
        );

        let err = manager
            .get_message("box@x.test", ProviderKind::MailTm, "missing")
            .await
            .expect_err("not found");
        assert!(err.is_not_found());
        assert_eq!(failures(&manager, ProviderKind::MailTm).await, 0);

        manager
            .delete_message("box@x.test", ProviderKind::MailTm, "m1")
            .await
            .expect_err("upstream 500");
        assert_eq!(failures(&manager, ProviderKind::MailTm).await, 1);
    }

    #[tokio::test]
    async fn account_passthroughs_route_by_provider() {
        let manager = manager(
            Arc::new(FakeBackend::new(ProviderKind::MailTm)),
            Arc::new(FakeBackend::new(ProviderKind::Mailsac)),
        );

        let account = Account::new("restored@mailsac.com", ProviderKind::Mailsac);
        manager.set_account(account.clone()).await.expect("installed");

        assert!(manager
            .get_account("restored@mailsac.com", ProviderKind::MailTm)
            .await
            .is_none());
        assert_eq!(
            manager.find_account("restored@mailsac.com").await,
            Some(account.clone())
        );
        assert_eq!(manager.remove_account("restored@mailsac.com").await, Some(account));
        assert!(manager.find_account("restored@mailsac.com").await.is_none());
    }
}
