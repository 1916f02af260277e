use serde::{Deserialize, Serialize};
use tempbox_core::ProviderKind;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub version: u32,
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub brand: BrandConfig,
    pub rate_limit: RateLimitConfig,
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub default_provider: ProviderKind,
    /// Failures at which a provider stops being picked for new accounts.
    pub failure_threshold: u32,
    pub rotation_window_secs: u64,
    pub mailtm: MailTmConfig,
    pub mailsac: MailsacConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MailTmConfig {
    pub enabled: bool,
    pub api_base: Url,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MailsacConfig {
    pub enabled: bool,
    pub api_base: Url,
    pub domain: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for MailsacConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailsacConfig")
            .field("enabled", &self.enabled)
            .field("api_base", &self.api_base.as_str())
            .field("domain", &self.domain)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    Redis,
    Memory,
    Disabled,
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// `Redis` needs `redis_url`; without one the store runs disabled.
    pub backend: CacheBackendKind,
    pub redis_url: Option<String>,
}

impl std::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("backend", &self.backend)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrandConfig {
    pub clearbit_enabled: bool,
    pub lookup_timeout_ms: u64,
    pub favicon_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub create_max: u32,
    pub create_window_secs: u64,
    pub read_max: u32,
    pub read_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub empty_threshold: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            server: ServerConfig::default(),
            providers: ProvidersConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            brand: BrandConfig::default(),
            rate_limit: RateLimitConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3001".to_string(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default_provider: ProviderKind::MailTm,
            failure_threshold: 3,
            rotation_window_secs: 300,
            mailtm: MailTmConfig::default(),
            mailsac: MailsacConfig::default(),
        }
    }
}

impl Default for MailTmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: Url::parse("https://api.mail.tm").expect("static url"),
            request_timeout_secs: 10,
        }
    }
}

impl Default for MailsacConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: Url::parse("https://mailsac.com/api").expect("static url"),
            domain: "mailsac.com".to_string(),
            api_key: None,
            request_timeout_secs: 10,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Redis,
            redis_url: None,
        }
    }
}

impl Default for BrandConfig {
    fn default() -> Self {
        Self {
            clearbit_enabled: true,
            lookup_timeout_ms: 2000,
            favicon_size: 128,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            create_max: 5,
            create_window_secs: 300,
            read_max: 60,
            read_window_secs: 60,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 5000,
            max_delay_ms: 60_000,
            backoff_multiplier: 1.5,
            empty_threshold: 3,
        }
    }
}
