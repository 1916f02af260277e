use crate::backend::http_client;
use crate::EmailError;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tempbox_config::BrandConfig;
use tempbox_core::BrandInfo;
use tokio::sync::RwLock;

const CLEARBIT_BASE: &str = "https://logo.clearbit.com";
const UNKNOWN_COMPANY: &str = "Unknown";
const LOGO_HINTS: [&str; 4] = ["logo", "brand", "icon", "header"];

const KNOWN_LOGOS: &[(&str, &str)] = &[
    ("discord.com", "https://assets-global.website-files.com/6257adef93867e50d84d30e2/636e0a6a49cf127bf92de1e2_icon_clyde_blurple_RGB.png"),
    ("instagram.com", "https://static.cdninstagram.com/rsrc.php/v3/yt/r/30PrGfR3xhB.png"),
    ("facebook.com", "https://static.xx.fbcdn.net/rsrc.php/y8/r/dF5SId3UHWd.svg"),
    ("github.com", "https://github.githubassets.com/images/modules/logos_page/GitHub-Mark.png"),
    ("twitter.com", "https://abs.twimg.com/responsive-web/client-web/icon-ios.77d25eba.png"),
    ("x.com", "https://abs.twimg.com/responsive-web/client-web/icon-ios.77d25eba.png"),
    ("slack.com", "https://a.slack-edge.com/80588/marketing/img/icons/icon_slack_hash_colored.png"),
    ("notion.so", "https://www.notion.so/images/logo-ios.png"),
    ("paypal.com", "https://www.paypalobjects.com/webstatic/icon/pp258.png"),
    ("netflix.com", "https://assets.nflxext.com/us/ffe/siteui/common/icons/nficon2016.png"),
];

fn domain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"@([A-Za-z0-9.-]+\.[A-Za-z]{2,})").expect("static regex compiles")
    })
}

fn img_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["'][^>]*>"#).expect("static regex compiles")
    })
}

/// Lowercased domain of a sender address.
pub fn extract_domain(address: &str) -> Option<String> {
    domain_regex()
        .captures(address)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// First absolute `<img>` source that looks like a logo.
pub fn logo_from_html(html: &str) -> Option<String> {
    img_regex()
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .find(|src| src.starts_with("http") && LOGO_HINTS.iter().any(|hint| src.contains(hint)))
        .map(str::to_string)
}

/// `mail.github.com` -> `Github`, `shop.amazon.co.uk` -> `Amazon`.
pub fn company_name(domain: &str) -> String {
    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    let label = match labels.as_slice() {
        [] => return UNKNOWN_COMPANY.to_string(),
        [only] => *only,
        [.., name, second, tld] if tld.len() == 2 && second.len() <= 3 => {
            if matches!(*second, "co" | "com" | "org" | "net" | "gov" | "ac" | "edu") {
                *name
            } else {
                *second
            }
        }
        [.., name, _tld] => *name,
    };

    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => UNKNOWN_COMPANY.to_string(),
    }
}

/// Resolves sender logos, cheapest source first, caching per domain.
pub struct BrandResolver {
    http: reqwest::Client,
    clearbit_base: Option<String>,
    favicon_size: u32,
    known: RwLock<HashMap<String, String>>,
    cache: RwLock<HashMap<String, String>>,
}

impl BrandResolver {
    pub fn new(lookup_timeout: Duration, favicon_size: u32) -> Result<Self, EmailError> {
        Ok(Self {
            http: http_client(lookup_timeout)?,
            clearbit_base: Some(CLEARBIT_BASE.to_string()),
            favicon_size,
            known: RwLock::new(
                KNOWN_LOGOS
                    .iter()
                    .map(|(domain, url)| (domain.to_string(), url.to_string()))
                    .collect(),
            ),
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &BrandConfig) -> Result<Self, EmailError> {
        let resolver = Self::new(
            Duration::from_millis(config.lookup_timeout_ms),
            config.favicon_size,
        )?;
        Ok(if config.clearbit_enabled {
            resolver
        } else {
            resolver.without_clearbit()
        })
    }

    pub fn with_clearbit_base(mut self, base: impl Into<String>) -> Self {
        self.clearbit_base = Some(base.into());
        self
    }

    pub fn without_clearbit(mut self) -> Self {
        self.clearbit_base = None;
        self
    }

    pub fn favicon_url(&self, domain: &str) -> String {
        format!(
            "https://www.google.com/s2/favicons?domain={domain}&sz={}",
            self.favicon_size
        )
    }

    async fn clearbit_logo(&self, domain: &str) -> Option<String> {
        let base = self.clearbit_base.as_deref()?;
        let url = format!("{}/{domain}", base.trim_end_matches('/'));
        match self.http.head(&url).send().await {
            Ok(response) if response.status().is_success() => Some(url),
            Ok(_) => None,
            Err(err) => {
                tracing::debug!(domain, "clearbit lookup failed: {err}");
                None
            }
        }
    }

    /// Known logos, then the message HTML, then Clearbit, then the favicon
    /// service. `None` only when the sender has no usable domain.
    pub async fn logo(&self, from: &str, html: Option<&str>) -> Option<String> {
        let domain = extract_domain(from)?;
        if let Some(logo) = self.cache.read().await.get(&domain) {
            return Some(logo.clone());
        }

        let known = self.known.read().await.get(&domain).cloned();
        let logo = match known.or_else(|| html.and_then(logo_from_html)) {
            Some(logo) => logo,
            None => match self.clearbit_logo(&domain).await {
                Some(logo) => logo,
                None => self.favicon_url(&domain),
            },
        };

        self.cache.write().await.insert(domain, logo.clone());
        Some(logo)
    }

    pub async fn brand_info(&self, from: &str, html: Option<&str>) -> BrandInfo {
        let domain = extract_domain(from);
        let logo = self.logo(from, html).await;
        BrandInfo {
            company_name: domain
                .as_deref()
                .map(company_name)
                .unwrap_or_else(|| UNKNOWN_COMPANY.to_string()),
            domain,
            logo,
        }
    }

    pub async fn add_custom_logo(&self, domain: &str, url: &str) {
        let domain = domain.to_ascii_lowercase();
        self.cache.write().await.remove(&domain);
        self.known.write().await.insert(domain, url.to_string());
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
        tracing::debug!("brand cache cleared");
    }

    pub async fn cached_domains(&self) -> usize {
        self.cache.read().await.len()
    }
}
