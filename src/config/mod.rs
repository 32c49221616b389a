use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::gateway::PromptBook;
use crate::models::{QuotaTable, TierLimits};
use crate::providers::Provider;

const DEFAULT_FALLBACK_REPLY: &str =
    "All AI providers are busy right now. Please try again in a minute.";

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub admin_uids: Vec<String>,
    pub admin_token: Option<String>,
    pub maintenance_mode: bool,
    pub rate_limit_window_secs: u64,
    pub quotas: QuotaTable,
    pub upstream_timeout_ms: u64,
    pub provider_keys: HashMap<Provider, String>,
    pub provider_base_urls: HashMap<Provider, String>,
    pub site_url: String,
    pub site_name: String,
    pub model_catalog_path: Option<String>,
    pub refund_on_failure: bool,
    pub fallback_reply: String,
    pub prompts: PromptBook,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_source(|name| env::var(name).ok())
    }

    /// 从任意键值来源读取配置，空字符串视为未设置
    pub fn from_source<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let jwt_expiration_hours = parse_hours(&get, "JWT_EXPIRATION", 720)?;

        let upstream_timeout_ms: u64 = parse_or(&get, "UPSTREAM_TIMEOUT_MS", 20_000)?;
        if !(1_000..=120_000).contains(&upstream_timeout_ms) {
            return Err(ConfigError::Invalid {
                name: "UPSTREAM_TIMEOUT_MS",
                reason: "must be between 1000 and 120000".to_string(),
            });
        }

        let rate_limit_window_secs: u64 = parse_or(&get, "RATE_LIMIT_WINDOW", 3600)?;
        if rate_limit_window_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "RATE_LIMIT_WINDOW",
                reason: "must be positive".to_string(),
            });
        }

        let defaults = QuotaTable::default();
        let quotas = QuotaTable {
            free: limits_from(&get, "FREE", defaults.free)?,
            pro: limits_from(&get, "PRO", defaults.pro)?,
            ultra: limits_from(&get, "ULTRA", defaults.ultra)?,
        };

        let mut provider_keys = HashMap::new();
        let mut provider_base_urls = HashMap::new();
        for provider in Provider::ALL {
            let prefix = provider.env_prefix();
            if let Some(key) = get(&format!("{}_API_KEY", prefix)) {
                provider_keys.insert(provider, key);
            }
            if let Some(url) = get(&format!("{}_BASE_URL", prefix)) {
                provider_base_urls.insert(provider, url);
            }
        }

        let mut prompts = PromptBook::default();
        if let Some(chat) = get("SYSTEM_PROMPT_CHAT") {
            prompts.chat = chat;
        }
        if let Some(code) = get("SYSTEM_PROMPT_CODE") {
            prompts.code = code;
        }
        if let Some(premium) = get("SYSTEM_PROMPT_PRO") {
            prompts.premium = premium;
        }

        Ok(Config {
            redis_url: get("REDIS_URL"),
            server_host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parse_or(&get, "SERVER_PORT", 3000)?,
            jwt_secret,
            jwt_expiration_secs: jwt_expiration_hours * 3600,
            admin_uids: get("ADMIN_UIDS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            admin_token: get("ADMIN_TOKEN"),
            maintenance_mode: parse_flag(&get, "MAINTENANCE_MODE")?,
            rate_limit_window_secs,
            quotas,
            upstream_timeout_ms,
            provider_keys,
            provider_base_urls,
            site_url: get("SITE_URL").unwrap_or_else(|| "http://localhost:3000".to_string()),
            site_name: get("SITE_NAME").unwrap_or_else(|| "Flux AI".to_string()),
            model_catalog_path: get("MODEL_CATALOG_PATH"),
            refund_on_failure: parse_flag(&get, "REFUND_ON_FAILURE")?,
            fallback_reply: get("FALLBACK_REPLY")
                .unwrap_or_else(|| DEFAULT_FALLBACK_REPLY.to_string()),
            prompts,
        })
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::from_source(|name| match name {
            "JWT_SECRET" => Some("test-secret".to_string()),
            "ADMIN_UIDS" => Some("root-admin".to_string()),
            "ADMIN_TOKEN" => Some("admin-token".to_string()),
            "OPENROUTER_API_KEY" => Some("or-key".to_string()),
            _ => None,
        })
        .expect("test config")
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: format!("{:?}: {}", raw, e),
        }),
        None => Ok(default),
    }
}

/// 小时数，允许 `72h` 写法
fn parse_hours<G>(get: &G, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let unsuffixed = |n: &str| get(n).map(|raw| raw.strip_suffix('h').unwrap_or(&raw).trim().to_string());
    parse_or(&unsuffixed, name, default)
}

fn parse_flag<G>(get: &G, name: &'static str) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name).map(|v| v.to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                reason: format!("expected a boolean, got {}", v),
            }),
        },
    }
}

fn limits_from<G>(get: &G, tier: &str, default: TierLimits) -> Result<TierLimits, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let read = |suffix: &str, fallback: Option<u32>| -> Result<Option<u32>, ConfigError> {
        let name = format!("QUOTA_{}_{}", tier, suffix);
        match get(&name) {
            Some(raw) => raw.parse().map(Some).map_err(|e: std::num::ParseIntError| {
                ConfigError::Invalid {
                    name: "QUOTA_*",
                    reason: format!("{}: {}", name, e),
                }
            }),
            None => Ok(fallback),
        }
    };
    Ok(TierLimits {
        messages: read("MESSAGES", default.messages)?,
        images: read("IMAGES", default.images)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = Config::from_source(source(&[("JWT_SECRET", "x")])).unwrap();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.rate_limit_window(), Duration::from_secs(3600));
        assert_eq!(config.upstream_timeout(), Duration::from_secs(20));
        assert_eq!(config.quotas, QuotaTable::default());
        assert!(config.provider_keys.is_empty());
        assert!(config.redis_url.is_none());
        assert!(!config.maintenance_mode);
    }

    #[test]
    fn missing_secret_is_an_error() {
        assert!(matches!(
            Config::from_source(source(&[])),
            Err(ConfigError::Missing("JWT_SECRET"))
        ));
    }

    #[test]
    fn reads_keys_admins_and_quotas() {
        let config = Config::from_source(source(&[
            ("JWT_SECRET", "x"),
            ("GEMINI_API_KEY", "g-key"),
            ("HF_BASE_URL", "http://hf.local"),
            ("ADMIN_UIDS", " boss , ops,"),
            ("QUOTA_FREE_MESSAGES", "3"),
            ("MAINTENANCE_MODE", "TRUE"),
            ("JWT_EXPIRATION", "2h"),
        ]))
        .unwrap();

        assert_eq!(config.provider_keys.get(&Provider::Gemini).unwrap(), "g-key");
        assert_eq!(
            config.provider_base_urls.get(&Provider::HuggingFace).unwrap(),
            "http://hf.local"
        );
        assert_eq!(config.admin_uids, vec!["boss".to_string(), "ops".to_string()]);
        assert_eq!(config.quotas.free.messages, Some(3));
        assert_eq!(config.quotas.free.images, Some(3));
        assert!(config.maintenance_mode);
        assert_eq!(config.jwt_expiration_secs, 7200);
    }

    #[test]
    fn unit_suffixes_only_allowed_on_token_lifetime() {
        let config =
            Config::from_source(source(&[("JWT_SECRET", "x"), ("JWT_EXPIRATION", "72h")])).unwrap();
        assert_eq!(config.jwt_expiration_secs, 72 * 3600);

        assert!(matches!(
            Config::from_source(source(&[("JWT_SECRET", "x"), ("RATE_LIMIT_WINDOW", "2h")])),
            Err(ConfigError::Invalid { name: "RATE_LIMIT_WINDOW", .. })
        ));
        assert!(matches!(
            Config::from_source(source(&[("JWT_SECRET", "x"), ("SERVER_PORT", "8080h")])),
            Err(ConfigError::Invalid { name: "SERVER_PORT", .. })
        ));
        assert!(matches!(
            Config::from_source(source(&[("JWT_SECRET", "x"), ("UPSTREAM_TIMEOUT_MS", "5000h")])),
            Err(ConfigError::Invalid { name: "UPSTREAM_TIMEOUT_MS", .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_timeout_and_bad_flags() {
        assert!(matches!(
            Config::from_source(source(&[("JWT_SECRET", "x"), ("UPSTREAM_TIMEOUT_MS", "50")])),
            Err(ConfigError::Invalid { name: "UPSTREAM_TIMEOUT_MS", .. })
        ));
        assert!(matches!(
            Config::from_source(source(&[("JWT_SECRET", "x"), ("REFUND_ON_FAILURE", "maybe")])),
            Err(ConfigError::Invalid { name: "REFUND_ON_FAILURE", .. })
        ));
    }
}
