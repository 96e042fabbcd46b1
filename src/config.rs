use crate::cache::CacheConfig;
use crate::executor::Auth;
use crate::freesound::DEFAULT_BASE_URL;
use crate::navigator::MAX_NAVIGATION_DISTANCE;
use crate::rate_limit::RateLimitConfig;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub auth: Option<Auth>,
    pub cache_dir: PathBuf,
    pub bind: String,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub max_navigation_distance: u32,
    pub page_size: u32,
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth: None,
            cache_dir: PathBuf::from("./.soundscout"),
            bind: "0.0.0.0:5000".to_string(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            max_navigation_distance: MAX_NAVIGATION_DISTANCE,
            page_size: DEFAULT_PAGE_SIZE,
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let auth = match (var("FREESOUND_OAUTH_TOKEN"), var("FREESOUND_API_TOKEN")) {
            (Some(token), _) => Some(Auth::Bearer(token)),
            (None, Some(token)) => Some(Auth::Token(token)),
            (None, None) => {
                warn!("no FREESOUND_OAUTH_TOKEN or FREESOUND_API_TOKEN set; requests will likely be rejected");
                None
            }
        };

        let secs = |key: &str, default: Duration| {
            Duration::from_secs(parse_or(key, var(key), default.as_secs()))
        };

        Self {
            base_url: var("FREESOUND_BASE_URL").unwrap_or(defaults.base_url),
            auth,
            cache_dir: var("SOUNDSCOUT_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            bind: var("SOUNDSCOUT_BIND").unwrap_or(defaults.bind),
            rate_limit: RateLimitConfig {
                requests_per_minute: parse_or(
                    "REQUESTS_PER_MINUTE",
                    var("REQUESTS_PER_MINUTE"),
                    defaults.rate_limit.requests_per_minute,
                ),
                requests_per_day: parse_or(
                    "REQUESTS_PER_DAY",
                    var("REQUESTS_PER_DAY"),
                    defaults.rate_limit.requests_per_day,
                ),
            },
            cache: CacheConfig {
                ttl: secs("CACHE_TTL_SECS", defaults.cache.ttl),
                sweep_interval: secs("CACHE_SWEEP_SECS", defaults.cache.sweep_interval),
                ..defaults.cache
            },
            max_navigation_distance: parse_or(
                "MAX_NAVIGATION_DISTANCE",
                var("MAX_NAVIGATION_DISTANCE"),
                defaults.max_navigation_distance,
            ),
            page_size: parse_or("PAGE_SIZE", var("PAGE_SIZE"), defaults.page_size),
            http_timeout: secs("HTTP_TIMEOUT_SECS", defaults.http_timeout),
        }
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + Copy + Display + PartialOrd + Default,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => v,
        Ok(_) => {
            warn!(key, value = %raw, %default, "value must be positive, using default");
            default
        }
        Err(e) => {
            warn!(key, value = %raw, %default, error = %e, "invalid number, using default");
            default
        }
    }
}
