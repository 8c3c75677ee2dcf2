//! Consumer configuration from environment variables

use std::env;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

use super::error::ConfigError;
use super::orchestrator::ConsumerSettings;
use super::source::HttpSourceOptions;
use super::types::SourceDescriptor;

/// Configuration for the consumer binary
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Path to the SQLite database shared by all consumer processes
    pub db_path: String,

    /// Directory holding the `.sql` schema files
    pub schema_dir: String,

    /// Sources to poll, in polling order
    pub sources: Vec<SourceDescriptor>,

    /// Minimum time between fetch attempts for one source (milliseconds)
    pub min_request_interval_ms: u64,

    /// Lock time-to-live (seconds)
    pub lock_ttl_secs: u64,

    /// Pause between rounds (milliseconds)
    pub round_delay_ms: u64,

    /// Per-request HTTP timeout (milliseconds)
    pub fetch_timeout_ms: u64,

    /// `limit` sent with each fetch
    pub fetch_page_size: u32,

    /// Redis server for locks and request times; SQLite tables when unset
    pub redis_url: Option<String>,
}

impl ConsumerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `EVENT_DB_PATH` (default: event_consumer.db)
    /// - `EVENT_SCHEMA_DIR` (default: sql)
    /// - `EVENT_SOURCES_FILE` - JSON file with `[{"name": .., "url": ..}]`
    /// - `EVENT_SOURCES` - the same JSON inline (used if no file is given)
    /// - `MIN_REQUEST_INTERVAL_MS` (default: 200)
    /// - `LOCK_TTL_SECS` (default: 30)
    /// - `ROUND_DELAY_MS` (default: 1000)
    /// - `FETCH_TIMEOUT_MS` (default: 5000)
    /// - `FETCH_PAGE_SIZE` (default: 1000)
    /// - `REDIS_URL` - e.g. `redis://127.0.0.1:6379`; enables the Redis lock
    ///   and request-time stores so consumers on different hosts coordinate
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sources = match (lookup("EVENT_SOURCES_FILE"), lookup("EVENT_SOURCES")) {
            (Some(path), _) => {
                let json = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                parse_sources(&json)?
            }
            (None, Some(json)) => parse_sources(&json)?,
            (None, None) => Vec::new(),
        };

        let config = Self {
            db_path: lookup("EVENT_DB_PATH").unwrap_or_else(|| "event_consumer.db".to_string()),
            schema_dir: lookup("EVENT_SCHEMA_DIR").unwrap_or_else(|| "sql".to_string()),
            sources,
            min_request_interval_ms: parse_var(&lookup, "MIN_REQUEST_INTERVAL_MS", 200)?,
            lock_ttl_secs: parse_var(&lookup, "LOCK_TTL_SECS", 30)?,
            round_delay_ms: parse_var(&lookup, "ROUND_DELAY_MS", 1_000)?,
            fetch_timeout_ms: parse_var(&lookup, "FETCH_TIMEOUT_MS", 5_000)?,
            fetch_page_size: parse_var(&lookup, "FETCH_PAGE_SIZE", 1_000)?,
            redis_url: lookup("REDIS_URL").filter(|url| !url.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    /// A fetch must time out before the lock it runs under expires, otherwise
    /// another process can claim the same batch mid-fetch
    fn validate(&self) -> Result<(), ConfigError> {
        let ttl_ms = self.lock_ttl_secs.saturating_mul(1_000);
        if self.fetch_timeout_ms >= ttl_ms {
            return Err(ConfigError::InvalidValue(format!(
                "FETCH_TIMEOUT_MS ({}) must be lower than LOCK_TTL_SECS ({}s)",
                self.fetch_timeout_ms, self.lock_ttl_secs
            )));
        }
        Ok(())
    }

    pub fn settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            min_request_interval: Duration::from_millis(self.min_request_interval_ms),
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
            round_delay: Duration::from_millis(self.round_delay_ms),
        }
    }

    pub fn http_options(&self) -> HttpSourceOptions {
        HttpSourceOptions {
            page_size: self.fetch_page_size,
            timeout: Duration::from_millis(self.fetch_timeout_ms),
        }
    }
}

fn parse_sources(json: &str) -> Result<Vec<SourceDescriptor>, ConfigError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(json)?)
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{} must be a non-negative integer, got {:?}", key, raw))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ConsumerConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.db_path, "event_consumer.db");
        assert_eq!(config.schema_dir, "sql");
        assert!(config.sources.is_empty());
        assert_eq!(config.min_request_interval_ms, 200);
        assert_eq!(config.lock_ttl_secs, 30);
        assert_eq!(config.round_delay_ms, 1_000);
        assert_eq!(config.fetch_timeout_ms, 5_000);
        assert_eq!(config.fetch_page_size, 1_000);
        assert!(config.redis_url.is_none());

        let settings = config.settings();
        assert_eq!(settings.min_request_interval, Duration::from_millis(200));
        assert_eq!(settings.lock_ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_custom_config() {
        let config = ConsumerConfig::from_lookup(lookup_from(&[
            ("EVENT_DB_PATH", "/tmp/test.db"),
            (
                "EVENT_SOURCES",
                r#"[{"name": "A", "url": "http://localhost:3001/events"},
                    {"name": "B", "url": "http://localhost:3002/events"}]"#,
            ),
            ("MIN_REQUEST_INTERVAL_MS", "500"),
            ("LOCK_TTL_SECS", "10"),
            ("FETCH_PAGE_SIZE", "50"),
            ("FETCH_TIMEOUT_MS", "2000"),
            ("REDIS_URL", "redis://127.0.0.1:6379"),
        ]))
        .unwrap();

        assert_eq!(config.db_path, "/tmp/test.db");
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[1].name, "B");
        assert_eq!(config.min_request_interval_ms, 500);
        assert_eq!(config.lock_ttl_secs, 10);
        assert_eq!(config.http_options().page_size, 50);
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
    }

    #[test]
    fn test_fetch_timeout_must_be_below_lock_ttl() {
        let err = ConsumerConfig::from_lookup(lookup_from(&[
            ("LOCK_TTL_SECS", "5"),
            ("FETCH_TIMEOUT_MS", "5000"),
        ]))
        .unwrap_err();
        match err {
            ConfigError::InvalidValue(msg) => assert!(msg.contains("FETCH_TIMEOUT_MS")),
            other => panic!("unexpected error: {:?}", other),
        }

        let config = ConsumerConfig::from_lookup(lookup_from(&[
            ("LOCK_TTL_SECS", "5"),
            ("FETCH_TIMEOUT_MS", "4999"),
        ]))
        .unwrap();
        assert_eq!(config.fetch_timeout_ms, 4_999);
    }

    #[test]
    fn test_blank_redis_url_means_sqlite() {
        let config = ConsumerConfig::from_lookup(lookup_from(&[("REDIS_URL", "  ")])).unwrap();
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_sources_file_takes_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"name": "from-file", "url": "http://x/events"}}]"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = ConsumerConfig::from_lookup(lookup_from(&[
            ("EVENT_SOURCES_FILE", path.as_str()),
            ("EVENT_SOURCES", r#"[{"name": "inline", "url": "http://y/events"}]"#),
        ]))
        .unwrap();

        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].name, "from-file");
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let err = ConsumerConfig::from_lookup(lookup_from(&[("LOCK_TTL_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));

        let err = ConsumerConfig::from_lookup(lookup_from(&[("EVENT_SOURCES", "{not json")])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = ConsumerConfig::from_lookup(lookup_from(&[(
            "EVENT_SOURCES_FILE",
            "/definitely/not/here.json",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
