use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use threadline_cache::{CacheConfig, IndexerMode};
use threadline_core::{Address, ChainId, SubmissionMode};
use threadline_submit::SubmitterConfig;
use threadline_task::{Backoff, RetryPolicy};

/// Backoff shape selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    None,
    Constant,
    Exponential,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThreadlineConfig {
    pub relay_url: Option<String>,
    pub indexer_url: String,
    pub chain_id: u64,
    pub submission_mode: SubmissionMode,
    pub comments_contract: Address,
    pub signing_domain_name: String,
    pub retries: u32,
    pub backoff: BackoffKind,
    #[serde(with = "humantime_serde")]
    pub backoff_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub confirmation_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub profile_lookup_timeout: Duration,
    pub profile_cache_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub refetch_interval: Duration,
    pub indexer_mode: IndexerMode,
    pub target_uri: Option<String>,
    pub page_limit: usize,
    pub reply_page_limit: usize,
    pub max_depth: usize,
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
}

impl ThreadlineConfig {
    /// Loads defaults, then the optional file, then `THREADLINE_*` variables.
    ///
    /// A path ending in `.env` is loaded into the process environment instead
    /// of being read as a config file.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("relay_url", None::<String>)?
            .set_default("indexer_url", "http://127.0.0.1:42069")?
            .set_default("chain_id", 8453)?
            .set_default("submission_mode", "direct")?
            .set_default(
                "comments_contract",
                "0x0000000000000000000000000000000000000000",
            )?
            .set_default("signing_domain_name", "Comments")?
            .set_default("retries", 3)?
            .set_default("backoff", "exponential")?
            .set_default("backoff_delay", "500ms")?
            .set_default("confirmation_timeout", "60s")?
            .set_default("profile_lookup_timeout", "750ms")?
            .set_default("profile_cache_capacity", 256)?
            .set_default("refetch_interval", "5s")?
            .set_default("indexer_mode", "nested")?
            .set_default("target_uri", None::<String>)?
            .set_default("page_limit", 20)?
            .set_default("reply_page_limit", 5)?
            .set_default("max_depth", 16)?
            .set_default("http_timeout", "10s")?;

        if let Some(path) = config_path {
            if path.extension().and_then(|ext| ext.to_str()) == Some("env") {
                match dotenvy::from_path(&path) {
                    Ok(_) => tracing::info!("loaded environment from {}", path.display()),
                    Err(err) => {
                        tracing::warn!("failed to load .env from {}: {}", path.display(), err)
                    }
                }
            } else {
                builder = builder.add_source(File::from(path));
            }
        }

        builder = builder.add_source(Environment::with_prefix("THREADLINE").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    pub fn chain(&self) -> ChainId {
        ChainId(self.chain_id)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let delay_ms = u64::try_from(self.backoff_delay.as_millis()).unwrap_or(u64::MAX);
        let backoff = match self.backoff {
            BackoffKind::None => Backoff::None,
            BackoffKind::Constant => Backoff::Constant { delay_ms },
            BackoffKind::Exponential => Backoff::Exponential { delay_ms },
        };
        RetryPolicy {
            retries: self.retries,
            backoff,
        }
    }

    pub fn submitter_config(&self) -> SubmitterConfig {
        SubmitterConfig {
            retry_policy: self.retry_policy(),
            confirmation_timeout: self.confirmation_timeout,
            profile_lookup_timeout: self.profile_lookup_timeout,
            comments_contract: self.comments_contract,
            signing_domain_name: self.signing_domain_name.clone(),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            indexer_mode: self.indexer_mode,
            reply_page_limit: self.reply_page_limit,
            max_depth: self.max_depth,
            target_uri: self.target_uri.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::path::PathBuf;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_guard() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_env<F>(vars: &[(&str, &str)], test: F)
    where
        F: FnOnce(),
    {
        let _guard = env_guard();
        let mut old = Vec::new();
        for (k, v) in vars {
            old.push((k.to_string(), env::var(k).ok()));
            env::set_var(k, v);
        }

        test();

        for (k, maybe_old) in old {
            match maybe_old {
                Some(val) => env::set_var(k, val),
                None => env::remove_var(k),
            }
        }
    }

    #[test]
    fn defaults_are_applied() {
        let _guard = env_guard();
        let cfg = ThreadlineConfig::load(None).expect("failed to build config");

        assert!(cfg.relay_url.is_none());
        assert_eq!(cfg.chain(), ChainId(8453));
        assert_eq!(cfg.submission_mode, SubmissionMode::Direct);
        assert!(cfg.comments_contract.is_zero());
        assert_eq!(cfg.confirmation_timeout, Duration::from_secs(60));
        assert_eq!(cfg.profile_lookup_timeout, Duration::from_millis(750));
        assert_eq!(cfg.refetch_interval, Duration::from_secs(5));
        assert_eq!(cfg.indexer_mode, IndexerMode::Nested);
        assert_eq!(cfg.page_limit, 20);
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn env_vars_override_defaults() {
        with_env(
            &[
                ("THREADLINE_SUBMISSION_MODE", "relayed-unapproved"),
                ("THREADLINE_RELAY_URL", "https://relay.example"),
                ("THREADLINE_RETRIES", "0"),
                ("THREADLINE_BACKOFF", "constant"),
                ("THREADLINE_BACKOFF_DELAY", "250ms"),
                ("THREADLINE_INDEXER_MODE", "flat"),
            ],
            || {
                let cfg = ThreadlineConfig::load(None).expect("failed to build config");
                assert_eq!(cfg.submission_mode, SubmissionMode::RelayedUnapproved);
                assert_eq!(cfg.relay_url.as_deref(), Some("https://relay.example"));
                assert_eq!(
                    cfg.retry_policy(),
                    RetryPolicy::constant(0, Duration::from_millis(250))
                );
                assert_eq!(cfg.cache_config().indexer_mode, IndexerMode::Flat);
            },
        );
    }

    #[test]
    fn file_values_feed_component_configs() {
        use std::io::Write;

        let mut tmp = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            tmp,
            r#"
chain_id = 10
comments_contract = "0x{contract}"
confirmation_timeout = "2m"
reply_page_limit = 3
target_uri = "https://example.com/article"
"#,
            contract = "ab".repeat(20)
        )
        .expect("write to temp file");

        let cfg = ThreadlineConfig::load(Some(PathBuf::from(tmp.path()))).expect("load config");
        assert_eq!(cfg.chain(), ChainId(10));

        let submitter = cfg.submitter_config();
        assert_eq!(submitter.comments_contract, Address([0xab; 20]));
        assert_eq!(submitter.confirmation_timeout, Duration::from_secs(120));

        let cache = cfg.cache_config();
        assert_eq!(cache.reply_page_limit, 3);
        assert_eq!(cache.target_uri.as_deref(), Some("https://example.com/article"));
    }

    #[test]
    fn dotenv_files_load_into_environment() {
        use std::io::Write;

        let mut tmp = tempfile::Builder::new()
            .suffix(".env")
            .tempfile()
            .expect("temp file");
        writeln!(tmp, "THREADLINE_PROFILE_CACHE_CAPACITY=7").expect("write env file");

        let _guard = env_guard();
        let cfg = ThreadlineConfig::load(Some(PathBuf::from(tmp.path()))).expect("load config");
        assert_eq!(cfg.profile_cache_capacity, 7);
        env::remove_var("THREADLINE_PROFILE_CACHE_CAPACITY");
    }
}
