//! Client configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use dynastack_auth::Credentials;
use dynastack_http::{Endpoint, PipelineConfig, PoolConfig};

use crate::error::{Error, Result};

/// Batch splitting and resubmission.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Write requests per `BatchWriteItem` exchange.
    pub write_size: usize,
    /// Keys per `BatchGetItem` exchange.
    pub get_size: usize,
    /// Follow-up requests allowed per batch; `None` resubmits until the
    /// service reports nothing unprocessed.
    pub max_resubmissions: Option<u32>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            write_size: 25,
            get_size: 100,
            max_resubmissions: None,
        }
    }
}

/// Everything needed to build a [`DynamoClient`](crate::DynamoClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service endpoint.
    pub endpoint: Endpoint,
    /// Region used in the signing scope.
    pub region: String,
    /// Signing credentials; requests go unsigned without them.
    pub credentials: Option<Credentials>,
    /// Retry cap per request; `None` is unlimited.
    pub max_retries: Option<u32>,
    /// Bound on opening a connection.
    pub connect_timeout: Duration,
    /// Pool tuning.
    pub pool: PoolConfig,
    /// Pipeline tuning.
    pub pipeline: PipelineConfig,
    /// Batch tuning.
    pub batch: BatchConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_endpoint(Endpoint::aws("us-east-1"))
    }
}

impl ClientConfig {
    /// Defaults for `endpoint`.
    #[must_use]
    pub fn for_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            region: "us-east-1".to_owned(),
            credentials: None,
            max_retries: None,
            connect_timeout: Duration::from_secs(50),
            pool: PoolConfig::default(),
            pipeline: PipelineConfig::default(),
            batch: BatchConfig::default(),
        }
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any key lookup.
    ///
    /// Unset keys keep their defaults; set keys that fail to parse are an
    /// error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let region = lookup("AWS_REGION")
            .or_else(|| lookup("DEFAULT_REGION"))
            .unwrap_or_else(|| "us-east-1".to_owned());
        let endpoint = match lookup("DYNASTACK_ENDPOINT") {
            Some(url) => url
                .parse::<Endpoint>()
                .map_err(|e| Error::Config(e.to_string()))?,
            None => Endpoint::aws(&region),
        };

        let mut config = Self::for_endpoint(endpoint);
        config.region = region;
        config.credentials = match (
            lookup("AWS_ACCESS_KEY_ID"),
            lookup("AWS_SECRET_ACCESS_KEY"),
        ) {
            (Some(key), Some(secret)) => {
                let credentials = Credentials::new(key, secret);
                Some(match lookup("AWS_SESSION_TOKEN") {
                    Some(token) => credentials.with_session_token(token),
                    None => credentials,
                })
            }
            (None, None) => None,
            _ => {
                return Err(Error::Config(
                    "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together".to_owned(),
                ));
            }
        };

        if let Some(max) = parsed::<i64>(&lookup, "DYNASTACK_MAX_RETRIES")? {
            config.max_retries = match max {
                -1 => None,
                n => Some(u32::try_from(n).map_err(|_| {
                    Error::Config(format!("DYNASTACK_MAX_RETRIES must be -1 or >= 0, got {n}"))
                })?),
            };
        }

        let pool = &mut config.pool;
        set(&mut pool.max_active, parsed(&lookup, "DYNASTACK_POOL_MAX_ACTIVE")?);
        set(&mut pool.max_idle, parsed(&lookup, "DYNASTACK_POOL_MAX_IDLE")?);
        set(
            &mut pool.eviction_interval,
            millis(&lookup, "DYNASTACK_POOL_EVICTION_INTERVAL_MS")?,
        );
        set(&mut pool.min_idle_time, millis(&lookup, "DYNASTACK_POOL_MIN_IDLE_MS")?);
        set(
            &mut pool.tests_per_eviction,
            parsed(&lookup, "DYNASTACK_POOL_TESTS_PER_EVICTION")?,
        );
        set(
            &mut config.connect_timeout,
            millis(&lookup, "DYNASTACK_CONNECT_TIMEOUT_MS")?,
        );
        set(
            &mut config.pipeline.exchange_timeout,
            millis(&lookup, "DYNASTACK_EXCHANGE_TIMEOUT_MS")?,
        );
        set(
            &mut config.batch.write_size,
            parsed(&lookup, "DYNASTACK_BATCH_WRITE_SIZE")?,
        );
        set(&mut config.batch.get_size, parsed(&lookup, "DYNASTACK_BATCH_GET_SIZE")?);

        config.validate()?;
        Ok(config)
    }

    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_active", self.pool.max_active),
            ("eviction_interval", duration_ms(self.pool.eviction_interval)),
            ("write_size", self.batch.write_size),
            ("get_size", self.batch.get_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    Ok(parsed::<u64>(lookup, key)?.map(Duration::from_millis))
}

fn duration_ms(duration: Duration) -> usize {
    usize::try_from(duration.as_millis()).unwrap_or(usize::MAX)
}
