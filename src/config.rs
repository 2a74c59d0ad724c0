//! Configuration for the slash-command dispatcher

use crate::{Result, SlashError};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Hard upper bound for the immediate-mode deadline.
///
/// The calling platform gives up on the original request after roughly three
/// seconds, so the connection is never held open longer than this.
pub const MAX_DEADLINE: Duration = Duration::from_millis(2000);

/// Default immediate-mode deadline.
pub const DEFAULT_DEADLINE: Duration = MAX_DEADLINE;

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Prefix for environment variables read by [`SlashConfig::from_env`]
pub const ENV_PREFIX: &str = "SLASH";

/// How replies reach the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Hold the HTTP response open for up to `deadline` waiting for a direct reply
    Immediate {
        /// How long to wait before acknowledging with an empty body
        deadline: Duration,
    },

    /// Acknowledge every request immediately; replies go to `response_url`
    #[default]
    Deferred,
}

impl ResponseMode {
    /// Immediate mode with the default deadline
    pub fn immediate() -> Self {
        Self::Immediate {
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Whether direct HTTP replies are attempted
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate { .. })
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Duration> {
        match self {
            Self::Immediate { deadline } => Some(*deadline),
            Self::Deferred => None,
        }
    }
}

/// Process-wide dispatcher options. Read-only once built.
#[derive(Debug, Clone)]
pub struct SlashConfig {
    /// Shared signing secret. `None` disables signature verification.
    pub signing_secret: Option<String>,

    /// Reply mode
    pub response_mode: ResponseMode,

    /// Address to bind
    pub host: IpAddr,

    /// Port to listen on (0 picks a free port)
    pub port: u16,

    /// Reject signatures whose timestamp is further than this from now.
    /// `None` includes the timestamp in the basestring only.
    pub timestamp_tolerance: Option<Duration>,

    /// Maximum inbound body size in bytes
    pub max_body_size: usize,

    /// Timeout for response_url deliveries
    pub outbound_timeout: Duration,

    /// User-Agent for response_url deliveries
    pub user_agent: String,
}

impl Default for SlashConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            response_mode: ResponseMode::Deferred,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            timestamp_tolerance: None,
            max_body_size: 64 * 1024,
            outbound_timeout: Duration::from_secs(10),
            user_agent: format!("slashgate/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl SlashConfig {
    /// Create a builder
    pub fn builder() -> SlashConfigBuilder {
        SlashConfigBuilder::new()
    }

    /// Socket address to bind
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Secret to verify with, treating an empty string as unset
    pub fn active_secret(&self) -> Option<&str> {
        self.signing_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Check the deadline cap and size limits
    pub fn validate(&self) -> Result<()> {
        if let ResponseMode::Immediate { deadline } = self.response_mode {
            if deadline > MAX_DEADLINE {
                return Err(SlashError::Config(format!(
                    "Cannot set a deadline greater than {} ms (got {} ms)",
                    MAX_DEADLINE.as_millis(),
                    deadline.as_millis()
                )));
            }
            if deadline.is_zero() {
                return Err(SlashError::Config(
                    "Immediate-mode deadline must be greater than zero".to_string(),
                ));
            }
        }

        if self.max_body_size == 0 {
            return Err(SlashError::Config(
                "max_body_size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Load from the process environment, reading `.env` first if present.
    ///
    /// Recognised variables: `SLASH_SIGNING_SECRET`, `SLASH_RESPONSE_MODE`,
    /// `SLASH_DEADLINE_MS`, `SLASH_HOST`, `SLASH_PORT`,
    /// `SLASH_TIMESTAMP_TOLERANCE_SECS`.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is normal
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    /// Load from explicit key/value pairs using the `SLASH_` naming.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let prefix = format!("{}_", ENV_PREFIX);
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter_map(|(k, v)| {
                let key: String = k.into();
                key.strip_prefix(&prefix)
                    .map(|rest| (rest.to_lowercase(), v.into()))
            })
            .collect();

        let mut builder = SlashConfig::builder();

        if let Some(secret) = vars.get("signing_secret") {
            builder = builder.signing_secret(secret.clone());
        }

        let deadline = vars
            .get("deadline_ms")
            .map(|ms| {
                ms.trim().parse::<u64>().map_err(|_| {
                    SlashError::Config(format!("SLASH_DEADLINE_MS is not an integer: {}", ms))
                })
            })
            .transpose()?
            .map(Duration::from_millis);

        match vars.get("response_mode").map(|m| m.trim().to_lowercase()) {
            Some(mode) if mode == "immediate" => {
                builder = builder.immediate(deadline.unwrap_or(DEFAULT_DEADLINE));
            }
            Some(mode) if mode == "deferred" => {
                builder = builder.deferred();
            }
            Some(other) => {
                return Err(SlashError::Config(format!(
                    "SLASH_RESPONSE_MODE must be 'immediate' or 'deferred', got '{}'",
                    other
                )));
            }
            // A deadline on its own implies immediate mode
            None => {
                if let Some(deadline) = deadline {
                    builder = builder.immediate(deadline);
                }
            }
        }

        if let Some(host) = vars.get("host") {
            let host = host
                .trim()
                .parse::<IpAddr>()
                .map_err(|_| SlashError::Config(format!("SLASH_HOST is not an IP: {}", host)))?;
            builder = builder.host(host);
        }

        if let Some(port) = vars.get("port") {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|_| SlashError::Config(format!("SLASH_PORT is not a port: {}", port)))?;
            builder = builder.port(port);
        }

        if let Some(secs) = vars.get("timestamp_tolerance_secs") {
            let secs = secs.trim().parse::<u64>().map_err(|_| {
                SlashError::Config(format!(
                    "SLASH_TIMESTAMP_TOLERANCE_SECS is not an integer: {}",
                    secs
                ))
            })?;
            builder = builder.timestamp_tolerance(Duration::from_secs(secs));
        }

        builder.build()
    }
}

/// Builder for [`SlashConfig`]
#[derive(Debug, Clone, Default)]
pub struct SlashConfigBuilder {
    config: SlashConfig,
}

impl SlashConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: SlashConfig::default(),
        }
    }

    /// Set the signing secret
    pub fn signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.signing_secret = Some(secret.into());
        self
    }

    /// Use immediate mode with the given deadline
    pub fn immediate(mut self, deadline: Duration) -> Self {
        self.config.response_mode = ResponseMode::Immediate { deadline };
        self
    }

    /// Use immediate mode with a deadline in milliseconds
    pub fn immediate_ms(self, millis: u64) -> Self {
        self.immediate(Duration::from_millis(millis))
    }

    /// Use deferred mode
    pub fn deferred(mut self) -> Self {
        self.config.response_mode = ResponseMode::Deferred;
        self
    }

    /// Set the response mode
    pub fn response_mode(mut self, mode: ResponseMode) -> Self {
        self.config.response_mode = mode;
        self
    }

    /// Set the bind address
    pub fn host(mut self, host: IpAddr) -> Self {
        self.config.host = host;
        self
    }

    /// Set the listen port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Reject stale signatures
    pub fn timestamp_tolerance(mut self, tolerance: Duration) -> Self {
        self.config.timestamp_tolerance = Some(tolerance);
        self
    }

    /// Set the maximum inbound body size
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Set the response_url request timeout
    pub fn outbound_timeout(mut self, timeout: Duration) -> Self {
        self.config.outbound_timeout = timeout;
        self
    }

    /// Set the response_url User-Agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<SlashConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
