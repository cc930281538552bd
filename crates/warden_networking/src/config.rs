//! # Transport Configuration
//!
//! Loaded once at startup, from TOML or built in code. Every key is optional;
//! missing keys take the defaults below.
//!
//! ```toml
//! read_chunk_size = 4096
//! max_frame_len = 65536
//! auth_timeout_secs = 120
//! connect_timeout_ms = 5000
//! framing_policy = "reassemble"
//! disconnect_on_partial_write = true
//! max_accepts_per_tick = 16
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::protocol::FramingPolicy;
use crate::{DEFAULT_AUTH_TIMEOUT_SECS, DEFAULT_READ_CHUNK_SIZE};

/// Transport configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Bytes read from a connection per poll.
    pub read_chunk_size: usize,
    /// Largest payload length a frame header may declare.
    pub max_frame_len: usize,
    /// Authentication timeout handed to the engine on admit.
    pub auth_timeout_secs: u64,
    /// Timeout for each address tried by an outgoing connect.
    pub connect_timeout_ms: u64,
    /// What to do with a frame that is not fully buffered yet.
    pub framing_policy: FramingPolicy,
    /// Close the connection when a send is short or fails.
    pub disconnect_on_partial_write: bool,
    /// Sockets accepted per listener poll.
    pub max_accepts_per_tick: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_frame_len: 64 * 1024,
            auth_timeout_secs: DEFAULT_AUTH_TIMEOUT_SECS,
            connect_timeout_ms: 5_000,
            framing_policy: FramingPolicy::Reassemble,
            disconnect_on_partial_write: true,
            max_accepts_per_tick: 16,
        }
    }
}

impl TransportConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.read_chunk_size == 0 {
            return Err(ConfigError::Invalid("read_chunk_size must be non-zero".into()));
        }
        if self.max_frame_len == 0 {
            return Err(ConfigError::Invalid("max_frame_len must be non-zero".into()));
        }
        if u32::try_from(self.max_frame_len).is_err() {
            return Err(ConfigError::Invalid(format!(
                "max_frame_len {} does not fit the 32-bit length field",
                self.max_frame_len
            )));
        }
        if self.auth_timeout_secs == 0 {
            return Err(ConfigError::Invalid("auth_timeout_secs must be non-zero".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connect_timeout_ms must be non-zero".into()));
        }
        if self.max_accepts_per_tick == 0 {
            return Err(ConfigError::Invalid("max_accepts_per_tick must be non-zero".into()));
        }
        Ok(())
    }

    /// Authentication timeout as a duration.
    #[must_use]
    pub const fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    /// Connect timeout as a duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
