//! Session configuration, layered from defaults, a TOML file, `DUET_*` environment variables and
//! explicit overrides.

use std::{path::Path, time::Duration};

use duet::{
    reveal::RevealMode,
    rules::{check_attribution_size, AttributionRule},
    Role,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::SessionError;

/// Everything a party needs to know before a session can start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// The role of the local party.
    pub role: Role,
    /// Bind address of the Publisher, connect address of the Partner.
    #[serde(default = "default_address")]
    pub address: String,
    /// The attribution rule. Required for the Publisher, a Partner without a rule adopts the
    /// Publisher's.
    #[serde(default)]
    pub rule: Option<AttributionRule>,
    /// Whether results are reconstructed at the end of the session.
    #[serde(default)]
    pub reveal_mode: RevealMode,
    /// Number of touchpoints, as agreed by both parties.
    pub touchpoints: usize,
    /// Number of conversions, as agreed by both parties.
    pub conversions: usize,
    /// Seconds to wait for a connection or for a single message.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Largest message accepted from the other party, in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_address() -> String {
    "127.0.0.1:7878".into()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_frame_bytes() -> usize {
    256 * 1024 * 1024
}

impl SessionConfig {
    /// The configuration sources in order of increasing precedence, without explicit overrides.
    ///
    /// Callers can merge further providers (e.g. command line flags) before calling
    /// [`SessionConfig::from_figment`].
    pub fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::new();
        let figment = match file {
            Some(file) => figment.merge(Toml::file(file)),
            None => figment,
        };
        figment.merge(Env::prefixed("DUET_").ignore(&["log"]))
    }

    /// Extracts and validates a configuration.
    pub fn from_figment(figment: &Figment) -> Result<Self, SessionError> {
        let config: SessionConfig = figment
            .extract()
            .map_err(|e| SessionError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from the optional TOML file, the environment and `overrides`.
    pub fn load(file: Option<&Path>, overrides: impl Serialize) -> Result<Self, SessionError> {
        let figment = Self::figment(file).merge(Serialized::defaults(overrides));
        Self::from_figment(&figment)
    }

    /// Checks the local configuration, before anything is sent to the other party.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.address.trim().is_empty() {
            return Err(SessionError::config("the address must not be empty"));
        }
        if self.role == Role::Publisher && self.rule.is_none() {
            return Err(SessionError::config(
                "the publisher must specify an attribution rule",
            ));
        }
        if self.timeout == 0 {
            return Err(SessionError::config("the timeout must be at least 1 second"));
        }
        if self.max_frame_bytes == 0 {
            return Err(SessionError::config("the maximum frame size must not be 0"));
        }
        if let Some(rule) = self.rule {
            check_attribution_size(rule, self.touchpoints, self.conversions)?;
        }
        Ok(())
    }

    /// The number of records the local party has to provide.
    pub fn expected_records(&self) -> usize {
        match self.role {
            Role::Publisher => self.touchpoints,
            Role::Partner => self.conversions,
        }
    }

    /// The configured timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}
