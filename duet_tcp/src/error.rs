use duet::{ConfigError, Error};

use crate::channel::ChannelError;

/// The ways in which a session can fail. Every error is terminal for the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The local setup is invalid or does not match the setup of the other party.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The channel to the other party failed or timed out.
    #[error("connection error: {0}")]
    Connection(#[from] ChannelError),
    /// The other party sent a message that does not fit the current phase or round.
    #[error("protocol desync: {0}")]
    ProtocolDesync(String),
}

impl SessionError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SessionError::Configuration(msg.into())
    }
}

impl From<ConfigError> for SessionError {
    fn from(e: ConfigError) -> Self {
        SessionError::Configuration(e.to_string())
    }
}

impl From<Error> for SessionError {
    fn from(e: Error) -> Self {
        match e {
            Error::Config(e) => e.into(),
            Error::InsufficientInput
            | Error::InvalidCircuit
            | Error::MaxCircuitSizeExceeded
            | Error::RevealMode(_) => SessionError::Configuration(e.to_string()),
            e => SessionError::ProtocolDesync(e.to_string()),
        }
    }
}

impl From<bincode::Error> for SessionError {
    fn from(e: bincode::Error) -> Self {
        SessionError::ProtocolDesync(format!("malformed message: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet::Role;

    #[test]
    fn engine_errors_are_classified() {
        let desync = SessionError::from(Error::UnexpectedMessage {
            expected: "AndLayer",
            received: "InputShares",
        });
        assert!(matches!(desync, SessionError::ProtocolDesync(_)));

        let mismatch = SessionError::from(Error::ShareMismatch("the share sets differ in length"));
        assert!(matches!(mismatch, SessionError::ProtocolDesync(_)));

        let config = SessionError::from(Error::Config(ConfigError::UnexpectedEventKind {
            id: 3,
            kind: "view",
            role: Role::Partner,
        }));
        assert_eq!(
            config.to_string(),
            "configuration error: event 3 is a view, which cannot be an input of the partner"
        );
    }
}
