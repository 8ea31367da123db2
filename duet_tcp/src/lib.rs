//! TCP session coordinator for the Duet attribution engine.
//!
//! This crate connects a Publisher and a Partner over a single TCP connection and drives both
//! through the phases of an attribution session: agreeing on the setup, exchanging input shares,
//! evaluating the attribution circuit and finally revealing (or keeping) the output shares. The
//! Publisher always listens, the Partner always connects.
//!
//! The cryptographic protocol itself is implemented by the [`duet`] crate, this crate only moves
//! its messages and enforces the order of the phases.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use duet::{Event, Role};

pub mod channel;
mod config;
mod error;
mod session;

pub use config::SessionConfig;
pub use error::SessionError;
pub use session::{
    Hello, Session, SessionOutcome, SessionPhase, Traffic, Transcript, PROTOCOL_VERSION,
};

use channel::TcpChannel;

/// Listens on the configured address and runs the session as the Publisher.
pub async fn run_publisher(
    config: SessionConfig,
    events: Vec<Event>,
) -> Result<SessionOutcome, SessionError> {
    if config.role != Role::Publisher {
        return Err(SessionError::config("expected a publisher configuration"));
    }
    config.validate()?;
    let channel =
        TcpChannel::listen(config.address.as_str(), config.timeout(), config.max_frame_bytes)
            .await?;
    Session::new(config, channel)?.run(events).await
}

/// Connects to the configured address and runs the session as the Partner.
pub async fn run_partner(
    config: SessionConfig,
    events: Vec<Event>,
) -> Result<SessionOutcome, SessionError> {
    if config.role != Role::Partner {
        return Err(SessionError::config("expected a partner configuration"));
    }
    config.validate()?;
    let channel =
        TcpChannel::connect(config.address.as_str(), config.timeout(), config.max_frame_bytes)
            .await?;
    Session::new(config, channel)?.run(events).await
}

/// Runs the session for whichever role is configured.
pub async fn run(config: SessionConfig, events: Vec<Event>) -> Result<SessionOutcome, SessionError> {
    match config.role {
        Role::Publisher => run_publisher(config, events).await,
        Role::Partner => run_partner(config, events).await,
    }
}
