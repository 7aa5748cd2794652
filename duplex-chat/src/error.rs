/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

use std::net::SocketAddr;

/// Errors raised while establishing a chat connection.
///
/// Anything that goes wrong once a session is running is reported through
/// [`SessionResult`] instead; pumps never propagate errors across tasks.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Bind, listen, accept or connect failed. No session was started.
    #[error("connection setup failed for {endpoint}: {source}")]
    ConnectionSetup {
        endpoint: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The connection was already closed.
    #[error("connection is closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChatError {
    pub(crate) fn setup(endpoint: SocketAddr, source: std::io::Error) -> Self {
        Self::ConnectionSetup { endpoint, source }
    }
}

/// The condition that ended a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionResult {
    /// The local user typed `exit` or local input ran out.
    LocalExit,
    /// The peer closed its side of the connection.
    RemoteClosed,
    /// A read or write failed mid-session.
    TransportError(String),
}

impl SessionResult {
    /// `true` for the two graceful endings.
    pub fn is_clean(&self) -> bool {
        !matches!(self, SessionResult::TransportError(_))
    }
}

impl std::fmt::Display for SessionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionResult::LocalExit => write!(f, "local exit"),
            SessionResult::RemoteClosed => write!(f, "remote closed the connection"),
            SessionResult::TransportError(reason) => write!(f, "transport error: {reason}"),
        }
    }
}
