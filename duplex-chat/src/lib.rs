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

//! Full-duplex line chat over a single TCP connection.
//!
//! A [`DuplexChatSession`] runs two pumps over one established connection:
//! local lines go out as `line\n`, inbound bytes come back as text events.
//! Typing `exit`, running out of local input, or the peer closing ends the
//! session on both sides.
//!
//! # Example
//!
//! ```no_run
//! use duplex_chat::{config::ChatConfig, console, transport, DuplexChatSession};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ChatConfig::default();
//! let connection = transport::connect(config.endpoint()?, &config.transport).await?;
//! let handle = DuplexChatSession::start(
//!     connection.into_stream()?,
//!     console::spawn_stdin_reader(),
//!     console::ConsoleSink::new("SERVER", "CLIENT"),
//! );
//! println!("session ended: {}", handle.join().await);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod console;
pub mod error;
pub mod reply;
pub mod session;
pub mod transport;

pub use error::{ChatError, SessionResult};
pub use session::{DuplexChatSession, SessionHandle, SessionOptions};
