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

//! Local line input and text output collaborators of a session.

use std::future::Future;
use std::io::{self, BufRead, Write};
use tokio::io::{AsyncBufRead, Lines};
use tokio::sync::mpsc;
use tracing::debug;

/// A source of local input lines.
///
/// `Ok(None)` means input is exhausted, which is distinct from an empty line.
/// Returned lines carry no trailing delimiter.
pub trait LineSource: Send + 'static {
    fn next_line(&mut self) -> impl Future<Output = io::Result<Option<String>>> + Send;
}

/// Receives inbound text, one event per transport read.
pub trait OutputSink: Send + 'static {
    fn deliver(&mut self, text: String) -> impl Future<Output = io::Result<()>> + Send;
}

impl<R> LineSource for Lines<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        Lines::next_line(self).await
    }
}

impl LineSource for mpsc::Receiver<String> {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.recv().await)
    }
}

impl OutputSink for mpsc::Sender<String> {
    async fn deliver(&mut self, text: String) -> io::Result<()> {
        self.send(text)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "output receiver dropped"))
    }
}

/// Writes inbound text to stdout and re-draws the local prompt.
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    peer_label: String,
    prompt: Option<String>,
}

impl ConsoleSink {
    pub fn new(peer_label: impl Into<String>, local_label: impl Into<String>) -> Self {
        Self {
            peer_label: peer_label.into(),
            prompt: Some(format!("[{}] > ", local_label.into())),
        }
    }

    /// For sides that never read local input.
    pub fn without_prompt(peer_label: impl Into<String>) -> Self {
        Self {
            peer_label: peer_label.into(),
            prompt: None,
        }
    }

    fn render(&self, text: &str) -> String {
        let text = text.trim_end_matches(['\r', '\n']);
        match &self.prompt {
            Some(prompt) => format!("\n[{}] {text}\n{prompt}", self.peer_label),
            None => format!("[{}] {text}\n", self.peer_label),
        }
    }

    /// Print the prompt without any inbound text.
    pub fn show_prompt(&self) -> io::Result<()> {
        let Some(prompt) = &self.prompt else {
            return Ok(());
        };
        let mut stdout = io::stdout().lock();
        stdout.write_all(prompt.as_bytes())?;
        stdout.flush()
    }
}

impl OutputSink for ConsoleSink {
    async fn deliver(&mut self, text: String) -> io::Result<()> {
        let rendered = self.render(&text);
        let mut stdout = io::stdout().lock();
        stdout.write_all(rendered.as_bytes())?;
        stdout.flush()
    }
}

/// Read stdin on a dedicated thread and forward lines over a channel.
///
/// A blocked console read cannot be cancelled, so it must not live on the
/// runtime. The thread ends when stdin closes or the receiver is dropped.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    debug!("stdin read failed: {e}");
                    break;
                }
            };
            let line = line.strip_suffix('\r').map(str::to_owned).unwrap_or(line);
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
        debug!("stdin reader thread finished");
    });
    rx
}
