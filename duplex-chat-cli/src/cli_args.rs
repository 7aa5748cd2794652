use clap::{Args, Parser, Subcommand};
use duplex_chat::config::ChatConfig;
use duplex_chat::reply::ReplyStyle;

/// Duplex Chat CLI
///
/// Chat with one peer over a loopback TCP connection, or run the
/// request/reply demo. Type `exit` to leave a session.
#[derive(Parser, Debug)]
#[clap(name = "duplex-chat")]
pub struct Opt {
    #[clap(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Wait for one client and chat with it (port 9000 by default).
    Server(ConnectionArgs),

    /// Connect to a chat server (port 9000 by default).
    Client(ConnectionArgs),

    /// Answer requests from one client (port 8080 by default).
    EchoServer(EchoServer),

    /// Send lines to an echo server and print each reply.
    EchoClient(ConnectionArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Host to connect to or bind on.
    #[clap(long = "host")]
    pub host: Option<String>,

    #[clap(long = "port", short = 'p')]
    pub port: Option<u16>,

    /// YAML configuration file. Falls back to `CHAT_CONFIG_PATH` and the
    /// `CHAT_*` environment variables.
    #[clap(long = "config", short = 'c')]
    pub config: Option<String>,

    /// Socket send and receive buffer size in bytes.
    #[clap(long = "buffer-size")]
    pub buffer_size: Option<u32>,

    /// Leave Nagle's algorithm enabled.
    #[clap(long = "no-nodelay")]
    pub no_nodelay: bool,

    /// Receive timeout; an idle timeout is retried, not treated as an error.
    #[clap(long = "read-timeout-ms")]
    pub read_timeout_ms: Option<u64>,
}

impl ConnectionArgs {
    /// Load the configuration and apply command-line overrides on top.
    pub fn resolve(&self, default_port: u16) -> anyhow::Result<ChatConfig> {
        let mut config = match &self.config {
            Some(path) => ChatConfig::from_file(path, default_port)?,
            None => ChatConfig::from_env_or_default(default_port)?,
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(size) = self.buffer_size {
            config.transport.send_buffer_size = size;
            config.transport.recv_buffer_size = size;
        }
        if self.no_nodelay {
            config.transport.nodelay = false;
        }
        if self.read_timeout_ms.is_some() {
            config.read_timeout_ms = self.read_timeout_ms;
        }
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct EchoServer {
    #[clap(flatten)]
    pub connection: ConnectionArgs,

    /// How to answer: `echo` repeats each request, `ack` counts its bytes.
    #[arg(long, default_value_t = ReplyStyle::Echo)]
    pub style: ReplyStyle,
}
