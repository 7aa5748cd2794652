use clap::Parser;
mod modes;

use duplex_chat::SessionResult;
use duplex_chat_cli::cli_args::{Mode, Opt};
use tracing::level_filters::LevelFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            // Chat text owns stdout.
            .with_writer(std::io::stderr)
            .finish(),
    )?;

    let opt = Opt::parse();

    let result = match opt.mode {
        Mode::Server(args) => modes::chat::serve(args).await?,
        Mode::Client(args) => modes::chat::connect(args).await?,
        Mode::EchoServer(args) => modes::reply::serve(args).await?,
        Mode::EchoClient(args) => modes::reply::connect(args).await?,
    };

    if let SessionResult::TransportError(reason) = result {
        anyhow::bail!("session ended with a transport error: {reason}");
    }
    Ok(())
}
