use clap::Parser;
use lucknow_chat::cli::{self, Cli, CliError};
use tracing::Level;

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    cli::run(cli).await
}
