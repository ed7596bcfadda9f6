use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use wt_server::{Args, ServerConfig, WebTransportH3Server};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let mut server = WebTransportH3Server::new(ServerConfig::from(args));
    let local_addr = server.start()?;
    info!(%local_addr, "listening; press Ctrl-C to stop");

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(tokio::signal::ctrl_c())?;

    server.stop()?;
    Ok(())
}
