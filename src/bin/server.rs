use std::sync::Arc;

use clap::{ArgAction, Parser};
use tac_net::logger::Logger;
use tac_net::supervisor::{self, ServerState};

#[derive(Parser, Debug)]
#[command(
    name = "server",
    version,
    about = "Tac-Net — networked Tic-Tac-Toe server",
    long_about = "Brokers two-player Tic-Tac-Toe matches between many logged-in clients \
                  over a framed binary TCP protocol."
)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: u16,

    /// Maximum number of simultaneously connected clients
    #[arg(short = 'm', long, default_value_t = 64)]
    max_clients: usize,

    /// Maximum accepted frame payload size, in bytes
    #[arg(long, default_value_t = tac_net::codec::MAX_PAYLOAD_SIZE)]
    max_payload: usize,

    /// Increase output verbosity (-v verbose, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Parses CLI args, routing clap's own usage/error output to stdout instead
/// of stderr — the documented behaviour for a missing `-p` or an unknown
/// flag, rather than clap's stderr default.
fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            print!("{err}");
            std::process::exit(err.exit_code());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();
    let log = Arc::new(Logger::new(args.verbose));

    if args.max_payload != tac_net::codec::MAX_PAYLOAD_SIZE {
        log.warn(format!(
            "--max-payload {} is ignored; the compiled-in frame limit is {} bytes",
            args.max_payload,
            tac_net::codec::MAX_PAYLOAD_SIZE
        ));
    }

    let state = ServerState::new(args.max_clients, log);
    let addr = format!("0.0.0.0:{}", args.port);
    supervisor::run(&addr, state).await?;
    Ok(())
}
