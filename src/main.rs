//! nightly-publish - builds nightly binaries for every release target and
//! publishes them into the platform archives of the previous release.

use nightly_publish::cli;
use std::process;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse_args();

    let default_filter = if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling running jobs");
            on_interrupt.cancel();
        }
    });

    // Run CLI and get exit code
    let exit_code = match cli::run(args, cancel).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };

    process::exit(exit_code);
}
