//! kvwatch handler
//!
//! Invoked by a key/value watch whenever a watched key changes. Reads the
//! watch payload from stdin and publishes `{"key": .., "value": ..}` to a
//! durable fanout exchange, then exits.
//!
//! Usage:
//!   consul watch -type=key -key=carbonio-files/max-number-of-versions kvwatch-handler
//!
//! Exit code 0 means the message was published; anything else means the
//! change was not forwarded.

use clap::Parser;
use kvwatch_handler::{Args, broker_contacted, exit_code, init_tracing, run};
use std::process::ExitCode;
use tracing::{debug, error};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = args.to_config();
    debug!("Configuration: {:?}", config);

    match run(config, tokio::io::stdin()).await {
        Ok(report) => {
            debug!(
                "Forwarded {} to {} (message {})",
                report.key, report.exchange, report.message_id
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            if !broker_contacted(&e) {
                debug!("Broker was not contacted");
            }
            ExitCode::from(exit_code(&e))
        }
    }
}
