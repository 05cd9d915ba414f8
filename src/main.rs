use clap::Parser;
use tidymove::cancel::CancelFlag;
use tidymove::cli::{Cli, run_cli};
use tidymove::logging::init_logger;
use tidymove::output::OutputFormatter;
use tracing::warn;

fn main() {
    let cli = Cli::parse();
    let _log_guard = init_logger(&cli.log_level, cli.log_file.as_deref());

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        OutputFormatter::warning("Cancelling after the current file...");
        handler_flag.cancel();
    }) {
        warn!(error = %err, "could not install Ctrl-C handler");
    }

    if let Err(err) = run_cli(cli, cancel) {
        OutputFormatter::error(&format!("{err:#}"));
        std::process::exit(1);
    }
}
