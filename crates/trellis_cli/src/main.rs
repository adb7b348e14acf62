//! Entry point of the `trellis` command.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use trellis_cli::{Cli, error_chain, exit_status, summary};
use trellis_staging::catalog::PluginCatalog;
use trellis_staging::stage::Staging;

#[expect(
    clippy::print_stdout,
    clippy::print_stderr,
    reason = "command line output"
)]
fn main() -> ExitCode {
    // Load .env before clap reads its env fallbacks.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let catalog = Arc::new(PluginCatalog::discover());
    if cli.list {
        for path in catalog.paths() {
            println!("{path}");
        }
        return ExitCode::SUCCESS;
    }

    let source = match cli.config_source() {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: {}", error_chain(&err));
            return ExitCode::from(2);
        }
    };

    let staging = Staging::builder()
        .config(cli.staging_config())
        .catalog(catalog)
        .build();
    let result = staging.run_blocking(cli.plugins(source));

    match &result {
        Ok(report) => print!("{}", summary(report)),
        Err(err) => eprintln!("error: {}", error_chain(err)),
    }
    ExitCode::from(exit_status(&result))
}
