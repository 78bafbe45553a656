mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    devcert::output::set_verbose(cli.verbose);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cli.verbose {
                EnvFilter::new("debug")
            } else {
                EnvFilter::new("warn")
            }
        }))
        .with_target(false)
        .init();

    if let Err(e) = cli.run() {
        devcert::output::error_stderr(&e.to_string());
        std::process::exit(1);
    }
}
