use std::fs::File;

use clap::Parser;
use loadbeat_cli::Cli;
use loadbeat_core::Runtime;
use tracing_subscriber::EnvFilter;

fn init_logging(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_new(cli.filter_directive())?;
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match &cli.output {
        Some(path) => {
            let file = File::create(path)?;
            subscriber.with_writer(move || file.try_clone().expect("clone log file handle")).with_ansi(false).init();
        }
        None => {
            subscriber.with_writer(std::io::stderr).init();
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("loadbeat: failed to initialise logging: {e}");
        std::process::exit(1);
    }

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let mut rt = match Runtime::new(config) {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialise runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = loadbeat_core::runtime::run(&mut rt) {
        tracing::error!(error = %e, "run loop exited with an error");
        std::process::exit(1);
    }

    let report = rt.stats.render(&rt.config);
    print!("{report}");
    std::process::exit(0);
}
