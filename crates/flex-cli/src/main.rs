use clap::{CommandFactory, Parser};
use flex_cli::{Cli, Commands};
use tracing::error;
use tracing_subscriber::FmtSubscriber;

mod commands;

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable with --format json.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {err}");
    }

    let result = match &cli.command {
        Some(Commands::Run {
            scenario,
            overrides,
            format,
        }) => commands::run::handle(scenario, overrides, *format),
        Some(Commands::Compare { scenario, format }) => commands::compare::handle(scenario, *format),
        Some(Commands::Hull {
            sets,
            scenario,
            export_dir,
            decimals,
            format,
        }) => commands::hull::handle(
            sets,
            scenario.as_deref(),
            export_dir.as_deref(),
            *decimals,
            *format,
        ),
        Some(Commands::Validate { scenario }) => commands::validate::handle(scenario),
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(err) = result {
        error!("{err:#}");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
