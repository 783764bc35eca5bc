use clap::Parser as _;
use nilan_tools::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(clap::Parser)]
#[clap(version, about)]
enum Commands {
    Registers(commands::registers::Args),
    Read(commands::read::Args),
    Model(commands::model::Args),
    Readings(commands::readings::Args),
    Settings(commands::settings::Args),
    Set(commands::set::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn main() {
    let filter = std::env::var("NILAN_TOOLS_LOG")
        .ok()
        .and_then(|description| {
            description.parse::<tracing_subscriber::filter::targets::Targets>().ok()
        })
        .unwrap_or_else(|| {
            tracing_subscriber::filter::targets::Targets::new()
                .with_default(tracing::Level::WARN)
        });
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Registers(args) => end(commands::registers::run(args)),
        Commands::Read(args) => end(commands::read::run(args)),
        Commands::Model(args) => end(commands::model::run(args)),
        Commands::Readings(args) => end(commands::readings::run(args)),
        Commands::Settings(args) => end(commands::settings::run(args)),
        Commands::Set(args) => end(commands::set::run(args)),
    }
}
