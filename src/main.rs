use clap::Parser;
use dotenvy::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use binsight::cli::{BinsightCli, Commands};

#[derive(Parser)]
#[command(name = "binsight")]
#[command(about = "ELF security posture and ROP gadget inspector")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Logs go to stderr so reports on stdout stay machine-readable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "binsight=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(command) => {
            let mut binsight_cli = BinsightCli::new()?;
            binsight_cli.handle_command(command)
        }
        None => {
            let binsight_cli = BinsightCli::new()?;
            binsight_cli.show_intro_and_help()
        }
    }
}
