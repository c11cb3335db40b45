//! Operator tooling for pbprox configuration files.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use pbprox::config::{load_config, ConfigError};
use pbprox::provider::{generate_cookie_secret, validate_provider};

#[derive(Parser)]
#[command(name = "pbprox-cli")]
#[command(about = "Inspect and prepare pbprox configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and report every problem
    Check {
        #[arg(short, long, default_value = "pbprox.toml")]
        config: PathBuf,
    },
    /// Print a fresh 32 character cookie secret
    GenerateSecret,
    /// Print the redirect URIs to register for each provider
    RedirectUris {
        #[arg(short, long, default_value = "pbprox.toml")]
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => match load_config(&config) {
            Ok(loaded) => {
                println!(
                    "{}: OK ({} provider(s), serving `{}`)",
                    config.display(),
                    loaded.providers.len(),
                    loaded.provider_id
                );
                ExitCode::SUCCESS
            }
            Err(ConfigError::Validation(errors)) => {
                eprintln!("{}: {} problem(s)", config.display(), errors.len());
                for error in errors {
                    eprintln!("  - {error}");
                }
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("{}: {e}", config.display());
                ExitCode::FAILURE
            }
        },
        Commands::GenerateSecret => {
            println!("{}", generate_cookie_secret());
            ExitCode::SUCCESS
        }
        Commands::RedirectUris { config } => {
            let loaded = match load_config(&config) {
                Ok(loaded) => loaded,
                Err(e) => {
                    eprintln!("{}: {e}", config.display());
                    return ExitCode::FAILURE;
                }
            };
            for record in &loaded.providers {
                let mut record = record.clone();
                if record.cookie_secret.is_empty() {
                    // Generated at runtime; irrelevant for redirect URIs.
                    record.cookie_secret = generate_cookie_secret();
                }
                match validate_provider(&record) {
                    Ok(provider) => {
                        println!("{} ({}):", record.id, provider);
                        for uri in provider.redirect_uris() {
                            println!("  {uri}");
                        }
                    }
                    Err(errors) => {
                        for error in errors {
                            eprintln!("{}: {error}", record.id);
                        }
                    }
                }
            }
            ExitCode::SUCCESS
        }
    }
}
