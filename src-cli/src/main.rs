//! `tia` - ask the agricultural advisor a question and inspect the query log.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tia_ai::llm::ImageInput;
use tia_cli_lib::{
    analyze_image_once, ask_once, load_config, log_recent, log_stats, suggest_once, AskRequest, ImageRequest,
};
use tia_core::domain::{Locale, Modality};
use tia_core::error::AppError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tia")]
#[command(about = "Tia Apa - agricultural advice for Bangladeshi farmers", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file (defaults to $TIA_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question and record it in the query log
    Ask {
        /// The farmer's question or voice transcript
        text: String,

        /// Answer language: bn or en (voice transcripts are detected when omitted)
        #[arg(long)]
        locale: Option<String>,

        /// Declared query type: Text, Voice or Image
        #[arg(long)]
        modality: Option<String>,

        /// The question was captured by voice
        #[arg(long)]
        voice: bool,

        /// The question came with an image attachment
        #[arg(long)]
        image: bool,

        /// Farmer's location, used to localize the advice
        #[arg(long, default_value = "")]
        location: String,

        /// Farmer's email or phone, stored with the question
        #[arg(long)]
        contact: String,

        /// Clinic or region the farmer belongs to
        #[arg(long)]
        region: String,
    },

    /// Analyze a crop photo and record it in the query log
    Vision {
        /// JPEG, PNG, WebP or GIF file
        image: PathBuf,

        /// What the farmer wants to know about the photo
        #[arg(long)]
        question: Option<String>,

        #[arg(long)]
        locale: Option<String>,

        #[arg(long, default_value = "")]
        location: String,

        #[arg(long)]
        contact: String,

        #[arg(long)]
        region: String,
    },

    /// Suggest follow-up questions for partial input
    Suggest {
        input: String,

        #[arg(long)]
        locale: Option<String>,
    },

    /// Read the query log
    Log {
        #[command(subcommand)]
        command: LogCommands,
    },
}

#[derive(Subcommand)]
enum LogCommands {
    /// Most recent queries first
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Totals for the monitoring dashboard
    Stats,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = %e.code, kind = ?e.kind(), details = ?e.details, "{}", e.message);
            match serde_json::to_string_pretty(&e) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("{e}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), AppError> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ask {
            text,
            locale,
            modality,
            voice,
            image,
            location,
            contact,
            region,
        } => {
            let locale = parse_locale(locale.as_deref())?;
            let declared_modality = match modality.as_deref() {
                Some(raw) => Some(Modality::parse(raw).ok_or_else(|| {
                    AppError::new("CONFIG_MODALITY_INVALID", "Unknown query type")
                        .with_details(format!("modality={raw}"))
                })?),
                None => None,
            };
            let request = AskRequest {
                text,
                locale,
                declared_modality,
                has_image: image,
                is_voice: voice,
                location,
                user_contact: contact,
                clinic_or_region: region,
            };
            print_json(&ask_once(&config, &request)?)
        }
        Commands::Vision {
            image,
            question,
            locale,
            location,
            contact,
            region,
        } => {
            let request = ImageRequest {
                image: ImageInput::from_path(&image)?,
                question,
                locale: parse_locale(locale.as_deref())?,
                location,
                user_contact: contact,
                clinic_or_region: region,
            };
            print_json(&analyze_image_once(&config, &request)?)
        }
        Commands::Suggest { input, locale } => {
            let locale = parse_locale(locale.as_deref())?.unwrap_or_default();
            print_json(&suggest_once(&config, &input, locale)?)
        }
        Commands::Log { command } => match command {
            LogCommands::Recent { limit } => print_json(&log_recent(&config, limit)?),
            LogCommands::Stats => print_json(&log_stats(&config)?),
        },
    }
}

fn parse_locale(raw: Option<&str>) -> Result<Option<Locale>, AppError> {
    match raw {
        Some(raw) => Locale::parse(raw).map(Some).ok_or_else(|| {
            AppError::new("CONFIG_LOCALE_INVALID", "Unknown locale").with_details(format!("locale={raw}"))
        }),
        None => Ok(None),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| {
        AppError::new("OUTPUT_ENCODE_FAILED", "Failed to encode output").with_details(e.to_string())
    })?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_requires_contact_and_region() {
        assert!(Cli::try_parse_from(["tia", "ask", "rice blast"]).is_err());
        assert!(Cli::try_parse_from(["tia", "ask", "rice blast", "--contact", "a@b.org"]).is_err());

        let cli = Cli::try_parse_from([
            "tia",
            "ask",
            "rice blast",
            "--contact",
            "a@b.org",
            "--region",
            "Rampal",
        ])
        .expect("parse");
        match cli.command {
            Commands::Ask { contact, region, .. } => {
                assert_eq!(contact, "a@b.org");
                assert_eq!(region, "Rampal");
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn vision_requires_contact_and_region() {
        assert!(Cli::try_parse_from(["tia", "vision", "leaf.jpg"]).is_err());
        assert!(Cli::try_parse_from(["tia", "vision", "leaf.jpg", "--contact", "a@b.org", "--region", "Rampal"]).is_ok());
    }

    #[test]
    fn unknown_locale_is_a_configuration_error() {
        assert_eq!(parse_locale(Some("fr")).expect_err("locale").code, "CONFIG_LOCALE_INVALID");
        assert_eq!(parse_locale(Some("EN")).expect("locale"), Some(Locale::En));
        assert_eq!(parse_locale(None).expect("locale"), None);
    }
}
