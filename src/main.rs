//! CLI entry point for exception grouping.
//!
//! Provides commands for grouping exceptions, reporting the most frequent
//! groups and serving the grouping API over HTTP.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use excgrouper::config::{default_storage_path, expand_tilde};
use excgrouper::display::{THEME, create_grouping_table, create_top_exceptions_table};
use excgrouper::{ExceptionEvent, Grouper, GroupingError, Settings};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::filter::LevelFilter;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Group similar exceptions and rank them by frequency
#[derive(Parser)]
#[command(
    name = "excgrouper",
    version = env!("CARGO_PKG_VERSION"),
    about = "Group similar exceptions and rank them by frequency",
    long_about = "Assigns exceptions to groups by the cosine similarity of their embeddings \
                  and reports the most frequent groups.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Create .excgrouper/settings.toml in the current directory
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Group one exception and print its group id
    Group {
        /// Exception message
        message: String,

        /// Exception type name
        #[arg(short = 't', long = "type", default_value = excgrouper::types::DEFAULT_EXCEPTION_TYPE)]
        exception_type: String,

        /// Stack trace recorded with the event
        #[arg(long)]
        stack_trace: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the most frequent exception groups
    Top {
        /// Maximum number of groups
        #[arg(short, long, default_value_t = excgrouper::client::DEFAULT_TOP_LIMIT)]
        limit: usize,

        /// Only groups seen within this many days
        #[arg(short, long, default_value_t = excgrouper::client::DEFAULT_TOP_DAYS)]
        days: u32,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Serve the grouping API over HTTP
    Serve {
        /// Address to bind, overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Delete the embedded exception store
    Cleanup {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

fn init_logging(debug: bool) {
    let level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(debug)
        .init();
}

/// Print an error with its recovery suggestions and exit.
fn exit_with_error(error: &GroupingError, json: bool) -> ! {
    if json {
        let body = serde_json::json!({
            "error": {
                "code": error.status_code(),
                "message": error.to_string(),
                "suggestions": error.recovery_suggestions(),
            }
        });
        println!("{body:#}");
    } else {
        eprintln!("{}", THEME.error_with_icon(&format!("Error: {error}")));

        let suggestions = error.recovery_suggestions();
        if !suggestions.is_empty() {
            eprintln!("\nSuggestions:");
            for suggestion in suggestions {
                eprintln!("  • {suggestion}");
            }
        }
    }
    std::process::exit(1);
}

async fn build_grouper(config: &Settings, json: bool) -> Grouper {
    match Grouper::from_settings(config).await {
        Ok(grouper) => grouper,
        Err(e) => exit_with_error(&e, json),
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing output: {e}");
            std::process::exit(1);
        }
    }
}

/// Main entry point for the exception grouping CLI.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Settings::load_from(config_path).unwrap_or_else(|e| {
            eprintln!(
                "Configuration error loading from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        })
    } else {
        Settings::load().unwrap_or_else(|e| {
            eprintln!("Configuration error: {e}");
            Settings::default()
        })
    };

    init_logging(cli.debug || config.debug);

    match cli.command {
        Commands::Init { force } => match Settings::init_config_file(force) {
            Ok(path) => {
                println!("Created configuration file at: {}", path.display());
                println!("Edit this file to customize your settings.");
            }
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },

        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            match toml::to_string_pretty(&config.redacted()) {
                Ok(toml_str) => println!("{toml_str}"),
                Err(e) => eprintln!("Error displaying config: {e}"),
            }
            println!("{}", "=".repeat(50));
            println!("Storage backend: {:?}", config.storage.backend());
        }

        Commands::Group {
            message,
            exception_type,
            stack_trace,
            json,
        } => {
            let grouper = build_grouper(&config, json).await;
            let mut event = ExceptionEvent::new(message).with_type(exception_type);
            if let Some(stack_trace) = stack_trace {
                event = event.with_stack_trace(stack_trace);
            }

            if grouper.is_cloud() {
                match grouper.group_exception(&event).await {
                    Ok(group_id) if json => {
                        print_json(&serde_json::json!({ "group_id": group_id }));
                    }
                    Ok(group_id) => {
                        println!(
                            "Exception in group {}: {}",
                            THEME.apply(&THEME.group_id, &group_id),
                            event.message()
                        );
                    }
                    Err(e) => exit_with_error(&e, json),
                }
            } else {
                match grouper.process(&event).await {
                    Ok(result) if json => print_json(&result),
                    Ok(result) => {
                        println!(
                            "Exception in group {}: {}",
                            THEME.apply(&THEME.group_id, &result.group_id),
                            event.message()
                        );
                        println!("{}", create_grouping_table(&result));
                    }
                    Err(e) => exit_with_error(&e, json),
                }
            }
        }

        Commands::Top { limit, days, json } => {
            let grouper = build_grouper(&config, json).await;
            match grouper.top_exceptions(limit, days).await {
                Ok(top) if json => print_json(&top),
                Ok(top) if top.is_empty() => {
                    println!("No exceptions recorded in the last {days} day(s).");
                }
                Ok(top) => {
                    println!(
                        "{}",
                        THEME.apply(
                            &THEME.header,
                            format!("Top {} exception group(s), last {days} day(s)", top.len())
                        )
                    );
                    println!("{}", create_top_exceptions_table(&top));
                }
                Err(e) => exit_with_error(&e, json),
            }
        }

        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            if let Err(e) = excgrouper::server::serve(config, bind).await {
                eprintln!("{}", THEME.error_with_icon(&format!("Server error: {e}")));
                std::process::exit(1);
            }
        }

        Commands::Cleanup { yes } => {
            let path = config
                .storage
                .local_path
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(default_storage_path);
            cleanup_store(&path, yes);
        }
    }
}

/// Removes the embedded store directory after confirmation.
fn cleanup_store(path: &Path, yes: bool) {
    if !path.exists() {
        println!(
            "No local storage found at {}",
            THEME.apply(&THEME.path, path.display())
        );
        return;
    }

    if !yes {
        print!(
            "Delete all exception groups in {}? [y/N] ",
            THEME.apply(&THEME.path, path.display())
        );
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err()
            || !matches!(answer.trim(), "y" | "Y" | "yes")
        {
            println!("Aborted.");
            return;
        }
    }

    match std::fs::remove_dir_all(path) {
        Ok(()) => println!(
            "{}",
            THEME.success_with_icon(&format!(
                "Successfully removed local storage at {}",
                path.display()
            ))
        ),
        Err(e) => {
            eprintln!(
                "{}",
                THEME.error_with_icon(&format!(
                    "Error removing local storage at {}: {e}",
                    path.display()
                ))
            );
            std::process::exit(1);
        }
    }
}
