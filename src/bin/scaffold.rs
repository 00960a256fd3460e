//! Scaffold CLI Binary
//!
//! Runs one generation request through the full pipeline against a template directory.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use scaffold::config::ConfigLoader;
use scaffold::logging::{init_logging, LoggingConfig};
use scaffold::{DirectoryBackend, GenerationCoordinator, GenerationRequest, GenerationResult, ScaffoldConfig};
use serde_json::Value;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

/// Scaffold CLI - generate projects from templates
#[derive(Parser)]
#[command(name = "scaffold")]
#[command(about = "Generate project files from templates")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (overrides the user config file)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable logging (default: off)
    #[arg(long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate files from a template into an output directory
    Generate {
        /// Template identifier (directory name under the template root)
        template: String,

        /// Output directory
        output: PathBuf,

        /// Template variable as name=value; values are parsed as JSON when possible
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,

        /// Scheduling priority (higher runs first)
        #[arg(long, default_value_t = 0)]
        priority: i32,

        /// Write into an existing, non-empty output directory
        #[arg(long)]
        force: bool,

        /// Template root directory
        #[arg(long)]
        templates: Option<PathBuf>,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            process::exit(2);
        }
    };

    if let Err(e) = init_logging(Some(&logging_config(&cli, &config))) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} failed to start runtime: {}", "error:".red().bold(), e);
            process::exit(1);
        }
    };

    match runtime.block_on(run(cli.command, config)) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("{} {:#}", "error:".red().bold(), e);
            process::exit(1);
        }
    }
}

fn logging_config(cli: &Cli, config: &ScaffoldConfig) -> LoggingConfig {
    let mut logging = config.logging.clone();
    if !cli.verbose {
        logging.level = "off".to_string();
        return logging;
    }
    if let Some(level) = &cli.log_level {
        logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        logging.format = format.clone();
    }
    logging
}

/// Returns whether the generation succeeded
async fn run(command: Commands, config: ScaffoldConfig) -> Result<bool> {
    match command {
        Commands::Generate {
            template,
            output,
            vars,
            priority,
            force,
            templates,
            format,
        } => {
            let root = match templates {
                Some(root) => root,
                None => default_template_root()?,
            };
            info!(template = %template, root = %root.display(), "Generating");

            let mut request = GenerationRequest::new(template, output)
                .with_priority(priority)
                .with_force(force);
            for var in &vars {
                let (name, value) = parse_var(var)?;
                request = request.with_variable(name, value);
            }

            let coordinator = GenerationCoordinator::new(DirectoryBackend::new(root), config);
            let result = coordinator.submit(request).await;

            match format.as_str() {
                "json" => println!(
                    "{}",
                    serde_json::to_string_pretty(&*result).context("Failed to serialize result")?
                ),
                "text" => print_result(&result),
                other => return Err(anyhow!("Invalid output format: {} (must be 'text' or 'json')", other)),
            }
            Ok(result.success)
        }
    }
}

fn default_template_root() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "scaffold")
        .map(|dirs| dirs.data_dir().join("templates"))
        .ok_or_else(|| anyhow!("No home directory; pass --templates"))
}

fn parse_var(spec: &str) -> Result<(String, Value)> {
    let (name, raw) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid --var '{}': expected NAME=VALUE", spec))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("Invalid --var '{}': empty name", spec));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

fn print_result(result: &GenerationResult) {
    if result.success {
        println!(
            "{} {}",
            "Generated".green().bold(),
            result.output_path.display().to_string().bold()
        );
    } else {
        println!(
            "{} {}",
            "Failed".red().bold(),
            result.message.as_deref().unwrap_or("generation failed")
        );
        if let Some(hint) = result.metadata.get("recovery").and_then(Value::as_str) {
            println!("  {} {}", "hint:".yellow(), hint);
        }
    }

    if !result.generated_files.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["File"]);
        for file in &result.generated_files {
            let shown = file.strip_prefix(&result.output_path).unwrap_or(file);
            table.add_row(vec![shown.display().to_string()]);
        }
        println!("{table}");
    }

    if let Some(duration) = result.duration {
        println!("{}", format!("Finished in {}ms", duration.as_millis()).dimmed());
    }
}
