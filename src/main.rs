//! Stepwise CLI Entry Point
//!
//! Loads a YAML pipeline and runs it.
//!
//! # Usage
//!
//! ```bash
//! # Run a pipeline
//! stepwise pipeline.yaml
//!
//! # Only calibration steps, skipping slow ones
//! stepwise pipeline.yaml --tags calib --ignore-tags slow
//!
//! # Continue an interrupted run from its checkpoint
//! stepwise pipeline.yaml --resume
//!
//! # Start at the third selected step
//! stepwise pipeline.yaml --start 2
//! ```

use std::env;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info, warn};

use stepwise::environment::str_to_bool;
use stepwise::workflow::load_pipeline;
use stepwise::{Pipeline, PipelineError, RunOptions, WorkRegistry, APP_NAME, VERSION};

/// Default pipeline file used when none is specified.
const DEFAULT_PIPELINE: &str = "pipeline.yaml";

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    pipeline_path: String,
    run_tags: Vec<String>,
    ignore_tags: Vec<String>,
    resume: bool,
    start_idx: Option<usize>,
    run_name: Option<String>,
    ignore_errors: Option<bool>,
    ignore_exceptions: Option<bool>,
    strict_checkpoint: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline_path: DEFAULT_PIPELINE.to_string(),
            run_tags: Vec::new(),
            ignore_tags: Vec::new(),
            resume: false,
            start_idx: None,
            run_name: None,
            ignore_errors: None,
            ignore_exceptions: None,
            strict_checkpoint: false,
            verbose: false,
        }
    }
}

impl Config {
    fn run_options(&self) -> RunOptions {
        let mut options = RunOptions::new()
            .run_tags(self.run_tags.iter().cloned())
            .ignore_tags(self.ignore_tags.iter().cloned())
            .resume(self.resume)
            .fail_on_checkpoint_error(self.strict_checkpoint);

        if let Some(idx) = self.start_idx {
            options = options.start_idx(idx);
        }
        if let Some(name) = &self.run_name {
            options = options.run_name(name.clone());
        }
        if let Some(ignore) = self.ignore_errors {
            options = options.ignore_errors(ignore);
        }
        if let Some(ignore) = self.ignore_exceptions {
            options = options.ignore_exceptions(ignore);
        }
        options
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Resumable Step Pipeline Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: stepwise [OPTIONS] <PIPELINE_FILE>");
    println!();
    println!("Arguments:");
    println!("  <PIPELINE_FILE>            Path to pipeline YAML file");
    println!();
    println!("Options:");
    println!("  --tags A,B                 Only run steps with one of these tags");
    println!("  --ignore-tags A,B          Skip steps with any of these tags");
    println!("  --resume                   Continue from the saved checkpoint");
    println!("  --start N                  Start at index N of the selected steps");
    println!("  --run-name NAME            Name of the checkpoint file for this run");
    println!("  --ignore-errors BOOL       Override every step's ignore_errors");
    println!("  --ignore-exceptions BOOL   Override every step's ignore_exceptions");
    println!("  --strict-checkpoint        Abort when a checkpoint cannot be written");
    println!("  --verbose                  Enable debug logging");
    println!("  --help                     Show this help message");
    println!("  --version                  Show version information");
    println!();
    println!("Examples:");
    println!("  stepwise pipeline.yaml");
    println!("  stepwise pipeline.yaml --tags calib --ignore-tags slow");
    println!("  stepwise pipeline.yaml --resume --run-name night1");
}

/// Splits a comma-separated tag list.
fn parse_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Returns the value following option `name`.
fn option_value<'a>(args: &'a [String], i: &mut usize, name: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", name))
}

fn parse_bool(value: &str, name: &str) -> Result<bool, String> {
    str_to_bool(value).ok_or_else(|| format!("Invalid {} value: {}", name, value))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => config.verbose = true,
            "--resume" => config.resume = true,
            "--strict-checkpoint" => config.strict_checkpoint = true,
            "--tags" => {
                config.run_tags = parse_tags(option_value(args, &mut i, "--tags")?);
            }
            "--ignore-tags" => {
                config.ignore_tags = parse_tags(option_value(args, &mut i, "--ignore-tags")?);
            }
            "--start" => {
                let value = option_value(args, &mut i, "--start")?;
                let idx = value
                    .parse()
                    .map_err(|_| format!("Invalid start value: {}", value))?;
                config.start_idx = Some(idx);
            }
            "--run-name" => {
                config.run_name = Some(option_value(args, &mut i, "--run-name")?.to_string());
            }
            "--ignore-errors" => {
                let value = option_value(args, &mut i, "--ignore-errors")?;
                config.ignore_errors = Some(parse_bool(value, "--ignore-errors")?);
            }
            "--ignore-exceptions" => {
                let value = option_value(args, &mut i, "--ignore-exceptions")?;
                config.ignore_exceptions = Some(parse_bool(value, "--ignore-exceptions")?);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                match positional_index {
                    0 => config.pipeline_path = arg.clone(),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Builds the pipeline from YAML, or from its checkpoint when resuming.
fn prepare_pipeline(
    config: &Config,
    registry: &WorkRegistry,
) -> Result<Pipeline, PipelineError> {
    let pipeline = load_pipeline(&config.pipeline_path, registry)?;
    if !config.resume {
        return Ok(pipeline);
    }

    let Some(checkpoint) = pipeline.checkpoint_path(config.run_name.as_deref()) else {
        warn!("No 'log' path configured; nothing to resume, starting from the beginning");
        return Ok(pipeline);
    };
    if !checkpoint.exists() {
        warn!(
            "No checkpoint at {}; starting from the beginning",
            checkpoint.display()
        );
        return Ok(pipeline);
    }

    info!("Resuming from checkpoint: {}", checkpoint.display());
    Pipeline::load(&checkpoint, registry)
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let registry = WorkRegistry::with_builtins();
    let mut pipeline = prepare_pipeline(&config, &registry).map_err(|e| {
        error!("Failed to load pipeline: {}", e);
        e
    })?;

    info!(
        "Pipeline '{}' loaded: {} steps",
        pipeline.name(),
        pipeline.steps().len()
    );

    let outcome = pipeline.run(config.run_options());

    println!();
    print!("{}", pipeline.timeline().summary());

    match outcome {
        Ok(report) => {
            println!(
                "{} {} steps executed",
                report.status.as_str().to_uppercase().green().bold(),
                report.executed.len()
            );
            Ok(())
        }
        Err(e) => {
            let position = e
                .position()
                .map(|p| format!(" at run_step_idx {}", p))
                .unwrap_or_default();
            println!("{}{}", "ABORTED".red().bold(), position);
            Err(e.into())
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("stepwise")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_defaults() {
        let config = parse_arguments(&args(&[])).unwrap();
        assert_eq!(config.pipeline_path, DEFAULT_PIPELINE);
        assert!(!config.resume);
        assert!(config.ignore_errors.is_none());
    }

    #[test]
    fn test_parse_full_command_line() {
        let config = parse_arguments(&args(&[
            "night.yaml",
            "--tags",
            "calib, science",
            "--ignore-tags",
            "slow",
            "--resume",
            "--start",
            "2",
            "--run-name",
            "n1",
            "--ignore-errors",
            "yes",
            "--ignore-exceptions",
            "f",
            "--strict-checkpoint",
        ]))
        .unwrap();

        assert_eq!(config.pipeline_path, "night.yaml");
        assert_eq!(config.run_tags, vec!["calib", "science"]);
        assert_eq!(config.ignore_tags, vec!["slow"]);
        assert!(config.resume);
        assert_eq!(config.start_idx, Some(2));
        assert_eq!(config.run_name.as_deref(), Some("n1"));
        assert_eq!(config.ignore_errors, Some(true));
        assert_eq!(config.ignore_exceptions, Some(false));
        assert!(config.strict_checkpoint);

        let options = config.run_options();
        assert_eq!(options.start_idx, Some(2));
        assert!(options.fail_on_checkpoint_error);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_arguments(&args(&["--start"])).is_err());
        assert!(parse_arguments(&args(&["--start", "x"])).is_err());
        assert!(parse_arguments(&args(&["--ignore-errors", "maybe"])).is_err());
        assert!(parse_arguments(&args(&["--bogus"])).is_err());
        assert!(parse_arguments(&args(&["a.yaml", "b.yaml"])).is_err());
    }
}
