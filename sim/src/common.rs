//! Common utility functions for the simulator binary.
//!
//! This module contains shared utilities for the CLI including:
//! - Logger initialization
//! - Input and output path validation

use std::error::Error;
use std::path::{Path, PathBuf};

/// Initialize the logger with the specified configuration.
///
/// # Arguments
/// * `log_level` - Log level string (off, error, warn, info, debug, trace)
/// * `log_file` - Optional path to log file (logs to stderr if None)
///
/// # Errors
/// Returns an error if the log file cannot be opened or logger initialization fails.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        create_parent_dir(log_path)?;
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// Validate that an input path exists and is a regular file.
///
/// # Errors
/// Returns an error if the path does not exist or is not a file.
pub fn validate_input_file(input: &Path) -> Result<(), Box<dyn Error>> {
    if !input.exists() {
        return Err(format!("Input path '{}' does not exist.", input.display()).into());
    }
    if !input.is_file() {
        return Err(format!("Input path '{}' is not a file.", input.display()).into());
    }
    Ok(())
}

/// Validate an output file path, creating its parent directories if needed.
///
/// # Errors
/// Returns an error if the path is an existing directory or directory creation fails.
pub fn validate_output_file(output: &Path) -> Result<(), Box<dyn Error>> {
    if output.is_dir() {
        return Err(format!(
            "Output path '{}' is a directory, expected a file.",
            output.display()
        )
        .into());
    }
    create_parent_dir(output)
}

/// Validate an output directory, creating it if it does not exist.
pub fn validate_output_dir(output: &Path) -> Result<(), Box<dyn Error>> {
    if !output.exists() {
        std::fs::create_dir_all(output)?;
    } else if !output.is_dir() {
        return Err(format!("Output path '{}' is not a directory.", output.display()).into());
    }
    Ok(())
}

fn create_parent_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
