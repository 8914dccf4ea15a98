//! Config validation CLI tool
//!
//! Validates an epochsync configuration file and reports any errors.

use epochsync_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates an epochsync configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match epochsync_config::load_config(&config_path) {
        Ok(settings) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Clock:");
            println!("  Time URL:       {}", settings.clock.time_url);
            println!("  Time field:     {}", settings.clock.time_field);
            println!("  Sync interval:  {}", format_duration(settings.clock.sync_interval));
            println!("  Poll interval:  {}", format_duration(settings.clock.poll_interval));
            println!();
            println!("Epoch:");
            println!("  Pre-epoch:      {}", format_duration(settings.epoch.pre_epoch_duration));
            println!("  Cooldown:       {}", format_duration(settings.epoch.cooldown_duration));
            println!("  Tick period:    {}ms", settings.epoch.tick_period.as_millis());
            println!("  Debounce:       {}", format_duration(settings.epoch.warning_debounce));

            if !settings.epoch.warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &settings.epoch.warnings {
                    println!(
                        "  - {}s before close ({:?}){}",
                        warning.seconds_before,
                        warning.severity,
                        warning
                            .message_template
                            .as_ref()
                            .map(|m| format!(": {}", m))
                            .unwrap_or_default()
                    );
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration is invalid");
            eprintln!();
            match e {
                epochsync_config::ConfigError::ValidationFailed { errors } => {
                    for error in errors {
                        eprintln!("  - {}", error);
                    }
                }
                other => eprintln!("  {}", other),
            }
            ExitCode::from(1)
        }
    }
}
