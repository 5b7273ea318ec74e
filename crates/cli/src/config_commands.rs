use std::path::Path;

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    quill_config::{QuillConfig, Severity},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the effective configuration and report errors/warnings.
    Check,
    /// Print the effective configuration as JSON.
    Show,
    /// Write a default `quill.toml` into the config directory.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config(
    action: ConfigAction,
    config: &QuillConfig,
    config_dir: Option<&Path>,
) -> Result<()> {
    match action {
        ConfigAction::Check => check(config),
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
            Ok(())
        },
        ConfigAction::Init { force } => init(config_dir, force),
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(config: &QuillConfig) -> Result<()> {
    let result = quill_config::validate(config);

    for d in &result.diagnostics {
        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
        };
        eprintln!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message);
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if !result.diagnostics.is_empty() {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn init(config_dir: Option<&Path>, force: bool) -> Result<()> {
    let Some(dir) = config_dir
        .map(Path::to_path_buf)
        .or_else(quill_config::config_dir)
    else {
        bail!("no config directory available, pass --config-dir");
    };
    let path = dir.join("quill.toml");
    if path.exists() && !force {
        bail!("{} already exists, use --force to overwrite", path.display());
    }
    quill_config::save_config(&QuillConfig::default(), &path)?;
    eprintln!("Wrote {}", path.display());
    Ok(())
}
