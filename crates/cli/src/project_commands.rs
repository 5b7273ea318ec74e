use std::sync::Arc;

use {
    anyhow::{Context, Result, bail},
    quill_config::{QuillConfig, Severity},
    quill_projects::{FileSystem, HttpRemote, NewProject, Remote},
    quill_sync::{FilePreferences, Outcome, ProjectSession, SessionOptions},
    tracing::debug,
    url::Url,
};

/// Session against the configured HTTP store, remembering the last project
/// under the data directory.
fn build_session(config: &QuillConfig) -> Result<Arc<ProjectSession>> {
    let validation = quill_config::validate(config);
    for d in &validation.diagnostics {
        if d.severity == Severity::Warning {
            eprintln!("warning: {}: {}", d.path, d.message);
        }
    }
    if validation.has_errors() {
        bail!("invalid configuration, run `quill config check` for details");
    }

    let base_url = Url::parse(&config.remote.base_url)
        .with_context(|| format!("invalid remote url `{}`", config.remote.base_url))?;
    let remote = Arc::new(HttpRemote::new(base_url, config.remote.request_timeout())?);
    let data_dir = quill_config::data_dir(config);
    debug!(data_dir = %data_dir.display(), "using data directory");
    let prefs = Arc::new(FilePreferences::in_dir(&data_dir));

    Ok(ProjectSession::new(
        Remote::from_store(remote),
        prefs,
        SessionOptions::from(config),
    ))
}

/// Parse repeated `PATH=CONTENT` arguments.
fn parse_files(args: &[String]) -> Result<FileSystem> {
    let mut files = FileSystem::new();
    for arg in args {
        let Some((path, content)) = arg.split_once('=') else {
            bail!("expected PATH=CONTENT, got `{arg}`");
        };
        let path = path.trim();
        if path.is_empty() {
            bail!("empty path in `{arg}`");
        }
        files.insert(path.to_string(), content.to_string());
    }
    Ok(files)
}

fn applied<T>(outcome: Outcome<T>) -> Result<T> {
    match outcome {
        Outcome::Applied(value) => Ok(value),
        Outcome::Superseded => bail!("operation was superseded"),
    }
}

pub async fn list(config: &QuillConfig) -> Result<()> {
    let session = build_session(config)?;
    let projects = session.refresh_projects().await?;
    if projects.is_empty() {
        println!("No projects.");
        return Ok(());
    }
    for p in &projects {
        println!("  {}  {}  ({} files)", p.id, p.name, p.file_count);
    }
    Ok(())
}

pub async fn create(
    config: &QuillConfig,
    name: String,
    description: String,
    files: &[String],
) -> Result<()> {
    let files = parse_files(files)?;
    let session = build_session(config)?;
    let meta = applied(
        session
            .create(NewProject {
                name,
                description,
                files,
            })
            .await?,
    )?;
    println!("Created '{}' ({})", meta.name, meta.id);
    Ok(())
}

pub async fn open(config: &QuillConfig, id: &str) -> Result<()> {
    let session = build_session(config)?;
    let meta = applied(session.open(id).await?)?;
    println!("Opened '{}' ({}), revision {}", meta.name, meta.id, meta.version);
    for path in meta.files.keys() {
        println!("  {path}");
    }
    if let Ok(Outcome::Applied(git)) = session.refresh_git_status().await {
        if git.initialized {
            println!("git: {} ({} changed)", git.branch, git.changed_files.len());
        } else {
            println!("git: not initialized");
        }
    }
    Ok(())
}

pub async fn delete(config: &QuillConfig, id: &str) -> Result<()> {
    let session = build_session(config)?;
    // Deleting the remembered project should also forget it.
    session.restore().await;
    applied(session.delete(id).await?)?;
    println!("Deleted {id}");
    Ok(())
}

pub async fn duplicate(config: &QuillConfig, id: &str, name: Option<&str>) -> Result<()> {
    let session = build_session(config)?;
    let copy = session.duplicate(id, name).await?;
    println!("Duplicated {id} as '{}' ({})", copy.name, copy.id);
    Ok(())
}

pub async fn status(config: &QuillConfig) -> Result<()> {
    let session = build_session(config)?;
    if session.poll_health().await
        && session.snapshot().is_open()
        && let Err(e) = session.refresh_git_status().await
    {
        debug!(error = %e, "git status unavailable");
    }
    println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_arguments() {
        let files = parse_files(&[
            "src/main.rs=fn main() {}".to_string(),
            "README.md=a=b".to_string(),
        ])
        .unwrap();
        assert_eq!(files["src/main.rs"], "fn main() {}");
        assert_eq!(files["README.md"], "a=b");
    }

    #[test]
    fn rejects_malformed_file_arguments() {
        assert!(parse_files(&["no-separator".to_string()]).is_err());
        assert!(parse_files(&[" =content".to_string()]).is_err());
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut config = QuillConfig::default();
        config.remote.base_url = "ftp://example.com/".into();
        assert!(build_session(&config).is_err());
    }
}
