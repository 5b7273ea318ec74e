//! `quill demo`: the engine against an in-process store.

use std::{sync::Arc, time::Duration};

use {
    anyhow::{Result, bail},
    quill_config::QuillConfig,
    quill_projects::{MemoryRemote, Remote, RemoteOp, file_system},
    quill_sync::{MemoryPreferences, Outcome, ProjectSession, SessionOptions},
};

pub async fn run(config: &QuillConfig) -> Result<()> {
    let remote = Arc::new(MemoryRemote::new());
    remote.seed("notes", "Notes", file_system([("todo.md", "- write docs\n")]));
    remote.seed("slow", "Slow project", file_system([("a.txt", "slow")]));
    remote.seed("fast", "Fast project", file_system([("b.txt", "fast")]));

    let mut options = SessionOptions::from(config);
    options.autosave_enabled = true;
    options.autosave_delay = options.autosave_delay.min(Duration::from_millis(300));
    let delay = options.autosave_delay;

    let session = ProjectSession::new(
        Remote::from_store(Arc::clone(&remote)),
        Arc::new(MemoryPreferences::new()),
        options,
    );

    println!("== coalesced autosave");
    session.open("notes").await?;
    for n in 1..=5 {
        let content = format!("- write docs\n- edit {n}\n");
        session.update_files(file_system([("todo.md", content)]))?;
        tokio::time::sleep(delay / 10).await;
    }
    tokio::time::sleep(delay * 2).await;
    println!(
        "5 edits, {} write(s), store at revision {}",
        remote.write_count("notes"),
        remote.version("notes").unwrap_or_default()
    );

    println!("\n== conflict detection");
    remote.external_write("notes", file_system([("todo.md", "- edited elsewhere\n")]));
    session.update_files(file_system([("todo.md", "- edited here\n")]))?;
    tokio::time::sleep(delay * 2).await;
    let Some(pending) = session.pending_sync() else {
        bail!("expected a pending confirmation");
    };
    println!(
        "write held back: based on revision {}, store is at {}",
        pending.base_version, pending.remote_version
    );
    let confirmed = session.confirm_pending_sync().await?;
    println!(
        "overwrite confirmed, store at revision {} with {:?}",
        confirmed.version,
        remote.files("notes").unwrap_or_default().get("todo.md")
    );

    println!("\n== racing opens");
    remote.set_delay_for(RemoteOp::Get, "slow", Duration::from_millis(300));
    remote.set_delay_for(RemoteOp::Get, "fast", Duration::from_millis(30));
    let first = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.open("slow").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    session.open("fast").await?;
    let first = first.await??;
    println!(
        "open(slow) {}, current project: {}",
        if matches!(first, Outcome::Superseded) {
            "was superseded"
        } else {
            "applied"
        },
        session.snapshot().current_id().unwrap_or("none")
    );

    session.close();
    Ok(())
}
