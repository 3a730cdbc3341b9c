//! Snapshot ring: point-in-time copies of the database file. New code —
//! the reference stack has no snapshot feature, so this is designed
//! directly for this purpose; it uses `tokio::fs` for the same reason the
//! rest of the engine is async (file ops suspend without blocking the
//! runtime).

use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot {0:?} not found")]
    NotFound(String),
    #[error("no prior load to revert")]
    NoRevertAvailable,
}

/// Sortable-lexicographic timestamp, `YYYYMMDDHHmmssffff`: four
/// fractional-second digits, which chrono's `%3f`/`%6f`/`%9f` widths don't
/// give directly, so the fraction is computed by hand.
fn snapshot_timestamp() -> String {
    let now = Utc::now();
    let fraction = now.timestamp_subsec_nanos() / 100_000;
    format!("{}{:04}", now.format("%Y%m%d%H%M%S"), fraction)
}

/// `<snapshot_path>/<timestamp>.db`, appended to an ordered list; evicts
/// the oldest entry once the list exceeds `backlog`.
pub async fn save(
    database_file: &Path,
    snapshot_dir: &Path,
    backlog: usize,
) -> Result<String, SnapshotError> {
    fs::create_dir_all(snapshot_dir).await?;
    let name = format!("{}.db", snapshot_timestamp());
    let dest = snapshot_dir.join(&name);
    fs::copy(database_file, &dest).await?;

    let mut names = list(snapshot_dir).await?;
    names.push(name.clone());
    names.sort();
    while names.len() > backlog {
        let oldest = names.remove(0);
        let _ = fs::remove_file(snapshot_dir.join(&oldest)).await;
    }
    Ok(name)
}

/// List snapshot file names, oldest first (lexicographic == chronological).
pub async fn list(snapshot_dir: &Path) -> Result<Vec<String>, SnapshotError> {
    if !snapshot_dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries = fs::read_dir(snapshot_dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if name.ends_with(".db") && name != "temp.db" {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn temp_path(database_file: &Path) -> PathBuf {
    database_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("temp.db")
}

/// Atomically move the live database to `temp.db`, then move `name` into
/// the live path. [`revert`] undoes this.
pub async fn load(
    database_file: &Path,
    snapshot_dir: &Path,
    name: &str,
) -> Result<(), SnapshotError> {
    let snapshot_path = snapshot_dir.join(name);
    if !snapshot_path.exists() {
        return Err(SnapshotError::NotFound(name.to_string()));
    }
    let temp = temp_path(database_file);
    fs::rename(database_file, &temp).await?;
    fs::copy(&snapshot_path, database_file).await?;
    Ok(())
}

/// Swap the current database file back with the `temp.db` left by the most
/// recent [`load`].
pub async fn revert(database_file: &Path) -> Result<(), SnapshotError> {
    let temp = temp_path(database_file);
    if !temp.exists() {
        return Err(SnapshotError::NoRevertAvailable);
    }
    fs::rename(&temp, database_file).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn write_db(path: &Path, contents: &[u8]) {
        let mut f = fs::File::create(path).await.unwrap();
        f.write_all(contents).await.unwrap();
    }

    #[tokio::test]
    async fn save_then_load_restores_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("iplchat.db");
        let snap_dir = dir.path().join("snapshots");
        write_db(&db_path, b"v1").await;

        let name = save(&db_path, &snap_dir, 10).await.unwrap();

        write_db(&db_path, b"v2-live-changes").await;
        load(&db_path, &snap_dir, &name).await.unwrap();

        let restored = fs::read(&db_path).await.unwrap();
        assert_eq!(restored, b"v1");
    }

    #[tokio::test]
    async fn revert_restores_pre_load_state() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("iplchat.db");
        let snap_dir = dir.path().join("snapshots");
        write_db(&db_path, b"v1").await;
        let name = save(&db_path, &snap_dir, 10).await.unwrap();

        write_db(&db_path, b"v2-live").await;
        load(&db_path, &snap_dir, &name).await.unwrap();
        revert(&db_path).await.unwrap();

        let restored = fs::read(&db_path).await.unwrap();
        assert_eq!(restored, b"v2-live");
    }

    #[tokio::test]
    async fn backlog_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("iplchat.db");
        let snap_dir = dir.path().join("snapshots");
        write_db(&db_path, b"v").await;

        for _ in 0..5 {
            save(&db_path, &snap_dir, 3).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let names = list(&snap_dir).await.unwrap();
        assert_eq!(names.len(), 3);
    }
}
