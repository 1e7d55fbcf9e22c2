//! Small filesystem helpers shared by the repositories

use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::Result;

/// Replace `path` with `contents` by writing a sibling temp file and renaming
/// it over the target, so readers never see a half-written document.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    fs::write(&temp, contents).await?;
    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Regular files directly under `dir` with one of `extensions`, sorted by
/// path. A missing directory yields an empty list.
pub(crate) async fn list_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false);
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// File stem as an owned string
pub(crate) fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_replaces_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("doc.json");

        write_atomic(&target, b"first").await.unwrap();
        write_atomic(&target, b"second").await.unwrap();

        assert_eq!(fs::read_to_string(&target).await.unwrap(), "second");
        let leftovers = list_files(&dir.path().join("nested"), &["tmp"]).await.unwrap();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_list_files_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["b.yaml", "a.YML", "c.txt", "d.md"] {
            fs::write(dir.path().join(name), "x").await.unwrap();
        }
        fs::create_dir(dir.path().join("sub.yaml")).await.unwrap();

        let files = list_files(dir.path(), &["yaml", "yml"]).await.unwrap();
        let names: Vec<String> = files.iter().map(|p| stem(p)).collect();
        assert_eq!(names, vec!["a", "b"]);

        assert!(list_files(&dir.path().join("missing"), &["yaml"]).await.unwrap().is_empty());
    }
}
