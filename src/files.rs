//! File-system plumbing around the runner: listing a directory, reading
//! every file in it, and generating fixture directories.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::event::BatchSummary;
use crate::runner::{ResultStream, Runner};

/// Outcome of reading one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRead {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Regular files directly inside `dir`, sorted by path.
pub async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    debug!(dir = %dir.display(), files = files.len(), "listed directory");
    Ok(files)
}

/// Read every file in `paths` concurrently.
pub fn read_all(runner: &Runner, paths: Vec<PathBuf>) -> ResultStream<FileRead, io::Error> {
    runner.for_each_file(paths, |path: PathBuf| async move {
        let data = tokio::fs::read(&path).await?;
        Ok::<_, io::Error>(FileRead {
            path,
            bytes: data.len() as u64,
        })
    })
}

/// Content of a fixture file: byte `i` holds `i` truncated to eight bits.
pub fn fixture_pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| i as u8).collect()
}

/// Name of the `index`-th fixture file.
pub fn fixture_name(index: usize) -> String {
    format!("a{index}.bin")
}

/// Recreate `dir` with `count` identical fixture files of `size` bytes.
///
/// The first file is written directly; the rest are copies of it, run as one
/// batch so a large `count` survives hitting the handle limit.
pub async fn generate_fixtures(
    runner: &Runner,
    dir: &Path,
    count: usize,
    size: usize,
) -> Result<BatchSummary> {
    if tokio::fs::try_exists(dir).await? {
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await?;

    let seed = dir.join(fixture_name(0));
    if count > 0 {
        tokio::fs::write(&seed, fixture_pattern(size)).await?;
    }

    let targets: Vec<PathBuf> = (1..count).map(|i| dir.join(fixture_name(i))).collect();
    let (_, summary) = runner
        .run(targets, move |target: PathBuf| {
            let seed = seed.clone();
            async move { tokio::fs::copy(&seed, &target).await }
        })
        .collect()
        .await?;

    info!(
        dir = %dir.display(),
        count,
        size,
        retries = summary.retries(),
        "fixtures generated"
    );
    Ok(summary)
}
