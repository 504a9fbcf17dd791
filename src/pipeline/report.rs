//! JSON run report written to `build/build-report.json`.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use super::{BuildOutcome, RunStatistics, StageOutcome};

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: &'static str,
    pub started_at_utc: String,
    pub finished_at_utc: String,
    pub stages: Vec<StageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StageReport {
    pub name: &'static str,
    pub outcome: StageOutcome,
    pub elapsed_ms: u128,
}

#[derive(Debug, Serialize)]
pub struct PackageReport {
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

impl RunReport {
    pub fn new(
        run_id: String,
        started_at_utc: String,
        outcome: &BuildOutcome,
        stats: &RunStatistics,
    ) -> Result<Self> {
        let (status, error, package) = match outcome {
            BuildOutcome::Success { package } => ("success", None, Some(package)),
            BuildOutcome::Failed(err) => ("failed", Some(err.to_string()), None),
            BuildOutcome::Stopped => ("stopped", None, None),
        };
        let package = match package {
            Some(path) => {
                let (sha256, size_bytes) = sha256_file(path)?;
                Some(PackageReport {
                    path: path.clone(),
                    sha256,
                    size_bytes,
                })
            }
            None => None,
        };
        Ok(Self {
            run_id,
            status,
            started_at_utc,
            finished_at_utc: now_utc_compact(),
            stages: stats
                .stages
                .iter()
                .map(|s| StageReport {
                    name: s.name,
                    outcome: s.outcome,
                    elapsed_ms: s.elapsed.as_millis(),
                })
                .collect(),
            package,
            error,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
            .with_context(|| format!("writing build report '{}'", path.display()))
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path without parent '{}'", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("creating parent directory '{}'", parent.display()))?;
    let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
    let payload = serde_json::to_vec_pretty(value).context("serializing build report")?;
    fs::write(&tmp, payload).with_context(|| format!("writing temp file '{}'", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| {
        format!(
            "renaming temp file '{}' to '{}'",
            tmp.display(),
            path.display()
        )
    })?;
    Ok(())
}

pub(crate) fn now_utc_compact() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// Sortable run identifier: UTC timestamp, process id and sub-second nanos.
pub(crate) fn new_run_id() -> String {
    let nanos = OffsetDateTime::now_utc().nanosecond();
    format!("{}-{:x}-{:08x}", now_utc_compact(), std::process::id(), nanos)
}

pub(crate) fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}
