use anyhow::{anyhow, Context, Result};
use jetprov_security::verify_sha256_file;
use nix::unistd::{chown, Gid, Uid};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::command::{CommandRunner, Invocation, RunAs};
use crate::fs_utils::{is_nonempty_file, remove_file_if_exists};
use crate::signals::{check_interrupted, InterruptSource, SignalInterrupts};

pub const DOWNLOAD_BACKEND_ENV: &str = "JETPROV_DOWNLOAD_BACKEND";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    CacheHit,
    Downloaded,
}

impl FetchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CacheHit => "cache-hit",
            Self::Downloaded => "downloaded",
        }
    }
}

/// Transfers `url` into `destination`, replacing whatever is there.
pub trait Downloader {
    fn download(&mut self, url: &str, destination: &Path) -> Result<()>;
}

/// Returns `CacheHit` without touching the network when `path` is a
/// non-empty file; otherwise downloads once and requires a non-empty result.
pub fn ensure_cached(path: &Path, url: &str, downloader: &mut dyn Downloader) -> Result<FetchStatus> {
    ensure_cached_verified(path, url, None, downloader)
}

/// Like [`ensure_cached`], additionally checking the SHA-256 digest when one
/// is pinned. A cached file with the wrong digest is fetched again.
pub fn ensure_cached_verified(
    path: &Path,
    url: &str,
    expected_sha256: Option<&str>,
    downloader: &mut dyn Downloader,
) -> Result<FetchStatus> {
    if is_nonempty_file(path) {
        match expected_sha256 {
            None => return Ok(FetchStatus::CacheHit),
            Some(expected) => {
                if verify_sha256_file(path, expected)? {
                    return Ok(FetchStatus::CacheHit);
                }
                warn!(
                    "cached {} does not match its pinned sha256; fetching again",
                    path.display()
                );
                remove_file_if_exists(path).with_context(|| {
                    format!("failed to discard stale cache file: {}", path.display())
                })?;
            }
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache dir: {}", parent.display()))?;
    }

    let part_path = part_path_for(path);
    debug!("downloading {url} -> {}", part_path.display());
    if let Err(err) = downloader.download(url, &part_path) {
        let _ = remove_file_if_exists(&part_path);
        return Err(err).with_context(|| format!("failed to download {url}"));
    }

    if !is_nonempty_file(&part_path) {
        let _ = remove_file_if_exists(&part_path);
        return Err(anyhow!(
            "download produced empty or missing file: {} (from {url})",
            path.display()
        ));
    }

    fs::rename(&part_path, path).with_context(|| {
        format!(
            "failed to move downloaded file into place: {}",
            path.display()
        )
    })?;

    if let Some(expected) = expected_sha256 {
        if !verify_sha256_file(path, expected)? {
            remove_file_if_exists(path).with_context(|| {
                format!("failed to discard corrupt download: {}", path.display())
            })?;
            return Err(anyhow!(
                "sha256 mismatch for {} downloaded from {url}: expected {expected}",
                path.display()
            ));
        }
    }

    Ok(FetchStatus::Downloaded)
}

fn part_path_for(path: &Path) -> PathBuf {
    path.with_file_name(format!(
        "{}.part",
        path.file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("artifact")
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadBackendPreference {
    External,
    InProcess,
}

pub fn parse_download_backend_preference(
    value: Option<&str>,
    env_name: &str,
) -> Result<DownloadBackendPreference> {
    match value.map(str::trim) {
        None | Some("") | Some("external") => Ok(DownloadBackendPreference::External),
        Some("in-process") => Ok(DownloadBackendPreference::InProcess),
        Some(other) => Err(anyhow!(
            "invalid {env_name} value '{other}': expected 'external' or 'in-process'"
        )),
    }
}

/// Downloads with `wget`, optionally as the target user so cache files are
/// owned by them.
pub struct ExternalDownloader<R: CommandRunner> {
    runner: R,
    run_as: RunAs,
}

impl<R: CommandRunner> ExternalDownloader<R> {
    pub fn new(runner: R, run_as: RunAs) -> Self {
        Self { runner, run_as }
    }
}

impl<R: CommandRunner> Downloader for ExternalDownloader<R> {
    fn download(&mut self, url: &str, destination: &Path) -> Result<()> {
        self.runner.run(
            &Invocation::new("wget")
                .arg("--no-verbose")
                .arg("-O")
                .path_arg(destination)
                .arg(url)
                .run_as(self.run_as.clone()),
        )
    }
}

/// In-process HTTP download with a progress callback of
/// `(downloaded_bytes, total_bytes)`. A pending signal stops the transfer
/// between chunks.
pub struct HttpDownloader<P>
where
    P: FnMut(u64, Option<u64>),
{
    client: reqwest::blocking::Client,
    owner: Option<(u32, u32)>,
    progress: P,
    interrupts: Box<dyn InterruptSource>,
}

impl<P> HttpDownloader<P>
where
    P: FnMut(u64, Option<u64>),
{
    pub fn new(progress: P) -> Result<Self> {
        // Large wheels take minutes; only connecting is time-bounded.
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            owner: None,
            progress,
            interrupts: Box::new(SignalInterrupts),
        })
    }

    pub fn with_interrupts(mut self, interrupts: impl InterruptSource + 'static) -> Self {
        self.interrupts = Box::new(interrupts);
        self
    }

    /// Hands downloaded files to `uid:gid`, used when running as root on
    /// behalf of the target user.
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.owner = Some((uid, gid));
        self
    }
}

impl<P> Downloader for HttpDownloader<P>
where
    P: FnMut(u64, Option<u64>),
{
    fn download(&mut self, url: &str, destination: &Path) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("server rejected request: {url}"))?;
        let total = response.content_length();

        let mut file = File::create(destination)
            .with_context(|| format!("failed to create {}", destination.display()))?;
        let mut buffer = vec![0_u8; 256 * 1024];
        let mut downloaded = 0_u64;
        loop {
            check_interrupted(&*self.interrupts)
                .with_context(|| format!("download stopped: {url}"))?;
            let read = response
                .read(&mut buffer)
                .with_context(|| format!("failed reading response body: {url}"))?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .with_context(|| format!("failed to write {}", destination.display()))?;
            downloaded += read as u64;
            (self.progress)(downloaded, total);
        }
        file.flush()
            .with_context(|| format!("failed to flush {}", destination.display()))?;

        if let Some((uid, gid)) = self.owner {
            chown(
                destination,
                Some(Uid::from_raw(uid)),
                Some(Gid::from_raw(gid)),
            )
            .with_context(|| format!("failed to chown {}", destination.display()))?;
        }
        Ok(())
    }
}
