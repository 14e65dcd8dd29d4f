//! rsync transport.
//!
//! The build tree is mirrored with `--delete --checksum --itemize-changes`
//! and the itemized output becomes the `TransferReport`. Checksums rather
//! than mtimes decide what counts as changed, so re-staging identical
//! content on every run does not trigger reloads.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info};
use zonepub_core::{
    CollaboratorError, TransferAction, TransferEntry, TransferReport, Transport, TransportConfig,
};

use crate::runner::CommandRunner;

#[derive(Debug, Clone)]
pub struct RsyncTransport {
    runner: CommandRunner,
    rsync: String,
    destination: String,
    excludes: Vec<String>,
}

impl RsyncTransport {
    pub fn new(config: &TransportConfig, timeout: Option<Duration>) -> Self {
        Self {
            runner: CommandRunner::new().with_timeout(timeout),
            rsync: config.rsync.clone(),
            destination: config.destination.clone(),
            excludes: config.excludes.clone(),
        }
    }

    fn argv(&self, source: &Path) -> Vec<String> {
        let mut argv = vec![
            self.rsync.clone(),
            "--recursive".to_string(),
            "--links".to_string(),
            "--perms".to_string(),
            "--times".to_string(),
            "--checksum".to_string(),
            "--delete".to_string(),
            "--itemize-changes".to_string(),
        ];
        argv.extend(self.excludes.iter().map(|p| format!("--exclude={p}")));
        // Trailing slash: copy the contents, not the directory itself.
        let mut source = source.to_string_lossy().into_owned();
        if !source.ends_with('/') {
            source.push('/');
        }
        argv.push(source);
        argv.push(self.destination.clone());
        argv
    }
}

/// Parse `rsync --itemize-changes` output into transfer entries.
///
/// Only regular files whose content was sent or deleted are reported.
/// Directory lines and attribute-only updates (`.f..t......`) are skipped.
pub fn parse_itemized(output: &str) -> TransferReport {
    let mut entries = Vec::new();

    for line in output.lines() {
        let Some((code, path)) = line.split_once(' ') else {
            continue;
        };
        let path = path.trim_start();
        if path.is_empty() || path.ends_with('/') {
            continue;
        }

        if code == "*deleting" {
            entries.push(TransferEntry::new(path, TransferAction::Deleted));
            continue;
        }

        let mut chars = code.chars();
        let (Some(update), Some(kind)) = (chars.next(), chars.next()) else {
            continue;
        };
        if kind != 'f' || !matches!(update, '<' | '>' | 'c') {
            continue;
        }
        let attrs = &code[2..];
        let action = if !attrs.is_empty() && attrs.chars().all(|c| c == '+') {
            TransferAction::Added
        } else {
            TransferAction::Modified
        };
        entries.push(TransferEntry::new(PathBuf::from(path), action));
    }

    TransferReport::new(entries)
}

#[async_trait]
impl Transport for RsyncTransport {
    fn destination(&self) -> String {
        self.destination.clone()
    }

    async fn sync(&self, source: &Path) -> Result<TransferReport, CollaboratorError> {
        if self.destination.is_empty() {
            return Err(CollaboratorError::failed("rsync", "no destination configured"));
        }
        let start = Instant::now();
        let argv = self.argv(source);
        debug!(command = %argv.join(" "), "starting transfer");

        let output = self
            .runner
            .run(&argv)
            .await
            .map_err(|e| e.into_collaborator("rsync"))?;
        if !output.success {
            return Err(CollaboratorError::failed(
                "rsync",
                format!("exit code {}: {}", output.exit_code, output.stderr.trim()),
            ));
        }

        let report = parse_itemized(&output.stdout_lossy());
        info!(
            destination = %self.destination,
            entries = report.entries.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "transfer complete"
        );
        Ok(report)
    }
}
