//! Watching for drives coming and going.
//!
//! Drives are mounted as directories under the library root. The watcher
//! polls the root, fingerprints each drive's top-level listing and publishes a
//! fresh [`Availability`] on a `watch` channel whenever anything differs from
//! the last snapshot.

use crate::discovery::Discovery;
use crate::precache::pause;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// What is on the drives right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Availability {
    /// Drive name to a hash of its sorted top-level entry names.
    pub drives: BTreeMap<String, String>,
    /// Display name to category folder. Folders with the same name on more
    /// than one drive are shown as `"{folder} ({drive})"`.
    pub categories: BTreeMap<String, PathBuf>,
    /// First `logo.png` (any case) found at the top of a drive.
    pub logo: Option<PathBuf>,
}
impl Availability {
    /// Take a snapshot of `root`. A missing root has no drives.
    pub fn scan(root: &Path, discovery: &Discovery) -> Self {
        let mut snapshot = Self::default();
        let mut folders: Vec<(String, String, PathBuf)> = Vec::new();
        for drive in list_dirs(root) {
            let Some(drive_name) = drive.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            let Ok(entries) = fs::read_dir(&drive) else {
                tracing::debug!(drive = %drive.display(), "Drive not readable; skipping");
                continue;
            };
            let mut names: Vec<String> =
                entries.filter_map(|e| e.ok()).map(|e| e.file_name().to_string_lossy().to_string()).collect();
            names.sort();
            if snapshot.logo.is_none()
                && let Some(logo) = names.iter().find(|n| n.eq_ignore_ascii_case("logo.png"))
            {
                snapshot.logo = Some(drive.join(logo));
            }
            snapshot.drives.insert(drive_name.clone(), fingerprint(&names));
            for folder in discovery.folders_in(&drive) {
                if let Some(name) = folder.file_name().map(|n| n.to_string_lossy().to_string()) {
                    folders.push((name, drive_name.clone(), folder));
                }
            }
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for (name, _, _) in &folders {
            *counts.entry(name.as_str()).or_default() += 1;
        }
        for (name, drive, path) in &folders {
            let display = if counts[name.as_str()] > 1 { format!("{name} ({drive})") } else { name.clone() };
            snapshot.categories.insert(display, path.clone());
        }
        snapshot
    }
}

fn fingerprint(names: &[String]) -> String {
    let mut hasher = blake3::Hasher::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

fn list_dirs(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_dir()).collect();
    dirs.sort();
    dirs
}

/// Background poller publishing [`Availability`] changes.
pub struct AvailabilityWatcher {
    thread: JoinHandle<()>,
    token: CancellationToken,
}
impl AvailabilityWatcher {
    /// Start polling `root` every `interval`.
    ///
    /// The receiver starts out holding the first snapshot, taken before this
    /// returns, and is marked changed only when a later poll differs.
    pub fn spawn(
        root: PathBuf,
        discovery: Discovery,
        interval: Duration,
        token: CancellationToken,
    ) -> std::io::Result<(Self, watch::Receiver<Availability>)> {
        let initial = Availability::scan(&root, &discovery);
        tracing::info!(root = %root.display(), drives = initial.drives.len(), "Watching for drive changes");
        let (sender, receiver) = watch::channel(initial);
        let stop = token.clone();
        let thread = thread::Builder::new().name("availability".to_string()).spawn(move || {
            while pause(&stop, interval) {
                let current = Availability::scan(&root, &discovery);
                let changed = sender.send_if_modified(|previous| {
                    if *previous == current {
                        return false;
                    }
                    *previous = current;
                    true
                });
                if changed {
                    tracing::info!(root = %root.display(), "Drive availability changed");
                }
                if sender.is_closed() {
                    tracing::debug!("No availability subscribers left; stopping");
                    break;
                }
            }
        })?;
        Ok((Self { thread, token }, receiver))
    }

    pub fn stop(self) {
        self.token.cancel();
        if self.thread.join().is_err() {
            tracing::error!("Availability watcher panicked");
        }
    }
}
