//! Precache jobs.
//!
//! Two kinds of sweep keep the conversion cache warm ahead of the viewer:
//!
//! - **Foreground** runs when a folder is opened: every spreadsheet directly
//!   inside it, back to back, no pauses.
//! - **Background** runs when drives change: the whole library, slowly, with a
//!   pause after every conversion so on-demand requests get a look in at the
//!   conversion lock.
//!
//! At most one job of each kind is alive. Starting a job cancels the previous
//! job of the same kind and waits (briefly) for it to wind down first.

use crate::discovery::Discovery;
use kiosk_render::{ConversionPipeline, Outcome};
use kiosk_workbook::PageLabel;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

const CANCEL_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Foreground,
    Background,
}
impl JobKind {
    fn slot(self) -> usize {
        match self {
            Self::Foreground => 0,
            Self::Background => 1,
        }
    }

    fn thread_name(self) -> &'static str {
        match self {
            Self::Foreground => "precache-foreground",
            Self::Background => "precache-background",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Spreadsheets directly inside one folder.
    Directory(PathBuf),
    /// Every spreadsheet in the library below this root.
    Subtree(PathBuf),
}

/// What a finished (or cancelled) job got through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub documents: usize,
    pub converted: usize,
    pub cached: usize,
    /// Pages with no matching sheet.
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

type Completion = Arc<(Mutex<Option<JobSummary>>, Condvar)>;

/// Caller's view of a started job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    kind: JobKind,
    id: u64,
    token: CancellationToken,
    completion: Completion,
}
impl JobHandle {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.completion.0.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Block until the job ends or `timeout` passes.
    pub fn wait(&self, timeout: Duration) -> Option<JobSummary> {
        let (summary, finished) = &*self.completion;
        let guard = summary.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) =
            finished.wait_timeout_while(guard, timeout, |s| s.is_none()).unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }
}

struct Running {
    handle: JobHandle,
    thread: JoinHandle<()>,
}

/// The part of a job that does the actual work; shared by every job thread.
struct Sweeper {
    pipeline: ConversionPipeline,
    discovery: Discovery,
    labels: Vec<PageLabel>,
    pacing: Duration,
}
impl Sweeper {
    #[instrument(skip_all, fields(kind = ?kind, job = id))]
    fn run(&self, kind: JobKind, id: u64, scope: &Scope, token: &CancellationToken) -> JobSummary {
        let started = Instant::now();
        let documents = match scope {
            Scope::Directory(dir) => self.discovery.spreadsheets_in(dir),
            Scope::Subtree(root) => self.discovery.walk(root),
        };
        tracing::info!(?scope, documents = documents.len(), "Precache started");
        let mut summary = JobSummary::default();
        'documents: for document in &documents {
            if token.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            summary.documents += 1;
            for label in &self.labels {
                if token.is_cancelled() {
                    summary.cancelled = true;
                    break 'documents;
                }
                let converted = self.page(document, label, token, &mut summary);
                if kind == JobKind::Background && converted && !pause(token, self.pacing) {
                    summary.cancelled = true;
                    break 'documents;
                }
            }
        }
        if summary.cancelled {
            tracing::info!(elapsed = ?started.elapsed(), ?summary, "Precache cancelled");
        } else {
            tracing::info!(elapsed = ?started.elapsed(), ?summary, "Precache complete");
        }
        summary
    }

    /// One document x page. Returns whether any tool work was attempted.
    fn page(&self, document: &Path, label: &PageLabel, token: &CancellationToken, summary: &mut JobSummary) -> bool {
        let Some(sheet) = self.pipeline.resolver().find(document, label) else {
            summary.skipped += 1;
            return false;
        };
        tracing::debug!(document = %document.display(), %label, %sheet, "Precaching page");
        match self.pipeline.convert(document, &sheet, token) {
            Outcome::Cached(_) => {
                summary.cached += 1;
                false
            },
            Outcome::Converted(_) => {
                summary.converted += 1;
                true
            },
            Outcome::Cancelled => {
                summary.cancelled = true;
                false
            },
            Outcome::Failed(err) => {
                tracing::warn!(document = %document.display(), %label, error = ?err, "Precache of page failed; continuing");
                summary.failed += 1;
                true
            },
        }
    }
}

/// Owns the foreground and background precache jobs.
pub struct PrecacheScheduler {
    sweeper: Arc<Sweeper>,
    jobs: Mutex<HashMap<JobKind, Running>>,
    /// Serializes replacements of one kind without blocking the other.
    replacing: [Mutex<()>; 2],
    next_id: AtomicU64,
    join_timeout: Duration,
}
impl PrecacheScheduler {
    pub fn new(
        pipeline: ConversionPipeline,
        discovery: Discovery,
        labels: Vec<PageLabel>,
        pacing: Duration,
        join_timeout: Duration,
    ) -> Self {
        Self {
            sweeper: Arc::new(Sweeper { pipeline, discovery, labels, pacing }),
            jobs: Mutex::new(HashMap::new()),
            replacing: Default::default(),
            next_id: AtomicU64::new(1),
            join_timeout,
        }
    }

    /// Start a job, replacing any live job of the same kind.
    ///
    /// The previous job is cancelled before the new one exists, then given up
    /// to the join timeout to finish. A job stuck inside a long tool run is
    /// left to notice its cancellation on its own. Only starts of the same
    /// kind wait on each other.
    pub fn start(&self, kind: JobKind, scope: Scope) -> JobHandle {
        let _replacing = self.replacing[kind.slot()].lock().unwrap_or_else(|e| e.into_inner());
        let previous = self.jobs.lock().unwrap_or_else(|e| e.into_inner()).remove(&kind);
        if let Some(previous) = previous {
            previous.handle.token.cancel();
            self.join(previous);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = JobHandle { kind, id, token: CancellationToken::new(), completion: Completion::default() };
        let sweeper = self.sweeper.clone();
        let job = handle.clone();
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let spawned = thread::Builder::new().name(kind.thread_name().to_string()).spawn(move || {
            let summary = sweeper.run(job.kind, job.id, &scope, &job.token);
            let (slot, finished) = &*job.completion;
            *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(summary);
            finished.notify_all();
        });
        match spawned {
            Ok(thread) => {
                jobs.insert(kind, Running { handle: handle.clone(), thread });
            },
            Err(err) => {
                // No thread, no job: report it as cancelled straight away.
                tracing::error!(?kind, error = %err, "Could not spawn precache thread");
                handle.token.cancel();
                let (slot, finished) = &*handle.completion;
                *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(JobSummary { cancelled: true, ..Default::default() });
                finished.notify_all();
            },
        }
        handle
    }

    /// Signal a job to stop. Does not wait for it.
    pub fn cancel(&self, handle: &JobHandle) {
        handle.token.cancel();
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if jobs.get(&handle.kind).is_some_and(|running| running.handle.id == handle.id) {
            jobs.remove(&handle.kind);
        }
    }

    /// Signal whichever job of `kind` is live, if any.
    pub fn cancel_kind(&self, kind: JobKind) {
        if let Some(running) = self.jobs.lock().unwrap_or_else(|e| e.into_inner()).remove(&kind) {
            running.handle.token.cancel();
        }
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Cancel every job and wait (bounded) for each to stop.
    pub fn shutdown(&self) {
        let running: Vec<Running> = self.jobs.lock().unwrap_or_else(|e| e.into_inner()).drain().map(|(_, r)| r).collect();
        for job in &running {
            job.handle.token.cancel();
        }
        for job in running {
            self.join(job);
        }
    }

    fn join(&self, running: Running) {
        let deadline = Instant::now() + self.join_timeout;
        while !running.thread.is_finished() && Instant::now() < deadline {
            thread::sleep(CANCEL_POLL);
        }
        let Running { handle, thread } = running;
        if thread.is_finished() {
            if thread.join().is_err() {
                tracing::error!(kind = ?handle.kind, job = handle.id, "Precache thread panicked");
            }
        } else {
            tracing::warn!(kind = ?handle.kind, job = handle.id, "Previous precache job still winding down; detaching");
        }
    }
}
impl Drop for PrecacheScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sleep for `duration` unless `token` fires first. Returns `false` if it did.
pub(crate) fn pause(token: &CancellationToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(CANCEL_POLL.min(deadline - now));
    }
}
