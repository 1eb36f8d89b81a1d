//! `kiosk`: drive the conversion cache and precache jobs from a shell.

mod error;

use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::{OptionExt, ResultExt};
use kiosk_config::Config;
use kiosk_library::{Availability, AvailabilityWatcher, Discovery, JobHandle, JobKind, JobSummary, Kiosk, Scope};
use kiosk_render::Outcome;
use kiosk_workbook::PageLabel;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kiosk", version, about = "Document kiosk conversion cache and precache tools", long_about = None)]
struct Cli {
    /// Config file (TOML, YAML or JSON by extension)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the documents the viewer offers in a folder
    List { directory: PathBuf },
    /// Print the worksheet that holds a page
    Resolve {
        document: PathBuf,
        #[arg(default_value = PageLabel::FRONT)]
        label: String,
    },
    /// Convert one page (if needed) and print the cached image path
    Convert {
        document: PathBuf,
        #[arg(default_value = PageLabel::FRONT)]
        label: String,
    },
    /// Warm the conversion cache for a folder
    Precache {
        directory: PathBuf,
        /// Walk every folder below, slowly, instead of just this one
        #[arg(long)]
        subtree: bool,
    },
    /// Watch the library root and precache whenever drives change
    Watch,
    /// Print the effective configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = ?err, "kiosk failed");
            eprintln!("Error: {}", *err);
            ExitCode::FAILURE
        },
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let kiosk = || Kiosk::from_config(&config).or_raise(|| ErrorKind::Startup);
    match cli.command {
        Command::Config => println!("{config:#?}"),
        Command::List { directory } => {
            let discovery = Discovery::from(&config.library);
            for document in discovery.documents_in(&directory) {
                if let Some(kind) = discovery.classify(&document) {
                    println!("{kind:?}\t{}", document.display());
                }
            }
        },
        Command::Resolve { document, label } => {
            let label = PageLabel::new(label);
            let sheet = kiosk()?.resolve_page(&document, &label).ok_or_raise(|| ErrorKind::NoSheet(label.to_string()))?;
            println!("{sheet}");
        },
        Command::Convert { document, label } => {
            let kiosk = kiosk()?;
            let label = PageLabel::new(label);
            let sheet = kiosk.resolve_page(&document, &label).ok_or_raise(|| ErrorKind::NoSheet(label.to_string()))?;
            match kiosk.convert(&document, &sheet, &CancellationToken::new()) {
                Outcome::Cached(path) | Outcome::Converted(path) => println!("{}", path.display()),
                Outcome::Cancelled => exn::bail!(ErrorKind::Interrupted),
                Outcome::Failed(err) => return Err(err.raise(ErrorKind::Conversion(document))),
            }
        },
        Command::Precache { directory, subtree } => {
            let (scope, kind) = if subtree {
                (Scope::Subtree(directory), JobKind::Background)
            } else {
                (Scope::Directory(directory), JobKind::Foreground)
            };
            let summary = wait(&kiosk()?.start_precache(scope, kind));
            println!(
                "{} documents: {} converted, {} cached, {} skipped, {} failed",
                summary.documents, summary.converted, summary.cached, summary.skipped, summary.failed
            );
        },
        Command::Watch => watch(kiosk()?, &config)?,
    }
    Ok(())
}

fn wait(handle: &JobHandle) -> JobSummary {
    loop {
        if let Some(summary) = handle.wait(Duration::from_secs(60)) {
            return summary;
        }
    }
}

fn watch(kiosk: Kiosk, config: &Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().or_raise(|| ErrorKind::Startup)?;
    let kiosk = Arc::new(kiosk);
    let root = config.library.root.clone();
    let token = CancellationToken::new();
    let (watcher, mut receiver) =
        AvailabilityWatcher::spawn(root.clone(), kiosk.discovery().clone(), config.library.poll_interval(), token)
            .or_raise(|| ErrorKind::Startup)?;
    let sweeps = LibrarySweep::new(kiosk.clone(), root);

    runtime.block_on(async {
        let snapshot = receiver.borrow_and_update().clone();
        sweeps.restart(&snapshot);
        loop {
            tokio::select! {
                changed = receiver.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = receiver.borrow_and_update().clone();
                    sweeps.restart(&snapshot);
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted; shutting down");
                    break;
                },
            }
        }
    });
    sweeps.stop();
    kiosk.shutdown();
    watcher.stop();
    Ok(())
}

/// Background precache of every drive, one drive per job, restarted from
/// scratch whenever availability changes.
struct LibrarySweep {
    kiosk: Arc<Kiosk>,
    root: PathBuf,
    /// Bumped for every restart; a sweep thread only starts jobs while its own
    /// generation is current.
    generation: Arc<Mutex<u64>>,
}
impl LibrarySweep {
    fn new(kiosk: Arc<Kiosk>, root: PathBuf) -> Self {
        Self { kiosk, root, generation: Arc::new(Mutex::new(0)) }
    }

    fn restart(&self, snapshot: &Availability) {
        let drives = drive_paths(&self.root, snapshot);
        let mine = {
            let mut generation = self.generation.lock().unwrap_or_else(|e| e.into_inner());
            *generation += 1;
            *generation
        };
        tracing::info!(drives = drives.len(), sweep = mine, "Scheduling background precache");
        let kiosk = self.kiosk.clone();
        let generation = self.generation.clone();
        let spawned = thread::Builder::new().name("library-sweep".to_string()).spawn(move || {
            for drive in drives {
                let handle = {
                    let current = generation.lock().unwrap_or_else(|e| e.into_inner());
                    if *current != mine {
                        return;
                    }
                    kiosk.start_precache(Scope::Subtree(drive), JobKind::Background)
                };
                if wait(&handle).cancelled {
                    return;
                }
            }
        });
        if let Err(err) = spawned {
            tracing::error!(error = %err, "Could not spawn library sweep");
        }
    }

    fn stop(&self) {
        *self.generation.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        self.kiosk.scheduler().cancel_kind(JobKind::Background);
    }
}

fn drive_paths(root: &Path, snapshot: &Availability) -> Vec<PathBuf> {
    snapshot.drives.keys().map(|drive| root.join(drive)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case(&["kiosk", "resolve", "a.xlsx"], "front")]
    #[case(&["kiosk", "resolve", "a.xlsx", "Back"], "Back")]
    fn test_resolve_label(#[case] args: &[&str], #[case] expected: &str) {
        let cli = Cli::try_parse_from(args).unwrap();
        let Command::Resolve { label, .. } = cli.command else {
            panic!("expected resolve, got {:?}", cli.command);
        };
        assert_eq!(label, expected);
    }

    #[test]
    fn test_list_directory() {
        let cli = Cli::try_parse_from(["kiosk", "list", "/media/pi/usb/Assembly/Model A"]).unwrap();
        assert!(matches!(cli.command, Command::List { directory } if directory == Path::new("/media/pi/usb/Assembly/Model A")));
    }

    #[test]
    fn test_precache_subtree_flag() {
        let cli = Cli::try_parse_from(["kiosk", "-v", "precache", "/media/pi/usb", "--subtree"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Precache { subtree: true, .. }));
    }

    #[test]
    fn test_drive_paths() {
        let snapshot = Availability {
            drives: [("usb-a".to_string(), "x".to_string()), ("usb-b".to_string(), "y".to_string())].into(),
            ..Default::default()
        };
        assert_eq!(
            drive_paths(Path::new("/media/pi"), &snapshot),
            [PathBuf::from("/media/pi/usb-a"), PathBuf::from("/media/pi/usb-b")]
        );
    }
}
