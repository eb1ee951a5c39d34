//! Import (bulk build) state tracking.
//!
//! The builder is the only writer of an [`ImportState`]; everyone else sees
//! snapshots. Once the status leaves `InProgress` the state is frozen until
//! a new import begins. Progress can be observed by subscribing to
//! [`ImportEvent`]s.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::summarization::StrategyKind;

/// Suffix of the columnar coordinate file
pub const POINTS_SUFFIX: &str = "-points";
/// Suffix of the columnar payload (intensity, label) file
pub const PAYLOAD_SUFFIX: &str = "-intensity";
/// Suffix of the intensity ranking file
pub const RANKING_SUFFIX: &str = "-ranking";

/// The files making up one index, all sharing a base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub index: PathBuf,
    pub points: PathBuf,
    pub payload: PathBuf,
    pub ranking: PathBuf,
}

impl IndexPaths {
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            index: base.to_path_buf(),
            points: suffixed(base, POINTS_SUFFIX),
            payload: suffixed(base, PAYLOAD_SUFFIX),
            ranking: suffixed(base, RANKING_SUFFIX),
        }
    }

    /// Removes every file of the index that exists, ignoring missing ones.
    pub(crate) fn remove_all(&self) {
        for path in [&self.index, &self.points, &self.payload, &self.ranking] {
            match std::fs::remove_file(path) {
                Ok(()) => log::debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Lifecycle status of an import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ImportStatus::NotStarted => "not-started",
            ImportStatus::InProgress => "in-progress",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Finer-grained step of an import, for progress display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportPhase {
    Idle,
    /// Streaming points into partitions and writing leaves
    Partitioning,
    /// Building internal levels bottom-up
    Summarizing,
    /// Writing the node table and header
    Finalizing,
    /// Opening an existing index
    Opening,
    Ready,
    Error,
}

impl ImportPhase {
    fn label(&self) -> &'static str {
        match self {
            ImportPhase::Idle => "Idle",
            ImportPhase::Partitioning => "Partitioning points into leaves",
            ImportPhase::Summarizing => "Summarizing tree levels",
            ImportPhase::Finalizing => "Writing index",
            ImportPhase::Opening => "Opening index",
            ImportPhase::Ready => "Ready",
            ImportPhase::Error => "Error",
        }
    }
}

/// Snapshot of an import.
#[derive(Debug, Clone)]
pub struct ImportState {
    pub index_path: Option<PathBuf>,
    pub points_path: Option<PathBuf>,
    /// Present only when the payload column is stored
    pub payload_path: Option<PathBuf>,
    pub ranking_path: Option<PathBuf>,
    /// Input the index was built from, when built through `load`
    pub source_path: Option<PathBuf>,
    pub point_count: u64,
    pub status: ImportStatus,
    pub phase: ImportPhase,
    pub work_done: u64,
    pub total_work: Option<u64>,
    pub strategy: StrategyKind,
    pub failure: Option<String>,
}

impl ImportState {
    fn not_started() -> Self {
        Self {
            index_path: None,
            points_path: None,
            payload_path: None,
            ranking_path: None,
            source_path: None,
            point_count: 0,
            status: ImportStatus::NotStarted,
            phase: ImportPhase::Idle,
            work_done: 0,
            total_work: None,
            strategy: StrategyKind::default(),
            failure: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ImportStatus::Completed
    }

    /// Fraction of the known total work done, if the total is known.
    pub fn progress(&self) -> Option<f64> {
        match self.total_work {
            Some(0) => Some(1.0),
            Some(total) => Some((self.work_done as f64 / total as f64).min(1.0)),
            None => None,
        }
    }

    /// Human-readable one-line status for display.
    pub fn status_string(&self) -> String {
        match (self.status, self.progress()) {
            (ImportStatus::Failed, _) => format!(
                "Error: {}",
                self.failure.as_deref().unwrap_or("import failed")
            ),
            (ImportStatus::InProgress, Some(fraction)) => {
                format!("{} ({:.1}%)", self.phase.label(), fraction * 100.0)
            }
            (ImportStatus::InProgress, None) => {
                format!("{} ({} points)", self.phase.label(), self.work_done)
            }
            _ => self.phase.label().to_string(),
        }
    }
}

impl Default for ImportState {
    fn default() -> Self {
        Self::not_started()
    }
}

/// Progress notification sent to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ImportEvent {
    Started { strategy: StrategyKind },
    PhaseChanged(ImportPhase),
    Progress { work_done: u64, total_work: Option<u64> },
    Completed { point_count: u64 },
    Failed { reason: String },
}

/// Owner of the live import state.
pub(crate) struct ImportTracker {
    state: RwLock<ImportState>,
    subscribers: Mutex<Vec<Sender<ImportEvent>>>,
}

impl ImportTracker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ImportState::not_started()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> ImportState {
        self.state.read().clone()
    }

    pub fn status(&self) -> ImportStatus {
        self.state.read().status
    }

    pub fn subscribe(&self) -> Receiver<ImportEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Starts a fresh import, replacing any previous (failed) state.
    pub fn begin(
        &self,
        paths: &IndexPaths,
        source: Option<&Path>,
        strategy: StrategyKind,
        store_payload: bool,
        track_ranking: bool,
        phase: ImportPhase,
    ) {
        {
            let mut state = self.state.write();
            *state = ImportState {
                index_path: Some(paths.index.clone()),
                points_path: Some(paths.points.clone()),
                payload_path: store_payload.then(|| paths.payload.clone()),
                ranking_path: track_ranking.then(|| paths.ranking.clone()),
                source_path: source.map(Path::to_path_buf),
                status: ImportStatus::InProgress,
                phase,
                strategy,
                ..ImportState::not_started()
            };
        }
        self.publish(ImportEvent::Started { strategy });
        self.publish(ImportEvent::PhaseChanged(phase));
    }

    pub fn set_phase(&self, phase: ImportPhase) {
        if self.update(|state| state.phase = phase) {
            self.publish(ImportEvent::PhaseChanged(phase));
        }
    }

    pub fn set_total_work(&self, total: Option<u64>) {
        self.update(|state| state.total_work = total);
    }

    pub fn add_work(&self, amount: u64) {
        let mut progress = None;
        self.update(|state| {
            state.work_done += amount;
            progress = Some((state.work_done, state.total_work));
        });
        if let Some((work_done, total_work)) = progress {
            self.publish(ImportEvent::Progress {
                work_done,
                total_work,
            });
        }
    }

    /// Freezes the state as completed.
    pub fn complete(&self, point_count: u64, strategy: StrategyKind) {
        let changed = self.update(|state| {
            state.point_count = point_count;
            state.strategy = strategy;
            state.phase = ImportPhase::Ready;
            state.status = ImportStatus::Completed;
        });
        if changed {
            self.publish(ImportEvent::Completed { point_count });
        }
    }

    /// Freezes the state as failed.
    pub fn fail(&self, reason: String) {
        let changed = self.update(|state| {
            state.phase = ImportPhase::Error;
            state.status = ImportStatus::Failed;
            state.failure = Some(reason.clone());
        });
        if changed {
            self.publish(ImportEvent::Failed { reason });
        }
    }

    /// Applies `f` only while the import is in progress.
    fn update(&self, f: impl FnOnce(&mut ImportState)) -> bool {
        let mut state = self.state.write();
        if state.status != ImportStatus::InProgress {
            log::warn!(
                "Ignoring import state update after import reached '{}'",
                state.status
            );
            return false;
        }
        f(&mut state);
        true
    }

    fn publish(&self, event: ImportEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
