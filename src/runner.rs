use crate::engine::{DownloadRequest, EngineEvent, MediaEngine};
use crate::format::FormatSpec;
use crate::links::DownloadTarget;
use crate::{AppError, FailureKind};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Lifecycle of one task. Transitions only move forward; a terminal state
/// never changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Postprocessing,
    Succeeded,
    Failed { kind: FailureKind, message: String },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed { .. })
    }

    fn rank(&self) -> u8 {
        match self {
            TaskState::Queued => 0,
            TaskState::Running => 1,
            TaskState::Postprocessing => 2,
            TaskState::Succeeded | TaskState::Failed { .. } => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub concurrency: usize,
    pub output_dir: PathBuf,
    pub retries: u32,
    pub resume: bool,
}

/// Point-in-time view of one task, for display.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub index: usize,
    pub url: String,
    pub playlist_index: Option<usize>,
    pub title: Option<String>,
    pub state: TaskState,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub resumed: bool,
}

struct Task {
    index: usize,
    url: String,
    playlist_index: Option<usize>,
    title: Mutex<Option<String>>,
    state: Mutex<TaskState>,
    bytes_done: AtomicU64,
    bytes_total: AtomicU64,
    resumed: AtomicBool,
}

impl Task {
    fn new(index: usize, target: &DownloadTarget) -> Self {
        Self {
            index,
            url: target.url.clone(),
            playlist_index: target.playlist_index,
            title: Mutex::new(target.resolved_title.clone()),
            state: Mutex::new(TaskState::Queued),
            bytes_done: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            resumed: AtomicBool::new(false),
        }
    }

    /// Applies a transition, ignoring anything that would move backwards.
    fn advance(&self, next: TaskState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.is_terminal() || next.rank() < state.rank() {
            return;
        }
        *state = next;
    }

    fn set_title(&self, title: String) {
        let mut slot = self.title.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(title);
        }
    }

    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            index: self.index,
            url: self.url.clone(),
            playlist_index: self.playlist_index,
            title: self
                .title
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
            state: self
                .state
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
            resumed: self.resumed.load(Ordering::Relaxed),
        }
    }
}

/// One target that did not finish, with enough context to retry by hand.
#[derive(Debug, Clone)]
pub struct FailedTarget {
    pub url: String,
    pub kind: FailureKind,
    pub retriable: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<FailedTarget>,
}

/// A running batch. Snapshots are cheap and safe to poll from the display
/// loop while workers are active; `wait` joins the pool and aggregates.
pub struct BatchHandle {
    tasks: Vec<Arc<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl BatchHandle {
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().map(|t| t.snapshot()).collect()
    }

    pub fn is_done(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| t.state.lock().unwrap_or_else(|p| p.into_inner()).is_terminal())
    }

    pub fn wait(mut self) -> BatchResult {
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }

        let mut result = BatchResult::default();
        for task in &self.tasks {
            let state = task.state.lock().unwrap_or_else(|p| p.into_inner()).clone();
            match state {
                TaskState::Succeeded => result.succeeded += 1,
                TaskState::Failed { kind, message } => {
                    result.failed += 1;
                    result.failures.push(FailedTarget {
                        url: task.url.clone(),
                        kind,
                        retriable: kind.retriable(),
                        message,
                    });
                }
                // Workers only exit after every task they pulled is terminal.
                other => {
                    log::error!("task {} ended non-terminal: {:?}", task.url, other);
                    result.failed += 1;
                    result.failures.push(FailedTarget {
                        url: task.url.clone(),
                        kind: FailureKind::Unknown,
                        retriable: false,
                        message: "task did not complete".to_string(),
                    });
                }
            }
        }
        result
    }
}

/// Starts a batch over a shared work queue with a bounded worker pool.
pub fn start(
    engine: Arc<dyn MediaEngine>,
    targets: Vec<DownloadTarget>,
    spec: FormatSpec,
    options: RunnerOptions,
) -> BatchHandle {
    let tasks: Vec<Arc<Task>> = targets
        .iter()
        .enumerate()
        .map(|(i, t)| Arc::new(Task::new(i, t)))
        .collect();

    let queue: Arc<Mutex<VecDeque<usize>>> =
        Arc::new(Mutex::new((0..tasks.len()).collect()));

    let worker_count = options.concurrency.max(1).min(tasks.len().max(1));
    log::info!(
        "starting batch: {} targets, {} workers",
        tasks.len(),
        worker_count
    );

    let mut workers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let engine = Arc::clone(&engine);
        let queue = Arc::clone(&queue);
        let tasks = tasks.clone();
        let spec = spec.clone();
        let options = options.clone();
        workers.push(thread::spawn(move || loop {
            let next = {
                let mut q = queue.lock().unwrap_or_else(|p| p.into_inner());
                q.pop_front()
            };
            let Some(index) = next else {
                break;
            };
            run_one(engine.as_ref(), &tasks[index], &spec, &options);
        }));
    }

    BatchHandle { tasks, workers }
}

fn run_one(engine: &dyn MediaEngine, task: &Task, spec: &FormatSpec, options: &RunnerOptions) {
    task.advance(TaskState::Running);
    log::info!("downloading {}", task.url);

    let request = DownloadRequest {
        url: task.url.clone(),
        spec: spec.clone(),
        output_dir: options.output_dir.clone(),
        retries: options.retries,
        resume: options.resume,
    };

    let mut on_event = |event: EngineEvent| match event {
        EngineEvent::Metadata { title } => task.set_title(title),
        EngineEvent::Progress {
            bytes_done,
            bytes_total,
        } => {
            task.bytes_done.store(bytes_done, Ordering::Relaxed);
            if bytes_total > 0 {
                task.bytes_total.store(bytes_total, Ordering::Relaxed);
            }
        }
        EngineEvent::ResumedFromPartial => {
            task.resumed.store(true, Ordering::Relaxed);
            log::info!("resuming partial download for {}", task.url);
        }
        EngineEvent::Postprocessing => task.advance(TaskState::Postprocessing),
    };

    match engine.download(&request, &mut on_event) {
        Ok(path) => {
            log::info!("finished {} -> {}", task.url, path.display());
            task.advance(TaskState::Succeeded);
        }
        Err(AppError::Download { kind, message }) => {
            log::warn!("download failed for {} ({}): {}", task.url, kind.as_str(), message);
            task.advance(TaskState::Failed { kind, message });
        }
        Err(other) => {
            log::warn!("download failed for {}: {}", task.url, other);
            task.advance(TaskState::Failed {
                kind: FailureKind::Unknown,
                message: other.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MediaProbe;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct StubEngine {
        running: AtomicUsize,
        peak: AtomicUsize,
        fail_urls: Vec<String>,
    }

    impl StubEngine {
        fn new(fail_urls: Vec<String>) -> Self {
            Self {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_urls,
            }
        }
    }

    impl MediaEngine for StubEngine {
        fn probe(&self, _url: &str) -> crate::Result<MediaProbe> {
            unreachable!("runner never probes")
        }

        fn expand_playlist(&self, _url: &str, _limit: usize) -> crate::Result<Vec<String>> {
            unreachable!("runner never expands")
        }

        fn download(
            &self,
            request: &DownloadRequest,
            on_event: &mut dyn FnMut(EngineEvent),
        ) -> crate::Result<PathBuf> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            on_event(EngineEvent::Metadata {
                title: format!("title of {}", request.url),
            });
            on_event(EngineEvent::Progress {
                bytes_done: 10,
                bytes_total: 100,
            });
            thread::sleep(Duration::from_millis(20));
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail_urls.contains(&request.url) {
                return Err(AppError::Download {
                    kind: FailureKind::Network,
                    message: "Unable to connect".to_string(),
                });
            }
            Ok(request.output_dir.join("out.mp4"))
        }
    }

    fn options(concurrency: usize) -> RunnerOptions {
        RunnerOptions {
            concurrency,
            output_dir: PathBuf::from("/tmp/out"),
            retries: 1,
            resume: true,
        }
    }

    fn targets(n: usize) -> Vec<DownloadTarget> {
        (0..n)
            .map(|i| DownloadTarget::new(format!("https://a/{i}")))
            .collect()
    }

    #[test]
    fn worker_pool_respects_concurrency_bound() {
        let engine = Arc::new(StubEngine::new(Vec::new()));
        let handle = start(
            engine.clone(),
            targets(5),
            FormatSpec::best(),
            options(2),
        );
        let result = handle.wait();

        assert_eq!(result.succeeded, 5);
        assert_eq!(result.failed, 0);
        assert!(engine.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn failures_are_aggregated_with_kind() {
        let engine = Arc::new(StubEngine::new(vec!["https://a/1".to_string()]));
        let handle = start(engine, targets(3), FormatSpec::best(), options(3));
        let result = handle.wait();

        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failed, 1);
        let failure = &result.failures[0];
        assert_eq!(failure.url, "https://a/1");
        assert_eq!(failure.kind, FailureKind::Network);
        assert!(failure.retriable);
    }

    #[test]
    fn titles_appear_in_snapshots() {
        let engine = Arc::new(StubEngine::new(Vec::new()));
        let handle = start(engine, targets(1), FormatSpec::best(), options(1));
        let result_snapshot = loop {
            let snaps = handle.snapshot();
            if snaps[0].state.is_terminal() {
                break snaps;
            }
            thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(
            result_snapshot[0].title.as_deref(),
            Some("title of https://a/0")
        );
        let result = handle.wait();
        assert_eq!(result.succeeded, 1);
    }

    #[test]
    fn transitions_never_move_backwards() {
        let target = DownloadTarget::new("https://a/x");
        let task = Task::new(0, &target);

        task.advance(TaskState::Running);
        task.advance(TaskState::Succeeded);
        task.advance(TaskState::Running);
        assert_eq!(task.snapshot().state, TaskState::Succeeded);

        let task = Task::new(1, &target);
        task.advance(TaskState::Postprocessing);
        task.advance(TaskState::Running);
        assert_eq!(task.snapshot().state, TaskState::Postprocessing);

        let task = Task::new(2, &target);
        task.advance(TaskState::Failed {
            kind: FailureKind::Unknown,
            message: "x".to_string(),
        });
        task.advance(TaskState::Succeeded);
        assert!(matches!(task.snapshot().state, TaskState::Failed { .. }));
    }

    #[test]
    fn zero_concurrency_still_runs() {
        let engine = Arc::new(StubEngine::new(Vec::new()));
        let handle = start(engine, targets(2), FormatSpec::best(), options(0));
        let result = handle.wait();
        assert_eq!(result.succeeded, 2);
    }
}
