use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use umdl::engine::{DownloadRequest, EngineEvent, MediaEngine, MediaProbe};
use umdl::format::{self, FormatSpec};
use umdl::links::{DownloadTarget, LineOutcome, LinkCollector};
use umdl::runner::{self, RunnerOptions, TaskState};
use umdl::{AppError, FailureKind};

/// Scriptable engine: per-URL failures, a resume marker, and counters that
/// let tests assert how far the pipeline got.
struct StubEngine {
    probe_fails: bool,
    fail_with: Vec<(String, FailureKind, String)>,
    resume_urls: Vec<String>,
    running: AtomicUsize,
    peak: AtomicUsize,
    downloads: AtomicUsize,
}

impl StubEngine {
    fn new() -> Self {
        Self {
            probe_fails: false,
            fail_with: Vec::new(),
            resume_urls: Vec::new(),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        }
    }
}

impl MediaEngine for StubEngine {
    fn probe(&self, url: &str) -> umdl::Result<MediaProbe> {
        if self.probe_fails {
            return Err(AppError::Engine(format!("Unsupported URL: {url}")));
        }
        Ok(MediaProbe {
            title: Some("Probed".to_string()),
            formats: Vec::new(),
        })
    }

    fn expand_playlist(&self, _url: &str, _limit: usize) -> umdl::Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn download(
        &self,
        request: &DownloadRequest,
        on_event: &mut dyn FnMut(EngineEvent),
    ) -> umdl::Result<PathBuf> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if self.resume_urls.contains(&request.url) {
            on_event(EngineEvent::ResumedFromPartial);
        }
        on_event(EngineEvent::Metadata {
            title: format!("Video {}", request.url),
        });
        on_event(EngineEvent::Progress {
            bytes_done: 512,
            bytes_total: 2048,
        });
        std::thread::sleep(Duration::from_millis(25));
        self.running.fetch_sub(1, Ordering::SeqCst);

        if let Some((_, kind, message)) = self
            .fail_with
            .iter()
            .find(|(url, _, _)| url == &request.url)
        {
            return Err(AppError::Download {
                kind: *kind,
                message: message.clone(),
            });
        }
        on_event(EngineEvent::Postprocessing);
        Ok(request.output_dir.join("video.mp4"))
    }
}

fn targets(urls: &[&str]) -> Vec<DownloadTarget> {
    urls.iter().map(|u| DownloadTarget::new(*u)).collect()
}

fn options(concurrency: usize) -> RunnerOptions {
    RunnerOptions {
        concurrency,
        output_dir: PathBuf::from("/tmp/batch"),
        retries: 2,
        resume: true,
    }
}

#[test]
fn five_targets_two_workers_all_finish() {
    let engine = Arc::new(StubEngine::new());
    let handle = runner::start(
        engine.clone(),
        targets(&["u1", "u2", "u3", "u4", "u5"]),
        FormatSpec::best(),
        options(2),
    );
    let result = handle.wait();

    assert_eq!(result.succeeded, 5);
    assert_eq!(result.failed, 0);
    assert!(engine.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(engine.downloads.load(Ordering::SeqCst), 5);
}

#[test]
fn network_failure_is_reported_retriable() {
    let mut stub = StubEngine::new();
    stub.fail_with.push((
        "bad".to_string(),
        FailureKind::Network,
        "Unable to connect to proxy".to_string(),
    ));
    let engine = Arc::new(stub);

    let handle = runner::start(
        engine,
        targets(&["ok1", "bad", "ok2"]),
        FormatSpec::best(),
        options(2),
    );
    let result = handle.wait();

    assert_eq!(result.succeeded, 2);
    assert_eq!(result.failed, 1);
    let failure = &result.failures[0];
    assert_eq!(failure.url, "bad");
    assert_eq!(failure.kind, FailureKind::Network);
    assert!(failure.retriable);
    assert!(failure.message.contains("Unable to connect"));
}

#[test]
fn permission_failure_is_not_retriable() {
    let mut stub = StubEngine::new();
    stub.fail_with.push((
        "private".to_string(),
        FailureKind::Permission,
        "Private video. Sign in if you've been granted access".to_string(),
    ));
    let engine = Arc::new(stub);

    let handle = runner::start(
        engine,
        targets(&["private"]),
        FormatSpec::best(),
        options(1),
    );
    let result = handle.wait();

    assert_eq!(result.failed, 1);
    assert!(!result.failures[0].retriable);
}

#[test]
fn probe_failure_aborts_before_any_download() {
    let mut stub = StubEngine::new();
    stub.probe_fails = true;
    let engine = Arc::new(stub);

    let err = format::resolve_rows(engine.as_ref(), "https://a/x").expect_err("must fail");
    assert!(matches!(err, AppError::FormatQuery(_)));
    assert_eq!(engine.downloads.load(Ordering::SeqCst), 0);
}

#[test]
fn resumed_tasks_are_visible_in_snapshots() {
    let mut stub = StubEngine::new();
    stub.resume_urls.push("partial".to_string());
    let engine = Arc::new(stub);

    let handle = runner::start(engine, targets(&["partial"]), FormatSpec::best(), options(1));
    let snaps = loop {
        let snaps = handle.snapshot();
        if snaps[0].state.is_terminal() {
            break snaps;
        }
        std::thread::sleep(Duration::from_millis(5));
    };
    assert!(snaps[0].resumed);
    assert_eq!(snaps[0].state, TaskState::Succeeded);
    handle.wait();
}

#[test]
fn titles_flow_from_engine_to_snapshots() {
    let engine = Arc::new(StubEngine::new());
    let handle = runner::start(engine, targets(&["u1"]), FormatSpec::best(), options(1));
    let snaps = loop {
        let snaps = handle.snapshot();
        if snaps[0].state.is_terminal() {
            break snaps;
        }
        std::thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(snaps[0].title.as_deref(), Some("Video u1"));
    assert_eq!(handle.wait().succeeded, 1);
}

#[test]
fn collector_feeds_runner_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let batch_path = dir.path().join("links.txt");
    let mut file = std::fs::File::create(&batch_path).expect("create");
    writeln!(file, "https://a/1").expect("write");
    writeln!(file, "# skip me").expect("write");
    writeln!(file, "https://a/2").expect("write");
    drop(file);

    let mut collector = LinkCollector::new();
    assert_eq!(collector.push_line("https://a/0"), LineOutcome::AddedUrl);
    assert_eq!(
        collector.push_line(&batch_path.to_string_lossy()),
        LineOutcome::BatchFile(2)
    );

    let engine = Arc::new(StubEngine::new());
    let batch_targets = collector.into_targets(engine.as_ref(), 100);
    assert_eq!(batch_targets.len(), 3);

    let handle = runner::start(engine, batch_targets, FormatSpec::best(), options(3));
    let result = handle.wait();
    assert_eq!(result.succeeded, 3);
    assert_eq!(result.failed, 0);
}
