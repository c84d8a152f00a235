use crate::cmd;
use crate::format::{self, FormatSpec, Postprocessor, RawFormat, ThumbnailMode};
use crate::{AppError, Result};
use serde::Deserialize;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::thread;
use url::Url;

const SOCKET_TIMEOUT_SECS: u32 = 30;
const PLAYLIST_EXPAND_LIMIT: usize = 500;

/// Metadata reported by a probe of one URL.
#[derive(Debug, Clone)]
pub struct MediaProbe {
    pub title: Option<String>,
    pub formats: Vec<RawFormat>,
}

/// Everything the engine needs to fetch one target. The format spec is
/// shared by all requests of a batch; the rest comes from configuration.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub spec: FormatSpec,
    pub output_dir: PathBuf,
    pub retries: u32,
    pub resume: bool,
}

/// Progress stream relayed to the per-task callback while a download runs.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The extractor resolved the target's title, usually before transfer.
    Metadata { title: String },
    Progress { bytes_done: u64, bytes_total: u64 },
    /// The engine found a matching partial file and continues from its end.
    ResumedFromPartial,
    Postprocessing,
}

/// The external media-fetch capability. One implementation drives yt-dlp;
/// tests substitute their own.
pub trait MediaEngine: Send + Sync {
    fn probe(&self, url: &str) -> Result<MediaProbe>;

    /// Flat expansion of a playlist URL into member entry URLs.
    fn expand_playlist(&self, url: &str, limit: usize) -> Result<Vec<String>>;

    fn download(
        &self,
        request: &DownloadRequest,
        on_event: &mut dyn FnMut(EngineEvent),
    ) -> Result<PathBuf>;
}

/// Cheap syntactic check for URLs worth a playlist expansion probe.
pub fn looks_like_playlist(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    let path = parsed.path().to_ascii_lowercase();

    if host.ends_with("youtube.com") {
        if parsed.query_pairs().any(|(k, _)| k == "list") {
            return true;
        }
        // Channel and user pages expand; single watch/shorts pages do not.
        return path.starts_with("/playlist")
            || path.starts_with("/@")
            || path.starts_with("/channel/")
            || path.starts_with("/c/")
            || path.starts_with("/user/");
    }
    if host == "youtu.be" {
        return false;
    }
    path.contains("playlist")
}

#[derive(Debug, Clone)]
struct Invocation {
    program: String,
    prefix: Vec<String>,
}

/// Drives the yt-dlp executable. Resolution order: a managed binary under
/// the tool directory, then whatever is on PATH, then the python module.
pub struct YtDlpEngine {
    tools_dir: PathBuf,
    invocation: Mutex<Option<Invocation>>,
}

impl YtDlpEngine {
    pub fn new(tools_dir: PathBuf) -> Self {
        Self {
            tools_dir,
            invocation: Mutex::new(None),
        }
    }

    fn managed_binary_path(&self) -> PathBuf {
        let mut path = self.tools_dir.join("yt-dlp");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    /// Resolves and caches a working invocation. A failed lookup is not
    /// cached so a later bootstrap can succeed.
    fn locate(&self) -> Option<Invocation> {
        let mut slot = self.invocation.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            return slot.clone();
        }

        let managed = self.managed_binary_path();
        if managed.exists() {
            let found = Invocation {
                program: managed.to_string_lossy().to_string(),
                prefix: Vec::new(),
            };
            *slot = Some(found.clone());
            return Some(found);
        }

        let mut candidates = vec![Invocation {
            program: "yt-dlp".to_string(),
            prefix: Vec::new(),
        }];
        for python in ["python3", "python"] {
            candidates.push(Invocation {
                program: python.to_string(),
                prefix: vec!["-m".to_string(), "yt_dlp".to_string()],
            });
        }

        let found = candidates.into_iter().find(|candidate| {
            cmd::background_command(&candidate.program)
                .args(&candidate.prefix)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        });
        *slot = found.clone();
        found
    }

    /// Makes sure some yt-dlp is callable, fetching the managed binary from
    /// the upstream release when nothing is installed.
    pub fn ensure_available(&self) -> Result<()> {
        if self.locate().is_some() {
            return Ok(());
        }
        log::warn!("yt-dlp not found, fetching managed binary");
        self.bootstrap_managed_binary()?;
        if self.locate().is_some() {
            Ok(())
        } else {
            Err(AppError::EngineMissing)
        }
    }

    fn bootstrap_managed_binary(&self) -> Result<()> {
        let destination = self.managed_binary_path();
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = destination.with_extension("download");

        let resp = ureq::get(release_download_url())
            .call()
            .map_err(|e| AppError::Engine(format!("yt-dlp download failed: {e}")))?;
        let status = resp.status();
        if status.as_u16() >= 400 {
            return Err(AppError::Engine(format!(
                "yt-dlp download failed (status={status})"
            )));
        }

        {
            let mut reader = resp.into_body().into_reader();
            let mut file = std::fs::File::create(&tmp_path)?;
            std::io::copy(&mut reader, &mut file)?;
            file.flush()?;
        }

        // A release binary is megabytes; anything tiny is an error page.
        let min_size = 512 * 1024_u64;
        let downloaded_size = std::fs::metadata(&tmp_path).map(|m| m.len()).unwrap_or(0);
        if downloaded_size < min_size {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(AppError::Engine(
                "downloaded yt-dlp is unexpectedly small".to_string(),
            ));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o755))?;
        }

        if destination.exists() {
            let _ = std::fs::remove_file(&destination);
        }
        if std::fs::rename(&tmp_path, &destination).is_err() {
            std::fs::copy(&tmp_path, &destination)?;
            let _ = std::fs::remove_file(&tmp_path);
        }

        log::info!("managed yt-dlp installed at {}", destination.display());
        Ok(())
    }

    fn run_capture(&self, args: &[String]) -> Result<std::process::Output> {
        let invocation = self.locate().ok_or(AppError::EngineMissing)?;
        let output = cmd::background_command(&invocation.program)
            .args(&invocation.prefix)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;
        Ok(output)
    }
}

fn release_download_url() -> &'static str {
    if cfg!(target_os = "windows") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_macos"
    } else if cfg!(target_arch = "aarch64") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_linux_aarch64"
    } else {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp"
    }
}

impl MediaEngine for YtDlpEngine {
    fn probe(&self, url: &str) -> Result<MediaProbe> {
        let args = vec![
            "--dump-single-json".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            "--socket-timeout".to_string(),
            SOCKET_TIMEOUT_SECS.to_string(),
            url.to_string(),
        ];
        let output = self.run_capture(&args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Engine(last_error_line(&stderr)));
        }

        let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        Ok(MediaProbe {
            title: json
                .get("title")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            formats: format::parse_formats(&json),
        })
    }

    fn expand_playlist(&self, url: &str, limit: usize) -> Result<Vec<String>> {
        let limit = limit.clamp(1, PLAYLIST_EXPAND_LIMIT);
        let args = vec![
            "--flat-playlist".to_string(),
            "--skip-download".to_string(),
            "--no-warnings".to_string(),
            "--ignore-errors".to_string(),
            "--print".to_string(),
            "webpage_url".to_string(),
            "--playlist-end".to_string(),
            limit.to_string(),
            "--socket-timeout".to_string(),
            SOCKET_TIMEOUT_SECS.to_string(),
            url.to_string(),
        ];
        let output = self.run_capture(&args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Engine(last_error_line(&stderr)));
        }

        let mut urls: Vec<String> = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || urls.iter().any(|u| u == trimmed) {
                continue;
            }
            urls.push(trimmed.to_string());
        }
        Ok(urls)
    }

    fn download(
        &self,
        request: &DownloadRequest,
        on_event: &mut dyn FnMut(EngineEvent),
    ) -> Result<PathBuf> {
        let invocation = self.locate().ok_or(AppError::EngineMissing)?;
        let args = build_download_args(request);

        let mut child = cmd::background_command(&invocation.program)
            .args(&invocation.prefix)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Engine("stdout pipe missing".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Engine("stderr pipe missing".to_string()))?;

        let stderr_handle = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).to_string()
        });

        // The worker thread owns this download; parse the stream inline.
        let mut final_path: Option<PathBuf> = None;
        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            match parse_output_line(&line) {
                Some(OutputLine::Event(event)) => on_event(event),
                Some(OutputLine::FinalPath(path)) => final_path = Some(path),
                None => {}
            }
        }

        let status = child.wait()?;
        let stderr_text = stderr_handle.join().unwrap_or_default();

        if !status.success() {
            let message = last_error_line(&stderr_text);
            return Err(AppError::Download {
                kind: crate::FailureKind::classify(&stderr_text),
                message,
            });
        }

        let path = final_path.ok_or_else(|| {
            AppError::Engine(format!("yt-dlp did not report an output file for {}", request.url))
        })?;
        let path = if path.is_absolute() {
            path
        } else {
            request.output_dir.join(path)
        };
        let meta = std::fs::metadata(&path)
            .map_err(|_| AppError::Engine(format!("yt-dlp reported a missing file: {}", path.display())))?;
        if meta.len() == 0 {
            return Err(AppError::Engine(format!(
                "yt-dlp downloaded an empty file: {}",
                path.display()
            )));
        }
        Ok(path)
    }
}

const PROGRESS_TEMPLATE: &str = concat!(
    "download:{\"status\":%(progress.status)j,",
    "\"downloaded\":%(progress.downloaded_bytes)j,",
    "\"total\":%(progress.total_bytes)j,",
    "\"estimate\":%(progress.total_bytes_estimate)j}"
);

fn build_download_args(request: &DownloadRequest) -> Vec<String> {
    let mut args = vec![
        // Targets are expanded before the batch starts.
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--socket-timeout".to_string(),
        SOCKET_TIMEOUT_SECS.to_string(),
        "--retries".to_string(),
        request.retries.to_string(),
        "--fragment-retries".to_string(),
        request.retries.to_string(),
        "--newline".to_string(),
        "--progress-template".to_string(),
        PROGRESS_TEMPLATE.to_string(),
        "--print".to_string(),
        "before_dl:title=%(title)s".to_string(),
        "--print".to_string(),
        "after_move:filepath=%(filepath)s".to_string(),
        "-P".to_string(),
        request.output_dir.to_string_lossy().to_string(),
        "-o".to_string(),
        "%(title).100B.%(ext)s".to_string(),
        "-f".to_string(),
        request.spec.selector.clone(),
    ];

    if request.resume {
        args.push("--continue".to_string());
    } else {
        args.push("--no-continue".to_string());
    }

    for pp in &request.spec.postprocessors {
        match pp {
            Postprocessor::AudioConvert { codec, quality } => {
                args.push("--extract-audio".to_string());
                args.push("--audio-format".to_string());
                args.push(codec.clone());
                args.push("--audio-quality".to_string());
                args.push(quality.clone());
            }
            Postprocessor::SubtitleFetch {
                langs,
                include_auto,
                convert_to,
            } => {
                args.push("--write-subs".to_string());
                if *include_auto {
                    args.push("--write-auto-subs".to_string());
                }
                args.push("--sub-langs".to_string());
                args.push(langs.join(","));
                args.push("--convert-subs".to_string());
                args.push(convert_to.clone());
            }
            Postprocessor::ThumbnailFetch { mode } => match mode {
                ThumbnailMode::None => {}
                ThumbnailMode::Embedded => {
                    args.push("--embed-thumbnail".to_string());
                }
                ThumbnailMode::BestSeparate => {
                    args.push("--write-thumbnail".to_string());
                    args.push("--embed-thumbnail".to_string());
                }
            },
        }
    }

    args.push(request.url.clone());
    args
}

enum OutputLine {
    Event(EngineEvent),
    FinalPath(PathBuf),
}

#[derive(Debug, Deserialize)]
struct ProgressLine {
    status: Option<String>,
    downloaded: Option<f64>,
    total: Option<f64>,
    estimate: Option<f64>,
}

fn parse_output_line(line: &str) -> Option<OutputLine> {
    let line = line.trim();

    if let Some(json) = line.strip_prefix("download:") {
        let parsed: ProgressLine = serde_json::from_str(json).ok()?;
        if parsed.status.as_deref() == Some("finished") {
            return Some(OutputLine::Event(EngineEvent::Postprocessing));
        }
        let bytes_done = parsed.downloaded.unwrap_or(0.0).max(0.0) as u64;
        let bytes_total = parsed
            .total
            .or(parsed.estimate)
            .unwrap_or(0.0)
            .max(0.0) as u64;
        return Some(OutputLine::Event(EngineEvent::Progress {
            bytes_done,
            bytes_total,
        }));
    }

    if let Some(title) = line.strip_prefix("title=") {
        if !title.is_empty() {
            return Some(OutputLine::Event(EngineEvent::Metadata {
                title: title.to_string(),
            }));
        }
        return None;
    }

    if let Some(path) = line.strip_prefix("filepath=") {
        if !path.is_empty() {
            return Some(OutputLine::FinalPath(PathBuf::from(path)));
        }
        return None;
    }

    if line.contains("Resuming download at byte") {
        return Some(OutputLine::Event(EngineEvent::ResumedFromPartial));
    }

    None
}

/// Picks the last ERROR line out of yt-dlp stderr, falling back to a
/// truncated dump when there is none.
fn last_error_line(stderr: &str) -> String {
    let error_line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.to_ascii_lowercase().starts_with("error"));

    if let Some(line) = error_line {
        return line
            .strip_prefix("ERROR: ")
            .or_else(|| line.strip_prefix("ERROR:"))
            .unwrap_or(line)
            .to_string();
    }

    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return "unknown engine error".to_string();
    }
    let mut message = trimmed.to_string();
    if message.len() > 300 {
        message.truncate(300);
    }
    message
}

/// Best-effort check for a leftover partial artifact from an interrupted
/// run; the actual continuation decision stays inside the engine.
pub fn has_partial_artifact(output_dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(output_dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        name.ends_with(".part") || name.ends_with(".ytdl")
    })
}
