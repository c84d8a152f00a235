use crate::categories;
use crate::cmd;
use crate::config::{self, AppConfig};
use crate::engine::{self, MediaEngine};
use crate::format::{self, FormatSpec, Postprocessor, ThumbnailMode};
use crate::links::{LineOutcome, LinkCollector};
use crate::progress;
use crate::runner::{self, BatchResult, RunnerOptions};
use crate::{AppError, Result};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PLAYLIST_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuChoice {
    Download,
    Categories,
    Exit,
    Unknown,
}

fn parse_menu_choice(input: &str) -> MenuChoice {
    match input.trim() {
        "1" => MenuChoice::Categories,
        "2" => MenuChoice::Download,
        "3" | "q" | "Q" => MenuChoice::Exit,
        _ => MenuChoice::Unknown,
    }
}

/// Answer to the subtitle prompt; `Back` unwinds the whole batch.
#[derive(Debug, PartialEq, Eq)]
enum SubtitleChoice {
    Yes,
    No,
    Back,
}

fn parse_subtitle_choice(input: &str) -> Option<SubtitleChoice> {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" => Some(SubtitleChoice::Yes),
        "" | "n" => Some(SubtitleChoice::No),
        "b" => Some(SubtitleChoice::Back),
        _ => None,
    }
}

fn parse_thumbnail_choice(input: &str) -> Option<ThumbnailMode> {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" => Some(ThumbnailMode::Embedded),
        "h" => Some(ThumbnailMode::BestSeparate),
        "" | "n" => Some(ThumbnailMode::None),
        _ => None,
    }
}

/// Owns the console loop: configuration, the engine handle, and every
/// prompt between "start" and "batch finished".
pub struct Session {
    config: AppConfig,
    config_path: PathBuf,
    engine: Arc<dyn MediaEngine>,
}

impl Session {
    pub fn new(config: AppConfig, config_path: PathBuf, engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            config,
            config_path,
            engine,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            println!();
            println!("1) Manage categories");
            println!("2) Download");
            println!("3) Exit");
            let choice = prompt("> ")?;
            match parse_menu_choice(&choice) {
                MenuChoice::Download => loop {
                    if let Err(e) = self.download_flow() {
                        log::warn!("batch aborted: {e}");
                        println!("Batch aborted: {e}");
                        break;
                    }
                    let again = prompt("Start another batch? [y/N]: ")?;
                    if !again.eq_ignore_ascii_case("y") {
                        break;
                    }
                },
                MenuChoice::Categories => self.manage_categories()?,
                MenuChoice::Exit => return Ok(()),
                MenuChoice::Unknown => println!("Enter 1, 2 or 3."),
            }
        }
    }

    fn save_config(&self) -> Result<()> {
        config::save(&self.config_path, &self.config)
    }

    fn manage_categories(&mut self) -> Result<()> {
        loop {
            println!();
            if self.config.categories.is_empty() {
                println!("No categories defined.");
            } else {
                for (name, path) in &self.config.categories {
                    let marker = if self.config.default_category.as_deref() == Some(name.as_str())
                    {
                        " (default)"
                    } else {
                        ""
                    };
                    println!("  {name}{marker} -> {}", path.display());
                }
            }
            println!("[A]dd  [R]ename  [D]elete  [S]et default  [B]ack");
            let choice = prompt("> ")?.to_ascii_lowercase();
            match choice.as_str() {
                "a" => {
                    let name = prompt("Name: ")?;
                    let path = prompt("Folder: ")?;
                    let path = crate::links::clean_pasted_line(&path);
                    if path.is_empty() || !categories::add(&mut self.config, &name, PathBuf::from(&path)) {
                        println!("Name and folder must not be empty.");
                        continue;
                    }
                    self.save_config()?;
                }
                "r" => {
                    let old = prompt("Rename which: ")?;
                    let new = prompt("New name: ")?;
                    if categories::rename(&mut self.config, old.trim(), &new) {
                        self.save_config()?;
                    } else {
                        println!("No such category.");
                    }
                }
                "d" => {
                    let name = prompt("Delete which: ")?;
                    if categories::remove(&mut self.config, name.trim()) {
                        self.save_config()?;
                    } else {
                        println!("No such category.");
                    }
                }
                "s" => {
                    let name = prompt("Default category: ")?;
                    if categories::set_default(&mut self.config, name.trim()) {
                        self.save_config()?;
                    } else {
                        println!("No such category.");
                    }
                }
                "b" | "" => return Ok(()),
                _ => println!("Enter A, R, D, S or B."),
            }
        }
    }

    /// Picks the destination folder for this batch. Enter accepts the
    /// effective target; C picks a category, P takes a raw path.
    fn choose_target(&mut self) -> Result<Option<PathBuf>> {
        loop {
            let target = categories::effective_target(&self.config);
            println!(
                "Destination {} {}",
                target.label(),
                target.path().display()
            );
            println!("[Enter] accept  [C]ategory  [P]ath  [M]anage  [Q]uit batch");
            let choice = prompt("> ")?.to_ascii_lowercase();
            match choice.as_str() {
                "" => return Ok(Some(target.path().to_path_buf())),
                "c" => {
                    if self.config.categories.is_empty() {
                        println!("No categories defined.");
                        continue;
                    }
                    let names: Vec<&String> = self.config.categories.keys().collect();
                    for (i, name) in names.iter().enumerate() {
                        println!("  {}) {name}", i + 1);
                    }
                    let pick = prompt("Category #: ")?;
                    let Some(index) = pick
                        .trim()
                        .parse::<usize>()
                        .ok()
                        .filter(|n| (1..=names.len()).contains(n))
                    else {
                        println!("Invalid choice.");
                        continue;
                    };
                    let name = names[index - 1].clone();
                    if let Some(path) = self.config.categories.get(&name) {
                        return Ok(Some(path.clone()));
                    }
                }
                "p" => {
                    let raw = prompt("Folder: ")?;
                    let cleaned = crate::links::clean_pasted_line(&raw);
                    if cleaned.is_empty() {
                        println!("Empty path.");
                        continue;
                    }
                    return Ok(Some(PathBuf::from(cleaned)));
                }
                "m" => self.manage_categories()?,
                "q" => return Ok(None),
                _ => println!("Enter C, P, M, Q or just Enter."),
            }
        }
    }

    /// Reads URLs until an empty line. Lines may also name a .txt batch
    /// file; its contents are merged in.
    fn collect_links(&self) -> Result<LinkCollector> {
        println!("Paste URLs one per line (or a .txt file path). Empty line starts the batch.");
        let mut collector = LinkCollector::new();
        loop {
            let line = prompt("> ")?;
            if line.trim().is_empty() {
                return Ok(collector);
            }
            match collector.push_line(&line) {
                LineOutcome::AddedUrl => println!("  added ({} total)", collector.len()),
                LineOutcome::BatchFile(n) => {
                    println!("  batch file: {n} new URLs ({} total)", collector.len())
                }
                LineOutcome::Ignored => println!("  ignored"),
            }
        }
    }

    /// Probes the first target and walks the unified table. `None` means
    /// the user backed out of the batch.
    fn choose_format(&self, first_url: &str) -> Result<Option<FormatSpec>> {
        println!("Querying formats for {first_url} ...");
        let rows = format::resolve_rows(self.engine.as_ref(), first_url)?;
        if rows.is_empty() {
            return Err(AppError::FormatQuery(format!(
                "no usable formats reported for {first_url}"
            )));
        }

        loop {
            print!("{}", format::render_table(&rows));
            println!("[B]est  [#] row  [C]ustom code  [Q]uit batch");
            let choice = prompt("> ")?;
            match choice.trim().to_ascii_lowercase().as_str() {
                "" | "b" => return Ok(Some(FormatSpec::best())),
                "q" => return Ok(None),
                "c" => {
                    let code = prompt("Format code: ")?;
                    if code.trim().is_empty() {
                        println!("Empty code.");
                        continue;
                    }
                    return Ok(Some(FormatSpec {
                        selector: format::custom_selector(&code),
                        postprocessors: Vec::new(),
                    }));
                }
                other => {
                    let Some(index) = other
                        .parse::<usize>()
                        .ok()
                        .filter(|n| (1..=rows.len()).contains(n))
                    else {
                        println!("Invalid choice.");
                        continue;
                    };
                    let (selector, postprocessors) = format::selection(&rows[index - 1]);
                    return Ok(Some(FormatSpec {
                        selector,
                        postprocessors,
                    }));
                }
            }
        }
    }

    /// `Ok(None)` on `b` means the user backed out of the batch.
    fn ask_subtitles(&self) -> Result<Option<Option<Postprocessor>>> {
        loop {
            let choice = prompt("Subtitles? [y/N, b=back]: ")?;
            match parse_subtitle_choice(&choice) {
                Some(SubtitleChoice::Back) => return Ok(None),
                Some(SubtitleChoice::No) => return Ok(Some(None)),
                Some(SubtitleChoice::Yes) => {
                    let langs = prompt("Languages (comma separated, Enter for en): ")?;
                    let langs: Vec<String> = langs.split(',').map(str::to_string).collect();
                    return Ok(Some(Some(format::subtitle_postprocessor(langs))));
                }
                None => println!("Enter Y, N or B."),
            }
        }
    }

    fn ask_thumbnail(&self) -> Result<Option<Postprocessor>> {
        loop {
            let choice = prompt("Thumbnail? [y=embed, h=best separate file, N=no]: ")?;
            match parse_thumbnail_choice(&choice) {
                Some(ThumbnailMode::None) => return Ok(None),
                Some(mode) => return Ok(Some(Postprocessor::ThumbnailFetch { mode })),
                None => println!("Enter Y, H or N."),
            }
        }
    }

    fn download_flow(&mut self) -> Result<()> {
        let Some(output_dir) = self.choose_target()? else {
            return Ok(());
        };
        std::fs::create_dir_all(&output_dir)?;
        if engine::has_partial_artifact(&output_dir) {
            println!("Partial downloads found in this folder; matching ones will resume.");
        }

        let collector = self.collect_links()?;
        if collector.is_empty() {
            println!("Nothing to download.");
            return Ok(());
        }

        let first_url = collector.urls()[0].clone();
        let Some(mut spec) = self.choose_format(&first_url)? else {
            return Ok(());
        };
        let Some(subtitles) = self.ask_subtitles()? else {
            return Ok(());
        };
        if let Some(pp) = subtitles {
            spec.postprocessors.push(pp);
        }
        if let Some(pp) = self.ask_thumbnail()? {
            spec.postprocessors.push(pp);
        }

        let targets = collector.into_targets(self.engine.as_ref(), PLAYLIST_LIMIT);
        println!("Starting {} downloads into {}", targets.len(), output_dir.display());

        let options = RunnerOptions {
            concurrency: self.config.concurrency_limit(),
            output_dir: output_dir.clone(),
            retries: self.config.retries,
            resume: true,
        };
        let handle = runner::start(Arc::clone(&self.engine), targets, spec, options);
        progress::display_until_done(&handle);
        let result = handle.wait();

        println!();
        println!("Done: {} succeeded, {} failed.", result.succeeded, result.failed);
        for failure in &result.failures {
            let hint = if failure.retriable {
                " (worth retrying)"
            } else {
                ""
            };
            println!(
                "  {} [{}]{hint}: {}",
                failure.url,
                failure.kind.as_str(),
                failure.message
            );
        }

        self.config.last_used_path = Some(output_dir.clone());
        self.save_config()?;

        notify(&notification_body(&result));

        let open = prompt("Open download folder? [y/N]: ")?;
        if open.trim().eq_ignore_ascii_case("y") {
            open_folder(&output_dir);
        }
        Ok(())
    }
}

fn prompt(text: &str) -> Result<String> {
    print!("{text}");
    io::stdout().flush()?;
    let mut line = String::new();
    let n = io::stdin().lock().read_line(&mut line)?;
    if n == 0 {
        return Err(AppError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stdin closed",
        )));
    }
    Ok(line.trim().to_string())
}

/// Batch-end summary for the notifier: both counts plus the failed URLs,
/// capped so the balloon stays readable.
fn notification_body(result: &BatchResult) -> String {
    const LISTED: usize = 3;

    let mut body = format!("{} succeeded, {} failed", result.succeeded, result.failed);
    if !result.failures.is_empty() {
        let shown: Vec<&str> = result
            .failures
            .iter()
            .take(LISTED)
            .map(|f| f.url.as_str())
            .collect();
        body.push_str(": ");
        body.push_str(&shown.join(", "));
        if result.failures.len() > LISTED {
            body.push_str(&format!(" +{} more", result.failures.len() - LISTED));
        }
    }
    body
}

/// Desktop notification, best effort. Absence of a notifier is not an error.
fn notify(body: &str) {
    #[cfg(target_os = "linux")]
    let status = cmd::background_command("notify-send").arg("umdl").arg(body).status();
    #[cfg(target_os = "macos")]
    let status = cmd::background_command("osascript")
        .arg("-e")
        .arg(format!(
            "display notification \"{}\" with title \"umdl\"",
            body.replace('"', "")
        ))
        .status();
    #[cfg(target_os = "windows")]
    let status = cmd::background_command("powershell")
        .args(["-NoProfile", "-Command"])
        .arg(format!(
            "[System.Reflection.Assembly]::LoadWithPartialName('System.Windows.Forms') | Out-Null; \
             $n = New-Object System.Windows.Forms.NotifyIcon; \
             $n.Icon = [System.Drawing.SystemIcons]::Information; \
             $n.Visible = $true; \
             $n.ShowBalloonTip(5000, 'umdl', '{}', 'Info')",
            body.replace('\'', "")
        ))
        .status();
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    let status: std::io::Result<std::process::ExitStatus> = {
        let _ = body;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "no notifier",
        ))
    };

    if let Err(e) = status {
        log::debug!("notification skipped: {e}");
    }
}

/// Opens the folder in the platform file manager, best effort.
fn open_folder(path: &Path) {
    #[cfg(target_os = "windows")]
    let status = cmd::background_command("explorer").arg(path).status();
    #[cfg(target_os = "macos")]
    let status = cmd::background_command("open").arg(path).status();
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let status = cmd::background_command("xdg-open").arg(path).status();

    if let Err(e) = status {
        log::debug!("could not open {}: {e}", path.display());
    }
}
