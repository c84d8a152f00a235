use crate::engine::{self, MediaEngine};
use crate::Result;
use std::path::Path;

/// One unit of download work after collection and playlist expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub url: String,
    /// Filled in once the engine reports the title.
    pub resolved_title: Option<String>,
    /// Position within the source playlist, when expanded from one.
    pub playlist_index: Option<usize>,
}

impl DownloadTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            resolved_title: None,
            playlist_index: None,
        }
    }
}

/// What a pasted line turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub enum LineOutcome {
    AddedUrl,
    /// The line named a .txt batch file; carries how many URLs it added.
    BatchFile(usize),
    /// Blank, duplicate, or not something we can use.
    Ignored,
}

/// Accumulates URLs pasted one per line, preserving entry order and
/// dropping duplicates.
#[derive(Debug, Default)]
pub struct LinkCollector {
    urls: Vec<String>,
}

impl LinkCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Feeds one console line: a URL, a path to a .txt batch file, or noise.
    pub fn push_line(&mut self, line: &str) -> LineOutcome {
        let cleaned = clean_pasted_line(line);
        if cleaned.is_empty() {
            return LineOutcome::Ignored;
        }

        if looks_like_batch_file(&cleaned) {
            return match self.add_batch_file(Path::new(&cleaned)) {
                Ok(added) => LineOutcome::BatchFile(added),
                Err(e) => {
                    log::warn!("could not read batch file {cleaned}: {e}");
                    LineOutcome::Ignored
                }
            };
        }

        if self.push_url(&cleaned) {
            LineOutcome::AddedUrl
        } else {
            LineOutcome::Ignored
        }
    }

    fn push_url(&mut self, url: &str) -> bool {
        if !is_http_url(url) || self.urls.iter().any(|u| u == url) {
            return false;
        }
        self.urls.push(url.to_string());
        true
    }

    /// Reads a batch file, one URL per line. Blank lines and `#` comments
    /// are skipped. Returns how many new URLs were added.
    pub fn add_batch_file(&mut self, path: &Path) -> Result<usize> {
        let text = std::fs::read_to_string(path)?;
        let mut added = 0;
        for line in text.lines() {
            let cleaned = clean_pasted_line(line);
            if cleaned.is_empty() || cleaned.starts_with('#') {
                continue;
            }
            if self.push_url(&cleaned) {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Converts collected URLs into targets, flattening playlists through
    /// the engine. A playlist that fails to expand degrades to a single
    /// target rather than aborting the batch.
    pub fn into_targets(self, media: &dyn MediaEngine, playlist_limit: usize) -> Vec<DownloadTarget> {
        let mut targets: Vec<DownloadTarget> = Vec::new();
        for url in self.urls {
            if engine::looks_like_playlist(&url) {
                match media.expand_playlist(&url, playlist_limit) {
                    Ok(entries) if !entries.is_empty() => {
                        log::info!("expanded playlist {url} into {} entries", entries.len());
                        for (i, entry) in entries.into_iter().enumerate() {
                            if targets.iter().any(|t| t.url == entry) {
                                continue;
                            }
                            let mut target = DownloadTarget::new(entry);
                            target.playlist_index = Some(i + 1);
                            targets.push(target);
                        }
                        continue;
                    }
                    Ok(_) => {
                        log::warn!("playlist {url} expanded to nothing, keeping as single target");
                    }
                    Err(e) => {
                        log::warn!("playlist expansion failed for {url}, keeping as single target: {e}");
                    }
                }
            }
            if !targets.iter().any(|t| t.url == url) {
                targets.push(DownloadTarget::new(url));
            }
        }
        targets
    }
}

/// Normalizes a line as pasted or dragged into a console: surrounding
/// whitespace and quotes go, as does the `path=` / `PATH:` prefix some
/// terminals prepend on drag and drop.
pub fn clean_pasted_line(line: &str) -> String {
    let mut s = line.trim();
    let lower = s.to_ascii_lowercase();
    if lower.starts_with("path=") || lower.starts_with("path:") {
        s = s[5..].trim();
    }
    let s = s.trim_matches(|c| c == '"' || c == '\'');
    s.trim().to_string()
}

fn is_http_url(line: &str) -> bool {
    line.starts_with("http://") || line.starts_with("https://")
}

fn looks_like_batch_file(line: &str) -> bool {
    line.to_ascii_lowercase().ends_with(".txt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DownloadRequest, EngineEvent, MediaProbe};
    use crate::AppError;
    use std::io::Write;
    use std::path::PathBuf;

    struct FixedPlaylists {
        entries: Vec<String>,
        fail: bool,
    }

    impl MediaEngine for FixedPlaylists {
        fn probe(&self, _url: &str) -> crate::Result<MediaProbe> {
            unreachable!("collector never probes")
        }

        fn expand_playlist(&self, _url: &str, _limit: usize) -> crate::Result<Vec<String>> {
            if self.fail {
                Err(AppError::Engine("expansion failed".to_string()))
            } else {
                Ok(self.entries.clone())
            }
        }

        fn download(
            &self,
            _request: &DownloadRequest,
            _on_event: &mut dyn FnMut(EngineEvent),
        ) -> crate::Result<PathBuf> {
            unreachable!("collector never downloads")
        }
    }

    #[test]
    fn cleans_drag_drop_noise() {
        assert_eq!(clean_pasted_line("  \"https://a/b\"  "), "https://a/b");
        assert_eq!(clean_pasted_line("path='/home/x/links.txt'"), "/home/x/links.txt");
        assert_eq!(clean_pasted_line("PATH:C:\\clips\\links.txt"), "C:\\clips\\links.txt");
        assert_eq!(clean_pasted_line("   "), "");
    }

    #[test]
    fn non_http_lines_are_rejected() {
        let mut collector = LinkCollector::new();
        assert_eq!(collector.push_line("ftp://a/1"), LineOutcome::Ignored);
        assert_eq!(collector.push_line("not a url"), LineOutcome::Ignored);
        assert_eq!(collector.push_line("https://a/1"), LineOutcome::AddedUrl);
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn dedupes_in_order() {
        let mut collector = LinkCollector::new();
        assert_eq!(collector.push_line("https://a/1"), LineOutcome::AddedUrl);
        assert_eq!(collector.push_line("https://a/2"), LineOutcome::AddedUrl);
        assert_eq!(collector.push_line("\"https://a/1\""), LineOutcome::Ignored);
        assert_eq!(collector.push_line(""), LineOutcome::Ignored);
        assert_eq!(collector.urls(), &["https://a/1", "https://a/2"]);
    }

    #[test]
    fn batch_file_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("links.txt");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(file, "https://a/1").expect("write");
        writeln!(file).expect("write");
        writeln!(file, "# comment").expect("write");
        writeln!(file, "  \"https://a/2\"  ").expect("write");
        writeln!(file, "https://a/1").expect("write");
        drop(file);

        let mut collector = LinkCollector::new();
        let outcome = collector.push_line(&path.to_string_lossy());
        assert_eq!(outcome, LineOutcome::BatchFile(2));
        assert_eq!(collector.urls(), &["https://a/1", "https://a/2"]);
    }

    #[test]
    fn missing_batch_file_is_ignored() {
        let mut collector = LinkCollector::new();
        assert_eq!(
            collector.push_line("/no/such/file.txt"),
            LineOutcome::Ignored
        );
        assert!(collector.is_empty());
    }

    #[test]
    fn playlist_expands_with_indices() {
        let media = FixedPlaylists {
            entries: vec!["https://a/v1".to_string(), "https://a/v2".to_string()],
            fail: false,
        };
        let mut collector = LinkCollector::new();
        collector.push_line("https://www.youtube.com/playlist?list=PL1");
        collector.push_line("https://a/solo");

        let targets = collector.into_targets(&media, 100);
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].url, "https://a/v1");
        assert_eq!(targets[0].playlist_index, Some(1));
        assert_eq!(targets[1].playlist_index, Some(2));
        assert_eq!(targets[2].url, "https://a/solo");
        assert_eq!(targets[2].playlist_index, None);
    }

    #[test]
    fn failed_expansion_degrades_to_single_target() {
        let media = FixedPlaylists {
            entries: Vec::new(),
            fail: true,
        };
        let mut collector = LinkCollector::new();
        collector.push_line("https://www.youtube.com/playlist?list=PL1");

        let targets = collector.into_targets(&media, 100);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].url, "https://www.youtube.com/playlist?list=PL1");
        assert_eq!(targets[0].playlist_index, None);
    }
}
