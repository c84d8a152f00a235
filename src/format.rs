use crate::engine::MediaEngine;
use crate::{AppError, Result};

/// Selector used when the user just wants the best combined stream.
pub const BEST_SELECTOR: &str = "bestvideo+bestaudio/best";

/// Audio conversion targets layered on top of the probed variants.
pub const CONVERSION_CODECS: [&str; 3] = ["mp3", "m4a", "opus"];

const CONVERSION_QUALITY: &str = "192";

/// One stream variant as reported by the engine probe, normalized from the
/// extractor's ad hoc JSON into a fixed shape.
#[derive(Debug, Clone)]
pub struct RawFormat {
    pub format_id: String,
    pub ext: String,
    pub resolution: Option<String>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<u64>,
    pub tbr: Option<f64>,
    pub format_note: Option<String>,
    pub has_video: bool,
    pub has_audio: bool,
}

/// Parses the `formats` array of a `--dump-single-json` probe.
pub fn parse_formats(json: &serde_json::Value) -> Vec<RawFormat> {
    let formats = match json.get("formats").and_then(|v| v.as_array()) {
        Some(f) => f,
        None => return Vec::new(),
    };

    let mut result = Vec::new();
    for f in formats {
        let format_id = match f.get("format_id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => continue,
        };

        let ext = f
            .get("ext")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let width = f.get("width").and_then(|v| v.as_u64()).map(|v| v as u32);
        let height = f.get("height").and_then(|v| v.as_u64()).map(|v| v as u32);
        let fps = f.get("fps").and_then(|v| v.as_f64());
        let vcodec = f
            .get("vcodec")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let acodec = f
            .get("acodec")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let filesize = f
            .get("filesize")
            .or_else(|| f.get("filesize_approx"))
            .and_then(|v| v.as_u64());
        let tbr = f.get("tbr").and_then(|v| v.as_f64());
        let format_note = f
            .get("format_note")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let has_video = vcodec.as_deref().map(|v| v != "none").unwrap_or(false);
        let has_audio = acodec.as_deref().map(|v| v != "none").unwrap_or(false);

        let resolution = match (width, height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(format!("{w}x{h}")),
            _ => f
                .get("resolution")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        };

        result.push(RawFormat {
            format_id,
            ext,
            resolution,
            height,
            fps,
            vcodec,
            acodec,
            filesize,
            tbr,
            format_note,
            has_video,
            has_audio,
        });
    }

    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailMode {
    None,
    Embedded,
    BestSeparate,
}

/// Post-download transformation directives, applied in order by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Postprocessor {
    AudioConvert {
        codec: String,
        quality: String,
    },
    SubtitleFetch {
        langs: Vec<String>,
        include_auto: bool,
        convert_to: String,
    },
    ThumbnailFetch {
        mode: ThumbnailMode,
    },
}

/// The format decision for one batch. Built once from the probe of the
/// first target, then shared read-only by every worker.
#[derive(Debug, Clone)]
pub struct FormatSpec {
    pub selector: String,
    pub postprocessors: Vec<Postprocessor>,
}

impl FormatSpec {
    pub fn best() -> Self {
        Self {
            selector: BEST_SELECTOR.to_string(),
            postprocessors: Vec::new(),
        }
    }
}

/// What picking a row means in selector terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKind {
    Video { format_id: String },
    Audio { format_id: String },
    Convert { codec: &'static str },
}

/// One selectable line of the unified table.
#[derive(Debug, Clone)]
pub struct FormatRow {
    pub kind: RowKind,
    pub ext: String,
    pub note: String,
    pub vcodec: String,
    pub acodec: String,
    pub bitrate: String,
    pub fps: String,
    pub size: String,
}

/// Merges probed variants into the unified table: video rows first, then
/// audio-only rows, then the fixed conversion rows. Video-only streams are
/// represented by rows whose selection pairs them with best audio; they are
/// never offered raw.
pub fn build_rows(formats: &[RawFormat]) -> Vec<FormatRow> {
    let mut rows = Vec::new();

    for f in formats.iter().filter(|f| f.has_video) {
        rows.push(FormatRow {
            kind: RowKind::Video {
                format_id: f.format_id.clone(),
            },
            ext: f.ext.clone(),
            note: variant_note(f),
            vcodec: f.vcodec.clone().unwrap_or_else(|| "-".to_string()),
            acodec: f.acodec.clone().unwrap_or_else(|| "-".to_string()),
            bitrate: f
                .tbr
                .map(|v| format!("{v:.0}k"))
                .unwrap_or_else(|| "-".to_string()),
            fps: f
                .fps
                .map(|v| format!("{v:.0}"))
                .unwrap_or_else(|| "-".to_string()),
            size: f.filesize.map(format_size).unwrap_or_else(|| "?".to_string()),
        });
    }

    for f in formats.iter().filter(|f| f.has_audio && !f.has_video) {
        rows.push(FormatRow {
            kind: RowKind::Audio {
                format_id: f.format_id.clone(),
            },
            ext: f.ext.clone(),
            note: variant_note(f),
            vcodec: "-".to_string(),
            acodec: f.acodec.clone().unwrap_or_else(|| "-".to_string()),
            bitrate: f
                .tbr
                .map(|v| format!("{v:.0}k"))
                .unwrap_or_else(|| "-".to_string()),
            fps: "-".to_string(),
            size: f.filesize.map(format_size).unwrap_or_else(|| "?".to_string()),
        });
    }

    for codec in CONVERSION_CODECS {
        rows.push(FormatRow {
            kind: RowKind::Convert { codec },
            ext: codec.to_string(),
            note: "extract & convert".to_string(),
            vcodec: "-".to_string(),
            acodec: codec.to_string(),
            bitrate: format!("{CONVERSION_QUALITY}k"),
            fps: "-".to_string(),
            size: "?".to_string(),
        });
    }

    rows
}

fn variant_note(f: &RawFormat) -> String {
    if let Some(note) = f.format_note.as_deref() {
        if !note.is_empty() {
            return note.to_string();
        }
    }
    if let Some(h) = f.height {
        return format!("{h}p");
    }
    f.resolution.clone().unwrap_or_else(|| "-".to_string())
}

/// Turns a chosen row into the batch selector and postprocessor list.
pub fn selection(row: &FormatRow) -> (String, Vec<Postprocessor>) {
    match &row.kind {
        // Video rows always merge with best audio.
        RowKind::Video { format_id } => (format!("{format_id}+bestaudio/best"), Vec::new()),
        RowKind::Audio { format_id } => (format_id.clone(), Vec::new()),
        RowKind::Convert { codec } => (
            "bestaudio/best".to_string(),
            vec![Postprocessor::AudioConvert {
                codec: codec.to_string(),
                quality: CONVERSION_QUALITY.to_string(),
            }],
        ),
    }
}

/// Custom selector codes get the same merge treatment as table rows.
pub fn custom_selector(code: &str) -> String {
    format!("{}+bestaudio/best", code.trim())
}

/// Subtitle side-channel: always requests both authored and auto-generated
/// tracks, normalized to SRT. Empty input falls back to English.
pub fn subtitle_postprocessor(langs: Vec<String>) -> Postprocessor {
    let langs: Vec<String> = langs
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    let langs = if langs.is_empty() {
        vec!["en".to_string()]
    } else {
        langs
    };
    Postprocessor::SubtitleFetch {
        langs,
        include_auto: true,
        convert_to: "srt".to_string(),
    }
}

/// Probes the batch's representative URL. A failed probe aborts the batch
/// before any task starts.
pub fn resolve_rows(engine: &dyn MediaEngine, url: &str) -> Result<Vec<FormatRow>> {
    let probe = engine
        .probe(url)
        .map_err(|e| AppError::FormatQuery(e.to_string()))?;
    Ok(build_rows(&probe.formats))
}

/// Plain-text rendering of the unified table for the console.
pub fn render_table(rows: &[FormatRow]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:>4}  {:<6} {:<14} {:<12} {:<10} {:>8} {:>5} {:>10}\n",
        "Idx", "ext", "res/note", "vcodec", "acodec", "bitrate", "fps", "size"
    ));
    for (i, row) in rows.iter().enumerate() {
        out.push_str(&format!(
            "{:>4}  {:<6} {:<14} {:<12} {:<10} {:>8} {:>5} {:>10}\n",
            i + 1,
            row.ext,
            row.note,
            row.vcodec,
            row.acodec,
            row.bitrate,
            row.fps,
            row.size
        ));
    }
    out
}

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
