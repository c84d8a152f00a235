use crate::runner::{BatchHandle, TaskSnapshot, TaskState};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(120);

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:>2} [{bar:28.cyan/blue}] {bytes:>9}/{total_bytes:>9} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

fn pending_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:>2} {spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Display label per task. Falls back to the URL until a title arrives and
/// disambiguates identical titles with the task number.
pub fn labels(snapshots: &[TaskSnapshot]) -> Vec<String> {
    let base: Vec<String> = snapshots
        .iter()
        .map(|s| s.title.clone().unwrap_or_else(|| s.url.clone()))
        .collect();
    base.iter()
        .enumerate()
        .map(|(i, label)| {
            let collides = base
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && other == label);
            if collides {
                format!("{label} #{}", snapshots[i].index + 1)
            } else {
                label.clone()
            }
        })
        .collect()
}

fn truncate_label(label: &str, max: usize) -> String {
    if label.chars().count() <= max {
        return label.to_string();
    }
    let cut: String = label.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}

/// Polls the batch and keeps one bar per task until every task is terminal.
pub fn display_until_done(handle: &BatchHandle) {
    let multi = MultiProgress::new();
    let initial = handle.snapshot();
    let bars: Vec<ProgressBar> = initial
        .iter()
        .map(|snap| {
            let bar = multi.add(ProgressBar::new(0));
            bar.set_style(pending_style());
            bar.set_prefix(format!("{}", snap.index + 1));
            bar.set_message("queued");
            bar
        })
        .collect();

    loop {
        let snapshots = handle.snapshot();
        let names = labels(&snapshots);
        for (snap, (bar, name)) in snapshots.iter().zip(bars.iter().zip(names.iter())) {
            if bar.is_finished() {
                continue;
            }
            let name = truncate_label(name, 48);
            match &snap.state {
                TaskState::Queued => {
                    bar.set_message(format!("queued   {name}"));
                    bar.tick();
                }
                TaskState::Running => {
                    if snap.bytes_total > 0 {
                        bar.set_style(bar_style());
                        bar.set_length(snap.bytes_total);
                        bar.set_position(snap.bytes_done.min(snap.bytes_total));
                    } else {
                        bar.tick();
                    }
                    let tag = if snap.resumed { "resumed " } else { "" };
                    bar.set_message(format!("{tag}{name}"));
                }
                TaskState::Postprocessing => {
                    bar.set_message(format!("postproc {name}"));
                    bar.tick();
                }
                TaskState::Succeeded => {
                    bar.set_style(pending_style());
                    bar.finish_with_message(format!("done     {name}"));
                }
                TaskState::Failed { message, .. } => {
                    bar.set_style(pending_style());
                    bar.abandon_with_message(format!(
                        "FAILED   {name}: {}",
                        truncate_label(message, 60)
                    ));
                }
            }
        }

        if handle.is_done() {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
