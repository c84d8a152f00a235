use std::ffi::OsStr;
use std::process::Command;

/// Builder for the helper processes this tool spawns: yt-dlp invocations,
/// the platform notifier, and folder openers. On Windows each of those
/// would flash a console window over the progress bars, so the no-window
/// flag is applied before any caller configures the command.
pub fn background_command(program: impl AsRef<OsStr>) -> Command {
    let mut command = Command::new(program);
    suppress_console_window(&mut command);
    command
}

#[cfg(windows)]
fn suppress_console_window(command: &mut Command) {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn suppress_console_window(_command: &mut Command) {}
