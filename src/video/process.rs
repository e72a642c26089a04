use std::io::Read;
use std::process::{ChildStderr, Command, Stdio};
use std::thread::JoinHandle;

/// Longest stderr excerpt carried into an error message
const MAX_STDERR_CHARS: usize = 600;

/// Collects a child's stderr on a helper thread so a chatty ffmpeg can never
/// block on a full pipe while we are writing to or reading from it.
pub(crate) struct StderrDrain {
    handle: Option<JoinHandle<String>>,
}

impl StderrDrain {
    pub(crate) fn spawn(stderr: Option<ChildStderr>) -> Self {
        let handle = stderr.map(|mut stderr| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                buf
            })
        });
        Self { handle }
    }

    /// Wait for the child to close stderr and return a trimmed excerpt
    pub(crate) fn collect(mut self) -> String {
        let text = self
            .handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        excerpt(&text)
    }
}

fn excerpt(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= MAX_STDERR_CHARS {
        text.to_string()
    } else {
        let tail: String = text.chars().rev().take(MAX_STDERR_CHARS).collect();
        format!("...{}", tail.chars().rev().collect::<String>())
    }
}

/// Whether `program -version` runs successfully
pub fn program_available(program: &str) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
