//! Thin tmux command adapter and pane-content heuristics.

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Command;

use crate::error::{DeckError, Result};

/// How many trailing pane lines are scanned for spinner glyphs.
const SPINNER_SCAN_LINES: usize = 10;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("ansi escape regex")
});

static SPINNER_ELLIPSIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[✳✽✶✻✢·]\s*.+…").expect("spinner regex"));

const SPINNER_CHARS: &[char] = &[
    '⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏', '✳', '✽', '✶', '✢',
];

pub trait TmuxAdapter: Send + Sync {
    fn session_exists(&self, session_name: &str) -> bool;
    fn capture_pane(&self, session_name: &str) -> Result<String>;
}

#[derive(Debug, Clone, Default)]
pub struct CommandTmuxAdapter;

impl TmuxAdapter for CommandTmuxAdapter {
    fn session_exists(&self, session_name: &str) -> bool {
        if session_name.trim().is_empty() {
            return false;
        }
        Command::new("tmux")
            .args(["has-session", "-t", session_name])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn capture_pane(&self, session_name: &str) -> Result<String> {
        run_tmux(["capture-pane", "-p", "-J", "-t", session_name, "-S", "-50"])
    }
}

fn run_tmux<const N: usize>(args: [&str; N]) -> Result<String> {
    let output = Command::new("tmux")
        .args(args)
        .output()
        .map_err(|err| DeckError::io("spawning tmux", err))?;
    if !output.status.success() {
        return Err(DeckError::CommandFailed {
            command: format!("tmux {}", args.join(" ")),
            details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub fn strip_ansi(content: &str) -> String {
    ANSI_ESCAPE.replace_all(content, "").into_owned()
}

fn busy_strings(tool: &str) -> &'static [&'static str] {
    match tool {
        "claude" => &["ctrl+c to interrupt", "esc to interrupt"],
        "codex" => &["ctrl+c to interrupt", "esc to interrupt", "press esc to interrupt"],
        "gemini" => &["esc to cancel"],
        "opencode" => &["esc interrupt", "thinking...", "generating..."],
        _ => &[],
    }
}

/// True when the captured pane shows the tool actively working.
pub fn has_busy_indicator(tool: &str, pane: &str) -> bool {
    let tool = tool.trim().to_ascii_lowercase();
    let clean = strip_ansi(pane);
    let lower = clean.to_lowercase();

    if busy_strings(&tool).iter().any(|needle| lower.contains(needle)) {
        return true;
    }
    if tool == "shell" {
        return false;
    }
    if tool == "claude" && SPINNER_ELLIPSIS.is_match(&clean) {
        return true;
    }

    let lines: Vec<&str> = clean.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(SPINNER_SCAN_LINES);
    lines[start..]
        .iter()
        .any(|line| line.chars().any(|c| SPINNER_CHARS.contains(&c)))
}
