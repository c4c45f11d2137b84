//! Delivery of a text message into another session through the CLI.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{DeckError, Result};

pub trait MessageSender: Send + Sync {
    fn send(&self, profile: &str, target: &str, message: &str) -> Result<()>;
}

/// Shells out to `<cli> -p <profile> session send <target> <message> -q`.
#[derive(Debug, Clone)]
pub struct CliMessageSender {
    binary: PathBuf,
}

impl CliMessageSender {
    pub fn new(cli_command: &str) -> Self {
        Self {
            binary: resolve_cli_binary(cli_command),
        }
    }

    pub fn with_binary(binary: PathBuf) -> Self {
        Self { binary }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl MessageSender for CliMessageSender {
    fn send(&self, profile: &str, target: &str, message: &str) -> Result<()> {
        let target = target.trim();
        let message = message.trim();
        if target.is_empty() {
            return Err(DeckError::InvalidArgument(
                "session reference is required".to_string(),
            ));
        }
        if message.is_empty() {
            return Err(DeckError::InvalidArgument("message is required".to_string()));
        }

        let mut args: Vec<&str> = Vec::new();
        if !profile.trim().is_empty() {
            args.extend(["-p", profile]);
        }
        args.extend(["session", "send", target, message, "-q"]);

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| DeckError::CommandFailed {
                command: self.binary.display().to_string(),
                details: err.to_string(),
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(DeckError::CommandFailed {
            command: format!("{} session send", self.binary.display()),
            details: if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            },
        })
    }
}

/// PATH lookup, then the running executable when it is the CLI, then the bare name.
pub fn resolve_cli_binary(cli_command: &str) -> PathBuf {
    let name = cli_command.trim();
    if name.contains(std::path::MAIN_SEPARATOR) {
        return PathBuf::from(name);
    }
    if let Some(found) = find_in_path(name) {
        return found;
    }
    if let Ok(exe) = std::env::current_exe() {
        let is_cli = exe
            .file_name()
            .and_then(|base| base.to_str())
            .map(|base| base.to_ascii_lowercase().starts_with(&name.to_ascii_lowercase()))
            .unwrap_or(false);
        if is_cli {
            return exe;
        }
    }
    PathBuf::from(name)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use fs_err as fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
        fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    #[test]
    fn passes_profile_target_and_message() {
        let temp = tempdir().expect("temp dir");
        let out = temp.path().join("args.txt");
        let script = write_script(
            temp.path(),
            "agent-deck",
            &format!("printf '%s\\n' \"$@\" > {}", out.display()),
        );

        CliMessageSender::with_binary(script)
            .send("work", "parent-1", "hello there")
            .expect("send");

        let args = fs::read_to_string(&out).expect("read args");
        let args: Vec<&str> = args.lines().collect();
        assert_eq!(
            args,
            vec!["-p", "work", "session", "send", "parent-1", "hello there", "-q"]
        );
    }

    #[test]
    fn stderr_becomes_error_text() {
        let temp = tempdir().expect("temp dir");
        let script = write_script(temp.path(), "agent-deck", "echo 'no such session' >&2; exit 3");
        let err = CliMessageSender::with_binary(script)
            .send("work", "ghost", "msg")
            .expect_err("should fail");
        assert!(err.to_string().contains("no such session"), "{err}");
    }

    #[test]
    fn rejects_blank_target_or_message() {
        let sender = CliMessageSender::with_binary(PathBuf::from("/nonexistent"));
        assert!(sender.send("p", " ", "msg").is_err());
        assert!(sender.send("p", "t", "  ").is_err());
    }

    #[test]
    fn explicit_path_is_used_verbatim() {
        assert_eq!(
            resolve_cli_binary("/opt/deck/agent-deck"),
            PathBuf::from("/opt/deck/agent-deck")
        );
    }
}
