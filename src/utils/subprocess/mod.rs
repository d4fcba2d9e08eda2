use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::errors::{TraceError, TraceResult};

/// Environment variables safe to pass through to child processes.
const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "LC_ALL",
    "TZ",
    "TERM",
    "RUST_LOG",
    "TMPDIR",
    "XDG_RUNTIME_DIR",
];

/// Create a `Command` with a scrubbed environment.
///
/// Calls `env_clear()` then copies only the allowlisted environment
/// variables from the current process. This prevents accidental leakage
/// of API keys, tokens, and other secrets to child processes.
pub fn scrubbed_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.env_clear();
    for &var in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(var) {
            cmd.env(var, val);
        }
    }
    cmd
}

/// Splits a target-command string into argv without invoking a shell.
///
/// Contiguous non-whitespace runs are tokens; `"…"` and `'…'` delimit
/// literal tokens (no escape processing inside them); the first token is
/// the executable, the rest are arguments.
pub fn tokenize_command(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = command.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut token = String::new();
        if c == '"' || c == '\'' {
            let quote = c;
            chars.next();
            for ch in chars.by_ref() {
                if ch == quote {
                    break;
                }
                token.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                token.push(ch);
                chars.next();
            }
        }
        tokens.push(token);
    }
    tokens
}

/// Spawns the target command with piped stdio and a scrubbed environment.
pub fn spawn_target_command(target_command: &str) -> TraceResult<Child> {
    let argv = tokenize_command(target_command);
    let Some((program, args)) = argv.split_first() else {
        return Err(TraceError::SpawnFailed("empty target command".to_string()));
    };
    let mut cmd = scrubbed_command(program);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    cmd.spawn()
        .map_err(|e| TraceError::SpawnFailed(format!("{program}: {e}")))
}

#[cfg(test)]
mod tests;
