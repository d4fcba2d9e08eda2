use super::*;

use std::ffi::OsStr;

#[test]
fn test_scrubbed_command_clears_env() {
    // Set a dangerous env var
    unsafe { std::env::set_var("SUPER_SECRET_KEY", "should-not-leak") };
    let cmd = scrubbed_command("echo");
    let envs: Vec<_> = cmd.as_std().get_envs().collect();
    // Should not contain our secret
    assert!(
        !envs
            .iter()
            .any(|(k, _)| *k == OsStr::new("SUPER_SECRET_KEY")),
        "secret env var should not be passed through"
    );
}

#[test]
fn test_scrubbed_command_passes_path() {
    if std::env::var("PATH").is_ok() {
        let cmd = scrubbed_command("echo");
        let envs: Vec<_> = cmd.as_std().get_envs().collect();
        assert!(
            envs.iter()
                .any(|(k, v)| *k == OsStr::new("PATH") && v.is_some()),
            "PATH should be passed through"
        );
    }
}

#[test]
fn test_tokenize_command_splits_on_whitespace() {
    assert_eq!(
        tokenize_command("python3 server.py --verbose"),
        vec!["python3", "server.py", "--verbose"]
    );
}

#[test]
fn test_tokenize_command_honors_double_quotes() {
    assert_eq!(
        tokenize_command(r#"node "my server.js" --flag"#),
        vec!["node", "my server.js", "--flag"]
    );
}

#[test]
fn test_tokenize_command_honors_single_quotes() {
    assert_eq!(
        tokenize_command("sh -c 'echo hello world'"),
        vec!["sh", "-c", "echo hello world"]
    );
}

#[test]
fn test_tokenize_command_collapses_repeated_whitespace() {
    assert_eq!(
        tokenize_command("  echo   hi  "),
        vec!["echo", "hi"]
    );
}

#[test]
fn test_spawn_target_command_fails_on_empty_string() {
    let err = spawn_target_command("").unwrap_err();
    assert!(matches!(err, crate::errors::TraceError::SpawnFailed(_)));
}

#[test]
fn test_spawn_target_command_fails_on_missing_executable() {
    let err = spawn_target_command("definitely-not-a-real-binary-xyz").unwrap_err();
    assert!(matches!(err, crate::errors::TraceError::SpawnFailed(_)));
}

#[test]
fn test_scrubbed_command_passes_home() {
    if std::env::var("HOME").is_ok() {
        let cmd = scrubbed_command("echo");
        let envs: Vec<_> = cmd.as_std().get_envs().collect();
        assert!(
            envs.iter()
                .any(|(k, v)| *k == OsStr::new("HOME") && v.is_some()),
            "HOME should be passed through"
        );
    }
}
