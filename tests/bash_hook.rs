//! Runs the bash hook in a real interactive shell against a fake `totalrecall`.

#![cfg(unix)]

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;

const HOOK: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/hooks/bash.sh");

// logs "<encoding> <return code> <decoded command>" per submit
const FAKE_CLIENT: &str = r#"#!/bin/sh
cmd= rc= enc=
while [ $# -gt 0 ]; do
  case "$1" in
    --command) cmd=$2; shift ;;
    --return-code) rc=$2; shift ;;
    --encoding) enc=$2; shift ;;
  esac
  shift
done
printf '%s %s %s\n' "$enc" "$rc" "$(printf %s "$cmd" | base64 -d)" >> "$TOTALRECALL_TEST_LOG"
"#;

fn bash_available() -> bool {
    Command::new("bash")
        .arg("--version")
        .stdout(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn run_session(dir: &Path, prompt_command: &str, input: &str) -> Vec<String> {
    let log = dir.join("submits.log");
    let _ = fs::remove_file(&log);

    let mut child = Command::new("bash")
        .args(["--rcfile", HOOK, "-i"])
        .env_clear()
        .env("PATH", format!("{}:/usr/bin:/bin", dir.display()))
        .env("HOME", dir)
        .env("HISTFILE", dir.join("history"))
        .env("TOTALRECALL_TEST_LOG", &log)
        .env("PROMPT_COMMAND", prompt_command)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait().unwrap();

    // submits run in the background; wait for all of them
    let expected = input.lines().filter(|l| !l.trim().is_empty()).count();
    let mut lines = Vec::new();
    for _ in 0..100 {
        lines = fs::read_to_string(&log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect();
        if lines.len() >= expected {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    lines.sort();
    lines
}

#[test]
fn commands_keep_their_own_return_code() {
    if !bash_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let client = temp.path().join("totalrecall");
    fs::write(&client, FAKE_CLIENT).unwrap();
    fs::set_permissions(&client, fs::Permissions::from_mode(0o755)).unwrap();

    let expected = vec!["base64 0 echo one", "base64 0 echo three", "base64 1 false"];

    // an existing PROMPT_COMMAND must not shift commands onto the next return code
    for prompt_command in ["", "true", "true;  "] {
        let submitted = run_session(temp.path(), prompt_command, "echo one\nfalse\n\necho three\n");
        assert_eq!(submitted, expected, "PROMPT_COMMAND={:?}", prompt_command);
    }
}
