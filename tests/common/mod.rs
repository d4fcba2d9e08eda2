// Shared fixture for integration tests that drive a real child-process
// tool server over stdio.
#![allow(dead_code)]

use std::io::Write;

use tempfile::TempDir;

/// A minimal POSIX-shell tool server implementing the fixed init sequence
/// (`initialize` / `notifications/initialized` / `tools/list`) plus a
/// single `add` tool taking `{a: integer, b: integer}`. Good-faith argument
/// validation is enough to exercise the Mutation Generator's sequence
/// against `pass` and `graceful_fail` outcomes without pulling in a real
/// language runtime as a test dependency.
const FIXTURE_SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s' "$line" | grep -o '"id":[0-9]*' | head -1 | cut -d: -f2)
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fixture","version":"0.0.0"}}}\n' "$id"
      ;;
    *'"method":"notifications/initialized"'*)
      ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"add","inputSchema":{"type":"object","properties":{"a":{"type":"integer"},"b":{"type":"integer"}},"required":["a","b"]}}]}}\n' "$id"
      ;;
    *'"method":"tools/call"'*)
      case "$line" in
        *'"a":'*)
          case "$line" in
            *'"a":null'*|*'"b":null'*|*'"a":"'*|*'"b":"'*)
              printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32602,"message":"Invalid argument: a and b must be integers"}}\n' "$id"
              ;;
            *'"b":'*)
              printf '{"jsonrpc":"2.0","id":%s,"result":{"sum":7}}\n' "$id"
              ;;
            *)
              printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32602,"message":"missing required parameter b"}}\n' "$id"
              ;;
          esac
          ;;
        *)
          printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32602,"message":"missing required parameter a"}}\n' "$id"
          ;;
      esac
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"method not found"}}\n' "$id"
      ;;
  esac
done
"#;

/// Writes the fixture server to a temp directory and returns the target
/// command to spawn it, along with the directory guard the caller must
/// keep alive for the server process's lifetime.
pub fn fixture_server() -> (TempDir, String) {
    let dir = TempDir::new().expect("create fixture temp dir");
    let path = dir.path().join("fixture_server.sh");
    let mut file = std::fs::File::create(&path).expect("write fixture server");
    file.write_all(FIXTURE_SCRIPT.as_bytes()).expect("write fixture script");
    let command = format!("sh {}", path.display());
    (dir, command)
}
