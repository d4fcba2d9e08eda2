//! Thin stdio entry point that exercises the Stdio Proxy end-to-end against
//! real process stdio. The command-line surface itself is out of scope for
//! this crate; this binary is the thinnest possible wiring over the
//! library, not a designed CLI — a single positional target-command plus
//! `--chaos <path>` and `--journal <path>`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use mcptrace::bus::FanOutBus;
use mcptrace::config::load_chaos_config;
use mcptrace::errors::TraceError;
use mcptrace::journal::JournalStore;
use mcptrace::proxy;

/// BSD sysexits `EX_USAGE`: missing required arguments.
const EX_USAGE: u8 = 64;

struct Args {
    target_command: String,
    chaos_path: Option<PathBuf>,
    journal_path: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut raw: Vec<String> = std::env::args().skip(1).collect();
    let mut chaos_path = None;
    let mut journal_path = None;

    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "--chaos" => {
                let value = raw.get(i + 1).ok_or("--chaos requires a path argument")?;
                chaos_path = Some(PathBuf::from(value));
                raw.drain(i..=i + 1);
            }
            "--journal" => {
                let value = raw.get(i + 1).ok_or("--journal requires a path argument")?;
                journal_path = Some(PathBuf::from(value));
                raw.drain(i..=i + 1);
            }
            _ => i += 1,
        }
    }

    if raw.is_empty() {
        return Err("usage: mcptrace-proxy <target-command...> [--chaos <path>] [--journal <path>]".to_string());
    }

    Ok(Args {
        target_command: raw.join(" "),
        chaos_path,
        journal_path,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,mcptrace=debug".parse().unwrap());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(EX_USAGE);
        }
    };

    let chaos_config = match args.chaos_path {
        Some(path) => match load_chaos_config(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("chaos config error: {e}");
                return ExitCode::from(2);
            }
        },
        None => None,
    };

    let journal = match args.journal_path {
        Some(path) => JournalStore::open(&path),
        None => JournalStore::open_in_memory(),
    };
    let journal = match journal {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("journal open error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let bus = Arc::new(FanOutBus::new());

    let handle = match proxy::start(
        &args.target_command,
        chaos_config,
        journal,
        bus,
        None,
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await
    {
        Ok(handle) => handle,
        Err(TraceError::SpawnFailed(msg)) => {
            eprintln!("failed to spawn tool server: {msg}");
            return ExitCode::from(1);
        }
        Err(e) => {
            eprintln!("failed to start proxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    // A signal, client-stdin EOF, or tool-server exit all drive the proxy's
    // own end-of-run sequence; a signal races the run to completion rather
    // than tearing it down out from under the run loop.
    tokio::select! {
        result = handle.join() => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(TraceError::SpawnFailed(msg)) => {
                eprintln!("tool server spawn failed: {msg}");
                ExitCode::from(1)
            }
            Err(e) => {
                eprintln!("proxy run ended with error: {e}");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            ExitCode::SUCCESS
        }
    }
}
