mod allocator;
mod conflicts;
mod db;
mod ipc;
mod jobs;
mod model;
mod scheduler;
mod seating;
mod slots;
mod store;

use std::io::{self, BufRead, Write};

fn init_logging() {
    // stdout carries the IPC protocol, so logs always go to stderr.
    let env = env_logger::Env::new()
        .filter_or("EXAMD_LOG", std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Stderr)
        .init();
}

fn main() {
    init_logging();
    log::info!("examd {} starting", env!("CARGO_PKG_VERSION"));

    let mut state = ipc::AppState::new();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                log::error!("stdin read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    log::info!("stdin closed, exiting");
}
