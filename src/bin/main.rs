//! Linkrelay CLI - link/relay service for dApp ⇄ wallet pairing.
//!
//!   linkrelay serve [--port N] [--code-expiry-secs N] [--backlog-cap N]
//!
//! Configuration may also come from the environment (or a .env file):
//!   LINKRELAY_PORT, LINKRELAY_CODE_EXPIRY_SECS, LINKRELAY_BACKLOG_CAP
//!   LINKRELAY_LOG_JSON=1 for JSON logs, RUST_LOG for filtering

use anyhow::Context;
use linkrelay::logging::init_logging;
use linkrelay::runtime::install_signal_handlers;
use linkrelay::{create_router, Linker, LinkerConfig};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }
    if opts.version {
        println!("linkrelay {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("serve") => cmd_serve(&opts),
        Some(cmd) => Err(anyhow::anyhow!("unknown command: {}", cmd)),
        None => {
            print_usage();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    port: Option<u16>,
    code_expiry_secs: Option<i64>,
    backlog_cap: Option<usize>,
    cookie_days: Option<i64>,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        // Load .env file if present
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let value = value.trim().trim_matches('"');
                    if !value.is_empty() && env::var(key.trim()).is_err() {
                        env::set_var(key.trim(), value);
                    }
                }
            }
        }

        let mut opts = ParsedArgs::default();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--port" | "-p" => {
                    i += 1;
                    opts.port = args.get(i).and_then(|v| v.parse().ok());
                }
                "--code-expiry-secs" => {
                    i += 1;
                    opts.code_expiry_secs = args.get(i).and_then(|v| v.parse().ok());
                }
                "--backlog-cap" => {
                    i += 1;
                    opts.backlog_cap = args.get(i).and_then(|v| v.parse().ok());
                }
                "--cookie-days" => {
                    i += 1;
                    opts.cookie_days = args.get(i).and_then(|v| v.parse().ok());
                }
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                other if opts.command.is_none() && !other.starts_with('-') => {
                    opts.command = Some(other.to_string());
                }
                _ => {}
            }
            i += 1;
        }
        opts
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn cmd_serve(opts: &ParsedArgs) -> anyhow::Result<()> {
    let port = opts
        .port
        .or_else(|| env_parse("LINKRELAY_PORT"))
        .unwrap_or(3100);

    let mut config = LinkerConfig::new();
    if let Some(secs) = opts.code_expiry_secs.or_else(|| env_parse("LINKRELAY_CODE_EXPIRY_SECS")) {
        config = config.with_code_expiry_secs(secs);
    }
    if let Some(cap) = opts.backlog_cap.or_else(|| env_parse("LINKRELAY_BACKLOG_CAP")) {
        config = config.with_backlog_cap(cap);
    }
    if let Some(days) = opts.cookie_days.or_else(|| env_parse("LINKRELAY_COOKIE_DAYS")) {
        config = config.with_cookie_days(days);
    }

    let runtime = tokio::runtime::Runtime::new().context("tokio runtime")?;
    runtime.block_on(async move {
        let linker = Arc::new(Linker::new(config));
        let app = create_router(linker.clone());
        let shutdown = install_signal_handlers();

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {}", addr))?;
        info!("linkrelay listening on {}", addr);

        let graceful = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.wait().await })
            .await
            .context("serve")?;

        linker.shutdown().await;
        Ok(())
    })
}

fn print_usage() {
    println!(
        r#"linkrelay - dApp ⇄ wallet link/relay service

USAGE:
    linkrelay serve [OPTIONS]

OPTIONS:
    -p, --port <N>              Listen port (default 3100)
        --code-expiry-secs <N>  Pairing code lifetime (default 300)
        --backlog-cap <N>       Retained messages per feed (default 512)
        --cookie-days <N>       Client identity cookie lifetime (default 15)
    -h, --help                  Show this help
    -V, --version               Show version"#
    );
}
