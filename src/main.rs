//! Scenario Mock Server - CLI Entry Point
//!
//! Loads a configuration, validates it, and can replay a single request
//! against it without opening any socket.

use anyhow::{Context, Result};
use clap::Parser;
use scenario_mock_server::log::RequestLogEntry;
use scenario_mock_server::{MockServer, MockServerConfig, RequestContext, State};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "scenario-mock-server",
    about = "Programmable HTTP mock server - expectations, scenarios and request logs",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-server.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// List configured scenarios as JSON and exit
    #[arg(long)]
    list_scenarios: bool,

    /// Replay one request, e.g. "GET /users/1?page=2", and print the result
    #[arg(short, long, value_name = "METHOD URL")]
    request: Option<String>,

    /// Request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    body: Option<String>,

    /// Scenario to start before replaying the request (repeatable)
    #[arg(short, long = "scenario", value_name = "ID")]
    scenarios: Vec<String>,

    /// Initial scenario state as a JSON object
    #[arg(long, value_name = "JSON")]
    state: Option<String>,
}

fn parse_request(args: &Args, line: &str) -> Result<RequestContext> {
    let (method, url) = line
        .trim()
        .split_once(char::is_whitespace)
        .context("request must look like \"METHOD URL\"")?;

    let mut req = RequestContext::new(method, url.trim());
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("invalid header '{}', expected \"Name: value\"", header))?;
        req = req.with_header(name.trim(), value.trim());
    }
    if let Some(body) = &args.body {
        req = req.with_body(body.as_bytes());
    }
    Ok(req)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print default config if requested
    if args.print_config {
        let default_config = include_str!("../config/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no stubs)");
        MockServerConfig::default()
    };

    // Validate and exit if requested
    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} stubs, {} scenarios defined)",
            config.stubs.len(),
            config.scenarios.len()
        );
        return Ok(());
    }

    let server = MockServer::from_config(&config).await?;

    if args.list_scenarios {
        let scenarios = server.list_scenarios().await;
        println!("{}", serde_json::to_string_pretty(&scenarios)?);
        return Ok(());
    }

    let Some(line) = args.request.as_deref() else {
        println!(
            "Loaded {} stubs and {} scenarios; pass --request to replay a request",
            config.stubs.len(),
            config.scenarios.len()
        );
        return Ok(());
    };

    let state: State = match &args.state {
        Some(json) => serde_json::from_str(json).context("--state must be a JSON object")?,
        None => State::new(),
    };
    for id in &args.scenarios {
        server.start_scenario(id, &state).await?;
    }

    let req = parse_request(&args, line)?;
    let handled = server.handle(&req).await?;
    let last_entries: BTreeMap<String, RequestLogEntry> = server
        .request_logs()
        .await
        .into_iter()
        .filter_map(|(scope, entries)| entries.last().cloned().map(|e| (scope, e)))
        .collect();

    let report = serde_json::json!({
        "status": handled.response.status,
        "headers": handled.response.wire_headers(),
        "body": handled.response.body_text(),
        "delay_ms": handled.response.delay.as_millis() as u64,
        "matched": handled.outcome,
        "log": last_entries,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
