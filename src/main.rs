//! aeroquery — conversational air-quality assistant.
//!
//! Thin binary crate: resolves `AEROQUERY_*` configuration from the
//! environment, initializes structured logging, and starts the gateway
//! (§6). All orchestration logic lives in the library crates; this file
//! only wires them together, mirroring how the teacher's
//! `agenticlaw-gateway::main` resolves CLI/env config before calling
//! `start_gateway`.

use aeroquery_core::{AuthConfig, AuthMode, BindMode, CostLimits, GatewayConfig};
use aeroquery_agent::session::SessionManagerConfig;
use aeroquery_gateway::{start_gateway, ExtendedConfig};
use clap::Parser;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "aeroquery", about = "Conversational air-quality assistant — agent gateway")]
struct Cli {
    /// Port to bind the HTTP/SSE gateway on.
    #[arg(short, long, env = "AEROQUERY_PORT", default_value_t = 8089)]
    port: u16,

    /// Bind mode: "loopback" (127.0.0.1) or "lan" (0.0.0.0).
    #[arg(short, long, env = "AEROQUERY_BIND", default_value = "lan")]
    bind: String,

    /// Disable bearer-token auth entirely (local development only).
    #[arg(long, env = "AEROQUERY_NO_AUTH", default_value_t = false)]
    no_auth: bool,

    /// Gateway bearer token. Falls back to `AEROQUERY_GATEWAY_TOKEN`.
    #[arg(long, env = "AEROQUERY_GATEWAY_TOKEN")]
    token: Option<String>,

    /// LLM backend: anthropic-tools | anthropic-no-tools | local | mock.
    #[arg(long, env = "AEROQUERY_BACKEND", default_value = "mock")]
    backend: String,

    /// Model name passed to the selected provider.
    #[arg(long, env = "AEROQUERY_MODEL", default_value = "claude-sonnet-4-20250514")]
    model: String,

    /// Daily request cap. Unset means unlimited (matches a no-cost local backend).
    #[arg(long, env = "AEROQUERY_MAX_REQUESTS_PER_DAY")]
    max_requests_per_day: Option<u64>,

    /// Daily token cap.
    #[arg(long, env = "AEROQUERY_MAX_TOKENS_PER_DAY")]
    max_tokens_per_day: Option<u64>,

    /// Session idle eviction TTL, in seconds (§4.6 default 3600).
    #[arg(long, env = "AEROQUERY_SESSION_TTL_SECS", default_value_t = 3600)]
    session_ttl_secs: u64,

    /// Session table size cap before LRU eviction kicks in (§4.6 default 50).
    #[arg(long, env = "AEROQUERY_MAX_SESSIONS", default_value_t = 50)]
    max_sessions: usize,

    /// Tool-call retry budget (Open Question (a); default favors latency).
    #[arg(long, env = "AEROQUERY_TOOL_MAX_RETRIES", default_value_t = 1)]
    tool_max_retries: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aeroquery=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let bind_mode = match cli.bind.as_str() {
        "loopback" | "localhost" | "127.0.0.1" => BindMode::Loopback,
        _ => BindMode::Lan,
    };
    let auth = if cli.no_auth {
        AuthConfig { mode: AuthMode::None, token: None }
    } else {
        AuthConfig { mode: AuthMode::Token, token: cli.token }
    };

    let config = ExtendedConfig {
        gateway: GatewayConfig { port: cli.port, bind: bind_mode, auth },
        backend: cli.backend,
        anthropic_api_key: std::env::var("AEROQUERY_ANTHROPIC_API_KEY").ok(),
        model: cli.model,
        cost_limits: CostLimits {
            max_requests_per_day: cli.max_requests_per_day,
            max_tokens_per_day: cli.max_tokens_per_day,
            max_cost_millicents_per_day: None,
        },
        session_config: SessionManagerConfig {
            idle_ttl: Duration::from_secs(cli.session_ttl_secs),
            max_sessions: cli.max_sessions,
        },
        tool_max_retries: cli.tool_max_retries,
    };

    start_gateway(config).await
}
