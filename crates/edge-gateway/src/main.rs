//! Edge Gateway - authenticating, rate-limiting reverse proxy

use clap::Parser;
use edge_gateway::{run_server, Environment, GatewayConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "edge-gateway")]
#[command(about = "Edge gateway for the auth, content and comment services")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "GATEWAY_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "PORT")]
    port: u16,

    /// Auth/user service base URL
    #[arg(long, default_value = "http://localhost:8000", env = "AUTH_SERVICE_URL")]
    auth_service_url: String,

    /// Content service base URL
    #[arg(long, default_value = "http://localhost:3001", env = "CONTENT_SERVICE_URL")]
    content_service_url: String,

    /// Comment service base URL
    #[arg(long, default_value = "http://localhost:4000", env = "COMMENT_SERVICE_URL")]
    comment_service_url: String,

    /// Rate limit window in milliseconds
    #[arg(long, default_value = "900000", env = "RATE_LIMIT_WINDOW_MS")]
    rate_limit_window_ms: u64,

    /// Maximum requests per client per window
    #[arg(long, default_value = "100", env = "RATE_LIMIT_MAX_REQUESTS")]
    rate_limit_max_requests: u32,

    /// Header identifying the client (e.g. x-forwarded-for behind a load balancer)
    #[arg(long, env = "RATE_LIMIT_CLIENT_HEADER")]
    rate_limit_client_header: Option<String>,

    /// Interval between stale rate limit entry sweeps (defaults to the window)
    #[arg(long, env = "RATE_LIMIT_EVICTION_MS")]
    eviction_interval_ms: Option<u64>,

    /// Timeout for downstream calls in milliseconds
    #[arg(long, default_value = "10000", env = "UPSTREAM_TIMEOUT_MS")]
    upstream_timeout_ms: u64,

    /// Operating mode: development, test or production
    #[arg(long, default_value = "development", env = "GATEWAY_ENV")]
    environment: Environment,

    /// Disable CORS headers
    #[arg(long, env = "GATEWAY_NO_CORS")]
    no_cors: bool,

    /// Enable debug logging
    #[arg(short, long, env = "GATEWAY_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Parse arguments
    let args = Args::parse();

    // Setup logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("edge_gateway={},tower_http=debug", log_level).into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting edge gateway on {}:{}", args.host, args.port);
    tracing::info!("Auth service: {}", args.auth_service_url);
    tracing::info!("Content service: {}", args.content_service_url);
    tracing::info!("Comment service: {}", args.comment_service_url);

    if args.environment.exposes_error_details() {
        tracing::warn!("⚠️  Running in {} mode - error details are exposed to callers", args.environment);
    }

    let config = GatewayConfig {
        host: args.host,
        port: args.port,
        auth_service_url: args.auth_service_url,
        content_service_url: args.content_service_url,
        comment_service_url: args.comment_service_url,
        rate_limit_window_ms: args.rate_limit_window_ms,
        rate_limit_max_requests: args.rate_limit_max_requests,
        client_id_header: args.rate_limit_client_header,
        eviction_interval_ms: args.eviction_interval_ms.unwrap_or(args.rate_limit_window_ms),
        upstream_timeout_ms: args.upstream_timeout_ms,
        environment: args.environment,
        cors_enabled: !args.no_cors,
        ..Default::default()
    };

    // Run the server
    run_server(config).await
}
