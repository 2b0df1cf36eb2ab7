//! flowgate gateway binary.
//!
//! Loads a JSON gateway definition, builds the proxy flows, and serves them
//! until SIGINT or SIGTERM. On Unix, SIGHUP reloads the definition in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use flowgate_core::{ExpressionCompiler, FlowController, HttpClient, ScriptConfig};
use flowgate_server::builder::{FactoryContext, FlowBuilder, GatewayDefinition, InterceptorRegistry};
use flowgate_server::client::ReqwestHttpClient;
use flowgate_server::network::{NetworkConfig, NetworkModule};
use flowgate_server::proxy::{RuleManager, RuleMatcher};
use flowgate_server::service::{build_exchange_pipeline, ExchangeProcessor, GatewayConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// HTTP API gateway driven by interceptor flows.
#[derive(Debug, Parser)]
#[command(name = "flowgate", version, about, long_about = None)]
struct Cli {
    /// Gateway definition (JSON)
    #[arg(short, long, env = "FLOWGATE_CONFIG")]
    config: PathBuf,

    #[arg(long, env = "FLOWGATE_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, env = "FLOWGATE_PORT", default_value_t = 8080)]
    port: u16,

    /// Hide internal details in problem responses
    #[arg(long, env = "FLOWGATE_PRODUCTION")]
    production: bool,

    #[arg(long, value_enum, env = "FLOWGATE_LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "FLOWGATE_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Exchanges processed at once before new ones are shed
    #[arg(long, env = "FLOWGATE_MAX_CONCURRENT_EXCHANGES", default_value_t = 1000)]
    max_concurrent_exchanges: u32,

    #[arg(long, env = "FLOWGATE_BACKEND_TIMEOUT_SECS", default_value_t = 30)]
    backend_timeout_secs: u64,

    #[arg(long, env = "FLOWGATE_CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    connect_timeout_secs: u64,

    #[arg(long, env = "FLOWGATE_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    request_timeout_secs: u64,

    /// Grace period for in-flight exchanges on shutdown
    #[arg(long, env = "FLOWGATE_DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    drain_timeout_secs: u64,

    #[arg(long, env = "FLOWGATE_MAX_BODY_BYTES", default_value_t = 10 * 1024 * 1024)]
    max_body_bytes: usize,
}

impl Cli {
    fn gateway_config(&self, scripts: ScriptConfig) -> GatewayConfig {
        GatewayConfig {
            production: self.production,
            max_concurrent_exchanges: self.max_concurrent_exchanges,
            backend_timeout: Duration::from_secs(self.backend_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            scripts,
            network: NetworkConfig {
                host: self.host.clone(),
                port: self.port,
                request_timeout: Duration::from_secs(self.request_timeout_secs),
                max_body_bytes: self.max_body_bytes,
                drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Some(port) = cli.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(port, "metrics exporter listening");
    }

    let definition = load_definition(&cli.config)?;
    let config = Arc::new(cli.gateway_config(definition.scripts.clone()));

    let client: Arc<dyn HttpClient> = Arc::new(
        ReqwestHttpClient::new(config.backend_timeout, config.connect_timeout)
            .context("failed to build backend HTTP client")?,
    );
    let controller = FlowController::new(config.production);
    let builder = FlowBuilder::new(
        Arc::new(InterceptorRegistry::default()),
        FactoryContext::new(controller, ExpressionCompiler::new(&config.scripts), Arc::clone(&client)),
    );

    let proxies = builder
        .build_proxies(&definition.proxies)
        .with_context(|| format!("invalid gateway definition {}", cli.config.display()))?;
    let rules = Arc::new(RuleManager::new(proxies));
    info!(proxies = rules.len(), production = config.production, "gateway definition loaded");

    let matcher: Arc<dyn RuleMatcher> = Arc::clone(&rules) as Arc<dyn RuleMatcher>;
    let processor = ExchangeProcessor::new(matcher, client, controller);
    let pipeline = build_exchange_pipeline(processor, &config);

    let mut network = NetworkModule::new(Arc::clone(&config), pipeline);
    let port = network.start().await?;
    info!(port, "flowgate listening");

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(cli.config.clone(), builder, rules));

    network.serve(shutdown_signal()).await
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

fn load_definition(path: &Path) -> anyhow::Result<GatewayDefinition> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    GatewayDefinition::from_json(&text).with_context(|| format!("failed to parse {}", path.display()))
}

/// Rebuilds the proxies from `path` on every SIGHUP. A definition that fails
/// to load or build leaves the current proxies in place.
#[cfg(unix)]
async fn reload_on_hangup(path: PathBuf, builder: FlowBuilder, rules: Arc<RuleManager>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGHUP, reload disabled");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!(path = %path.display(), "reloading gateway definition");
        let rebuilt = load_definition(&path).and_then(|definition| {
            builder
                .build_proxies(&definition.proxies)
                .context("invalid gateway definition")
        });
        match rebuilt {
            Ok(proxies) => rules.replace(proxies),
            Err(e) => error!(error = %format!("{e:#}"), "reload failed, keeping current proxies"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
