//! Hybrid CSI Provisioner
//!
//! Serves hybrid StorageClasses by provisioning each claim through the
//! first backing StorageClass usable from the scheduled node.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hybrid_csi_provisioner::csi::{IdentityService, NodeService};
use hybrid_csi_provisioner::{
    controller, metrics, Context, ControllerConfig, Error, HybridProvisioner, KubeCluster,
    KubeListers, ProvisionMethod, ProvisionMetrics, ProvisionerConfig, Result, RetryPolicy,
    DEFAULT_DRIVER_NAME,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Hybrid CSI Provisioner - delegates claims to node-usable StorageClasses
///
/// There is no leader election: run a single replica, concurrent replicas
/// race on the same proxy claims.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Provisioner name hybrid StorageClasses refer to
    #[arg(long, env = "DRIVER_NAME", default_value = DEFAULT_DRIVER_NAME)]
    driver_name: String,

    /// Backing claim strategy (auto, annotation, pod)
    #[arg(long, env = "PROVISION_METHOD", default_value = "auto")]
    method: String,

    /// Path to a kubeconfig file, in-cluster configuration when unset
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<String>,

    /// Name of the node this process runs on
    #[arg(long, env = "NODE_NAME")]
    node_id: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address, empty disables it
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Path metrics are served on
    #[arg(long, env = "METRICS_PATH", default_value = "/metrics")]
    metrics_path: String,

    /// Seconds to wait for a backing claim to be bound
    #[arg(long, env = "BIND_TIMEOUT_SECS", default_value = "30")]
    bind_timeout_secs: u64,

    /// Attempts for pod and proxy claim deletion
    #[arg(long, env = "CLEANUP_RETRY_STEPS", default_value = "5")]
    cleanup_retry_steps: u32,

    /// Seconds between deletion attempts
    #[arg(long, env = "CLEANUP_RETRY_INTERVAL_SECS", default_value = "10")]
    cleanup_retry_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            driver_name: self.driver_name.clone(),
            method: ProvisionMethod::from_flag(&self.method),
            bind_timeout: Duration::from_secs(self.bind_timeout_secs),
            cleanup_retry: RetryPolicy::new(
                self.cleanup_retry_steps,
                Duration::from_secs(self.cleanup_retry_interval_secs),
            ),
            ..Default::default()
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    let identity = IdentityService::new(&args.driver_name);
    let plugin = identity.get_plugin_info();

    info!("Starting Hybrid CSI Provisioner");
    info!("  Driver: {} {}", plugin.name, plugin.vendor_version);
    info!("  Version: {}", hybrid_csi_provisioner::VERSION);
    info!("  Method: {}", args.method);

    let client = kube_client(&args).await?;

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let registry = prometheus::default_registry().clone();
    let provision_metrics = ProvisionMetrics::register(&registry)?;
    if args.metrics_addr.is_empty() {
        info!("Metrics server disabled");
    } else {
        let metrics_addr = args.metrics_addr.clone();
        let metrics_path = args.metrics_path.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&metrics_addr, metrics_path, registry).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let cluster = KubeCluster::new(client.clone());

    if let Some(node_id) = &args.node_id {
        let node = NodeService::new(node_id, cluster.clone());
        match node.get_info().await {
            Ok(info) => info!(node = %info.node_id, topology = ?info.accessible_topology, "node info"),
            Err(e) => warn!(node = %node_id, error = %e, "node info unavailable"),
        }
    }

    let listers = KubeListers::start(client.clone()).await?;

    let provisioner =
        HybridProvisioner::new(args.provisioner_config(), listers.clone(), cluster.clone());

    let ctx = Context::new(
        provisioner,
        listers,
        cluster,
        args.driver_name.clone(),
        provision_metrics,
        ControllerConfig::default(),
    );

    controller::run(client, ctx).await;

    info!("Provisioner shutdown complete");
    Ok(())
}

// =============================================================================
// Kubernetes Client
// =============================================================================

async fn kube_client(args: &Args) -> Result<kube::Client> {
    let config = match &args.kubeconfig {
        Some(path) => {
            info!("Building kube config from {}", path);
            let kubeconfig = kube::config::Kubeconfig::read_from(path).map_err(|e| {
                Error::Configuration(format!("Invalid kubeconfig {}: {}", path, e))
            })?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &Default::default())
                .await
                .map_err(|e| Error::Configuration(format!("Invalid kubeconfig {}: {}", path, e)))?
        }
        None => {
            info!("Building kube config for running in cluster");
            kube::Config::infer()
                .await
                .map_err(|e| Error::Configuration(format!("Failed to infer kube config: {}", e)))?
        }
    };

    Ok(kube::Client::try_from(config)?)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let directive = |d: &str| {
        d.parse::<tracing_subscriber::filter::Directive>()
            .map_err(|e| Error::Configuration(format!("Invalid log directive {}: {}", d, e)))
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("kube=info")?)
        .add_directive(directive("tower=warn")?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let mut response = Response::new(Body::from("ok"));
            match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => {}
                _ => {
                    *response.body_mut() = Body::from("not found");
                    *response.status_mut() = StatusCode::NOT_FOUND;
                }
            }
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: &str,
    path: String,
    registry: prometheus::Registry,
) -> Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let path = Arc::new(path);
    let registry = Arc::new(registry);

    let make_svc = make_service_fn(move |_conn| {
        let path = path.clone();
        let registry = registry.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let path = path.clone();
                let registry = registry.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    if req.uri().path() != path.as_str() {
                        *response.body_mut() = Body::from("not found");
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        return Ok::<_, std::convert::Infallible>(response);
                    }

                    match metrics::encode(&registry) {
                        Ok((content_type, buffer)) => {
                            if let Ok(value) = content_type.parse::<hyper::header::HeaderValue>() {
                                response.headers_mut().insert(CONTENT_TYPE, value);
                            }
                            *response.body_mut() = Body::from(buffer);
                        }
                        Err(e) => {
                            *response.body_mut() = Body::from(e.to_string());
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        }
                    }
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
