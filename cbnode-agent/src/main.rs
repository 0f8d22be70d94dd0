mod config;
use cbnode_core::{
    Bootstrap, ClusterGateway, DynStore, HealthMonitor, MembershipCoordinator, RegistryBuilder,
    SystemHost, WaitClusterOperation,
};
use clap::{Parser, Subcommand};
use crate::config::Config;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const WAIT_MAX_ATTEMPTS: u32 = 10_000;

#[derive(Parser)]
#[command(name = "cbnode")]
#[command(about = "Bring a Couchbase node online and keep it in its etcd-coordinated cluster")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "cbnode.yaml")]
    config: String,

    /// Comma separated etcd endpoints, overriding the config file
    #[arg(long, global = true, value_delimiter = ',')]
    etcd_servers: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the local node, create or join the cluster, then heartbeat forever
    Start {
        /// Address other nodes and the cluster use to reach this node
        #[arg(long)]
        local_ip: Option<String>,
    },
    /// Block until every node in the cluster reports healthy
    WaitUntilRunning,
    /// Block until at least N nodes are in the cluster and all are healthy
    WaitUntilNodes {
        #[arg(long)]
        num_nodes: usize,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cbnode_agent=info,cbnode_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut cfg = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    if !cli.etcd_servers.is_empty() {
        cfg.registry.etcd.endpoints = cli.etcd_servers.clone();
    }

    let store = match connect_registry(&cfg).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to connect to registry: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Start { local_ip } => {
            if let Some(local_ip) = local_ip {
                cfg.local_ip = Some(local_ip);
            }
            start_node(&cfg, store).await
        }
        Commands::WaitUntilRunning => wait_cluster(&cfg, store, None).await,
        Commands::WaitUntilNodes { num_nodes } => wait_cluster(&cfg, store, Some(num_nodes)).await,
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn connect_registry(cfg: &Config) -> cbnode_core::Result<DynStore> {
    RegistryBuilder::new()
        .backend(cfg.registry.backend.as_str())
        .etcd_endpoints(cfg.registry.etcd.endpoints.clone())
        .build()
        .await
}

async fn start_node(cfg: &Config, store: DynStore) -> cbnode_core::Result<()> {
    let node = cfg.node_config()?;
    tracing::info!(
        "Starting node {} (admin port {}, namespace {})",
        node.address(),
        node.admin_port,
        cfg.registry.namespace_or_default()
    );

    let never = Bootstrap::new(node, store, Arc::new(SystemHost::default()))
        .keys(cfg.keys())
        .heartbeat_ttl(cfg.heartbeat_ttl())
        .request_timeout(cfg.request_timeout())
        .run()
        .await?;
    match never {}
}

async fn wait_cluster(
    cfg: &Config,
    store: DynStore,
    num_nodes: Option<usize>,
) -> cbnode_core::Result<()> {
    let address = cfg.local_ip.clone().unwrap_or_default();
    let membership = MembershipCoordinator::new(store, cfg.keys(), address);
    let credentials = membership.load_admin_credentials().await?;

    let gateway = Arc::new(ClusterGateway::new(credentials, cfg.request_timeout())?);
    let health = HealthMonitor::new(gateway, cfg.admin_port);
    let wait = WaitClusterOperation::new(membership, health);

    match num_nodes {
        Some(num_nodes) => wait.until_num_nodes_running(num_nodes, WAIT_MAX_ATTEMPTS).await,
        None => wait.until_running(WAIT_MAX_ATTEMPTS).await,
    }
}
