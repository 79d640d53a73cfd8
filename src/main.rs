use edgeq::config::load_config;
use edgeq::{EdgeNode, utils::logging};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&config.logging.level);

    let node = match EdgeNode::open(&config) {
        Ok(node) => node,
        Err(e) => {
            error!("Failed to open edge node store: {e}");
            std::process::exit(1);
        }
    };
    info!(
        node_id = node.node_id(),
        broker = %config.sync.broker_url,
        pending = node.pending_count(),
        "edge node started"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received. Exiting gracefully.");
    };
    node.run(config.sync.interval(), shutdown).await;
}
