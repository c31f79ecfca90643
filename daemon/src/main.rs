use anyhow::Result;
use cancerdetect_daemon::{
    config::Config,
    db::Database,
    notifier::Notifier,
    service::Service,
    socket::{handle_client, SocketServer},
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config() -> Config {
    let config_path = Config::config_path();
    if config_path.exists() {
        Config::load(&config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {:#}, using defaults", e);
            Config::default()
        })
    } else {
        info!("No config file found at {:?}, using defaults", config_path);
        Config::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    info!("CancerDetect daemon starting...");

    let config = load_config();

    let db_path = config.database_path();
    let db = Database::open(&db_path)?;
    db.init_schema()?;
    info!("Model store at {:?}", db_path);

    let socket_path = SocketServer::socket_path();
    let server = SocketServer::bind(&socket_path).await?;

    let notifier = Notifier::new(config.general.notifications);
    let (service, _events_task) = Service::start(config, db, notifier, server.broadcast_sender());

    info!("Daemon ready, listening for connections...");

    loop {
        tokio::select! {
            accepted = server.accept() => match accepted {
                Ok(stream) => {
                    let service = Arc::clone(&service);
                    let broadcast_rx = server.broadcast_sender().subscribe();
                    tokio::spawn(async move {
                        handle_client(stream, broadcast_rx, service).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
