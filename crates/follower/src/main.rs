use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

use yo_common::config::AppConfig;
use yo_common::db;
use yo_follower::follower::{BlockFollower, FollowerConfig};
use yo_follower::role::FollowerRole;
use yo_follower::source::SteemdClient;
use yo_handlers::HandlerRegistry;
use yo_supervisor::health::{self, HealthState};
use yo_supervisor::{Supervisor, SupervisorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yo_follower=info,yo_engine=info,yo_supervisor=info".into()),
        )
        .json()
        .init();

    tracing::info!("Yo blockchain follower starting...");

    let config = AppConfig::from_env()?;
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;

    let source = SteemdClient::new(&config.steemd_url)?;
    let registry = HandlerRegistry::standard();
    tracing::info!(
        steemd_url = %config.steemd_url,
        handlers = registry.len(),
        "Handler registry built"
    );

    let follower = BlockFollower::new(
        source,
        pool.clone(),
        registry,
        FollowerConfig::from_app_config(&config),
    );
    let supervisor = Supervisor::new(
        pool,
        FollowerRole::new(follower),
        SupervisorConfig::from_app_config(&config),
    );

    let shutdown = CancellationToken::new();
    let health_task = match &config.health_listen_addr {
        Some(addr) => {
            let addr: SocketAddr = addr.parse()?;
            let state = HealthState::new(vec![supervisor.subscribe()]);
            Some(tokio::spawn(health::serve(addr, state, shutdown.clone())))
        }
        None => None,
    };

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal, stopping gracefully...");
                signal.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let result = supervisor.run(shutdown.clone()).await;
    shutdown.cancel();
    if let Some(task) = health_task {
        if let Ok(Err(e)) = task.await {
            tracing::error!(error = %e, "Health endpoint exited with error");
        }
    }

    tracing::info!("Yo blockchain follower stopped.");
    result
}
