use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use yo_common::config::AppConfig;
use yo_common::db;
use yo_common::types::TransportKind;
use yo_engine::{RateLimiter, WorkQueue};
use yo_notifier::directory::{ConveyorDirectory, Directory, NoDirectory};
use yo_notifier::transports::{
    EmailConfig, EmailTransport, PollTransport, PushTransport, SmsConfig, SmsTransport, Transport,
};
use yo_notifier::{DispatchConfig, DispatchRole, DispatchWorker};
use yo_supervisor::health::{self, HealthState};
use yo_supervisor::{Supervisor, SupervisorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yo_notifier=info,yo_engine=info,yo_supervisor=info".into()),
        )
        .json()
        .init();

    tracing::info!("Yo notification sender starting...");

    let config = AppConfig::from_env()?;
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;

    // One claim connection per loop. Poll loops hold a second one for the
    // poll store write.
    let dispatch = DispatchConfig::from_app_config(&config);
    let worker_connections = ((TransportKind::ALL.len() + 1) * dispatch.workers + 2) as u32;
    let worker_pool = db::create_worker_pool(
        &config.database_url,
        worker_connections,
        Duration::from_secs(config.queue_idle_tx_timeout_secs),
    )
    .await?;

    let directory: Arc<dyn Directory> = match &config.conveyor_url {
        Some(url) => Arc::new(ConveyorDirectory::new(url)?),
        None => {
            tracing::info!("CONVEYOR_URL not set, contact details come from user settings only");
            Arc::new(NoDirectory)
        }
    };
    let limiter = RateLimiter::new(config.rate_limits.clone());
    let queue = WorkQueue::new(worker_pool.clone());
    let supervisor_config = SupervisorConfig::from_app_config(&config);

    let transports: Vec<Arc<dyn Transport>> = vec![
        Arc::new(EmailTransport::new(EmailConfig::from_app_config(&config))),
        Arc::new(SmsTransport::new(SmsConfig::from_app_config(&config))),
        Arc::new(PollTransport::new(worker_pool.clone())),
        Arc::new(PushTransport::new(config.push_gateway_url.clone())),
    ];

    let shutdown = CancellationToken::new();
    let mut receivers = Vec::new();
    let mut supervisors = JoinSet::new();
    for transport in transports {
        let worker = DispatchWorker::new(
            queue.clone(),
            transport,
            Arc::clone(&directory),
            limiter.clone(),
            dispatch,
        );
        let supervisor = Supervisor::new(pool.clone(), DispatchRole::new(worker), supervisor_config);
        receivers.push(supervisor.subscribe());
        supervisors.spawn(supervisor.run(shutdown.clone()));
    }

    let health_task = match &config.health_listen_addr {
        Some(addr) => {
            let addr: SocketAddr = addr.parse()?;
            Some(tokio::spawn(health::serve(
                addr,
                HealthState::new(receivers),
                shutdown.clone(),
            )))
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

    let mut result = Ok(());
    while let Some(joined) = supervisors.join_next().await {
        let outcome = joined.map_err(anyhow::Error::from).and_then(|r| r);
        if let Err(e) = outcome {
            tracing::error!(error = %e, "Supervisor exited with error");
            shutdown.cancel();
            if result.is_ok() {
                result = Err(e);
            }
        }
    }
    shutdown.cancel();

    if let Some(task) = health_task {
        if let Ok(Err(e)) = task.await {
            tracing::error!(error = %e, "Health endpoint exited with error");
        }
    }

    tracing::info!("Yo notification sender stopped.");
    result
}
