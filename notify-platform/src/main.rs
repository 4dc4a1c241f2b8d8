use std::sync::Arc;

use notify_platform::api::{ApiServer, ApiServerConfig, AppState, JwtService};
use notify_platform::audit::DbAuditSink;
use notify_platform::broker::{AmqpBroker, AmqpConfig};
use notify_platform::config::{AppConfig, load_dotenv};
use notify_platform::database::{
    self,
    repositories::{SqlxAuditRepository, SqlxNotificationRepository, SqlxRateLimitRepository},
};
use notify_platform::health::{DatabaseProbe, HealthChecker};
use notify_platform::ingress::{Ingress, IngressTimeouts};
use notify_platform::logging::{LogFormat, init_logging};
use notify_platform::panic_hook;
use notify_platform::ratelimit::{AdmissionGate, RateLimitResolver, RedisQuotaCounter};
use tokio_util::sync::CancellationToken;
use tracing::info;

const LOG_PREFIX: &str = "notify-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let config = AppConfig::from_env()?;

    let (logging, _guard) = init_logging(&config.log_dir, LOG_PREFIX, LogFormat::from_env())?;
    panic_hook::install(&config.log_dir, LOG_PREFIX);

    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(shutdown.clone());

    let jwt_service = Arc::new(JwtService::from_settings(config.require_jwt()?));

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let counter =
        Arc::new(RedisQuotaCounter::connect(&config.redis_url, config.store_timeout).await?);
    let broker = Arc::new(
        AmqpBroker::connect(&AmqpConfig {
            url: config.amqp_url.clone(),
            connection_name: LOG_PREFIX.to_string(),
            operation_timeout: config.broker_timeout,
            ..Default::default()
        })
        .await?,
    );

    let notifications = Arc::new(SqlxNotificationRepository::new(pool.clone()));
    let audit_repository = Arc::new(SqlxAuditRepository::new(pool.clone()));
    let audit_sink = Arc::new(DbAuditSink::new(
        audit_repository.clone(),
        config.store_timeout,
    ));

    let gate = Arc::new(AdmissionGate::new(
        RateLimitResolver::new(
            Arc::new(SqlxRateLimitRepository::new(pool.clone())),
            config.store_timeout,
        ),
        counter.clone(),
    ));
    let ingress = Arc::new(
        Ingress::new(gate, notifications.clone(), broker.clone(), audit_sink.clone())
            .with_timeouts(IngressTimeouts {
                store: config.store_timeout,
                broker: config.broker_timeout,
            }),
    );

    let health_checker = Arc::new(
        HealthChecker::new(config.store_timeout)
            .with_probe(Arc::new(DatabaseProbe(pool.clone())))
            .with_probe(counter)
            .with_probe(broker.clone()),
    );

    let state = AppState::new()
        .with_jwt_service(jwt_service)
        .with_ingress(ingress)
        .with_notification_repository(notifications)
        .with_audit(audit_repository, audit_sink)
        .with_health_checker(health_checker)
        .with_store_timeout(config.store_timeout);

    let server = ApiServer::with_state(ApiServerConfig::from_env_or_default(), state);
    let server_token = server.cancel_token();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C, shutting down");
            }
            shutdown.cancel();
            server_token.cancel();
        }
    });

    server.run().await?;

    shutdown.cancel();
    if let Err(e) = broker.close().await {
        tracing::warn!(error = %e, "Failed to close broker connection");
    }
    pool.close().await;

    info!("notify-service stopped");
    Ok(())
}
