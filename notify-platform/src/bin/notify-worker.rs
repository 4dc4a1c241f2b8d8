use clap::{Parser, ValueEnum};
use std::sync::Arc;

use notify_platform::audit::DbAuditSink;
use notify_platform::broker::{AmqpBroker, AmqpConfig};
use notify_platform::config::{
    AppConfig, GreenApiConfig, SmtpConfig, TelegramConfig, load_dotenv,
};
use notify_platform::database::{
    self,
    repositories::{SqlxAuditRepository, SqlxNotificationRepository},
};
use notify_platform::domain::Channel;
use notify_platform::logging::{LogFormat, init_logging};
use notify_platform::panic_hook;
use notify_platform::utils::http_client::build_client;
use notify_platform::worker::transports::{EmailTransport, TelegramTransport, WhatsAppTransport};
use notify_platform::worker::{ChannelWorker, DeliveryHandler, Transport};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChannelArg {
    Email,
    Telegram,
    Whatsapp,
}

impl From<ChannelArg> for Channel {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Email => Channel::Email,
            ChannelArg::Telegram => Channel::Telegram,
            ChannelArg::Whatsapp => Channel::WhatsApp,
        }
    }
}

/// Deliver queued notifications for one channel.
#[derive(Debug, Parser)]
#[command(name = "notify-worker", version)]
struct Cli {
    /// Channel queue to consume.
    #[arg(long, value_enum, env = "WORKER_CHANNEL")]
    channel: ChannelArg,

    /// Concurrent deliveries; overrides WORKER_CONCURRENCY.
    #[arg(long)]
    concurrency: Option<usize>,
}

fn build_transport(channel: Channel, config: &AppConfig) -> anyhow::Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match channel {
        Channel::Email => Arc::new(EmailTransport::new(&SmtpConfig::from_env()?)?),
        Channel::Telegram => Arc::new(TelegramTransport::new(
            TelegramConfig::from_env()?,
            build_client(config.transport_timeout)?,
        )),
        Channel::WhatsApp => Arc::new(WhatsAppTransport::new(
            GreenApiConfig::from_env()?,
            build_client(config.transport_timeout)?,
        )),
    };
    Ok(transport)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(n) = cli.concurrency {
        config.worker_concurrency = n.max(1);
    }
    let channel = Channel::from(cli.channel);

    let prefix = format!("notify-worker-{}", channel);
    let (logging, _guard) = init_logging(&config.log_dir, &prefix, LogFormat::from_env())?;
    panic_hook::install(&config.log_dir, &prefix);

    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(shutdown.clone());

    let transport = build_transport(channel, &config)?;

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let broker = Arc::new(
        AmqpBroker::connect(&AmqpConfig {
            url: config.amqp_url.clone(),
            connection_name: prefix.clone(),
            operation_timeout: config.broker_timeout,
            ..Default::default()
        })
        .await?,
    );

    let audit = Arc::new(DbAuditSink::new(
        Arc::new(SqlxAuditRepository::new(pool.clone())),
        config.store_timeout,
    ));
    let handler = Arc::new(
        DeliveryHandler::new(
            transport,
            Arc::new(SqlxNotificationRepository::new(pool.clone())),
            audit,
        )
        .with_timeouts(config.store_timeout, config.transport_timeout),
    );
    let worker = Arc::new(ChannelWorker::new(
        handler,
        broker.clone(),
        config.worker_concurrency,
    ));

    tokio::spawn({
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C, draining in-flight deliveries");
            }
            shutdown.cancel();
            worker.stop();
        }
    });

    let result = worker.run().await;

    let stats = worker.stats();
    info!(
        %channel,
        acked = stats.acked,
        requeued = stats.requeued,
        dropped = stats.dropped,
        "notify-worker stopped"
    );

    shutdown.cancel();
    if let Err(e) = broker.close().await {
        warn!(error = %e, "Failed to close broker connection");
    }
    pool.close().await;

    result?;
    Ok(())
}
