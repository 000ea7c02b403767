use std::time::Duration;

use clap::Parser;
use clap::builder::RangedU64ValueParser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use herald_common::{
    DEFAULT_HOST, DEFAULT_PORT, EVENT_QUEUE_CAPACITY, KEEPALIVE_INTERVAL_SECS, MAX_CONNECTIONS,
    MAX_MESSAGE_SIZE, OUTBOUND_QUEUE_CAPACITY, PONG_WAIT_SECS, WRITE_WAIT_SECS,
};
use herald_hub::{Hub, HubConfig, spawn_keepalive};
use herald_server::{AppState, SessionConfig, serve};

#[derive(Parser, Debug)]
#[command(name = "herald-server", about = "Herald — hub de eventos em tempo real")]
struct Args {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    #[arg(long, default_value_t = MAX_CONNECTIONS, value_parser = positive_usize())]
    max_connections: usize,
    /// Capacidade da fila de saída de cada conexão
    #[arg(long, default_value_t = OUTBOUND_QUEUE_CAPACITY, value_parser = positive_usize())]
    queue_capacity: usize,
    /// Capacidade da fila de eventos do hub
    #[arg(long, default_value_t = EVENT_QUEUE_CAPACITY, value_parser = positive_usize())]
    event_capacity: usize,
    #[arg(long, default_value_t = KEEPALIVE_INTERVAL_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    keepalive_secs: u64,
    #[arg(long, default_value_t = PONG_WAIT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pong_wait_secs: u64,
    #[arg(long, default_value_t = WRITE_WAIT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    write_wait_secs: u64,
    #[arg(long, default_value_t = MAX_MESSAGE_SIZE, value_parser = positive_usize())]
    max_message_size: usize,
}

fn positive_usize() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::new().range(1..)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_server=info,herald_hub=info".into()),
        )
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let (hub, handle) = Hub::new(HubConfig {
        event_capacity: args.event_capacity,
    })?;
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let hub_task = tokio::spawn(hub.run(shutdown_tx.subscribe()));
    let keepalive = spawn_keepalive(
        handle.clone(),
        Duration::from_secs(args.keepalive_secs),
        shutdown_tx.subscribe(),
    )?;

    let session = SessionConfig {
        queue_capacity: args.queue_capacity,
        pong_wait: Duration::from_secs(args.pong_wait_secs),
        write_wait: Duration::from_secs(args.write_wait_secs),
    };
    session.validate()?;
    let state = AppState::new(handle, args.max_connections, session, args.max_message_size);

    let listener = TcpListener::bind(&addr).await?;
    info!("Herald escutando em ws://{addr}/ws");

    // Encerrar o hub fecha as filas de saída, e as conexões terminam sozinhas
    let shutdown = async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("falha ao aguardar ctrl-c: {e}");
        }
        info!("shutdown signal recebido");
        drop(shutdown_tx);
    };

    serve(listener, state, shutdown).await?;

    if let Err(e) = keepalive.await {
        error!("keepalive terminou com erro: {e}");
    }
    if let Err(e) = hub_task.await {
        error!("hub terminou com erro: {e}");
    }
    info!("Herald encerrado");

    Ok(())
}
