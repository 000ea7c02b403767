use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::Message as WsMessage;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval_at, sleep, timeout};
use tracing::{debug, info, warn};

use herald_common::{
    ConfigError, ConnectionError, OUTBOUND_QUEUE_CAPACITY, PONG_WAIT_SECS, WRITE_WAIT_SECS,
};
use herald_hub::{ConnectionId, HubHandle};
use herald_protocol::{ClientAction, Message};

/// Parâmetros de uma conexão.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub queue_capacity: usize,
    /// Tempo sem pong até a conexão ser considerada meio-aberta.
    pub pong_wait: Duration,
    pub write_wait: Duration,
}

impl SessionConfig {
    /// Intervalo dos pings de transporte; menor que `pong_wait`.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }

    /// Rejeita valores que o runtime não aceita (fila sem capacidade,
    /// intervalos nulos).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero("queue_capacity"));
        }
        if self.ping_period().is_zero() {
            return Err(ConfigError::Zero("pong_wait"));
        }
        if self.write_wait.is_zero() {
            return Err(ConfigError::Zero("write_wait"));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: OUTBOUND_QUEUE_CAPACITY,
            pong_wait: Duration::from_secs(PONG_WAIT_SECS),
            write_wait: Duration::from_secs(WRITE_WAIT_SECS),
        }
    }
}

/// Adaptador de uma conexão já autenticada: registra no hub, roda o loop de
/// saída numa task própria e o loop de entrada na task atual.
///
/// Retorna quando o cliente fecha, quando a leitura falha, quando o timer de
/// inatividade expira ou quando o loop de saída termina.
pub async fn run_connection<W, R, E>(
    hub: HubHandle,
    user_id: String,
    sink: W,
    mut stream: R,
    config: SessionConfig,
) -> Result<(), ConnectionError>
where
    W: Sink<WsMessage> + Unpin + Send + 'static,
    W::Error: Display + Send,
    R: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    config.validate()?;

    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let id = hub.register(user_id.clone(), tx).await?;

    // Descartado quando o loop de saída termina, acordando o de entrada
    let (closed_tx, mut closed_rx) = oneshot::channel::<()>();
    let writer = tokio::spawn(write_loop(
        hub.clone(),
        id,
        sink,
        rx,
        config.clone(),
        closed_tx,
    ));

    let result = read_loop(&hub, id, &mut stream, &mut closed_rx, &config).await;

    // Idempotente: o loop de saída pode já ter pedido a remoção
    hub.unregister(id).await;
    if let Err(e) = writer.await {
        warn!("tarefa de escrita da conexão {id} falhou: {e}");
    }

    match &result {
        Ok(()) => info!("conexão {id} de {user_id} encerrada"),
        Err(e) => info!("conexão {id} de {user_id} encerrada: {e}"),
    }
    result
}

async fn read_loop<R, E>(
    hub: &HubHandle,
    id: ConnectionId,
    stream: &mut R,
    closed: &mut oneshot::Receiver<()>,
    config: &SessionConfig,
) -> Result<(), ConnectionError>
where
    R: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    let idle = sleep(config.pong_wait);
    tokio::pin!(idle);

    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = &mut idle => {
                return Err(ConnectionError::IdleTimeout(config.pong_wait.as_secs()));
            }
            _ = &mut *closed => return Ok(()),
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
            None => return Ok(()), // EOF
        };

        match frame {
            WsMessage::Text(text) => match ClientAction::parse(text.as_bytes()) {
                Ok(ClientAction::Pong) => idle.as_mut().reset(Instant::now() + config.pong_wait),
                Ok(action) => hub.client_action(id, action).await?,
                Err(e) => {
                    debug!("mensagem inválida da conexão {id}: {e}");
                    hub.notify(id, Message::error(e.to_string())).await?;
                }
            },
            WsMessage::Pong(_) => idle.as_mut().reset(Instant::now() + config.pong_wait),
            // O pong de transporte é respondido pelo próprio WebSocket
            WsMessage::Ping(_) => {}
            WsMessage::Binary(_) => {
                hub.notify(id, Message::error("Binary frames are not supported"))
                    .await?;
            }
            WsMessage::Close(_) => return Ok(()),
        }
    }
}

async fn write_loop<W>(
    hub: HubHandle,
    id: ConnectionId,
    mut sink: W,
    mut queue: mpsc::Receiver<Bytes>,
    config: SessionConfig,
    _closed: oneshot::Sender<()>,
) where
    W: Sink<WsMessage> + Unpin,
    W::Error: Display,
{
    let period = config.ping_period();
    let mut ping = interval_at(Instant::now() + period, period);

    loop {
        let result = tokio::select! {
            frame = queue.recv() => match frame {
                // Frames vêm de `Message::encode`, sempre JSON UTF-8
                Some(frame) => {
                    let text = String::from_utf8_lossy(&frame).into_owned();
                    write_frame(&mut sink, WsMessage::Text(text), config.write_wait).await
                }
                None => {
                    // Fila fechada pelo hub: encerramento limpo
                    let _ = write_frame(&mut sink, WsMessage::Close(None), config.write_wait).await;
                    debug!("fila da conexão {id} fechada");
                    return;
                }
            },
            _ = ping.tick() => write_frame(&mut sink, WsMessage::Ping(Vec::new()), config.write_wait).await,
        };

        if let Err(e) = result {
            warn!("erro de escrita na conexão {id}: {e}");
            break;
        }
    }

    hub.unregister(id).await;
}

async fn write_frame<W>(sink: &mut W, frame: WsMessage, wait: Duration) -> Result<(), ConnectionError>
where
    W: Sink<WsMessage> + Unpin,
    W::Error: Display,
{
    match timeout(wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Transport(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as wire;
    use herald_hub::{Hub, HubConfig};
    use herald_protocol::{Envelope, MessageType};
    use tokio::sync::broadcast;
    use tokio::task::JoinHandle;

    type Inbound = wire::UnboundedSender<Result<WsMessage, std::io::Error>>;

    struct Client {
        inbound: Inbound,
        outbound: wire::Receiver<WsMessage>,
        task: JoinHandle<Result<(), ConnectionError>>,
    }

    fn start_hub() -> (HubHandle, broadcast::Sender<()>) {
        let (hub, handle) = Hub::new(HubConfig::default()).unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(hub.run(shutdown_rx));
        (handle, shutdown_tx)
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condição não satisfeita a tempo");
    }

    async fn open(hub: &HubHandle, user_id: &str, config: SessionConfig) -> Client {
        let (in_tx, in_rx) = wire::unbounded();
        let (out_tx, out_rx) = wire::channel(256);
        let before = hub.stats().total_connections;

        let task = tokio::spawn(run_connection(
            hub.clone(),
            user_id.to_string(),
            out_tx,
            in_rx,
            config,
        ));
        wait_until(|| hub.stats().total_connections > before).await;

        Client {
            inbound: in_tx,
            outbound: out_rx,
            task,
        }
    }

    fn send_text(client: &Client, text: &str) {
        client
            .inbound
            .unbounded_send(Ok(WsMessage::Text(text.to_string())))
            .unwrap();
    }

    async fn next_envelope(client: &mut Client) -> Envelope {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(1), client.outbound.next())
                .await
                .expect("nenhum frame recebido")
                .expect("sink fechado");
            if let WsMessage::Text(text) = frame {
                return Envelope::decode(text.as_bytes()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn hub_messages_reach_the_wire() {
        let (hub, _shutdown) = start_hub();
        let mut client = open(&hub, "u1", SessionConfig::default()).await;

        let msg = Message::new(MessageType::RankUpdate, serde_json::json!({"tier": "GOLD"}))
            .for_user("u1");
        let delivery = hub.send_to_user("u1", &msg).await.unwrap();
        assert_eq!(delivery.delivered, 1);

        let env = next_envelope(&mut client).await;
        assert_eq!(env.kind, MessageType::RankUpdate);
        assert_eq!(env.id, msg.id());
        assert_eq!(env.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn join_room_is_acknowledged_and_routed() {
        let (hub, _shutdown) = start_hub();
        let mut client = open(&hub, "u1", SessionConfig::default()).await;

        send_text(&client, r#"{"action":"join_room","data":{"room_id":"lobby"}}"#);
        let ack = next_envelope(&mut client).await;
        assert_eq!(ack.kind, MessageType::RoomJoined);
        assert_eq!(ack.data["room_id"], "lobby");

        let delivery = hub
            .send_to_room("lobby", &Message::new(MessageType::LiveMatch, serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(delivery.delivered, 1);
        assert_eq!(next_envelope(&mut client).await.kind, MessageType::LiveMatch);
    }

    #[tokio::test]
    async fn invalid_message_gets_error_reply_and_stays_open() {
        let (hub, _shutdown) = start_hub();
        let mut client = open(&hub, "u1", SessionConfig::default()).await;

        send_text(&client, "not json");
        let env = next_envelope(&mut client).await;
        assert_eq!(env.kind, MessageType::Error);
        assert_eq!(env.data["error"], "Invalid message format");

        send_text(&client, r#"{"action":"dance"}"#);
        let env = next_envelope(&mut client).await;
        assert_eq!(env.data["error"], "Unknown action: dance");

        client
            .inbound
            .unbounded_send(Ok(WsMessage::Binary(vec![1, 2, 3])))
            .unwrap();
        let env = next_envelope(&mut client).await;
        assert_eq!(env.data["error"], "Binary frames are not supported");

        assert_eq!(hub.stats().active_connections, 1);
    }

    #[tokio::test]
    async fn client_close_unregisters_and_closes_writer() {
        let (hub, _shutdown) = start_hub();
        let mut client = open(&hub, "u1", SessionConfig::default()).await;

        client
            .inbound
            .unbounded_send(Ok(WsMessage::Close(None)))
            .unwrap();
        let result = client.task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(hub.stats().active_connections, 0);

        // Fila fechada pelo hub vira um frame de close no fio
        let mut saw_close = false;
        while let Some(frame) = client.outbound.next().await {
            if matches!(frame, WsMessage::Close(_)) {
                saw_close = true;
            }
        }
        assert!(saw_close);
    }

    #[tokio::test]
    async fn read_error_terminates_connection() {
        let (hub, _shutdown) = start_hub();
        let client = open(&hub, "u1", SessionConfig::default()).await;

        client
            .inbound
            .unbounded_send(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )))
            .unwrap();
        let result = client.task.await.unwrap();
        assert!(matches!(result, Err(ConnectionError::Transport(_))));
        assert_eq!(hub.stats().active_connections, 0);
    }

    #[tokio::test]
    async fn idle_connection_times_out() {
        let (hub, _shutdown) = start_hub();
        let config = SessionConfig {
            pong_wait: Duration::from_millis(100),
            ..Default::default()
        };
        let client = open(&hub, "u1", config).await;

        let result = tokio::time::timeout(Duration::from_secs(2), client.task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ConnectionError::IdleTimeout(_))));
        assert_eq!(hub.stats().active_connections, 0);
    }

    #[tokio::test]
    async fn pongs_keep_connection_alive() {
        let (hub, _shutdown) = start_hub();
        let config = SessionConfig {
            pong_wait: Duration::from_millis(150),
            ..Default::default()
        };
        let client = open(&hub, "u1", config).await;

        for i in 0..8 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if i % 2 == 0 {
                client
                    .inbound
                    .unbounded_send(Ok(WsMessage::Pong(Vec::new())))
                    .unwrap();
            } else {
                send_text(&client, r#"{"action":"pong"}"#);
            }
        }

        assert!(!client.task.is_finished());
        assert_eq!(hub.stats().active_connections, 1);
    }

    #[tokio::test]
    async fn write_failure_unregisters() {
        let (hub, _shutdown) = start_hub();
        let client = open(&hub, "u1", SessionConfig::default()).await;
        let Client {
            inbound: _inbound,
            outbound,
            task,
        } = client;
        drop(outbound);

        // A escrita falha, o loop de saída pede a remoção e acorda o de entrada
        hub.send_to_user("u1", &Message::ping()).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(hub.stats().active_connections, 0);
    }

    /// Sink que nunca fica pronto, como um socket com o buffer de envio cheio.
    struct StalledSink;

    impl Sink<WsMessage> for StalledSink {
        type Error = std::io::Error;

        fn poll_ready(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Pending
        }

        fn start_send(self: std::pin::Pin<&mut Self>, _item: WsMessage) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Pending
        }

        fn poll_close(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Pending
        }
    }

    #[tokio::test]
    async fn stalled_write_hits_deadline_and_unregisters() {
        let (hub, _shutdown) = start_hub();
        let config = SessionConfig {
            write_wait: Duration::from_millis(50),
            ..Default::default()
        };
        let (_in_tx, in_rx) = wire::unbounded::<Result<WsMessage, std::io::Error>>();
        let task = tokio::spawn(run_connection(
            hub.clone(),
            "u1".to_string(),
            StalledSink,
            in_rx,
            config,
        ));
        wait_until(|| hub.stats().active_connections == 1).await;

        let started = Instant::now();
        hub.send_to_user("u1", &Message::ping()).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("escrita travada não respeitou o prazo")
            .unwrap();

        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(hub.stats().active_connections, 0);
    }

    #[test]
    fn write_frame_reports_timeout() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(write_frame(
            &mut StalledSink,
            WsMessage::Ping(Vec::new()),
            Duration::from_millis(20),
        ));
        assert!(matches!(result, Err(ConnectionError::WriteTimeout)));
    }

    #[test]
    fn zero_values_are_rejected() {
        let zero_queue = SessionConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert_eq!(zero_queue.validate(), Err(ConfigError::Zero("queue_capacity")));

        let zero_pong = SessionConfig {
            pong_wait: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(zero_pong.validate(), Err(ConfigError::Zero("pong_wait")));

        let zero_write = SessionConfig {
            write_wait: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(zero_write.validate(), Err(ConfigError::Zero("write_wait")));

        assert_eq!(SessionConfig::default().validate(), Ok(()));
    }

    #[tokio::test]
    async fn invalid_session_fails_before_registering() {
        let (hub, _shutdown) = start_hub();
        let (_in_tx, in_rx) = wire::unbounded::<Result<WsMessage, std::io::Error>>();
        let (out_tx, _out_rx) = wire::channel(16);
        let config = SessionConfig {
            queue_capacity: 0,
            ..Default::default()
        };

        let result = run_connection(hub.clone(), "u1".to_string(), out_tx, in_rx, config).await;
        assert!(matches!(
            result,
            Err(ConnectionError::Config(ConfigError::Zero("queue_capacity")))
        ));
        assert_eq!(hub.stats().total_connections, 0);
    }
}
