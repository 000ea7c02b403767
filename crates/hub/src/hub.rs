use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use herald_common::{ConfigError, EVENT_QUEUE_CAPACITY, HubError};
use herald_protocol::{ClientAction, ClientPreferences, Message, MessageType};

use crate::index::SubscriptionIndex;
use crate::stats::{HubStats, StatsCollector};

/// Identificador opaco de uma conexão registrada.
pub type ConnectionId = u64;

/// Resultado de uma entrega: quantas filas aceitaram o frame e quantas
/// conexões foram despejadas por estarem cheias ou fechadas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub event_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_capacity: EVENT_QUEUE_CAPACITY,
        }
    }
}

enum Target {
    All,
    User(String),
    Match(String),
    Room(String),
}

enum Event {
    Register {
        user_id: String,
        outbound: mpsc::Sender<Bytes>,
        reply: oneshot::Sender<ConnectionId>,
    },
    Unregister(ConnectionId),
    Deliver {
        target: Target,
        frame: Bytes,
        reply: oneshot::Sender<Delivery>,
    },
    SubscribeUserToMatch {
        user_id: String,
        match_id: String,
        reply: oneshot::Sender<usize>,
    },
    Action {
        id: ConnectionId,
        action: ClientAction,
    },
    Notify {
        id: ConnectionId,
        message: Message,
    },
}

/// Estado de uma conexão registrada. Só o coordenador guarda o `Sender`
/// da fila de saída: descartá-lo fecha a fila.
struct Connection {
    user_id: String,
    outbound: mpsc::Sender<Bytes>,
    /// Presente no índice de usuários sob `user_id`.
    user_subscribed: bool,
    rooms: HashSet<String>,
    matches: HashSet<String>,
    preferences: ClientPreferences,
}

/// Coordenador do hub: dono exclusivo do conjunto de conexões, dos três
/// índices e das estatísticas. Processa um evento por vez.
pub struct Hub {
    events: mpsc::Receiver<Event>,
    connections: HashMap<ConnectionId, Connection>,
    by_user: SubscriptionIndex,
    by_match: SubscriptionIndex,
    by_room: SubscriptionIndex,
    stats: StatsCollector,
    next_id: ConnectionId,
}

impl Hub {
    /// Cria o coordenador e o handle usado pelos produtores.
    pub fn new(config: HubConfig) -> Result<(Hub, HubHandle), ConfigError> {
        if config.event_capacity == 0 {
            return Err(ConfigError::Zero("event_capacity"));
        }
        let (tx, rx) = mpsc::channel(config.event_capacity);
        let stats = StatsCollector::new();

        let hub = Hub {
            events: rx,
            connections: HashMap::new(),
            by_user: SubscriptionIndex::new(),
            by_match: SubscriptionIndex::new(),
            by_room: SubscriptionIndex::new(),
            stats: stats.clone(),
            next_id: 1,
        };
        let handle = HubHandle { events: tx, stats };
        Ok((hub, handle))
    }

    /// Loop principal: processa eventos até o shutdown ou até todos os
    /// handles serem descartados.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("hub iniciado");

        loop {
            let event = tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("todos os handles descartados, hub encerrado");
                        return;
                    }
                },
                _ = shutdown.recv() => {
                    info!("hub encerrando ({} conexões ativas)", self.connections.len());
                    return;
                }
            };

            self.handle(event);
        }
    }

    /// Processa um evento. Os gauges são publicados antes de qualquer
    /// resposta, para que quem aguarda a resposta leia estatísticas atuais.
    fn handle(&mut self, event: Event) {
        match event {
            Event::Register {
                user_id,
                outbound,
                reply,
            } => {
                let id = self.register(user_id, outbound);
                self.publish_gauges();
                let _ = reply.send(id);
            }
            Event::Unregister(id) => {
                if let Some(user_id) = self.unregister(id) {
                    info!(
                        "cliente desconectado: {user_id} (total: {})",
                        self.connections.len()
                    );
                }
                self.publish_gauges();
            }
            Event::Deliver {
                target,
                frame,
                reply,
            } => {
                let targets = match target {
                    Target::All => self.connections.keys().copied().collect(),
                    Target::User(key) => self.by_user.members(&key),
                    Target::Match(key) => self.by_match.members(&key),
                    Target::Room(key) => self.by_room.members(&key),
                };
                let delivery = self.fanout(targets, &frame);
                self.stats.record_message(delivery.delivered);
                self.publish_gauges();
                let _ = reply.send(delivery);
            }
            Event::SubscribeUserToMatch {
                user_id,
                match_id,
                reply,
            } => {
                let count = self.subscribe_user_to_match(&user_id, &match_id);
                self.publish_gauges();
                let _ = reply.send(count);
            }
            Event::Action { id, action } => {
                debug!("ação {} da conexão {id}", action.name());
                if let Some(reply) = self.apply_action(id, action) {
                    self.send_to(id, &reply);
                }
                self.publish_gauges();
            }
            Event::Notify { id, message } => {
                self.send_to(id, &message);
                self.publish_gauges();
            }
        }
    }

    fn register(&mut self, user_id: String, outbound: mpsc::Sender<Bytes>) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;

        self.by_user.insert(&user_id, id);
        self.connections.insert(
            id,
            Connection {
                user_id: user_id.clone(),
                outbound,
                user_subscribed: true,
                rooms: HashSet::new(),
                matches: HashSet::new(),
                preferences: ClientPreferences::default(),
            },
        );
        self.stats.connection_registered();

        info!(
            "cliente conectado: {user_id} (id {id}, total: {})",
            self.connections.len()
        );
        id
    }

    /// Remove a conexão do conjunto e de todos os índices; a fila de saída
    /// fecha quando o `Sender` é descartado. Retorna o usuário se a conexão
    /// existia.
    fn unregister(&mut self, id: ConnectionId) -> Option<String> {
        let conn = self.connections.remove(&id)?;

        if conn.user_subscribed {
            self.by_user.remove(&conn.user_id, id);
        }
        for match_id in &conn.matches {
            self.by_match.remove(match_id, id);
        }
        for room_id in &conn.rooms {
            self.by_room.remove(room_id, id);
        }

        Some(conn.user_id)
    }

    /// Enfileira o frame sem bloquear em cada destino. Fila cheia ou fechada
    /// despeja a conexão no mesmo passo.
    fn fanout(&mut self, targets: Vec<ConnectionId>, frame: &Bytes) -> Delivery {
        let mut delivery = Delivery::default();
        let mut slow = Vec::new();

        for id in targets {
            let Some(conn) = self.connections.get(&id) else {
                continue;
            };
            match conn.outbound.try_send(frame.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("fila cheia, despejando conexão {id} ({})", conn.user_id);
                    slow.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("fila fechada, removendo conexão {id} ({})", conn.user_id);
                    slow.push(id);
                }
            }
        }

        for id in slow {
            if self.unregister(id).is_some() {
                delivery.evicted += 1;
                self.stats.connection_evicted();
            }
        }

        delivery
    }

    fn send_to(&mut self, id: ConnectionId, message: &Message) {
        match message.encode() {
            Ok(frame) => {
                self.fanout(vec![id], &frame);
            }
            Err(e) => warn!("falha ao serializar resposta para conexão {id}: {e}"),
        }
    }

    fn subscribe_user_to_match(&mut self, user_id: &str, match_id: &str) -> usize {
        let members = self.by_user.members(user_id);
        for id in &members {
            if let Some(conn) = self.connections.get_mut(id) {
                self.by_match.insert(match_id, *id);
                conn.matches.insert(match_id.to_string());
            }
        }
        if !members.is_empty() {
            debug!(
                "{} conexões de {user_id} inscritas na partida {match_id}",
                members.len()
            );
        }
        members.len()
    }

    /// Aplica a ação e devolve a resposta a enviar para a própria conexão.
    fn apply_action(&mut self, id: ConnectionId, action: ClientAction) -> Option<Message> {
        if let ClientAction::GetStats = action {
            if !self.connections.contains_key(&id) {
                return None;
            }
            self.publish_gauges();
            return payload_message(MessageType::Stats, &self.stats.snapshot());
        }

        let conn = self.connections.get_mut(&id)?;

        let reply = match action {
            ClientAction::Subscribe => {
                self.by_user.insert(&conn.user_id, id);
                conn.user_subscribed = true;
                Message::new(
                    MessageType::SubscriptionConfirmed,
                    json!({ "user_id": conn.user_id }),
                )
            }
            ClientAction::Unsubscribe => {
                self.by_user.remove(&conn.user_id, id);
                conn.user_subscribed = false;
                Message::new(
                    MessageType::SubscriptionCancelled,
                    json!({ "user_id": conn.user_id }),
                )
            }
            ClientAction::JoinRoom { room_id } => {
                self.by_room.insert(&room_id, id);
                conn.rooms.insert(room_id.clone());
                Message::new(MessageType::RoomJoined, json!({ "room_id": room_id }))
            }
            ClientAction::LeaveRoom { room_id } => {
                self.by_room.remove(&room_id, id);
                conn.rooms.remove(&room_id);
                Message::new(MessageType::RoomLeft, json!({ "room_id": room_id }))
            }
            ClientAction::WatchMatch { match_id } => {
                self.by_match.insert(&match_id, id);
                conn.matches.insert(match_id.clone());
                Message::new(
                    MessageType::MatchSubscribed,
                    json!({ "match_id": match_id }),
                )
            }
            ClientAction::UnwatchMatch { match_id } => {
                self.by_match.remove(&match_id, id);
                conn.matches.remove(&match_id);
                Message::new(
                    MessageType::MatchUnsubscribed,
                    json!({ "match_id": match_id }),
                )
            }
            ClientAction::UpdatePreferences(patch) => {
                conn.preferences.apply(&patch);
                return payload_message(MessageType::PreferencesUpdated, &conn.preferences);
            }
            // Pong só reinicia o timer de inatividade no adaptador.
            ClientAction::Pong | ClientAction::GetStats => return None,
        };

        Some(reply)
    }

    fn publish_gauges(&self) {
        self.stats.publish_gauges(
            self.connections.len(),
            self.by_user.len(),
            self.by_match.len(),
            self.by_room.len(),
        );
    }
}

fn payload_message<T: Serialize>(kind: MessageType, payload: &T) -> Option<Message> {
    match Message::with_payload(kind, payload) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("falha ao serializar payload de {}: {e}", kind.as_str());
            None
        }
    }
}

/// Handle clonável para falar com o coordenador. Cada operação vira um
/// evento na fila única do hub.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<Event>,
    stats: StatsCollector,
}

impl HubHandle {
    async fn send(&self, event: Event) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Closed)
    }

    /// Registra uma conexão já autenticada e devolve seu identificador.
    /// A conexão passa a constar no índice do próprio usuário.
    pub async fn register(
        &self,
        user_id: impl Into<String>,
        outbound: mpsc::Sender<Bytes>,
    ) -> Result<ConnectionId, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::Register {
            user_id: user_id.into(),
            outbound,
            reply,
        })
        .await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Remove a conexão. Idempotente; ignora hub já encerrado.
    pub async fn unregister(&self, id: ConnectionId) {
        let _ = self.send(Event::Unregister(id)).await;
    }

    pub async fn broadcast_all(&self, message: &Message) -> Result<Delivery, HubError> {
        self.deliver(Target::All, message).await
    }

    pub async fn send_to_user(&self, user_id: &str, message: &Message) -> Result<Delivery, HubError> {
        self.deliver(Target::User(user_id.to_string()), message).await
    }

    pub async fn send_to_match(&self, match_id: &str, message: &Message) -> Result<Delivery, HubError> {
        self.deliver(Target::Match(match_id.to_string()), message).await
    }

    pub async fn send_to_room(&self, room_id: &str, message: &Message) -> Result<Delivery, HubError> {
        self.deliver(Target::Room(room_id.to_string()), message).await
    }

    /// Inscreve todas as conexões do usuário na partida. Retorna quantas
    /// conexões foram inscritas (zero se o usuário não está conectado).
    pub async fn subscribe_user_to_match(
        &self,
        user_id: &str,
        match_id: &str,
    ) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::SubscribeUserToMatch {
            user_id: user_id.to_string(),
            match_id: match_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Encaminha uma ação do cliente; a resposta chega pela fila da conexão.
    pub async fn client_action(&self, id: ConnectionId, action: ClientAction) -> Result<(), HubError> {
        self.send(Event::Action { id, action }).await
    }

    /// Envia uma mensagem para uma única conexão.
    pub async fn notify(&self, id: ConnectionId, message: Message) -> Result<(), HubError> {
        self.send(Event::Notify { id, message }).await
    }

    pub fn stats(&self) -> HubStats {
        self.stats.snapshot()
    }

    async fn deliver(&self, target: Target, message: &Message) -> Result<Delivery, HubError> {
        // Serializa uma vez só; o mesmo frame vai para todos os destinos
        let frame = message.encode().map_err(|e| {
            warn!("falha ao serializar mensagem {}: {e}", message.id());
            e
        })?;

        let (reply, rx) = oneshot::channel();
        self.send(Event::Deliver {
            target,
            frame,
            reply,
        })
        .await?;
        rx.await.map_err(|_| HubError::Closed)
    }
}
