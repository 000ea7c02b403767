use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use herald_common::ProtocolError;

/// Tipos de mensagem do envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    MatchUpdate,
    PerformanceUpdate,
    RankUpdate,
    FriendActivity,
    LiveMatch,
    CoachingSuggestion,
    ChampionMastery,
    SystemNotification,
    Error,
    Ping,
    Pong,
    // Respostas às ações de cliente.
    SubscriptionConfirmed,
    SubscriptionCancelled,
    RoomJoined,
    RoomLeft,
    MatchSubscribed,
    MatchUnsubscribed,
    PreferencesUpdated,
    Stats,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::MatchUpdate => "match_update",
            MessageType::PerformanceUpdate => "performance_update",
            MessageType::RankUpdate => "rank_update",
            MessageType::FriendActivity => "friend_activity",
            MessageType::LiveMatch => "live_match",
            MessageType::CoachingSuggestion => "coaching_suggestion",
            MessageType::ChampionMastery => "champion_mastery",
            MessageType::SystemNotification => "system_notification",
            MessageType::Error => "error",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::SubscriptionConfirmed => "subscription_confirmed",
            MessageType::SubscriptionCancelled => "subscription_cancelled",
            MessageType::RoomJoined => "room_joined",
            MessageType::RoomLeft => "room_left",
            MessageType::MatchSubscribed => "match_subscribed",
            MessageType::MatchUnsubscribed => "match_unsubscribed",
            MessageType::PreferencesUpdated => "preferences_updated",
            MessageType::Stats => "stats",
        }
    }
}

/// Mensagem imutável a ser entregue pelo hub.
///
/// O timestamp não faz parte da mensagem: é atribuído no envio, em
/// [`Message::encode_at`], e a mesma sequência de bytes é repassada a todos
/// os destinatários.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    #[serde(rename = "type")]
    kind: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    match_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    room_id: Option<String>,
    data: Value,
    #[serde(skip)]
    id: String,
}

/// Visão serializável de uma mensagem com o timestamp do envio.
#[derive(Serialize)]
struct Stamped<'a> {
    #[serde(flatten)]
    message: &'a Message,
    timestamp: DateTime<Utc>,
    id: &'a str,
}

impl Message {
    pub fn new(kind: MessageType, data: Value) -> Self {
        Self {
            kind,
            user_id: None,
            match_id: None,
            room_id: None,
            data,
            id: Uuid::new_v4().to_string(),
        }
    }

    /// Cria uma mensagem serializando um payload tipado em `data`.
    pub fn with_payload<T: Serialize>(kind: MessageType, payload: &T) -> Result<Self, ProtocolError> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    pub fn ping() -> Self {
        Self::new(MessageType::Ping, Value::Null)
    }

    /// Mensagem `error` no formato `{"error": "..."}`.
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(
            MessageType::Error,
            serde_json::json!({ "error": text.into() }),
        )
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn for_match(mut self, match_id: impl Into<String>) -> Self {
        self.match_id = Some(match_id.into());
        self
    }

    pub fn in_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn match_id(&self) -> Option<&str> {
        self.match_id.as_deref()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Serializa o envelope com o instante atual.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        self.encode_at(Utc::now())
    }

    /// Serializa o envelope com o timestamp informado.
    pub fn encode_at(&self, timestamp: DateTime<Utc>) -> Result<Bytes, ProtocolError> {
        let stamped = Stamped {
            message: self,
            timestamp,
            id: &self.id,
        };
        Ok(Bytes::from(serde_json::to_vec(&stamped)?))
    }
}

/// Envelope recebido do servidor, do lado do cliente.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub match_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub id: String,
}

impl Envelope {
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
