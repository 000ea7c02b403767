use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use herald_common::ActionError;

/// Ações enviadas pelo cliente no formato `{"action": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    /// Passa a receber mensagens endereçadas ao próprio usuário.
    Subscribe,
    Unsubscribe,
    JoinRoom { room_id: String },
    LeaveRoom { room_id: String },
    WatchMatch { match_id: String },
    UnwatchMatch { match_id: String },
    UpdatePreferences(PreferencesPatch),
    Pong,
    GetStats,
}

#[derive(Deserialize)]
struct RawAction {
    action: String,
    #[serde(default)]
    data: Value,
}

impl ClientAction {
    /// Faz o parse de um frame de texto do cliente.
    pub fn parse(bytes: &[u8]) -> Result<ClientAction, ActionError> {
        let raw: RawAction =
            serde_json::from_slice(bytes).map_err(|_| ActionError::InvalidFormat)?;

        let action = match raw.action.as_str() {
            "subscribe" => ClientAction::Subscribe,
            "unsubscribe" => ClientAction::Unsubscribe,
            "join_room" => ClientAction::JoinRoom {
                room_id: required_str(
                    &raw.data,
                    "room_id",
                    ActionError::InvalidRoomData,
                    ActionError::MissingRoomId,
                )?,
            },
            "leave_room" => ClientAction::LeaveRoom {
                room_id: required_str(
                    &raw.data,
                    "room_id",
                    ActionError::InvalidRoomData,
                    ActionError::MissingRoomId,
                )?,
            },
            "watch_match" => ClientAction::WatchMatch {
                match_id: required_str(
                    &raw.data,
                    "match_id",
                    ActionError::InvalidMatchData,
                    ActionError::MissingMatchId,
                )?,
            },
            "unwatch_match" => ClientAction::UnwatchMatch {
                match_id: required_str(
                    &raw.data,
                    "match_id",
                    ActionError::InvalidMatchData,
                    ActionError::MissingMatchId,
                )?,
            },
            "update_preferences" => {
                let obj = raw.data.as_object().ok_or(ActionError::InvalidPreferences)?;
                ClientAction::UpdatePreferences(PreferencesPatch::from_map(obj))
            }
            "pong" => ClientAction::Pong,
            "get_stats" => ClientAction::GetStats,
            _ => return Err(ActionError::UnknownAction(raw.action)),
        };

        Ok(action)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientAction::Subscribe => "subscribe",
            ClientAction::Unsubscribe => "unsubscribe",
            ClientAction::JoinRoom { .. } => "join_room",
            ClientAction::LeaveRoom { .. } => "leave_room",
            ClientAction::WatchMatch { .. } => "watch_match",
            ClientAction::UnwatchMatch { .. } => "unwatch_match",
            ClientAction::UpdatePreferences(_) => "update_preferences",
            ClientAction::Pong => "pong",
            ClientAction::GetStats => "get_stats",
        }
    }

    /// Representação JSON da ação, usada pelos clientes.
    pub fn to_value(&self) -> Value {
        let data = match self {
            ClientAction::JoinRoom { room_id } | ClientAction::LeaveRoom { room_id } => {
                json!({ "room_id": room_id })
            }
            ClientAction::WatchMatch { match_id } | ClientAction::UnwatchMatch { match_id } => {
                json!({ "match_id": match_id })
            }
            ClientAction::UpdatePreferences(patch) => json!(patch),
            _ => Value::Null,
        };
        json!({ "action": self.name(), "data": data })
    }
}

fn required_str(
    data: &Value,
    field: &str,
    not_object: ActionError,
    missing: ActionError,
) -> Result<String, ActionError> {
    let obj = data.as_object().ok_or(not_object)?;
    match obj.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(missing),
    }
}

/// Preferências de notificação de uma conexão.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPreferences {
    pub match_updates: bool,
    pub rank_updates: bool,
    pub friend_activity: bool,
    pub coaching_suggestions: bool,
    pub system_notifications: bool,
}

impl ClientPreferences {
    pub fn apply(&mut self, patch: &PreferencesPatch) {
        if let Some(v) = patch.match_updates {
            self.match_updates = v;
        }
        if let Some(v) = patch.rank_updates {
            self.rank_updates = v;
        }
        if let Some(v) = patch.friend_activity {
            self.friend_activity = v;
        }
        if let Some(v) = patch.coaching_suggestions {
            self.coaching_suggestions = v;
        }
        if let Some(v) = patch.system_notifications {
            self.system_notifications = v;
        }
    }
}

/// Atualização parcial de preferências. Campos ausentes ou não booleanos
/// são ignorados.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreferencesPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_updates: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank_updates: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friend_activity: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coaching_suggestions: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_notifications: Option<bool>,
}

impl PreferencesPatch {
    fn from_map(obj: &Map<String, Value>) -> Self {
        let flag = |key: &str| obj.get(key).and_then(Value::as_bool);
        Self {
            match_updates: flag("match_updates"),
            rank_updates: flag("rank_updates"),
            friend_activity: flag("friend_activity"),
            coaching_suggestions: flag("coaching_suggestions"),
            system_notifications: flag("system_notifications"),
        }
    }

    /// Monta um patch a partir de pares `chave=valor` (ex.: `rank_updates=true`).
    pub fn set(&mut self, key: &str, value: bool) -> bool {
        let slot = match key {
            "match_updates" => &mut self.match_updates,
            "rank_updates" => &mut self.rank_updates,
            "friend_activity" => &mut self.friend_activity,
            "coaching_suggestions" => &mut self.coaching_suggestions,
            "system_notifications" => &mut self.system_notifications,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<ClientAction, ActionError> {
        ClientAction::parse(s.as_bytes())
    }

    #[test]
    fn parse_simple_actions() {
        assert_eq!(parse(r#"{"action":"subscribe"}"#), Ok(ClientAction::Subscribe));
        assert_eq!(
            parse(r#"{"action":"unsubscribe","data":{}}"#),
            Ok(ClientAction::Unsubscribe)
        );
        assert_eq!(parse(r#"{"action":"pong","data":null}"#), Ok(ClientAction::Pong));
        assert_eq!(parse(r#"{"action":"get_stats"}"#), Ok(ClientAction::GetStats));
    }

    #[test]
    fn parse_join_room() {
        assert_eq!(
            parse(r#"{"action":"join_room","data":{"room_id":"lobby"}}"#),
            Ok(ClientAction::JoinRoom {
                room_id: "lobby".into()
            })
        );
    }

    #[test]
    fn join_room_errors() {
        assert_eq!(
            parse(r#"{"action":"join_room","data":"lobby"}"#),
            Err(ActionError::InvalidRoomData)
        );
        assert_eq!(
            parse(r#"{"action":"join_room","data":{"room":"lobby"}}"#),
            Err(ActionError::MissingRoomId)
        );
        assert_eq!(
            parse(r#"{"action":"leave_room","data":{"room_id":""}}"#),
            Err(ActionError::MissingRoomId)
        );
    }

    #[test]
    fn watch_match_errors() {
        assert_eq!(
            parse(r#"{"action":"watch_match","data":{"match_id":42}}"#),
            Err(ActionError::MissingMatchId)
        );
        assert_eq!(
            parse(r#"{"action":"unwatch_match"}"#),
            Err(ActionError::InvalidMatchData)
        );
    }

    #[test]
    fn invalid_json_and_unknown_action() {
        assert_eq!(parse("not json"), Err(ActionError::InvalidFormat));
        assert_eq!(parse(r#"{"data":{}}"#), Err(ActionError::InvalidFormat));
        assert_eq!(
            parse(r#"{"action":"dance"}"#),
            Err(ActionError::UnknownAction("dance".into()))
        );
    }

    #[test]
    fn preferences_patch_ignores_non_bool() {
        let action = parse(
            r#"{"action":"update_preferences","data":{"rank_updates":true,"match_updates":"yes","bogus":true}}"#,
        )
        .unwrap();

        let ClientAction::UpdatePreferences(patch) = action else {
            panic!("expected UpdatePreferences");
        };
        assert_eq!(patch.rank_updates, Some(true));
        assert_eq!(patch.match_updates, None);

        let mut prefs = ClientPreferences {
            match_updates: true,
            ..Default::default()
        };
        prefs.apply(&patch);
        assert!(prefs.match_updates);
        assert!(prefs.rank_updates);
        assert!(!prefs.friend_activity);
    }

    #[test]
    fn preferences_require_object() {
        assert_eq!(
            parse(r#"{"action":"update_preferences","data":[true]}"#),
            Err(ActionError::InvalidPreferences)
        );
    }

    #[test]
    fn to_value_parses_back() {
        let mut patch = PreferencesPatch::default();
        assert!(patch.set("coaching_suggestions", false));
        assert!(!patch.set("nope", true));

        for action in [
            ClientAction::Subscribe,
            ClientAction::WatchMatch {
                match_id: "m42".into(),
            },
            ClientAction::LeaveRoom {
                room_id: "lobby".into(),
            },
            ClientAction::UpdatePreferences(patch),
        ] {
            let bytes = serde_json::to_vec(&action.to_value()).unwrap();
            assert_eq!(ClientAction::parse(&bytes), Ok(action));
        }
    }
}
