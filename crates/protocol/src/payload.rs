//! Payloads tipados para o campo `data` das mensagens de partida e desempenho.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchUpdateData {
    pub game_id: String,
    pub status: String,
    /// Tempo de jogo em segundos.
    pub game_time: u32,
    pub participants: Vec<ParticipantData>,
    pub team_stats: TeamStatsData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantData {
    pub summoner_name: String,
    pub champion_name: String,
    pub level: u32,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub cs: u32,
    pub gold: u32,
    pub items: Vec<u32>,
    pub kda: f64,
}

impl ParticipantData {
    /// (K + A) / max(D, 1).
    pub fn compute_kda(&self) -> f64 {
        (self.kills as f64 + self.assists as f64) / self.deaths.max(1) as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamStatsData {
    pub blue_team: TeamData,
    pub red_team: TeamData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamData {
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub gold: u32,
    pub dragons: u32,
    pub barons: u32,
    pub towers: u32,
    pub inhibitors: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceUpdateData {
    pub user_id: String,
    pub current_kda: f64,
    pub average_kda: f64,
    pub cs_per_minute: f64,
    pub vision_score: f64,
    pub damage_share: f64,
    pub gold_efficiency: f64,
    #[serde(rename = "improvement_suggestion")]
    pub improvement: String,
}
