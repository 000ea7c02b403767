#![forbid(unsafe_code)]

mod action;
mod message;
mod payload;

pub use action::{ClientAction, ClientPreferences, PreferencesPatch};
pub use message::{Envelope, Message, MessageType};
pub use payload::{
    MatchUpdateData, ParticipantData, PerformanceUpdateData, TeamData, TeamStatsData,
};
