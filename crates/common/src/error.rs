/// Erros de serialização do envelope JSON.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON inválido: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parâmetros de configuração rejeitados antes de chegar ao runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} deve ser maior que zero")]
    Zero(&'static str),
}

/// Ações de cliente malformadas.
///
/// O texto de cada variante vai para o cliente dentro de uma mensagem `error`,
/// por isso fica em inglês.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("Invalid message format")]
    InvalidFormat,
    #[error("Invalid room data format")]
    InvalidRoomData,
    #[error("Room ID is required")]
    MissingRoomId,
    #[error("Invalid match data format")]
    InvalidMatchData,
    #[error("Match ID is required")]
    MissingMatchId,
    #[error("Invalid preferences data format")]
    InvalidPreferences,
    #[error("Unknown action: {0}")]
    UnknownAction(String),
}

/// Erros do coordenador do hub, vistos pelos produtores.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub encerrado")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Erros de uma conexão WebSocket. Sempre fatais só para a própria conexão.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("erro de transporte: {0}")]
    Transport(String),
    #[error("conexão ociosa: nenhum pong em {0}s")]
    IdleTimeout(u64),
    #[error("timeout de escrita")]
    WriteTimeout,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Hub(#[from] HubError),
}

/// Erro top-level do Herald.
#[derive(Debug, thiserror::Error)]
pub enum HeraldError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type alias.
pub type HeraldResult<T> = Result<T, HeraldError>;
