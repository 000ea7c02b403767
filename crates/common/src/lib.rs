#![forbid(unsafe_code)]

mod error;

pub use error::*;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const MAX_CONNECTIONS: usize = 10_000;

/// Capacidade da fila de saída de cada conexão (em mensagens).
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
/// Capacidade do canal de eventos do coordenador.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

pub const KEEPALIVE_INTERVAL_SECS: u64 = 30;
/// Tempo máximo sem pong antes de considerar a conexão meio-aberta.
pub const PONG_WAIT_SECS: u64 = 60;
pub const WRITE_WAIT_SECS: u64 = 10;
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024; // 8 KB

/// Janela (em segundos) usada no cálculo de mensagens por segundo.
pub const RATE_WINDOW_SECS: u64 = 10;
