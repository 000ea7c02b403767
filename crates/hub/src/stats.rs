use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use herald_common::RATE_WINDOW_SECS;

const RATE_BUCKETS: u64 = RATE_WINDOW_SECS;

/// Sentinela de `last_message_ms` antes da primeira mensagem.
const NO_MESSAGE: i64 = i64::MIN;

/// Snapshot das estatísticas do hub, exposto ao endpoint de status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub messages_sent: u64,
    pub frames_delivered: u64,
    pub evicted_connections: u64,
    pub messages_per_second: f64,
    pub last_message_time: Option<DateTime<Utc>>,
    pub users: usize,
    pub matches: usize,
    pub rooms: usize,
}

/// Contador de mensagens em baldes de um segundo. Um único escritor (o
/// coordenador); leitores podem ver a janela no meio de uma virada.
#[derive(Debug)]
struct RateMeter {
    epoch: Instant,
    buckets: [AtomicU64; RATE_BUCKETS as usize],
    /// Segundo (desde `epoch`) do balde mais recente.
    head: AtomicU64,
}

impl RateMeter {
    fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            head: AtomicU64::new(0),
        }
    }

    fn bucket(&self, sec: u64) -> &AtomicU64 {
        &self.buckets[(sec % RATE_BUCKETS) as usize]
    }

    fn record(&self, now: Instant, n: u64) {
        let head = self.head.load(Ordering::Relaxed);
        let sec = now.duration_since(self.epoch).as_secs().max(head);
        if sec > head {
            // Zerar os baldes dos segundos que passaram sem tráfego
            let gap = (sec - head).min(RATE_BUCKETS);
            for step in 1..=gap {
                self.bucket(head + step).store(0, Ordering::Relaxed);
            }
            self.head.store(sec, Ordering::Release);
        }
        self.bucket(sec).fetch_add(n, Ordering::Relaxed);
    }

    /// Média por segundo na janela que termina em `now`.
    fn per_second(&self, now: Instant) -> f64 {
        let head = self.head.load(Ordering::Acquire);
        let sec = now.duration_since(self.epoch).as_secs();
        let oldest = sec.saturating_sub(RATE_BUCKETS - 1);
        if head < oldest {
            return 0.0;
        }
        let first = oldest.max((head + 1).saturating_sub(RATE_BUCKETS));
        let last = head.min(sec);
        let total: u64 = (first..=last)
            .map(|s| self.bucket(s).load(Ordering::Relaxed))
            .sum();
        total as f64 / RATE_BUCKETS as f64
    }
}

#[derive(Debug)]
struct StatsState {
    total_connections: AtomicU64,
    active_connections: AtomicUsize,
    messages_sent: AtomicU64,
    frames_delivered: AtomicU64,
    evicted_connections: AtomicU64,
    last_message_ms: AtomicI64,
    users: AtomicUsize,
    matches: AtomicUsize,
    rooms: AtomicUsize,
    rate: RateMeter,
}

/// Estatísticas escritas apenas pelo coordenador e lidas por qualquer um.
///
/// Só contadores atômicos: o caminho de broadcast nunca espera por leitores.
/// Um snapshot lê cada campo isoladamente, então campos de momentos
/// ligeiramente diferentes podem aparecer juntos.
#[derive(Debug, Clone)]
pub struct StatsCollector {
    inner: Arc<StatsState>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatsState {
                total_connections: AtomicU64::new(0),
                active_connections: AtomicUsize::new(0),
                messages_sent: AtomicU64::new(0),
                frames_delivered: AtomicU64::new(0),
                evicted_connections: AtomicU64::new(0),
                last_message_ms: AtomicI64::new(NO_MESSAGE),
                users: AtomicUsize::new(0),
                matches: AtomicUsize::new(0),
                rooms: AtomicUsize::new(0),
                rate: RateMeter::new(Instant::now()),
            }),
        }
    }

    pub(crate) fn connection_registered(&self) {
        self.inner.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_evicted(&self) {
        self.inner.evicted_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Publica os valores derivados do estado do coordenador.
    /// `active` é sempre a cardinalidade do conjunto de conexões.
    pub(crate) fn publish_gauges(&self, active: usize, users: usize, matches: usize, rooms: usize) {
        let state = &self.inner;
        state.active_connections.store(active, Ordering::Relaxed);
        state.users.store(users, Ordering::Relaxed);
        state.matches.store(matches, Ordering::Relaxed);
        state.rooms.store(rooms, Ordering::Relaxed);
    }

    pub(crate) fn record_message(&self, delivered: usize) {
        let state = &self.inner;
        state.messages_sent.fetch_add(1, Ordering::Relaxed);
        state
            .frames_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        state
            .last_message_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        state.rate.record(Instant::now(), 1);
    }

    pub fn snapshot(&self) -> HubStats {
        let state = &self.inner;
        let last_ms = state.last_message_ms.load(Ordering::Relaxed);
        HubStats {
            total_connections: state.total_connections.load(Ordering::Relaxed),
            active_connections: state.active_connections.load(Ordering::Relaxed),
            messages_sent: state.messages_sent.load(Ordering::Relaxed),
            frames_delivered: state.frames_delivered.load(Ordering::Relaxed),
            evicted_connections: state.evicted_connections.load(Ordering::Relaxed),
            messages_per_second: state.rate.per_second(Instant::now()),
            last_message_time: (last_ms != NO_MESSAGE)
                .then(|| DateTime::<Utc>::from_timestamp_millis(last_ms))
                .flatten(),
            users: state.users.load(Ordering::Relaxed),
            matches: state.matches.load(Ordering::Relaxed),
            rooms: state.rooms.load(Ordering::Relaxed),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
