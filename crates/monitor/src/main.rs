use std::collections::VecDeque;
use std::{io, time::Duration};

use anyhow::{Result, bail};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::{SinkExt, StreamExt};
use ratatui::{
    prelude::*,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
};
use tokio::net::TcpStream;
use tokio::time::{interval, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use herald_common::{DEFAULT_HOST, DEFAULT_PORT};
use herald_hub::HubStats;
use herald_protocol::{ClientAction, Envelope, MessageType};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Parser, Debug)]
#[command(name = "herald-monitor", about = "Monitor TUI for Herald")]
struct Args {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    #[arg(long, default_value = "monitor")]
    user: String,
}

/// Série temporal com janela fixa.
struct Series {
    data: VecDeque<(f64, f64)>,
    window_size: usize,
}

impl Series {
    fn new(window_size: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    fn push(&mut self, x: f64, y: f64) {
        if self.data.len() >= self.window_size {
            self.data.pop_front();
        }
        self.data.push_back((x, y));
    }

    fn points(&self) -> Vec<(f64, f64)> {
        self.data.iter().cloned().collect()
    }

    fn max(&self) -> f64 {
        self.data.iter().map(|(_, y)| *y).fold(0.0, f64::max)
    }
}

struct App {
    connections: Series,
    rate: Series,
    last: Option<HubStats>,
    window_size: usize,
    x_offset: f64,
}

impl App {
    fn new() -> Self {
        Self {
            connections: Series::new(100),
            rate: Series::new(100),
            last: None,
            window_size: 100,
            x_offset: 0.0,
        }
    }

    fn record(&mut self, stats: HubStats) {
        self.x_offset += 1.0;
        self.connections
            .push(self.x_offset, stats.active_connections as f64);
        self.rate.push(self.x_offset, stats.messages_per_second);
        self.last = Some(stats);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let url = ws_url(&args.host, args.port, &args.user)?;
    let (mut ws, _) = connect_async(url.as_str()).await?;

    // Setup Terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, &mut ws, &addr).await;

    // Restore Terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    let _ = ws.close(None).await;

    result
}

/// URL de upgrade com o `user_id` codificado na query.
fn ws_url(host: &str, port: u16, user_id: &str) -> Result<Url, url::ParseError> {
    Url::parse_with_params(&format!("ws://{host}:{port}/ws"), &[("user_id", user_id)])
}

async fn run<B: Backend>(terminal: &mut Terminal<B>, ws: &mut Socket, addr: &str) -> Result<()> {
    let mut app = App::new();
    let mut ticker = interval(Duration::from_secs(1));

    loop {
        terminal.draw(|f| ui(f, &app, addr))?;

        if event::poll(Duration::from_millis(0))?
            && let Event::Key(key) = event::read()?
            && key.code == KeyCode::Char('q')
        {
            return Ok(());
        }

        ticker.tick().await;
        let stats = poll_stats(ws).await?;
        app.record(stats);
    }
}

/// Pede `get_stats` e aguarda a resposta, respondendo pings no caminho.
async fn poll_stats(ws: &mut Socket) -> Result<HubStats> {
    let request = ClientAction::GetStats.to_value().to_string();
    ws.send(WsMessage::Text(request)).await?;

    loop {
        let frame = match timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(frame)) => frame?,
            Ok(None) => bail!("servidor fechou a conexão"),
            Err(_) => bail!("timeout aguardando estatísticas"),
        };
        let WsMessage::Text(text) = frame else {
            continue;
        };

        let env = Envelope::decode(text.as_bytes())?;
        match env.kind {
            MessageType::Stats => return Ok(serde_json::from_value(env.data)?),
            MessageType::Ping => {
                let pong = ClientAction::Pong.to_value().to_string();
                ws.send(WsMessage::Text(pong)).await?;
            }
            _ => {}
        }
    }
}

fn ui(f: &mut Frame, app: &App, addr: &str) {
    let size = f.size();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Percentage(50),
            Constraint::Percentage(50),
        ])
        .split(size);

    let summary = match &app.last {
        Some(s) => format!(
            "Herald Monitor - {addr} | ativas: {} | total: {} | mensagens: {} | despejadas: {} | usuários: {} partidas: {} salas: {}",
            s.active_connections,
            s.total_connections,
            s.messages_sent,
            s.evicted_connections,
            s.users,
            s.matches,
            s.rooms
        ),
        None => format!("Herald Monitor - {addr} | aguardando dados..."),
    };
    let title = Paragraph::new(summary)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .style(Style::default().fg(Color::Cyan));
    f.render_widget(title, chunks[0]);

    let connections = app.connections.points();
    f.render_widget(
        chart(app, "Active connections", &connections, app.connections.max() + 10.0, Color::Yellow),
        chunks[1],
    );

    let rate = app.rate.points();
    f.render_widget(
        chart(app, "Messages/s", &rate, app.rate.max() + 1.0, Color::Green),
        chunks[2],
    );
}

fn chart<'a>(app: &App, title: &'a str, points: &'a [(f64, f64)], max_y: f64, color: Color) -> Chart<'a> {
    let dataset = vec![
        Dataset::default()
            .name(title)
            .marker(symbols::Marker::Braille)
            .style(Style::default().fg(color))
            .graph_type(GraphType::Line)
            .data(points),
    ];

    let start = app.x_offset - app.window_size as f64;
    let x_labels = vec![
        Span::styled(
            format!("{start:.0}"),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("{:.0}", app.x_offset),
            Style::default().add_modifier(Modifier::BOLD),
        ),
    ];

    Chart::new(dataset)
        .block(Block::default().title(title).borders(Borders::ALL))
        .x_axis(
            Axis::default()
                .title("Time (s)")
                .style(Style::default().fg(Color::Gray))
                .bounds([start, app.x_offset])
                .labels(x_labels),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, max_y])
                .labels(vec![
                    Span::raw("0"),
                    Span::styled(
                        format!("{max_y:.1}"),
                        Style::default().add_modifier(Modifier::BOLD),
                    ),
                ]),
        )
}
