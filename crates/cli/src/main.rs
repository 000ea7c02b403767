use std::io::{self, Write};

use anyhow::{Context, bail};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use herald_common::{DEFAULT_HOST, DEFAULT_PORT};
use herald_protocol::{ClientAction, Envelope, MessageType, PreferencesPatch};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Parser, Debug)]
#[command(name = "herald-cli", about = "Herald CLI client")]
struct Args {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Usuário com o qual a conexão é registrada
    #[arg(long, short, default_value = "cli")]
    user: String,

    /// Comando para executar diretamente (modo não interativo)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let url = ws_url(&args.host, args.port, &args.user)?;

    let (mut ws, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("falha ao conectar em {url}"))?;

    // Modo comando único (via argumentos)
    if !args.command.is_empty() {
        let action = parse_command(&args.command).map_err(anyhow::Error::msg)?;
        send_action(&mut ws, &action).await?;
        if !matches!(action, ClientAction::Pong) {
            let reply = next_reply(&mut ws).await?;
            println!("{}", format_envelope(&reply));
        }
        ws.close(None).await?;
        return Ok(());
    }

    println!("Conectado a {url}");
    prompt()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break; // EOF
                };
                let line = line.trim();
                if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
                    break;
                }

                let tokens = tokenize(line);
                if !tokens.is_empty() {
                    match parse_command(&tokens) {
                        Ok(action) => send_action(&mut ws, &action).await?,
                        Err(e) => println!("(error) {e}"),
                    }
                }
                prompt()?;
            }
            frame = ws.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => match Envelope::decode(text.as_bytes()) {
                        Ok(env) if env.kind == MessageType::Ping => {
                            // Keepalive do servidor; responde sem poluir o terminal
                            send_action(&mut ws, &ClientAction::Pong).await?;
                        }
                        Ok(env) => {
                            println!("\n{}", format_envelope(&env));
                            prompt()?;
                        }
                        Err(e) => println!("\n(error) mensagem inválida: {e}"),
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        println!("\nservidor fechou a conexão");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }

    let _ = ws.close(None).await;
    Ok(())
}

/// URL de upgrade com o `user_id` codificado na query.
fn ws_url(host: &str, port: u16, user_id: &str) -> Result<Url, url::ParseError> {
    Url::parse_with_params(&format!("ws://{host}:{port}/ws"), &[("user_id", user_id)])
}

fn prompt() -> io::Result<()> {
    print!("herald> ");
    io::stdout().flush()
}

async fn send_action(ws: &mut Socket, action: &ClientAction) -> anyhow::Result<()> {
    ws.send(WsMessage::Text(action.to_value().to_string())).await?;
    Ok(())
}

/// Próxima mensagem que não seja keepalive.
async fn next_reply(ws: &mut Socket) -> anyhow::Result<Envelope> {
    while let Some(frame) = ws.next().await {
        if let WsMessage::Text(text) = frame? {
            let env = Envelope::decode(text.as_bytes())?;
            if env.kind != MessageType::Ping {
                return Ok(env);
            }
        }
    }
    bail!("servidor fechou a conexão")
}

/// Converte uma linha tokenizada em ação de cliente.
fn parse_command(tokens: &[String]) -> Result<ClientAction, String> {
    let Some((name, rest)) = tokens.split_first() else {
        return Err("comando vazio".into());
    };

    let single_arg = |what: &str| -> Result<String, String> {
        match rest {
            [arg] => Ok(arg.clone()),
            _ => Err(format!("uso: {} <{what}>", name.to_lowercase())),
        }
    };

    let action = match name.to_lowercase().as_str() {
        "subscribe" => ClientAction::Subscribe,
        "unsubscribe" => ClientAction::Unsubscribe,
        "join" => ClientAction::JoinRoom {
            room_id: single_arg("room_id")?,
        },
        "leave" => ClientAction::LeaveRoom {
            room_id: single_arg("room_id")?,
        },
        "watch" => ClientAction::WatchMatch {
            match_id: single_arg("match_id")?,
        },
        "unwatch" => ClientAction::UnwatchMatch {
            match_id: single_arg("match_id")?,
        },
        "prefs" => {
            if rest.is_empty() {
                return Err("uso: prefs <chave>=<true|false> ...".into());
            }
            let mut patch = PreferencesPatch::default();
            for pair in rest {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("par inválido: '{pair}'"))?;
                let value: bool = value
                    .parse()
                    .map_err(|_| format!("valor inválido para {key}: '{value}'"))?;
                if !patch.set(key, value) {
                    return Err(format!("preferência desconhecida: '{key}'"));
                }
            }
            ClientAction::UpdatePreferences(patch)
        }
        "stats" => ClientAction::GetStats,
        "pong" => ClientAction::Pong,
        other => return Err(format!("comando desconhecido: '{other}'")),
    };
    Ok(action)
}

/// Tokeniza a linha de input com suporte a strings quoted.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut quote_char = '"';
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quote {
            if c == quote_char {
                in_quote = false;
            } else if c == '\\' {
                match chars.peek() {
                    Some(&next) if next == '"' || next == '\'' || next == '\\' => {
                        current.push(next);
                        chars.next();
                    }
                    _ => current.push(c),
                }
            } else {
                current.push(c);
            }
        } else if c == '"' || c == '\'' {
            in_quote = true;
            quote_char = c;
        } else if c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Formata uma mensagem recebida para exibição humana.
fn format_envelope(env: &Envelope) -> String {
    if env.kind == MessageType::Error {
        let text = env.data["error"].as_str().unwrap_or("erro desconhecido");
        return format!("(error) {text}");
    }

    let mut line = format!("[{}]", env.kind.as_str());
    for (label, target) in [
        ("user", &env.user_id),
        ("match", &env.match_id),
        ("room", &env.room_id),
    ] {
        if let Some(id) = target {
            line.push_str(&format!(" {label}={id}"));
        }
    }
    if !env.data.is_null() {
        line.push(' ');
        line.push_str(&env.data.to_string());
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tokens(line: &str) -> Vec<String> {
        tokenize(line)
    }

    fn envelope(value: serde_json::Value) -> Envelope {
        Envelope::decode(value.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn ws_url_encodes_user_id() {
        let url = ws_url("127.0.0.1", 8080, "ana & bob#1").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8080/ws?user_id=ana+%26+bob%231");
        let pairs: Vec<_> = url.query_pairs().collect();
        assert_eq!(pairs[0].1, "ana & bob#1");
    }

    #[test]
    fn tokenize_simple() {
        assert_eq!(tokenize("join lobby"), vec!["join", "lobby"]);
    }

    #[test]
    fn tokenize_quoted() {
        assert_eq!(tokenize(r#"join "ranked lobby""#), vec!["join", "ranked lobby"]);
        assert_eq!(tokenize("join 'ranked lobby'"), vec!["join", "ranked lobby"]);
    }

    #[test]
    fn tokenize_escaped() {
        assert_eq!(tokenize(r#"join "a\"b""#), vec!["join", r#"a"b"#]);
    }

    #[test]
    fn tokenize_empty() {
        assert_eq!(tokenize("   "), Vec::<String>::new());
    }

    #[test]
    fn parse_room_and_match_commands() {
        assert_eq!(
            parse_command(&tokens("JOIN lobby")).unwrap(),
            ClientAction::JoinRoom {
                room_id: "lobby".into()
            }
        );
        assert_eq!(
            parse_command(&tokens("unwatch BR1_123")).unwrap(),
            ClientAction::UnwatchMatch {
                match_id: "BR1_123".into()
            }
        );
        assert_eq!(parse_command(&tokens("stats")).unwrap(), ClientAction::GetStats);
    }

    #[test]
    fn parse_requires_single_argument() {
        assert_eq!(parse_command(&tokens("join")).unwrap_err(), "uso: join <room_id>");
        assert!(parse_command(&tokens("watch a b")).is_err());
    }

    #[test]
    fn parse_prefs() {
        let action = parse_command(&tokens("prefs rank_updates=true match_updates=false")).unwrap();
        let mut expected = PreferencesPatch::default();
        expected.set("rank_updates", true);
        expected.set("match_updates", false);
        assert_eq!(action, ClientAction::UpdatePreferences(expected));

        assert!(parse_command(&tokens("prefs volume=true")).is_err());
        assert!(parse_command(&tokens("prefs rank_updates=yes")).is_err());
    }

    #[test]
    fn parse_unknown_command() {
        assert_eq!(
            parse_command(&tokens("dance")).unwrap_err(),
            "comando desconhecido: 'dance'"
        );
    }

    #[test]
    fn parsed_action_round_trips_through_wire_format() {
        let action = parse_command(&tokens("leave lobby")).unwrap();
        let wire = action.to_value().to_string();
        assert_eq!(ClientAction::parse(wire.as_bytes()).unwrap(), action);
    }

    #[test]
    fn format_error() {
        let env = envelope(json!({
            "type": "error",
            "data": {"error": "Room ID is required"},
            "timestamp": "2024-01-01T00:00:00Z",
            "id": "x"
        }));
        assert_eq!(format_envelope(&env), "(error) Room ID is required");
    }

    #[test]
    fn format_targeted_message() {
        let env = envelope(json!({
            "type": "room_joined",
            "room_id": "lobby",
            "data": {"room_id": "lobby"},
            "timestamp": "2024-01-01T00:00:00Z",
            "id": "x"
        }));
        assert_eq!(
            format_envelope(&env),
            r#"[room_joined] room=lobby {"room_id":"lobby"}"#
        );
    }
}
