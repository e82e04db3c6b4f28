//! Minimal scripted client: joins a room, walks in a circle and prints
//! everything the server sends back.

use clap::Parser;
use env_logger::Env;
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use shared::{ClientMessage, ServerMessage};
use std::time::Duration;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// WebSocket URL of the server
    #[clap(short, long, default_value = "ws://127.0.0.1:8080")]
    server: String,
    /// Room to join
    #[clap(short, long, default_value = "lobby")]
    room: String,
    /// Player id to join as
    #[clap(short, long, default_value = "test-player")]
    player_id: String,
    /// Display name
    #[clap(short, long, default_value = "Tester")]
    name: String,
    /// Number of moves before leaving
    #[clap(long, default_value = "20")]
    steps: u32,
    /// Radius of the circle walked around the spawn point
    #[clap(long, default_value = "100")]
    radius: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let (ws, _) = connect_async(args.server.as_str()).await?;
    info!("Connected to {}", args.server);
    let (mut sink, mut stream) = ws.split();

    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                    Ok(ServerMessage::Players { players }) => {
                        let summary: Vec<String> = players
                            .iter()
                            .map(|p| {
                                format!(
                                    "{}@({:.0},{:.0}){}",
                                    p.id,
                                    p.x,
                                    p.y,
                                    p.cluster_id
                                        .as_deref()
                                        .map(|c| format!("[{}]", c))
                                        .unwrap_or_default()
                                )
                            })
                            .collect();
                        println!("PLAYERS {}", summary.join(" "));
                    }
                    Ok(message) => println!("{:?}", message),
                    Err(_) => println!("signal: {}", text.as_str()),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Connection error: {}", e);
                    break;
                }
            }
        }
    });

    let join = ClientMessage::Join {
        room: args.room.clone(),
        player_id: args.player_id.clone(),
        name: args.name.clone(),
    };
    sink.send(Message::Text(join.encode().into())).await?;

    for step in 0..args.steps {
        let angle = step as f64 / args.steps.max(1) as f64 * std::f64::consts::TAU;
        let movement = ClientMessage::Move {
            room: args.room.clone(),
            player_id: args.player_id.clone(),
            x: shared::SPAWN_X + args.radius * angle.cos(),
            y: shared::SPAWN_Y + args.radius * angle.sin(),
        };
        sink.send(Message::Text(movement.encode().into())).await?;
        sleep(Duration::from_millis(500)).await;
    }

    sink.send(Message::Text(ClientMessage::Leave.encode().into()))
        .await?;
    sink.send(Message::Close(None)).await?;
    info!("Left room {}", args.room);

    let _ = tokio::time::timeout(Duration::from_secs(2), reader).await;
    Ok(())
}
