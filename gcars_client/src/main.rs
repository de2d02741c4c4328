//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p gcars_client -- [--addr 127.0.0.1:40000] [--tick-ms 20]
//!
//! The client connects to the server, forwards console steering and throttle
//! commands as signals, and logs the snapshots of its car.
//!
//! Console commands:
//!   steer <radians>     - Turn the drive (counter-clockwise positive)
//!   accelerate          - Drive force +10%
//!   decelerate          - Drive force -10%
//!   status              - Show client status
//!   quit                - Exit client

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use gcars_client::client::{ClientState, GameClient};
use gcars_shared::config::EngineConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<EngineConfig> {
    let mut cfg = EngineConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-ms" if i + 1 < args.len() => {
                cfg.tick_ms = args[i + 1].parse().context("parse --tick-ms")?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr, "Starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Client connected. Type 'status' for info, 'quit' to exit.");
    println!();

    let tick_interval = cfg.tick_interval();
    let mut received: u64 = 0;

    loop {
        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            for out in client.exec_console(&line) {
                println!("{out}");
            }
        }

        if client.state == ClientState::Disconnected {
            println!("Disconnected from server.");
            break;
        }

        let input = client.take_pending_input();
        if !input.is_idle() {
            if let Err(e) = client.tick(input).await {
                println!("Tick error: {e}");
            }
        }

        let fresh = client.recv_snapshots().await as u64;
        if fresh > 0 {
            let before = received;
            received += fresh;
            // Print snapshot info occasionally.
            if before / 50 != received / 50 {
                if let Some(snap) = client.snaps.last_snapshot() {
                    info!(x = snap.x, y = snap.y, angle = snap.angle, "Snapshot");
                }
            }
        }

        tokio::time::sleep(tick_interval).await;
    }

    Ok(())
}
