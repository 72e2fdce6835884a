//! Standalone client binary.
//!
//! Usage:
//!   client <ip_servidor> <porta_servidor> <porta_local_cliente> [loss_prob]
//!
//! Examples:
//!   client 127.0.0.1 5000 5001
//!   client 127.0.0.1 5000 5002 0.2   # simulate 20% egress loss
//!
//! Commands are read from stdin, one per line, and sent reliably to the
//! server; replies and broadcasts print as they arrive.

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use hunt_client::HuntClient;
use hunt_shared::config::ClientConfig;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let cfg = match ClientConfig::from_args(&args) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Erro: {err:#}");
            eprintln!("Uso: client <ip_servidor> <porta_servidor> <porta_local_cliente> [loss_prob]");
            std::process::exit(1);
        }
    };

    let client = HuntClient::bind(&cfg).await.context("start client")?;
    let reader = client.spawn_reader();

    println!(
        "[Cliente] Conectado. Porta local={}. Servidor={}:{}",
        cfg.local_port, cfg.server_ip, cfg.server_port
    );
    println!("Comandos: login <nome> | logout | move up/down/left/right | hint | suggest");

    // Dedicated stdin thread so the terminal stays responsive while the
    // runtime drives the sockets.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("> ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break, // end of input
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    while let Some(line) = console_rx.recv().await {
        if let Err(err) = client.send_command(&line).await {
            println!("Erro ao enviar: {err:#}");
        }
        // Give immediate replies a beat to print before the next prompt.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    client.shutdown();
    let _ = reader.await;
    println!();
    println!("[Cliente] Encerrado.");
    Ok(())
}
