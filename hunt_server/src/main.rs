//! Standalone server binary.
//!
//! Usage:
//!   server <porta_servidor> [duracao_rodada_seg] [loss_prob]
//!
//! Examples:
//!   server 5000 10
//!   server 5000 10 0.2   # simulate 20% egress loss
//!
//! The server hosts the treasure-hunt game over the reliable datagram
//! transport: clients log in, move on the 3x3 grid, and whoever stands on
//! the hidden treasure when a round closes scores.

use std::env;

use anyhow::Context;
use hunt_server::HuntServer;
use hunt_shared::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let cfg = match ServerConfig::from_args(&args) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Erro: {err:#}");
            eprintln!("Uso: server <porta_servidor> [duracao_rodada_seg] [loss_prob]");
            std::process::exit(1);
        }
    };

    let mut server = HuntServer::bind(&cfg).await.context("start server")?;
    println!(
        "[Servidor] Caça ao tesouro escutando em UDP :{} (rodada={}s, loss={})",
        cfg.port, cfg.round_secs, cfg.loss_prob
    );

    server.run().await
}
