//! Game rules and round state machine.
//!
//! Pure state: commands come in as text lines, replies come out as
//! `Outbound` messages with broadcasts already expanded against the login
//! table, so the whole machine is testable without a socket. Timing is
//! injected through `Instant` arguments.
//!
//! All player-facing strings are fixed; tests assert them verbatim.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

pub const GRID_MIN: i32 = 1;
pub const GRID_MAX: i32 = 3;

/// A grid position, 1-based on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    /// Where every player spawns; never holds the treasure.
    pub const START: Cell = Cell { x: 1, y: 1 };

    pub fn in_grid(self) -> bool {
        (GRID_MIN..=GRID_MAX).contains(&self.x) && (GRID_MIN..=GRID_MAX).contains(&self.y)
    }

    /// One step in a direction; may leave the grid.
    pub fn step(self, dir: Direction) -> Cell {
        let Cell { mut x, mut y } = self;
        match dir {
            Direction::Up => y += 1,
            Direction::Down => y -= 1,
            Direction::Left => x -= 1,
            Direction::Right => x += 1,
        }
        Cell { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Parses an already-lowercased token.
    pub fn parse(token: &str) -> Option<Direction> {
        match token {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }
}

/// One message headed for one peer. Broadcasts are expanded into a run of
/// these at event time, against the login table as it stands then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: SocketAddr,
    pub text: String,
}

/// The whole server-side game state.
///
/// The two login maps are mutual inverses at every observable point;
/// `pos`/`score` are keyed by name so score survives logout. `BTreeMap`/
/// `BTreeSet` keep every iteration (broadcast fan-out, state line,
/// eliminations) in a stable order.
pub struct GameState {
    round_len: Duration,
    user_by_addr: BTreeMap<SocketAddr, String>,
    addr_by_user: BTreeMap<String, SocketAddr>,
    pos: BTreeMap<String, Cell>,
    score: BTreeMap<String, u32>,
    used_hint: BTreeSet<String>,
    used_suggest: BTreeSet<String>,
    round_id: u64,
    round_active: BTreeSet<String>,
    round_sent_cmd: BTreeSet<String>,
    round_deadline: Option<Instant>,
    treasure: Cell,
    rng: StdRng,
}

impl GameState {
    pub fn new(round_len: Duration) -> Self {
        Self::with_rng(round_len, StdRng::from_entropy())
    }

    /// Fixed seed for reproducible treasure placement.
    pub fn seeded(round_len: Duration, seed: u64) -> Self {
        Self::with_rng(round_len, StdRng::seed_from_u64(seed))
    }

    fn with_rng(round_len: Duration, mut rng: StdRng) -> Self {
        let treasure = random_treasure(&mut rng);
        Self {
            round_len,
            user_by_addr: BTreeMap::new(),
            addr_by_user: BTreeMap::new(),
            pos: BTreeMap::new(),
            score: BTreeMap::new(),
            used_hint: BTreeSet::new(),
            used_suggest: BTreeSet::new(),
            round_id: 0,
            round_active: BTreeSet::new(),
            round_sent_cmd: BTreeSet::new(),
            round_deadline: None,
            treasure,
            rng,
        }
    }

    // ─── Inspection (used by the loop and by tests) ───

    pub fn user_count(&self) -> usize {
        self.user_by_addr.len()
    }

    pub fn is_logged_in(&self, name: &str) -> bool {
        self.addr_by_user.contains_key(name)
    }

    pub fn position_of(&self, name: &str) -> Option<Cell> {
        self.pos.get(name).copied()
    }

    pub fn score_of(&self, name: &str) -> u32 {
        self.score.get(name).copied().unwrap_or(0)
    }

    pub fn round_id(&self) -> u64 {
        self.round_id
    }

    pub fn treasure(&self) -> Cell {
        self.treasure
    }

    /// Forces the treasure location; keeps tests and demos deterministic.
    pub fn set_treasure(&mut self, cell: Cell) {
        self.treasure = cell;
    }

    // ─── Command handling ───

    /// Handles one command line from a peer. Unknown verbs, bad arity, and
    /// precondition failures all come back as unicast replies; nothing is
    /// fatal.
    pub fn handle_command(&mut self, from: SocketAddr, text: &str) -> Vec<Outbound> {
        let mut out = Vec::new();
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let Some(verb) = tokens.first() else {
            return out;
        };

        match verb.to_lowercase().as_str() {
            "login" => self.handle_login(from, &tokens, &mut out),
            "logout" => self.handle_logout(from, &mut out),
            verb => {
                let Some(user) = self.user_by_addr.get(&from).cloned() else {
                    out.push(Outbound {
                        to: from,
                        text: "[Servidor] Você precisa fazer login primeiro: login <nome>".into(),
                    });
                    return out;
                };

                // Reaching the dispatcher counts as acting in the round,
                // whether or not the command turns out to be valid.
                if self.round_active.contains(&user) {
                    self.round_sent_cmd.insert(user.clone());
                }

                let reply = match verb {
                    "move" => self.handle_move(&user, &tokens),
                    "hint" => self.hint(&user),
                    "suggest" => self.suggest(&user),
                    _ => "[Servidor] Comando inválido. Use: login/logout/move/hint/suggest".into(),
                };
                out.push(Outbound {
                    to: from,
                    text: reply,
                });
            }
        }
        out
    }

    fn handle_login(&mut self, from: SocketAddr, tokens: &[&str], out: &mut Vec<Outbound>) {
        if tokens.len() != 2 {
            out.push(Outbound {
                to: from,
                text: "[Servidor] Uso: login <nome_do_usuario>".into(),
            });
            return;
        }
        let name = tokens[1];

        if let Some(holder) = self.addr_by_user.get(name) {
            if *holder != from {
                out.push(Outbound {
                    to: from,
                    text: "[Servidor] Nome já está em uso.".into(),
                });
                return;
            }
        }

        // A peer switching names logs out of the old one first.
        if let Some(old) = self.user_by_addr.get(&from).cloned() {
            if old != name {
                self.logout_peer(from, out);
            }
        }

        self.user_by_addr.insert(from, name.to_string());
        self.addr_by_user.insert(name.to_string(), from);
        self.score.entry(name.to_string()).or_insert(0);
        self.pos.insert(name.to_string(), Cell::START);

        info!(user = %name, peer = %from, "login");
        out.push(Outbound {
            to: from,
            text: "você está online!".into(),
        });
        self.broadcast(out, format!("[Servidor] {name}:{} entrou no jogo.", from.port()));
    }

    fn handle_logout(&mut self, from: SocketAddr, out: &mut Vec<Outbound>) {
        if self.user_by_addr.contains_key(&from) {
            self.logout_peer(from, out);
        } else {
            out.push(Outbound {
                to: from,
                text: "[Servidor] Você não está logado.".into(),
            });
        }
    }

    /// Deregisters a peer and tells everyone still in the game. The leaver
    /// is removed first, so they are not in the fan-out.
    fn logout_peer(&mut self, from: SocketAddr, out: &mut Vec<Outbound>) {
        let Some(user) = self.user_by_addr.remove(&from) else {
            return;
        };
        self.addr_by_user.remove(&user);
        self.pos.remove(&user);
        self.used_hint.remove(&user);
        self.used_suggest.remove(&user);
        self.round_active.remove(&user);
        self.round_sent_cmd.remove(&user);

        info!(user = %user, peer = %from, "logout");
        self.broadcast(out, format!("[Servidor] {user}:{} saiu do jogo.", from.port()));
    }

    fn handle_move(&mut self, user: &str, tokens: &[&str]) -> String {
        if tokens.len() != 2 {
            return "[Servidor] Uso: move <up|down|left|right>".into();
        }
        let Some(dir) = Direction::parse(&tokens[1].to_lowercase()) else {
            return "[Servidor] Direção inválida. Use: move up|down|left|right".into();
        };

        let current = self.pos.get(user).copied().unwrap_or(Cell::START);
        let next = current.step(dir);
        if !next.in_grid() {
            return "[Servidor] Movimento inválido: fora do grid 3x3.".into();
        }
        self.pos.insert(user.to_string(), next);
        format!("[Servidor] {user} agora está em ({},{}).", next.x, next.y)
    }

    /// One axis-aligned nudge toward the treasure, once per match. Clause
    /// order fixes the tie-break: above, right, below, left.
    fn hint(&mut self, user: &str) -> String {
        if !self.used_hint.insert(user.to_string()) {
            return "[Servidor] Você já usou sua dica (hint) nesta partida.".into();
        }
        let p = self.pos.get(user).copied().unwrap_or(Cell::START);
        let t = self.treasure;
        if p.y < t.y {
            "O tesouro está mais acima.".into()
        } else if p.x < t.x {
            "O tesouro está mais à direita.".into()
        } else if p.y > t.y {
            "O tesouro está mais abaixo.".into()
        } else if p.x > t.x {
            "O tesouro está mais à esquerda.".into()
        } else {
            "Você está alinhado com o tesouro de alguma forma... continue!".into()
        }
    }

    /// Direction plus step count along the strongest axis, once per match.
    /// Ties go to the y axis whenever dy is nonzero.
    fn suggest(&mut self, user: &str) -> String {
        if !self.used_suggest.insert(user.to_string()) {
            return "[Servidor] Você já usou sua sugestão (suggest) nesta partida.".into();
        }
        let p = self.pos.get(user).copied().unwrap_or(Cell::START);
        let dx = self.treasure.x - p.x;
        let dy = self.treasure.y - p.y;

        if dy.abs() >= dx.abs() && dy != 0 {
            if dy > 0 {
                format!("Sugestão: move up {} casas.", dy.abs())
            } else {
                format!("Sugestão: move down {} casas.", dy.abs())
            }
        } else if dx != 0 {
            if dx > 0 {
                format!("Sugestão: move right {} casas.", dx.abs())
            } else {
                format!("Sugestão: move left {} casas.", dx.abs())
            }
        } else {
            "Sugestão: você já está no tesouro (ou muito perto).".into()
        }
    }

    // ─── Round state machine ───

    /// Opens a round when users exist and no deadline is pending. Snapshots
    /// the current users as this round's participants.
    pub fn maybe_start_round(&mut self, now: Instant) -> Vec<Outbound> {
        let mut out = Vec::new();
        if self.user_by_addr.is_empty() {
            return out;
        }
        if self.round_deadline.is_some_and(|deadline| now < deadline) {
            return out;
        }

        self.round_id += 1;
        self.round_active = self.addr_by_user.keys().cloned().collect();
        self.round_sent_cmd.clear();
        self.round_deadline = Some(now + self.round_len);

        info!(round = self.round_id, players = self.round_active.len(), "round started");
        self.broadcast(
            &mut out,
            format!(
                "[Servidor] Início da rodada {}! Envie um comando em até {}s.",
                self.round_id,
                self.round_len.as_secs()
            ),
        );
        out
    }

    /// Closes the round once the deadline passes: notifies the idle
    /// (elimination is informational only), publishes the state line, and
    /// settles a win by resetting the match.
    pub fn maybe_end_round(&mut self, now: Instant) -> Vec<Outbound> {
        let mut out = Vec::new();
        if self.user_by_addr.is_empty() {
            return out;
        }
        let Some(deadline) = self.round_deadline else {
            return out;
        };
        if now < deadline {
            return out;
        }

        let missing: Vec<String> = self
            .round_active
            .difference(&self.round_sent_cmd)
            .cloned()
            .collect();
        for user in &missing {
            if let Some(addr) = self.addr_by_user.get(user) {
                out.push(Outbound {
                    to: *addr,
                    text: "[Servidor] Você foi eliminado desta rodada por não enviar comando a tempo."
                        .into(),
                });
            }
        }

        let state_line = self.state_line();
        self.broadcast(&mut out, state_line);

        if let Some(winner) = self.check_winner() {
            let port = self.addr_by_user[&winner].port();
            let t = self.treasure;
            let score = {
                let entry = self.score.entry(winner.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            info!(user = %winner, score, "treasure found, match reset");
            self.broadcast(
                &mut out,
                format!(
                    "[Servidor] O jogador {winner}:{port} encontrou o tesouro na posição ({},{})!",
                    t.x, t.y
                ),
            );
            self.broadcast(&mut out, format!("[Servidor] Pontuação: {winner} = {score}"));
            self.new_match();
        }

        self.round_deadline = None;
        self.round_active.clear();
        self.round_sent_cmd.clear();
        out
    }

    fn state_line(&self) -> String {
        let parts: Vec<String> = self
            .pos
            .iter()
            .map(|(user, cell)| format!("{user}({},{})[{}]", cell.x, cell.y, self.score_of(user)))
            .collect();
        format!("[Servidor] Estado atual: {}", parts.join(", "))
    }

    fn check_winner(&self) -> Option<String> {
        self.pos
            .iter()
            .find(|(_, cell)| **cell == self.treasure)
            .map(|(user, _)| user.clone())
    }

    /// New treasure, everyone back to the start cell, one-shots recharged.
    fn new_match(&mut self) {
        self.treasure = random_treasure(&mut self.rng);
        self.used_hint.clear();
        self.used_suggest.clear();
        for cell in self.pos.values_mut() {
            *cell = Cell::START;
        }
    }

    fn broadcast(&self, out: &mut Vec<Outbound>, text: impl Into<String>) {
        let text = text.into();
        for addr in self.user_by_addr.keys() {
            out.push(Outbound {
                to: *addr,
                text: text.clone(),
            });
        }
    }
}

fn random_treasure(rng: &mut StdRng) -> Cell {
    loop {
        let cell = Cell {
            x: rng.gen_range(GRID_MIN..=GRID_MAX),
            y: rng.gen_range(GRID_MIN..=GRID_MAX),
        };
        if cell != Cell::START {
            return cell;
        }
    }
}
