//! Server network layer handling UDP communications and game loop coordination
//!
//! Fire packets are handed to the lag compensator and answered with a
//! `HitConfirm` once the rewind worker resolves them. The main loop never
//! waits on a rewind; each shot gets a small task that forwards the result
//! back through the server channel.

use crate::client_manager::ClientManager;
use crate::debug_draw::DebugCommand;
use crate::game::TargetField;
use crate::query::RewindResult;
use crate::session::LagCompensator;
use crate::snapshot::{CollisionMask, SimTime};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{validate_fire, HitSummary, Packet, PROTOCOL_VERSION};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: u32,
    },
    FireResolved {
        client_id: u32,
        addr: SocketAddr,
        sequence: u32,
        result: Option<RewindResult>,
    },
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<u32>,
    },
}

/// Main server coordinating networking, targets and hit resolution
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    targets: TargetField,
    compensator: Arc<LagCompensator>,
    tick_duration: Duration,
    started: Instant,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        compensator: Arc<LagCompensator>,
        targets: TargetField,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            targets,
            compensator,
            tick_duration,
            started: Instant::now(),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender that makes [`Server::run`] return once `Shutdown` is posted.
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Seconds since the server started. Also the timestamp every snapshot
    /// is recorded with.
    pub fn server_time(&self) -> SimTime {
        self.started.elapsed().as_secs_f64()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<u32>) {
        if let Err(e) = self
            .game_tx
            .send(GameMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    async fn handle_message(&mut self, message: ServerMessage) -> bool {
        match message {
            ServerMessage::PacketReceived { packet, addr } => {
                self.handle_packet(packet, addr).await;
            }
            ServerMessage::ClientTimeout { client_id } => {
                debug!("Client {} timed out", client_id);
            }
            ServerMessage::FireResolved {
                client_id,
                addr,
                sequence,
                result,
            } => {
                self.confirm_fire(client_id, addr, sequence, result).await;
            }
            ServerMessage::Shutdown => {
                info!("Server shutting down");
                return false;
            }
        }
        true
    }

    /// Processes incoming packets
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                let mut clients = self.clients.write().await;
                if let Some(existing_id) = clients.find_client_by_addr(addr) {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    clients.remove_client(&existing_id);
                }

                let response = match clients.add_client(addr) {
                    Some(client_id) => Packet::Connected { client_id },
                    None => Packet::Disconnected {
                        reason: "Server full".to_string(),
                    },
                };
                drop(clients);
                self.send_packet(response, addr);
            }

            Packet::Fire {
                sequence,
                view_time,
                start,
                end,
                radius,
            } => {
                let accepted = {
                    let mut clients = self.clients.write().await;
                    match clients.find_client_by_addr(addr) {
                        Some(client_id) if validate_fire(start, end, radius) => clients
                            .record_fire(client_id, sequence)
                            .then_some(client_id),
                        Some(client_id) => {
                            warn!("Client {} sent an out-of-range shot", client_id);
                            None
                        }
                        None => None,
                    }
                };
                let Some(client_id) = accepted else {
                    return;
                };

                debug!(
                    "Client {} fire {} at view time {:.3}",
                    client_id, sequence, view_time
                );
                let pending = self.compensator.rewind_query(
                    view_time,
                    start,
                    end,
                    radius,
                    CollisionMask::ALL,
                    HashSet::new(),
                );
                let server_tx = self.server_tx.clone();
                tokio::spawn(async move {
                    let result = pending.await;
                    let _ = server_tx.send(ServerMessage::FireResolved {
                        client_id,
                        addr,
                        sequence,
                        result,
                    });
                });
            }

            Packet::Disconnect => {
                let mut clients = self.clients.write().await;
                if let Some(client_id) = clients.find_client_by_addr(addr) {
                    clients.remove_client(&client_id);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn confirm_fire(
        &mut self,
        client_id: u32,
        addr: SocketAddr,
        sequence: u32,
        result: Option<RewindResult>,
    ) {
        let Some(result) = result else {
            warn!(
                "Fire {} from client {} dropped by the lag compensator",
                sequence, client_id
            );
            return;
        };

        if result.hit_entities().next().is_some() {
            self.clients.write().await.record_hit(client_id);
        }
        if result.approximate {
            debug!(
                "Fire {} from client {} resolved at clamped time {:.3}",
                sequence, client_id, result.resolved_time
            );
        }

        self.send_packet(
            Packet::HitConfirm {
                sequence,
                approximate: result.approximate,
                hits: hit_summaries(&result),
            },
            addr,
        );
    }

    /// Moves targets, records their poses and wakes the rewind worker.
    async fn advance(&mut self, now: SimTime, dt: f32) {
        self.targets.update_positions(dt);
        self.targets.capture(now);
        self.compensator.tick(now);

        if self.compensator.config().debug_draw {
            self.compensator
                .flush_debug_commands(&mut |command: DebugCommand| {
                    debug!("debug draw: {:?}", command)
                });
        }

        self.broadcast_game_state(now).await;
    }

    /// Broadcasts current target positions to all connected clients
    async fn broadcast_game_state(&self, now: SimTime) {
        if self.clients.read().await.is_empty() {
            return;
        }

        let packet = Packet::GameState {
            tick: self.targets.tick,
            server_time: now,
            targets: self.targets.states(),
        };
        self.broadcast_packet(packet, None);
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        let mut last_tick = Instant::now();

        info!(
            "Server started with {} targets, lag compensation {}",
            self.targets.len(),
            if self.compensator.is_enabled() { "on" } else { "off" }
        );

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(message) => {
                            if !self.handle_message(message).await {
                                break;
                            }
                        }
                        None => break,
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    let server_time = self.server_time();
                    self.advance(server_time, dt).await;

                    if self.targets.tick % 60 == 0 {
                        let client_count = self.clients.read().await.len();
                        if client_count > 0 {
                            debug!("Tick {}: {} clients, {:.1}Hz",
                                   self.targets.tick, client_count, 1.0 / dt);
                        }
                    }
                },
            }
        }

        Ok(())
    }
}

/// Wire form of a rewind result, nearest hit first.
pub fn hit_summaries(result: &RewindResult) -> Vec<HitSummary> {
    result
        .hits
        .iter()
        .map(|hit| HitSummary {
            target: hit.entity,
            point: hit.entry_point,
            normal: hit.entry_normal,
            distance: hit.distance_from_start,
            material: hit.material,
        })
        .collect()
}
