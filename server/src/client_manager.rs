//! Client connection management and shot bookkeeping for the demo server
//!
//! This module handles the server-side roster of connected shooters:
//! - Client connection lifecycle (connect, disconnect, timeout)
//! - Fire sequence tracking so replayed or reordered shots are dropped
//! - Per-client hit statistics for logging
//! - Client capacity management and address tracking

use log::{debug, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Clients silent for longer than this are dropped.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Represents a connected client and their firing history
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Highest fire sequence number accepted
    pub last_fire_sequence: u32,
    pub shots_fired: u32,
    pub hits_confirmed: u32,
}

impl Client {
    /// Creates a new client with the given ID and network address
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            last_fire_sequence: 0,
            shots_fired: 0,
            hits_confirmed: 0,
        }
    }

    /// Accepts a shot if its sequence is newer than every earlier one.
    ///
    /// UDP may duplicate or reorder packets; a late shot would be rewound
    /// against an older view than the client has since moved past.
    pub fn record_fire(&mut self, sequence: u32) -> bool {
        self.last_seen = Instant::now();
        if sequence <= self.last_fire_sequence {
            debug!(
                "Client {} fire {} dropped, already at {}",
                self.id, sequence, self.last_fire_sequence
            );
            return false;
        }
        self.last_fire_sequence = sequence;
        self.shots_fired += 1;
        true
    }

    /// Checks if the client has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients
///
/// Enforces the server capacity limit and maps incoming datagrams back to
/// the client that sent them.
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<u32, Client>,
    /// Next available client ID for new connections
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates a new client manager with the specified capacity limit
    ///
    /// Client IDs start from 1 and increment for each new connection.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns Some(client_id) if successful, None if server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        let client = Client::new(client_id, addr);
        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, client);

        Some(client_id)
    }

    /// Removes a client from the server
    ///
    /// Returns true if the client was found and removed, false if they were
    /// already gone.
    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!(
                "Client {} disconnected ({} shots, {} hits)",
                client.id, client.shots_fired, client.hits_confirmed
            );
            true
        } else {
            false
        }
    }

    /// Finds a client ID by their network address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Returns false for unknown clients and stale sequences.
    pub fn record_fire(&mut self, client_id: u32, sequence: u32) -> bool {
        self.clients
            .get_mut(&client_id)
            .is_some_and(|client| client.record_fire(sequence))
    }

    /// Counts a confirmed hit for the shooter, if still connected.
    pub fn record_hit(&mut self, client_id: u32) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.hits_confirmed += 1;
        }
    }

    pub fn get_client(&self, client_id: u32) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    /// Checks for and removes timed-out clients
    ///
    /// Returns the list of removed client IDs.
    pub fn check_timeouts(&mut self) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(CLIENT_TIMEOUT))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    /// Gets all client IDs and their network addresses
    ///
    /// Used for broadcasting game state updates to all connected clients.
    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
