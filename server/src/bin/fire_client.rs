use bincode::{deserialize, serialize};
use clap::Parser;
use glam::Vec3;
use shared::{Packet, TargetState, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

/// Connects to the server and shoots at the nearest target a few times.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,
    /// Number of shots to fire
    #[clap(short = 'n', long, default_value = "10")]
    shots: u32,
    /// Sweep radius of each shot
    #[clap(short, long, default_value = "0.0")]
    radius: f32,
    /// Delay between shots in milliseconds
    #[clap(short, long, default_value = "500")]
    interval_ms: u64,
}

const SHOOTER_HEIGHT: f32 = 1.6;

async fn recv_packet(socket: &UdpSocket, buf: &mut [u8]) -> Option<Packet> {
    match timeout(Duration::from_secs(2), socket.recv_from(buf)).await {
        Ok(Ok((len, _))) => deserialize::<Packet>(&buf[0..len]).ok(),
        Ok(Err(e)) => {
            println!("Error receiving packet: {}", e);
            None
        }
        Err(_) => None,
    }
}

/// Waits for the next world update, skipping anything else.
async fn latest_state(socket: &UdpSocket, buf: &mut [u8]) -> Option<(f64, Vec<TargetState>)> {
    for _ in 0..32 {
        match recv_packet(socket, buf).await? {
            Packet::GameState {
                server_time,
                targets,
                ..
            } => return Some((server_time, targets)),
            Packet::HitConfirm {
                sequence,
                approximate,
                hits,
            } => print_confirm(sequence, approximate, &hits),
            _ => {}
        }
    }
    None
}

fn print_confirm(sequence: u32, approximate: bool, hits: &[shared::HitSummary]) {
    let flag = if approximate { " (approximate)" } else { "" };
    match hits.first() {
        Some(hit) => println!(
            "Shot {} hit {:?} material {} at {:.2}m{}",
            sequence, hit.target, hit.material, hit.distance, flag
        ),
        None => println!("Shot {} missed{}", sequence, flag),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    let connect = Packet::Connect {
        client_version: PROTOCOL_VERSION,
    };
    socket.send_to(&serialize(&connect)?, args.server).await?;

    let mut buf = [0u8; 2048];
    let client_id = match recv_packet(&socket, &mut buf).await {
        Some(Packet::Connected { client_id }) => client_id,
        Some(other) => {
            println!("Expected Connected but got: {:?}", other);
            return Ok(());
        }
        None => {
            println!("No response from {}", args.server);
            return Ok(());
        }
    };
    println!("Connected with client ID: {}", client_id);

    let eye = Vec3::new(0.0, SHOOTER_HEIGHT, 0.0);
    for sequence in 1..=args.shots {
        let Some((server_time, targets)) = latest_state(&socket, &mut buf).await else {
            println!("No game state received");
            break;
        };
        let Some(target) = targets
            .iter()
            .min_by(|a, b| a.center().distance(eye).total_cmp(&b.center().distance(eye)))
        else {
            println!("No targets to shoot at");
            break;
        };

        let direction = (target.center() - eye).normalize_or_zero();
        let fire = Packet::Fire {
            sequence,
            view_time: server_time,
            start: eye,
            end: eye + direction * 100.0,
            radius: args.radius,
        };
        println!(
            "Firing shot {} at target {} (view time {:.3})",
            sequence, target.id, server_time
        );
        socket.send_to(&serialize(&fire)?, args.server).await?;

        sleep(Duration::from_millis(args.interval_ms)).await;
    }

    // Confirmations still in flight arrive between world updates.
    for _ in 0..64 {
        let Some(packet) = recv_packet(&socket, &mut buf).await else {
            break;
        };
        if let Packet::HitConfirm {
            sequence,
            approximate,
            hits,
        } = packet
        {
            print_confirm(sequence, approximate, &hits);
        }
    }

    socket
        .send_to(&serialize(&Packet::Disconnect)?, args.server)
        .await?;
    println!("Fire client finished");
    Ok(())
}
