use clap::Parser;
use log::{error, info};
use server::config::LagCompConfig;
use server::game::{arena_world, TargetField};
use server::network::{Server, ServerMessage};
use server::session::LagCompensator;
use std::sync::Arc;
use std::time::Duration;

/// Authoritative shooting-range server with lag-compensated hit detection.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "30")]
    tick_rate: u32,
    /// Maximum number of connected clients
    #[clap(short, long, default_value = "16")]
    max_clients: usize,
    /// Number of moving targets
    #[clap(long, default_value = "8")]
    targets: usize,
    /// Seed for target spawning
    #[clap(long, default_value = "0")]
    seed: u64,
    /// How far back shots may be rewound, in milliseconds
    #[clap(long, default_value = "1000")]
    retention_ms: u32,
    /// Ricochet segments the rewind worker may trace per tick
    #[clap(long, default_value = "64")]
    budget: u32,
    /// Rewind every shot by this fixed latency instead of the client's view time
    #[clap(long)]
    latency_override_ms: Option<u32>,
    /// Resolve shots against the present instead of rewinding
    #[clap(long)]
    disable_rewind: bool,
    /// Log the worker's debug draw commands
    #[clap(long)]
    debug_draw: bool,
}

impl Args {
    fn lag_comp_config(&self) -> LagCompConfig {
        LagCompConfig {
            retention_window_ms: self.retention_ms,
            per_tick_sub_query_budget: self.budget,
            simulated_latency_override_ms: self.latency_override_ms,
            enabled: !self.disable_rewind,
            debug_draw: self.debug_draw,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let compensator = Arc::new(LagCompensator::new(
        args.lag_comp_config(),
        Arc::new(arena_world()),
    )?);
    let targets = TargetField::new(args.targets, &compensator, args.seed)?;

    let address = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64);
    let mut server = Server::new(
        &address,
        tick_duration,
        args.max_clients,
        Arc::clone(&compensator),
        targets,
    )
    .await?;

    let control = server.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = control.send(ServerMessage::Shutdown);
        }
    });

    if let Err(e) = server.run().await {
        error!("Server stopped with error: {}", e);
    }

    drop(server);
    compensator.shutdown();
    Ok(())
}
