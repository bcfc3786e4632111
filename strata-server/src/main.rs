//! Runs the strata world engine headless: opens the configured worlds, keeps their spawn areas
//! loaded and ticks them until interrupted.

use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::bail;
use clap::Parser;
use log::{LevelFilter, debug, info};
use rand::{SeedableRng, rngs::StdRng};
use strata_server::{
    config_file,
    plugins::PluginRegistry,
    world::storage::file::FileStorageProvider,
    world_registry::{RegistrySettings, WorldRegistry},
};
use tokio::{runtime::Handle, task, time::MissedTickBehavior};

/// radius of the area around each spawn point that is kept loaded
const SPAWN_RADIUS: u32 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory containing all worlds
    #[arg(short = 'd', long, default_value = "worlds")]
    world_dir: PathBuf,

    /// Worlds to open at startup
    #[arg(short, long = "world", default_value = "world")]
    worlds: Vec<String>,

    /// Overrides the configured tick rate
    #[arg(short, long)]
    tps: Option<u32>,

    /// Verbosity level (up to -vvv)
    #[arg(short, long, default_value_t = 0, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // tokio::main makes rust-analyzer fragile,
    // so put the code in a separate place.
    real_main().await
}

async fn real_main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(match args.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        })
        .init();

    let mut settings = match &args.config {
        Some(path) => config_file::load(path)?,
        None => RegistrySettings::default(),
    };
    if let Some(tps) = args.tps {
        if tps == 0 {
            bail!("the tick rate must be positive");
        }
        settings.ticks_per_second = tps;
    }
    let tick_interval = settings.tick_interval();
    let ticks_per_sweep = settings.ticks_per_second;

    let registry = Arc::new(WorldRegistry::new(
        settings,
        PluginRegistry::with_defaults(),
        Arc::new(FileStorageProvider::new(args.world_dir.clone())),
        Handle::current(),
    ));

    let mut tickets = Vec::with_capacity(args.worlds.len());
    for id in &args.worlds {
        let world = task::block_in_place(|| registry.get(id))?;
        let spawn = world.metadata().spawn.chunk_pos();
        tickets.push((
            Arc::clone(&world),
            world.add_loading_ticket(spawn, SPAWN_RADIUS),
        ));
        info!("opened world '{id}' with seed {seed}", seed = i64::from(world.seed()));
    }

    let mut rng = StdRng::from_os_rng();
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tps = registry.subscribe_tps();
    let mut ticks: u32 = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Instant::now();
                task::block_in_place(|| {
                    registry.tick_all(&mut rng, now);
                    ticks += 1;
                    if ticks >= ticks_per_sweep {
                        ticks = 0;
                        registry.sweep(now);
                    }
                });
            }
            Ok(()) = tps.changed() => {
                debug!("{:.1} ticks per second", *tps.borrow_and_update());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    for (world, ticket) in tickets {
        world.remove_loading_ticket(&ticket);
    }
    task::spawn_blocking(move || registry.shutdown()).await??;
    Ok(())
}
