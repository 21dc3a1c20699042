//! Host driver for the reactive core.
//!
//! Wires a hero, an enemy and their observers into one runtime, runs a short
//! fight one flush per tick and tears every owner down at the end.
mod scenario;

use anyhow::Result;
use reactive_core::RuntimeConfig;
use scenario::Arena;

const DEFAULT_TICKS: u32 = 8;

/// Sandbox settings read from the environment.
#[derive(Clone, Debug)]
struct SandboxConfig {
    ticks: u32,
    runtime: RuntimeConfig,
}

impl SandboxConfig {
    fn from_env() -> Self {
        let ticks = std::env::var("SANDBOX_TICKS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_TICKS);
        Self {
            ticks,
            runtime: RuntimeConfig::from_env(),
        }
    }
}

fn main() -> Result<()> {
    // Load .env file if it exists (silently ignore if not found)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = SandboxConfig::from_env();
    tracing::info!(ticks = config.ticks, runtime = ?config.runtime, "sandbox starting");

    let arena = Arena::build(config.runtime)?;
    for tick in 1..=config.ticks {
        if !arena.step(tick)? {
            tracing::info!(tick, "fight over");
            break;
        }
    }

    println!("{}", serde_json::to_string_pretty(&arena.summary())?);
    arena.shutdown()
}
