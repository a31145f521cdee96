//! ==============================================================================
//! main.rs - sensor bridge entry point
//! ==============================================================================
//!
//! purpose:
//!     keeps a bluetooth le air-quality sensor connected and pushes every
//!     reading it notifies to a home-automation state store (openHAB REST).
//!
//! responsibilities:
//!     - load bridge.toml (or defaults) and set up logging
//!     - pick the device link (real bluetooth or simulated)
//!     - run the bridge until ctrl-c, then shut down cleanly (a second
//!       ctrl-c skips the queue drain)
//!
//! relationships:
//!     - uses: config.rs (settings), bridge.rs (the pipeline)
//!     - uses: link.rs / ble.rs (device access)
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    rust bridge (this process)                │
//!     │  ┌──────────────────┐   bounded   ┌──────────────────────┐  │
//!     │  │ supervisor task  │ ──queue───> │ forward worker task  │  │
//!     │  │ connect/retry    │             │ PUT per reading      │  │
//!     │  │ decode frames    │             │ log + drop on error  │  │
//!     │  └────────┬─────────┘             └──────────┬───────────┘  │
//!     └───────────┼──────────────────────────────────┼──────────────┘
//!                 │ gatt notifications               │ http
//!                 ▼                                  ▼
//!         ┌───────────────┐                  ┌───────────────┐
//!         │ sensor (ble)  │                  │ openHAB REST  │
//!         └───────────────┘                  └───────────────┘
//!
//! ==============================================================================

#[cfg(feature = "bluetooth")]
mod ble;
mod bridge;
mod config;
mod domain;
mod forward;
mod frame;
mod link;
mod queue;
mod supervisor;

use anyhow::Result;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Sensor Bridge - BLE air quality -> openHAB");
    println!("===========================================================");

    // step 1: load configuration
    let config = config::BridgeConfig::load_or_default();
    config.print_summary();

    // step 2: logging (RUST_LOG wins over the config file)
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // step 3: device link
    #[cfg(feature = "bluetooth")]
    let link = ble::BleLink::new(&config.device)?;
    #[cfg(not(feature = "bluetooth"))]
    let link = link::SimulatedLink::new(&config.device);

    // step 4: pipeline
    let bridge = bridge::Bridge::new(&config, link)?;
    let state = bridge.watch_state();

    // step 5: ctrl-c flips the shutdown flag
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Script terminated by user.");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // without a signal handler keep running; dropping the sender would stop the bridge
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    });

    // a second ctrl-c while the queue drains stops without waiting
    let force_stop = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tracing::info!("[RUNTIME] Bridge running");
    println!("────────────────────────────────────────────────────────────");
    bridge.run(shutdown_rx, force_stop).await;

    let final_state = *state.borrow();
    tracing::info!(state = %final_state, "[RUNTIME] Bridge stopped");
    Ok(())
}
