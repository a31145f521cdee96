//! ==============================================================================
//! bridge.rs - wires supervisor, queue and forwarder together
//! ==============================================================================
//!
//! purpose:
//!     builds the whole pipeline from one BridgeConfig and runs it until the
//!     shutdown flag flips:
//!
//!     ┌────────────┐  frame  ┌────────────┐ reading ┌───────┐ reading ┌───────────┐
//!     │ DeviceLink │ ──────> │ supervisor │ ──────> │ queue │ ──────> │ forwarder │ ──> PUT
//!     └────────────┘         │  (decode)  │         └───────┘         │  (worker) │
//!                            └────────────┘                           └───────────┘
//!
//! shutdown:
//!     the supervisor returns, its queue sender drops, and the worker gets a
//!     short grace period to flush what is already queued. the `force_stop`
//!     future (a second ctrl-c in main.rs) cuts that grace period short.
//!
//! relationships:
//!     - uses: supervisor.rs, queue.rs, forward.rs
//!     - used by: main.rs
//!
//! ==============================================================================

use crate::config::BridgeConfig;
use crate::domain::ConnectionState;
use crate::forward::{self, Forwarder};
use crate::link::DeviceLink;
use crate::queue::reading_queue;
use crate::supervisor::ConnectionSupervisor;

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// how long queued readings may take to flush on shutdown
const DRAIN_GRACE: Duration = Duration::from_secs(5);

pub struct Bridge<L> {
    supervisor: ConnectionSupervisor<L>,
    worker: JoinHandle<()>,
}

impl<L: DeviceLink> Bridge<L> {
    /// build the pipeline and start the forward worker
    ///
    /// must be called from inside a tokio runtime.
    pub fn new(config: &BridgeConfig, link: L) -> Result<Self> {
        let forwarder = Forwarder::new(&config.forward)?;
        let (tx, rx) = reading_queue(config.forward.queue_capacity, config.forward.backpressure);
        let worker = tokio::spawn(forward::run_worker(forwarder, rx));

        let supervisor = ConnectionSupervisor::new(link, config.retry.policy(), tx)
            .device_label(config.device.address.clone())
            .show_sensor_data(config.logging.show_sensor_data);

        Ok(Self { supervisor, worker })
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.watch_state()
    }

    /// run until `shutdown` flips, then drain the queue
    ///
    /// `force_stop` is only polled while draining; when it resolves the
    /// worker is aborted without waiting out the grace period.
    pub async fn run(self, shutdown: watch::Receiver<bool>, force_stop: impl Future<Output = ()>) {
        let Bridge {
            mut supervisor,
            mut worker,
        } = self;

        supervisor.run(shutdown).await;
        // closes the queue
        drop(supervisor);

        tokio::select! {
            drained = tokio::time::timeout(DRAIN_GRACE, &mut worker) => match drained {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "forward worker failed"),
                Err(_) => {
                    tracing::warn!("forward worker still busy after {:?}, dropping queued readings", DRAIN_GRACE);
                    worker.abort();
                }
            },
            _ = force_stop => {
                tracing::warn!("forced stop, dropping queued readings");
                worker.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForwardConfig;
    use crate::domain::Reading;
    use crate::forward::testing::{spawn_sink, spawn_stalled_sink, Captured};
    use crate::frame::encode_frame;
    use crate::link::testing::{Script, ScriptedLink};
    use axum::http::StatusCode;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    fn frame(values: [f32; 8]) -> Result<Vec<u8>, String> {
        Ok(encode_frame(&Reading::from_values(values)).to_vec())
    }

    fn config(url: String) -> BridgeConfig {
        BridgeConfig {
            forward: ForwardConfig {
                url,
                timeout_seconds: 2,
                ..ForwardConfig::default()
            },
            ..BridgeConfig::default()
        }
    }

    async fn wait_for_calls(seen: &Arc<Mutex<Vec<Captured>>>, n: usize) {
        for _ in 0..250 {
            if seen.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("sink saw {} calls, wanted {}", seen.lock().unwrap().len(), n);
    }

    #[tokio::test]
    async fn forwards_reference_reading() {
        let (url, seen) = spawn_sink(StatusCode::OK).await;
        let (link, _journal) = ScriptedLink::new(Script {
            notifications: VecDeque::from(vec![frame([1.1, 2.2, 3.3, 4.4, 55.0, 21.5, 100.0, 10.0])]),
            ..Script::default()
        });
        let bridge = Bridge::new(&config(url), link).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(bridge.run(stop_rx, std::future::pending::<()>()));

        wait_for_calls(&seen, 1).await;
        assert_eq!(
            seen.lock().unwrap()[0].body,
            r#"{"pm1":1.1,"pm25":2.2,"pm4":3.3,"pm10":4.4,"humidity":55.0,"temperature":21.5,"voc":100.0,"nox":10.0}"#
        );

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn sink_failures_do_not_touch_the_link() {
        let (url, seen) = spawn_sink(StatusCode::INTERNAL_SERVER_ERROR).await;
        let (link, journal) = ScriptedLink::new(Script {
            notifications: VecDeque::from(vec![
                frame([1.0; 8]),
                Ok(vec![0u8; 16]),
                frame([2.0; 8]),
                frame([3.0; 8]),
            ]),
            ..Script::default()
        });
        let bridge = Bridge::new(&config(url), link).unwrap();
        let state = bridge.watch_state();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(bridge.run(stop_rx, std::future::pending::<()>()));

        wait_for_calls(&seen, 3).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(*state.borrow(), ConnectionState::Subscribed);
        {
            let journal = journal.lock().unwrap();
            assert_eq!(journal.connect_attempts.len(), 1);
            assert_eq!(journal.disconnects, 0);
        }

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn short_frame_is_never_forwarded() {
        let (url, seen) = spawn_sink(StatusCode::OK).await;
        let (link, _journal) = ScriptedLink::new(Script {
            notifications: VecDeque::from(vec![Ok(vec![0u8; 16])]),
            ..Script::default()
        });
        let bridge = Bridge::new(&config(url), link).unwrap();
        let mut state = bridge.watch_state();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(bridge.run(stop_rx, std::future::pending::<()>()));

        state
            .wait_for(|s| *s == ConnectionState::Subscribed)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn force_stop_cuts_the_drain_short() {
        let (url, seen) = spawn_stalled_sink().await;
        let mut config = config(url);
        // longer than the grace period, so only the force stop can end the drain early
        config.forward.timeout_seconds = 60;
        let (link, _journal) = ScriptedLink::new(Script {
            notifications: VecDeque::from(vec![frame([1.0; 8])]),
            ..Script::default()
        });
        let bridge = Bridge::new(&config, link).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (force_tx, force_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(bridge.run(stop_rx, async move {
            let _ = force_rx.await;
        }));

        wait_for_calls(&seen, 1).await;
        stop_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        let forced_at = Instant::now();
        force_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("bridge kept draining after force stop")
            .unwrap();
        assert!(forced_at.elapsed() < DRAIN_GRACE);
    }
}
