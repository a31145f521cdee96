//! ==============================================================================
//! forward.rs - push readings to the home-automation state store
//! ==============================================================================
//!
//! purpose:
//!     one reading becomes one PUT with a json object body, e.g.
//!
//!         {"pm1":1.1,"pm25":2.2,"pm4":3.3,"pm10":4.4,
//!          "humidity":55.0,"temperature":21.5,"voc":100.0,"nox":10.0}
//!
//!     sent with `Content-Type: text/plain` (the openHAB batch-update item
//!     expects the raw json string as the item state).
//!
//! failure isolation:
//!     a failed forward is logged together with the payload and dropped.
//!     no retry, no re-queue, and nothing flows back to the supervisor.
//!
//! relationships:
//!     - used by: bridge.rs (spawns run_worker)
//!     - reads: queue.rs (ReadingReceiver)
//!
//! ==============================================================================

use crate::config::ForwardConfig;
use crate::domain::Reading;
use crate::queue::ReadingReceiver;

use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;

/// render a reading as the state store payload
///
/// finite values use the shortest f32 form. strict json cannot carry NaN or
/// infinities, so those are written as the bare tokens NaN / Infinity /
/// -Infinity rather than being replaced.
pub fn encode_payload(reading: &Reading) -> Result<String> {
    let mut out = String::from("{");
    for (i, (name, value)) in reading.fields().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&serde_json::to_string(name)?);
        out.push(':');
        out.push_str(&encode_number(value)?);
    }
    out.push('}');
    Ok(out)
}

fn encode_number(value: f32) -> Result<String> {
    let token = if value.is_nan() {
        "NaN".to_string()
    } else if value == f32::INFINITY {
        "Infinity".to_string()
    } else if value == f32::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        serde_json::to_string(&value)?
    };
    Ok(token)
}

#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    url: String,
    content_type: String,
}

impl Forwarder {
    pub fn new(config: &ForwardConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            client,
            url: config.url.clone(),
            content_type: config.content_type.clone(),
        })
    }

    /// PUT the payload; any non-2xx status is an error
    pub async fn put(&self, payload: String) -> Result<()> {
        self.client
            .put(&self.url)
            .header(CONTENT_TYPE, self.content_type.as_str())
            .body(payload)
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.url))?
            .error_for_status()
            .context("state store rejected update")?;
        Ok(())
    }

    /// forward one reading, reporting the outcome only through the log
    pub async fn deliver(&self, reading: &Reading) {
        let payload = match encode_payload(reading) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "[openHAB] Failed to encode reading");
                return;
            }
        };

        match self.put(payload.clone()).await {
            Ok(()) => tracing::info!(%payload, "[openHAB] Batch update successful"),
            Err(e) => tracing::error!(
                error = %format!("{:#}", e),
                %payload,
                "[openHAB] Failed to batch update"
            ),
        }
    }
}

/// drain the queue until every sender is dropped
pub async fn run_worker(forwarder: Forwarder, mut readings: ReadingReceiver) {
    while let Some(reading) = readings.recv().await {
        forwarder.deliver(&reading).await;
    }
    tracing::debug!("forward worker stopped");
}

// ==============================================================================
// test sink - stands in for the state store
// ==============================================================================
