//! HTTP uploads to the cloud services
//!
//! One shared `reqwest` client with a 30 second timeout serves all
//! uploads. The service-specific request shapes and success rules live in
//! the `thingspeak` and `phant` submodules; this module selects between
//! them by channel kind and owns the measurement-to-parameters conversion
//! for every channel.
//!
//! Senders never return errors: every failure mode, transport errors
//! included, is folded into an `UpdateResult { success: false }` so the
//! dispatcher worker can report it to the originating updater.

use crate::config::{Channel, ChannelKind};
use crate::data::{FieldMapping, Measurement, UpdateResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

mod phant;
mod thingspeak;

/// The interface the dispatcher drives. Implementations never fail
/// outright: every failure mode is folded into the returned result so
/// the originating updater always hears back.
#[async_trait]
pub trait MeasurementSender: Send + Sync {
    async fn send(&self, channel: &Channel, measurement: &Measurement) -> UpdateResult;
}

/// Response bodies that fail UTF-8 decoding are replaced by this
/// placeholder and the upload counts as failed.
const DECODE_ERROR_PLACEHOLDER: &str = "<Decode error>";

/// Timeout covering connect, write and read of one upload.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Uploads measurements to whichever cloud service a channel targets.
pub struct HttpSender {
    client: reqwest::Client,
    /// Field-name conversion per channel name, built from configuration.
    conversions: Arc<HashMap<String, FieldMapping>>,
}

impl HttpSender {
    pub fn new(conversions: HashMap<String, FieldMapping>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            client,
            conversions: Arc::new(conversions),
        })
    }
}

#[async_trait]
impl MeasurementSender for HttpSender {
    async fn send(&self, channel: &Channel, measurement: &Measurement) -> UpdateResult {
        let Some(mapping) = self.conversions.get(&channel.name) else {
            // Unreachable with a validated configuration.
            error!(channel = %channel.name, "no field mapping registered");
            return UpdateResult::failure("no field mapping registered for channel");
        };
        match channel.kind {
            ChannelKind::ThingSpeak => {
                thingspeak::send(&self.client, channel, measurement, mapping).await
            }
            ChannelKind::Phant => phant::send(&self.client, channel, measurement, mapping).await,
        }
    }
}

/// Decode response bytes as trimmed UTF-8, `None` on invalid data.
fn decode_body(bytes: &[u8]) -> Option<String> {
    std::str::from_utf8(bytes)
        .ok()
        .map(|body| body.trim().to_string())
}

/// Read and decode a response body; decode failures yield the placeholder
/// together with `false` so callers can fail the upload.
async fn read_body(response: reqwest::Response) -> (String, bool) {
    match response.bytes().await {
        Ok(bytes) => match decode_body(&bytes) {
            Some(body) => (body, true),
            None => (DECODE_ERROR_PLACEHOLDER.to_string(), false),
        },
        Err(e) => (format!("failed to read response: {e}"), false),
    }
}
