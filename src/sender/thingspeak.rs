//! ThingSpeak update requests
//!
//! `POST https://api.thingspeak.com/update` with a form-encoded body of
//! the mapped fields plus `created_at` and `api_key`. ThingSpeak answers
//! with the channel's entry counter; `"0"` means the update was rejected
//! (usually rate limiting), so an HTTP 200 alone is not success.

use super::read_body;
use crate::config::Channel;
use crate::data::{FieldMapping, Measurement, UpdateResult};
use reqwest::StatusCode;
use std::collections::BTreeMap;
use tracing::debug;

const UPDATE_URL: &str = "https://api.thingspeak.com/update";

/// The `created_at` timestamp format: date and time separated by a
/// space, with fractional seconds.
const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub(super) async fn send(
    client: &reqwest::Client,
    channel: &Channel,
    measurement: &Measurement,
    mapping: &FieldMapping,
) -> UpdateResult {
    let params = request_params(channel, measurement, mapping);
    debug!(channel = %channel.name, fields = params.len(), "posting ThingSpeak update");

    let response = match client.post(UPDATE_URL).form(&params).send().await {
        Ok(response) => response,
        Err(e) => return UpdateResult::failure(format!("transport error: {e}")),
    };
    let status = response.status();
    let (body, decoded) = read_body(response).await;
    if !decoded {
        return UpdateResult::failure(body);
    }
    evaluate(status, &body)
}

/// Form parameters for one update: the mapped field values, the
/// measurement timestamp and the channel's write key.
fn request_params(
    channel: &Channel,
    measurement: &Measurement,
    mapping: &FieldMapping,
) -> BTreeMap<String, String> {
    let mut params = mapping.convert(measurement);
    params.insert(
        "created_at".to_string(),
        measurement.time.format(CREATED_AT_FORMAT).to_string(),
    );
    params.insert("api_key".to_string(), channel.api_key.clone());
    params
}

/// ThingSpeak success rule: HTTP 200 and a response body that parses to
/// an integer greater than zero.
fn evaluate(status: StatusCode, body: &str) -> UpdateResult {
    if status != StatusCode::OK {
        return UpdateResult::failure(format!("response status error: {status} - {body}"));
    }
    match body.parse::<i64>() {
        Ok(entry) if entry > 0 => UpdateResult::success(format!("entry {entry}")),
        Ok(_) => UpdateResult::failure("ThingSpeak responded with return code 0"),
        Err(_) => UpdateResult::failure(format!("unexpected response body: {body}")),
    }
}
