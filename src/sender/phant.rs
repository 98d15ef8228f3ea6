//! Phant (data.sparkfun.com) input requests
//!
//! `POST http://data.sparkfun.com/input/{channelId}` authenticated with
//! the `Phant-Private-Key` header; the form-encoded body carries only the
//! mapped fields. Any HTTP 200 is success.

use super::read_body;
use crate::config::Channel;
use crate::data::{FieldMapping, Measurement, UpdateResult};
use reqwest::StatusCode;
use std::collections::BTreeMap;
use tracing::debug;

const INPUT_URL_BASE: &str = "http://data.sparkfun.com/input";

const PRIVATE_KEY_HEADER: &str = "Phant-Private-Key";

pub(super) async fn send(
    client: &reqwest::Client,
    channel: &Channel,
    measurement: &Measurement,
    mapping: &FieldMapping,
) -> UpdateResult {
    let Some(channel_id) = &channel.channel_id else {
        // Configuration validation guarantees an id for phant channels.
        return UpdateResult::failure("phant channel has no id");
    };
    let params = request_params(measurement, mapping);
    debug!(channel = %channel.name, fields = params.len(), "posting phant update");

    let response = match build_request(client, channel, channel_id, &params).send().await {
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

/// The form body: only the mapped field values. Unlike ThingSpeak there
/// is no timestamp parameter and the key travels in a header.
fn request_params(measurement: &Measurement, mapping: &FieldMapping) -> BTreeMap<String, String> {
    mapping.convert(measurement)
}

fn input_url(channel_id: &str) -> String {
    format!("{INPUT_URL_BASE}/{channel_id}")
}

fn build_request(
    client: &reqwest::Client,
    channel: &Channel,
    channel_id: &str,
    params: &BTreeMap<String, String>,
) -> reqwest::RequestBuilder {
    client
        .post(input_url(channel_id))
        .header(PRIVATE_KEY_HEADER, &channel.api_key)
        .form(params)
}

/// Phant success rule: any HTTP 200, regardless of the body.
fn evaluate(status: StatusCode, body: &str) -> UpdateResult {
    if status == StatusCode::OK {
        UpdateResult::success(body)
    } else {
        UpdateResult::failure(format!("response status error: {status} - {body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelKind;
    use crate::data::DataIdentifier;
    use std::collections::HashMap;

    fn channel() -> Channel {
        Channel {
            name: "power".to_string(),
            kind: ChannelKind::Phant,
            api_key: "PRIVATEKEY".to_string(),
            channel_id: Some("ab12cd34".to_string()),
            waiting: None,
        }
    }

    fn measurement_and_mapping() -> (Measurement, FieldMapping) {
        let id = DataIdentifier::new("remote", "building/basement/power");
        let mapping = FieldMapping::new(HashMap::from([(id.clone(), "watts".to_string())]));
        let measurement = Measurement::current(HashMap::from([(id, "450".to_string())]));
        (measurement, mapping)
    }

    #[test]
    fn input_url_targets_the_channel() {
        assert_eq!(
            input_url("ab12cd34"),
            "http://data.sparkfun.com/input/ab12cd34"
        );
    }

    #[test]
    fn body_carries_only_the_mapped_fields() {
        let (measurement, mapping) = measurement_and_mapping();
        let params = request_params(&measurement, &mapping);
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("watts").map(String::as_str), Some("450"));
        assert!(!params.contains_key("created_at"));
        assert!(!params.contains_key("api_key"));
    }

    #[test]
    fn request_shape_matches_the_phant_contract() {
        let (measurement, mapping) = measurement_and_mapping();
        let params = request_params(&measurement, &mapping);
        let channel = channel();

        let request = build_request(&reqwest::Client::new(), &channel, "ab12cd34", &params)
            .build()
            .unwrap();

        assert_eq!(
            request.url().as_str(),
            "http://data.sparkfun.com/input/ab12cd34"
        );
        assert_eq!(
            request
                .headers()
                .get(PRIVATE_KEY_HEADER)
                .and_then(|v| v.to_str().ok()),
            Some("PRIVATEKEY")
        );
        assert_eq!(
            request
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/x-www-form-urlencoded")
        );
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, b"watts=450".as_slice());
    }

    #[test]
    fn any_200_is_success_regardless_of_body() {
        assert!(evaluate(StatusCode::OK, "1 success").success);
        assert!(evaluate(StatusCode::OK, "").success);
        assert!(evaluate(StatusCode::OK, "0").success);
    }

    #[test]
    fn non_200_status_is_failure() {
        assert!(!evaluate(StatusCode::BAD_REQUEST, "0 private key error").success);
        assert!(!evaluate(StatusCode::INTERNAL_SERVER_ERROR, "").success);
    }
}
