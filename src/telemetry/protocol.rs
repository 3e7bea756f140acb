// ThingsBoard telemetry WebSocket messages

use super::TelemetryError;
use serde::{Deserialize, Serialize};

/// Platform entity whose `weight` time series is followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

const AUTH_CMD_ID: u32 = 0;
const TIMESERIES_CMD_ID: u32 = 10;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest<'a> {
    auth_cmd: AuthCmd<'a>,
    cmds: [TimeseriesCmd<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthCmd<'a> {
    cmd_id: u32,
    token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TimeseriesCmd<'a> {
    entity_type: &'a str,
    entity_id: &'a str,
    scope: &'static str,
    cmd_id: u32,
    #[serde(rename = "type")]
    kind: &'static str,
}

/// The single message sent right after the socket opens.
pub fn subscribe_message(token: &str, entity: &EntityRef) -> Result<String, TelemetryError> {
    let request = SubscribeRequest {
        auth_cmd: AuthCmd {
            cmd_id: AUTH_CMD_ID,
            token,
        },
        cmds: [TimeseriesCmd {
            entity_type: &entity.entity_type,
            entity_id: &entity.entity_id,
            scope: "LATEST_TELEMETRY",
            cmd_id: TIMESERIES_CMD_ID,
            kind: "TIMESERIES",
        }],
    };
    serde_json::to_string(&request).map_err(|e| TelemetryError::MalformedPayload(e.to_string()))
}

/// A `weight` point pushed by the platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteReading {
    pub ts_millis: i64,
    pub weight: f64,
}

#[derive(Deserialize)]
struct InboundMessage {
    #[serde(default)]
    data: Option<InboundData>,
}

#[derive(Deserialize)]
struct InboundData {
    #[serde(default)]
    weight: Option<Vec<(i64, TelemetryValue)>>,
}

/// The platform sends values as strings; some gateways send plain numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum TelemetryValue {
    Number(f64),
    Text(String),
}

impl TelemetryValue {
    pub(super) fn to_f64(&self) -> Option<f64> {
        let value = match self {
            TelemetryValue::Number(n) => *n,
            TelemetryValue::Text(s) => s.trim().parse().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

/// Extracts `data.weight[0][1]`.
///
/// `Ok(None)` for messages that carry no `weight` series (acks, other keys).
/// A `weight` entry that is present but unusable is `MalformedPayload`.
pub fn parse_weight_message(text: &str) -> Result<Option<RemoteReading>, TelemetryError> {
    let message: InboundMessage = serde_json::from_str(text)
        .map_err(|e| TelemetryError::MalformedPayload(e.to_string()))?;
    let Some(series) = message.data.and_then(|d| d.weight) else {
        return Ok(None);
    };
    let Some((ts_millis, value)) = series.first() else {
        return Err(TelemetryError::MalformedPayload(
            "empty weight series".into(),
        ));
    };
    let weight = value.to_f64().ok_or_else(|| {
        TelemetryError::MalformedPayload("weight value is not a finite number".into())
    })?;
    Ok(Some(RemoteReading {
        ts_millis: *ts_millis,
        weight,
    }))
}

/// Response of `GET /api/plugins/telemetry/{type}/{id}/values/timeseries?keys=weight`.
#[derive(Debug, Deserialize)]
pub(super) struct LatestTimeseries {
    #[serde(default)]
    pub weight: Vec<LatestPoint>,
}

#[derive(Debug, Deserialize)]
pub(super) struct LatestPoint {
    pub value: TelemetryValue,
}
