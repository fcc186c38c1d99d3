//! Device data as reported by the remote service
//!
//! A device's full state is stitched together from three endpoints: params
//! (power, LED, refill), status (connectivity) and config (model, firmware).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{DEVICE_TYPE_LIV_HUB, HUB_MODEL_NAME, HUB_MODEL_TYPE};
use crate::errors::Result;

/// Static device information from the config endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub node_id: String,
    /// User-facing name ("Pool", "Patio"); falls back to the node id
    pub name: String,
    pub model: String,
    pub firmware_version: String,
    pub serial_number: String,
}

impl DeviceInfo {
    /// Build from the config payload, preferring the user-facing name stored
    /// in the params payload when one is available
    pub fn from_config(node_id: &str, config: &Value, params: Option<&Value>) -> Self {
        let info = config.get("info");
        let text = |key: &str| info.and_then(|info| info.get(key)).and_then(Value::as_str);

        let model = match text("type") {
            Some(HUB_MODEL_TYPE) => HUB_MODEL_NAME.to_string(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let hub_name = params
            .and_then(|params| params.get(DEVICE_TYPE_LIV_HUB))
            .and_then(|hub| hub.get("Name"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty());
        let name = hub_name
            .or_else(|| text("name").filter(|name| !name.is_empty()))
            .unwrap_or(node_id)
            .to_string();

        let serial_number = config
            .get("devices")
            .and_then(Value::as_array)
            .and_then(|devices| devices.first())
            .and_then(|device| device.get("serial_num"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        Self {
            node_id: node_id.to_string(),
            name,
            model,
            firmware_version: text("fw_version").unwrap_or("unknown").to_string(),
            serial_number,
        }
    }
}

/// Connectivity as reported by the status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub node_id: String,
    pub connected: bool,
}

impl DeviceStatus {
    pub fn from_response(node_id: &str, status: &Value) -> Self {
        let connected = status
            .get("connectivity")
            .and_then(|connectivity| connectivity.get("connected"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Self { node_id: node_id.to_string(), connected }
    }
}

/// Last-known hub parameters
///
/// Every field is optional because hubs do not always report every value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceParams {
    /// Repeller power, read from "Enable Repellers" (the "Power" field is a
    /// read-only indicator)
    #[serde(rename = "Enable Repellers", default)]
    pub power: Option<bool>,
    #[serde(rename = "LED Brightness", default)]
    pub led_brightness: Option<u8>,
    #[serde(rename = "LED Hue", default)]
    pub led_hue: Option<u16>,
    #[serde(rename = "LED Saturation", default)]
    pub led_saturation: Option<u8>,
    /// Remaining cartridge life in percent
    #[serde(rename = "Refill Life", default)]
    pub refill_life: Option<f64>,
    /// Minutes in the current session
    #[serde(rename = "System Runtime", default)]
    pub system_runtime: Option<u32>,
    /// 1 = off, 2 = warming, 3 = protected
    #[serde(rename = "System Status", default)]
    pub system_status: Option<u8>,
    #[serde(rename = "Error", default)]
    pub error: Option<u32>,
}

impl DeviceParams {
    /// Parse the `{"LIV Hub": {...}}` params payload
    pub fn from_response(params: &Value) -> Result<Self> {
        match params.get(DEVICE_TYPE_LIV_HUB) {
            Some(hub) => Ok(serde_json::from_value(hub.clone())?),
            None => Ok(Self::default()),
        }
    }

    /// The LED only counts as lit when the hub is powered and brightness > 0
    pub fn led_on(&self) -> Option<bool> {
        self.power.map(|power| power && self.led_brightness.unwrap_or(0) > 0)
    }
}

/// Complete cached state of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub info: DeviceInfo,
    pub status: DeviceStatus,
    pub params: DeviceParams,
    /// Wall-clock time of the last authoritative refresh
    pub refreshed_at: DateTime<Utc>,
}

impl DeviceState {
    /// Combine the three endpoint payloads into one state
    pub fn from_responses(
        node_id: &str,
        params: &Value,
        status: &Value,
        config: &Value,
        refreshed_at: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            info: DeviceInfo::from_config(node_id, config, Some(params)),
            status: DeviceStatus::from_response(node_id, status),
            params: DeviceParams::from_response(params)?,
            refreshed_at,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.info.node_id
    }

    pub fn is_online(&self) -> bool {
        self.status.connected
    }

    pub fn is_powered_on(&self) -> bool {
        self.params.power.unwrap_or(false)
    }

    pub fn has_error(&self) -> bool {
        self.params.error.unwrap_or(0) > 0
    }

    /// Same device, same reported values, ignoring when it was fetched
    pub fn same_values(&self, other: &Self) -> bool {
        self.info == other.info && self.status == other.status && self.params == other.params
    }
}
