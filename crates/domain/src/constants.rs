//! Client constants
//!
//! Centralized location for the endpoint paths, parameter names and default
//! tunables used throughout the client.

// Remote service
pub const DEFAULT_BASE_URL: &str = "https://api.iot.thermacell.com";
pub const API_VERSION_PREFIX: &str = "/v1";
pub const LOGIN_PATH: &str = "/v1/login2";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 30.0;

// Device endpoints (relative to the version prefix)
pub const NODES_PATH: &str = "/user/nodes";
pub const NODE_PARAMS_PATH: &str = "/user/nodes/params";
pub const NODE_STATUS_PATH: &str = "/user/nodes/status";
pub const NODE_CONFIG_PATH: &str = "/user/nodes/config";
pub const NODE_GROUP_PATH: &str = "/user/node_group";

// Token lifecycle
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 14_400;
pub const AUTH_FAILURE_STATUSES: [u16; 2] = [401, 403];
pub const ID_TOKEN_SUBJECT_CLAIM: &str = "custom:user_id";
pub const ID_TOKEN_FALLBACK_CLAIM: &str = "sub";

// Hub parameter map
pub const DEVICE_TYPE_LIV_HUB: &str = "LIV Hub";
pub const PARAM_ENABLE_REPELLERS: &str = "Enable Repellers";
pub const PARAM_LED_BRIGHTNESS: &str = "LED Brightness";
pub const PARAM_LED_HUE: &str = "LED Hue";
pub const PARAM_REFILL_RESET: &str = "Refill Reset";
pub const HUB_MODEL_TYPE: &str = "thermacell-hub";
pub const HUB_MODEL_NAME: &str = "Thermacell LIV Hub";

// Parameter ranges
pub const LED_BRIGHTNESS_MAX: u8 = 100;
pub const LED_HUE_MAX: u16 = 360;

// Command queue
pub const DEFAULT_MIN_DISPATCH_INTERVAL_SECS: f64 = 0.5;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 64;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: f64 = 30.0;

// Synchronization
pub const DEFAULT_AUTO_REFRESH_INTERVAL_SECS: f64 = 60.0;
