//! Control commands and their wire payloads
//!
//! Each command maps to one [`CommandKind`], the coalescing slot the queue
//! uses. Within a device, a newer command of a coalescable kind replaces an
//! older one that has not been dispatched yet.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants::{
    DEVICE_TYPE_LIV_HUB, LED_BRIGHTNESS_MAX, LED_HUE_MAX, PARAM_ENABLE_REPELLERS,
    PARAM_LED_BRIGHTNESS, PARAM_LED_HUE, PARAM_REFILL_RESET,
};
use crate::errors::{LivError, Result};
use crate::impl_label_conversions;
use crate::types::device::DeviceParams;

/// Coalescing slot of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Power,
    LedPower,
    LedBrightness,
    LedColor,
    RefillReset,
}

impl_label_conversions!(CommandKind {
    Power => "power",
    LedPower => "led_power",
    LedBrightness => "led_brightness",
    LedColor => "led_color",
    RefillReset => "refill_reset",
});

impl CommandKind {
    /// Whether a newer command of this kind supersedes a waiting one
    ///
    /// Refill resets are discrete events, so two of them both run.
    pub fn is_coalescable(self) -> bool {
        !matches!(self, Self::RefillReset)
    }
}

/// Installed refill cartridge, sent with a refill reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefillCartridge {
    /// 40 hour, yellow cap
    FortyHour,
    /// 100 hour, blue cap
    #[default]
    HundredHour,
    /// 180 hour, gray cap
    HundredEightyHour,
}

impl RefillCartridge {
    pub fn code(self) -> u8 {
        match self {
            Self::FortyHour => 0,
            Self::HundredHour => 1,
            Self::HundredEightyHour => 2,
        }
    }
}

impl TryFrom<i64> for RefillCartridge {
    type Error = LivError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::FortyHour),
            1 => Ok(Self::HundredHour),
            2 => Ok(Self::HundredEightyHour),
            other => Err(LivError::validation(
                "refill_type",
                format!("must be 0 (40hr), 1 (100hr) or 2 (180hr), got {other}"),
            )),
        }
    }
}

/// A control intent for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DeviceCommand {
    SetPower { on: bool },
    /// LED power is brightness 100 or 0; there is no separate switch
    SetLedPower { on: bool },
    SetLedBrightness { brightness: u8 },
    /// Saturation is deliberately absent: hubs reject it
    SetLedColor { hue: u16, brightness: u8 },
    ResetRefill { cartridge: RefillCartridge },
}

impl DeviceCommand {
    pub fn power(on: bool) -> Self {
        Self::SetPower { on }
    }

    pub fn led_power(on: bool) -> Self {
        Self::SetLedPower { on }
    }

    /// Checked brightness command (0-100)
    pub fn led_brightness(brightness: i64) -> Result<Self> {
        Ok(Self::SetLedBrightness { brightness: checked_brightness(brightness)? })
    }

    /// Checked colour command (hue 0-360, brightness 0-100)
    pub fn led_color(hue: i64, brightness: i64) -> Result<Self> {
        let hue = u16::try_from(hue)
            .ok()
            .filter(|hue| *hue <= LED_HUE_MAX)
            .ok_or_else(|| {
                LivError::validation("hue", format!("must be 0-{LED_HUE_MAX}, got {hue}"))
            })?;
        Ok(Self::SetLedColor { hue, brightness: checked_brightness(brightness)? })
    }

    /// Checked refill reset (cartridge code 0, 1 or 2)
    pub fn reset_refill(code: i64) -> Result<Self> {
        Ok(Self::ResetRefill { cartridge: RefillCartridge::try_from(code)? })
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::SetPower { .. } => CommandKind::Power,
            Self::SetLedPower { .. } => CommandKind::LedPower,
            Self::SetLedBrightness { .. } => CommandKind::LedBrightness,
            Self::SetLedColor { .. } => CommandKind::LedColor,
            Self::ResetRefill { .. } => CommandKind::RefillReset,
        }
    }

    /// Re-check ranges for commands built without the checked constructors
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::SetLedBrightness { brightness } => {
                checked_brightness(i64::from(brightness)).map(drop)
            }
            Self::SetLedColor { hue, brightness } => {
                Self::led_color(i64::from(hue), i64::from(brightness)).map(drop)
            }
            _ => Ok(()),
        }
    }

    /// The params body sent to the device
    pub fn to_payload(&self) -> Value {
        let hub = match *self {
            Self::SetPower { on } => json!({ PARAM_ENABLE_REPELLERS: on }),
            Self::SetLedPower { on } => {
                let brightness = if on { LED_BRIGHTNESS_MAX } else { 0 };
                json!({ PARAM_LED_BRIGHTNESS: brightness })
            }
            Self::SetLedBrightness { brightness } => json!({ PARAM_LED_BRIGHTNESS: brightness }),
            Self::SetLedColor { hue, brightness } => {
                json!({ PARAM_LED_HUE: hue, PARAM_LED_BRIGHTNESS: brightness })
            }
            Self::ResetRefill { cartridge } => json!({ PARAM_REFILL_RESET: cartridge.code() }),
        };
        json!({ DEVICE_TYPE_LIV_HUB: hub })
    }

    /// Optimistic local effect of the command on cached params
    pub fn apply_to(&self, params: &mut DeviceParams) {
        match *self {
            Self::SetPower { on } => params.power = Some(on),
            Self::SetLedPower { on } => {
                params.led_brightness = Some(if on { LED_BRIGHTNESS_MAX } else { 0 });
            }
            Self::SetLedBrightness { brightness } => params.led_brightness = Some(brightness),
            Self::SetLedColor { hue, brightness } => {
                params.led_hue = Some(hue);
                params.led_brightness = Some(brightness);
            }
            Self::ResetRefill { .. } => params.refill_life = Some(100.0),
        }
    }
}

fn checked_brightness(value: i64) -> Result<u8> {
    u8::try_from(value).ok().filter(|value| *value <= LED_BRIGHTNESS_MAX).ok_or_else(|| {
        LivError::validation("brightness", format!("must be 0-{LED_BRIGHTNESS_MAX}, got {value}"))
    })
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    /// Validates range checks on the checked constructors.
    ///
    /// Assertions:
    /// - Confirms boundary values are accepted.
    /// - Confirms out-of-range values produce `LivError::Validation`.
    #[test]
    fn test_checked_constructors() {
        assert!(DeviceCommand::led_brightness(0).is_ok());
        assert!(DeviceCommand::led_brightness(100).is_ok());
        assert!(matches!(DeviceCommand::led_brightness(101), Err(LivError::Validation { .. })));
        assert!(matches!(DeviceCommand::led_brightness(-1), Err(LivError::Validation { .. })));

        assert!(DeviceCommand::led_color(360, 50).is_ok());
        let err = DeviceCommand::led_color(361, 50).unwrap_err();
        assert!(matches!(err, LivError::Validation { ref field, .. } if field == "hue"));
        assert!(DeviceCommand::led_color(10, 200).is_err());

        assert!(DeviceCommand::reset_refill(2).is_ok());
        assert!(DeviceCommand::reset_refill(3).is_err());
    }

    #[test]
    fn test_validate_rejects_unchecked_values() {
        assert!(DeviceCommand::SetLedBrightness { brightness: 150 }.validate().is_err());
        assert!(DeviceCommand::SetLedColor { hue: 400, brightness: 10 }.validate().is_err());
        assert!(DeviceCommand::power(true).validate().is_ok());
    }

    /// Validates wire payloads.
    #[test]
    fn test_payloads() {
        assert_eq!(
            DeviceCommand::power(false).to_payload(),
            serde_json::json!({"LIV Hub": {"Enable Repellers": false}})
        );
        assert_eq!(
            DeviceCommand::led_power(true).to_payload(),
            serde_json::json!({"LIV Hub": {"LED Brightness": 100}})
        );
        assert_eq!(
            DeviceCommand::led_color(240, 30).unwrap().to_payload(),
            serde_json::json!({"LIV Hub": {"LED Hue": 240, "LED Brightness": 30}})
        );
        assert_eq!(
            DeviceCommand::reset_refill(0).unwrap().to_payload(),
            serde_json::json!({"LIV Hub": {"Refill Reset": 0}})
        );
    }

    #[test]
    fn test_optimistic_effects() {
        let mut params = DeviceParams { power: Some(false), ..Default::default() };
        DeviceCommand::power(true).apply_to(&mut params);
        DeviceCommand::led_color(90, 40).unwrap().apply_to(&mut params);
        assert_eq!(params.power, Some(true));
        assert_eq!(params.led_hue, Some(90));
        assert_eq!(params.led_on(), Some(true));

        DeviceCommand::led_power(false).apply_to(&mut params);
        assert_eq!(params.led_brightness, Some(0));

        DeviceCommand::reset_refill(1).unwrap().apply_to(&mut params);
        assert_eq!(params.refill_life, Some(100.0));
    }

    #[test]
    fn test_kinds_and_coalescing() {
        assert_eq!(DeviceCommand::power(true).kind(), CommandKind::Power);
        assert!(CommandKind::LedColor.is_coalescable());
        assert!(!CommandKind::RefillReset.is_coalescable());
        assert_eq!(CommandKind::LedBrightness.to_string(), "led_brightness");
        assert_eq!(CommandKind::from_str("REFILL_RESET").unwrap(), CommandKind::RefillReset);
        assert!(CommandKind::from_str("toggle").is_err());
    }
}
