// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! On/off switch with an analog value and activation statistics.

use crate::error::{Error, Result};
use crate::interface::{FieldInfo, FieldType, FieldValue, InterfaceMessage, Schema};

/// Switch record.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SwitchData {
    pub enabled: bool,
    /// Analog value in [0, 1]
    pub value: f32,
    /// Seconds the switch has been in its current state (negative while off)
    pub history: f32,
    pub short_activations: u32,
    pub long_activations: u32,
    pub activation_count: u32,
}

/// Commands accepted by a switch.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchMessage {
    Set { enabled: bool, value: f32 },
    EnableSwitch,
    DisableSwitch,
    /// Enable for `duration` seconds at `value`.
    EnableDuration { duration: f32, value: f32 },
}

impl InterfaceMessage for SwitchMessage {
    fn type_name(&self) -> &'static str {
        match self {
            SwitchMessage::Set { .. } => "SetMessage",
            SwitchMessage::EnableSwitch => "EnableSwitchMessage",
            SwitchMessage::DisableSwitch => "DisableSwitchMessage",
            SwitchMessage::EnableDuration { .. } => "EnableDurationMessage",
        }
    }
}

/// Switch interface type.
#[derive(Debug)]
pub struct SwitchInterface;

const FIELDS: &[FieldInfo] = &[
    FieldInfo::scalar("enabled", FieldType::Bool),
    FieldInfo::scalar("value", FieldType::Float),
    FieldInfo::scalar("history", FieldType::Float),
    FieldInfo::scalar("short_activations", FieldType::UInt32),
    FieldInfo::scalar("long_activations", FieldType::UInt32),
    FieldInfo::scalar("activation_count", FieldType::UInt32),
];

const MESSAGE_TYPES: &[&str] = &[
    "SetMessage",
    "EnableSwitchMessage",
    "DisableSwitchMessage",
    "EnableDurationMessage",
];

impl Schema for SwitchInterface {
    const TYPE_NAME: &'static str = "SwitchInterface";
    type Data = SwitchData;
    type Message = SwitchMessage;

    fn fields() -> &'static [FieldInfo] {
        FIELDS
    }

    fn values(data: &SwitchData) -> Vec<FieldValue> {
        vec![
            FieldValue::Bool(data.enabled),
            FieldValue::Float(data.value),
            FieldValue::Float(data.history),
            FieldValue::UInt(u64::from(data.short_activations)),
            FieldValue::UInt(u64::from(data.long_activations)),
            FieldValue::UInt(u64::from(data.activation_count)),
        ]
    }

    fn message_types() -> &'static [&'static str] {
        MESSAGE_TYPES
    }

    fn create_message(type_name: &str) -> Result<SwitchMessage> {
        match type_name {
            "SetMessage" => Ok(SwitchMessage::Set {
                enabled: false,
                value: 0.0,
            }),
            "EnableSwitchMessage" => Ok(SwitchMessage::EnableSwitch),
            "DisableSwitchMessage" => Ok(SwitchMessage::DisableSwitch),
            "EnableDurationMessage" => Ok(SwitchMessage::EnableDuration {
                duration: 0.0,
                value: 0.0,
            }),
            other => Err(Error::UnknownType(other.to_string())),
        }
    }
}

impl SwitchData {
    /// Apply a command the way a switch driver would.
    pub fn apply(&mut self, msg: &SwitchMessage) {
        match *msg {
            SwitchMessage::Set { enabled, value } => {
                self.set_enabled(enabled);
                self.value = value;
            }
            SwitchMessage::EnableSwitch => self.set_enabled(true),
            SwitchMessage::DisableSwitch => self.set_enabled(false),
            SwitchMessage::EnableDuration { value, .. } => {
                self.set_enabled(true);
                self.value = value;
            }
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.activation_count = self.activation_count.wrapping_add(1);
        }
        self.enabled = enabled;
    }
}
