// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Joystick state: axes and pressed buttons. Accepts no messages.

use crate::interface::{FieldInfo, FieldType, FieldValue, NoMessage, Schema};

/// Number of axis slots in the record.
pub const MAX_AXES: usize = 8;

/// Joystick record.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JoystickData {
    /// Axes provided by the device
    pub num_axes: u8,
    /// Buttons provided by the device
    pub num_buttons: u8,
    /// Bit n-1 set while button n is pressed
    pub pressed_buttons: u32,
    /// Axis values, normalized to [-1, 1]
    pub axis: [f32; MAX_AXES],
}

impl JoystickData {
    /// Bit mask of button `n` (1-based, up to 32).
    pub const fn button(n: u8) -> u32 {
        if n == 0 || n > 32 {
            0
        } else {
            1u32 << (n - 1)
        }
    }

    pub fn is_pressed(&self, n: u8) -> bool {
        let mask = Self::button(n);
        mask != 0 && self.pressed_buttons & mask != 0
    }

    pub fn set_pressed(&mut self, n: u8, pressed: bool) {
        let mask = Self::button(n);
        if pressed {
            self.pressed_buttons |= mask;
        } else {
            self.pressed_buttons &= !mask;
        }
    }
}

/// Joystick interface type.
#[derive(Debug)]
pub struct JoystickInterface;

const FIELDS: &[FieldInfo] = &[
    FieldInfo::scalar("num_axes", FieldType::Byte),
    FieldInfo::scalar("num_buttons", FieldType::Byte),
    FieldInfo::scalar("pressed_buttons", FieldType::UInt32),
    FieldInfo::new("axis", FieldType::Float, MAX_AXES),
];

impl Schema for JoystickInterface {
    const TYPE_NAME: &'static str = "JoystickInterface";
    type Data = JoystickData;
    type Message = NoMessage;

    fn fields() -> &'static [FieldInfo] {
        FIELDS
    }

    fn values(data: &JoystickData) -> Vec<FieldValue> {
        vec![
            FieldValue::UInt(u64::from(data.num_axes)),
            FieldValue::UInt(u64::from(data.num_buttons)),
            FieldValue::UInt(u64::from(data.pressed_buttons)),
            FieldValue::Array(data.axis.iter().map(|&a| FieldValue::Float(a)).collect()),
        ]
    }
}
