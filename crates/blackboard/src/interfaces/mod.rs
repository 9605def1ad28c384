// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interface schemas shipped with the crate.

mod joystick;
mod switch;

pub use joystick::{JoystickData, JoystickInterface, MAX_AXES};
pub use switch::{SwitchData, SwitchInterface, SwitchMessage};
