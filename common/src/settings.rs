//! User-tunable wallet settings, persisted inside the wallet state.

use serde::{Deserialize, Serialize};

use crate::asset::Asset;

/// Auto-lock delay bounds in minutes. Zero disables auto-lock entirely;
/// non-zero values are clamped into this range when the timer is armed.
pub const MIN_AUTO_LOCK_MINUTES: u32 = 1;
pub const MAX_AUTO_LOCK_MINUTES: u32 = 240;

const DEFAULT_AUTO_LOCK_MINUTES: u32 = 15;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Dark,
    Light,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub auto_sweep: bool,
    pub notify_on_tip: bool,
    pub default_asset: Asset,
    pub auto_lock_minutes: u32,
    pub theme: Theme,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_sweep: false,
            notify_on_tip: true,
            default_asset: Asset::Btc,
            auto_lock_minutes: DEFAULT_AUTO_LOCK_MINUTES,
            theme: Theme::Dark,
        }
    }
}

impl Settings {
    /// The effective auto-lock delay: `None` when disabled, otherwise the
    /// configured value clamped to the allowed range.
    pub fn auto_lock_delay_minutes(&self) -> Option<u32> {
        if self.auto_lock_minutes == 0 {
            return None;
        }
        Some(
            self.auto_lock_minutes
                .clamp(MIN_AUTO_LOCK_MINUTES, MAX_AUTO_LOCK_MINUTES),
        )
    }
}
