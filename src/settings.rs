//! Runtime settings.
//!
//! Values come from the platform's persistent key-value store through
//! [`SettingsStore`]. Missing keys fall back to the defaults in
//! [`crate::config`]; out-of-range values are rejected and the default
//! kept.
//!
//! Recognised keys:
//!   - `power.sleepTimeout`: inactivity timeout in seconds (> 0)
//!   - `power.enableSleep`: allow suspending the BLE stack
//!   - `mouse.sensitivity`: X/Y scale in percent (1..=1000)

use embassy_time::Duration;

use crate::config::{
    DEFAULT_MOUSE_SENSITIVITY, DEFAULT_SLEEP_ENABLED, DEFAULT_SLEEP_TIMEOUT_SECS,
    MOUSE_SENSITIVITY_MAX, MOUSE_SENSITIVITY_MIN,
};
use crate::error::Error;

pub const KEY_SLEEP_TIMEOUT: &str = "power.sleepTimeout";
pub const KEY_ENABLE_SLEEP: &str = "power.enableSleep";
pub const KEY_MOUSE_SENSITIVITY: &str = "mouse.sensitivity";

/// Read access to persistent settings.
pub trait SettingsStore {
    fn get_int(&self, key: &str) -> Option<i64>;
    fn get_bool(&self, key: &str) -> Option<bool>;
}

/// A single settings value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SettingValue {
    Int(i64),
    Bool(bool),
}

/// Settings the bridge acts on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BridgeSettings {
    pub sleep_timeout_secs: u32,
    pub sleep_enabled: bool,
    /// Percent, 100 = unscaled.
    pub mouse_sensitivity: u16,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            sleep_timeout_secs: DEFAULT_SLEEP_TIMEOUT_SECS,
            sleep_enabled: DEFAULT_SLEEP_ENABLED,
            mouse_sensitivity: DEFAULT_MOUSE_SENSITIVITY,
        }
    }
}

impl BridgeSettings {
    /// Load every recognised key from `store`.
    pub fn load<S: SettingsStore>(store: &S) -> Self {
        let mut settings = Self::default();

        let lookups = [
            (KEY_SLEEP_TIMEOUT, store.get_int(KEY_SLEEP_TIMEOUT).map(SettingValue::Int)),
            (KEY_ENABLE_SLEEP, store.get_bool(KEY_ENABLE_SLEEP).map(SettingValue::Bool)),
            (
                KEY_MOUSE_SENSITIVITY,
                store.get_int(KEY_MOUSE_SENSITIVITY).map(SettingValue::Int),
            ),
        ];

        for (key, value) in lookups {
            match value {
                Some(value) => {
                    if let Err(e) = settings.apply(key, value) {
                        warn!("Settings: {} rejected ({:?}), using default", key, e);
                    }
                }
                None => warn!("Settings: {} not set, using default", key),
            }
        }

        info!(
            "Settings: sleep={} timeout={}s sensitivity={}%",
            settings.sleep_enabled, settings.sleep_timeout_secs, settings.mouse_sensitivity
        );
        settings
    }

    /// Update one key. The previous value is kept on error.
    pub fn apply(&mut self, key: &str, value: SettingValue) -> Result<(), Error> {
        match (key, value) {
            (KEY_SLEEP_TIMEOUT, SettingValue::Int(secs)) => {
                self.sleep_timeout_secs = u32::try_from(secs)
                    .ok()
                    .filter(|&s| s > 0)
                    .ok_or(Error::InvalidSetting)?;
            }
            (KEY_ENABLE_SLEEP, SettingValue::Bool(enabled)) => self.sleep_enabled = enabled,
            (KEY_MOUSE_SENSITIVITY, SettingValue::Int(percent)) => {
                self.mouse_sensitivity = u16::try_from(percent)
                    .ok()
                    .filter(|p| (MOUSE_SENSITIVITY_MIN..=MOUSE_SENSITIVITY_MAX).contains(p))
                    .ok_or(Error::InvalidSetting)?;
            }
            (KEY_SLEEP_TIMEOUT | KEY_ENABLE_SLEEP | KEY_MOUSE_SENSITIVITY, _) => {
                return Err(Error::InvalidSetting)
            }
            _ => return Err(Error::UnknownSetting),
        }
        Ok(())
    }

    pub fn sleep_timeout(&self) -> Duration {
        Duration::from_secs(self.sleep_timeout_secs as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Store {
        ints: std::vec::Vec<(&'static str, i64)>,
        bools: std::vec::Vec<(&'static str, bool)>,
    }

    impl SettingsStore for Store {
        fn get_int(&self, key: &str) -> Option<i64> {
            self.ints.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
        }
        fn get_bool(&self, key: &str) -> Option<bool> {
            self.bools.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
        }
    }

    #[test]
    fn empty_store_gives_defaults() {
        let settings = BridgeSettings::load(&Store::default());
        assert_eq!(settings, BridgeSettings::default());
        assert_eq!(settings.sleep_timeout(), Duration::from_secs(30));
        assert!(settings.sleep_enabled);
    }

    #[test]
    fn load_reads_every_key() {
        let store = Store {
            ints: vec![(KEY_SLEEP_TIMEOUT, 120), (KEY_MOUSE_SENSITIVITY, 250)],
            bools: vec![(KEY_ENABLE_SLEEP, false)],
        };
        let settings = BridgeSettings::load(&store);
        assert_eq!(settings.sleep_timeout_secs, 120);
        assert!(!settings.sleep_enabled);
        assert_eq!(settings.mouse_sensitivity, 250);
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let store = Store {
            ints: vec![(KEY_SLEEP_TIMEOUT, 0), (KEY_MOUSE_SENSITIVITY, 5000)],
            bools: vec![],
        };
        let settings = BridgeSettings::load(&store);
        assert_eq!(settings, BridgeSettings::default());
    }

    #[test]
    fn apply_checks_key_and_type() {
        let mut settings = BridgeSettings::default();
        assert_eq!(settings.apply(KEY_SLEEP_TIMEOUT, SettingValue::Int(5)), Ok(()));
        assert_eq!(settings.sleep_timeout_secs, 5);
        assert_eq!(
            settings.apply(KEY_SLEEP_TIMEOUT, SettingValue::Int(-1)),
            Err(Error::InvalidSetting)
        );
        assert_eq!(
            settings.apply(KEY_ENABLE_SLEEP, SettingValue::Int(1)),
            Err(Error::InvalidSetting)
        );
        assert_eq!(
            settings.apply("wifi.ssid", SettingValue::Bool(true)),
            Err(Error::UnknownSetting)
        );
        assert_eq!(settings.sleep_timeout_secs, 5);
    }
}
