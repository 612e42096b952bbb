//! Output lifecycle - suspends the BLE stack when input goes quiet.
//!
//! Two states:
//! - `Active`: BLE stack initialised, reports are forwarded
//! - `Suspended`: BLE stack fully deinitialised to save power
//!
//! An inactivity deadline is armed on device connect and rearmed by
//! every delivered report. When it passes, the stack is torn down if a
//! USB device and a BLE peer are both connected, no priority session is
//! running and sleep is enabled. The next report brings the stack back
//! up before it is translated.
//!
//! [`PowerManager`] holds the state and is driven under the bridge's
//! lifecycle lock; it never touches the clock itself.

use embassy_time::{Duration, Instant};

use crate::ble::OutputStack;
use crate::error::{BleError, Error};
use crate::power_logic::{self, Hold, LinkSnapshot};
use crate::settings::BridgeSettings;

/// Connectivity predicates supplied by the platform.
pub trait LinkStatus {
    /// A USB HID device is attached.
    fn usb_device_connected(&self) -> bool;

    /// A BLE host is connected to the HID service.
    fn ble_peer_connected(&self) -> bool;

    /// A session that needs the radio (web/management) is active.
    fn priority_session_active(&self) -> bool;

    fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            usb_device: self.usb_device_connected(),
            ble_peer: self.ble_peer_connected(),
            priority_session: self.priority_session_active(),
        }
    }
}

/// Output stack lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LifecycleState {
    /// Stack up, reports forwarded.
    Active,
    /// Stack torn down.
    Suspended,
}

/// Result of one inactivity timer check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerOutcome {
    /// No deadline armed, or it has not passed yet.
    NotDue,
    /// Deadline passed but a condition held the stack up. Inert until rearmed.
    Inert(Hold),
    /// Stack deinitialised.
    Suspended,
    /// Deinit failed; state stays `Active`.
    DeinitFailed(BleError),
    /// Already suspended, nothing to do.
    AlreadySuspended,
}

pub struct PowerManager {
    state: LifecycleState,
    deadline: Option<Instant>,
    timeout: Duration,
    sleep_enabled: bool,
}

impl PowerManager {
    pub const fn new(timeout: Duration, sleep_enabled: bool) -> Self {
        Self {
            state: LifecycleState::Active,
            deadline: None,
            timeout,
            sleep_enabled,
        }
    }

    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self::new(settings.sleep_timeout(), settings.sleep_enabled)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_suspended(&self) -> bool {
        self.state == LifecycleState::Suspended
    }

    /// Armed inactivity deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn sleep_enabled(&self) -> bool {
        self.sleep_enabled
    }

    /// Take new timeout / enable values. An armed deadline keeps its
    /// original expiry until the next rearm.
    pub fn configure(&mut self, timeout: Duration, sleep_enabled: bool) {
        self.timeout = timeout;
        self.sleep_enabled = sleep_enabled;
    }

    /// Arm (or push back) the inactivity deadline from `now`.
    pub fn rearm(&mut self, now: Instant) -> Instant {
        let deadline = now + self.timeout;
        self.deadline = Some(deadline);
        deadline
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Inactivity timer check at `now`.
    pub fn on_timer<L: LinkStatus, S: OutputStack>(
        &mut self,
        now: Instant,
        links: &L,
        stack: &S,
    ) -> TimerOutcome {
        if self.state == LifecycleState::Suspended {
            self.deadline = None;
            return TimerOutcome::AlreadySuspended;
        }

        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return TimerOutcome::NotDue,
        }
        self.deadline = None;

        if let Some(hold) = power_logic::suspend_hold(links.snapshot(), self.sleep_enabled) {
            debug!("Power: inactivity timeout ignored ({:?})", hold);
            return TimerOutcome::Inert(hold);
        }

        self.state = LifecycleState::Suspended;
        match stack.stack_deinit() {
            Ok(()) => {
                info!("Power: Active -> Suspended (BLE stack down)");
                TimerOutcome::Suspended
            }
            Err(e) => {
                warn!("Power: BLE stack deinit failed ({:?}), staying active", e);
                self.state = LifecycleState::Active;
                TimerOutcome::DeinitFailed(e)
            }
        }
    }

    /// Bring the stack back up if suspended.
    ///
    /// Returns `Ok(true)` if the stack was reinitialised and `Ok(false)`
    /// if it was already active. On failure the state stays `Suspended`
    /// so the next report retries.
    pub fn resume<S: OutputStack>(&mut self, stack: &S) -> Result<bool, Error> {
        if self.state == LifecycleState::Active {
            return Ok(false);
        }

        self.state = LifecycleState::Active;
        match stack.stack_init() {
            Ok(()) => {
                info!("Power: Suspended -> Active (BLE stack up)");
                Ok(true)
            }
            Err(e) => {
                warn!("Power: BLE stack init failed ({:?}), report dropped", e);
                self.state = LifecycleState::Suspended;
                Err(Error::Ble(e))
            }
        }
    }

    /// Suspended while a USB device is still attached.
    pub fn is_output_paused(&self, usb_device: bool) -> bool {
        power_logic::output_paused(self.is_suspended(), usb_device)
    }
}
