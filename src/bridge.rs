//! The USB → BLE bridge: ties the dispatcher, translator and output
//! lifecycle together.
//!
//! Three contexts share one [`Bridge`]:
//! - the USB host driver calls [`Bridge::handle_usb_event`] (producer)
//! - [`Bridge::run_consumer`] translates and forwards queued reports
//! - [`Bridge::run_inactivity_timer`] suspends the stack when idle
//!
//! The lifecycle state sits behind an async mutex that both the
//! consumer and the timer take with a bounded wait before touching the
//! state or calling `stack_init`/`stack_deinit`.

use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration, Instant, Timer};

use crate::ble::OutputStack;
use crate::config::{REPORT_LOCK_TIMEOUT_MS, TIMER_LOCK_TIMEOUT_MS};
use crate::dispatch::{DecodedReport, Dispatcher};
use crate::error::Error;
use crate::hid::{OutgoingReport, Translator};
use crate::power::{LifecycleState, LinkStatus, PowerManager, TimerOutcome};
use crate::power_logic;
use crate::settings::{BridgeSettings, SettingValue};
use crate::usb::UsbHidEvent;

/// What happened to one report on the consumer path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Delivery {
    /// Sent to the BLE host.
    Sent(OutgoingReport),
    /// Not a keyboard or mouse report.
    Ignored,
    /// Translated but dropped: no peer, or the send failed.
    Dropped,
}

pub struct Bridge<S: OutputStack, L: LinkStatus, const N: usize> {
    dispatcher: Dispatcher<N>,
    power: Mutex<CriticalSectionRawMutex, PowerManager>,
    /// Mirror of `power.state == Suspended`, readable without the lock.
    suspended: AtomicBool,
    /// Wakes the timer task when the deadline moves.
    rearm: Signal<CriticalSectionRawMutex, ()>,
    sensitivity: AtomicU16,
    settings: Mutex<CriticalSectionRawMutex, BridgeSettings>,
    stack: S,
    links: L,
}

impl<S: OutputStack, L: LinkStatus, const N: usize> Bridge<S, L, N> {
    pub fn new(stack: S, links: L, settings: BridgeSettings) -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            power: Mutex::new(PowerManager::from_settings(&settings)),
            suspended: AtomicBool::new(false),
            rearm: Signal::new(),
            sensitivity: AtomicU16::new(settings.mouse_sensitivity),
            settings: Mutex::new(settings),
            stack,
            links,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<N> {
        &self.dispatcher
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn links(&self) -> &L {
        &self.links
    }

    /// Translator configured from the current settings.
    pub fn translator(&self) -> Translator {
        Translator::new(self.sensitivity.load(Ordering::Relaxed))
    }

    /// Producer entry point for USB HID host events.
    pub async fn handle_usb_event(&self, event: UsbHidEvent<'_>) -> Result<(), Error> {
        match event {
            UsbHidEvent::Connected {
                interface_id,
                descriptor,
            } => {
                self.dispatcher.on_device_connected(interface_id, descriptor)?;
                self.rearm_timer(Instant::now()).await
            }
            UsbHidEvent::Report {
                interface_id,
                report_id: Some(report_id),
                payload,
            } => self.dispatcher.submit(interface_id, report_id, payload).await,
            UsbHidEvent::Report {
                interface_id,
                report_id: None,
                payload,
            } => self.dispatcher.submit_raw(interface_id, payload).await,
            UsbHidEvent::Disconnected { interface_id } => {
                self.dispatcher.on_device_disconnected(interface_id);
                Ok(())
            }
        }
    }

    /// Consumer task: translate and forward reports forever.
    pub async fn run_consumer(&self, mut translator: Translator) -> ! {
        info!("Bridge consumer task started");
        loop {
            let report = self.dispatcher.receive().await;
            if let Err(e) = self.process(&mut translator, &report).await {
                debug!(
                    "Report from interface {} dropped: {:?}",
                    report.interface_id, e
                );
            }
        }
    }

    /// Handle one dequeued report.
    ///
    /// Resumes the output stack first if it is suspended; a failed
    /// resume drops the report. Send failures are swallowed.
    pub async fn process(
        &self,
        translator: &mut Translator,
        report: &DecodedReport,
    ) -> Result<Delivery, Error> {
        if self.suspended.load(Ordering::Acquire) {
            self.resume().await?;
        }

        translator.set_sensitivity(self.sensitivity.load(Ordering::Relaxed));
        let Some(outgoing) = translator.translate(report, &self.dispatcher)? else {
            return Ok(Delivery::Ignored);
        };

        if !self.links.ble_peer_connected() {
            trace!("No BLE peer, report dropped");
            return Ok(Delivery::Dropped);
        }

        if let Err(e) = self.stack.send(&outgoing) {
            // Suspended between dequeue and send, or the peer just left.
            debug!("BLE send failed: {:?}", e);
            return Ok(Delivery::Dropped);
        }

        if power_logic::rearm_on_delivery(self.links.snapshot()) {
            if let Err(e) = self.rearm_timer(Instant::now()).await {
                debug!("Inactivity timer not rearmed: {:?}", e);
            }
        }
        Ok(Delivery::Sent(outgoing))
    }

    /// Take the lifecycle lock, waiting at most `timeout_ms`.
    async fn lock_power(
        &self,
        timeout_ms: u64,
    ) -> Result<MutexGuard<'_, CriticalSectionRawMutex, PowerManager>, Error> {
        with_timeout(Duration::from_millis(timeout_ms), self.power.lock())
            .await
            .map_err(|_| Error::LockTimeout)
    }

    async fn resume(&self) -> Result<(), Error> {
        let mut power = self.lock_power(REPORT_LOCK_TIMEOUT_MS).await?;

        let result = power.resume(&self.stack);
        self.suspended.store(power.is_suspended(), Ordering::Release);
        result.map(|_| ())
    }

    /// Push the inactivity deadline back to `now + timeout`.
    pub async fn rearm_timer(&self, now: Instant) -> Result<(), Error> {
        let mut power = self.lock_power(REPORT_LOCK_TIMEOUT_MS).await?;

        power.rearm(now);
        drop(power);
        self.rearm.signal(());
        Ok(())
    }

    /// Inactivity timer check at `now`. Skipped if the lock is busy.
    pub async fn check_inactivity(&self, now: Instant) -> Result<TimerOutcome, Error> {
        let Ok(mut power) = self.lock_power(TIMER_LOCK_TIMEOUT_MS).await else {
            warn!("Power: lifecycle lock busy, inactivity check skipped");
            return Err(Error::LockTimeout);
        };

        let outcome = power.on_timer(now, &self.links, &self.stack);
        self.suspended.store(power.is_suspended(), Ordering::Release);
        Ok(outcome)
    }

    /// Timer task: wait for the armed deadline, then run the check.
    pub async fn run_inactivity_timer(&self) -> ! {
        info!("Bridge inactivity timer task started");
        loop {
            let deadline = match self.lock_power(TIMER_LOCK_TIMEOUT_MS).await {
                Ok(power) => power.deadline(),
                Err(_) => {
                    Timer::after_millis(TIMER_LOCK_TIMEOUT_MS).await;
                    continue;
                }
            };

            match deadline {
                Some(at) => {
                    if let Either::First(()) = select(Timer::at(at), self.rearm.wait()).await {
                        let _ = self.check_inactivity(Instant::now()).await;
                    }
                }
                None => self.rearm.wait().await,
            }
        }
    }

    pub async fn lifecycle_state(&self) -> Result<LifecycleState, Error> {
        Ok(self.lock_power(REPORT_LOCK_TIMEOUT_MS).await?.state())
    }

    /// Suspended while a USB device is still attached (status display).
    pub fn is_output_paused(&self) -> bool {
        power_logic::output_paused(
            self.suspended.load(Ordering::Acquire),
            self.links.usb_device_connected(),
        )
    }

    /// Update one setting at runtime.
    ///
    /// Nothing changes if the value is rejected or the lifecycle lock
    /// stays busy.
    pub async fn apply_setting(&self, key: &str, value: SettingValue) -> Result<(), Error> {
        let mut settings = self.settings.lock().await;
        let mut updated = *settings;
        updated.apply(key, value)?;

        let mut power = self.lock_power(REPORT_LOCK_TIMEOUT_MS).await?;
        power.configure(updated.sleep_timeout(), updated.sleep_enabled);
        drop(power);

        *settings = updated;
        self.sensitivity
            .store(updated.mouse_sensitivity, Ordering::Relaxed);
        info!("Settings: {} updated", key);
        Ok(())
    }

    pub async fn settings(&self) -> BridgeSettings {
        *self.settings.lock().await
    }
}
