//! Integration tests for the usb2ble pipeline on the host.

use core::cell::Cell;
use std::cell::RefCell;

use embassy_futures::block_on;
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};

use usb2ble::ble::OutputStack;
use usb2ble::hid::{KeyboardReport, MouseReport};
use usb2ble::power::TimerOutcome;
use usb2ble::power_logic::Hold;
use usb2ble::settings::{KEY_ENABLE_SLEEP, KEY_MOUSE_SENSITIVITY};
use usb2ble::{
    BleError, Bridge, BridgeSettings, Delivery, Dispatcher, Error, LifecycleState, LinkStatus,
    OutgoingReport, SettingValue, UsbHidEvent,
};

/// Report ID 1: boot keyboard. Report ID 2: 3-button mouse with 8-bit X/Y.
const COMPOSITE: &[u8] = &[
    0x05, 0x01, 0x09, 0x06, 0xA1, 0x01, 0x85, 0x01, 0x05, 0x07, 0x19, 0xE0, 0x29, 0xE7, 0x15,
    0x00, 0x25, 0x01, 0x75, 0x01, 0x95, 0x08, 0x81, 0x02, 0x95, 0x01, 0x75, 0x08, 0x81, 0x01,
    0x19, 0x00, 0x29, 0x65, 0x15, 0x00, 0x25, 0x65, 0x95, 0x06, 0x75, 0x08, 0x81, 0x00, 0xC0,
    0x05, 0x01, 0x09, 0x02, 0xA1, 0x01, 0x85, 0x02, 0x09, 0x01, 0xA1, 0x00, 0x05, 0x09, 0x19,
    0x01, 0x29, 0x03, 0x15, 0x00, 0x25, 0x01, 0x95, 0x03, 0x75, 0x01, 0x81, 0x02, 0x95, 0x01,
    0x75, 0x05, 0x81, 0x01, 0x05, 0x01, 0x09, 0x30, 0x09, 0x31, 0x15, 0x81, 0x25, 0x7F, 0x75,
    0x08, 0x95, 0x02, 0x81, 0x06, 0xC0, 0xC0,
];

struct Links {
    usb: Cell<bool>,
    ble: Cell<bool>,
    priority: Cell<bool>,
}

impl Links {
    fn up() -> Self {
        Self {
            usb: Cell::new(true),
            ble: Cell::new(true),
            priority: Cell::new(false),
        }
    }
}

impl LinkStatus for Links {
    fn usb_device_connected(&self) -> bool {
        self.usb.get()
    }
    fn ble_peer_connected(&self) -> bool {
        self.ble.get()
    }
    fn priority_session_active(&self) -> bool {
        self.priority.get()
    }
}

#[derive(Default)]
struct Stack {
    fail_init: Cell<bool>,
    fail_send: Cell<bool>,
    inits: Cell<u32>,
    deinits: Cell<u32>,
    sent: RefCell<Vec<OutgoingReport>>,
}

impl OutputStack for Stack {
    fn stack_init(&self) -> Result<(), BleError> {
        self.inits.set(self.inits.get() + 1);
        if self.fail_init.get() {
            return Err(BleError::InitFailed);
        }
        Ok(())
    }

    fn stack_deinit(&self) -> Result<(), BleError> {
        self.deinits.set(self.deinits.get() + 1);
        Ok(())
    }

    fn send_keyboard_report(&self, report: &KeyboardReport) -> Result<(), BleError> {
        if self.fail_send.get() {
            return Err(BleError::NotConnected);
        }
        self.sent.borrow_mut().push(OutgoingReport::Keyboard(*report));
        Ok(())
    }

    fn send_mouse_report(&self, report: &MouseReport) -> Result<(), BleError> {
        if self.fail_send.get() {
            return Err(BleError::NotConnected);
        }
        self.sent.borrow_mut().push(OutgoingReport::Mouse(*report));
        Ok(())
    }
}

type TestBridge = Bridge<Stack, Links, 4>;

fn bridge() -> TestBridge {
    let settings = BridgeSettings {
        sleep_timeout_secs: 1,
        ..BridgeSettings::default()
    };
    Bridge::new(Stack::default(), Links::up(), settings)
}

fn connect(bridge: &TestBridge) {
    block_on(bridge.handle_usb_event(UsbHidEvent::Connected {
        interface_id: 0,
        descriptor: COMPOSITE,
    }))
    .unwrap();
}

fn raw(bridge: &TestBridge, bytes: &[u8]) -> Result<(), Error> {
    block_on(bridge.handle_usb_event(UsbHidEvent::Report {
        interface_id: 0,
        report_id: None,
        payload: bytes,
    }))
}

/// Dequeue and process one report.
fn pump(bridge: &TestBridge) -> Result<Delivery, Error> {
    let mut translator = bridge.translator();
    let report = bridge.dispatcher().try_receive().expect("queued report");
    block_on(bridge.process(&mut translator, &report))
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60)
}

#[test]
fn full_queue_drops_newest_and_keeps_order() {
    let dispatcher: Dispatcher<2> = Dispatcher::new();
    dispatcher.on_device_connected(0, COMPOSITE).unwrap();

    assert_eq!(block_on(dispatcher.submit(0, 2, &[0x00, 0x01, 0x00])), Ok(()));
    assert_eq!(block_on(dispatcher.submit(0, 2, &[0x00, 0x02, 0x00])), Ok(()));
    assert_eq!(
        block_on(dispatcher.submit(0, 2, &[0x00, 0x03, 0x00])),
        Err(Error::QueueFull)
    );

    let stats = dispatcher.stats();
    assert_eq!((stats.decoded, stats.dropped), (2, 1));

    let first = block_on(dispatcher.receive());
    let second = block_on(dispatcher.receive());
    assert_eq!(first.raw[1], 0x01);
    assert_eq!(second.raw[1], 0x02);
    assert!(dispatcher.try_receive().is_none());
}

#[test]
fn keyboard_report_reaches_ble() {
    let bridge = bridge();
    connect(&bridge);

    // Report ID 1: Left Ctrl + 'c'.
    raw(&bridge, &[0x01, 0x01, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00]).unwrap();
    let delivery = pump(&bridge).unwrap();

    let expected = KeyboardReport {
        modifier: 0x01,
        reserved: 0,
        keycodes: [0x06, 0, 0, 0, 0, 0],
    };
    assert_eq!(delivery, Delivery::Sent(OutgoingReport::Keyboard(expected)));
    assert_eq!(bridge.stack().sent.borrow().as_slice(), &[OutgoingReport::Keyboard(expected)]);
}

#[test]
fn mouse_report_reaches_ble_with_sensitivity() {
    let bridge = bridge();
    connect(&bridge);
    block_on(bridge.apply_setting(KEY_MOUSE_SENSITIVITY, SettingValue::Int(200))).unwrap();

    // Report ID 2: right button, X = -3, Y = 4.
    raw(&bridge, &[0x02, 0x02, 0xFD, 0x04]).unwrap();
    let Delivery::Sent(OutgoingReport::Mouse(mouse)) = pump(&bridge).unwrap() else {
        panic!("expected a mouse report");
    };
    assert_eq!(mouse.buttons, 0x02);
    assert_eq!((mouse.x, mouse.y), (-6, 8));
}

#[test]
fn no_peer_or_failed_send_is_swallowed() {
    let bridge = bridge();
    connect(&bridge);

    bridge.links().ble.set(false);
    raw(&bridge, &[0x02, 0x01, 0x01, 0x01]).unwrap();
    assert_eq!(pump(&bridge), Ok(Delivery::Dropped));

    bridge.links().ble.set(true);
    bridge.stack().fail_send.set(true);
    raw(&bridge, &[0x02, 0x01, 0x01, 0x01]).unwrap();
    assert_eq!(pump(&bridge), Ok(Delivery::Dropped));
    assert!(bridge.stack().sent.borrow().is_empty());
}

#[test]
fn unknown_interface_and_report_are_rejected() {
    let bridge = bridge();
    assert_eq!(raw(&bridge, &[0x01, 0x00]), Err(Error::UnknownInterface));

    connect(&bridge);
    assert_eq!(raw(&bridge, &[0x07, 0x00]), Err(Error::UnknownReport));

    block_on(bridge.handle_usb_event(UsbHidEvent::Disconnected { interface_id: 0 })).unwrap();
    assert!(!bridge.dispatcher().has_devices());
}

#[test]
fn idle_bridge_suspends_and_next_report_resumes() {
    let bridge = bridge();
    connect(&bridge);

    let outcome = block_on(bridge.check_inactivity(far_future())).unwrap();
    assert_eq!(outcome, TimerOutcome::Suspended);
    assert_eq!(bridge.stack().deinits.get(), 1);
    assert!(bridge.is_output_paused());

    raw(&bridge, &[0x02, 0x01, 0x00, 0x00]).unwrap();
    assert!(matches!(pump(&bridge), Ok(Delivery::Sent(_))));
    assert_eq!(bridge.stack().inits.get(), 1);
    assert_eq!(block_on(bridge.lifecycle_state()), Ok(LifecycleState::Active));
    assert!(!bridge.is_output_paused());
}

#[test]
fn failed_resume_drops_report_and_retries() {
    let bridge = bridge();
    connect(&bridge);
    block_on(bridge.check_inactivity(far_future())).unwrap();

    bridge.stack().fail_init.set(true);
    raw(&bridge, &[0x02, 0x01, 0x00, 0x00]).unwrap();
    assert_eq!(pump(&bridge), Err(Error::Ble(BleError::InitFailed)));
    assert_eq!(block_on(bridge.lifecycle_state()), Ok(LifecycleState::Suspended));
    assert!(bridge.stack().sent.borrow().is_empty());

    bridge.stack().fail_init.set(false);
    raw(&bridge, &[0x02, 0x01, 0x00, 0x00]).unwrap();
    assert!(matches!(pump(&bridge), Ok(Delivery::Sent(_))));
    assert_eq!(bridge.stack().inits.get(), 2);
}

#[test]
fn delivered_report_rearms_timer() {
    let bridge = bridge();
    connect(&bridge);

    let before = Instant::now();
    raw(&bridge, &[0x02, 0x00, 0x01, 0x00]).unwrap();
    pump(&bridge).unwrap();

    // The deadline now lies at least a full timeout after the report.
    let outcome = block_on(bridge.check_inactivity(before + Duration::from_millis(999))).unwrap();
    assert_eq!(outcome, TimerOutcome::NotDue);
    assert_eq!(bridge.stack().deinits.get(), 0);
}

#[test]
fn timer_is_inert_without_peer_or_with_sleep_disabled() {
    let bridge = bridge();
    // Attaching a device arms the timer even before a peer connects.
    bridge.links().ble.set(false);
    connect(&bridge);
    assert_eq!(
        block_on(bridge.check_inactivity(far_future())),
        Ok(TimerOutcome::Inert(Hold::NoBlePeer))
    );

    bridge.links().ble.set(true);
    block_on(bridge.apply_setting(KEY_ENABLE_SLEEP, SettingValue::Bool(false))).unwrap();
    block_on(bridge.rearm_timer(Instant::now())).unwrap();
    assert_eq!(
        block_on(bridge.check_inactivity(far_future())),
        Ok(TimerOutcome::Inert(Hold::SleepDisabled))
    );
    assert_eq!(bridge.stack().deinits.get(), 0);
}

#[test]
fn timer_task_suspends_only_after_idle_timeout() {
    let bridge = bridge();
    connect(&bridge);

    let driver = async {
        let mut translator = bridge.translator();

        // A report every 300 ms keeps the 1 s timer from firing.
        for _ in 0..5 {
            Timer::after_millis(300).await;
            bridge
                .handle_usb_event(UsbHidEvent::Report {
                    interface_id: 0,
                    report_id: None,
                    payload: &[0x02, 0x00, 0x01, 0x00],
                })
                .await
                .unwrap();
            let report = bridge.dispatcher().receive().await;
            let delivery = bridge.process(&mut translator, &report).await.unwrap();
            assert!(matches!(delivery, Delivery::Sent(_)));
        }
        assert_eq!(bridge.lifecycle_state().await, Ok(LifecycleState::Active));
        assert_eq!(bridge.stack().deinits.get(), 0);

        Timer::after_millis(1300).await;
        assert_eq!(bridge.lifecycle_state().await, Ok(LifecycleState::Suspended));
        assert_eq!(bridge.stack().deinits.get(), 1);
    };

    let Either::Second(()) = block_on(select(bridge.run_inactivity_timer(), driver)) else {
        unreachable!("the timer task never returns");
    };
}
