mod common;

use std::sync::Arc;

use common::{rig, small_descriptor, small_sim};
use rstest::rstest;
use spectro_core::error::BuildError;
use spectro_core::{
    AutoRamanParams, BatteryStatus, DeviceCfg, DeviceDescriptor, DeviceError, DeviceSession, EepromProtocol,
    ParseError, SyncOutcome, Timeouts,
};
use spectro_hardware::{SimConfig, SimulatedSpectrometer};
use spectro_traits::{ManualClock, channels};

fn connect(sim: Arc<SimulatedSpectrometer>) -> eyre::Result<DeviceSession> {
    DeviceSession::builder()
        .with_transport(sim)
        .with_clock(Arc::new(ManualClock::new()))
        .connect()
}

#[rstest]
#[case(EepromProtocol::Usb)]
#[case(EepromProtocol::Ble)]
#[case(EepromProtocol::Generic)]
fn connect_reads_the_descriptor(#[case] protocol: EepromProtocol) {
    let descriptor = small_descriptor();
    let sim = small_sim(&descriptor);
    let session = DeviceSession::builder()
        .with_transport(sim)
        .with_clock(Arc::new(ManualClock::new()))
        .with_device_config(DeviceCfg {
            eeprom_protocol: protocol,
        })
        .connect()
        .expect("connect");
    assert_eq!(**session.descriptor(), descriptor);
}

#[test]
fn unprogrammed_eeprom_is_calibration_corrupt() {
    let sim = Arc::new(SimulatedSpectrometer::new(
        SimConfig::default(),
        vec![[0xFF; 64]; 8],
    ));
    let err = connect(sim).unwrap_err();
    assert_eq!(
        err.downcast_ref::<DeviceError>(),
        Some(&DeviceError::CalibrationCorrupt(ParseError::CorruptEeprom {
            page: 0,
            fill: 0xFF
        }))
    );
}

#[test]
fn missing_pages_never_yield_a_partial_descriptor() {
    let mut pages = small_descriptor().to_pages();
    pages.truncate(5);
    let sim = Arc::new(SimulatedSpectrometer::new(SimConfig::default(), pages));
    let err = connect(sim).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("connecting"), "{msg}");
    assert!(err.downcast_ref::<DeviceError>().is_some());
}

#[test]
fn zero_gate_timeout_is_rejected_before_io() {
    let sim = small_sim(&small_descriptor());
    let err = DeviceSession::builder()
        .with_transport(sim.clone())
        .with_timeouts(Timeouts {
            gate_ms: 0,
            ..Timeouts::default()
        })
        .connect()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
    assert!(sim.writes().is_empty());
}

#[test]
fn reconnect_replaces_descriptor_and_forgets_confirmed_state() {
    let mut r = rig();
    r.session.acquire().expect("first acquire");
    let confirmed = r.session.engine().params().state().integration_time_ms.confirmed();
    assert_eq!(confirmed, Some(100));

    let reflashed = DeviceDescriptor {
        serial_number: "SIM0002".into(),
        startup_integration_time_ms: 40,
        ..small_descriptor()
    };
    r.sim.set_pages(reflashed.to_pages());
    r.session.reconnect().expect("reconnect");

    assert_eq!(r.session.descriptor().serial_number, "SIM0002");
    let st = r.session.engine().params().state();
    assert_eq!(st.integration_time_ms.desired(), 40);
    assert_eq!(st.integration_time_ms.confirmed(), None);
    assert_eq!(st.vertical_roi.confirmed(), None);

    let writes_before = r.sim.writes_to(channels::INTEGRATION_TIME_MS).len();
    r.session.acquire().expect("acquire after reconnect");
    assert_eq!(
        r.sim.writes_to(channels::INTEGRATION_TIME_MS).len(),
        writes_before + 1
    );
    assert_eq!(r.sim.integration_time_ms(), 40);
}

#[test]
fn battery_poll_reads_and_skips_when_busy() {
    let r = rig();
    assert_eq!(
        r.session.poll_battery().expect("poll"),
        Some(BatteryStatus {
            percent: 87,
            charging: false
        })
    );
    let _held = r.session.link().try_lock().expect("gate free");
    assert_eq!(r.session.poll_battery().expect("poll"), None);
}

#[test]
fn battery_poll_from_another_thread_shares_the_gate() {
    let r = rig();
    let link = r.session.link().clone();
    let got = std::thread::spawn(move || spectro_core::battery::poll(&link))
        .join()
        .expect("poll thread");
    assert!(matches!(got, Ok(Some(_))));
}

#[test]
fn auto_raman_params_are_acknowledged() {
    let r = rig();
    let outcome = r
        .session
        .push_auto_raman_params(&AutoRamanParams::default())
        .expect("push");
    assert_eq!(outcome, SyncOutcome::Written);
    let generic = r.sim.writes_to(channels::GENERIC);
    let last = generic.last().expect("generic write");
    assert_eq!(&last[1..3], &[0xFF, 0xFD]);
}

#[test]
fn disconnected_device_fails_with_transport_error() {
    let mut r = rig();
    r.sim.set_connected(false);
    let err = r.session.acquire().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DeviceError>(),
        Some(DeviceError::Transport(_))
    ));
}

#[test]
fn laser_refused_without_a_laser() {
    let d = DeviceDescriptor {
        has_laser: false,
        ..small_descriptor()
    };
    let mut r = common::rig_with(d, spectro_core::EngineConfig::default());
    let err = r.session.set_laser_enabled(true).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DeviceError>(),
        Some(DeviceError::State(_))
    ));
    assert!(!r.sim.laser_enabled());
}
