use std::time::Duration;

use rstest::rstest;
use spectro_hardware::sim::PAGE_SIZE;
use spectro_hardware::{HwError, PacketFault, SimConfig, SimulatedSpectrometer};
use spectro_traits::channels::{self, opcodes};
use spectro_traits::{StatusCode, Transport, TransportError};

const T: Duration = Duration::from_millis(50);

fn sim() -> SimulatedSpectrometer {
    let pages = (0..8u8).map(|i| [i; PAGE_SIZE]).collect();
    let sim = SimulatedSpectrometer::new(
        SimConfig {
            pixel_count: 8,
            packet_pixels: 4,
            ..SimConfig::default()
        },
        pages,
    );
    sim.set_spectrum((1..=8).collect());
    sim.write(channels::ACQUIRE_SPECTRUM, &[0], T).unwrap();
    sim
}

fn request(sim: &SimulatedSpectrometer, start: u16) -> Result<Vec<u8>, TransportError> {
    sim.write(channels::SPECTRUM_REQUEST, &start.to_le_bytes(), T)
        .unwrap();
    sim.read(channels::READ_SPECTRUM, T)
}

#[rstest]
#[case(PacketFault::NotReady, vec![0, 0, 0])]
#[case(PacketFault::DeviceError(0x42), vec![0, 0, 0x42])]
#[case(PacketFault::OddLength, vec![0, 0, 1, 0, 2, 0, 3, 0, 4])]
#[case(PacketFault::WrongOffset, vec![0, 1, 2, 0, 3, 0, 4, 0, 5, 0])]
fn fault_shapes_the_next_response(#[case] fault: PacketFault, #[case] expected: Vec<u8>) {
    let sim = sim();
    sim.inject(fault);
    assert_eq!(request(&sim, 0).unwrap(), expected);
    // One-shot: the retry sees a clean packet.
    assert_eq!(request(&sim, 0).unwrap(), vec![0, 0, 1, 0, 2, 0, 3, 0, 4, 0]);
}

#[rstest]
fn timeout_fault_is_a_typed_hardware_error() {
    let sim = sim();
    sim.inject(PacketFault::Timeout);
    let err = request(&sim, 0).unwrap_err();
    assert!(matches!(err.downcast_ref::<HwError>(), Some(HwError::Timeout(ch)) if ch == channels::READ_SPECTRUM));
}

#[rstest]
fn duplicate_repeats_the_previous_packet() {
    let sim = sim();
    let first = request(&sim, 0).unwrap();
    sim.inject(PacketFault::Duplicate);
    assert_eq!(request(&sim, 4).unwrap(), first);
    assert_eq!(request(&sim, 4).unwrap(), vec![0, 4, 5, 0, 6, 0, 7, 0, 8, 0]);
}

#[rstest]
fn inject_after_skips_clean_packets() {
    let sim = sim();
    sim.inject_after(1, PacketFault::NotReady);
    assert_eq!(request(&sim, 0).unwrap().len(), 10);
    assert_eq!(request(&sim, 4).unwrap(), vec![0, 0, 0]);
}

#[rstest]
#[case(channels::INTEGRATION_TIME_MS, StatusCode::ProtocolError(9))]
#[case(channels::LASER_STATE, StatusCode::AccessDenied)]
fn injected_write_failure_hits_only_its_channel(#[case] channel: &str, #[case] status: StatusCode) {
    let sim = sim();
    sim.fail_next_write(channel, status);
    // Another channel is unaffected and the failure stays queued.
    assert_eq!(sim.write(channels::GAIN_DB, &[8, 0], T).unwrap(), StatusCode::Success);
    let bytes: &[u8] = if channel == channels::LASER_STATE { &[0, 0, 0, 10] } else { &[0, 0, 0, 50] };
    assert_eq!(sim.write(channel, bytes, T).unwrap(), status);
    assert!(sim.writes_to(channel).is_empty());
    assert_eq!(sim.write(channel, bytes, T).unwrap(), StatusCode::Success);
}

#[rstest]
fn usb_eeprom_pages_are_read_whole() {
    let sim = sim();
    sim.write(channels::EEPROM_CMD, &[5], T).unwrap();
    assert_eq!(sim.read(channels::EEPROM_DATA, T).unwrap(), vec![5u8; PAGE_SIZE]);
}

#[rstest]
fn generic_writes_update_roi_and_scans() {
    let sim = sim();
    let mut start = vec![1, opcodes::SET_ROI_START[0], opcodes::SET_ROI_START[1]];
    start.extend_from_slice(&250u16.to_be_bytes());
    let mut stop = vec![2, opcodes::SET_ROI_STOP[0], opcodes::SET_ROI_STOP[1]];
    stop.extend_from_slice(&950u16.to_be_bytes());
    sim.write(channels::GENERIC, &start, T).unwrap();
    sim.write(channels::GENERIC, &stop, T).unwrap();
    sim.write(
        channels::GENERIC,
        &[3, opcodes::SET_SCANS_TO_AVERAGE[0], opcodes::SET_SCANS_TO_AVERAGE[1], 4],
        T,
    )
    .unwrap();
    assert_eq!(sim.roi(), (250, 950));
    assert_eq!(sim.scans_to_average(), 4);
}

#[rstest]
fn unknown_generic_group_is_refused() {
    let sim = sim();
    let st = sim.write(channels::GENERIC, &[1, 0xFF, 0x99], T).unwrap();
    assert_eq!(st, StatusCode::ProtocolError(0x7F));
}
