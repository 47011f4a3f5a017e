//! TMC13 logger and shutter drivers against a scripted transport.

use prevac_tm::adapters::{Adapter, MockAdapter};
use prevac_tm::core::{Device, GuiParameters, InstrumentState, ParameterValue};
use prevac_tm::error::{DaqError, DeviceFault};
use prevac_tm::instrument::tmc_link::command;
use prevac_tm::instrument::{ShutterState, Tmc13, Tmc13Shutter};
use prevac_tm::protocol::v2::{self, Command, V2Address};

const HOST: u8 = 0x7F;

fn answer(command: Command, payload: &[u8]) -> Vec<u8> {
    v2::encode(command, &V2Address { device: 0x01, host: HOST }, payload).unwrap()
}

fn channel_double(channel: u8, value: f64) -> Vec<u8> {
    let mut payload = vec![channel];
    payload.extend_from_slice(&value.to_be_bytes());
    payload
}

fn command_of(frame: &[u8]) -> Command {
    Command(u16::from_be_bytes([frame[4], frame[5]]))
}

fn queue_connect(adapter: &mut MockAdapter) {
    adapter
        .queue_response(answer(command::HOST, &[HOST]))
        .queue_response(answer(command::SERIAL_NUMBER, b"0000000010275"))
        .queue_response(answer(command::PRODUCT_NUMBER, b"021321000003302"))
        .queue_response(answer(command::DEVICE_VERSION, b"2.1.4"))
        .queue_response(answer(command::MASTER_CONTROL, &[0x00]));
}

#[test]
fn full_lifecycle() {
    let mut adapter = MockAdapter::new();
    queue_connect(&mut adapter);
    adapter
        // initialize
        .queue_response(answer(command::FREQUENCY_MIN, &channel_double(2, 5.0e6)))
        .queue_response(answer(command::FREQUENCY_MAX, &channel_double(2, 6.0e6)))
        // configure
        .queue_response(answer(command::RESET_THICKNESS.write(), &[0x02]))
        .queue_response(answer(command::TOOLING.write(), &[0x02]))
        // call
        .queue_response(answer(command::THICKNESS, &channel_double(2, 123.0)))
        .queue_response(answer(command::RATE, &channel_double(2, 0.5)))
        .queue_response(answer(command::CRYSTAL_FREQUENCY, &5_750_000.0f64.to_be_bytes()))
        // disconnect
        .queue_response(answer(command::MASTER_CONTROL, &[0x00]));

    let mut driver = Tmc13::new(adapter).with_host_id("Bench");
    let mut parameters = GuiParameters::defaults(&driver.gui_parameters());
    parameters
        .insert("Channel", "2")
        .insert("Reset thickness", true)
        .insert("Set Tooling", true)
        .insert("Tooling in %", "87.5");
    driver.apply_gui_parameters(&parameters).unwrap();

    driver.connect().unwrap();
    assert_eq!(driver.link().address().host, HOST);
    driver.initialize().unwrap();
    assert_eq!(driver.frequency_window(), Some((5.0e6, 6.0e6)));
    driver.configure().unwrap();

    let sample = driver.call().unwrap();
    assert_eq!(sample.values, vec![12.3, 0.5, 75.0]);

    driver.disconnect().unwrap();
    assert_eq!(driver.state(), InstrumentState::Disconnected);
    assert_eq!(driver.link().adapter().pending_responses(), 0);

    let written = driver.link().adapter().written();
    let commands: Vec<Command> = written.iter().map(|frame| command_of(frame)).collect();
    assert_eq!(
        commands,
        vec![
            command::HOST,
            command::SERIAL_NUMBER,
            command::PRODUCT_NUMBER,
            command::DEVICE_VERSION,
            command::MASTER_CONTROL,
            command::FREQUENCY_MIN,
            command::FREQUENCY_MAX,
            command::RESET_THICKNESS.write(),
            command::TOOLING.write(),
            command::THICKNESS,
            command::RATE,
            command::CRYSTAL_FREQUENCY,
            command::MASTER_CONTROL,
        ]
    );

    // registration goes out on the broadcast host, everything after on the assigned one
    assert_eq!(written[0][3], 0xFF);
    assert_eq!(&written[0][6..11], b"Bench");
    assert!(written[1..].iter().all(|frame| frame[3] == HOST));
    assert_eq!(written[4][6], 0x01);
    assert_eq!(written[12][6], 0x00);
    assert_eq!(&written[8][7..15], &87.5f64.to_be_bytes());
}

#[test]
fn host_not_registered_fault() {
    let mut adapter = MockAdapter::new();
    adapter.queue_response(answer(command::THICKNESS, &[0x01, 0x96]));
    let mut driver = Tmc13::new(adapter);

    match driver.get_thickness() {
        Err(DaqError::DeviceFault(fault)) => {
            assert_eq!(fault, DeviceFault::HostNotRegistered);
            assert_eq!(fault.to_string(), "Host not known and not registered");
        }
        other => panic!("expected fault, got {:?}", other),
    }
}

#[test]
fn setter_fault_is_reported_and_transport_drained() {
    let mut adapter = MockAdapter::new();
    adapter.queue_response(answer(command::DENSITY.write(), &[0x01, 0x91]));
    let mut driver = Tmc13::new(adapter);

    assert!(matches!(
        driver.set_material_density(99.0),
        Err(DaqError::DeviceFault(DeviceFault::ValueTooLarge))
    ));
    assert_eq!(driver.link_mut().adapter_mut().in_waiting().unwrap(), 0);
}

#[test]
fn checksum_mismatch_is_fatal() {
    let mut bad = answer(command::RATE, &channel_double(1, 1.0));
    let last = bad.len() - 1;
    bad[last] = bad[last].wrapping_add(1);
    let mut adapter = MockAdapter::new();
    adapter.queue_response(bad);
    let mut driver = Tmc13::new(adapter);

    assert!(matches!(driver.get_rate(), Err(DaqError::Checksum { .. })));
}

#[test]
fn residual_bytes_do_not_leak_into_next_command() {
    let mut adapter = MockAdapter::new();
    queue_connect(&mut adapter);
    let mut noisy = answer(command::THICKNESS, &channel_double(1, 10.0));
    noisy.extend_from_slice(&[0x00, 0x01]);
    adapter
        .queue_response(noisy)
        .queue_response(answer(command::MASTER_CONTROL, &[0x00]));
    let mut driver = Tmc13::new(adapter);

    driver.connect().unwrap();
    assert!(matches!(driver.get_thickness(), Err(DaqError::Framing { .. })));
    assert_eq!(driver.link_mut().adapter_mut().in_waiting().unwrap(), 0);

    // master is still released cleanly
    driver.disconnect().unwrap();
    assert_eq!(driver.state(), InstrumentState::Disconnected);
    assert_eq!(driver.link().adapter().pending_responses(), 0);
}

#[test]
fn failed_master_assignment_aborts_connect() {
    let mut adapter = MockAdapter::new();
    adapter
        .queue_response(answer(command::HOST, &[HOST]))
        .queue_response(answer(command::SERIAL_NUMBER, b"1"))
        .queue_response(answer(command::PRODUCT_NUMBER, b"2"))
        .queue_response(answer(command::DEVICE_VERSION, b"3"))
        .queue_response(answer(command::MASTER_CONTROL, &[0x01]));
    let mut driver = Tmc13::new(adapter);

    assert!(matches!(driver.connect(), Err(DaqError::Instrument(_))));
    assert_eq!(driver.state(), InstrumentState::Disconnected);
    // nothing to release
    driver.disconnect().unwrap();
    assert_eq!(driver.link().adapter().written().len(), 5);
}

#[test]
fn shutter_sweep() {
    let mut adapter = MockAdapter::new();
    adapter
        .queue_response(answer(command::HOST, &[HOST]))
        .queue_response(answer(command::MASTER_CONTROL, &[0x00]))
        .queue_response(answer(command::MASTER_STATUS, &[0b01101]))
        // configure: start closed
        .queue_response(answer(command::SHUTTER.write(), &[0x03, 0x00]))
        // apply open, then read back
        .queue_response(answer(command::SHUTTER.write(), &[0x03, 0x00]))
        .queue_response(answer(command::SHUTTER, &[0x03, 0x01]))
        // unconfigure: end open
        .queue_response(answer(command::SHUTTER.write(), &[0x03, 0x00]))
        .queue_response(answer(command::MASTER_CONTROL, &[0x00]));

    let mut shutter = Tmc13Shutter::new(adapter);
    let mut parameters = GuiParameters::defaults(&shutter.gui_parameters());
    parameters
        .insert("Channel", "3")
        .insert("State at start", "Closed")
        .insert("State at end", "Open");
    shutter.apply_gui_parameters(&parameters).unwrap();

    shutter.connect().unwrap();
    shutter.initialize().unwrap();
    shutter.configure().unwrap();
    shutter.apply(&ParameterValue::from("Open")).unwrap();
    let sample = shutter.call().unwrap();
    assert_eq!(sample.values, vec![1.0]);
    shutter.unconfigure().unwrap();
    shutter.disconnect().unwrap();

    let written = shutter.link().adapter().written();
    assert_eq!(written.len(), 8);
    assert_eq!(&written[3][6..8], &[0x03, ShutterState::Closed.code()]);
    assert_eq!(&written[4][6..8], &[0x03, ShutterState::Open.code()]);
    assert_eq!(&written[6][6..8], &[0x03, ShutterState::Open.code()]);
}
