mod common;

use std::sync::mpsc;

use common::*;
use zigbee_driver::command::{CommandResponse, CommandResult, NetworkCommand};
use zigbee_driver::network::{NetworkEvent, NetworkState};
use zigbee_driver::settings::MemorySettings;
use zigbee_driver::{DriverError, Status};
use zigbee_model::zcl::{self, AttributeValue, AttributeWrite, DataType, ReportingConfiguration};
use zigbee_model::zdo::BindTarget;
use zigbee_model::ClusterDirection;

fn with_light<F: Firmware>(firmware: F) -> Harness<F> {
    let mut harness = Harness::new(firmware, MemorySettings::new());
    harness.start();
    harness.announce(&SimDevice::light());
    assert!(harness.network.nodes().contains(LIGHT_IEEE));
    harness.take_events();
    harness
}

/// Submit without driving the link; the receiver yields the result later.
fn submit<F: Firmware>(harness: &mut Harness<F>, command: NetworkCommand) -> (Option<u64>, mpsc::Receiver<CommandResult>) {
    let (tx, rx) = mpsc::channel();
    let now = harness.now;
    let id = harness.network.submit(
        now,
        command,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    );
    (id.map(|id| id.0), rx)
}

fn run<F: Firmware>(harness: &mut Harness<F>, command: NetworkCommand) -> CommandResult {
    let (_, rx) = submit(harness, command);
    harness.settle();
    rx.try_recv().expect("callback invoked")
}

fn read_on_off() -> NetworkCommand {
    NetworkCommand::ReadAttributes {
        target: LIGHT_SHORT,
        endpoint: 11,
        cluster: zcl::cluster::ON_OFF,
        attributes: vec![0x0000],
    }
}

fn read_on_off_state<F: Firmware>(mut harness: Harness<F>) {
    harness.world().devices[0]
        .attributes
        .insert((11, zcl::cluster::ON_OFF, 0x0000), (DataType::Bool, AttributeValue::Bool(true)));

    let Ok(CommandResponse::Attributes(records)) = run(&mut harness, read_on_off()) else {
        panic!("expected attribute records");
    };
    assert_eq!(records.len(), 1);
    assert!(records[0].is_success());
    assert_eq!(records[0].value, AttributeValue::Bool(true));

    // The read value is stored on the node
    assert!(harness.take_events().contains(&NetworkEvent::AttributeChanged {
        ieee: LIGHT_IEEE,
        endpoint: 11,
        cluster: zcl::cluster::ON_OFF,
        attribute: 0x0000,
        value: AttributeValue::Bool(true),
    }));
    let node = harness.network.nodes().get(LIGHT_IEEE).unwrap();
    let cluster = node
        .endpoint(11)
        .and_then(|ep| ep.cluster(ClusterDirection::Input, zcl::cluster::ON_OFF))
        .unwrap();
    assert_eq!(cluster.attribute(0x0000).map(|a| &a.value), Some(&AttributeValue::Bool(true)));
}

#[test]
fn test_deconz_read_attributes() {
    read_on_off_state(with_light(DeconzFirmware::new(World::with_devices(vec![SimDevice::light()]))));
}

#[test]
fn test_nxp_read_attributes() {
    read_on_off_state(with_light(NxpFirmware::new(World::with_devices(vec![SimDevice::light()]))));
}

#[test]
fn test_ti_read_attributes() {
    read_on_off_state(with_light(TiFirmware::new(World::with_devices(vec![SimDevice::light()]))));
}

#[test]
fn test_read_unsupported_attribute_reports_status() {
    let mut harness = with_light(DeconzFirmware::new(World::with_devices(vec![SimDevice::light()])));
    let command = NetworkCommand::ReadAttributes {
        target: LIGHT_SHORT,
        endpoint: 11,
        cluster: zcl::cluster::ON_OFF,
        attributes: vec![0x4003],
    };
    let Ok(CommandResponse::Attributes(records)) = run(&mut harness, command) else {
        panic!("expected attribute records");
    };
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, 0x4003);
    assert_eq!(records[0].status, zcl::status::UNSUPPORTED_ATTRIBUTE);
    assert!(!harness
        .take_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::AttributeChanged { .. })));
}

fn write_on_time() -> NetworkCommand {
    NetworkCommand::WriteAttributes {
        target: LIGHT_SHORT,
        endpoint: 11,
        cluster: zcl::cluster::ON_OFF,
        writes: vec![AttributeWrite {
            id: 0x4001,
            data_type: DataType::Uint16,
            value: AttributeValue::Unsigned(300),
        }],
    }
}

#[test]
fn test_deconz_write_attributes() {
    let mut harness = with_light(DeconzFirmware::new(World::with_devices(vec![SimDevice::light()])));
    assert_eq!(run(&mut harness, write_on_time()).unwrap(), CommandResponse::WriteStatus(vec![]));
    assert_eq!(harness.world().count(&format!("write 0x0006 {}", LIGHT_SHORT)), 1);
}

#[test]
fn test_ti_write_attributes() {
    let mut harness = with_light(TiFirmware::new(World::with_devices(vec![SimDevice::light()])));
    assert_eq!(run(&mut harness, write_on_time()).unwrap(), CommandResponse::WriteStatus(vec![]));
}

#[test]
fn test_configure_reporting_returns_rejections() {
    let mut harness = with_light(TiFirmware::new(World::with_devices(vec![SimDevice::light()])));
    let command = NetworkCommand::ConfigureReporting {
        target: LIGHT_SHORT,
        endpoint: 11,
        cluster: zcl::cluster::LEVEL_CONTROL,
        configs: vec![ReportingConfiguration {
            attribute: 0x0000,
            data_type: DataType::Uint8,
            min_interval: 1,
            max_interval: 300,
            reportable_change: Some(AttributeValue::Unsigned(5)),
        }],
    };
    assert_eq!(
        run(&mut harness, command).unwrap(),
        CommandResponse::ReportingStatus(vec![(zcl::status::UNREPORTABLE_ATTRIBUTE, 0x0000)])
    );
    assert_eq!(harness.world().count(&format!("configure 0x0008 {}", LIGHT_SHORT)), 1);
}

fn bind_to_coordinator() -> NetworkCommand {
    NetworkCommand::Bind {
        target: LIGHT_SHORT,
        source: LIGHT_IEEE,
        source_endpoint: 11,
        cluster: zcl::cluster::ON_OFF,
        destination: BindTarget::Device {
            ieee: COORDINATOR_IEEE,
            endpoint: 1,
        },
    }
}

#[test]
fn test_deconz_bind() {
    let mut harness = with_light(DeconzFirmware::new(World::with_devices(vec![SimDevice::light()])));
    assert_eq!(run(&mut harness, bind_to_coordinator()).unwrap(), CommandResponse::Bound);
    assert_eq!(harness.world().count(&format!("zdo 0x0021 {}", LIGHT_SHORT)), 1);
}

#[test]
fn test_ti_bind() {
    let mut harness = with_light(TiFirmware::new(World::with_devices(vec![SimDevice::light()])));
    assert_eq!(run(&mut harness, bind_to_coordinator()).unwrap(), CommandResponse::Bound);
}

#[test]
fn test_nxp_unknown_command_fails() {
    // The simulated NXP firmware does not implement binding
    let mut harness = with_light(NxpFirmware::new(World::with_devices(vec![SimDevice::light()])));
    let err = run(&mut harness, bind_to_coordinator()).unwrap_err();
    assert!(matches!(err, DriverError::Request(_)));
}

fn toggle() -> NetworkCommand {
    let frame = zcl::ZclFrame::new(zcl::ZclHeader::cluster_specific(0x42, 0x02), vec![]);
    NetworkCommand::SendApplicationData {
        target: LIGHT_SHORT,
        endpoint: 11,
        profile: zcl::HOME_AUTOMATION_PROFILE,
        cluster: zcl::cluster::ON_OFF,
        payload: frame.encode(),
    }
}

#[test]
fn test_deconz_send_application_data() {
    let mut harness = with_light(DeconzFirmware::new(World::with_devices(vec![SimDevice::light()])));
    assert_eq!(run(&mut harness, toggle()).unwrap(), CommandResponse::Sent);
    assert_eq!(harness.world().count(&format!("cluster command 0x02 {}", LIGHT_SHORT)), 1);
}

#[test]
fn test_ti_send_application_data() {
    let mut harness = with_light(TiFirmware::new(World::with_devices(vec![SimDevice::light()])));
    assert_eq!(run(&mut harness, toggle()).unwrap(), CommandResponse::Sent);
    assert_eq!(harness.world().count(&format!("cluster command 0x02 {}", LIGHT_SHORT)), 1);
}

#[test]
fn test_ti_rejects_foreign_profile() {
    let mut harness = with_light(TiFirmware::new(World::with_devices(vec![SimDevice::light()])));
    let command = NetworkCommand::SendApplicationData {
        target: LIGHT_SHORT,
        endpoint: 242,
        profile: 0xA1E0,
        cluster: 0x0021,
        payload: vec![0x01, 0x02],
    };
    let (id, rx) = submit(&mut harness, command);
    assert_eq!(id, None);
    assert!(matches!(rx.try_recv().unwrap(), Err(DriverError::Unsupported { .. })));
}

#[test]
fn test_permit_join() {
    let mut deconz = with_light(DeconzFirmware::new(World::with_devices(vec![SimDevice::light()])));
    let command = NetworkCommand::PermitJoin { duration_secs: 60 };
    assert_eq!(run(&mut deconz, command.clone()).unwrap(), CommandResponse::JoinPermitted);

    let mut nxp = with_light(NxpFirmware::new(World::with_devices(vec![SimDevice::light()])));
    assert_eq!(run(&mut nxp, command.clone()).unwrap(), CommandResponse::JoinPermitted);
    assert_eq!(nxp.world().count("permit join"), 1);

    let mut ti = with_light(TiFirmware::new(World::with_devices(vec![SimDevice::light()])));
    assert_eq!(run(&mut ti, command).unwrap(), CommandResponse::JoinPermitted);
    assert_eq!(ti.world().count("permit join"), 1);
}

#[test]
fn test_command_rejected_while_offline() {
    let mut harness = Harness::new(DeconzFirmware::new(World::default()), MemorySettings::new());
    let (id, rx) = submit(&mut harness, read_on_off());
    assert_eq!(id, None);
    assert!(matches!(
        rx.try_recv().unwrap(),
        Err(DriverError::InvalidState(NetworkState::Offline))
    ));
}

#[test]
fn test_unanswered_command_times_out() {
    let mut harness = with_light(DeconzFirmware::new(World::with_devices(vec![SimDevice::light()])));
    harness.world().devices[0].responsive = false;
    let started = harness.now;

    let err = run(&mut harness, read_on_off()).unwrap_err();
    assert!(matches!(err, DriverError::Request(Status::Timeout)));
    assert!(harness.now > started);
}

#[test]
fn test_cancel_queued_command() {
    let mut harness = with_light(DeconzFirmware::new(World::with_devices(vec![SimDevice::light()])));
    let (first, first_rx) = submit(&mut harness, read_on_off());
    let (second, second_rx) = submit(&mut harness, read_on_off());
    assert!(first.is_some());
    let second = zigbee_driver::correlator::RequestId(second.unwrap());

    let now = harness.now;
    assert!(harness.network.cancel(now, second));
    assert!(matches!(
        second_rx.try_recv().unwrap(),
        Err(DriverError::Request(Status::Aborted))
    ));
    // Already finished
    assert!(!harness.network.cancel(now, second));

    harness.settle();
    assert!(matches!(first_rx.try_recv().unwrap(), Ok(CommandResponse::Attributes(_))));
    assert_eq!(harness.world().count(&format!("read 0x0006 {}", LIGHT_SHORT)), 1);
}
