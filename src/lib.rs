//! Metal-powder bottle tracking on top of the R200 UHF RFID module.
//!
//! The crate decodes the module's serial stream into tag reports, keeps a
//! deduplicated table of the bottles in range, logs every individual read for
//! CSV export, and runs the "hold the bottle still" registration workflow that
//! binds a human-readable name to a tag.
//!
//! # Features
//!
//! - `uart-esp32` - UART transport for ESP32 using esp-idf-svc
//! - `serial` - Serial port transport for desktop using serialport crate
//!
//! # Example
//!
//! ```ignore
//! use powder_rfid::{MemoryNameStore, SerialTransport, Station};
//!
//! let transport = SerialTransport::new("/dev/ttyUSB0", 115200)?;
//! let mut station = Station::new(transport, MemoryNameStore::new());
//! station.initialize()?;
//! station.start()?;
//!
//! loop {
//!     for read in station.poll()? {
//!         println!("{} at {} dBm", read.report.epc, read.report.rssi);
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! ```

pub mod codec;
pub mod config;
pub mod history;
pub mod names;
pub mod registration;
pub mod registry;
pub mod report;
mod station;
mod transport;
mod types;

#[cfg(feature = "uart-esp32")]
mod uart;

#[cfg(feature = "serial")]
mod serial;

// Re-exports
pub use codec::{Command, Frame, FrameDecoder, encode_command};
pub use config::StationConfig;
pub use history::{HistoryEntry, HistoryLog};
pub use names::{JsonFileNameStore, MemoryNameStore, NameStore};
pub use registration::{Registration, RegistrationState};
pub use registry::{RegistryEvent, TagRecord, TagRegistry};
pub use report::{Notice, TagReport};
pub use station::{HistoryReport, Ingested, Station, StationStatus, TagRow};
pub use transport::RfidTransport;
pub use types::TrackerError;

#[cfg(feature = "uart-esp32")]
pub use uart::UartTransport;

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Duration;

    /// Mock transport serving queued chunks, one per read, and recording writes
    #[derive(Clone, Default)]
    struct MockTransport {
        incoming: Rc<RefCell<VecDeque<Vec<u8>>>>,
        written: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl MockTransport {
        fn push(&self, bytes: Vec<u8>) {
            self.incoming.borrow_mut().push_back(bytes);
        }

        fn written(&self) -> Vec<Vec<u8>> {
            self.written.borrow().clone()
        }
    }

    impl RfidTransport for MockTransport {
        type Error = std::io::Error;

        fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
            self.written.borrow_mut().push(data.to_vec());
            Ok(data.len())
        }

        fn read(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<usize, Self::Error> {
            let mut incoming = self.incoming.borrow_mut();
            let Some(mut chunk) = incoming.pop_front() else {
                return Ok(0);
            };
            let len = chunk.len().min(buf.len());
            buf[..len].copy_from_slice(&chunk[..len]);
            if len < chunk.len() {
                incoming.push_front(chunk.split_off(len));
            }
            Ok(len)
        }

        fn clear_input(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    /// Transport that serves queued chunks, then fails every read
    struct FailingAfterTransport {
        chunks: VecDeque<Vec<u8>>,
    }

    impl RfidTransport for FailingAfterTransport {
        type Error = std::io::Error;

        fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
            Ok(data.len())
        }

        fn read(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<usize, Self::Error> {
            let chunk = self
                .chunks
                .pop_front()
                .ok_or_else(|| std::io::Error::other("port unplugged"))?;
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }

        fn clear_input(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    /// Transport whose writes always fail
    struct BrokenTransport;

    impl RfidTransport for BrokenTransport {
        type Error = std::io::Error;

        fn write(&mut self, _data: &[u8]) -> Result<usize, Self::Error> {
            Err(std::io::Error::other("port unplugged"))
        }

        fn read(&mut self, _buf: &mut [u8], _timeout_ms: u32) -> Result<usize, Self::Error> {
            Err(std::io::Error::other("port unplugged"))
        }

        fn clear_input(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    const EPC_A: [u8; 12] = [
        0x30, 0x75, 0x1F, 0xEB, 0x70, 0x5C, 0x59, 0x04, 0xE3, 0xD5, 0x0D, 0x70,
    ];
    const EPC_B: [u8; 12] = [
        0xE2, 0x00, 0x68, 0x16, 0x00, 0x00, 0x00, 0x60, 0x12, 0x34, 0x56, 0x78,
    ];
    const EPC_A_HEX: &str = "30751FEB705C5904E3D50D70";
    const EPC_B_HEX: &str = "E20068160000006012345678";

    /// Tag report frame as emitted by the module during multi-polling
    fn tag_frame(epc: &[u8; 12], rssi_raw: u8) -> Vec<u8> {
        let mut frame = vec![0xAA, 0x02, 0x22, 0x00, 0x11, rssi_raw, 0x34, 0x00];
        frame.extend_from_slice(epc);
        frame.extend_from_slice(&[0x3A, 0x76]);
        frame.push(codec::checksum(&frame[1..]));
        frame.push(0xDD);
        frame
    }

    fn station() -> (Station<MockTransport, MemoryNameStore>, MockTransport) {
        station_with(&StationConfig::default())
    }

    fn station_with(config: &StationConfig) -> (Station<MockTransport, MemoryNameStore>, MockTransport) {
        let transport = MockTransport::default();
        let mut station = Station::with_config(transport.clone(), MemoryNameStore::new(), config);
        station.set_command_gap(Duration::ZERO);
        (station, transport)
    }

    // ===================
    // ingestion tests
    // ===================

    #[test]
    fn test_poll_idle_transport_is_not_an_error() {
        let (mut station, _) = station();
        assert!(station.poll().unwrap().is_empty());
    }

    #[test]
    fn test_poll_ingests_tag_reports() {
        let (mut station, transport) = station();
        transport.push(tag_frame(&EPC_A, 0xC9));

        let reads = station.poll().unwrap();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].report.epc, EPC_A_HEX);
        assert_eq!(reads[0].report.rssi, -55);
        assert_eq!(reads[0].registry, RegistryEvent::NewTag(0));
        assert!(reads[0].history_logged);
        assert_eq!(reads[0].registration, None);

        let status = station.status();
        assert_eq!(status.tag_count, 1);
        assert_eq!(status.last_tag, EPC_A_HEX);
        assert_eq!(status.history_count, 1);
        assert_eq!(status.bytes_received, 24);
    }

    #[test]
    fn test_frames_split_across_reads_are_reassembled() {
        let (mut station, transport) = station();
        let mut stream = tag_frame(&EPC_A, 0xC0);
        stream.extend(tag_frame(&EPC_B, 0xB0));
        for chunk in stream.chunks(5) {
            transport.push(chunk.to_vec());
        }

        let epcs: Vec<String> = station
            .poll()
            .unwrap()
            .into_iter()
            .map(|read| read.report.epc)
            .collect();
        assert_eq!(epcs, [EPC_A_HEX, EPC_B_HEX]);
    }

    #[test]
    fn test_repeated_reads_dedup_but_all_reach_history() {
        let (mut station, transport) = station();
        for _ in 0..6 {
            transport.push(tag_frame(&EPC_A, 0xC9));
        }
        transport.push(tag_frame(&EPC_B, 0xB4));

        station.poll().unwrap();
        let status = station.status();
        assert_eq!(status.tag_count, 2);
        assert_eq!(status.tags[0].cnt, 6);
        assert_eq!(status.tags[0].no, 1);
        assert_eq!(status.tags[1].epc, EPC_B_HEX);
        assert_eq!(status.tags[1].rssi, -76);
        assert_eq!(station.history().count, 7);
    }

    #[test]
    fn test_full_registry_still_logs_history() {
        let config = StationConfig {
            registry_capacity: 1,
            ..StationConfig::default()
        };
        let (mut station, transport) = station_with(&config);
        transport.push(tag_frame(&EPC_A, 0xC9));
        transport.push(tag_frame(&EPC_B, 0xC9));

        let reads = station.poll().unwrap();
        assert_eq!(reads[1].registry, RegistryEvent::Dropped);
        assert!(reads[1].history_logged);
        assert_eq!(station.status().tag_count, 1);

        let history = station.history();
        assert_eq!(history.readings[1].epc, EPC_B_HEX);
        assert_eq!(history.readings[1].bottle_name, "");
    }

    #[test]
    fn test_full_history_reported_not_fatal() {
        let config = StationConfig {
            history_capacity: 2,
            ..StationConfig::default()
        };
        let (mut station, transport) = station_with(&config);
        for _ in 0..3 {
            transport.push(tag_frame(&EPC_A, 0xC9));
        }

        let logged: Vec<bool> = station.poll().unwrap().iter().map(|r| r.history_logged).collect();
        assert_eq!(logged, [true, true, false]);
        assert_eq!(station.registry().get(EPC_A_HEX).unwrap().read_count, 3);
    }

    #[test]
    fn test_history_names_only_previously_tracked_tags() {
        let (mut station, transport) = station();
        station.rename(EPC_A_HEX, "Ti64 lot 12").unwrap();
        transport.push(tag_frame(&EPC_A, 0xC9));
        transport.push(tag_frame(&EPC_A, 0xC9));
        transport.push(tag_frame(&EPC_B, 0xC9));

        station.poll().unwrap();
        let names: Vec<String> = station
            .history()
            .readings
            .into_iter()
            .map(|r| r.bottle_name)
            .collect();
        // First sighting is logged before the tag is tracked.
        assert_eq!(names, ["", "Ti64 lot 12", ""]);
        assert_eq!(station.status().tags[0].name, "Ti64 lot 12");
    }

    #[test]
    fn test_noise_and_notifications_are_not_tag_reads() {
        let (mut station, transport) = station();
        transport.push(vec![0xAA, 0x01, 0xB7, 0x00, 0x02, 0x0B, 0xB8, 0x7D, 0xDD]);
        transport.push(vec![0xAA, 0x01, 0xFF, 0x00, 0x01, 0x15, 0x16, 0xDD]);
        transport.push(vec![0xAA, 0x02, 0x22, 0x00, 0x03, 0xC9, 0x00, 0xDD]);

        assert!(station.poll().unwrap().is_empty());
        assert_eq!(station.reported_power(), Some(3000));
        assert_eq!(station.history().count, 0);
    }

    #[test]
    fn test_module_info_notices_are_recorded() {
        let (mut station, transport) = station();
        transport.push(vec![0xAA, 0x01, 0x03, 0x00, 0x04, 0x00, b'V', b'2', b'1', 0x00, 0xDD]);
        transport.push(vec![0xAA, 0x01, 0x03, 0x00, 0x04, 0x01, b'V', b'3', b'0', 0x00, 0xDD]);

        station.poll().unwrap();
        assert_eq!(station.hardware_version(), Some("V21"));
        assert_eq!(station.software_version(), Some("V30"));
    }

    #[test]
    fn test_poll_propagates_transport_failure() {
        let mut station = Station::new(BrokenTransport, MemoryNameStore::new());
        assert!(matches!(station.poll(), Err(TrackerError::Transport(_))));
    }

    #[test]
    fn test_reads_booked_before_transport_failure_stay_applied() {
        let transport = FailingAfterTransport {
            chunks: VecDeque::from([tag_frame(&EPC_A, 0xC9)]),
        };
        let mut station = Station::new(transport, MemoryNameStore::new());

        assert!(matches!(station.poll(), Err(TrackerError::Transport(_))));
        assert_eq!(station.registry().len(), 1);
        assert_eq!(station.history().count, 1);
        assert_eq!(station.status().last_tag, EPC_A_HEX);
    }

    // ===================
    // command tests
    // ===================

    #[test]
    fn test_initialize_sends_startup_sequence() {
        let (mut station, transport) = station();
        station.initialize().unwrap();

        assert_eq!(
            transport.written(),
            [
                Command::HardwareVersion.encode(),
                Command::SoftwareVersion.encode(),
                Command::SetPower(3000).encode(),
                Command::GetPower.encode(),
            ]
        );
    }

    #[test]
    fn test_start_stop_toggle_scanning() {
        let (mut station, transport) = station();
        station.start().unwrap();
        assert!(station.status().scanning);
        station.stop().unwrap();
        assert!(!station.is_scanning());

        assert_eq!(
            transport.written(),
            [Command::StartPolling.encode(), Command::StopPolling.encode()]
        );
    }

    #[test]
    fn test_set_power_updates_status_and_module() {
        let (mut station, transport) = station();
        station.set_power(2600).unwrap();
        assert_eq!(station.status().power, 2600);
        assert_eq!(
            transport.written(),
            [vec![0xAA, 0x00, 0xB6, 0x00, 0x02, 0x0A, 0x28, 0xEA, 0xDD]]
        );
    }

    #[test]
    fn test_failed_start_leaves_scanning_off() {
        let mut station = Station::new(BrokenTransport, MemoryNameStore::new());
        station.set_command_gap(Duration::ZERO);
        assert!(matches!(station.start(), Err(TrackerError::Transport(_))));
        assert!(!station.is_scanning());
    }

    #[test]
    fn test_failed_set_power_keeps_previous_power() {
        let mut station = Station::new(BrokenTransport, MemoryNameStore::new());
        station.set_command_gap(Duration::ZERO);
        let before = station.status().power;

        assert!(matches!(station.set_power(1500), Err(TrackerError::Transport(_))));
        assert_eq!(station.status().power, before);
    }

    #[test]
    fn test_single_poll_and_query_power() {
        let (mut station, transport) = station();
        station.single_poll().unwrap();
        station.query_power().unwrap();
        assert_eq!(
            transport.written(),
            [Command::SinglePoll.encode(), Command::GetPower.encode()]
        );
    }

    // ===================
    // clear tests
    // ===================

    #[test]
    fn test_clear_resets_registry_and_history_but_keeps_names() {
        let (mut station, transport) = station();
        station.rename(EPC_A_HEX, "Cu").unwrap();
        transport.push(tag_frame(&EPC_A, 0xC9));
        station.poll().unwrap();

        station.clear();
        let status = station.status();
        assert_eq!(status.tag_count, 0);
        assert_eq!(status.history_count, 0);
        assert_eq!(status.last_tag, "No tags detected yet");
        assert_eq!(station.names().get(EPC_A_HEX).as_deref(), Some("Cu"));

        transport.push(tag_frame(&EPC_A, 0xC9));
        let reads = station.poll().unwrap();
        assert_eq!(reads[0].registry, RegistryEvent::NewTag(0));
        assert_eq!(station.status().tags[0].name, "Cu");
    }

    // ===================
    // registration tests
    // ===================

    #[test]
    fn test_register_start_begins_scanning() {
        let (mut station, transport) = station();
        station.register_start().unwrap();

        let status = station.status();
        assert!(status.registration_mode);
        assert!(status.scanning);
        assert_eq!(transport.written(), [Command::StartPolling.encode()]);

        // Already scanning: no second start command.
        station.register_start().unwrap();
        assert_eq!(transport.written().len(), 1);
    }

    #[test]
    fn test_registration_flow_names_bottle() {
        let (mut station, transport) = station();
        station.register_start().unwrap();
        for _ in 0..5 {
            transport.push(tag_frame(&EPC_A, 0xC9));
        }

        let reads = station.poll().unwrap();
        assert_eq!(
            reads[4].registration,
            Some(RegistrationState::Ready {
                epc: EPC_A_HEX.into(),
                count: 5
            })
        );
        let status = station.status();
        assert!(status.registration_ready);
        assert_eq!(status.registration_epc, EPC_A_HEX);
        assert_eq!(status.registration_progress, 5);

        // Registration does not suppress normal bookkeeping.
        assert_eq!(status.tags[0].cnt, 5);
        assert_eq!(status.history_count, 5);

        let named = station.register_confirm("AlSi10Mg", EPC_A_HEX).unwrap();
        assert_eq!(named, EPC_A_HEX);
        assert_eq!(station.names().get(EPC_A_HEX).as_deref(), Some("AlSi10Mg"));
        assert_eq!(station.status().tags[0].name, "AlSi10Mg");
        assert!(!station.status().registration_mode);
    }

    #[test]
    fn test_interfering_tag_restarts_registration() {
        let (mut station, transport) = station();
        station.register_start().unwrap();
        transport.push(tag_frame(&EPC_A, 0xC9));
        transport.push(tag_frame(&EPC_B, 0xC9));
        for _ in 0..4 {
            transport.push(tag_frame(&EPC_A, 0xC9));
        }
        station.poll().unwrap();
        assert!(!station.registration().is_ready());
        assert_eq!(station.status().registration_progress, 4);

        transport.push(tag_frame(&EPC_A, 0xC9));
        station.poll().unwrap();
        assert!(station.registration().is_ready());
    }

    #[test]
    fn test_confirm_before_ready_is_rejected() {
        let (mut station, transport) = station();
        station.register_start().unwrap();
        for _ in 0..3 {
            transport.push(tag_frame(&EPC_A, 0xC9));
        }
        station.poll().unwrap();

        assert!(matches!(
            station.register_confirm("Cu", EPC_A_HEX),
            Err(TrackerError::NotReady)
        ));
        assert!(station.names().is_empty());
        assert_eq!(station.status().registration_progress, 3);
    }

    #[test]
    fn test_confirm_for_wrong_tag_is_rejected() {
        let (mut station, transport) = station();
        station.register_start().unwrap();
        for _ in 0..5 {
            transport.push(tag_frame(&EPC_A, 0xC9));
        }
        station.poll().unwrap();

        assert!(matches!(
            station.register_confirm("Cu", EPC_B_HEX),
            Err(TrackerError::EpcMismatch { .. })
        ));
        assert!(matches!(
            station.register_confirm("", EPC_A_HEX),
            Err(TrackerError::EmptyName)
        ));
        assert!(station.names().is_empty());
        assert!(station.registration().is_ready());
    }

    #[test]
    fn test_cancel_ends_registration() {
        let (mut station, transport) = station();
        station.register_start().unwrap();
        transport.push(tag_frame(&EPC_A, 0xC9));
        station.poll().unwrap();

        station.register_cancel();
        let status = station.status();
        assert!(!status.registration_mode);
        assert_eq!(status.registration_epc, "");
        assert_eq!(status.registration_progress, 0);
        // Scanning continues after cancel.
        assert!(status.scanning);
    }

    #[test]
    fn test_rename_validates_input() {
        let (mut station, _) = station();
        assert!(matches!(station.rename(EPC_A_HEX, " "), Err(TrackerError::EmptyName)));
        assert!(matches!(
            station.rename("", "Cu"),
            Err(TrackerError::InvalidParameter(_))
        ));

        station.rename(&EPC_A_HEX.to_lowercase(), "Cu").unwrap();
        assert_eq!(station.names().get(EPC_A_HEX).as_deref(), Some("Cu"));
    }

    // ===================
    // export tests
    // ===================

    #[test]
    fn test_status_json_uses_page_field_names() {
        let (mut station, transport) = station();
        transport.push(tag_frame(&EPC_A, 0xC9));
        station.poll().unwrap();

        let json: serde_json::Value = serde_json::from_str(&station.status_json().unwrap()).unwrap();
        assert_eq!(json["scanning"], false);
        assert_eq!(json["tagCount"], 1);
        assert_eq!(json["power"], 3000);
        assert_eq!(json["registrationEPC"], "");
        assert_eq!(json["historyCount"], 1);
        assert_eq!(json["tags"][0]["epc"], EPC_A_HEX);
        assert_eq!(json["tags"][0]["pc"], "3400");
        assert_eq!(json["tags"][0]["crc"], "3A76");
        assert_eq!(json["tags"][0]["rssi"], -55);
        assert_eq!(json["tags"][0]["ant"], 1);
    }

    #[test]
    fn test_history_json_and_csv() {
        let (mut station, transport) = station();
        transport.push(tag_frame(&EPC_B, 0xB4));
        station.poll().unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&station.history_json().unwrap()).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["readings"][0]["epc"], EPC_B_HEX);
        assert_eq!(json["readings"][0]["rssi"], -76);
        assert_eq!(json["readings"][0]["name"], "");

        let mut csv = Vec::new();
        station.write_history_csv(&mut csv, "Lab").unwrap();
        let text = String::from_utf8(csv).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert!(row.starts_with("Lab,1,"));
        assert!(row.ends_with(",Unregistered,E20068160000006012345678,-76"));
    }
}
