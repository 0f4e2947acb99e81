//! The powder station: one owned object holding every piece of tracking
//! state, driven by the ingestion loop and by operator requests.
//!
//! All mutation goes through `&mut Station`, so a single report updates the
//! registry and the history log as one unit. Hosts that serve requests from
//! another thread wrap the station in one `Mutex`.

use std::io::Write;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

use crate::codec::{Command, Frame, FrameDecoder};
use crate::config::StationConfig;
use crate::history::{HistoryEntry, HistoryLog};
use crate::names::NameStore;
use crate::registration::{Registration, RegistrationState};
use crate::registry::{RegistryEvent, TagRecord, TagRegistry};
use crate::report::{Notice, TagReport, parse_notice};
use crate::transport::RfidTransport;
use crate::types::{TrackerError, bytes_to_hex};

const NO_TAG_YET: &str = "No tags detected yet";

/// Pause after each command so the module can digest it
const DEFAULT_COMMAND_GAP: Duration = Duration::from_millis(50);

/// Upper bound on transport reads per tick while data keeps arriving
const MAX_READS_PER_POLL: usize = 16;

/// What happened to one tag report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub report: TagReport,
    pub registry: RegistryEvent,
    /// False once the history log is full
    pub history_logged: bool,
    /// Registration state after this read, if a session is active
    pub registration: Option<RegistrationState>,
}

/// One row of the tag table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagRow {
    pub no: usize,
    pub pc: String,
    pub epc: String,
    pub crc: String,
    pub rssi: i16,
    pub cnt: u32,
    pub ant: u8,
    pub name: String,
}

impl TagRow {
    fn new(index: usize, record: &TagRecord) -> Self {
        Self {
            no: index + 1,
            pc: record.protocol_control.clone(),
            epc: record.epc.clone(),
            crc: record.crc.clone(),
            rssi: record.rssi,
            cnt: record.read_count,
            ant: record.antenna_id,
            name: record.friendly_name.clone(),
        }
    }
}

/// Snapshot served to the operator page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationStatus {
    pub scanning: bool,
    pub tag_count: usize,
    /// Requested transmit power, hundredths of a dBm
    pub power: i16,
    /// Power last reported by the module
    pub reported_power: Option<i16>,
    pub last_tag: String,
    pub registration_mode: bool,
    #[serde(rename = "registrationEPC")]
    pub registration_epc: String,
    pub registration_progress: u32,
    pub registration_threshold: u32,
    pub registration_ready: bool,
    pub history_count: usize,
    pub bytes_received: u64,
    pub tags: Vec<TagRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryReport {
    pub count: usize,
    pub readings: Vec<HistoryEntry>,
}

pub struct Station<T: RfidTransport, N: NameStore> {
    transport: T,
    names: N,
    decoder: FrameDecoder,
    registry: TagRegistry,
    history: HistoryLog,
    registration: Registration,
    scanning: bool,
    power: i16,
    reported_power: Option<i16>,
    hardware_version: Option<String>,
    software_version: Option<String>,
    last_tag: Option<String>,
    bytes_received: u64,
    started: Instant,
    command_gap: Duration,
}

impl<T: RfidTransport, N: NameStore> Station<T, N> {
    /// Station with default capacities
    pub fn new(transport: T, names: N) -> Self {
        Self::with_config(transport, names, &StationConfig::default())
    }

    pub fn with_config(transport: T, names: N, config: &StationConfig) -> Self {
        Self {
            transport,
            names,
            decoder: FrameDecoder::new(config.frame_capacity),
            registry: TagRegistry::new(config.registry_capacity),
            history: HistoryLog::new(config.history_capacity),
            registration: Registration::new(config.confirm_threshold),
            scanning: false,
            power: config.power,
            reported_power: None,
            hardware_version: None,
            software_version: None,
            last_tag: None,
            bytes_received: 0,
            started: Instant::now(),
            command_gap: DEFAULT_COMMAND_GAP,
        }
    }

    pub fn set_command_gap(&mut self, gap: Duration) {
        self.command_gap = gap;
    }

    /// Query module info and apply the configured transmit power
    pub fn initialize(&mut self) -> Result<(), TrackerError> {
        self.transport
            .clear_input()
            .map_err(|e| TrackerError::Transport(format!("{:?}", e)))?;
        self.send(Command::HardwareVersion)?;
        self.send(Command::SoftwareVersion)?;
        self.send(Command::SetPower(self.power))?;
        self.send(Command::GetPower)?;
        info!("R200 initialization complete");
        Ok(())
    }

    // ===================
    // Ingestion
    // ===================

    /// Drain whatever the transport has buffered and process every completed frame.
    ///
    /// Never waits for data; an idle transport yields an empty result. Reports
    /// booked before a transport failure stay applied and are logged.
    pub fn poll(&mut self) -> Result<Vec<Ingested>, TrackerError> {
        let mut ingested: Vec<Ingested> = Vec::new();
        let mut buf = [0u8; 256];

        for _ in 0..MAX_READS_PER_POLL {
            let bytes_read = match self.transport.read_available(&mut buf) {
                Ok(n) => n,
                Err(e) => {
                    for read in &ingested {
                        warn!(
                            "Read failed after booking {} ({} dBm) this tick",
                            read.report.epc, read.report.rssi
                        );
                    }
                    return Err(TrackerError::Transport(format!("{:?}", e)));
                }
            };
            if bytes_read == 0 {
                break;
            }
            self.bytes_received += bytes_read as u64;

            for &byte in &buf[..bytes_read] {
                if let Some(frame) = self.decoder.feed(byte) {
                    ingested.extend(self.process_frame(&frame));
                }
            }
        }
        Ok(ingested)
    }

    /// Route one decoded frame; returns the outcome if it was a tag report
    pub fn process_frame(&mut self, frame: &Frame) -> Option<Ingested> {
        if let Some(report) = TagReport::parse(frame) {
            return Some(self.ingest(report));
        }
        if let Some(notice) = parse_notice(frame) {
            self.apply_notice(notice);
        }
        None
    }

    /// Book one tag report: registration first, then registry and history.
    pub fn ingest(&mut self, report: TagReport) -> Ingested {
        let now = self.now_ms();

        let registration = self
            .registration
            .is_active()
            .then(|| self.registration.observe(&report.epc).clone());
        if registration.is_none() {
            debug!("Tag detected: {} ({} dBm)", report.epc, report.rssi);
        }

        // Only tags tracked before this read carry a name into history; a
        // first sighting is logged unnamed.
        let event = self.registry.observe(&report, &self.names, now);
        let name = match event {
            RegistryEvent::UpdatedTag(index) => self
                .registry
                .record(index)
                .map(|r| r.friendly_name.as_str())
                .unwrap_or_default(),
            RegistryEvent::NewTag(_) | RegistryEvent::Dropped => "",
        };
        let entry = self.history.entry(&report.epc, name, report.rssi, now);
        let history_logged = self.history.append(entry);

        self.last_tag = Some(report.epc.clone());
        Ingested {
            report,
            registry: event,
            history_logged,
            registration,
        }
    }

    fn apply_notice(&mut self, notice: Notice) {
        match notice {
            Notice::Power(centi_dbm) => {
                info!("Module reports transmit power {:.2} dBm", centi_dbm as f32 / 100.0);
                self.reported_power = Some(centi_dbm);
            }
            Notice::ModuleInfo { kind: 0x00, text } => {
                info!("Hardware version: {}", text);
                self.hardware_version = Some(text);
            }
            Notice::ModuleInfo { kind, text } => {
                info!("Software version (0x{:02X}): {}", kind, text);
                self.software_version = Some(text);
            }
            Notice::PowerSet { status } if status != 0 => {
                warn!("Module rejected transmit power (status 0x{:02X})", status)
            }
            Notice::PollingStopped { status } if status != 0 => {
                warn!("Module failed to stop polling (status 0x{:02X})", status)
            }
            Notice::Error { code: 0x15 } => debug!("Inventory round found no tag"),
            Notice::Error { code } => warn!("Module error 0x{:02X}", code),
            Notice::PowerSet { .. } | Notice::PollingStopped { .. } => {}
        }
    }

    // ===================
    // Operator API
    // ===================

    pub fn status(&self) -> StationStatus {
        StationStatus {
            scanning: self.scanning,
            tag_count: self.registry.len(),
            power: self.power,
            reported_power: self.reported_power,
            last_tag: self.last_tag.clone().unwrap_or_else(|| NO_TAG_YET.to_string()),
            registration_mode: self.registration.is_active(),
            registration_epc: self.registration.target().unwrap_or_default().to_string(),
            registration_progress: self.registration.progress(),
            registration_threshold: self.registration.threshold(),
            registration_ready: self.registration.is_ready(),
            history_count: self.history.len(),
            bytes_received: self.bytes_received,
            tags: self
                .registry
                .records()
                .iter()
                .enumerate()
                .map(|(index, record)| TagRow::new(index, record))
                .collect(),
        }
    }

    pub fn history(&self) -> HistoryReport {
        HistoryReport {
            count: self.history.len(),
            readings: self.history.export(),
        }
    }

    pub fn status_json(&self) -> Result<String, TrackerError> {
        serde_json::to_string(&self.status()).map_err(|e| TrackerError::Export(e.to_string()))
    }

    pub fn history_json(&self) -> Result<String, TrackerError> {
        serde_json::to_string(&self.history()).map_err(|e| TrackerError::Export(e.to_string()))
    }

    pub fn write_history_csv<W: Write>(&self, writer: W, location: &str) -> Result<(), TrackerError> {
        self.history.write_csv(writer, location)
    }

    /// Start continuous multi-tag polling
    pub fn start(&mut self) -> Result<(), TrackerError> {
        self.send(Command::StartPolling)?;
        self.scanning = true;
        info!(">>> Scanning STARTED <<<");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), TrackerError> {
        self.send(Command::StopPolling)?;
        self.scanning = false;
        info!(">>> Scanning STOPPED <<<");
        Ok(())
    }

    /// Trigger one inventory round
    pub fn single_poll(&mut self) -> Result<(), TrackerError> {
        self.send(Command::SinglePoll)
    }

    /// Set transmit power in hundredths of a dBm
    pub fn set_power(&mut self, centi_dbm: i16) -> Result<(), TrackerError> {
        self.send(Command::SetPower(centi_dbm))?;
        self.power = centi_dbm;
        info!("Power set to {:.2} dBm", centi_dbm as f32 / 100.0);
        Ok(())
    }

    /// Ask the module for its current transmit power
    pub fn query_power(&mut self) -> Result<(), TrackerError> {
        self.send(Command::GetPower)
    }

    /// Forget all tags and reads; registered names are kept
    pub fn clear(&mut self) {
        self.registry.reset();
        self.history.reset(self.now_ms());
        self.last_tag = None;
        info!("Tag database and history cleared");
    }

    /// Open a registration session, starting the scan if needed
    pub fn register_start(&mut self) -> Result<(), TrackerError> {
        self.registration.start();
        if !self.scanning {
            self.start()?;
        }
        Ok(())
    }

    pub fn register_cancel(&mut self) {
        self.registration.cancel();
    }

    /// Name the confirmed tag. An empty `epc` means "whatever is confirmed".
    pub fn register_confirm(&mut self, name: &str, epc: &str) -> Result<String, TrackerError> {
        let registry = &mut self.registry;
        let names = &mut self.names;
        self.registration
            .confirm(name, Some(epc), |epc, name| registry.rename(epc, name, names))
    }

    /// Name any tag directly, tracked or not
    pub fn rename(&mut self, epc: &str, name: &str) -> Result<(), TrackerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TrackerError::EmptyName);
        }
        let epc = epc.trim().to_ascii_uppercase();
        if epc.is_empty() {
            return Err(TrackerError::InvalidParameter("EPC must not be empty".into()));
        }
        self.registry.rename(&epc, name, &mut self.names)
    }

    // ===================
    // Accessors
    // ===================

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    pub fn history_log(&self) -> &HistoryLog {
        &self.history
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn names(&self) -> &N {
        &self.names
    }

    pub fn hardware_version(&self) -> Option<&str> {
        self.hardware_version.as_deref()
    }

    pub fn software_version(&self) -> Option<&str> {
        self.software_version.as_deref()
    }

    pub fn reported_power(&self) -> Option<i16> {
        self.reported_power
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn send(&mut self, command: Command) -> Result<(), TrackerError> {
        let frame = command.encode();
        debug!("TX {:?}: {}", command, bytes_to_hex(&frame));
        self.transport
            .write(&frame)
            .map_err(|e| TrackerError::Transport(format!("{:?}", e)))?;
        if !self.command_gap.is_zero() {
            std::thread::sleep(self.command_gap);
        }
        Ok(())
    }
}
