//! Interpretation of decoded frames: tag reports and module notifications

use serde::Serialize;

use crate::codec::{
    ERROR_RESPONSE, Frame, GET_MODULE_INFO, GET_TX_POWER, RESP_TYPE_NOTIFICATION, RESP_TYPE_TAG,
    SET_TX_POWER, SINGLE_POLL, STOP_MULTIPLE_POLL,
};
use crate::types::bytes_to_hex;

/// Shortest frame that can carry a 12-byte EPC report
pub const TAG_REPORT_MIN_LEN: usize = 24;

const RSSI_OFFSET: usize = 5;
const PC_RANGE: std::ops::Range<usize> = 6..8;
const EPC_RANGE: std::ops::Range<usize> = 8..20;
const CRC_RANGE: std::ops::Range<usize> = 20..22;

/// A tag sighting reported by the module during polling
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagReport {
    /// Signal strength in dBm (always negative)
    pub rssi: i16,
    /// Protocol control word, 4 upper-case hex digits
    pub protocol_control: String,
    /// Electronic product code, 24 upper-case hex digits
    pub epc: String,
    /// Tag CRC, 4 upper-case hex digits
    pub crc: String,
}

impl TagReport {
    /// Parse a tag report, or `None` for any other (or truncated) frame
    pub fn parse(frame: &Frame) -> Option<Self> {
        let bytes = frame.as_bytes();
        if bytes.len() < TAG_REPORT_MIN_LEN
            || bytes[1] != RESP_TYPE_TAG
            || bytes[2] != SINGLE_POLL
        {
            return None;
        }

        Some(Self {
            rssi: rssi_dbm(bytes[RSSI_OFFSET]),
            protocol_control: bytes_to_hex(&bytes[PC_RANGE]),
            epc: bytes_to_hex(&bytes[EPC_RANGE]),
            crc: bytes_to_hex(&bytes[CRC_RANGE]),
        })
    }
}

/// Module RSSI byte to dBm
pub fn rssi_dbm(raw: u8) -> i16 {
    raw as i16 - 256
}

/// Notifications answering station commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Reply to a hardware or software version query
    ModuleInfo { kind: u8, text: String },
    /// Current transmit power in hundredths of a dBm
    Power(i16),
    /// Set-power acknowledgement (`0x00` = accepted)
    PowerSet { status: u8 },
    /// Stop-polling acknowledgement (`0x00` = accepted)
    PollingStopped { status: u8 },
    /// Error code from the module (`0x15` = inventory round found no tag)
    Error { code: u8 },
}

/// Parse a notification frame the station cares about
pub fn parse_notice(frame: &Frame) -> Option<Notice> {
    if frame.frame_type()? != RESP_TYPE_NOTIFICATION {
        return None;
    }
    let payload = frame.payload();

    match frame.command()? {
        GET_MODULE_INFO => {
            let (&kind, text) = payload.split_first()?;
            Some(Notice::ModuleInfo {
                kind,
                text: String::from_utf8_lossy(text).trim_end_matches('\0').to_string(),
            })
        }
        GET_TX_POWER if payload.len() >= 2 => {
            Some(Notice::Power(i16::from_be_bytes([payload[0], payload[1]])))
        }
        SET_TX_POWER => payload.first().map(|&status| Notice::PowerSet { status }),
        STOP_MULTIPLE_POLL => payload
            .first()
            .map(|&status| Notice::PollingStopped { status }),
        ERROR_RESPONSE => payload.first().map(|&code| Notice::Error { code }),
        _ => None,
    }
}
