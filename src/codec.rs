//! R200 wire framing: command encoding and inbound frame reassembly
//!
//! Every frame on the wire has the shape
//!
//! ```text
//! AA | type | command | len_hi len_lo | params... | checksum | DD
//! ```
//!
//! where `checksum` is the wrapping 8-bit sum of every byte from `type`
//! through the last parameter.

use log::{debug, warn};

use crate::types::bytes_to_hex;

// Protocol constants
pub const HEADER: u8 = 0xAA;
pub const END: u8 = 0xDD;
pub const CMD_TYPE: u8 = 0x00;
pub const RESP_TYPE_NOTIFICATION: u8 = 0x01;
pub const RESP_TYPE_TAG: u8 = 0x02;

// Command codes
pub const GET_MODULE_INFO: u8 = 0x03;
pub const SINGLE_POLL: u8 = 0x22;
pub const MULTIPLE_POLL: u8 = 0x27;
pub const STOP_MULTIPLE_POLL: u8 = 0x28;
pub const SET_TX_POWER: u8 = 0xB6;
pub const GET_TX_POWER: u8 = 0xB7;
pub const ERROR_RESPONSE: u8 = 0xFF;

/// Receive buffer size of the powder station board
pub const DEFAULT_FRAME_CAPACITY: usize = 256;

/// Poll rounds sent with the start command (0x2710 = 10000)
const POLL_ROUNDS: u16 = 10_000;

/// Wrapping 8-bit sum used by the module as its frame checksum
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Build a command frame for `opcode` carrying `params`
pub fn encode_command(opcode: u8, params: &[u8]) -> Vec<u8> {
    let [len_hi, len_lo] = (params.len() as u16).to_be_bytes();

    let mut cmd = Vec::with_capacity(params.len() + 7);
    cmd.extend_from_slice(&[HEADER, CMD_TYPE, opcode, len_hi, len_lo]);
    cmd.extend_from_slice(params);
    cmd.push(checksum(&cmd[1..]));
    cmd.push(END);
    cmd
}

/// Commands the station sends to the module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    HardwareVersion,
    SoftwareVersion,
    GetPower,
    /// Transmit power in hundredths of a dBm (3000 = 30.00 dBm)
    SetPower(i16),
    StartPolling,
    StopPolling,
    SinglePoll,
}

impl Command {
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Command::HardwareVersion => encode_command(GET_MODULE_INFO, &[0x00]),
            Command::SoftwareVersion => encode_command(GET_MODULE_INFO, &[0x01]),
            Command::GetPower => encode_command(GET_TX_POWER, &[]),
            Command::SetPower(centi_dbm) => encode_command(SET_TX_POWER, &centi_dbm.to_be_bytes()),
            Command::StartPolling => {
                let [hi, lo] = POLL_ROUNDS.to_be_bytes();
                encode_command(MULTIPLE_POLL, &[0x22, hi, lo])
            }
            Command::StopPolling => encode_command(STOP_MULTIPLE_POLL, &[]),
            Command::SinglePoll => encode_command(SINGLE_POLL, &[]),
        }
    }
}

/// One complete frame, start and end markers included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Type byte (command, notification or tag report)
    pub fn frame_type(&self) -> Option<u8> {
        self.bytes.get(1).copied()
    }

    /// Command byte the frame refers to
    pub fn command(&self) -> Option<u8> {
        self.bytes.get(2).copied()
    }

    /// Parameter bytes as declared by the length field, clipped to the frame
    pub fn payload(&self) -> &[u8] {
        if self.bytes.len() < 7 {
            return &[];
        }
        let declared = u16::from_be_bytes([self.bytes[3], self.bytes[4]]) as usize;
        let available = self.bytes.len() - 7;
        &self.bytes[5..5 + declared.min(available)]
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Reassembles frames from a byte stream fed one byte at a time.
///
/// Bytes are buffered until an end marker arrives while the buffer starts with
/// a header and holds more than two bytes. Anything else keeps accumulating;
/// once `capacity` is reached the buffer is dropped together with the byte
/// that did not fit.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    capacity: usize,
    overflows: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_CAPACITY)
    }
}

impl FrameDecoder {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            overflows: 0,
        }
    }

    pub fn feed(&mut self, byte: u8) -> Option<Frame> {
        if self.buffer.len() >= self.capacity {
            warn!(
                "Receive buffer overflow, dropping {} buffered bytes",
                self.buffer.len()
            );
            self.buffer.clear();
            self.overflows += 1;
            return None;
        }
        self.buffer.push(byte);

        if byte == END && self.buffer.len() > 2 && self.buffer[0] == HEADER {
            let frame = Frame {
                bytes: std::mem::replace(&mut self.buffer, Vec::with_capacity(self.capacity)),
            };
            debug!("RX frame (len={}): {}", frame.len(), bytes_to_hex(frame.as_bytes()));
            return Some(frame);
        }
        None
    }

    /// Feed a whole chunk, collecting every frame it completes
    pub fn feed_all(&mut self, bytes: &[u8]) -> Vec<Frame> {
        bytes.iter().filter_map(|&b| self.feed(b)).collect()
    }

    /// Bytes buffered towards the next frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// How many partial frames were lost to overflow
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
