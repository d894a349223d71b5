#![no_std]

#[cfg(test)]
extern crate std;

use core::fmt;
use heapless::Vec;

/// First byte of every image transfer frame.
pub const TRANSFER_START: u8 = b'&';
pub const TRANSFER_SIZE_LEN: usize = 4;
pub const TRANSFER_HEADER_LEN: usize = 1 + TRANSFER_SIZE_LEN;
pub const CRC_LEN: usize = 2;
/// Largest image the cylinder firmware accepts in a single transfer.
pub const MAX_TRANSFER_PAYLOAD: usize = 50_000;

pub const TELEMETRY_START: u8 = b'{';
pub const TELEMETRY_END: u8 = b'}';
/// Number of bytes accepted between the tag and the closing brace.
pub const TELEMETRY_MAX_TEXT: usize = 15;

pub const TAG_PERIOD: u8 = b'p';
pub const TAG_SKIPPED_COLUMNS: u8 = b's';
pub const TAG_ROTATION_COUNT: u8 = b'c';

/// Emitted by the cylinder when it waits for a value (`"...[default]: "`).
pub const PROMPT_SENTINEL: [u8; 3] = *b"]: ";
/// Last line of the cylinder's main menu (`"...choice\n"`).
pub const MENU_SENTINEL: [u8; 3] = *b"ce\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    BufferTooSmall,
    PayloadEmpty,
    PayloadTooLarge,
    InvalidStartMarker(u8),
    LengthMismatch,
    InvalidCrc { expected: u16, actual: u16 },
    CatalogIndexOutOfRange(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BufferTooSmall => f.write_str("output buffer too small"),
            Error::PayloadEmpty => f.write_str("transfer payload is empty"),
            Error::PayloadTooLarge => write!(
                f,
                "transfer payload exceeds {} bytes",
                MAX_TRANSFER_PAYLOAD
            ),
            Error::InvalidStartMarker(b) => write!(f, "invalid start marker 0x{b:02X}"),
            Error::LengthMismatch => f.write_str("frame length does not match size field"),
            Error::InvalidCrc { expected, actual } => write!(
                f,
                "crc mismatch: frame carries 0x{expected:04X}, payload gives 0x{actual:04X}"
            ),
            Error::CatalogIndexOutOfRange(idx) => {
                write!(f, "catalog index {idx} out of range")
            }
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// CRC
// ---------------------------------------------------------------------------

const CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if (crc & 0x8000) != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-16/CCITT with a zero seed and no final XOR (a.k.a. XMODEM).
///
/// The cylinder firmware verifies image transfers with the same table, so
/// this must stay bit-exact.
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in bytes {
        let idx = ((crc >> 8) as u8 ^ b) as usize;
        crc = CRC16_TABLE[idx] ^ (crc << 8);
    }
    crc
}

// ---------------------------------------------------------------------------
// Image transfer frame
// ---------------------------------------------------------------------------

/// A decoded transfer frame borrowing its payload from the input buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferFrame<'a> {
    pub payload: &'a [u8],
    pub crc: u16,
}

pub const fn transfer_frame_len(payload_len: usize) -> usize {
    TRANSFER_HEADER_LEN + payload_len + CRC_LEN
}

/// Validates the payload size and returns it as the on-wire `u32`.
pub fn transfer_payload_len(len: usize) -> Result<u32, Error> {
    if len == 0 {
        return Err(Error::PayloadEmpty);
    }
    if len > MAX_TRANSFER_PAYLOAD {
        return Err(Error::PayloadTooLarge);
    }
    Ok(len as u32)
}

/// Start marker followed by the little-endian payload size.
pub fn encode_transfer_header(payload_len: usize) -> Result<[u8; TRANSFER_HEADER_LEN], Error> {
    let size = transfer_payload_len(payload_len)?.to_le_bytes();
    Ok([TRANSFER_START, size[0], size[1], size[2], size[3]])
}

/// Little-endian CRC over the payload, sent after the payload bytes.
pub fn encode_transfer_trailer(payload: &[u8]) -> [u8; CRC_LEN] {
    crc16_ccitt(payload).to_le_bytes()
}

pub fn encode_transfer_frame(payload: &[u8], out: &mut [u8]) -> Result<usize, Error> {
    let header = encode_transfer_header(payload.len())?;
    let total = transfer_frame_len(payload.len());
    if out.len() < total {
        return Err(Error::BufferTooSmall);
    }

    out[..TRANSFER_HEADER_LEN].copy_from_slice(&header);
    let crc_at = TRANSFER_HEADER_LEN + payload.len();
    out[TRANSFER_HEADER_LEN..crc_at].copy_from_slice(payload);
    out[crc_at..total].copy_from_slice(&encode_transfer_trailer(payload));
    Ok(total)
}

pub fn decode_transfer_frame(buf: &[u8]) -> Result<TransferFrame<'_>, Error> {
    if buf.len() < TRANSFER_HEADER_LEN + CRC_LEN {
        return Err(Error::LengthMismatch);
    }
    if buf[0] != TRANSFER_START {
        return Err(Error::InvalidStartMarker(buf[0]));
    }

    let size = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    transfer_payload_len(size)?;
    if transfer_frame_len(size) != buf.len() {
        return Err(Error::LengthMismatch);
    }

    let crc_at = TRANSFER_HEADER_LEN + size;
    let payload = &buf[TRANSFER_HEADER_LEN..crc_at];
    let expected = u16::from_le_bytes([buf[crc_at], buf[crc_at + 1]]);
    let actual = crc16_ccitt(payload);
    if expected != actual {
        return Err(Error::InvalidCrc { expected, actual });
    }

    Ok(TransferFrame {
        payload,
        crc: expected,
    })
}

// ---------------------------------------------------------------------------
// Inband telemetry
// ---------------------------------------------------------------------------

/// Structured value carried by a `{<tag><digits>}` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Telemetry {
    /// Duration of the last revolution in microseconds.
    Period(u32),
    /// Image columns the firmware could not render in time.
    SkippedColumns(u32),
    RotationCount(u32),
}

impl Telemetry {
    /// Interprets a raw field. Unknown tags and unparsable text yield `None`.
    pub fn from_field(tag: u8, text: &[u8]) -> Option<Self> {
        let value = parse_unsigned(text)?;
        match tag {
            TAG_PERIOD => Some(Telemetry::Period(value)),
            TAG_SKIPPED_COLUMNS => Some(Telemetry::SkippedColumns(value)),
            TAG_ROTATION_COUNT => Some(Telemetry::RotationCount(value)),
            _ => None,
        }
    }
}

/// A complete field as it was read off the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryField {
    pub tag: u8,
    pub text: Vec<u8, TELEMETRY_MAX_TEXT>,
}

impl TelemetryField {
    pub fn telemetry(&self) -> Option<Telemetry> {
        Telemetry::from_field(self.tag, &self.text)
    }
}

/// Collects the bytes that follow an opening `{`.
///
/// The first byte pushed is the tag. Text is accumulated until `}` or until
/// `TELEMETRY_MAX_TEXT` bytes have been taken; in the latter case the byte
/// after the last one taken is left for the caller.
#[derive(Debug, Default)]
pub struct TelemetryDecoder {
    tag: Option<u8>,
    text: Vec<u8, TELEMETRY_MAX_TEXT>,
}

impl TelemetryDecoder {
    pub const fn new() -> Self {
        Self {
            tag: None,
            text: Vec::new(),
        }
    }

    pub fn push(&mut self, byte: u8) -> Option<TelemetryField> {
        let Some(tag) = self.tag else {
            self.tag = Some(byte);
            return None;
        };

        if byte == TELEMETRY_END {
            return Some(self.finish(tag));
        }

        // Never fails: the field is closed as soon as the buffer fills up.
        let _ = self.text.push(byte);
        if self.text.is_full() {
            return Some(self.finish(tag));
        }
        None
    }

    pub fn is_idle(&self) -> bool {
        self.tag.is_none()
    }

    pub fn reset(&mut self) {
        self.tag = None;
        self.text.clear();
    }

    fn finish(&mut self, tag: u8) -> TelemetryField {
        self.tag = None;
        TelemetryField {
            tag,
            text: core::mem::take(&mut self.text),
        }
    }
}

/// Latest value of every telemetry channel, zero until first reported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TelemetryStatus {
    pub period_us: u32,
    pub skipped_columns: u32,
    pub rotation_count: u32,
}

impl TelemetryStatus {
    pub fn apply(&mut self, telemetry: Telemetry) {
        match telemetry {
            Telemetry::Period(us) => self.period_us = us,
            Telemetry::SkippedColumns(n) => self.skipped_columns = n,
            Telemetry::RotationCount(n) => self.rotation_count = n,
        }
    }

    /// Rotation frequency derived from the last period; infinite before the
    /// first period report.
    pub fn frequency_hz(&self) -> f64 {
        1e6 / self.period_us as f64
    }
}

/// Single status line, padded so a shorter line fully overwrites a longer
/// one after a carriage return.
impl fmt::Display for TelemetryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rotations: {:5.2}Hz = {}us ({} columns skipped)        ",
            self.rotation_count,
            self.frequency_hz(),
            self.period_us,
            self.skipped_columns
        )
    }
}

/// `%u`-style parse: leading whitespace, optional `+`, then the leading run
/// of ASCII digits. Trailing garbage is ignored.
fn parse_unsigned(text: &[u8]) -> Option<u32> {
    let mut rest = text;
    while let [first, tail @ ..] = rest {
        if !first.is_ascii_whitespace() {
            break;
        }
        rest = tail;
    }
    if let [b'+', tail @ ..] = rest {
        rest = tail;
    }

    let mut value: u32 = 0;
    let mut seen = false;
    for &b in rest {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.checked_mul(10)?.checked_add(u32::from(b - b'0'))?;
        seen = true;
    }
    seen.then_some(value)
}

// ---------------------------------------------------------------------------
// Built-in image catalog
// ---------------------------------------------------------------------------

/// Image stored in the cylinder's flash, selected by its catalog position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CatalogImage {
    pub name: &'static str,
    /// 0 means the firmware asks for an extra rotation value after the
    /// increment prompt.
    pub rotation_increment: u8,
}

const fn image(name: &'static str, rotation_increment: u8) -> CatalogImage {
    CatalogImage {
        name,
        rotation_increment,
    }
}

pub const CATALOG: [CatalogImage; 25] = [
    image("banana.jpg", 0),
    image("candle.jpg", 0),
    image("couple.jpg", 0),
    image("dog.jpg", 0),
    image("dog_and_smileys.jpg", 2),
    image("eye_smiley.jpg", 0),
    image("groupwave.jpg", 1),
    image("joke.jpg", 0),
    image("lawn_mower.jpg", 0),
    image("laughing_smiley.jpg", 0),
    image("massbounce.jpg", 1),
    image("pov.jpg", 0),
    image("pov_banana.jpg", 0),
    image("pov_candle.jpg", 0),
    image("smiley_sport.jpg", 0),
    image("tantrum.jpg", 0),
    image("text1.jpg", 1),
    image("text2.jpg", 1),
    image("text3.jpg", 1),
    image("text4.jpg", 1),
    image("text5.jpg", 1),
    image("tooth_smiley.jpg", 0),
    image("twilight.jpg", 0),
    image("wallbash.jpg", 0),
    image("xmas.jpg", 0),
];

pub fn catalog_lookup(name: &str) -> Option<(usize, &'static CatalogImage)> {
    CATALOG.iter().enumerate().find(|(_, img)| img.name == name)
}

/// Index as sent to the firmware: always two ASCII digits.
pub fn catalog_index_digits(index: usize) -> Result<[u8; 2], Error> {
    if index >= CATALOG.len() {
        return Err(Error::CatalogIndexOutOfRange(index));
    }
    Ok([b'0' + (index / 10) as u8, b'0' + (index % 10) as u8])
}
