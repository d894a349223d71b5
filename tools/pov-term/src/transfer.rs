use crate::link::Link;
use crate::transport::TransportError;
use povcyl_protocol::{
    Error as FrameError, MAX_TRANSFER_PAYLOAD, crc16_ccitt, encode_transfer_header,
    encode_transfer_trailer, transfer_payload_len,
};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("file '{}' not found", .0.display())]
    NotFound(PathBuf),
    #[error("file size is greater than {} bytes", MAX_TRANSFER_PAYLOAD)]
    TooLarge,
    #[error("file is empty")]
    Empty,
    #[error("error reading file: {0}")]
    Read(#[source] io::Error),
    #[error("invalid transfer frame: {0}")]
    Frame(#[source] FrameError),
    #[error("console output failed: {0}")]
    Console(#[source] io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl TransferError {
    /// Errors after which the serial link can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransferError::Transport(_) | TransferError::Console(_))
    }
}

impl From<FrameError> for TransferError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::PayloadEmpty => TransferError::Empty,
            FrameError::PayloadTooLarge => TransferError::TooLarge,
            other => TransferError::Frame(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferReport {
    pub size: usize,
    pub crc: u16,
}

/// Loads an image, enforcing the firmware's size limits.
pub fn read_image(path: &Path) -> Result<Vec<u8>, TransferError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => TransferError::NotFound(path.to_path_buf()),
        _ => TransferError::Read(e),
    })?;

    // one byte past the limit is enough to tell "too large"
    let mut data = Vec::new();
    file.take(MAX_TRANSFER_PAYLOAD as u64 + 1)
        .read_to_end(&mut data)
        .map_err(TransferError::Read)?;
    transfer_payload_len(data.len())?;
    Ok(data)
}

/// Sends `path` as one transfer frame: `&`, size, payload, CRC.
///
/// File problems abort only this transfer; errors for which
/// [`TransferError::is_fatal`] holds end the session.
pub fn send_file<P: Read + Write, W: Write>(
    link: &mut Link<P, W>,
    path: &Path,
) -> Result<TransferReport, TransferError> {
    let data = read_image(path)?;
    let crc = crc16_ccitt(&data);
    let header = encode_transfer_header(data.len())?;

    let console = link.console_mut();
    writeln!(
        console,
        "Downloading file {} - {} bytes",
        path.display(),
        data.len()
    )
    .map_err(TransferError::Console)?;
    writeln!(console, "CRC: 0x{crc:04X}").map_err(TransferError::Console)?;
    console.flush().map_err(TransferError::Console)?;

    let transport = link.transport_mut();
    transport.write_bytes(&header)?;
    transport.write_bytes(&data)?;
    transport.write_bytes(&encode_transfer_trailer(&data))?;
    log::debug!("sent {} ({} bytes, crc 0x{crc:04X})", path.display(), data.len());

    Ok(TransferReport {
        size: data.len(),
        crc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePort, scratch_path};
    use crate::transport::Transport;
    use povcyl_protocol::decode_transfer_frame;
    use std::fs;

    fn link() -> Link<FakePort, Vec<u8>> {
        Link::new(Transport::new(FakePort::default()), Vec::new())
    }

    #[test]
    fn hundred_byte_file_frame() {
        let path = scratch_path("hundred.bin");
        let payload: Vec<u8> = (0..100u8).map(|i| i.wrapping_mul(37)).collect();
        fs::write(&path, &payload).unwrap();

        let mut l = link();
        let report = send_file(&mut l, &path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(report.size, 100);
        assert_eq!(report.crc, crc16_ccitt(&payload));

        let out = &l.transport_mut().port().output;
        assert_eq!(out[0], b'&');
        assert_eq!(u32::from_le_bytes([out[1], out[2], out[3], out[4]]), 100);
        let frame = decode_transfer_frame(out).unwrap();
        assert_eq!(frame.payload, &payload[..]);
        assert_eq!(frame.crc, report.crc);

        let console = String::from_utf8(l.console().clone()).unwrap();
        assert!(console.contains("- 100 bytes"));
        assert!(console.contains(&format!("CRC: 0x{:04X}", report.crc)));
    }

    #[test]
    fn missing_file_is_recoverable() {
        let mut l = link();
        let err = send_file(&mut l, &scratch_path("does-not-exist.gif")).unwrap_err();
        assert!(matches!(err, TransferError::NotFound(_)));
        assert!(!err.is_fatal());
        assert!(l.transport_mut().port().output.is_empty());
    }

    #[test]
    fn size_limits() {
        let empty = scratch_path("empty.bin");
        fs::write(&empty, b"").unwrap();
        let big = scratch_path("big.bin");
        fs::write(&big, vec![0x55u8; MAX_TRANSFER_PAYLOAD + 1]).unwrap();
        let max = scratch_path("max.bin");
        fs::write(&max, vec![0xAAu8; MAX_TRANSFER_PAYLOAD]).unwrap();

        let mut l = link();
        assert!(matches!(send_file(&mut l, &empty), Err(TransferError::Empty)));
        assert!(matches!(send_file(&mut l, &big), Err(TransferError::TooLarge)));
        assert!(l.transport_mut().port().output.is_empty());
        let report = send_file(&mut l, &max).unwrap();
        assert_eq!(report.size, MAX_TRANSFER_PAYLOAD);

        for p in [empty, big, max] {
            fs::remove_file(p).unwrap();
        }
    }

    #[test]
    fn short_write_is_fatal() {
        let path = scratch_path("short.bin");
        fs::write(&path, [1u8, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let port = FakePort {
            write_limit: Some(6),
            ..FakePort::default()
        };
        let mut l = Link::new(Transport::new(port), Vec::new());
        let err = send_file(&mut l, &path).unwrap_err();
        fs::remove_file(&path).unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn frame_errors_keep_their_meaning() {
        assert!(matches!(
            TransferError::from(FrameError::PayloadEmpty),
            TransferError::Empty
        ));
        assert!(matches!(
            TransferError::from(FrameError::PayloadTooLarge),
            TransferError::TooLarge
        ));
        let err = TransferError::from(FrameError::BufferTooSmall);
        assert!(matches!(err, TransferError::Frame(FrameError::BufferTooSmall)));
        assert!(!err.is_fatal());
        assert!(!err.to_string().contains("greater than"));
    }
}
