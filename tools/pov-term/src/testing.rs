//! In-memory stand-ins for the serial port and the motor actuator socket.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Scripted serial port. `None` entries in the input behave like a read
/// timeout; an exhausted script fails the read so tests never spin forever.
#[derive(Debug, Default)]
pub struct FakePort {
    pub input: VecDeque<Option<u8>>,
    pub output: Vec<u8>,
    pub write_limit: Option<usize>,
}

impl FakePort {
    pub fn with_input(bytes: &[u8]) -> Self {
        Self {
            input: bytes.iter().copied().map(Some).collect(),
            ..Self::default()
        }
    }

    pub fn push_timeout(&mut self) {
        self.input.push_back(None);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied().map(Some));
    }

    pub fn remaining(&self) -> Vec<u8> {
        self.input.iter().flatten().copied().collect()
    }
}

impl Read for FakePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.input.pop_front() {
            Some(Some(b)) => {
                buf[0] = b;
                Ok(1)
            }
            Some(None) => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "scripted input exhausted",
            )),
        }
    }
}

impl Write for FakePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match self.write_limit {
            Some(limit) => buf.len().min(limit.saturating_sub(self.output.len())),
            None => buf.len(),
        };
        self.output.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Motor actuator socket: records every message and answers from a queue of
/// replies. An empty queue reads as a closed connection; the `fail_*` flags
/// turn the socket's reads or writes into I/O errors.
#[derive(Debug, Default)]
pub struct FakeActuator {
    pub replies: VecDeque<Vec<u8>>,
    pub sent: Vec<String>,
    pub fail_writes: bool,
    pub fail_reads: bool,
}

impl FakeActuator {
    pub fn accepting(count: usize) -> Self {
        Self {
            replies: (0..count).map(|_| b"0".to_vec()).collect(),
            ..Self::default()
        }
    }

    pub fn replying(reply: &[u8]) -> Self {
        Self {
            replies: VecDeque::from([reply.to_vec()]),
            ..Self::default()
        }
    }
}

impl Read for FakeActuator {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_reads {
            return Err(io::ErrorKind::ConnectionReset.into());
        }
        match self.replies.pop_front() {
            Some(reply) => {
                let n = reply.len().min(buf.len());
                buf[..n].copy_from_slice(&reply[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }
}

impl Write for FakeActuator {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.sent.push(String::from_utf8_lossy(buf).into_owned());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Unique scratch path under the system temp directory.
pub fn scratch_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("pov-term-{}-{}", std::process::id(), name))
}
