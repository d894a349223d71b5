//! Requests dropped by the GUI front end into a plain text file.
//!
//! The file holds one token: either a built-in image name or the path of an
//! image to transfer. Windows drive paths (`X:\dir\file`) are mapped below
//! `drive_root` the way Cygwin mounts drives.

use crate::orchestrator::Command;
use povcyl_protocol::catalog_lookup;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct CommandFile {
    path: PathBuf,
    drive_root: String,
    last_poll: Option<Instant>,
    /// Last I/O failure already logged; repeats stay quiet until a clean read.
    reported: Option<io::ErrorKind>,
}

impl CommandFile {
    pub fn new(path: impl Into<PathBuf>, drive_root: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            drive_root: drive_root.into(),
            last_poll: None,
            reported: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Throttled [`CommandFile::take`]; cheap to call every loop iteration.
    pub fn poll(&mut self) -> Option<Command> {
        let now = Instant::now();
        if let Some(last) = self.last_poll {
            if now.duration_since(last) < POLL_INTERVAL {
                return None;
            }
        }
        self.last_poll = Some(now);
        self.take()
    }

    /// Reads and consumes a pending request.
    ///
    /// A missing file or one without a token yields `None` and is left
    /// alone. Once a token was read the file is deleted, even when the
    /// token is not understood. I/O failures are logged and yield `None`;
    /// the session carries on without GUI requests.
    pub fn take(&mut self) -> Option<Command> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.reported = None;
                return None;
            }
            Err(e) => {
                self.report("reading", &e);
                return None;
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        let Some(token) = text.split_whitespace().next() else {
            self.reported = None;
            return None;
        };

        let command = parse_request(token, &self.drive_root);
        // a request that cannot be removed would be replayed on every poll
        if let Err(e) = fs::remove_file(&self.path) {
            self.report("removing", &e);
            return None;
        }
        self.reported = None;
        match &command {
            Some(cmd) => log::info!("command file request: {cmd:?}"),
            None => log::warn!("ignoring command file request '{token}'"),
        }
        command
    }

    fn report(&mut self, action: &str, err: &io::Error) {
        if self.reported != Some(err.kind()) {
            log::warn!("{action} {}: {err}", self.path.display());
            self.reported = Some(err.kind());
        }
    }
}

pub fn parse_request(token: &str, drive_root: &str) -> Option<Command> {
    if let Some((index, _)) = catalog_lookup(token) {
        return Command::builtin(index).ok();
    }
    if let Some(path) = windows_to_posix(token, drive_root) {
        return Some(Command::External { path });
    }
    let path = Path::new(token);
    path.is_absolute().then(|| Command::External {
        path: path.to_path_buf(),
    })
}

/// `C:\img\a.gif` -> `{drive_root}/c/img/a.gif`.
pub fn windows_to_posix(token: &str, drive_root: &str) -> Option<PathBuf> {
    let mut chars = token.chars();
    let drive = chars.next().filter(char::is_ascii_alphabetic)?;
    if chars.next() != Some(':') {
        return None;
    }
    let rest = chars.as_str();
    let rest = rest.strip_prefix(['\\', '/'])?;
    Some(PathBuf::from(format!(
        "{}/{}/{}",
        drive_root.trim_end_matches('/'),
        drive.to_ascii_lowercase(),
        rest.replace('\\', "/")
    )))
}
