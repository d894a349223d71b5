//! Operator terminal mode for the duration of a session.

use crossterm::terminal;
use crossterm::tty::IsTty;
use std::io::{self, Write};

/// Keeps the terminal in raw mode while alive; dropping it restores the
/// previous settings. Tie it to a local in `main` so every exit path,
/// `?` and unwinding included, goes through `Drop`.
#[derive(Debug)]
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    /// Without a terminal on stdin nothing is switched and the guard is inert.
    pub fn enable() -> io::Result<Self> {
        if !io::stdin().is_tty() {
            log::warn!("stdin is not a terminal; keyboard input disabled");
            return Ok(Self { active: false });
        }
        terminal::enable_raw_mode()?;
        Ok(Self { active: true })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = terminal::disable_raw_mode() {
                log::warn!("restoring terminal mode: {e}");
            }
        }
    }
}

/// Raw mode also turns off output post-processing, so `\n` no longer
/// returns the carriage. Expands `\n` to `\r\n` when `translate` is set.
pub struct CrlfWriter<W> {
    inner: W,
    translate: bool,
}

impl<W: Write> CrlfWriter<W> {
    pub fn new(inner: W, translate: bool) -> Self {
        Self { inner, translate }
    }
}

impl<W: Write> Write for CrlfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.translate {
            return self.inner.write(buf);
        }
        for chunk in buf.split_inclusive(|&b| b == b'\n') {
            match chunk.strip_suffix(b"\n") {
                Some(line) => {
                    self.inner.write_all(line)?;
                    self.inner.write_all(b"\r\n")?;
                }
                None => self.inner.write_all(chunk)?,
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_that_fails(guard: RawModeGuard) -> anyhow::Result<()> {
        let _guard = guard;
        anyhow::bail!("serial link lost")
    }

    #[test]
    fn guard_restores_terminal_on_drop() {
        let guard = RawModeGuard::enable().unwrap();
        assert_eq!(terminal::is_raw_mode_enabled().unwrap(), guard.is_active());
        drop(guard);
        assert!(!terminal::is_raw_mode_enabled().unwrap());

        // error exits unwind through the guard as well
        let guard = RawModeGuard::enable().unwrap();
        assert!(session_that_fails(guard).is_err());
        assert!(!terminal::is_raw_mode_enabled().unwrap());
    }

    #[test]
    fn line_feeds_get_carriage_returns() {
        let mut out = CrlfWriter::new(Vec::new(), true);
        write!(out, "Press '.' to quit\n\rstatus").unwrap();
        writeln!(out).unwrap();
        assert_eq!(out.inner, b"Press '.' to quit\r\n\rstatus\r\n");

        let mut plain = CrlfWriter::new(Vec::new(), false);
        writeln!(plain, "a").unwrap();
        assert_eq!(plain.inner, b"a\n");
    }
}
