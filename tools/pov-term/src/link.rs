//! Character stream from the cylinder: echo, inband telemetry and the
//! prompt/menu synchronisation used by the command sequences.

use crate::motor::MotorContext;
use crate::transport::Transport;
use anyhow::Result;
use povcyl_protocol::{
    MENU_SENTINEL, PROMPT_SENTINEL, TELEMETRY_START, Telemetry, TelemetryDecoder, TelemetryStatus,
};
use std::io::{Read, Write};

pub struct Link<P, W> {
    transport: Transport<P>,
    console: W,
    decoder: TelemetryDecoder,
    status: TelemetryStatus,
}

impl<P: Read + Write, W: Write> Link<P, W> {
    pub fn new(transport: Transport<P>, console: W) -> Self {
        Self {
            transport,
            console,
            decoder: TelemetryDecoder::new(),
            status: TelemetryStatus::default(),
        }
    }

    pub fn transport_mut(&mut self) -> &mut Transport<P> {
        &mut self.transport
    }

    #[cfg(test)]
    pub fn console(&self) -> &W {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut W {
        &mut self.console
    }

    pub fn status(&self) -> &TelemetryStatus {
        &self.status
    }

    pub fn has_byte_ready(&mut self) -> Result<bool> {
        Ok(self.transport.has_byte_ready()?)
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        Ok(self.transport.write_bytes(bytes)?)
    }

    pub fn send_byte(&mut self, byte: u8) -> Result<()> {
        Ok(self.transport.write_byte(byte)?)
    }

    /// Reads the next character, blocking.
    ///
    /// Plain characters are echoed and returned. A `{...}` telemetry field
    /// is consumed whole, applied to the status line (and to the motor for
    /// period reports) and reported as `{`.
    pub fn next_char<S: Read + Write>(&mut self, motor: &mut MotorContext<S>) -> Result<u8> {
        let b = self.transport.read_byte()?;
        if b != TELEMETRY_START {
            self.console.write_all(&[b])?;
            self.console.flush()?;
            return Ok(b);
        }

        self.decoder.reset();
        let field = loop {
            if let Some(field) = self.decoder.push(self.transport.read_byte()?) {
                break field;
            }
        };

        if let Some(telemetry) = field.telemetry() {
            self.status.apply(telemetry);
            if let Telemetry::Period(us) = telemetry {
                motor.on_period(us)?;
            }
        }
        write!(self.console, "\r{}", self.status)?;
        self.console.flush()?;
        Ok(TELEMETRY_START)
    }

    /// Blocks until the cylinder prints `"]: "`. Not cancellable; returns
    /// early only on a transport or motor failure.
    pub fn wait_for_prompt<S: Read + Write>(&mut self, motor: &mut MotorContext<S>) -> Result<()> {
        self.wait_for(&PROMPT_SENTINEL, motor)
    }

    /// Blocks until the cylinder ends its menu with `"ce\n"`. Same blocking
    /// semantics as [`Link::wait_for_prompt`].
    pub fn wait_for_menu<S: Read + Write>(&mut self, motor: &mut MotorContext<S>) -> Result<()> {
        self.wait_for(&MENU_SENTINEL, motor)
    }

    // A mismatch restarts the search at the next character; characters read
    // while checking the tail are not looked at again.
    fn wait_for<S: Read + Write>(
        &mut self,
        sentinel: &[u8; 3],
        motor: &mut MotorContext<S>,
    ) -> Result<()> {
        'scan: loop {
            while self.next_char(motor)? != sentinel[0] {}
            for &expected in &sentinel[1..] {
                if self.next_char(motor)? != expected {
                    continue 'scan;
                }
            }
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::MotorController;
    use crate::testing::{FakeActuator, FakePort};

    fn link(input: &[u8]) -> Link<FakePort, Vec<u8>> {
        Link::new(Transport::new(FakePort::with_input(input)), Vec::new())
    }

    fn no_motor() -> MotorContext<FakeActuator> {
        MotorContext::disabled()
    }

    fn console_text(link: &Link<FakePort, Vec<u8>>) -> String {
        String::from_utf8_lossy(link.console()).into_owned()
    }

    #[test]
    fn plain_characters_are_echoed() {
        let mut l = link(b"ok\n");
        let mut m = no_motor();
        assert_eq!(l.next_char(&mut m).unwrap(), b'o');
        assert_eq!(l.next_char(&mut m).unwrap(), b'k');
        assert_eq!(l.next_char(&mut m).unwrap(), b'\n');
        assert_eq!(console_text(&l), "ok\n");
    }

    #[test]
    fn period_field_updates_status_line() {
        let mut l = link(b"{p57143}A");
        let mut m = no_motor();
        assert_eq!(l.next_char(&mut m).unwrap(), b'{');
        assert_eq!(l.status().period_us, 57143);
        assert_eq!(
            console_text(&l),
            "\r0 rotations: 17.50Hz = 57143us (0 columns skipped)        "
        );
        assert_eq!(l.next_char(&mut m).unwrap(), b'A');
    }

    #[test]
    fn unknown_tag_consumes_field_only() {
        let mut l = link(b"{c9}{z123}Q");
        let mut m = no_motor();
        l.next_char(&mut m).unwrap();
        let before = *l.status();
        assert_eq!(l.next_char(&mut m).unwrap(), b'{');
        assert_eq!(*l.status(), before);
        assert_eq!(before.rotation_count, 9);
        // the status line is still refreshed
        assert_eq!(console_text(&l).matches('\r').count(), 2);
        assert_eq!(l.next_char(&mut m).unwrap(), b'Q');
    }

    #[test]
    fn period_drives_motor_when_enabled() {
        let mut l = link(b"{p40000}{s2}");
        let mut m = MotorContext::new(MotorController::new(FakeActuator::accepting(1), 16.0), true);
        l.next_char(&mut m).unwrap();
        l.next_char(&mut m).unwrap();
        let motor = m.motor().unwrap();
        // 40000us is far below the 62500us wanted: coarse step down from 0
        assert_eq!(motor.stream().sent, ["0"]);
        assert_eq!(l.status().skipped_columns, 2);
    }

    #[test]
    fn period_ignored_without_auto_control() {
        let mut l = link(b"{p40000}");
        let mut m = MotorContext::new(MotorController::new(FakeActuator::default(), 16.0), false);
        l.next_char(&mut m).unwrap();
        assert!(m.motor().unwrap().stream().sent.is_empty());
    }

    #[test]
    fn prompt_skips_false_start() {
        let mut l = link(b"Image ]x]: rest");
        let mut m = no_motor();
        l.wait_for_prompt(&mut m).unwrap();
        assert_eq!(l.transport_mut().port().remaining(), b"rest");
    }

    #[test]
    fn prompt_sees_through_telemetry() {
        let mut l = link(b"Value [10]{p62500}]: X");
        let mut m = no_motor();
        l.wait_for_prompt(&mut m).unwrap();
        assert_eq!(l.status().period_us, 62500);
        assert_eq!(l.transport_mut().port().remaining(), b"X");
    }

    #[test]
    fn menu_sentinel() {
        let mut l = link(b"1) select\r\nEnter choice\nZ");
        let mut m = no_motor();
        l.wait_for_menu(&mut m).unwrap();
        assert_eq!(l.transport_mut().port().remaining(), b"Z");
    }

    #[test]
    fn wait_fails_when_link_drops() {
        let mut l = link(b"no prompt here");
        let mut m = no_motor();
        assert!(l.wait_for_prompt(&mut m).is_err());
    }
}
