//! Rotation speed control through the networked PWM actuator.
//!
//! The actuator accepts the PWM compare value as bare ASCII digits and
//! answers every message with a single status digit. The controller is a
//! two-gain step regulator sampled at most every `CONTROL_INTERVAL`.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use thiserror::Error;

/// PWM values are `0..PWM_RESOLUTION`.
pub const PWM_RESOLUTION: u32 = 4096;
pub const CONTROL_INTERVAL: Duration = Duration::from_millis(500);
/// Period error (µs) below which the fine step is used.
pub const FINE_BAND_US: i64 = 6_000;
pub const FINE_STEP: f64 = 0.2;
pub const COARSE_STEP: f64 = 1.0;
/// Ceiling for the automatic controller; manual commands may go higher.
pub const MAX_CONTROL_DUTY: f64 = 99.0;

pub const NORMAL_FREQUENCY_HZ: f64 = 16.0;
pub const FAST_FREQUENCY_HZ: f64 = 21.0;
pub const FREQUENCY_STEP_HZ: f64 = 0.2;

#[derive(Debug, Error)]
pub enum MotorError {
    #[error("resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("unable to connect to {0}")]
    Unreachable(String),
    #[error("send failed: {0}")]
    Send(#[source] io::Error),
    #[error("recv failed: {0}")]
    Recv(#[source] io::Error),
    #[error("error code 1: no valid integer")]
    InvalidInteger,
    #[error("error code 2: PWM value out of range")]
    OutOfRange,
    #[error("error code {0:?}: unknown error code")]
    UnknownCode(char),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("received message has more than one byte ({0} bytes)")]
    MalformedReply(usize),
}

/// Duty cycle in percent to the actuator's PWM value, never above
/// `PWM_RESOLUTION - 1`. Negative input maps to 0.
pub fn pwm_value(duty_cycle: f64) -> u32 {
    let raw = (duty_cycle / 100.0 * f64::from(PWM_RESOLUTION)) as u32;
    raw.min(PWM_RESOLUTION - 1)
}

pub fn period_for_frequency(frequency_hz: f64) -> u32 {
    (1e6 / frequency_hz).round() as u32
}

/// One controller step: move towards the wanted period by the fine or
/// coarse step, clamped to `0..=MAX_CONTROL_DUTY`.
pub fn next_duty_cycle(duty_cycle: f64, period_us: u32, wanted_period_us: u32) -> f64 {
    let error = i64::from(period_us) - i64::from(wanted_period_us);
    let step = if error.abs() < FINE_BAND_US {
        FINE_STEP
    } else {
        COARSE_STEP
    };

    if period_us < wanted_period_us {
        // spinning too fast
        if duty_cycle > step {
            duty_cycle - step
        } else {
            0.0
        }
    } else if duty_cycle < MAX_CONTROL_DUTY - step {
        duty_cycle + step
    } else {
        MAX_CONTROL_DUTY
    }
}

fn decode_reply(code: u8) -> Result<(), MotorError> {
    match code {
        b'0' => Ok(()),
        b'1' => Err(MotorError::InvalidInteger),
        b'2' => Err(MotorError::OutOfRange),
        other => Err(MotorError::UnknownCode(char::from(other))),
    }
}

pub struct MotorController<S> {
    stream: S,
    duty_cycle: f64,
    wanted_frequency_hz: f64,
    wanted_period_us: u32,
    last_sample: Option<Instant>,
}

impl MotorController<TcpStream> {
    /// Tries every address `host` resolves to, in order, and keeps the first
    /// connection that succeeds.
    pub fn connect(host: &str, port: u16, wanted_frequency_hz: f64) -> Result<Self, MotorError> {
        let addr = format!("{host}:{port}");
        let candidates = (host, port)
            .to_socket_addrs()
            .map_err(|source| MotorError::Resolve {
                addr: addr.clone(),
                source,
            })?;

        for candidate in candidates {
            match TcpStream::connect(candidate) {
                Ok(stream) => {
                    log::info!("motor actuator connected at {candidate}");
                    return Ok(Self::new(stream, wanted_frequency_hz));
                }
                Err(e) => log::debug!("connect {candidate}: {e}"),
            }
        }
        Err(MotorError::Unreachable(addr))
    }
}

impl<S: Read + Write> MotorController<S> {
    pub fn new(stream: S, wanted_frequency_hz: f64) -> Self {
        Self {
            stream,
            duty_cycle: 0.0,
            wanted_frequency_hz,
            wanted_period_us: period_for_frequency(wanted_frequency_hz),
            last_sample: None,
        }
    }

    pub fn duty_cycle(&self) -> f64 {
        self.duty_cycle
    }

    pub fn wanted_frequency(&self) -> f64 {
        self.wanted_frequency_hz
    }

    #[cfg(test)]
    pub fn wanted_period_us(&self) -> u32 {
        self.wanted_period_us
    }

    pub fn set_wanted_frequency(&mut self, frequency_hz: f64) {
        self.wanted_frequency_hz = frequency_hz;
        self.wanted_period_us = period_for_frequency(frequency_hz);
    }

    /// Sends the duty cycle and waits for the actuator's status digit.
    pub fn set_duty_cycle(&mut self, duty_cycle: f64) -> Result<(), MotorError> {
        self.duty_cycle = duty_cycle;
        let value = pwm_value(duty_cycle);
        log::debug!("duty cycle {duty_cycle:.2}% -> pwm {value}");

        self.stream
            .write_all(value.to_string().as_bytes())
            .map_err(MotorError::Send)?;

        let mut reply = [0u8; 16];
        let n = self.stream.read(&mut reply).map_err(MotorError::Recv)?;
        match n {
            0 => Err(MotorError::ConnectionClosed),
            1 => decode_reply(reply[0]),
            n => Err(MotorError::MalformedReply(n)),
        }
    }

    /// Feeds a measured rotation period; see [`MotorController::control_at`].
    pub fn control(&mut self, period_us: u32) -> Result<bool, MotorError> {
        self.control_at(period_us, Instant::now())
    }

    /// Runs one controller step unless the previous one was less than
    /// `CONTROL_INTERVAL` before `now`. Returns whether a step was taken.
    pub fn control_at(&mut self, period_us: u32, now: Instant) -> Result<bool, MotorError> {
        if let Some(last) = self.last_sample {
            if now.saturating_duration_since(last) < CONTROL_INTERVAL {
                return Ok(false);
            }
        }
        self.last_sample = Some(now);

        let next = next_duty_cycle(self.duty_cycle, period_us, self.wanted_period_us);
        log::debug!(
            "period {period_us}us (wanted {}us): duty {:.2}% -> {next:.2}%",
            self.wanted_period_us,
            self.duty_cycle
        );
        self.set_duty_cycle(next)?;
        Ok(true)
    }

    #[cfg(test)]
    pub fn stream(&self) -> &S {
        &self.stream
    }
}

/// Operator command, entered as Alt/ESC followed by a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotorCommand {
    /// Fixed duty cycle of `n * 10` percent; also stops automatic control.
    SetDutyDecile(u8),
    DisableControl,
    EnableControl,
    FastFrequency,
    NormalFrequency,
    IncreaseFrequency,
    DecreaseFrequency,
    Help,
}

impl MotorCommand {
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            '0'..='9' => Some(MotorCommand::SetDutyDecile(key as u8 - b'0')),
            'd' => Some(MotorCommand::DisableControl),
            'e' => Some(MotorCommand::EnableControl),
            'F' => Some(MotorCommand::FastFrequency),
            'f' => Some(MotorCommand::NormalFrequency),
            '+' => Some(MotorCommand::IncreaseFrequency),
            '-' => Some(MotorCommand::DecreaseFrequency),
            'h' => Some(MotorCommand::Help),
            _ => None,
        }
    }
}

const HELP: &str = "\
Alt-0..9: Set Duty Cycle to 0..90% & disable motor control
Alt-e: Enable automatic motor control
Alt-d: Disable automatic motor control
Alt-F: Set wanted frequency to 21 Hz
Alt-f: Set wanted frequency to 16 Hz
Alt-+: Increase wanted frequency by 0.2 Hz
Alt--: Decrease wanted frequency by 0.2 Hz
";

/// Motor state shared by the telemetry path and the keyboard commands.
/// `motor == None` means motor control was disabled at startup.
pub struct MotorContext<S> {
    motor: Option<MotorController<S>>,
    auto_control: bool,
}

impl<S: Read + Write> MotorContext<S> {
    pub fn new(motor: MotorController<S>, auto_control: bool) -> Self {
        Self {
            motor: Some(motor),
            auto_control,
        }
    }

    pub fn disabled() -> Self {
        Self {
            motor: None,
            auto_control: false,
        }
    }

    pub fn motor(&self) -> Option<&MotorController<S>> {
        self.motor.as_ref()
    }

    pub fn auto_control(&self) -> bool {
        self.auto_control
    }

    /// Forwards a period report to the controller when automatic control
    /// is on. Returns whether a controller step was taken.
    pub fn on_period(&mut self, period_us: u32) -> Result<bool, MotorError> {
        match (&mut self.motor, self.auto_control) {
            (Some(motor), true) => motor.control(period_us),
            _ => Ok(false),
        }
    }

    /// Runs the command bound to `key` and prints the motor report.
    pub fn execute(&mut self, key: char, out: &mut impl Write) -> anyhow::Result<()> {
        let Some(motor) = self.motor.as_mut() else {
            writeln!(out, "Motor has been disabled with -d command line option")?;
            return Ok(());
        };

        match MotorCommand::from_key(key) {
            Some(MotorCommand::SetDutyDecile(n)) => {
                motor.set_duty_cycle(f64::from(n) * 10.0)?;
                self.auto_control = false;
            }
            Some(MotorCommand::DisableControl) => self.auto_control = false,
            Some(MotorCommand::EnableControl) => self.auto_control = true,
            Some(MotorCommand::FastFrequency) => motor.set_wanted_frequency(FAST_FREQUENCY_HZ),
            Some(MotorCommand::NormalFrequency) => {
                motor.set_wanted_frequency(NORMAL_FREQUENCY_HZ)
            }
            Some(MotorCommand::IncreaseFrequency) => {
                motor.set_wanted_frequency(motor.wanted_frequency() + FREQUENCY_STEP_HZ)
            }
            Some(MotorCommand::DecreaseFrequency) => {
                // keep the wanted period finite
                let f = (motor.wanted_frequency() - FREQUENCY_STEP_HZ).max(FREQUENCY_STEP_HZ);
                motor.set_wanted_frequency(f);
            }
            Some(MotorCommand::Help) => out.write_all(HELP.as_bytes())?,
            None => log::debug!("no motor command bound to {key:?}"),
        }

        writeln!(out)?;
        writeln!(out, "    Motor duty cycle:        {:5.2} %", motor.duty_cycle())?;
        writeln!(
            out,
            "    Wanted motor frequency:  {:5.2} Hz",
            motor.wanted_frequency()
        )?;
        writeln!(
            out,
            "    Automatic motor control: {}",
            if self.auto_control {
                "enabled"
            } else {
                "disabled"
            }
        )?;
        Ok(())
    }
}
