mod command_file;
mod config;
mod keyboard;
mod link;
mod motor;
mod orchestrator;
mod terminal;
#[cfg(test)]
mod testing;
mod transfer;
mod transport;

use anyhow::{Context, Result, bail};
use clap::Parser;
use command_file::CommandFile;
use config::{Config, MotorConfig};
use dialoguer::{Select, theme::ColorfulTheme};
use keyboard::{KeyEvent, Keyboard};
use link::Link;
use motor::{MotorContext, MotorController};
use orchestrator::{interactive_download, run_command};
use crossterm::tty::IsTty;
use serialport::{SerialPortInfo, SerialPortType, available_ports};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use terminal::{CrlfWriter, RawModeGuard};
use transport::Transport;

const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Bluetooth terminal for the POV cylinder, with closed-loop rotation speed control.
#[derive(Parser, Debug)]
#[command(name = "pov-term", version)]
struct Cli {
    /// Enable automatic motor control at start.
    #[arg(short, long)]
    enable_control: bool,
    /// Disable motor control via TCP completely.
    #[arg(short, long)]
    disable_motor: bool,
    /// Serial device; overrides the config file.
    #[arg(short, long)]
    port: Option<String>,
    /// Configuration file (missing file = defaults).
    #[arg(short, long, default_value = "pov-term.toml")]
    config: PathBuf,
    /// Pause between selecting the download menu and sending an image, e.g. 1s/500ms.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    settle: Duration,
    /// Image files offered by the download command (`f`).
    files: Vec<PathBuf>,
}

fn main() -> Result<()> {
    // raw mode leaves output post-processing off, so records carry their own CR
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}\r",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    let device = match cli.port.clone().or_else(|| cfg.serial.device.clone()) {
        Some(device) => device,
        None => interactive_select_port()?,
    };
    let transport = Transport::open(&device, cfg.serial.baud, cfg.serial.read_timeout())?;
    let mut motor = connect_motor(&cli, &cfg.motor)?;
    if motor.motor().is_some() {
        log::info!(
            "automatic motor control {}",
            if motor.auto_control() { "enabled" } else { "disabled" }
        );
    }
    let mut command_file = CommandFile::new(
        &cfg.command_file.path,
        cfg.command_file.drive_root.clone(),
    );
    log::debug!("watching {}", command_file.path().display());

    let guard = RawModeGuard::enable().context("switching terminal to raw mode")?;
    let mut keyboard = Keyboard::new(guard.is_active());
    let mut link = Link::new(transport, CrlfWriter::new(io::stdout(), guard.is_active()));

    writeln!(link.console_mut(), "Bluetooth terminal program for POV Cylinder")?;
    writeln!(link.console_mut(), "Press '.' to quit")?;
    link.console_mut().flush()?;

    let result = run(&mut link, &mut motor, &mut keyboard, &mut command_file, &cli);
    drop(guard);
    result?;
    log::info!("closing {device} (last status: {})", link.status().to_string().trim_end());
    Ok(())
}

fn connect_motor(cli: &Cli, cfg: &MotorConfig) -> Result<MotorContext<TcpStream>> {
    if cli.disable_motor {
        log::info!("motor control disabled");
        return Ok(MotorContext::disabled());
    }
    let mut motor = MotorController::connect(&cfg.host, cfg.port, cfg.wanted_frequency_hz)
        .context("motor actuator")?;
    motor
        .set_duty_cycle(cfg.start_duty_cycle)
        .context("setting start duty cycle")?;
    Ok(MotorContext::new(motor, cli.enable_control))
}

fn run<P, W, S>(
    link: &mut Link<P, W>,
    motor: &mut MotorContext<S>,
    keyboard: &mut Keyboard,
    command_file: &mut CommandFile,
    cli: &Cli,
) -> Result<()>
where
    P: Read + Write,
    W: Write,
    S: Read + Write,
{
    loop {
        let mut busy = false;

        if link.has_byte_ready()? {
            link.next_char(motor)?;
            busy = true;
        }

        if let Some(event) = keyboard.poll()? {
            busy = true;
            match event {
                KeyEvent::Char('.') | KeyEvent::Interrupt => return Ok(()),
                KeyEvent::Char('f') => {
                    interactive_download(link, &cli.files, || keyboard.wait_char())?
                }
                KeyEvent::Char(c) => {
                    let mut buf = [0u8; 4];
                    link.send(c.encode_utf8(&mut buf).as_bytes())?;
                }
                KeyEvent::Motor(key) => {
                    motor.execute(key, link.console_mut())?;
                    link.console_mut().flush()?;
                }
            }
        }

        if let Some(command) = command_file.poll() {
            run_command(link, motor, &command, cli.settle)?;
            busy = true;
        }

        if !busy {
            thread::sleep(IDLE_SLEEP);
        }
    }
}

fn interactive_select_port() -> Result<String> {
    if !io::stdout().is_tty() {
        bail!("no serial device configured; pass --port or set serial.device");
    }
    let ports = available_ports()?;
    if ports.is_empty() {
        bail!("no serial ports found; pass --port explicitly");
    }
    let items: Vec<String> = ports.iter().map(describe_port).collect();
    let idx = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the cylinder's serial port (arrows to move, enter to confirm)")
        .items(&items)
        .default(0)
        .interact()?;
    ports
        .into_iter()
        .nth(idx)
        .map(|p| p.port_name)
        .context("selected port disappeared")
}

fn describe_port(p: &SerialPortInfo) -> String {
    match &p.port_type {
        SerialPortType::UsbPort(info) => format!(
            "{} (vid={:04x} pid={:04x} {})",
            p.port_name,
            info.vid,
            info.pid,
            info.product.as_deref().unwrap_or("")
        ),
        SerialPortType::BluetoothPort => format!("{} (bluetooth)", p.port_name),
        _ => p.port_name.clone(),
    }
}
