//! Command sequences played against the cylinder's menu.
//!
//! Every step waits for the cylinder's own prompt before sending the next
//! bytes; sending ahead of the prompt desynchronises the firmware's menu.

use crate::link::Link;
use crate::motor::MotorContext;
use crate::transfer::{TransferError, TransferReport, send_file};
use anyhow::{Result, bail};
use povcyl_protocol::{CATALOG, catalog_index_digits};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CR: u8 = b'\r';
/// Main menu: show a built-in image.
const MENU_SHOW_BUILTIN: u8 = b'y';
/// Main menu: set the rotation counter.
const MENU_SET_ROTATION: u8 = b's';
/// Main menu: receive an image transfer.
const MENU_DOWNLOAD: u8 = b'f';
/// Main menu: leave the menu and start displaying.
const MENU_EXIT: u8 = b'x';
/// Files are picked with a single letter.
const MAX_PICK_FILES: usize = 26;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Show the image stored at `index` of the firmware's catalog.
    Builtin {
        index: usize,
        rotation_increment: u8,
    },
    /// Transfer an image file and show it.
    External { path: PathBuf },
}

impl Command {
    pub fn builtin(index: usize) -> Result<Self> {
        let Some(image) = CATALOG.get(index) else {
            bail!("no built-in image at index {index}");
        };
        Ok(Command::Builtin {
            index,
            rotation_increment: image.rotation_increment,
        })
    }
}

pub fn run_command<P, W, S>(
    link: &mut Link<P, W>,
    motor: &mut MotorContext<S>,
    command: &Command,
    settle: Duration,
) -> Result<()>
where
    P: Read + Write,
    W: Write,
    S: Read + Write,
{
    match command {
        Command::Builtin {
            index,
            rotation_increment,
        } => show_builtin(link, motor, *index, *rotation_increment),
        Command::External { path } => show_external(link, motor, path, settle),
    }
}

fn show_builtin<P, W, S>(
    link: &mut Link<P, W>,
    motor: &mut MotorContext<S>,
    index: usize,
    rotation_increment: u8,
) -> Result<()>
where
    P: Read + Write,
    W: Write,
    S: Read + Write,
{
    let digits = catalog_index_digits(index)?;
    log::info!("showing built-in image {index}");

    link.send_byte(MENU_SHOW_BUILTIN)?;
    link.wait_for_prompt(motor)?;
    link.send(&[digits[0], digits[1], CR])?;

    // rotation increment: keep the default
    link.wait_for_prompt(motor)?;
    link.send_byte(CR)?;

    if rotation_increment == 0 {
        // rotation value: keep the default
        link.wait_for_prompt(motor)?;
        link.send_byte(CR)?;
    }
    Ok(())
}

fn show_external<P, W, S>(
    link: &mut Link<P, W>,
    motor: &mut MotorContext<S>,
    path: &Path,
    settle: Duration,
) -> Result<()>
where
    P: Read + Write,
    W: Write,
    S: Read + Write,
{
    log::info!("showing external image {}", path.display());
    writeln!(link.console_mut())?;

    link.send_byte(CR)?;
    link.wait_for_menu(motor)?;

    link.send_byte(MENU_SET_ROTATION)?;
    link.wait_for_prompt(motor)?;
    link.send(&[b'1', CR])?;
    link.wait_for_menu(motor)?;

    link.send_byte(MENU_DOWNLOAD)?;
    std::thread::sleep(settle);
    let result = send_file(link, path);
    finish_transfer(link.console_mut(), result)?;

    link.wait_for_menu(motor)?;
    link.send_byte(MENU_EXIT)?;
    Ok(())
}

/// Interactive download: lists `files` by letter and sends the one picked.
pub fn interactive_download<P, W>(
    link: &mut Link<P, W>,
    files: &[PathBuf],
    pick: impl FnOnce() -> Result<char>,
) -> Result<()>
where
    P: Read + Write,
    W: Write,
{
    let console = link.console_mut();
    writeln!(console, "\nDownload GIF file")?;
    if files.is_empty() {
        writeln!(console, "No GIF files provided in command line")?;
        return Ok(());
    }

    let files = &files[..files.len().min(MAX_PICK_FILES)];
    writeln!(
        console,
        "Please select file to be downloaded (a-{})",
        letter(files.len() - 1)
    )?;
    for (i, file) in files.iter().enumerate() {
        writeln!(console, "{} = {}", letter(i), file.display())?;
    }
    console.flush()?;
    link.send_byte(MENU_DOWNLOAD)?;

    let key = pick()?;
    let picked = (key as usize)
        .checked_sub('a' as usize)
        .and_then(|i| files.get(i));
    let Some(path) = picked else {
        writeln!(link.console_mut(), "Command aborted - Illegal file index")?;
        return Ok(());
    };

    let result = send_file(link, path);
    finish_transfer(link.console_mut(), result)
}

fn letter(index: usize) -> char {
    char::from(b'a' + index as u8)
}

fn finish_transfer<W: Write>(
    console: &mut W,
    result: Result<TransferReport, TransferError>,
) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_fatal() => Err(e.into()),
        Err(e) => {
            log::warn!("transfer aborted: {e}");
            writeln!(console, "Command aborted - {e}")?;
            Ok(())
        }
    }
}
