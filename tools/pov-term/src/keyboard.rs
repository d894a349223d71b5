use anyhow::{Result, bail};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyEvent {
    /// Plain key, passed through to the cylinder unless it is a local command.
    Char(char),
    /// Alt+key or ESC followed by a key: motor command.
    Motor(char),
    /// Ctrl-C; raw mode delivers it as a key instead of a signal.
    Interrupt,
}

/// Turns terminal events into key events. ESC typed on its own arms the
/// next key as a motor command.
#[derive(Debug, Default)]
pub struct KeyTranslator {
    escape_pending: bool,
}

impl KeyTranslator {
    pub fn translate(&mut self, event: Event) -> Option<KeyEvent> {
        let Event::Key(key) = event else {
            return None;
        };
        if key.kind == KeyEventKind::Release {
            return None;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        let ch = match key.code {
            KeyCode::Esc => {
                self.escape_pending = true;
                return None;
            }
            KeyCode::Char('c') if ctrl => {
                self.escape_pending = false;
                return Some(KeyEvent::Interrupt);
            }
            // control bytes go to the cylinder as typed
            KeyCode::Char(c) if ctrl && c.is_ascii_alphabetic() => {
                char::from(c.to_ascii_lowercase() as u8 & 0x1f)
            }
            KeyCode::Char(c) => c,
            KeyCode::Enter => '\r',
            KeyCode::Tab => '\t',
            // what the terminal sends for Backspace in cooked mode
            KeyCode::Backspace => '\x7f',
            _ => {
                self.escape_pending = false;
                return None;
            }
        };

        let escaped = std::mem::take(&mut self.escape_pending);
        if escaped || key.modifiers.contains(KeyModifiers::ALT) {
            Some(KeyEvent::Motor(ch))
        } else {
            Some(KeyEvent::Char(ch))
        }
    }
}

/// Non-blocking keyboard on top of the raw-mode terminal.
pub struct Keyboard {
    attached: bool,
    translator: KeyTranslator,
}

impl Keyboard {
    /// `attached` is false when there is no terminal to read; the keyboard
    /// then stays silent.
    pub fn new(attached: bool) -> Self {
        Self {
            attached,
            translator: KeyTranslator::default(),
        }
    }

    /// Next key if one is waiting.
    pub fn poll(&mut self) -> Result<Option<KeyEvent>> {
        if !self.attached {
            return Ok(None);
        }
        while event::poll(Duration::ZERO)? {
            if let Some(key) = self.translator.translate(event::read()?) {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    /// Blocks for the next plain key; motor keys typed meanwhile are dropped.
    pub fn wait_char(&mut self) -> Result<char> {
        if !self.attached {
            bail!("no keyboard attached");
        }
        loop {
            match self.translator.translate(event::read()?) {
                Some(KeyEvent::Char(c)) => return Ok(c),
                Some(KeyEvent::Interrupt) => bail!("interrupted"),
                _ => {}
            }
        }
    }
}
