//! Interactive API key entry.

use colored::Colorize;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{self, BufRead, IsTerminal, Write};

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("input cancelled")]
    Interrupted,

    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),
}

/// Source of interactively entered keys
pub trait KeyPrompter {
    /// Ask for a key. Returns the trimmed input, which may be empty.
    fn prompt_key(&mut self, message: &str) -> Result<String, PromptError>;
}

/// Prompts on the controlling terminal, echoing `*` instead of the typed key.
///
/// Falls back to a visible line read (with a warning) when stdin is not a
/// terminal or raw mode is unavailable.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    pub fn new() -> Self {
        Self
    }
}

impl KeyPrompter for TerminalPrompter {
    fn prompt_key(&mut self, message: &str) -> Result<String, PromptError> {
        let mut stderr = io::stderr();

        if io::stdin().is_terminal() {
            if let Ok(guard) = RawModeGuard::enable() {
                write!(stderr, "{}\r\n> ", message.replace('\n', "\r\n"))?;
                stderr.flush()?;
                let key = read_masked(event::read, &mut stderr);
                drop(guard);
                writeln!(stderr)?;
                return key.map(|k| k.trim().to_string());
            }
        }

        writeln!(
            stderr,
            "{} terminal does not support hidden input; your key will be visible",
            "⚠".yellow()
        )?;
        write!(stderr, "{message}\n> ")?;
        stderr.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

/// Restores cooked mode even if reading fails midway.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Collect a key from terminal events, echoing one `*` per character.
fn read_masked(
    mut next_event: impl FnMut() -> io::Result<Event>,
    out: &mut impl Write,
) -> Result<String, PromptError> {
    let mut key = String::new();

    loop {
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = next_event()?
        else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }

        match code {
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                return Err(PromptError::Interrupted);
            }
            KeyCode::Char('d') if modifiers.contains(KeyModifiers::CONTROL) => break,
            KeyCode::Enter => break,
            KeyCode::Backspace => {
                if key.pop().is_some() {
                    write!(out, "\x08 \x08")?;
                    out.flush()?;
                }
            }
            KeyCode::Char(c) => {
                key.push(c);
                write!(out, "*")?;
                out.flush()?;
            }
            _ => {}
        }
    }

    Ok(key)
}
