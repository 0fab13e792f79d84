//! Command shell
//!
//! Line-oriented front end for [`MacDriver`]:
//!
//! | Input                  | Action                          |
//! |------------------------|---------------------------------|
//! | `reset`, `clear`       | reset                           |
//! | `write a b`, `load a b`| write decimal u16 operands      |
//! | `sum`                  | `c += a * b`                    |
//! | `read`                 | print `c` in decimal and hex    |
//! | `help`                 | command summary                 |
//! | `quit`                 | leave the session               |
//!
//! Anything else is reported as unrecognized and the session continues.
//! GPIO failures are fatal and propagate to the caller.

pub mod transcript;

pub use transcript::Transcript;

use crate::gpio::Gpio;
use crate::protocol::MacDriver;
use anyhow::{Context, Result};
use colored::Colorize;
use std::future::Future;
use std::io::{self, BufRead, BufReader, Write};
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::mpsc;

const HELP: &str = "\
Commands:
  reset     : Sets all registers (a, b, and c) to zero (alias: clear)
  write a b : Write decimal values a and b to registers a and b (alias: load)
  sum       : Do the c = c + a*b operation
  read      : Read the value of c
  quit      : Exit this program
  help      : Show this help
";

/// Parsed command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellCommand {
    Reset,
    Write { a: u16, b: u16 },
    Sum,
    Read,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unrecognized command: {0:?}")]
    Unrecognized(String),
}

/// Operand: plain decimal digits that fit in 16 bits
fn parse_operand(token: Option<&str>) -> Option<u16> {
    let token = token?;
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

impl FromStr for ShellCommand {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let unrecognized = || ParseError::Unrecognized(line.trim().to_string());
        let mut tokens = line.split_whitespace();

        let command = match tokens.next() {
            Some("reset") | Some("clear") => ShellCommand::Reset,
            Some("sum") => ShellCommand::Sum,
            Some("read") => ShellCommand::Read,
            Some("help") => ShellCommand::Help,
            Some("quit") => ShellCommand::Quit,
            Some("write") | Some("load") => {
                let a = parse_operand(tokens.next()).ok_or_else(unrecognized)?;
                let b = parse_operand(tokens.next()).ok_or_else(unrecognized)?;
                ShellCommand::Write { a, b }
            }
            _ => return Err(unrecognized()),
        };

        if tokens.next().is_some() {
            return Err(unrecognized());
        }
        Ok(command)
    }
}

/// Whether the session goes on after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Shell<G: Gpio, W: Write> {
    driver: MacDriver<G>,
    out: W,
    show_shadow: bool,
    transcript: Option<Transcript>,
}

impl<G: Gpio, W: Write> Shell<G, W> {
    pub fn new(driver: MacDriver<G>, out: W) -> Self {
        Self {
            driver,
            out,
            show_shadow: false,
            transcript: None,
        }
    }

    /// Print the shadow registers after each operation
    pub fn with_show_shadow(mut self, show: bool) -> Self {
        self.show_shadow = show;
        self
    }

    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn driver(&self) -> &MacDriver<G> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut MacDriver<G> {
        &mut self.driver
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Parse and run one input line
    pub fn execute(&mut self, line: &str) -> Result<Flow> {
        if let Some(ref mut transcript) = self.transcript {
            transcript.input(line.trim_end())?;
        }

        match line.parse::<ShellCommand>() {
            Ok(command) => self.dispatch(command),
            Err(e) => {
                log::debug!("{}", e);
                self.report_error(&e.to_string())?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Run one parsed command against the driver
    pub fn dispatch(&mut self, command: ShellCommand) -> Result<Flow> {
        match command {
            ShellCommand::Reset => {
                self.driver.reset().context("reset failed")?;
                self.print_shadow()?;
            }
            ShellCommand::Write { a, b } => {
                self.driver
                    .write(a, b)
                    .with_context(|| format!("write {} {} failed", a, b))?;
                self.print_shadow()?;
            }
            ShellCommand::Sum => {
                self.driver.sum().context("sum failed")?;
                self.print_shadow()?;
            }
            ShellCommand::Read => {
                let value = self.driver.read().context("read failed")?;
                self.emit(&format!("c = {} ({:08x})", value, value))?;
                self.print_shadow()?;
            }
            ShellCommand::Help => {
                for line in HELP.lines() {
                    self.emit(line)?;
                }
            }
            ShellCommand::Quit => {
                self.emit("Goodbye")?;
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    fn print_shadow(&mut self) -> Result<()> {
        if self.show_shadow {
            let line = format!("  {}", self.driver.shadow());
            self.emit(&line)?;
        }
        Ok(())
    }

    fn emit(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{}", line)?;
        if let Some(ref mut transcript) = self.transcript {
            transcript.output(line)?;
        }
        Ok(())
    }

    fn report_error(&mut self, message: &str) -> Result<()> {
        writeln!(self.out, "{} {}", "[ERROR]".red().bold(), message)?;
        if let Some(ref mut transcript) = self.transcript {
            transcript.output(message)?;
        }
        Ok(())
    }

    /// Interactive loop: run lines from `lines` until `quit`, end of input
    /// or `shutdown` completes.
    ///
    /// `shutdown` is only observed between commands; a transaction in
    /// progress always runs to completion.
    pub async fn run<F>(
        &mut self,
        lines: &mut mpsc::Receiver<io::Result<String>>,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            self.out.flush()?;
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    log::info!("termination requested, leaving command loop");
                    break;
                }
                line = lines.recv() => match line {
                    Some(Ok(line)) => {
                        if self.execute(&line)? == Flow::Quit {
                            break;
                        }
                    }
                    Some(Err(e)) => return Err(e).context("Failed to read command input"),
                    None => {
                        log::info!("end of input");
                        break;
                    }
                },
            }
        }

        self.out.flush()?;
        Ok(())
    }

    /// Run a command script until its end, `quit` or `shutdown`.
    ///
    /// Blank lines and `#` comments are skipped. `shutdown` is checked
    /// before every line, so a termination request stops the script between
    /// commands and the caller can still release the pins.
    pub async fn run_script<R, F>(&mut self, mut reader: R, shutdown: F) -> Result<()>
    where
        R: BufRead,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut number = 0usize;

        loop {
            // yield so a pending signal is delivered before the next line
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    log::info!("termination requested, stopping script before line {}", number + 1);
                    break;
                }
                _ = tokio::task::yield_now() => {}
            }

            number += 1;
            let line = match read_line_lossy(&mut reader)
                .with_context(|| format!("Failed to read script line {}", number))?
            {
                Some(line) => line,
                None => break,
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            log::debug!("script line {}: {}", number, trimmed);
            if self.execute(trimmed)? == Flow::Quit {
                break;
            }
        }
        self.out.flush()?;
        Ok(())
    }

    /// Return every protocol pin to input
    pub fn release(&mut self) -> Result<()> {
        self.driver.release().context("Failed to release GPIO pins")
    }

    /// Release the pins and hand back the output sink
    pub fn finish(mut self) -> Result<W> {
        self.release()?;
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Read one line without its terminator; `None` at end of input.
///
/// Bytes that are not valid UTF-8 are replaced rather than rejected, so a
/// garbled line reaches the parser and is reported like any other
/// unrecognized input.
pub fn read_line_lossy<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf)? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Read `reader` on a dedicated thread and forward each line.
///
/// A blocking read cannot be cancelled, so it must not hold up runtime
/// shutdown; the thread is detached and dies with the process.
pub fn spawn_line_reader<R>(mut reader: R) -> mpsc::Receiver<io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || loop {
        let line = match read_line_lossy(&mut reader) {
            Ok(Some(line)) => Ok(line),
            Ok(None) => break,
            Err(e) => Err(e),
        };
        let failed = line.is_err();
        if tx.blocking_send(line).is_err() || failed {
            break;
        }
    });
    rx
}

pub fn spawn_stdin_reader() -> mpsc::Receiver<io::Result<String>> {
    spawn_line_reader(BufReader::new(io::stdin()))
}
