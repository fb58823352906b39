//! The interactive console: one line in, one or more session operations out.
//!
//! ```text
//! > attach; power on
//! > charge 2.4
//! Vcap = 2.4002
//! > int
//! Vcap_saved = 2.3987
//! *> read 4400 4
//! 0x00004400: 0x12 0x34 0x56 0x78
//! *> cont
//! Vcap_restored = 2.3990
//! ```
//!
//! `;` separates commands on a line and `#` starts a comment.  Command names
//! and keyword arguments may be abbreviated to any unambiguous prefix.  A
//! failing command prints its error and skips the rest of the line; the
//! console itself keeps going.
//!
//! Ctrl-C trips the session's [`CancelToken`]: whatever is waiting on the
//! device returns early, and the console prints the next prompt.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use edb_core::protocol::{
    BreakpointType, ChargeMethod, Channel, InterruptContext, InterruptKind, InterruptSource,
    Param, ParamScope, WatchpointEvent,
};
use edb_core::{CaptureWriter, Event, RecordSink, TextSink};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::commands::ParamValue;
use crate::application::observer::{Disposition, EventObserver, HaltOnInterrupt, WatchpointLogger};
use crate::application::session::{CancelToken, Mode, Outcome, Session, SessionError};
use crate::cli::keyword::{match_keyword, resolve, KeywordError, KeywordMatch};
use crate::infrastructure::transport::Connector;

/// Console commands and their usage lines.
pub const COMMANDS: &[(&str, &str)] = &[
    ("echo", "echo <text...>"),
    ("sleep", "sleep <seconds>"),
    ("attach", "attach"),
    ("detach", "detach"),
    ("power", "power <on|off>"),
    ("sense", "sense <channel>"),
    ("reset", "reset"),
    ("stream", "stream <file|-> <seconds|-> <channel...>"),
    ("charge", "charge <volts> [adc|cmp]"),
    ("discharge", "discharge <volts> [adc|cmp]"),
    ("int", "int"),
    ("cont", "cont"),
    ("ebreak", "ebreak <volts> [adc|cmp]"),
    ("break", "break <type> <index> <enable|disable> [energy_volts]"),
    ("watch", "watch <index> <enable|disable>"),
    ("wait", "wait [watchpoint_log.csv]"),
    ("intctx", "intctx [debugger|target]"),
    ("read", "read <hex_address> <length>"),
    ("write", "write <hex_address> <byte...>"),
    ("pc", "pc"),
    ("secho", "secho <hex_byte>"),
    ("decho", "decho <hex_byte>"),
    ("replay", "replay <raw_log>"),
    ("lset", "lset <param> <value>"),
    ("lget", "lget <param>"),
    ("rset", "rset <param> <value>"),
    ("rget", "rget <param>"),
    ("uart", "uart <enable|disable>"),
    ("pending", "pending"),
    ("abandon", "abandon"),
    ("help", "help"),
    ("quit", "quit"),
];

/// Printed after the usage lines by `help`.
pub const HELP_NOTES: &[&str] = &[
    "stream pairs every sample with its TIME; for the raw unpaired byte stream, \
     start with --record <file> (or [session].record_path) and read it back with replay",
];

// ── Errors ────────────────────────────────────────────────────────────────────

/// A command that could not be carried out.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: String },

    #[error(transparent)]
    Keyword(#[from] KeywordError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("console output failed: {0}")]
    Output(#[from] io::Error),
}

// ── Output ────────────────────────────────────────────────────────────────────

/// Shared console output.  The observer and the command loop both print
/// through it, so lines never interleave mid-way.
#[derive(Clone)]
pub struct ConsoleOut(Arc<Mutex<Box<dyn Write + Send>>>);

impl ConsoleOut {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(out))))
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Writes `text` and flushes.
    pub fn print(&self, text: &str) -> io::Result<()> {
        let mut out = self.lock()?;
        out.write_all(text.as_bytes())?;
        out.flush()
    }

    pub fn println(&self, text: &str) -> io::Result<()> {
        self.print(&format!("{text}\n"))
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, Box<dyn Write + Send>>> {
        self.0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "console output lock poisoned"))
    }
}

impl Write for ConsoleOut {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

/// In-memory output, cloneable so a test can read what the console printed.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let bytes = self.0.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "buffer lock poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── Event printing ────────────────────────────────────────────────────────────

pub fn format_interrupt_context(ctx: &InterruptContext) -> String {
    let label = if ctx.kind == InterruptKind::Assert {
        "line:"
    } else {
        "id:"
    };
    match ctx.saved_vcap {
        Some(vcap) => format!("Interrupted: {} {label} {} Vcap_saved = {vcap:.4}", ctx.kind, ctx.id),
        None => format!("Interrupted: {} {label} {}", ctx.kind, ctx.id),
    }
}

pub fn format_watchpoint(hit: &WatchpointEvent) -> String {
    format!(
        "Watchpoint: id: {} time: {:.6} s Vcap = {:.4}",
        hit.id, hit.timestamp, hit.vcap
    )
}

/// Prints asynchronous events and halts on interrupt contexts.
struct ConsoleObserver {
    out: ConsoleOut,
}

impl EventObserver for ConsoleObserver {
    fn on_event(&mut self, event: &Event) -> Disposition {
        let (text, disposition) = match event {
            Event::InterruptContext(ctx) => {
                (format_interrupt_context(ctx) + "\n", Disposition::Halt)
            }
            Event::Watchpoint(hit) => (format_watchpoint(hit) + "\n", Disposition::Continue),
            Event::StdIo(data) if data.text.ends_with('\n') => {
                (data.text.clone(), Disposition::Continue)
            }
            Event::StdIo(data) => (format!("{}\n", data.text), Disposition::Continue),
            _ => return Disposition::Continue,
        };
        if let Err(e) = self.out.print(&text) {
            warn!("console output failed: {e}");
        }
        disposition
    }
}

// ── Argument parsing ──────────────────────────────────────────────────────────

/// Decimal, or hex with a `0x` prefix.
pub fn to_int(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Hex, with or without a `0x` prefix.
pub fn parse_hex(text: &str) -> Option<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

/// `enable` / `disable`, or any prefix of them.
fn parse_toggle(op: &str, usage: &'static str) -> Result<bool, CommandError> {
    match match_keyword(op, &["enable", "disable"]) {
        KeywordMatch::Unique("enable") => Ok(true),
        KeywordMatch::Unique(_) => Ok(false),
        _ => Err(CommandError::Usage(usage)),
    }
}

fn arg<'a>(args: &[&'a str], index: usize, usage: &'static str) -> Result<&'a str, CommandError> {
    args.get(index).copied().ok_or(CommandError::Usage(usage))
}

fn number<T: TryFrom<u64>>(text: &str, what: &'static str) -> Result<T, CommandError> {
    to_int(text)
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| CommandError::InvalidValue {
            what,
            value: text.to_string(),
        })
}

fn hex<T: TryFrom<u64>>(text: &str, what: &'static str) -> Result<T, CommandError> {
    parse_hex(text)
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| CommandError::InvalidValue {
            what,
            value: text.to_string(),
        })
}

fn real<T: std::str::FromStr>(text: &str, what: &'static str) -> Result<T, CommandError> {
    text.parse().map_err(|_| CommandError::InvalidValue {
        what,
        value: text.to_string(),
    })
}

fn method(args: &[&str], index: usize) -> Result<ChargeMethod, CommandError> {
    match args.get(index) {
        Some(word) => Ok(resolve("charger method", word, &ChargeMethod::ALL, ChargeMethod::name)?),
        None => Ok(ChargeMethod::Adc),
    }
}

// ── Console ───────────────────────────────────────────────────────────────────

/// Line-oriented front end over one [`Session`].
pub struct Console<C: Connector> {
    session: Session<C>,
    out: ConsoleOut,
    cancel: CancelToken,
    history: Option<PathBuf>,
    quit: bool,
}

impl<C: Connector> Console<C> {
    /// Wraps `session`, printing to `out`.  Entered lines are appended to
    /// `history` when set.
    pub fn new(mut session: Session<C>, out: ConsoleOut, history: Option<PathBuf>) -> Self {
        session.register_observer(Box::new(ConsoleObserver { out: out.clone() }));
        let cancel = session.cancel_token();
        Self {
            session,
            out,
            cancel,
            history,
            quit: false,
        }
    }

    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn prompt(&self) -> &'static str {
        if self.session.mode() == Mode::Halted {
            "*> "
        } else {
            "> "
        }
    }

    /// Reads lines until EOF or `quit`, then detaches.
    pub fn run(&mut self, input: impl BufRead, interactive: bool) -> io::Result<()> {
        let mut lines = input.lines();
        loop {
            if interactive {
                self.out.print(self.prompt())?;
            }
            let Some(line) = lines.next() else {
                if interactive {
                    self.out.println("")?;
                }
                break;
            };
            let line = line?;
            if interactive {
                self.record_history(&line);
            }
            if !self.execute_line(&line) {
                break;
            }
        }
        self.session.detach();
        Ok(())
    }

    /// Runs every command on `line`.  Returns `false` once `quit` was seen.
    pub fn execute_line(&mut self, line: &str) -> bool {
        let line = line.split('#').next().unwrap_or_default();
        for command in line.split(';') {
            let tokens: Vec<&str> = command.split_whitespace().collect();
            let Some((name, args)) = tokens.split_first() else {
                continue;
            };
            self.cancel.reset();
            if let Err(e) = self.execute(name, args) {
                debug!("command failed: {e:?}");
                if let Err(out) = self.out.println(&format!("error: {e}")) {
                    warn!("console output failed: {out}");
                }
                break;
            }
            if self.quit {
                return false;
            }
        }
        true
    }

    fn record_history(&self, line: &str) {
        let Some(path) = &self.history else { return };
        if line.trim().is_empty() {
            return;
        }
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            warn!(path = %path.display(), "history write failed: {e}");
        }
    }

    fn execute(&mut self, name: &str, args: &[&str]) -> Result<(), CommandError> {
        let (command, usage) = resolve("command", name, COMMANDS, |(command, _)| command)?;
        debug!(command, ?args, "executing");

        match command {
            "echo" => self.out.println(&args.join(" "))?,
            "sleep" => self.sleep(arg(args, 0, usage)?)?,
            "attach" => self.session.attach()?,
            "detach" => self.session.detach(),
            "power" => {
                let on = match arg(args, 0, usage)? {
                    "on" => true,
                    "off" => false,
                    _ => return Err(CommandError::Usage(usage)),
                };
                settle(self.session.power(on)?);
            }
            "sense" => {
                let channel = resolve("channel", arg(args, 0, usage)?, &Channel::ALL, Channel::name)?;
                if let Outcome::Completed(volts) = self.session.sense(channel)? {
                    self.out.println(&format!("{volts:.4}"))?;
                }
            }
            "reset" => settle(self.session.reset_debug_state()?),
            "stream" => self.stream(args, usage)?,
            "charge" | "discharge" => {
                let volts: f32 = real(arg(args, 0, usage)?, "voltage")?;
                let method = method(args, 1)?;
                let outcome = if command == "charge" {
                    self.session.charge(volts, method)?
                } else {
                    self.session.discharge(volts, method)?
                };
                if let Outcome::Completed(Some(vcap)) = outcome {
                    self.out.println(&format!("Vcap = {vcap:.4}"))?;
                }
            }
            "int" => {
                if let Outcome::Completed(vcap) = self.session.interrupt()? {
                    self.out.println(&format!("Vcap_saved = {vcap:.4}"))?;
                }
            }
            "cont" => {
                if let Outcome::Completed(vcap) = self.session.resume()? {
                    self.out.println(&format!("Vcap_restored = {vcap:.4}"))?;
                }
            }
            "ebreak" => {
                let volts: f32 = real(arg(args, 0, usage)?, "voltage")?;
                let method = method(args, 1)?;
                if let Outcome::Completed(ctx) = self.session.break_at_voltage_level(volts, method)? {
                    if let Some(vcap) = ctx.saved_vcap {
                        self.out.println(&format!("Vcap_saved = {vcap:.4}"))?;
                    }
                }
            }
            "break" => {
                let kind = resolve(
                    "breakpoint type",
                    arg(args, 0, usage)?,
                    &BreakpointType::ALL,
                    BreakpointType::name,
                )?;
                let index: u8 = number(arg(args, 1, usage)?, "breakpoint index")?;
                let enable = parse_toggle(arg(args, 2, usage)?, usage)?;
                let level = args
                    .get(3)
                    .map(|v| real::<f32>(v, "energy level"))
                    .transpose()?;
                settle(self.session.toggle_breakpoint(kind, index, enable, level)?);
            }
            "watch" => {
                let index: u8 = number(arg(args, 0, usage)?, "watchpoint index")?;
                let enable = parse_toggle(arg(args, 1, usage)?, usage)?;
                settle(self.session.toggle_watchpoint(index, enable)?);
            }
            "wait" => self.wait(args.first().copied())?,
            "intctx" => {
                let source = match args.first() {
                    Some(word) => resolve(
                        "interrupt source",
                        word,
                        &InterruptSource::ALL,
                        InterruptSource::name,
                    )?,
                    None => InterruptSource::Debugger,
                };
                if let Outcome::Completed(ctx) = self.session.interrupt_context(source)? {
                    self.out.println(&format_interrupt_context(&ctx))?;
                }
            }
            "read" => {
                let address: u32 = hex(arg(args, 0, usage)?, "address")?;
                let len: usize = number(arg(args, 1, usage)?, "length")?;
                if let Outcome::Completed((addr, bytes)) = self.session.read_memory(address, len)? {
                    let mut line = format!("0x{addr:08x}:");
                    for byte in bytes {
                        line.push_str(&format!(" 0x{byte:02x}"));
                    }
                    self.out.println(&line)?;
                }
            }
            "write" => {
                let address: u32 = hex(arg(args, 0, usage)?, "address")?;
                if args.len() < 2 {
                    return Err(CommandError::Usage(usage));
                }
                let bytes = args[1..]
                    .iter()
                    .map(|v| number::<u8>(v, "byte"))
                    .collect::<Result<Vec<_>, _>>()?;
                settle(self.session.write_memory(address, &bytes)?);
            }
            "pc" => {
                if let Outcome::Completed(pc) = self.session.get_pc()? {
                    self.out.println(&format!("0x{pc:08x}"))?;
                }
            }
            "secho" | "decho" => {
                let value: u8 = hex(arg(args, 0, usage)?, "byte")?;
                let outcome = if command == "secho" {
                    self.session.serial_echo(value)?
                } else {
                    self.session.dma_echo(value)?
                };
                if let Outcome::Completed(echoed) = outcome {
                    self.out.println(&format!("0x{echoed:02x}"))?;
                }
            }
            "replay" => self.replay(Path::new(arg(args, 0, usage)?))?,
            "lset" | "rset" => {
                let scope = scope_of(command);
                let param = resolve("parameter", arg(args, 0, usage)?, &Param::ALL, Param::name)?;
                let value = ParamValue::parse(param, arg(args, 1, usage)?)?;
                if let Outcome::Completed(now) = self.session.set_param(scope, param, value)? {
                    self.out.println(&now.to_string())?;
                }
            }
            "lget" | "rget" => {
                let scope = scope_of(command);
                let param = resolve("parameter", arg(args, 0, usage)?, &Param::ALL, Param::name)?;
                if let Outcome::Completed(value) = self.session.get_param(scope, param)? {
                    self.out.println(&value.to_string())?;
                }
            }
            "uart" => {
                let enable = parse_toggle(arg(args, 0, usage)?, usage)?;
                settle(self.session.enable_target_uart(enable)?);
            }
            "pending" => {
                if let Outcome::Completed((handle, reply)) = self.session.finish_pending()? {
                    self.out
                        .println(&format!("{} answered with {}", handle.command, reply.descriptor))?;
                }
            }
            "abandon" => match self.session.abandon_pending() {
                Some(handle) => self.out.println(&format!("abandoned {}", handle.command))?,
                None => self.out.println("nothing outstanding")?,
            },
            "help" => {
                for (_, usage) in COMMANDS {
                    self.out.println(&format!("  {usage}"))?;
                }
                for note in HELP_NOTES {
                    self.out.println(&format!("note: {note}"))?;
                }
            }
            "quit" => self.quit = true,
            _ => return Err(CommandError::Usage(usage)),
        }
        Ok(())
    }

    fn sleep(&self, text: &str) -> Result<(), CommandError> {
        let seconds: f64 = real(text, "duration")?;
        let duration = Duration::try_from_secs_f64(seconds).map_err(|_| CommandError::InvalidValue {
            what: "duration",
            value: text.to_string(),
        })?;
        let deadline = Instant::now() + duration;
        while !self.cancel.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(10)));
        }
        Ok(())
    }

    fn stream(&mut self, args: &[&str], usage: &'static str) -> Result<(), CommandError> {
        let target = arg(args, 0, usage)?;
        let duration = match arg(args, 1, usage)? {
            "-" => None,
            text => Some(real::<f64>(text, "duration")?),
        };
        let channels = args
            .get(2..)
            .filter(|rest| !rest.is_empty())
            .ok_or(CommandError::Usage(usage))?
            .iter()
            .map(|word| resolve("channel", word, &Channel::ALL, Channel::name))
            .collect::<Result<Vec<_>, _>>()?;

        let calibration = *self.session.calibration();
        let report = if target == "-" {
            let mut sink = TextSink::new(self.out.clone(), calibration);
            self.session.stream(&channels, duration, &mut sink)?
        } else {
            let path = PathBuf::from(target);
            let file = File::create(&path).map_err(|source| CommandError::File {
                path: path.clone(),
                source,
            })?;
            let mut sink = CaptureWriter::new(BufWriter::new(file));
            let report = self.session.stream(&channels, duration, &mut sink)?;
            sink.flush()?;
            report
        };

        info!(
            records = report.records,
            dropped = report.dropped_samples,
            elapsed_s = report.elapsed_seconds,
            stop = %report.stop,
            "capture finished"
        );
        if target != "-" {
            self.out.println(&format!(
                "{} records, {:.6} s ({})",
                report.records, report.elapsed_seconds, report.stop
            ))?;
        }
        Ok(())
    }

    fn wait(&mut self, log: Option<&str>) -> Result<(), CommandError> {
        let Some(log) = log else {
            let _ = self.session.wait(&mut HaltOnInterrupt)?;
            return Ok(());
        };
        let path = PathBuf::from(log);
        let file_error = |source| CommandError::File {
            path: path.clone(),
            source,
        };
        let file = File::create(&path).map_err(file_error)?;
        let mut logger = WatchpointLogger::new(BufWriter::new(file)).map_err(file_error)?;
        let result = self.session.wait(&mut logger);
        info!(hits = logger.hits(), path = %path.display(), "watchpoint log closed");
        logger.finish();
        let _ = result?;
        Ok(())
    }

    fn replay(&mut self, path: &Path) -> Result<(), CommandError> {
        let bytes = std::fs::read(path).map_err(|source| CommandError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let summary = self.session.replay(&bytes)?;
        self.out.println(&format!(
            "replayed {} events ({} replies skipped, {} framing errors, {} trailing bytes)",
            summary.events,
            summary.replies_skipped,
            summary.framing_errors,
            summary.trailing_bytes
        ))?;
        Ok(())
    }
}

/// Side-effect commands print nothing; a cancelled wait leaves the reply
/// outstanding for `pending` or `abandon`.
fn settle(outcome: Outcome<()>) {
    if outcome.is_cancelled() {
        info!("cancelled; reply still outstanding");
    }
}

fn scope_of(command: &str) -> ParamScope {
    if command.starts_with('l') {
        ParamScope::Local
    } else {
        ParamScope::Remote
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
