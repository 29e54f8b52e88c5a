use chrono::Local;
use fnv::FnvHashMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::fmt::Arguments;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::{fmt, thread};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Severity {
    Verbose,
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Verbose => write!(f, "verbose"),
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Clone)]
pub struct Message {
    pub severity: Severity,
    pub crate_name: String,
    pub message: String,
    pub time: chrono::DateTime<Local>,
    pub thread: thread::ThreadId,
}

/// Receives every message emitted through the global logger
pub trait Sink: Send + Sync {
    fn log(&self, message: &Message);
}

enum SinkEntry {
    Arc(Arc<dyn Sink>),
    Weak(Weak<dyn Sink>),
}

impl SinkEntry {
    fn log(&self, message: &Message) {
        match self {
            SinkEntry::Arc(arc) => arc.log(message),
            SinkEntry::Weak(weak) => {
                if let Some(arc) = weak.upgrade() {
                    arc.log(message);
                }
            }
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            SinkEntry::Arc(_) => true,
            SinkEntry::Weak(weak) => weak.strong_count() > 0,
        }
    }
}

static SINKS: Lazy<RwLock<Vec<SinkEntry>>> = Lazy::new(RwLock::default);
static MIN_SEVERITY: AtomicU8 = AtomicU8::new(Severity::Verbose as u8);
static THREAD_NAMES: Lazy<RwLock<FnvHashMap<thread::ThreadId, Arc<String>>>> =
    Lazy::new(RwLock::default);

#[doc(hidden)]
pub fn internal_log(severity: Severity, crate_name: &str, args: Arguments) {
    if (severity as u8) < MIN_SEVERITY.load(Ordering::Relaxed) && severity != Severity::Fatal {
        return;
    }

    let message = Message {
        severity,
        crate_name: crate_name.to_string(),
        message: args.to_string(),
        time: Local::now(),
        thread: thread::current().id(),
    };

    for sink in SINKS.read().iter() {
        sink.log(&message);
    }

    if message.severity == Severity::Fatal {
        panic!("{}", message.message);
    }
}

/** Sink API */

pub fn register_sink(sink: Arc<dyn Sink>) {
    SINKS.write().push(SinkEntry::Arc(sink));
}

pub fn register_sink_weak<T: Sink + 'static>(sink: Weak<T>) {
    let mut sinks = SINKS.write();
    sinks.retain(SinkEntry::is_alive);
    sinks.push(SinkEntry::Weak(sink));
}

/// Messages below `severity` are dropped before reaching any sink. Fatal messages always go through.
pub fn set_min_severity(severity: Severity) {
    MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
}

/** Thread names */

pub fn set_thread_name(id: thread::ThreadId, name: impl Into<String>) {
    THREAD_NAMES.write().insert(id, Arc::new(name.into()));
}

pub fn set_current_thread_name(name: impl Into<String>) {
    set_thread_name(thread::current().id(), name);
}

pub fn thread_name(id: thread::ThreadId) -> Option<Arc<String>> {
    THREAD_NAMES.read().get(&id).cloned()
}

/** Default logging macros */
#[macro_export]
macro_rules! ze_verbose {
    ($($arg:tt)*) => ({
        $crate::logger::internal_log($crate::logger::Severity::Verbose, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
    })
}

#[macro_export]
macro_rules! ze_info {
    ($($arg:tt)*) => ({
        $crate::logger::internal_log($crate::logger::Severity::Info, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
    })
}

#[macro_export]
macro_rules! ze_warn {
    ($($arg:tt)*) => ({
        $crate::logger::internal_log($crate::logger::Severity::Warn, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
    })
}

#[macro_export]
macro_rules! ze_error {
    ($($arg:tt)*) => ({
        $crate::logger::internal_log($crate::logger::Severity::Error, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
    })
}

#[macro_export]
macro_rules! ze_fatal {
    ($($arg:tt)*) => ({
        $crate::logger::internal_log($crate::logger::Severity::Fatal, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
        unreachable!();
    })
}

/** Default sinks */
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {})
    }
}

impl Sink for StdoutSink {
    fn log(&self, message: &Message) {
        let mut stdout = StandardStream::stdout(ColorChoice::Auto);
        let thread_name = match thread_name(message.thread) {
            None => "Unknown Thread".to_string(),
            Some(str) => str.as_ref().clone(),
        };

        // A broken stdout must never take the logger down with it
        let _ = stdout.set_color(ColorSpec::new().set_fg(Some(match message.severity {
            Severity::Verbose => Color::Cyan,
            Severity::Info => Color::White,
            Severity::Warn => Color::Yellow,
            Severity::Error => Color::Red,
            Severity::Fatal => Color::Rgb(255, 15, 15),
        })));

        let _ = writeln!(
            &mut stdout,
            "[{}] [{}/{}] ({}) {}",
            message.time.format("%H:%M:%S"),
            message.severity,
            thread_name,
            message.crate_name,
            message.message
        );
        let _ = stdout.reset();
        let _ = stdout.flush();
    }
}

/// Keeps every message in memory, mostly useful to assert on emitted warnings
#[derive(Default)]
pub struct MemorySink {
    messages: Mutex<Vec<Message>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.messages
            .lock()
            .iter()
            .any(|message| message.severity == severity && message.message.contains(needle))
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl Sink for MemorySink {
    fn log(&self, message: &Message) {
        self.messages.lock().push(message.clone());
    }
}

#[cfg(test)]
mod tests {
    use crate::logger::{register_sink_weak, set_current_thread_name, thread_name, MemorySink, Severity};
    use std::thread;

    #[test]
    fn memory_sink_receives_messages() {
        let sink = MemorySink::new();
        register_sink_weak(std::sync::Arc::downgrade(&sink));
        ze_warn!("descriptor heap {} is almost full", 3);
        assert!(sink.contains(Severity::Warn, "descriptor heap 3 is almost full"));
    }

    #[test]
    fn thread_names_are_registered() {
        set_current_thread_name("Render Thread");
        assert_eq!(
            thread_name(thread::current().id()).as_deref().map(String::as_str),
            Some("Render Thread")
        );
    }

    #[test]
    #[should_panic(expected = "device removed")]
    fn fatal_panics() {
        ze_fatal!("device removed");
    }
}
