use std::error::Error;
use std::fmt::{Arguments, Display};
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// Target used for all log-records generated by this crate
pub const LOG_TARGET: &str = "crosscall";

/// Trait used when visiting all the log-record's key-value pairs
///
/// Anything that isn't an integer, a boolean or a plain string is
/// passed through `kv_fmt` using `format_args!`, so the logger can
/// format it straight into its output without allocating.
///
/// The visitor can't terminate the visit early.  If it hits an
/// error, it has to store it itself and ignore any further calls.
pub trait LogVisitor {
    fn kv_u64(&mut self, key: &str, val: u64);
    fn kv_i64(&mut self, key: &str, val: i64);
    fn kv_bool(&mut self, key: &str, val: bool);
    fn kv_str(&mut self, key: &str, val: &str);
    fn kv_fmt(&mut self, key: &str, val: &Arguments<'_>);
}

/// Log record that is passed to a logger
pub struct LogRecord<'a> {
    /// Logging level
    pub level: LogLevel,
    /// Logging target, or ""
    pub target: &'a str,
    /// Freeform formatted text.  This can be output with any macro
    /// that accepts a format-string, e.g. `println!("{}", fmt)`.
    pub fmt: Arguments<'a>,
    /// Key-value pairs.  Call this function with your own
    /// [`LogVisitor`] and all the key-value pairs will be passed to
    /// that visitor in sequence.
    ///
    /// [`LogVisitor`]: trait.LogVisitor.html
    pub kvscan: &'a dyn Fn(&mut dyn LogVisitor),
}

/// Levels for logging
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u32)]
#[non_exhaustive]
pub enum LogLevel {
    /// Tracing (very low priority or verbose logging)
    Trace = 0,

    /// Debugging (low priority logging)
    Debug = 1,

    /// Informational logging
    Info = 2,

    /// Warnings
    Warn = 3,

    /// Errors
    Error = 4,

    /// Used to disable logging.  Anything logged at this level is
    /// ignored.
    Off = 5,
}

impl LogLevel {
    const ALL: [LogLevel; 6] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
        Self::Off,
    ];

    /// Return the name of the [`LogLevel`] as a static string.
    ///
    /// [`LogLevel`]: enum.LogLevel.html
    pub fn name(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Off => "OFF",
        }
    }

    /// Return a slice containing all defined logging levels
    pub fn all_levels() -> &'static [LogLevel] {
        &Self::ALL
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name().fmt(f)
    }
}

impl FromStr for LogLevel {
    type Err = LogLevelError;

    /// Case-insensitive match against the names returned by
    /// [`LogLevel::name`]
    ///
    /// [`LogLevel::name`]: enum.LogLevel.html#method.name
    fn from_str(s: &str) -> Result<LogLevel, LogLevelError> {
        let s = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|level| s.eq_ignore_ascii_case(level.name()))
            .ok_or(LogLevelError)
    }
}

/// Invalid [`LogLevel`] passed to [`LogLevel::from_str`]
///
/// [`LogLevel::from_str`]: enum.LogLevel.html#method.from_str
/// [`LogLevel`]: enum.LogLevel.html
#[derive(Debug, Eq, PartialEq)]
pub struct LogLevelError;
impl Error for LogLevelError {}
impl Display for LogLevelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "invalid logging level".fmt(f)
    }
}

/// Filter for logging levels
///
/// A "copy" value representing a set of enabled logging levels.
/// Filters can be combined using `|` and `|=`.  Converting from a
/// [`LogLevel`] enables that level and all more severe ones.
///
/// [`LogLevel`]: enum.LogLevel.html
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct LogFilter(u32);

impl LogFilter {
    /// Return a [`LogFilter`] with no levels enabled
    ///
    /// [`LogFilter`]: struct.LogFilter.html
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Test whether the given [`LogLevel`] is enabled
    ///
    /// [`LogLevel`]: enum.LogLevel.html
    #[inline]
    pub fn allows(&self, level: LogLevel) -> bool {
        0 != (self.0 & (1 << (level as u32)))
    }

    /// Test whether the set of enabled levels is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl From<LogLevel> for LogFilter {
    /// Enables `level` and every more severe level.
    /// [`LogLevel::Off`] gives no levels enabled.
    ///
    /// [`LogLevel::Off`]: enum.LogLevel.html#variant.Off
    #[inline]
    fn from(level: LogLevel) -> Self {
        let errors_and_below = (1 << (LogLevel::Error as u32 + 1)) - 1;
        Self(errors_and_below & !((1 << level as u32) - 1))
    }
}

impl BitOr for LogFilter {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for LogFilter {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Display for LogFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "LogFilter(".fmt(f)?;
        let mut first = true;
        for level in LogLevel::all_levels() {
            if self.allows(*level) {
                if !first {
                    ",".fmt(f)?;
                }
                first = false;
                level.name().fmt(f)?;
            }
        }
        ")".fmt(f)
    }
}

impl FromStr for LogFilter {
    type Err = LogLevelError;

    /// Parse a comma-separated list such as `"debug"` or
    /// `"warn,trace"`; each entry is converted as by
    /// [`LogFilter::from`]
    ///
    /// [`LogFilter::from`]: struct.LogFilter.html#method.from
    fn from_str(s: &str) -> Result<LogFilter, LogLevelError> {
        let mut rv = LogFilter::new();
        for level in s.split(',') {
            rv |= LogFilter::from(LogLevel::from_str(level)?);
        }
        Ok(rv)
    }
}
