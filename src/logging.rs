//! Line-oriented logging for the wallet service.
//!
//! Every line carries a wall-clock timestamp and the emitting source
//! location:
//!
//! ```text
//! 20261019T09:14:03.512 - src/contacts.rs:211 - transfer: 200.00 main-wallet -> c-9f2a1b
//! ```
//!
//! On a terminal the timestamp and location are dimmed, and user ids and
//! wallet addresses are shortened and given a stable colour so the same
//! party is easy to follow across lines. Output goes to stderr unless
//! [`set_writer`] installs another destination.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

static COLOUR: AtomicBool = AtomicBool::new(false);

static WRITER: LazyLock<Mutex<Box<dyn Write + Send>>> =
    LazyLock::new(|| Mutex::new(Box::new(io::stderr())));

/// Detect colour support on stderr. Call once at startup.
pub fn init() {
    COLOUR.store(io::stderr().is_terminal(), Ordering::Relaxed);
}

/// Send all subsequent [`wlog!`] output to `w` (colour is switched off).
pub fn set_writer(w: Box<dyn Write + Send>) {
    COLOUR.store(false, Ordering::Relaxed);
    *WRITER.lock().unwrap_or_else(PoisonError::into_inner) = w;
}

pub fn colour_enabled() -> bool {
    COLOUR.load(Ordering::Relaxed)
}

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

const PALETTE: &[&str] = &[
    "\x1b[91m", "\x1b[92m", "\x1b[93m", "\x1b[94m", "\x1b[95m", "\x1b[96m", "\x1b[32m",
    "\x1b[34m", "\x1b[35m", "\x1b[36m",
];

const SHORT_LEN: usize = 6;

fn palette_for(id: &str) -> &'static str {
    let h = id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    PALETTE[h as usize % PALETTE.len()]
}

fn shorten(id: &str) -> &str {
    match id.char_indices().nth(SHORT_LEN) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

fn tagged(prefix: &str, id: &str) -> String {
    let short = shorten(id);
    if colour_enabled() {
        format!("{}{prefix}{short}{RESET}", palette_for(id))
    } else {
        format!("{prefix}{short}")
    }
}

/// Short form of a user id, e.g. `u-4be1c0`.
pub fn user(id: &str) -> String {
    tagged("u-", id)
}

/// Short form of a wallet address or contact id, e.g. `w-CBDC7F`.
///
/// The main-wallet pseudo-endpoint is printed in full.
pub fn wallet(id: &str) -> String {
    if id == crate::model::MAIN_WALLET_ID {
        return id.to_string();
    }
    tagged("w-", id)
}

/// Current UTC time as `YYYYMMDDTHH:MM:SS.mmm`.
pub fn format_timestamp() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_epoch.as_secs();
    let (y, m, d) = civil_from_days((secs / 86_400) as i64);
    let tod = secs % 86_400;
    format!(
        "{y:04}{m:02}{d:02}T{:02}:{:02}:{:02}.{:03}",
        tod / 3600,
        (tod % 3600) / 60,
        tod % 60,
        since_epoch.subsec_millis()
    )
}

// Days since 1970-01-01 to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// Backing function for [`wlog!`].
pub fn emit(file: &str, line: u32, msg: &str) {
    let ts = format_timestamp();
    let text = if colour_enabled() {
        format!("{DIM}{ts} {file}:{line}{RESET} {msg}")
    } else {
        format!("{ts} - {file}:{line} - {msg}")
    };
    let mut w = WRITER.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = writeln!(w, "{text}");
}

/// Log a formatted line with timestamp and call site.
///
/// ```ignore
/// wlog!("contacts: fetched {} for {}", n, logging::user(&owner));
/// ```
#[macro_export]
macro_rules! wlog {
    ($($arg:tt)*) => {{
        $crate::logging::emit(file!(), line!(), &format!($($arg)*));
    }};
}
