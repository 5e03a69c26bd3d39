//! Formatting of the human-readable `kspectra` output log.

use std::fmt;

use log;

const KSPECTRA_BANNER_LENGTH: usize = 96;

/// Logs an error to the default logger and the `kspectra-output` logger.
macro_rules! kspectra_error {
    ($fmt:expr $(, $($arg:tt)*)?) => {
        log::error!($fmt, $($($arg)*)?);
        log::error!(target: "kspectra-output", $fmt, $($($arg)*)?);
    }
}

/// Logs a warning to the `kspectra-output` logger.
macro_rules! kspectra_warn {
    ($fmt:expr $(, $($arg:tt)*)?) => { log::warn!(target: "kspectra-output", $fmt, $($($arg)*)?); }
}

/// Logs a main output line to the `kspectra-output` logger.
macro_rules! kspectra_output {
    ($fmt:expr $(, $($arg:tt)*)?) => { log::info!(target: "kspectra-output", $fmt, $($($arg)*)?); }
}

pub(crate) use {kspectra_error, kspectra_output, kspectra_warn};

/// Writes a nicely formatted subtitle.
pub(crate) fn write_subtitle(f: &mut fmt::Formatter<'_>, subtitle: &str) -> fmt::Result {
    let length = subtitle.chars().count();
    let bar = "═".repeat(length);
    writeln!(f, "{subtitle}")?;
    writeln!(f, "{bar}")?;
    Ok(())
}

/// Logs a nicely formatted section title to the `kspectra-output` logger.
pub(crate) fn log_title(title: &str) {
    let length = title.chars().count().max(KSPECTRA_BANNER_LENGTH - 6);
    let bar = "─".repeat(length);
    kspectra_output!("┌──{bar}──┐");
    kspectra_output!("│§ {title:^length$} §│");
    kspectra_output!("└──{bar}──┘");
}

/// Logs a nicely formatted subtitle to the `kspectra-output` logger.
pub(crate) fn log_subtitle(subtitle: &str) {
    let length = subtitle.chars().count();
    let bar = "═".repeat(length);
    kspectra_output!("{}", subtitle);
    kspectra_output!("{}", bar);
}

/// Logs a nicely formatted macro-section beginning to the `kspectra-output` logger.
pub(crate) fn log_macsec_begin(sectitle: &str) {
    let width = KSPECTRA_BANNER_LENGTH - 14;
    let sectitle_space = sectitle.to_string() + " ";
    kspectra_output!("❬❬❬❬❬ [Begin] {sectitle_space:❬<width$}");
}

/// Logs a nicely formatted macro-section ending to the `kspectra-output` logger.
pub(crate) fn log_macsec_end(sectitle: &str) {
    let width = KSPECTRA_BANNER_LENGTH - 14;
    let sectitle_space = sectitle.to_string() + " ";
    kspectra_output!("❭❭❭❭❭ [ End ] {sectitle_space:❭<width$}");
}

/// Turns a boolean into a string of `yes` or `no`.
pub(crate) fn nice_bool(b: bool) -> String {
    if b {
        "yes".to_string()
    } else {
        "no".to_string()
    }
}

/// A trait for logging `kspectra` outputs nicely.
pub(crate) trait KSpectraOutput: fmt::Debug + fmt::Display {
    /// Logs display output nicely.
    fn log_output_display(&self) {
        let lines = self.to_string();
        lines.lines().for_each(|line| {
            kspectra_output!("{line}");
        })
    }
}

// Blanket implementation
impl<T> KSpectraOutput for T where T: fmt::Debug + fmt::Display {}
