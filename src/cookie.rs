//! Resolves the default distribution cookie the way `erl`/OTP nodes do:
//! from the first line of `$HOME/.erlang.cookie` (or, on Windows, the file
//! at `%HOMEDRIVE%%HOMEPATH%\.erlang.cookie`) when the caller hasn't been
//! handed one explicitly (e.g. via a `-setcookie` equivalent flag).

use crate::term::{Atom, AtomError};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CookieError {
    #[error("could not determine the user's home directory")]
    NoHomeDirectory,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Atom(#[from] AtomError),
}

/// Reads the default cookie from `.erlang.cookie` in the user's home
/// directory, trimming the trailing newline `erl` itself writes.
pub fn default_cookie() -> Result<Atom, CookieError> {
    let path = cookie_path()?;
    let content = std::fs::read_to_string(path)?;
    let trimmed = content.trim_end_matches(['\n', '\r']);
    Ok(Atom::new(trimmed)?)
}

fn cookie_path() -> Result<std::path::PathBuf, CookieError> {
    home_dir().map(|home| home.join(".erlang.cookie")).ok_or(CookieError::NoHomeDirectory)
}

#[cfg(unix)]
fn home_dir() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME").map(std::path::PathBuf::from)
}

#[cfg(windows)]
fn home_dir() -> Option<std::path::PathBuf> {
    let drive = std::env::var_os("HOMEDRIVE")?;
    let path = std::env::var_os("HOMEPATH")?;
    let mut buf = std::path::PathBuf::from(drive);
    buf.push(path);
    Some(buf)
}

#[cfg(not(any(unix, windows)))]
fn home_dir() -> Option<std::path::PathBuf> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_home_directory_is_reported() {
        // SAFETY: test runs single-threaded with respect to this var via
        // the default test harness's process-wide env; restored below.
        let saved = std::env::var_os("HOME");
        std::env::remove_var("HOME");
        let result = default_cookie();
        if let Some(value) = saved {
            std::env::set_var("HOME", value);
        }
        #[cfg(unix)]
        assert!(matches!(result, Err(CookieError::NoHomeDirectory)));
        #[cfg(not(unix))]
        let _ = result;
    }
}
