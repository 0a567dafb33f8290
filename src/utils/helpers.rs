/// Helper utilities for flashbackup

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use rand::RngCore;

use crate::utils::constants::DAY_IN_SECONDS;

/// Human-readable size in binary units ("512 B", "1.50 MB")
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

/// Coarse duration for tables: seconds are dropped past an hour, minutes past a day
pub fn format_duration(seconds: u64) -> String {
    let coarse = if seconds >= DAY_IN_SECONDS {
        seconds - seconds % 3_600
    } else if seconds >= 3_600 {
        seconds - seconds % 60
    } else {
        seconds
    };
    humantime::format_duration(Duration::from_secs(coarse)).to_string()
}

/// Age of `then` relative to `now`, formatted; future times read as "0s"
pub fn format_age(then: DateTime<Local>, now: DateTime<Local>) -> String {
    let secs = (now - then).num_seconds().max(0) as u64;
    format_duration(secs)
}

/// Mask sensitive data (show only first and last N characters)
pub fn mask_sensitive(value: &str, visible_chars: usize) -> String {
    if value.chars().count() <= visible_chars * 2 {
        "*".repeat(value.chars().count())
    } else {
        let start: String = value.chars().take(visible_chars).collect();
        let end: String = value
            .chars()
            .rev()
            .take(visible_chars)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("{}...{}", start, end)
    }
}

/// Random bytes, hex encoded (output is twice `bytes` long)
pub fn generate_hex_string(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Whether `path` is a directory a new file can be created in
pub fn is_dir_writable<P: AsRef<Path>>(path: P) -> bool {
    let dir = path.as_ref();
    if !dir.is_dir() {
        return false;
    }

    let probe = dir.join(format!(".flashbackup-write-{}", generate_hex_string(4)));
    match std::fs::OpenOptions::new().write(true).create_new(true).open(&probe) {
        Ok(_) => std::fs::remove_file(&probe).is_ok(),
        Err(_) => false,
    }
}

/// Resolve a program the way the shell would: paths are checked directly,
/// bare names are searched on `PATH`
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|path| is_executable(path))
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
