//! Minimal file helpers for writing batch artifacts.

use std::fs::{create_dir_all, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Writes `lines` to `path`, one per line, creating parent directories.
pub fn write_lines(path: impl AsRef<Path>, lines: &[String]) -> io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for line in lines {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}
