//! Process record: the PID of the serving instance, kept on disk so a second
//! invocation can find and signal it.

use crate::error::ControlError;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// World-readable so unprivileged `-s` invocations can read the record.
const PID_FILE_MODE: u32 = 0o644;

/// Write `pid` to `path`, replacing any previous record.
pub fn write_pid_file(path: &Path, pid: u32) -> io::Result<()> {
    atomic_write(path, pid.to_string().as_bytes(), Some(PID_FILE_MODE))
}

/// Replace `path` with `content` so a concurrent reader sees either the old
/// record or the new one, never a partial write.
///
/// Writes a sibling temp file, fsyncs it, renames it over `path` and then
/// syncs the directory. Missing parent directories are created. A failed
/// rename removes the temp file.
pub(crate) fn atomic_write(path: &Path, content: &[u8], mode: Option<u32>) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "record path has no file name")
    })?;
    let staged = dir.join(format!(
        ".{}.tmp.{}",
        name.to_string_lossy(),
        std::process::id()
    ));

    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        opts.mode(mode.unwrap_or(PID_FILE_MODE));
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = opts.open(&staged)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&staged, path) {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }

    #[cfg(unix)]
    {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }

    Ok(())
}

/// Read the PID stored at `path`.
///
/// Surrounding whitespace is tolerated (records written by hand usually end
/// in a newline). Zero and negative values are rejected: handed to `kill`,
/// they would address whole process groups.
pub fn read_pid_file(path: &Path) -> Result<i32, ControlError> {
    let content = fs::read_to_string(path).map_err(|source| ControlError::ReadPidFile {
        path: path.to_path_buf(),
        source,
    })?;

    match content.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(ControlError::InvalidPid {
            path: path.to_path_buf(),
            content,
        }),
    }
}
