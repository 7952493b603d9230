use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::ERRORS_LOG_FILE;
use crate::utils::get_utc_iso_datetime;

/// Append an entry to the operator-facing errors log (`errors.log` in the working directory).
///
/// Logging must never fail the operation being logged, so an unwritable log
/// only produces a tracing warning.
pub fn write_error_to_log(error_type: &str, error_message: &str) {
    if let Err(e) = append_log_entry(Path::new(ERRORS_LOG_FILE), error_type, error_message) {
        tracing::warn!(file = ERRORS_LOG_FILE, error = %e, "Cannot write errors log");
    }
}

/// Append one timestamped `[time] type:\nmessage` block to `path`.
pub fn append_log_entry(path: &Path, error_type: &str, error_message: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(
        file,
        "\n[{}] {}:\n{}\n",
        get_utc_iso_datetime(),
        error_type,
        error_message
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");

        append_log_entry(&path, "Schema Sync Error", "first").unwrap();
        append_log_entry(&path, "Upload Error", "second").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("] Schema Sync Error:\nfirst\n"));
        assert!(contents.contains("] Upload Error:\nsecond\n"));
        assert!(contents.find("first").unwrap() < contents.find("second").unwrap());
    }
}
