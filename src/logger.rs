use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "romanbath_lib=info,warn";

pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_file_path_for(log_dir, chrono::Local::now().date_naive())
}

fn log_file_path_for(log_dir: &Path, date: NaiveDate) -> PathBuf {
    log_dir.join(format!("app-{}.txt", date.format("%Y-%m-%d")))
}

/// Appends to the day's `app-YYYY-MM-DD.txt`, reopening when the date
/// changes or the file disappears.
pub struct DailyLogFile {
    log_dir: PathBuf,
    current: Mutex<Option<(PathBuf, File)>>,
}

impl DailyLogFile {
    pub fn new(log_dir: &Path) -> Result<Self, String> {
        fs::create_dir_all(log_dir).map_err(|e| format!("Failed to create log directory: {}", e))?;
        Ok(Self {
            log_dir: log_dir.to_path_buf(),
            current: Mutex::new(None),
        })
    }

    fn write_for_date(&self, buf: &[u8], date: NaiveDate) -> io::Result<usize> {
        let path = log_file_path_for(&self.log_dir, date);
        let mut current = self
            .current
            .lock()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Lock error: {}", e)))?;

        let needs_new_file = match current.as_ref() {
            Some((open_path, _)) => *open_path != path || !path.exists(),
            None => true,
        };
        if needs_new_file {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            *current = Some((path, file));
        }

        match current.as_mut() {
            Some((_, file)) => file.write(buf),
            None => Ok(buf.len()),
        }
    }
}

impl Write for &DailyLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_for_date(buf, chrono::Local::now().date_naive())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.lock() {
            Ok(mut current) => match current.as_mut() {
                Some((_, file)) => file.flush(),
                None => Ok(()),
            },
            Err(_) => Ok(()),
        }
    }
}

/// Installs the global subscriber. With a log directory, lines go to today's
/// `app-YYYY-MM-DD.txt` instead of stderr. Calling it twice is a no-op.
pub fn init_logging(filter: Option<&str>, log_dir: Option<&Path>) -> Result<(), String> {
    let filter = filter
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match log_dir {
        Some(dir) => {
            let writer = Arc::new(DailyLogFile::new(dir)?);
            builder.with_ansi(false).with_writer(writer).try_init()
        }
        None => builder.try_init(),
    };

    if result.is_err() {
        crate::utils::log_debug("logger", "subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_is_named_by_day() {
        let path = log_file_path(Path::new("/tmp/logs"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("app-"));
        assert!(name.ends_with(".txt"));
        assert_eq!(name.len(), "app-2025-01-01.txt".len());
    }

    #[test]
    fn writer_rolls_over_when_the_date_changes() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DailyLogFile::new(dir.path()).unwrap();
        let monday = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();

        writer.write_for_date(b"first\n", monday).unwrap();
        writer.write_for_date(b"second\n", monday).unwrap();
        writer.write_for_date(b"third\n", tuesday).unwrap();
        (&writer).flush().unwrap();

        let monday_log = fs::read_to_string(dir.path().join("app-2025-03-03.txt")).unwrap();
        let tuesday_log = fs::read_to_string(dir.path().join("app-2025-03-04.txt")).unwrap();
        assert_eq!(monday_log, "first\nsecond\n");
        assert_eq!(tuesday_log, "third\n");
    }

    #[test]
    fn repeated_init_does_not_fail() {
        let dir = tempfile::tempdir().unwrap();
        assert!(init_logging(Some("debug"), Some(dir.path())).is_ok());
        assert!(init_logging(None, None).is_ok());
    }
}
