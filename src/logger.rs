//! Mirrors structured log events into an on-disk `LOG` file inside the database directory, in
//! addition to whatever `tracing` subscriber the embedding application has installed.
//!
//! Opening a database rotates any existing `LOG` to `LOG.old`, so each open's history is
//! distinguishable without needing a full log-rotation policy.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::error::Result;
use crate::filesystem::FileSystem;

const LOG_FILE_NAME: &str = "LOG";
const OLD_LOG_FILE_NAME: &str = "LOG.old";

/// Rotates any existing `LOG` in `db_path` to `LOG.old` and opens a fresh `LOG`, returning a
/// `tracing_subscriber` [`Layer`] that appends every event to it.
pub fn open<FS: FileSystem>(fs: &FS, db_path: &Path) -> Result<InfoLogLayer<FS::Writable>> {
    let log_path = db_path.join(LOG_FILE_NAME);
    let old_path = db_path.join(OLD_LOG_FILE_NAME);
    if fs.exists(&log_path) {
        let _ = fs.rename(&log_path, &old_path);
    }
    let file = fs.create(&log_path)?;
    Ok(InfoLogLayer { file: Mutex::new(file) })
}

/// A `tracing_subscriber::Layer` writing `LEVEL [target] message {fields}` lines to the
/// database's `LOG` file.
pub struct InfoLogLayer<File> {
    file: Mutex<File>,
}

impl<File, S> Layer<S> for InfoLogLayer<File>
where
    File: Write + Send + 'static,
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let line = format!(
            "{level} [{target}] {message}{fields}\n",
            level = event.metadata().level(),
            target = event.metadata().target(),
            message = visitor.message.unwrap_or_default(),
            fields = visitor.rest,
        );

        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(line.as_bytes());
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
    rest: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.rest.push_str(&format!(" {}={value:?}", field.name()));
        }
    }
}

/// Severity of a single logged event, for callers constructing events without `tracing` macros
/// directly in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn as_tracing_level(self) -> Level {
        match self {
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

#[must_use]
pub fn log_and_old_paths(db_path: &Path) -> (PathBuf, PathBuf) {
    (db_path.join(LOG_FILE_NAME), db_path.join(OLD_LOG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::MemoryFileSystem;

    #[test]
    fn opening_rotates_an_existing_log_file() {
        let fs = MemoryFileSystem::new();
        let db_path = Path::new("/db");
        fs.create_dir_all(db_path).unwrap();

        {
            let mut f = fs.create(&db_path.join(LOG_FILE_NAME)).unwrap();
            f.write_all(b"first open\n").unwrap();
        }
        let _layer = open(&fs, db_path).unwrap();

        assert!(fs.exists(&db_path.join(OLD_LOG_FILE_NAME)));
        assert!(fs.exists(&db_path.join(LOG_FILE_NAME)));
    }
}
