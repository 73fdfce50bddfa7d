use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, Days, Local, LocalResult, NaiveDateTime, NaiveTime, TimeZone};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Suffix appended to the base name, one file per local calendar day.
const DATE_SUFFIX_FORMAT: &str = "%Y-%m-%d";

/// Permissions for newly created day files: `rw-r--r--`.
#[cfg(unix)]
const DAY_FILE_MODE: u32 = 0o644;

/// Daily log file writer that can be shared by several processes.
///
/// Every record goes to `<base_name>.<YYYY-MM-DD>` for the local date on
/// which the file was opened. Instead of renaming the active file at
/// midnight, the destination simply opens the file named after the new
/// date, so several processes logging under the same base name all land
/// in the same day file without coordinating.
///
/// Rotation is lazy: the deadline is checked on each write, so a process
/// that stays quiet across midnight keeps yesterday's handle until its
/// next write.
///
/// The destination is not internally synchronized. Share it between
/// threads through `Mutex<RotatingDestination>`, which
/// `tracing-subscriber` accepts directly as a `MakeWriter`.
pub struct RotatingDestination<C = SystemClock> {
    base_name: PathBuf,
    current_path: PathBuf,
    rotate_at: DateTime<Local>,
    file: Option<File>,
    clock: C,
}

impl RotatingDestination<SystemClock> {
    /// Open today's file for `base_name` using the system clock.
    ///
    /// **Returns**
    /// - `Ok(..)` with the day file created (or joined) and open for
    ///   appending.
    /// - `Err(..)` if the file could not be created or opened, e.g. the
    ///   parent directory is missing or not writable.
    pub fn open(base_name: impl Into<PathBuf>) -> io::Result<Self> {
        Self::with_clock(base_name, SystemClock)
    }
}

impl<C: Clock> RotatingDestination<C> {
    /// Open today's file for `base_name`, reading time from `clock`.
    pub fn with_clock(base_name: impl Into<PathBuf>, clock: C) -> io::Result<Self> {
        let base_name = base_name.into();
        let now = clock.now();
        let current_path = day_file_path(&base_name, &now);
        let file = open_day_file(&current_path)?;

        Ok(RotatingDestination {
            base_name,
            current_path,
            rotate_at: next_rotate_at(&now),
            file: Some(file),
            clock,
        })
    }

    /// Logical log path supplied at construction.
    pub fn base_name(&self) -> &Path {
        &self.base_name
    }

    /// Day file the destination currently writes to.
    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    /// Instant after which the next write switches files.
    pub fn rotate_at(&self) -> DateTime<Local> {
        self.rotate_at
    }

    /// Flush and release the current handle.
    ///
    /// A later write reopens the file for the current date.
    pub fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(mut file) => file.flush(),
            None => Ok(()),
        }
    }

    /// Return the handle to write to, rotating first if the deadline has
    /// passed or a previous reopen failed.
    fn active_file(&mut self) -> io::Result<&mut File> {
        let now = self.clock.now();
        if now > self.rotate_at {
            self.rotate_at = next_rotate_at(&now);
            self.file = None;
        }

        let file = match self.file.take() {
            Some(file) => file,
            None => {
                let path = day_file_path(&self.base_name, &now);
                let file = open_day_file(&path)?;
                self.current_path = path;
                file
            }
        };
        Ok(self.file.insert(file))
    }
}

impl<C: Clock> Write for RotatingDestination<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.active_file()?.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.active_file()?.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file {
            Some(ref mut file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// `<base_name>.<YYYY-MM-DD>` for the local date of `now`.
pub fn day_file_path(base_name: &Path, now: &DateTime<Local>) -> PathBuf {
    let mut name = OsString::from(base_name.as_os_str());
    name.push(".");
    name.push(now.format(DATE_SUFFIX_FORMAT).to_string());
    PathBuf::from(name)
}

/// Local midnight at the start of the day after `now`.
pub fn next_rotate_at(now: &DateTime<Local>) -> DateTime<Local> {
    let Some(tomorrow) = now.date_naive().checked_add_days(Days::new(1)) else {
        return *now + chrono::Duration::days(1);
    };
    let midnight = tomorrow.and_time(NaiveTime::MIN);
    resolve_local(midnight).unwrap_or_else(|| *now + chrono::Duration::days(1))
}

/// Map a wall-clock time to an instant, moving forward out of DST gaps.
fn resolve_local(naive: NaiveDateTime) -> Option<DateTime<Local>> {
    let mut candidate = naive;
    // Real-world gaps are at most a couple of hours.
    for _ in 0..4 {
        match Local.from_local_datetime(&candidate) {
            LocalResult::Single(t) => return Some(t),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest),
            LocalResult::None => candidate += chrono::Duration::hours(1),
        }
    }
    None
}

/// Create the day file if nobody has yet, then open it for appending.
///
/// The exclusive create only detects the race between processes; losing
/// it is fine. Opening in append mode afterwards means no process ever
/// truncates a file another one is already writing to.
pub fn open_day_file(path: &Path) -> io::Result<File> {
    let mut create = OpenOptions::new();
    create.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        create.mode(DAY_FILE_MODE);
    }

    match create.open(path) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e),
    }

    OpenOptions::new().create(true).append(true).open(path)
}
