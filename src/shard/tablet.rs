use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::util::{self, ReadOutcome, HEADER_SIZE};
use super::{Shard, ShardError, ShardResult, ShardStats};
use crate::config::TableConfig;
use crate::event::Event;
use crate::identifier::ObjectId;

/// Storage behind an event log that can give back a partial record
trait LogFile: Write {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LogFile for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Append side of an event log
///
/// The log only ever grows by whole records: a failed append is cut back to
/// the end of the last complete record before the error is returned.
struct LogWriter<F: LogFile> {
    file: F,
    path: PathBuf,
    /// Length of the log through the last complete record
    size: u64,
    /// Set when a failed append could not be cut back
    poisoned: bool,
}

impl<F: LogFile> LogWriter<F> {
    fn new(file: F, path: PathBuf, size: u64) -> Self {
        Self {
            file,
            path,
            size,
            poisoned: false,
        }
    }

    fn append(&mut self, payload: &[u8], sync: bool) -> ShardResult<()> {
        if self.poisoned {
            return Err(ShardError::storage(
                &self.path,
                "Event log holds a partial record that could not be removed; reopen the tablet",
            ));
        }

        let frame =
            util::encode_record(payload).map_err(|e| ShardError::Encoding(e.to_string()))?;

        match self.write_frame(&frame, sync) {
            Ok(()) => {
                self.size += frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                match self.file.truncate(self.size) {
                    Ok(()) => {
                        warn!(path = ?self.path, offset = self.size, error = %e, "Discarded partial record")
                    }
                    Err(rollback) => {
                        self.poisoned = true;
                        warn!(
                            path = ?self.path,
                            offset = self.size,
                            error = %rollback,
                            "Failed to discard partial record; refusing further appends"
                        );
                    }
                }
                Err(e.into())
            }
        }
    }

    fn write_frame(&mut self, frame: &[u8], sync: bool) -> io::Result<()> {
        self.file.write_all(frame)?;
        self.file.flush()?;
        if sync {
            self.file.sync()?;
        }
        Ok(())
    }
}

/// Append handle for an open tablet
struct TabletWriter {
    /// Event log opened for appending
    log: LogWriter<File>,
    /// Lock file holding the exclusive lock
    lock: File,
}

impl TabletWriter {
    /// Sync the log and release the lock
    fn finish(self) -> ShardResult<()> {
        self.log.file.sync_all()?;
        FileExt::unlock(&self.lock)?;
        Ok(())
    }
}

/// File-backed shard
///
/// Events live in `events.log` inside the tablet directory and are indexed in
/// memory by object on open. Appends are serialized; reads run concurrently.
pub struct Tablet {
    /// Tablet directory
    path: PathBuf,
    /// Whether every append is followed by an fsync
    sync_writes: bool,
    /// Events per object, ordered by timestamp
    index: RwLock<HashMap<ObjectId, Vec<Event>>>,
    /// Append handle, present while open
    writer: Mutex<Option<TabletWriter>>,
    /// Tablet is open flag
    is_open: RwLock<bool>,
}

impl Tablet {
    /// Ensure the tablet is open
    fn ensure_open(&self) -> ShardResult<()> {
        if !*self.is_open.read() {
            return Err(ShardError::Closed);
        }
        Ok(())
    }

    /// Acquire the tablet's exclusive lock
    fn acquire_lock(&self) -> ShardResult<File> {
        let lock_path = util::lock_path(&self.path);
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| {
                ShardError::storage(&lock_path, format!("Failed to open lock file: {}", e))
            })?;

        lock.try_lock_exclusive()
            .map_err(|_| ShardError::Locked(self.path.clone()))?;

        Ok(lock)
    }

    /// Replay the event log into an index, truncating a torn tail
    fn replay(log_path: &Path) -> ShardResult<(HashMap<ObjectId, Vec<Event>>, u64)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(log_path)
            .map_err(|e| {
                ShardError::storage(log_path, format!("Failed to open event log: {}", e))
            })?;

        let mut index = HashMap::new();

        let len = file.metadata()?.len();
        if len < HEADER_SIZE {
            // Empty, or the header write never completed
            let mut partial = Vec::new();
            file.read_to_end(&mut partial)?;
            if !util::header_bytes().starts_with(&partial) {
                return Err(ShardError::storage(
                    log_path,
                    format!("Invalid event log header: {:?}", partial),
                ));
            }
            if len > 0 {
                warn!(path = ?log_path, bytes = len, "Rewriting incomplete event log header");
            }

            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            util::write_header(&mut file)?;
            file.sync_all()?;
            return Ok((index, HEADER_SIZE));
        }

        let mut reader = BufReader::new(&file);
        util::read_header(&mut reader, log_path)?;

        let mut valid_end = HEADER_SIZE;
        let mut replayed = 0usize;

        loop {
            match util::read_record(&mut reader)? {
                ReadOutcome::Record(payload) => {
                    let (object_id, event): (ObjectId, Event) = serde_json::from_slice(&payload)
                        .map_err(|e| ShardError::corruption(log_path, valid_end, e))?;

                    insert_ordered(index.entry(object_id).or_default(), event);
                    valid_end += util::RECORD_HEADER_SIZE + payload.len() as u64;
                    replayed += 1;
                }
                ReadOutcome::End => break,
                ReadOutcome::Torn(reason) => {
                    warn!(
                        path = ?log_path,
                        offset = valid_end,
                        %reason,
                        "Truncating torn tail of event log"
                    );
                    drop(reader);
                    file.set_len(valid_end)?;
                    file.sync_all()?;
                    break;
                }
            }
        }

        debug!(path = ?log_path, events = replayed, "Replayed event log");

        Ok((index, valid_end))
    }
}

/// Insert an event after every event with an earlier or equal timestamp
fn insert_ordered(events: &mut Vec<Event>, event: Event) {
    let position = events.partition_point(|e| e.timestamp <= event.timestamp);
    events.insert(position, event);
}

impl Shard for Tablet {
    fn new(path: PathBuf, config: &TableConfig) -> Self {
        Self {
            path,
            sync_writes: config.sync_writes,
            index: RwLock::new(HashMap::new()),
            writer: Mutex::new(None),
            is_open: RwLock::new(false),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn open(&mut self) -> ShardResult<()> {
        if *self.is_open.read() {
            return Ok(());
        }

        if !self.path.is_dir() {
            return Err(ShardError::storage(&self.path, "Tablet directory does not exist"));
        }

        let lock = self.acquire_lock()?;

        let log_path = util::log_path(&self.path);
        let (index, size) = Self::replay(&log_path)?;

        let file = OpenOptions::new().append(true).open(&log_path).map_err(|e| {
            ShardError::storage(&log_path, format!("Failed to open event log for append: {}", e))
        })?;

        *self.index.get_mut() = index;
        *self.writer.get_mut() = Some(TabletWriter {
            log: LogWriter::new(file, log_path, size),
            lock,
        });
        *self.is_open.get_mut() = true;

        debug!(path = ?self.path, size, "Opened tablet");
        Ok(())
    }

    fn close(&mut self) -> ShardResult<()> {
        if !*self.is_open.get_mut() {
            return Ok(());
        }

        let result = match self.writer.get_mut().take() {
            Some(writer) => writer.finish(),
            None => Ok(()),
        };

        self.index.get_mut().clear();
        *self.is_open.get_mut() = false;

        debug!(path = ?self.path, "Closed tablet");
        result
    }

    fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn add_event(&self, object_id: &ObjectId, event: &Event) -> ShardResult<()> {
        self.ensure_open()?;

        let payload = serde_json::to_vec(&(object_id, event))?;
        util::check_record_size(payload.len())
            .map_err(|e| ShardError::Encoding(e.to_string()))?;

        // Held until the index is updated so log order matches index order
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(ShardError::Closed)?;
        writer.log.append(&payload, self.sync_writes)?;

        let mut index = self.index.write();
        insert_ordered(index.entry(object_id.clone()).or_default(), event.clone());

        Ok(())
    }

    fn get_events(&self, object_id: &ObjectId) -> ShardResult<Vec<Event>> {
        self.ensure_open()?;

        let index = self.index.read();
        Ok(index.get(object_id).cloned().unwrap_or_default())
    }

    fn stats(&self) -> ShardResult<ShardStats> {
        self.ensure_open()?;

        let mut stats = ShardStats::new(&self.path);
        {
            let index = self.index.read();
            stats.object_count = index.len();
            stats.event_count = index.values().map(Vec::len).sum();
        }
        stats.size_bytes = self.writer.lock().as_ref().map_or(0, |w| w.log.size);

        Ok(stats)
    }
}

impl Drop for Tablet {
    fn drop(&mut self) {
        if *self.is_open.get_mut() {
            if let Err(e) = self.close() {
                warn!(path = ?self.path, error = %e, "Error closing tablet");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::fs;
    use std::sync::Arc;
    use std::thread;
    use tempfile::{tempdir, TempDir};

    fn open_tablet(dir: &TempDir) -> ShardResult<Tablet> {
        let mut tablet = Tablet::new(dir.path().to_path_buf(), &TableConfig::default());
        tablet.open()?;
        Ok(tablet)
    }

    #[test]
    fn test_open_creates_log() -> ShardResult<()> {
        let dir = tempdir()?;
        let tablet = open_tablet(&dir)?;

        assert!(tablet.is_open());
        let log = util::log_path(dir.path());
        assert_eq!(fs::metadata(&log)?.len(), HEADER_SIZE);
        assert_eq!(tablet.stats()?.size_bytes, HEADER_SIZE);
        Ok(())
    }

    #[test]
    fn test_open_missing_directory() {
        let dir = tempdir().unwrap();
        let mut tablet = Tablet::new(dir.path().join("7"), &TableConfig::default());
        assert!(matches!(tablet.open(), Err(ShardError::Storage { .. })));
        assert!(!tablet.is_open());
    }

    #[test]
    fn test_add_and_get_events() -> ShardResult<()> {
        let dir = tempdir()?;
        let tablet = open_tablet(&dir)?;

        let alice = ObjectId::from("alice");
        let bob = ObjectId::from("bob");
        let event = Event::new().with_value("action", "login");

        tablet.add_event(&alice, &event)?;

        assert_eq!(tablet.get_events(&alice)?, vec![event]);
        assert!(tablet.get_events(&bob)?.is_empty());

        let stats = tablet.stats()?;
        assert_eq!(stats.object_count, 1);
        assert_eq!(stats.event_count, 1);
        assert!(stats.size_bytes > HEADER_SIZE);
        Ok(())
    }

    #[test]
    fn test_events_ordered_by_timestamp() -> ShardResult<()> {
        let dir = tempdir()?;
        let tablet = open_tablet(&dir)?;
        let id = ObjectId::from(9i64);

        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Event::at(base + Duration::hours(2)).with_value("n", 1);
        let early = Event::at(base).with_value("n", 2);
        let tie = Event::at(base).with_value("n", 3);

        tablet.add_event(&id, &late)?;
        tablet.add_event(&id, &early)?;
        tablet.add_event(&id, &tie)?;

        assert_eq!(tablet.get_events(&id)?, vec![early, tie, late]);
        Ok(())
    }

    #[test]
    fn test_events_survive_reopen() -> ShardResult<()> {
        let dir = tempdir()?;
        let id = ObjectId::from(uuid::Uuid::new_v4());
        let events: Vec<Event> = (0..5)
            .map(|i| Event::at(Utc.timestamp_opt(1_700_000_000 + i, 0).unwrap()).with_value("i", i))
            .collect();

        {
            let mut tablet = open_tablet(&dir)?;
            for event in &events {
                tablet.add_event(&id, event)?;
            }
            tablet.close()?;
            assert!(!tablet.is_open());
        }

        let tablet = open_tablet(&dir)?;
        assert_eq!(tablet.get_events(&id)?, events);
        Ok(())
    }

    #[test]
    fn test_torn_tail_is_truncated() -> ShardResult<()> {
        let dir = tempdir()?;
        let id = ObjectId::from("torn");
        let event = Event::new().with_value("ok", true);

        let intact_len = {
            let mut tablet = open_tablet(&dir)?;
            tablet.add_event(&id, &event)?;
            tablet.close()?;
            fs::metadata(util::log_path(dir.path()))?.len()
        };

        {
            let mut log = OpenOptions::new().append(true).open(util::log_path(dir.path()))?;
            log.write_all(&[0x10, 0x00, 0x00, 0x00, 0xde, 0xad])?;
        }

        let mut tablet = open_tablet(&dir)?;
        assert_eq!(tablet.get_events(&id)?, vec![event.clone()]);
        assert_eq!(fs::metadata(util::log_path(dir.path()))?.len(), intact_len);

        // Appends after truncation land on a clean boundary
        tablet.add_event(&id, &event)?;
        tablet.close()?;
        let tablet = open_tablet(&dir)?;
        assert_eq!(tablet.get_events(&id)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_foreign_log_is_rejected() -> ShardResult<()> {
        let dir = tempdir()?;
        fs::write(util::log_path(dir.path()), b"not a tablet log")?;

        let mut tablet = Tablet::new(dir.path().to_path_buf(), &TableConfig::default());
        assert!(matches!(tablet.open(), Err(ShardError::Storage { .. })));
        assert!(!tablet.is_open());
        Ok(())
    }

    #[test]
    fn test_lock_excludes_second_opener() -> ShardResult<()> {
        let dir = tempdir()?;
        let mut first = open_tablet(&dir)?;

        let mut second = Tablet::new(dir.path().to_path_buf(), &TableConfig::default());
        assert!(matches!(second.open(), Err(ShardError::Locked(_))));

        first.close()?;
        second.open()?;
        assert!(second.is_open());
        Ok(())
    }

    #[test]
    fn test_closed_tablet_rejects_operations() -> ShardResult<()> {
        let dir = tempdir()?;
        let mut tablet = open_tablet(&dir)?;
        tablet.close()?;
        tablet.close()?;

        let id = ObjectId::from("x");
        assert!(tablet.add_event(&id, &Event::new()).unwrap_err().is_closed());
        assert!(tablet.get_events(&id).unwrap_err().is_closed());
        assert!(tablet.stats().unwrap_err().is_closed());
        Ok(())
    }

    #[test]
    fn test_concurrent_appends() -> ShardResult<()> {
        let dir = tempdir()?;
        let tablet = Arc::new(open_tablet(&dir)?);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let tablet = tablet.clone();
                thread::spawn(move || -> ShardResult<()> {
                    let id = ObjectId::from(t as i64);
                    for i in 0..25 {
                        tablet.add_event(&id, &Event::new().with_value("i", i))?;
                    }
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap()?;
        }

        let stats = tablet.stats()?;
        assert_eq!(stats.object_count, 4);
        assert_eq!(stats.event_count, 100);
        Ok(())
    }

    #[test]
    fn test_oversized_event_is_rejected() -> ShardResult<()> {
        let dir = tempdir()?;
        let id = ObjectId::from("bulk");
        let before = Event::new().with_value("n", 1);
        let after = Event::new().with_value("n", 2);
        let huge = Event::new().with_value("blob", "x".repeat(util::MAX_RECORD_SIZE as usize));

        {
            let mut tablet = open_tablet(&dir)?;
            tablet.add_event(&id, &before)?;
            let size = tablet.stats()?.size_bytes;

            let err = tablet.add_event(&id, &huge).unwrap_err();
            assert!(matches!(err, ShardError::Encoding(_)));
            assert_eq!(tablet.stats()?.size_bytes, size);

            tablet.add_event(&id, &after)?;
            tablet.close()?;
        }

        let tablet = open_tablet(&dir)?;
        let events = tablet.get_events(&id)?;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].get("n"), before.get("n"));
        assert_eq!(events[1].get("n"), after.get("n"));
        Ok(())
    }

    /// In-memory log that accepts `budget` more bytes before failing
    struct FlakyLog {
        disk: Vec<u8>,
        budget: usize,
        fail_sync: bool,
        fail_truncate: bool,
    }

    impl FlakyLog {
        fn with_header() -> Self {
            Self {
                disk: util::header_bytes().to_vec(),
                budget: usize::MAX,
                fail_sync: false,
                fail_truncate: false,
            }
        }
    }

    impl Write for FlakyLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "device full"));
            }
            let n = buf.len().min(self.budget);
            self.disk.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogFile for FlakyLog {
        fn truncate(&mut self, len: u64) -> io::Result<()> {
            if self.fail_truncate {
                return Err(io::Error::new(io::ErrorKind::Other, "read-only filesystem"));
            }
            self.disk.truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            if self.fail_sync {
                return Err(io::Error::new(io::ErrorKind::Other, "sync failed"));
            }
            Ok(())
        }
    }

    fn replay_records(disk: &[u8]) -> ShardResult<Vec<Vec<u8>>> {
        let mut reader = std::io::Cursor::new(disk);
        util::read_header(&mut reader, Path::new("events.log"))?;

        let mut records = Vec::new();
        loop {
            match util::read_record(&mut reader)? {
                ReadOutcome::Record(payload) => records.push(payload),
                ReadOutcome::End => return Ok(records),
                ReadOutcome::Torn(reason) => panic!("torn record in log: {}", reason),
            }
        }
    }

    #[test]
    fn test_partial_write_is_cut_back() -> ShardResult<()> {
        let mut log = LogWriter::new(FlakyLog::with_header(), PathBuf::from("events.log"), HEADER_SIZE);
        log.append(b"first", false)?;

        log.file.budget = 5;
        assert!(matches!(log.append(b"second", false), Err(ShardError::Io(_))));
        assert_eq!(log.file.disk.len() as u64, log.size);

        log.file.budget = usize::MAX;
        log.file.fail_sync = true;
        assert!(log.append(b"unsynced", true).is_err());
        assert_eq!(log.file.disk.len() as u64, log.size);

        log.file.fail_sync = false;
        log.append(b"third", true)?;

        assert_eq!(replay_records(&log.file.disk)?, vec![b"first".to_vec(), b"third".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_unrecoverable_partial_write_stops_appends() -> ShardResult<()> {
        let mut log = LogWriter::new(FlakyLog::with_header(), PathBuf::from("events.log"), HEADER_SIZE);
        log.append(b"first", false)?;

        log.file.budget = 3;
        log.file.fail_truncate = true;
        assert!(log.append(b"second", false).is_err());

        log.file.budget = usize::MAX;
        log.file.fail_truncate = false;
        assert!(matches!(log.append(b"third", false), Err(ShardError::Storage { .. })));
        Ok(())
    }

    #[test]
    fn test_incomplete_header_is_rewritten() -> ShardResult<()> {
        let dir = tempdir()?;
        let log = util::log_path(dir.path());
        fs::write(&log, b"SKY")?;

        let id = ObjectId::from("after-crash");
        {
            let mut tablet = open_tablet(&dir)?;
            assert_eq!(fs::metadata(&log)?.len(), HEADER_SIZE);
            tablet.add_event(&id, &Event::new())?;
            tablet.close()?;
        }

        let tablet = open_tablet(&dir)?;
        assert_eq!(tablet.get_events(&id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_short_foreign_log_is_rejected() -> ShardResult<()> {
        let dir = tempdir()?;
        fs::write(util::log_path(dir.path()), b"XYZ")?;

        let mut tablet = Tablet::new(dir.path().to_path_buf(), &TableConfig::default());
        assert!(matches!(tablet.open(), Err(ShardError::Storage { .. })));
        Ok(())
    }
}
