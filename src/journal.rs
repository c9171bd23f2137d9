use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::GpqConfig;
use crate::error::{GpqError, Result};
use crate::item::{Item, PersistedItem};

const JOURNAL_FILE_NAME: &str = "gpq.journal";
const OP_PUT: u8 = 0;
const OP_DELETE: u8 = 1;

/// Which durability mode the journal was opened in. `Disabled` is the `sync_to_disk =
/// false` no-op; `Sync` fsyncs every write before the call returns; `Lazy` batches writes
/// on the background thread and only flushes at `batch_size` or on `close`.
enum JournalMode {
    Disabled,
    Sync,
    Lazy,
}

/// Durable, crash-recoverable append-log over a journal file, keyed by monotonic `k`.
///
/// Modeled directly on `storage::persistence::WalManager` + its background `WalWriter`:
/// a dedicated OS thread owns the file handle and communicates over an `mpsc` channel, so
/// callers in sync mode block on an ack round-trip while lazy-mode callers fire-and-forget.
pub(crate) struct DiskJournal<T> {
    mode: JournalMode,
    writer: Option<JournalWriter>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> DiskJournal<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Opens (creating if absent) the journal at `config.disk_path`, replaying any existing
    /// frames into a map of surviving `(key -> record)` entries in key order.
    pub(crate) fn open(config: &GpqConfig) -> Result<(Self, BTreeMap<u64, PersistedItem<T>>)> {
        if !config.sync_to_disk {
            return Ok((
                Self {
                    mode: JournalMode::Disabled,
                    writer: None,
                    _payload: PhantomData,
                },
                BTreeMap::new(),
            ));
        }

        fs::create_dir_all(&config.disk_path)
            .map_err(|e| GpqError::PathUnavailable(e.to_string()))?;
        let path = config.disk_path.join(JOURNAL_FILE_NAME);

        let records = replay::<T>(&path)?;

        let batch_size = config.batch_size.max(1);
        let writer = JournalWriter::start(path, config.lazy, batch_size)?;
        let mode = if config.lazy {
            JournalMode::Lazy
        } else {
            JournalMode::Sync
        };

        Ok((
            Self {
                mode,
                writer: Some(writer),
                _payload: PhantomData,
            },
            records,
        ))
    }

    /// Journals a new or escalated item under `key`. Blocks until fsync'd in sync mode.
    pub(crate) fn put(&self, key: u64, item: &Item<T>) -> Result<()>
    where
        T: Clone,
    {
        if matches!(self.mode, JournalMode::Disabled) {
            return Ok(());
        }
        let persisted = PersistedItem::from_item(item);
        let value = rmp_serde::to_vec(&persisted)?;
        let frame = encode_frame(OP_PUT, key, &value);
        self.submit(frame)
    }

    /// Journals the removal of `key` (on dequeue, expiry, or escalation's source record).
    pub(crate) fn delete(&self, key: u64) -> Result<()> {
        if matches!(self.mode, JournalMode::Disabled) {
            return Ok(());
        }
        let frame = encode_frame(OP_DELETE, key, &[]);
        self.submit(frame)
    }

    fn submit(&self, frame: Vec<u8>) -> Result<()> {
        let wait = matches!(self.mode, JournalMode::Sync);
        self.writer
            .as_ref()
            .expect("writer present whenever mode is not Disabled")
            .write(frame, wait)
    }

    /// Flushes any batched writes and stops the background writer. Idempotent.
    pub(crate) fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.flush_and_wait()?;
        }
        Ok(())
    }
}

fn encode_frame(op: u8, key: u64, value: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + 8 + 4 + value.len());
    frame.push(op);
    frame.extend_from_slice(&key.to_be_bytes());
    frame.extend_from_slice(&(value.len() as u32).to_le_bytes());
    frame.extend_from_slice(value);
    frame
}

fn replay<T>(path: &Path) -> Result<BTreeMap<u64, PersistedItem<T>>>
where
    T: DeserializeOwned,
{
    let mut records = BTreeMap::new();
    if !path.exists() {
        return Ok(records);
    }

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    loop {
        let mut op_byte = [0u8; 1];
        match reader.read_exact(&mut op_byte) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let mut key_bytes = [0u8; 8];
        reader.read_exact(&mut key_bytes)?;
        let key = u64::from_be_bytes(key_bytes);

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        match op_byte[0] {
            OP_PUT => {
                let mut value = vec![0u8; len];
                reader.read_exact(&mut value)?;
                let record: PersistedItem<T> = rmp_serde::from_slice(&value)?;
                records.insert(key, record);
            }
            OP_DELETE => {
                records.remove(&key);
            }
            other => {
                return Err(GpqError::StoreFailure(format!(
                    "unknown journal frame op byte {other}"
                )));
            }
        }
    }
    Ok(records)
}

enum JournalCommand {
    Write {
        frame: Vec<u8>,
        ack: Option<Sender<Result<()>>>,
    },
    Flush {
        ack: Sender<Result<()>>,
    },
    Shutdown,
}

struct JournalWriter {
    sender: Sender<JournalCommand>,
    join: Option<thread::JoinHandle<()>>,
}

impl JournalWriter {
    fn start(path: PathBuf, lazy: bool, batch_size: usize) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let join = thread::Builder::new()
            .name("gpq-journal-writer".to_string())
            .spawn(move || journal_writer_loop(path, lazy, batch_size, rx))
            .map_err(|e| GpqError::PathUnavailable(e.to_string()))?;
        Ok(Self {
            sender: tx,
            join: Some(join),
        })
    }

    fn write(&self, frame: Vec<u8>, wait_for_durable: bool) -> Result<()> {
        if wait_for_durable {
            let (ack_tx, ack_rx) = mpsc::channel();
            self.send(JournalCommand::Write {
                frame,
                ack: Some(ack_tx),
            })?;
            ack_rx
                .recv()
                .map_err(|e| GpqError::StoreFailure(e.to_string()))??;
            return Ok(());
        }
        self.send(JournalCommand::Write { frame, ack: None })
    }

    fn flush_and_wait(&self) -> Result<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.send(JournalCommand::Flush { ack: ack_tx })?;
        ack_rx
            .recv()
            .map_err(|e| GpqError::StoreFailure(e.to_string()))??;
        Ok(())
    }

    fn send(&self, cmd: JournalCommand) -> Result<()> {
        self.sender
            .send(cmd)
            .map_err(|e| GpqError::StoreFailure(e.to_string()))
    }
}

impl Drop for JournalWriter {
    fn drop(&mut self) {
        let _ = self.sender.send(JournalCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn journal_writer_loop(path: PathBuf, lazy: bool, batch_size: usize, rx: Receiver<JournalCommand>) {
    let file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(_) => return,
    };
    let mut writer = BufWriter::new(file);
    let mut pending_since_flush = 0usize;

    let flush_and_sync = |writer: &mut BufWriter<File>| -> std::io::Result<()> {
        writer.flush()?;
        writer.get_ref().sync_all()
    };

    while let Ok(cmd) = rx.recv() {
        match cmd {
            JournalCommand::Write { frame, ack } => {
                let result = writer.write_all(&frame).map_err(GpqError::from);
                if result.is_ok() {
                    pending_since_flush += 1;
                    let must_flush = !lazy || pending_since_flush >= batch_size;
                    let flush_result = if must_flush {
                        let r = flush_and_sync(&mut writer).map_err(GpqError::from);
                        if r.is_ok() {
                            pending_since_flush = 0;
                        }
                        r
                    } else {
                        Ok(())
                    };
                    if let Some(ack) = ack {
                        let _ = ack.send(flush_result);
                    }
                } else if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
            JournalCommand::Flush { ack } => {
                let result = flush_and_sync(&mut writer).map_err(GpqError::from);
                if result.is_ok() {
                    pending_since_flush = 0;
                }
                let _ = ack.send(result);
            }
            JournalCommand::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn config(dir: &TempDir, lazy: bool, batch_size: usize) -> GpqConfig {
        GpqConfig {
            num_buckets: 4,
            sync_to_disk: true,
            disk_path: dir.path().to_path_buf(),
            lazy,
            batch_size,
        }
    }

    fn item(key: u64, priority: usize, payload: &str) -> Item<String> {
        Item {
            key,
            priority,
            enqueued_at: Instant::now(),
            can_timeout: false,
            timeout_after: Duration::ZERO,
            can_escalate: false,
            escalate_after: Duration::ZERO,
            payload: payload.to_string(),
        }
    }

    #[test]
    fn disabled_journal_is_a_no_op() {
        let (journal, records) = DiskJournal::<String>::open(&GpqConfig::in_memory(4)).unwrap();
        assert!(records.is_empty());
        journal.put(1, &item(1, 0, "a")).unwrap();
        journal.delete(1).unwrap();
    }

    #[test]
    fn sync_mode_round_trips() {
        let dir = TempDir::new().unwrap();
        {
            let (journal, records) = DiskJournal::<String>::open(&config(&dir, false, 1)).unwrap();
            assert!(records.is_empty());
            journal.put(1, &item(1, 2, "a")).unwrap();
            journal.put(2, &item(2, 0, "b")).unwrap();
            journal.delete(1).unwrap();
        }
        let (_journal, records) = DiskJournal::<String>::open(&config(&dir, false, 1)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records.get(&2).unwrap().payload, "b");
    }

    #[test]
    fn lazy_mode_flushes_on_close() {
        let dir = TempDir::new().unwrap();
        {
            let (mut journal, _) = DiskJournal::<String>::open(&config(&dir, true, 1000)).unwrap();
            for k in 0..10u64 {
                journal.put(k, &item(k, 0, "x")).unwrap();
            }
            journal.close().unwrap();
        }
        let (_journal, records) = DiskJournal::<String>::open(&config(&dir, false, 1)).unwrap();
        assert_eq!(records.len(), 10);
    }
}
