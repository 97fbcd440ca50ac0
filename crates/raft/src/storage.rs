//! Raft log and state machine storage (combined `RaftStorage` for openraft 0.9).
//!
//! The state machine here is a relay: every applied `Normal` entry is handed
//! to a [`CommitHandler`], which pushes the statement onto the commit stream.
//! The store keeps no application state of its own beyond the applied
//! position and membership.
//!
//! ## File Layout (persistent mode)
//!
//! ```text
//! {data_dir}/
//! ├── raft.log           # Framed log entries
//! └── raft_state.json    # Vote, committed id, purge point
//! ```
//!
//! Each frame in `raft.log`:
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Header (28 bytes)                  │
//! │ ├─ magic: u32 (0x5253514C "RSQL") │
//! │ ├─ checksum: u32 (CRC32)          │
//! │ ├─ length: u32                     │
//! │ ├─ index: u64                      │
//! │ └─ term: u64                       │
//! ├────────────────────────────────────┤
//! │ Payload (JSON Entry)               │
//! └────────────────────────────────────┘
//! ```
//!
//! The applied position is deliberately not persisted. On restart openraft
//! re-applies the log up to the saved committed id, which replays every
//! committed statement onto the commit stream.

use crate::command::{Command, CommandResponse};
use crate::type_config::{Entry, LogId, SnapshotMeta, TypeConfig, Vote};
use crate::NodeId;

use openraft::storage::{LogState, RaftLogReader, RaftSnapshotBuilder, Snapshot};
use openraft::{
    BasicNode, EntryPayload, OptionalSend, RaftStorage, RaftTypeConfig, StorageError,
    StorageIOError, StoredMembership,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::ops::RangeBounds;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Magic bytes for frame validation: "RSQL" in ASCII
const LOG_MAGIC: u32 = 0x5253514C;

/// Size of the frame header in bytes
const HEADER_SIZE: usize = 28;

const LOG_FILE: &str = "raft.log";
const STATE_FILE: &str = "raft_state.json";

/// Callback invoked for every applied statement, with its log index.
pub type CommitHandler = Arc<dyn Fn(u64, &Command) + Send + Sync>;

/// Raft hard state persisted in `raft_state.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct HardState {
    vote: Option<Vote>,
    committed: Option<LogId>,
    last_purged_log_id: Option<LogId>,
}

/// Applied position and membership; the whole of the relay's state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StateMachineData {
    pub last_applied_log: Option<LogId>,
    pub last_membership: StoredMembership<NodeId, BasicNode>,
}

#[derive(Clone, Debug)]
struct StoredSnapshot {
    meta: SnapshotMeta,
    data: Vec<u8>,
}

/// Raft storage shared by the raft core and its log reader.
pub struct RaftStore {
    log: RwLock<BTreeMap<u64, Entry>>,
    hard: RwLock<HardState>,
    sm: RwLock<StateMachineData>,
    current_snapshot: RwLock<Option<StoredSnapshot>>,
    snapshot_idx: RwLock<u64>,
    file: Option<LogFile>,
    on_commit: Option<CommitHandler>,
}

impl RaftStore {
    /// Storage that lives only as long as the process.
    pub fn in_memory(on_commit: Option<CommitHandler>) -> Self {
        Self::assemble(HardState::default(), BTreeMap::new(), None, on_commit)
    }

    /// Open or create durable storage in `data_dir`.
    ///
    /// Frames after the first torn or corrupted one are ignored.
    pub fn open(data_dir: impl AsRef<Path>, on_commit: Option<CommitHandler>) -> io::Result<Self> {
        let (file, hard, log) = LogFile::open(data_dir.as_ref())?;
        debug!(
            dir = %data_dir.as_ref().display(),
            entries = log.len(),
            committed = ?hard.committed.map(|id| id.index),
            "opened raft log"
        );
        Ok(Self::assemble(hard, log, Some(file), on_commit))
    }

    fn assemble(
        hard: HardState,
        log: BTreeMap<u64, Entry>,
        file: Option<LogFile>,
        on_commit: Option<CommitHandler>,
    ) -> Self {
        Self {
            log: RwLock::new(log),
            hard: RwLock::new(hard),
            sm: RwLock::new(StateMachineData::default()),
            current_snapshot: RwLock::new(None),
            snapshot_idx: RwLock::new(0),
            file,
            on_commit,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.file.is_some()
    }

    async fn persist_hard_state(&self) -> io::Result<()> {
        match &self.file {
            Some(file) => {
                let hard = self.hard.read().await.clone();
                file.save_state(&hard)
            }
            None => Ok(()),
        }
    }

    async fn rewrite_log(&self) -> io::Result<()> {
        match &self.file {
            Some(file) => {
                let log = self.log.read().await;
                file.rewrite(log.values())
            }
            None => Ok(()),
        }
    }
}

/// Append-only frame file plus the hard state file.
struct LogFile {
    dir: PathBuf,
    writer: Mutex<File>,
}

impl LogFile {
    fn open(dir: &Path) -> io::Result<(Self, HardState, BTreeMap<u64, Entry>)> {
        fs::create_dir_all(dir)?;

        let state_path = dir.join(STATE_FILE);
        let hard = if state_path.exists() {
            let contents = fs::read_to_string(&state_path)?;
            serde_json::from_str(&contents)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        } else {
            HardState::default()
        };

        let log_path = dir.join(LOG_FILE);
        let log = if log_path.exists() {
            read_frames(BufReader::new(File::open(&log_path)?))?
        } else {
            BTreeMap::new()
        };

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok((
            Self {
                dir: dir.to_path_buf(),
                writer: Mutex::new(writer),
            },
            hard,
            log,
        ))
    }

    fn append<'a>(&self, entries: impl IntoIterator<Item = &'a Entry>) -> io::Result<()> {
        let mut file = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut writer = BufWriter::new(&mut *file);
            for entry in entries {
                write_frame(&mut writer, entry)?;
            }
            writer.flush()?;
        }
        file.sync_all()
    }

    /// Replace the file with exactly `entries`.
    fn rewrite<'a>(&self, entries: impl IntoIterator<Item = &'a Entry>) -> io::Result<()> {
        let mut file = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let log_path = self.dir.join(LOG_FILE);
        let temp_path = self.dir.join(format!("{LOG_FILE}.tmp"));

        {
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            for entry in entries {
                write_frame(&mut writer, entry)?;
            }
            writer.flush()?;
            writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        }
        fs::rename(&temp_path, &log_path)?;
        File::open(&self.dir)?.sync_all()?;

        *file = OpenOptions::new().append(true).open(&log_path)?;
        Ok(())
    }

    fn save_state(&self, state: &HardState) -> io::Result<()> {
        let state_path = self.dir.join(STATE_FILE);
        let temp_path = self.dir.join(format!("{STATE_FILE}.tmp"));

        let contents = serde_json::to_vec_pretty(state).map_err(io::Error::other)?;
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&contents)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &state_path)?;
        File::open(&self.dir)?.sync_all()
    }
}

fn write_frame<W: Write>(writer: &mut W, entry: &Entry) -> io::Result<()> {
    let payload = serde_json::to_vec(entry).map_err(io::Error::other)?;
    let length = u32::try_from(payload.len())
        .map_err(|_| io::Error::other(format!("log entry too large: {} bytes", payload.len())))?;

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&LOG_MAGIC.to_le_bytes());
    header[4..8].copy_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    header[8..12].copy_from_slice(&length.to_le_bytes());
    header[12..20].copy_from_slice(&entry.log_id.index.to_le_bytes());
    header[20..28].copy_from_slice(&entry.log_id.leader_id.term.to_le_bytes());

    writer.write_all(&header)?;
    writer.write_all(&payload)
}

fn read_frames<R: Read>(mut reader: R) -> io::Result<BTreeMap<u64, Entry>> {
    let mut log = BTreeMap::new();
    loop {
        let mut header = [0u8; HEADER_SIZE];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }

        let magic = u32_at(&header, 0);
        let checksum = u32_at(&header, 4);
        let length = u32_at(&header, 8) as usize;
        if magic != LOG_MAGIC {
            warn!("raft log frame has bad magic, truncating replay");
            break;
        }

        let mut payload = vec![0u8; length];
        if reader.read_exact(&mut payload).is_err() {
            warn!("raft log ends in a partial frame, truncating replay");
            break;
        }
        if crc32fast::hash(&payload) != checksum {
            warn!("raft log frame failed checksum, truncating replay");
            break;
        }

        let entry: Entry = serde_json::from_slice(&payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        log.insert(entry.log_id.index, entry);
    }
    Ok(log)
}

fn u32_at(buf: &[u8; HEADER_SIZE], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

impl RaftLogReader<TypeConfig> for Arc<RaftStore> {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry>, StorageError<NodeId>> {
        let log = self.log.read().await;
        Ok(log.range(range).map(|(_, entry)| entry.clone()).collect())
    }
}

impl RaftSnapshotBuilder<TypeConfig> for Arc<RaftStore> {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let sm = self.sm.read().await.clone();
        let data = serde_json::to_vec(&sm).map_err(|e| StorageIOError::read_state_machine(&e))?;

        let snapshot_idx = {
            let mut idx = self.snapshot_idx.write().await;
            *idx += 1;
            *idx
        };
        let snapshot_id = match sm.last_applied_log {
            Some(last) => format!("{}_{}_{}", last.leader_id.term, last.index, snapshot_idx),
            None => format!("0_0_{}", snapshot_idx),
        };

        let meta = SnapshotMeta {
            last_log_id: sm.last_applied_log,
            last_membership: sm.last_membership,
            snapshot_id,
        };
        *self.current_snapshot.write().await = Some(StoredSnapshot {
            meta: meta.clone(),
            data: data.clone(),
        });

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStorage<TypeConfig> for Arc<RaftStore> {
    type LogReader = Self;
    type SnapshotBuilder = Self;

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let last_log_id = self.log.read().await.values().next_back().map(|e| e.log_id);
        let last_purged = self.hard.read().await.last_purged_log_id;

        Ok(LogState {
            last_purged_log_id: last_purged,
            last_log_id: last_log_id.or(last_purged),
        })
    }

    async fn save_vote(&mut self, vote: &Vote) -> Result<(), StorageError<NodeId>> {
        self.hard.write().await.vote = Some(*vote);
        self.persist_hard_state()
            .await
            .map_err(|e| StorageIOError::write_vote(&e))?;
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote>, StorageError<NodeId>> {
        Ok(self.hard.read().await.vote)
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId>,
    ) -> Result<(), StorageError<NodeId>> {
        self.hard.write().await.committed = committed;
        self.persist_hard_state()
            .await
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<LogId>, StorageError<NodeId>> {
        Ok(self.hard.read().await.committed)
    }

    async fn last_applied_state(
        &mut self,
    ) -> Result<(Option<LogId>, StoredMembership<NodeId, BasicNode>), StorageError<NodeId>> {
        let sm = self.sm.read().await;
        Ok((sm.last_applied_log, sm.last_membership.clone()))
    }

    async fn delete_conflict_logs_since(
        &mut self,
        log_id: LogId,
    ) -> Result<(), StorageError<NodeId>> {
        {
            let mut log = self.log.write().await;
            let removed = log.split_off(&log_id.index);
            debug!(from = log_id.index, removed = removed.len(), "deleted conflicting logs");
        }
        self.rewrite_log()
            .await
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn purge_logs_upto(&mut self, log_id: LogId) -> Result<(), StorageError<NodeId>> {
        self.hard.write().await.last_purged_log_id = Some(log_id);
        {
            let mut log = self.log.write().await;
            let kept = log.split_off(&(log_id.index + 1));
            *log = kept;
        }
        self.rewrite_log()
            .await
            .map_err(|e| StorageIOError::write_logs(&e))?;
        self.persist_hard_state()
            .await
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn append_to_log<I>(&mut self, entries: I) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry> + OptionalSend,
    {
        let entries: Vec<Entry> = entries.into_iter().collect();
        if entries.is_empty() {
            return Ok(());
        }

        if let Some(file) = &self.file {
            file.append(&entries)
                .map_err(|e| StorageIOError::write_logs(&e))?;
        }

        let mut log = self.log.write().await;
        for entry in entries {
            log.insert(entry.log_id.index, entry);
        }
        Ok(())
    }

    async fn apply_to_state_machine(
        &mut self,
        entries: &[Entry],
    ) -> Result<Vec<CommandResponse>, StorageError<NodeId>> {
        let mut res = Vec::with_capacity(entries.len());
        let mut sm = self.sm.write().await;

        for entry in entries {
            sm.last_applied_log = Some(entry.log_id);
            match &entry.payload {
                EntryPayload::Blank => res.push(CommandResponse::Internal),
                EntryPayload::Normal(cmd) => {
                    if let Some(handler) = &self.on_commit {
                        handler(entry.log_id.index, cmd);
                    }
                    res.push(CommandResponse::committed(entry.log_id.index));
                }
                EntryPayload::Membership(mem) => {
                    sm.last_membership = StoredMembership::new(Some(entry.log_id), mem.clone());
                    res.push(CommandResponse::Internal);
                }
            }
        }

        Ok(res)
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<<TypeConfig as RaftTypeConfig>::SnapshotData>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta,
        snapshot: Box<<TypeConfig as RaftTypeConfig>::SnapshotData>,
    ) -> Result<(), StorageError<NodeId>> {
        let data = snapshot.into_inner();
        let new_sm: StateMachineData = serde_json::from_slice(&data)
            .map_err(|e| StorageIOError::read_snapshot(Some(meta.signature()), &e))?;
        warn!(
            snapshot = %meta.snapshot_id,
            "installed raft snapshot; statements before it are not replayed locally"
        );

        *self.sm.write().await = new_sm;
        *self.current_snapshot.write().await = Some(StoredSnapshot {
            meta: meta.clone(),
            data,
        });
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        let current = self.current_snapshot.read().await;
        Ok(current.as_ref().map(|snapshot| Snapshot {
            meta: snapshot.meta.clone(),
            snapshot: Box::new(Cursor::new(snapshot.data.clone())),
        }))
    }
}
