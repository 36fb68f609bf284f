//! RocksDB-backed room mirror.
//!
//! Column families:
//! - `rooms`:   Room metadata and member list (bincode)
//! - `content`: Room text (LZ4 compressed, UTF-8)
//!
//! Both are keyed by the normalized room code. A content write and its
//! metadata touch go into one `WriteBatch`, so a reader never sees text
//! without the activity timestamp that guards its expiry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};

use super::mirror::{
    now_secs, MirrorError, MirrorStatus, MirroredRoom, PersistenceMirror, DEFAULT_MIRROR_TTL,
};
use crate::room_id::RoomId;
use crate::user::{ConnectionId, User};

const CF_ROOMS: &str = "rooms";
const CF_CONTENT: &str = "content";

const COLUMN_FAMILIES: &[&str] = &[CF_ROOMS, CF_CONTENT];

/// Mirror configuration.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Inactivity window before a room is forgotten (default: 24h)
    pub ttl: Duration,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("uniflow_data"),
            ttl: DEFAULT_MIRROR_TTL,
            block_cache_size: 64 * 1024 * 1024,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl MirrorConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create config for testing (small caches).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            max_open_files: 64,
            write_buffer_size: 2 * 1024 * 1024,
            ..Self::default()
        }
    }
}

/// Persisted room metadata. Content lives in its own column family.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoomRecord {
    users: Vec<User>,
    created_at: u64,
    last_activity: u64,
}

impl RoomRecord {
    fn new(now: u64) -> Self {
        Self {
            users: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, MirrorError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| MirrorError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, MirrorError> {
        let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| MirrorError::Deserialization(e.to_string()))?;
        Ok(record)
    }
}

impl From<rocksdb::Error> for MirrorError {
    fn from(e: rocksdb::Error) -> Self {
        MirrorError::Database(e.to_string())
    }
}

/// Durable [`PersistenceMirror`] on RocksDB.
pub struct RocksMirror {
    db: DBWithThreadMode<SingleThreaded>,
    config: MirrorConfig,
}

impl RocksMirror {
    /// Open the mirror at the configured path, creating it if missing.
    pub fn open(config: MirrorConfig) -> Result<Self, MirrorError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Room mirror opened at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &MirrorConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            // Values are already LZ4 framed.
            CF_CONTENT => opts.set_compression_type(DBCompressionType::None),
            _ => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
        }

        opts
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Look a room up as of `now`, deleting it if it has expired.
    pub fn find_room_at(
        &self,
        room_id: &RoomId,
        now: u64,
    ) -> Result<Option<MirroredRoom>, MirrorError> {
        let Some(record) = self.load_record(room_id)? else {
            return Ok(None);
        };
        if now.saturating_sub(record.last_activity) > self.config.ttl.as_secs() {
            log::debug!("Mirrored room {room_id} expired");
            self.delete_room(room_id)?;
            return Ok(None);
        }

        Ok(Some(MirroredRoom {
            room_id: room_id.clone(),
            content: self.load_content(room_id)?,
            users: record.users,
            created_at: record.created_at,
            last_activity: record.last_activity,
        }))
    }

    /// Delete every room inactive for longer than the TTL as of `now`.
    pub fn purge_expired_at(&self, now: u64) -> Result<usize, MirrorError> {
        let cf_rooms = self.cf(CF_ROOMS)?;
        let cf_content = self.cf(CF_CONTENT)?;
        let ttl = self.config.ttl.as_secs();

        let mut batch = WriteBatch::default();
        let mut purged = 0;
        for item in self.db.iterator_cf(cf_rooms, IteratorMode::Start) {
            let (key, value) = item?;
            let record = RoomRecord::decode(&value)?;
            if now.saturating_sub(record.last_activity) > ttl {
                batch.delete_cf(cf_rooms, &key);
                batch.delete_cf(cf_content, &key);
                purged += 1;
            }
        }

        if purged > 0 {
            self.write(batch)?;
            log::info!("Purged {purged} expired rooms from mirror");
        }
        Ok(purged)
    }

    /// Number of rooms currently stored, expired or not.
    pub fn room_count(&self) -> Result<usize, MirrorError> {
        let cf = self.cf(CF_ROOMS)?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), MirrorError> {
        self.db.flush()?;
        Ok(())
    }

    fn load_record(&self, room_id: &RoomId) -> Result<Option<RoomRecord>, MirrorError> {
        let cf = self.cf(CF_ROOMS)?;
        match self.db.get_cf(cf, room_id.as_str())? {
            Some(bytes) => RoomRecord::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn load_content(&self, room_id: &RoomId) -> Result<String, MirrorError> {
        let cf = self.cf(CF_CONTENT)?;
        let Some(compressed) = self.db.get_cf(cf, room_id.as_str())? else {
            return Ok(String::new());
        };
        let bytes = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| MirrorError::Compression(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| MirrorError::Deserialization(e.to_string()))
    }

    fn delete_room(&self, room_id: &RoomId) -> Result<(), MirrorError> {
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_ROOMS)?, room_id.as_str());
        batch.delete_cf(self.cf(CF_CONTENT)?, room_id.as_str());
        self.write(batch)
    }

    /// Read-modify-write of a room record, creating it if absent.
    fn touch_record(
        &self,
        room_id: &RoomId,
        batch: &mut WriteBatch,
        update: impl FnOnce(&mut RoomRecord),
    ) -> Result<(), MirrorError> {
        let now = now_secs();
        let mut record = self
            .load_record(room_id)?
            .unwrap_or_else(|| RoomRecord::new(now));
        update(&mut record);
        record.last_activity = now;
        batch.put_cf(self.cf(CF_ROOMS)?, room_id.as_str(), record.encode()?);
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), MirrorError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, MirrorError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| MirrorError::Database(format!("Column family '{name}' not found")))
    }
}

impl PersistenceMirror for RocksMirror {
    fn find_room(&self, room_id: &RoomId) -> Result<Option<MirroredRoom>, MirrorError> {
        self.find_room_at(room_id, now_secs())
    }

    fn upsert_room(&self, room_id: &RoomId, content: &str) -> Result<(), MirrorError> {
        let mut batch = WriteBatch::default();
        self.touch_record(room_id, &mut batch, |_| {})?;
        let compressed = lz4_flex::compress_prepend_size(content.as_bytes());
        batch.put_cf(self.cf(CF_CONTENT)?, room_id.as_str(), compressed);
        self.write(batch)
    }

    fn update_room(&self, room_id: &RoomId, content: &str) -> Result<bool, MirrorError> {
        match self.load_record(room_id)? {
            Some(record)
                if now_secs().saturating_sub(record.last_activity) <= self.config.ttl.as_secs() =>
            {
                self.upsert_room(room_id, content)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn add_member(&self, room_id: &RoomId, user: &User) -> Result<(), MirrorError> {
        let mut batch = WriteBatch::default();
        self.touch_record(room_id, &mut batch, |record| {
            match record.users.iter_mut().find(|u| u.id == user.id) {
                Some(existing) => *existing = user.clone(),
                None => record.users.push(user.clone()),
            }
        })?;
        self.write(batch)
    }

    fn remove_member(&self, room_id: &RoomId, user_id: ConnectionId) -> Result<(), MirrorError> {
        if self.load_record(room_id)?.is_none() {
            return Ok(());
        }
        let mut batch = WriteBatch::default();
        self.touch_record(room_id, &mut batch, |record| {
            record.users.retain(|u| u.id != user_id);
        })?;
        self.write(batch)
    }

    fn purge_expired(&self) -> Result<usize, MirrorError> {
        self.purge_expired_at(now_secs())
    }

    fn status(&self) -> MirrorStatus {
        MirrorStatus::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, RocksMirror) {
        let dir = tempfile::tempdir().unwrap();
        let mirror = RocksMirror::open(MirrorConfig::for_testing(dir.path())).unwrap();
        (dir, mirror)
    }

    fn room(code: &str) -> RoomId {
        RoomId::parse(code).unwrap()
    }

    #[test]
    fn test_open_creates_directory() {
        let (dir, mirror) = open_temp();
        assert!(mirror.path().exists());
        assert_eq!(mirror.path(), dir.path());
        assert_eq!(mirror.room_count().unwrap(), 0);
    }

    #[test]
    fn test_upsert_and_find() {
        let (_dir, mirror) = open_temp();
        let id = room("RKS001");

        assert!(mirror.find_room(&id).unwrap().is_none());
        mirror.upsert_room(&id, "").unwrap();
        mirror.upsert_room(&id, "fn main() {}\n".repeat(50).as_str()).unwrap();

        let found = mirror.find_room(&id).unwrap().unwrap();
        assert_eq!(found.room_id, id);
        assert_eq!(found.content, "fn main() {}\n".repeat(50));
        assert!(found.users.is_empty());
    }

    #[test]
    fn test_unicode_content_survives_compression() {
        let (_dir, mirror) = open_temp();
        let id = room("RKS002");
        let text = "héllo wörld 👋 ünïcode";
        mirror.upsert_room(&id, text).unwrap();
        assert_eq!(mirror.find_room(&id).unwrap().unwrap().content, text);
    }

    #[test]
    fn test_member_bookkeeping() {
        let (_dir, mirror) = open_temp();
        let id = room("RKS003");
        let mut rng = StdRng::seed_from_u64(11);
        let alice = User::new(ConnectionId::new(), "Alice".into(), id.clone(), &mut rng);
        let bob = User::new(ConnectionId::new(), "Bob".into(), id.clone(), &mut rng);

        mirror.add_member(&id, &alice).unwrap();
        mirror.add_member(&id, &bob).unwrap();
        mirror.add_member(&id, &bob).unwrap();
        mirror.remove_member(&id, alice.id).unwrap();

        let found = mirror.find_room(&id).unwrap().unwrap();
        assert_eq!(found.users, vec![bob]);
        assert_eq!(found.content, "");
    }

    #[test]
    fn test_remove_member_of_unknown_room_is_noop() {
        let (_dir, mirror) = open_temp();
        mirror.remove_member(&room("NOPE01"), ConnectionId::new()).unwrap();
        assert_eq!(mirror.room_count().unwrap(), 0);
    }

    #[test]
    fn test_expired_room_is_deleted_on_read() {
        let (_dir, mirror) = open_temp();
        let id = room("RKS004");
        mirror.upsert_room(&id, "stale").unwrap();

        let later = now_secs() + mirror.ttl().as_secs() + 1;
        assert!(mirror.find_room_at(&id, later).unwrap().is_none());
        assert_eq!(mirror.room_count().unwrap(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let (_dir, mirror) = open_temp();
        mirror.upsert_room(&room("OLD001"), "a").unwrap();
        mirror.upsert_room(&room("OLD002"), "b").unwrap();

        assert_eq!(mirror.purge_expired().unwrap(), 0);
        let later = now_secs() + mirror.ttl().as_secs() + 1;
        assert_eq!(mirror.purge_expired_at(later).unwrap(), 2);
        assert_eq!(mirror.room_count().unwrap(), 0);
    }

    #[test]
    fn test_update_room_only_touches_existing() {
        let (_dir, mirror) = open_temp();
        let id = room("UPD001");

        assert!(!mirror.update_room(&id, "phantom").unwrap());
        assert_eq!(mirror.room_count().unwrap(), 0);

        mirror.upsert_room(&id, "draft").unwrap();
        assert!(mirror.update_room(&id, "final").unwrap());
        assert_eq!(mirror.find_room(&id).unwrap().unwrap().content, "final");
    }

    #[test]
    fn test_reopen_preserves_rooms() {
        let dir = tempfile::tempdir().unwrap();
        let id = room("DUR001");
        {
            let mirror = RocksMirror::open(MirrorConfig::for_testing(dir.path())).unwrap();
            mirror.upsert_room(&id, "persisted").unwrap();
            mirror.flush().unwrap();
        }

        let mirror = RocksMirror::open(MirrorConfig::for_testing(dir.path())).unwrap();
        assert_eq!(mirror.find_room(&id).unwrap().unwrap().content, "persisted");
    }
}
