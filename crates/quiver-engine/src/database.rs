//! QuiverDB: the database handle and its lifecycle.
//!
//! Opening a persistent database loads the latest checkpoint, replays the
//! WAL transactions committed after it, and resumes the transaction
//! manager where the log left off. Closing stops the background threads,
//! takes a final checkpoint and closes the WAL.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use quiver_adapters::plugins::{BuiltinFunctions, FunctionRegistry, Plugin, PluginRegistry};
use quiver_adapters::storage::wal::{
    CheckpointMeta, CheckpointStore, RecoveryStats, WalConfig, WalFlusher, WalManager, WalRecord,
    WalRecovery,
};
use quiver_adapters::storage::{DirectoryBackend, StorageBackend};
use quiver_common::memory::BufferManager;
use quiver_common::mvcc::{Snapshot, WriteSet};
use quiver_common::types::{EpochId, PropertyKey, TxId};
use quiver_common::utils::error::{Error, Result, StorageError, TransactionError};
use quiver_core::execution::spill::SpillManager;
use quiver_core::execution::{ExecutionContext, WorkerPool};
use quiver_core::graph::lpg::LpgStoreConfig;
use quiver_core::{IndexKind, LpgStore, Statistics};

use crate::checkpointer::{Checkpointer, Maintenance, collect_garbage};
use crate::config::{Config, SyncMode};
use crate::query::{Optimizer, PhysicalPlan, QueryExecutor};
use crate::query::plan::LogicalPlan;
use crate::session::Session;
use crate::transaction::{ReadTransaction, TransactionManager, TxStats};

/// How long cached statistics are trusted after newer commits.
const STATISTICS_TTL: Duration = Duration::from_secs(1);

struct CachedStatistics {
    epoch: EpochId,
    collected: Instant,
    stats: Arc<Statistics>,
}

/// State shared by the database handle and its sessions.
pub(crate) struct DatabaseState {
    pub(crate) config: Config,
    pub(crate) store: Arc<LpgStore>,
    pub(crate) tx_manager: Arc<TransactionManager>,
    pub(crate) wal: Option<Arc<WalManager>>,
    pub(crate) checkpointer: Option<Arc<Checkpointer>>,
    maintenance: Mutex<Option<Maintenance>>,
    executor: QueryExecutor,
    functions: Arc<FunctionRegistry>,
    memory: BufferManager,
    spill: Option<Arc<SpillManager>>,
    statistics: RwLock<CachedStatistics>,
    open: AtomicBool,
}

impl DatabaseState {
    /// Fails unless the database accepts writes.
    pub(crate) fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.config.read_only {
            return Err(Error::Transaction(TransactionError::ReadOnly));
        }
        Ok(())
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::Internal("database is closed".to_string()))
        }
    }

    /// Optimizes `plan` with the current statistics and indexes.
    pub(crate) fn optimize(&self, plan: LogicalPlan) -> Result<PhysicalPlan> {
        let physical = Optimizer::new()
            .with_statistics(self.statistics())
            .with_indexes(self.store.property_indexes())
            .optimize(plan)?;
        if self.config.query_logging {
            tracing::info!(
                rows = physical.rows(),
                cost = physical.cost().total(),
                "executing plan:\n{physical}"
            );
        }
        Ok(physical)
    }

    /// An execution context reading at `snapshot`.
    pub(crate) fn context(&self, snapshot: Snapshot) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(Arc::clone(&self.store), snapshot)
            .with_functions(Arc::clone(&self.functions) as _)
            .with_memory(self.memory.clone())
            .with_morsel_size(self.config.morsel_size);
        if let Some(spill) = &self.spill {
            ctx = ctx.with_spill(Arc::clone(spill));
        }
        ctx
    }

    pub(crate) fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Statistics for planning, recollected once commits made them stale.
    pub(crate) fn statistics(&self) -> Arc<Statistics> {
        {
            let cached = self.statistics.read();
            if cached.epoch == self.tx_manager.current_epoch()
                || cached.collected.elapsed() < STATISTICS_TTL
            {
                return Arc::clone(&cached.stats);
            }
        }
        self.analyze()
    }

    /// Recollects statistics from the latest committed state.
    pub(crate) fn analyze(&self) -> Arc<Statistics> {
        let read = ReadTransaction::begin(&self.tx_manager);
        let snapshot = read.snapshot();
        let stats = Arc::new(Statistics::collect(&self.store, &snapshot));
        drop(read);
        tracing::debug!(
            epoch = %snapshot.epoch,
            nodes = stats.total_nodes,
            edges = stats.total_edges,
            "statistics collected"
        );
        *self.statistics.write() = CachedStatistics {
            epoch: snapshot.epoch,
            collected: Instant::now(),
            stats: Arc::clone(&stats),
        };
        stats
    }

    /// Called after every commit that wrote something.
    pub(crate) fn after_commit(&self) {
        if let Some(checkpointer) = &self.checkpointer
            && checkpointer.should_checkpoint()
            && let Some(maintenance) = self.maintenance.lock().as_ref()
        {
            maintenance.request_checkpoint();
        }
    }
}

/// An embedded Quiver database.
///
/// Cheap to share behind an `Arc`; all work goes through [`Session`]s.
pub struct QuiverDB {
    state: Arc<DatabaseState>,
    flusher: Mutex<Option<WalFlusher>>,
}

impl QuiverDB {
    /// Creates an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker threads cannot be started.
    ///
    /// # Examples
    ///
    /// ```
    /// use quiver_engine::QuiverDB;
    ///
    /// let db = QuiverDB::new_in_memory().unwrap();
    /// let session = db.session();
    /// ```
    pub fn new_in_memory() -> Result<Self> {
        Self::with_config(Config::in_memory())
    }

    /// Opens or creates a database at `path`, recovering it if needed.
    ///
    /// # Errors
    ///
    /// Returns `StorageCorruption` if the checkpoint or the WAL is damaged,
    /// or an I/O error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use quiver_engine::QuiverDB;
    ///
    /// let db = QuiverDB::open("./my_database")?;
    /// # Ok::<(), quiver_common::utils::error::Error>(())
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(Config::persistent(path.as_ref()))
    }

    /// Creates a database with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` for an invalid configuration, and otherwise
    /// as [`open`](Self::open).
    ///
    /// # Examples
    ///
    /// ```
    /// use quiver_engine::{Config, QuiverDB};
    ///
    /// let config = Config::in_memory()
    ///     .with_memory_limit(512 * 1024 * 1024)
    ///     .with_threads(2);
    /// let db = QuiverDB::with_config(config).unwrap();
    /// ```
    pub fn with_config(config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::InvalidValue(format!("invalid configuration: {e}")))?;
        let started = Instant::now();

        let memory = BufferManager::new(config.memory_limit);
        let store = LpgStore::with_config(LpgStoreConfig::default(), memory.clone());

        let mut checkpoints = None;
        let mut checkpoint_epoch = EpochId::INITIAL;
        let mut last_epoch = EpochId::INITIAL;
        let mut last_tx = TxId::SYSTEM;
        let mut wal = None;

        if let Some(path) = &config.path {
            if !config.read_only {
                std::fs::create_dir_all(path)?;
            }
            let backend: Arc<dyn StorageBackend> = Arc::new(DirectoryBackend::open(path)?);
            let store_files = CheckpointStore::new(backend);
            if !config.read_only {
                store_files.repair()?;
            }
            let mut from_segment = 0;
            if let Some((meta, image)) = store_files.load()? {
                store.load_image(image, meta.epoch)?;
                checkpoint_epoch = meta.epoch;
                last_epoch = meta.epoch;
                from_segment = meta.wal_segment;
                tracing::info!(epoch = %meta.epoch, bytes = meta.base_bytes, "loaded checkpoint");
            }

            let wal_dir = path.join("wal");
            if wal_dir.exists() {
                let mut recovery = WalRecovery::new(&wal_dir);
                if config.read_only {
                    recovery = recovery.read_only();
                }
                let (transactions, stats) = recovery.recover(from_segment, checkpoint_epoch)?;
                for tx in &transactions {
                    replay(&store, tx.tx_id, tx.epoch, &tx.records)?;
                    last_epoch = last_epoch.max(tx.epoch);
                    last_tx = last_tx.max(tx.tx_id);
                }
                log_recovery(&stats);
            }
            store.compact_adjacency();

            if config.wal_enabled && !config.read_only {
                let wal_config = WalConfig {
                    sync_mode: config.sync_mode,
                    segment_size: config.wal_segment_size,
                };
                wal = Some(Arc::new(WalManager::with_config(&wal_dir, wal_config)?));
            }
            checkpoints = Some(store_files);
        }

        let store = Arc::new(store);
        let tx_manager = Arc::new(TransactionManager::starting_at(last_epoch, last_tx));

        let checkpointer = match checkpoints {
            Some(files) if !config.read_only => Some(Arc::new(Checkpointer::new(
                Arc::clone(&store),
                Arc::clone(&tx_manager),
                wal.clone(),
                files,
                config.checkpoint_wal_threshold,
                checkpoint_epoch,
            ))),
            _ => None,
        };

        let spill = match config.memory_limit {
            None => None,
            Some(_) => Some(Arc::new(match config.effective_spill_path() {
                Some(dir) if !config.read_only => SpillManager::new(dir)?,
                _ => SpillManager::temporary()?,
            })),
        };

        let mut plugins = PluginRegistry::new();
        plugins
            .install(&BuiltinFunctions)
            .map_err(|e| Error::Internal(format!("installing {}: {e}", BuiltinFunctions.name())))?;

        let pool = Arc::new(WorkerPool::new(config.threads.saturating_sub(1).max(1)));
        let executor = QueryExecutor::new(pool, config.threads, config.result_queue_capacity);

        let initial = Arc::new(Statistics::collect(&store, &Snapshot::committed(last_epoch)));
        let state = Arc::new(DatabaseState {
            store: Arc::clone(&store),
            tx_manager: Arc::clone(&tx_manager),
            wal: wal.clone(),
            checkpointer: checkpointer.clone(),
            maintenance: Mutex::new(None),
            executor,
            functions: Arc::new(plugins.into_functions()),
            memory,
            spill,
            statistics: RwLock::new(CachedStatistics {
                epoch: last_epoch,
                collected: Instant::now(),
                stats: initial,
            }),
            open: AtomicBool::new(true),
            config,
        });

        if state.config.checkpoint_interval_ms > 0 && !state.config.read_only {
            let maintenance = Maintenance::start(
                store,
                tx_manager,
                checkpointer,
                Duration::from_millis(state.config.checkpoint_interval_ms),
            )?;
            *state.maintenance.lock() = Some(maintenance);
        }

        let flusher = match &wal {
            Some(wal) if state.config.sync_mode == SyncMode::Normal => {
                Some(WalFlusher::start(
                    Arc::clone(wal),
                    Duration::from_millis(state.config.wal_flush_interval_ms),
                )?)
            }
            _ => None,
        };

        tracing::info!(
            path = ?state.config.path,
            epoch = %last_epoch,
            read_only = state.config.read_only,
            threads = state.config.threads,
            took = ?started.elapsed(),
            "database opened"
        );
        Ok(Self {
            state,
            flusher: Mutex::new(flusher),
        })
    }

    /// Opens a session.
    #[must_use]
    pub fn session(&self) -> Session {
        Session::new(Arc::clone(&self.state))
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<LpgStore> {
        &self.state.store
    }

    /// The transaction manager.
    #[must_use]
    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.state.tx_manager
    }

    /// Transaction counters.
    #[must_use]
    pub fn transaction_stats(&self) -> TxStats {
        self.state.tx_manager.stats()
    }

    /// Returns true if the database has a directory on disk.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.state.config.path.is_some()
    }

    /// Committed node count.
    #[must_use]
    pub fn node_count(&self) -> usize {
        let read = ReadTransaction::begin(&self.state.tx_manager);
        self.state.store.node_count(None, &read.snapshot())
    }

    /// Committed edge count.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        let read = ReadTransaction::begin(&self.state.tx_manager);
        self.state.store.edge_count(&read.snapshot())
    }

    /// Current planner statistics.
    #[must_use]
    pub fn statistics(&self) -> Arc<Statistics> {
        self.state.statistics()
    }

    /// Recollects planner statistics.
    pub fn analyze(&self) -> Arc<Statistics> {
        self.state.analyze()
    }

    /// Creates a property index over `key` and backfills it. Returns false
    /// if an index on `key` already exists.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` for a read-only database, or an error if the WAL
    /// append fails.
    pub fn create_index(&self, key: impl Into<PropertyKey>, kind: IndexKind) -> Result<bool> {
        let key = key.into();
        let created = self.apply_ddl(
            |tx_id| WalRecord::CreateIndex {
                tx_id,
                key: key.clone(),
                kind,
            },
            |store| store.create_property_index(key.clone(), kind),
        )?;
        tracing::info!(%key, ?kind, created, "property index created");
        Ok(created)
    }

    /// Drops the property index over `key`. Returns false if there was none.
    ///
    /// # Errors
    ///
    /// As [`create_index`](Self::create_index).
    pub fn drop_index(&self, key: impl Into<PropertyKey>) -> Result<bool> {
        let key = key.into();
        let dropped = self.apply_ddl(
            |tx_id| WalRecord::DropIndex {
                tx_id,
                key: key.clone(),
            },
            |store| store.drop_property_index(&key),
        )?;
        tracing::info!(%key, dropped, "property index dropped");
        Ok(dropped)
    }

    /// Logs an index change as a transaction of its own and applies it.
    ///
    /// Both happen under the commit lock, so a checkpoint sees either the
    /// change or its log record. The commit record carries the epoch after
    /// the current one, so a checkpoint at the current epoch never makes
    /// recovery skip it.
    fn apply_ddl(
        &self,
        record: impl FnOnce(TxId) -> WalRecord,
        apply: impl FnOnce(&LpgStore) -> bool,
    ) -> Result<bool> {
        self.state.check_writable()?;
        let tx = self.state.tx_manager.begin();
        let applied = self.state.tx_manager.with_commit_lock(|epoch| -> Result<bool> {
            if let Some(wal) = &self.state.wal {
                wal.append(&[
                    record(tx.tx_id),
                    WalRecord::TxCommit {
                        tx_id: tx.tx_id,
                        epoch: epoch.next(),
                    },
                ])?;
            }
            Ok(apply(&self.state.store))
        });
        self.state
            .tx_manager
            .commit(&tx, &WriteSet::new(), |_| Ok(()))?;
        applied
    }

    /// Runs garbage collection and adjacency compaction now.
    pub fn maintain(&self) {
        collect_garbage(&self.state.store, &self.state.tx_manager);
        self.state.store.compact_adjacency();
    }

    /// Takes a checkpoint now. Returns `None` for an in-memory or
    /// read-only database.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be written.
    pub fn checkpoint(&self) -> Result<Option<CheckpointMeta>> {
        self.state.check_open()?;
        match &self.state.checkpointer {
            Some(checkpointer) => checkpointer.checkpoint().map(Some),
            None => Ok(None),
        }
    }

    /// Closes the database: stops background work, takes a final
    /// checkpoint and closes the WAL. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns the first error met; the database is closed regardless.
    pub fn close(&self) -> Result<()> {
        if !self.state.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = None;
        if let Some(mut maintenance) = self.state.maintenance.lock().take() {
            maintenance.shutdown();
        }
        if let Some(mut flusher) = self.flusher.lock().take()
            && let Err(e) = flusher.shutdown()
        {
            first_error.get_or_insert(e);
        }
        if let Some(checkpointer) = &self.state.checkpointer
            && self.state.config.checkpoint_on_close
            && (checkpointer.is_dirty() || checkpointer.should_checkpoint())
            && let Err(e) = checkpointer.checkpoint()
        {
            tracing::error!(error = %e, "final checkpoint failed");
            first_error.get_or_insert(e);
        }
        if let Some(wal) = &self.state.wal
            && let Err(e) = wal.close()
        {
            first_error.get_or_insert(e);
        }
        tracing::info!(path = ?self.state.config.path, "database closed");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for QuiverDB {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "error closing database");
        }
    }
}

impl std::fmt::Debug for QuiverDB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuiverDB")
            .field("path", &self.state.config.path)
            .field("epoch", &self.state.tx_manager.current_epoch())
            .finish_non_exhaustive()
    }
}

fn log_recovery(stats: &RecoveryStats) {
    tracing::info!(
        segments = stats.segments,
        records = stats.records,
        committed = stats.committed,
        skipped = stats.skipped,
        discarded = stats.discarded,
        torn_tail = stats.torn_tail,
        "WAL replayed"
    );
}

/// Re-applies one committed transaction from the log and commits it at
/// its original epoch.
fn replay(store: &LpgStore, tx_id: TxId, epoch: EpochId, records: &[WalRecord]) -> Result<()> {
    // Sees every committed version plus this transaction's own writes.
    let snapshot = Snapshot::new(EpochId::MAX, tx_id);
    let mut writes = WriteSet::new();
    let corrupt = |e: Error| {
        Error::Storage(StorageError::Corruption(format!(
            "replaying {tx_id} (epoch {epoch}): {e}"
        )))
    };
    for record in records {
        let applied = match record {
            WalRecord::CreateNode {
                id,
                labels,
                properties,
                ..
            } => {
                let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
                store
                    .create_node_with_id(&snapshot, &mut writes, *id, &labels, properties.clone())
                    .map(|_| ())
            }
            WalRecord::DeleteNode { id, detach, .. } => store
                .delete_node(&snapshot, &mut writes, *id, *detach)
                .map(|_| ()),
            WalRecord::CreateEdge {
                id,
                src,
                dst,
                edge_type,
                properties,
                ..
            } => store
                .create_edge_with_id(
                    &snapshot,
                    &mut writes,
                    *id,
                    *src,
                    *dst,
                    edge_type,
                    properties.clone(),
                )
                .map(|_| ()),
            WalRecord::DeleteEdge { id, .. } => store.delete_edge(&snapshot, &mut writes, *id),
            WalRecord::SetNodeProperty { id, key, value, .. } => store
                .set_node_property(&snapshot, &mut writes, *id, key.clone(), value.clone())
                .map(|_| ()),
            WalRecord::SetEdgeProperty { id, key, value, .. } => store
                .set_edge_property(&snapshot, &mut writes, *id, key.clone(), value.clone())
                .map(|_| ()),
            WalRecord::AddNodeLabel { id, label, .. } => store
                .add_label(&snapshot, &mut writes, *id, label)
                .map(|_| ()),
            WalRecord::RemoveNodeLabel { id, label, .. } => store
                .remove_label(&snapshot, &mut writes, *id, label)
                .map(|_| ()),
            WalRecord::CreateIndex { key, kind, .. } => {
                store.create_property_index(key.clone(), *kind);
                Ok(())
            }
            WalRecord::DropIndex { key, .. } => {
                store.drop_property_index(key);
                Ok(())
            }
            WalRecord::TxCommit { .. } | WalRecord::TxAbort { .. } | WalRecord::Checkpoint { .. } => {
                Ok(())
            }
        };
        applied.map_err(corrupt)?;
    }
    store.commit(tx_id, epoch, &writes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::plan::{AggregateExpr, LogicalOperator};
    use quiver_common::types::Value;

    fn count_people(session: &mut Session) -> i64 {
        session
            .execute(
                LogicalOperator::node_scan("n", Some("Person"))
                    .aggregate(vec![], vec![AggregateExpr::count_star().alias("c")])
                    .into_plan(),
            )
            .unwrap()
            .scalar::<i64>()
            .unwrap()
    }

    #[test]
    fn test_in_memory_lifecycle() {
        let db = QuiverDB::new_in_memory().unwrap();
        let mut session = db.session();
        session
            .create_node(&["Person"], [("name", Value::from("Alice"))])
            .unwrap();
        assert_eq!(db.node_count(), 1);
        assert_eq!(count_people(&mut session), 1);
        assert!(db.checkpoint().unwrap().is_none());
        db.close().unwrap();
        assert!(session.create_node(&["Person"], []).is_err());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = QuiverDB::with_config(Config::in_memory().with_threads(0)).unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
    }

    #[test]
    fn test_reopen_replays_wal() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::persistent(dir.path())
            .with_checkpoint_interval_ms(0)
            .without_checkpoint_on_close();
        {
            let db = QuiverDB::with_config(config.clone()).unwrap();
            let mut session = db.session();
            let a = session
                .create_node(&["Person"], [("name", Value::from("Alice"))])
                .unwrap();
            let b = session
                .create_node(&["Person"], [("name", Value::from("Bob"))])
                .unwrap();
            session.create_edge(a, b, "KNOWS", []).unwrap();
        }
        let db = QuiverDB::with_config(config).unwrap();
        assert_eq!(db.node_count(), 2);
        assert_eq!(db.edge_count(), 1);
        let mut session = db.session();
        assert_eq!(count_people(&mut session), 2);
    }

    #[test]
    fn test_reopen_from_checkpoint_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::persistent(dir.path()).with_checkpoint_interval_ms(0);
        {
            let db = QuiverDB::with_config(config.clone()).unwrap();
            db.create_index("age", IndexKind::BTree).unwrap();
            let mut session = db.session();
            for age in 0..10 {
                session.create_node(&["Person"], [("age", Value::Int64(age))]).unwrap();
            }
            let meta = db.checkpoint().unwrap().unwrap();
            assert_eq!(meta.epoch, db.transaction_manager().current_epoch());
            session.create_node(&["Person"], [("age", Value::Int64(99))]).unwrap();
        }
        let db = QuiverDB::with_config(config).unwrap();
        assert_eq!(db.node_count(), 11);
        assert_eq!(db.store().property_index_kind(&"age".into()), Some(IndexKind::BTree));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = QuiverDB::open(dir.path()).unwrap();
            db.session().create_node(&["Person"], []).unwrap();
        }
        let db = QuiverDB::with_config(Config::persistent(dir.path()).read_only()).unwrap();
        assert_eq!(db.node_count(), 1);
        let err = db.session().create_node(&["Person"], []).unwrap_err();
        assert!(matches!(err, Error::Transaction(TransactionError::ReadOnly)));
        assert!(db.create_index("x", IndexKind::Hash).is_err());
    }
}
