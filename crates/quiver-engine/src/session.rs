//! Sessions: transactions, mutations and queries.
//!
//! A session runs at most one transaction at a time. Mutations outside an
//! explicit transaction run in one of their own that commits right away
//! in auto-commit mode, or stays open until [`Session::commit`] otherwise.

use std::sync::Arc;

use quiver_adapters::storage::wal::WalRecord;
use quiver_common::mvcc::{Snapshot, WriteSet};
use quiver_common::types::{EdgeId, EpochId, NodeId, PropertyKey, TxId, Value};
use quiver_common::utils::error::{Error, Result, TransactionError};
use quiver_core::{Edge, LpgStore, Node};

use crate::database::DatabaseState;
use crate::query::plan::LogicalPlan;
use crate::query::{QueryResult, ResultStream};
use crate::transaction::ReadTransaction;

struct ActiveTx {
    snapshot: Snapshot,
    writes: WriteSet,
    /// WAL records, appended together with the commit record.
    log: Vec<WalRecord>,
}

/// A connection to a [`QuiverDB`](crate::QuiverDB).
///
/// # Examples
///
/// ```
/// use quiver_common::types::Value;
/// use quiver_engine::QuiverDB;
///
/// let db = QuiverDB::new_in_memory().unwrap();
/// let mut session = db.session();
/// session.begin_tx().unwrap();
/// let alice = session.create_node(&["Person"], [("name", Value::from("Alice"))]).unwrap();
/// let bob = session.create_node(&["Person"], [("name", Value::from("Bob"))]).unwrap();
/// session.create_edge(alice, bob, "KNOWS", []).unwrap();
/// session.commit().unwrap();
/// assert_eq!(db.edge_count(), 1);
/// ```
pub struct Session {
    state: Arc<DatabaseState>,
    tx: Option<ActiveTx>,
    auto_commit: bool,
}

impl Session {
    pub(crate) fn new(state: Arc<DatabaseState>) -> Self {
        Self {
            state,
            tx: None,
            auto_commit: true,
        }
    }

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if one is already running.
    pub fn begin_tx(&mut self) -> Result<()> {
        self.state.check_open()?;
        if self.tx.is_some() {
            return Err(invalid("a transaction is already active"));
        }
        self.tx = Some(self.start());
        Ok(())
    }

    /// Commits the running transaction and returns its commit epoch.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` without a running transaction,
    /// `WriteConflict` if another transaction committed an overlapping
    /// write first, or a WAL error. The transaction is rolled back on
    /// any error.
    pub fn commit(&mut self) -> Result<EpochId> {
        let tx = self.tx.take().ok_or_else(|| invalid("no active transaction"))?;
        self.finish(tx)
    }

    /// Rolls back the running transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` without a running transaction.
    pub fn rollback(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| invalid("no active transaction"))?;
        self.discard(&tx)
    }

    /// Returns true while a transaction is running.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Sets auto-commit mode.
    pub fn set_auto_commit(&mut self, auto_commit: bool) {
        self.auto_commit = auto_commit;
    }

    /// Returns whether auto-commit is enabled.
    #[must_use]
    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// The snapshot reads see: the running transaction's, or the latest
    /// committed state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.tx.as_ref().map_or_else(
            || Snapshot::committed(self.state.tx_manager.current_epoch()),
            |tx| tx.snapshot,
        )
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.read(|store, snapshot| store.get_node(id, snapshot))
    }

    /// Looks up an edge.
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> Option<Edge> {
        self.read(|store, snapshot| store.get_edge(id, snapshot))
    }

    /// Creates a node.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` for a read-only database, or `ResourceExhausted`
    /// once the memory budget is spent.
    pub fn create_node<'a>(
        &mut self,
        labels: &[&str],
        properties: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<NodeId> {
        let properties = to_properties(properties);
        self.write(
            |store, snapshot, writes| store.create_node(snapshot, writes, labels, properties.clone()),
            |tx_id, id| {
                vec![WalRecord::CreateNode {
                    tx_id,
                    id: *id,
                    labels: labels.iter().map(|l| (*l).to_string()).collect(),
                    properties: properties.clone(),
                }]
            },
        )
    }

    /// Creates many nodes in one write.
    ///
    /// # Errors
    ///
    /// As [`create_node`](Self::create_node); on error no node is created.
    pub fn create_nodes_batch(
        &mut self,
        batch: Vec<(Vec<String>, Vec<(PropertyKey, Value)>)>,
    ) -> Result<Vec<NodeId>> {
        self.write(
            |store, snapshot, writes| store.create_nodes_batch(snapshot, writes, batch.clone()),
            |tx_id, ids| {
                ids.iter()
                    .zip(&batch)
                    .map(|(id, (labels, properties))| WalRecord::CreateNode {
                        tx_id,
                        id: *id,
                        labels: labels.clone(),
                        properties: properties.clone(),
                    })
                    .collect()
            },
        )
    }

    /// Creates an edge from `src` to `dst`.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if an endpoint is not visible to this
    /// session.
    pub fn create_edge<'a>(
        &mut self,
        src: NodeId,
        dst: NodeId,
        edge_type: &str,
        properties: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<EdgeId> {
        let properties = to_properties(properties);
        self.write(
            |store, snapshot, writes| {
                store.create_edge(snapshot, writes, src, dst, edge_type, properties.clone())
            },
            |tx_id, id| {
                vec![WalRecord::CreateEdge {
                    tx_id,
                    id: *id,
                    src,
                    dst,
                    edge_type: edge_type.to_string(),
                    properties: properties.clone(),
                }]
            },
        )
    }

    /// Sets a node property; `Null` removes it. Returns the old value.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not visible.
    pub fn set_node_property(
        &mut self,
        id: NodeId,
        key: impl Into<PropertyKey>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        let key = key.into();
        let value = value.into();
        self.write(
            |store, snapshot, writes| {
                store.set_node_property(snapshot, writes, id, key.clone(), value.clone())
            },
            |tx_id, _| {
                vec![WalRecord::SetNodeProperty {
                    tx_id,
                    id,
                    key: key.clone(),
                    value: value.clone(),
                }]
            },
        )
    }

    /// Removes a node property. Returns the old value.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not visible.
    pub fn remove_node_property(
        &mut self,
        id: NodeId,
        key: impl Into<PropertyKey>,
    ) -> Result<Option<Value>> {
        self.set_node_property(id, key, Value::Null)
    }

    /// Sets an edge property; `Null` removes it. Returns the old value.
    ///
    /// # Errors
    ///
    /// Returns `EdgeNotFound` if the edge is not visible.
    pub fn set_edge_property(
        &mut self,
        id: EdgeId,
        key: impl Into<PropertyKey>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        let key = key.into();
        let value = value.into();
        self.write(
            |store, snapshot, writes| {
                store.set_edge_property(snapshot, writes, id, key.clone(), value.clone())
            },
            |tx_id, _| {
                vec![WalRecord::SetEdgeProperty {
                    tx_id,
                    id,
                    key: key.clone(),
                    value: value.clone(),
                }]
            },
        )
    }

    /// Removes an edge property. Returns the old value.
    ///
    /// # Errors
    ///
    /// Returns `EdgeNotFound` if the edge is not visible.
    pub fn remove_edge_property(
        &mut self,
        id: EdgeId,
        key: impl Into<PropertyKey>,
    ) -> Result<Option<Value>> {
        self.set_edge_property(id, key, Value::Null)
    }

    /// Adds a label. Returns false if the node already had it.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not visible.
    pub fn add_label(&mut self, id: NodeId, label: &str) -> Result<bool> {
        self.write(
            |store, snapshot, writes| store.add_label(snapshot, writes, id, label),
            |tx_id, added| {
                if *added {
                    vec![WalRecord::AddNodeLabel {
                        tx_id,
                        id,
                        label: label.to_string(),
                    }]
                } else {
                    Vec::new()
                }
            },
        )
    }

    /// Removes a label. Returns false if the node did not have it.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not visible.
    pub fn remove_label(&mut self, id: NodeId, label: &str) -> Result<bool> {
        self.write(
            |store, snapshot, writes| store.remove_label(snapshot, writes, id, label),
            |tx_id, removed| {
                if *removed {
                    vec![WalRecord::RemoveNodeLabel {
                        tx_id,
                        id,
                        label: label.to_string(),
                    }]
                } else {
                    Vec::new()
                }
            },
        )
    }

    /// Deletes a node without edges.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not visible, or
    /// `EdgeConstraintViolation` if it still has edges.
    pub fn delete_node(&mut self, id: NodeId) -> Result<()> {
        self.delete(id, false).map(|_| ())
    }

    /// Deletes a node with all its edges. Returns the number of edges
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not visible.
    pub fn detach_delete_node(&mut self, id: NodeId) -> Result<usize> {
        self.delete(id, true)
    }

    fn delete(&mut self, id: NodeId, detach: bool) -> Result<usize> {
        self.write(
            |store, snapshot, writes| store.delete_node(snapshot, writes, id, detach),
            |tx_id, _| vec![WalRecord::DeleteNode { tx_id, id, detach }],
        )
    }

    /// Deletes an edge.
    ///
    /// # Errors
    ///
    /// Returns `EdgeNotFound` if the edge is not visible.
    pub fn delete_edge(&mut self, id: EdgeId) -> Result<()> {
        self.write(
            |store, snapshot, writes| store.delete_edge(snapshot, writes, id),
            |tx_id, ()| vec![WalRecord::DeleteEdge { tx_id, id }],
        )
    }

    /// Optimizes and starts `plan`, returning a cursor over its rows.
    ///
    /// Inside a transaction the query reads the transaction's snapshot,
    /// its own writes included. Otherwise it reads the latest committed
    /// state, which stays pinned until the cursor is exhausted or dropped.
    ///
    /// # Errors
    ///
    /// Returns `Query` for a plan that does not bind.
    pub fn query(&self, plan: LogicalPlan) -> Result<ResultStream> {
        self.state.check_open()?;
        let physical = self.state.optimize(plan)?;
        let (snapshot, read) = match &self.tx {
            Some(tx) => (tx.snapshot, None),
            None => {
                let read = ReadTransaction::begin(&self.state.tx_manager);
                (read.snapshot(), Some(read))
            }
        };
        let ctx = self.state.context(snapshot);
        self.state.executor().execute(&physical, ctx, read)
    }

    /// Runs `plan` to completion.
    ///
    /// # Errors
    ///
    /// As [`query`](Self::query), plus any error raised while executing.
    pub fn execute(&self, plan: LogicalPlan) -> Result<QueryResult> {
        self.query(plan)?.into_result()
    }

    fn start(&self) -> ActiveTx {
        ActiveTx {
            snapshot: self.state.tx_manager.begin(),
            writes: WriteSet::new(),
            log: Vec::new(),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&LpgStore, &Snapshot) -> T) -> T {
        match &self.tx {
            Some(tx) => f(&self.state.store, &tx.snapshot),
            None => {
                let read = ReadTransaction::begin(&self.state.tx_manager);
                f(&self.state.store, &read.snapshot())
            }
        }
    }

    /// Runs one mutation, in the running transaction or an implicit one.
    fn write<T>(
        &mut self,
        apply: impl FnOnce(&LpgStore, &Snapshot, &mut WriteSet) -> Result<T>,
        log: impl FnOnce(TxId, &T) -> Vec<WalRecord>,
    ) -> Result<T> {
        self.state.check_writable()?;
        let implicit = self.tx.is_none();
        let mut tx = match self.tx.take() {
            Some(tx) => tx,
            None => self.start(),
        };
        let applied = apply(&self.state.store, &tx.snapshot, &mut tx.writes);
        match applied {
            Ok(value) => {
                if self.state.wal.is_some() {
                    tx.log.extend(log(tx.snapshot.tx_id, &value));
                }
                if implicit && self.auto_commit {
                    self.finish(tx)?;
                } else {
                    self.tx = Some(tx);
                }
                Ok(value)
            }
            Err(e) => {
                if implicit {
                    self.discard(&tx)?;
                } else {
                    self.tx = Some(tx);
                }
                Err(e)
            }
        }
    }

    fn finish(&self, tx: ActiveTx) -> Result<EpochId> {
        let ActiveTx {
            snapshot,
            writes,
            mut log,
        } = tx;
        let state = &self.state;
        let committed = state.tx_manager.commit(&snapshot, &writes, |epoch| {
            if let Some(wal) = &state.wal {
                log.push(WalRecord::TxCommit {
                    tx_id: snapshot.tx_id,
                    epoch,
                });
                wal.append(&log)?;
            }
            state.store.commit(snapshot.tx_id, epoch, &writes);
            Ok(())
        });
        match committed {
            Ok(epoch) => {
                if !writes.is_empty() {
                    state.after_commit();
                }
                Ok(epoch)
            }
            Err(e) => {
                state.store.rollback(snapshot.tx_id, &writes);
                if let Err(abort) = state.tx_manager.abort(snapshot.tx_id) {
                    tracing::warn!(tx = %snapshot.tx_id, error = %abort, "abort after failed commit");
                }
                Err(e)
            }
        }
    }

    fn discard(&self, tx: &ActiveTx) -> Result<()> {
        self.state.store.rollback(tx.snapshot.tx_id, &tx.writes);
        self.state.tx_manager.abort(tx.snapshot.tx_id)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::debug!(tx = %tx.snapshot.tx_id, "rolling back unfinished transaction");
            if let Err(e) = self.discard(&tx) {
                tracing::warn!(error = %e, "rollback on session drop failed");
            }
        }
    }
}

fn to_properties<'a>(
    properties: impl IntoIterator<Item = (&'a str, Value)>,
) -> Vec<(PropertyKey, Value)> {
    properties
        .into_iter()
        .map(|(k, v)| (PropertyKey::new(k), v))
        .collect()
}

fn invalid(message: &str) -> Error {
    Error::Transaction(TransactionError::InvalidState(message.to_string()))
}
