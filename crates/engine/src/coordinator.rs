//! Database-wide checkpoint coordination
//!
//! [`CheckpointCoordinator::checkpoint_database`] runs one checkpoint
//! request across every target table:
//!
//! 1. Refuse to run inside an application transaction.
//! 2. Validate the request (targets, names) before touching any table.
//! 3. Begin a snapshot transaction and a metadata journal.
//! 4. Checkpoint each target: the explicit list, every open table, or every
//!    table in metadata when the checkpoint is named or drops checkpoints.
//! 5. Checkpoint the metadata table last, reading uncommitted and outside
//!    the journal.
//! 6. End the journal (commit on success, unroll on failure) and release
//!    the snapshot.
//!
//! A failure stops the request but does not undo checkpoints already
//! written for other tables in the same request.
//!
//! The caller holds the schema lock; the coordinator does not arbitrate
//! between concurrent checkpoints.

use std::sync::Arc;

use pagestore_concurrency::{IsolationLevel, TransactionContext, TransactionManager};
use pagestore_core::{CheckpointConfig, Error, Result};
use pagestore_durability::{BlockManager, JournalResult, MetaJournal, MetadataStore, METADATA_URI};
use tracing::{debug, info, warn};

use crate::registry::TableRegistry;
use crate::session::Session;
use crate::table::TableHandle;
use crate::tree::{validate_request, CheckpointKind, TreeCheckpointer, TreeOutcome};

/// Tables a checkpoint request covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointTargets {
    /// The listed tables, in order, without duplicates
    Explicit(Vec<String>),
    /// Every open table
    OpenTables,
    /// Every table with a metadata entry, open or not
    AllTables,
}

impl CheckpointTargets {
    /// Resolve the targets of a request
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` naming the first target entry that
    /// carries content after its identifier.
    pub fn from_config(config: &CheckpointConfig) -> Result<Self> {
        if config.target.is_empty() {
            return Ok(if config.reaches_closed_tables() {
                CheckpointTargets::AllTables
            } else {
                CheckpointTargets::OpenTables
            });
        }

        let mut uris: Vec<String> = Vec::with_capacity(config.target.len());
        for entry in &config.target {
            if entry.trailing.is_some() {
                return Err(Error::invalid_input(format!(
                    "invalid checkpoint target \"{}\": URIs may require quoting",
                    entry
                )));
            }
            if !uris.contains(&entry.uri) {
                uris.push(entry.uri.clone());
            }
        }
        Ok(CheckpointTargets::Explicit(uris))
    }
}

/// Outcome of one table in a checkpoint request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCheckpoint {
    /// Table identifier
    pub uri: String,
    /// What the executor did
    pub outcome: TreeOutcome,
}

/// Result of a checkpoint request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointSummary {
    /// Per-table outcomes, in processing order
    pub tables: Vec<TableCheckpoint>,
    /// Explicit targets with neither an open handle nor metadata
    pub absent: Vec<String>,
    /// Outcome for the metadata table
    pub metadata: Option<TreeOutcome>,
    /// How the metadata journal settled
    pub journal: JournalResult,
}

impl CheckpointSummary {
    /// Outcome of the first visit to a table
    pub fn outcome(&self, uri: &str) -> Option<&TreeOutcome> {
        self.tables.iter().find(|t| t.uri == uri).map(|t| &t.outcome)
    }

    /// Number of tables that got a new checkpoint, metadata excluded
    pub fn written(&self) -> usize {
        self.tables.iter().filter(|t| t.outcome.is_written()).count()
    }
}

/// Runs database-wide checkpoints
#[derive(Clone)]
pub struct CheckpointCoordinator {
    registry: Arc<TableRegistry>,
    metadata: Arc<dyn MetadataStore>,
    block_manager: Arc<dyn BlockManager>,
    txn_manager: Arc<TransactionManager>,
    executor: TreeCheckpointer,
}

impl CheckpointCoordinator {
    /// Create a coordinator
    pub fn new(
        registry: Arc<TableRegistry>,
        metadata: Arc<dyn MetadataStore>,
        block_manager: Arc<dyn BlockManager>,
        txn_manager: Arc<TransactionManager>,
        executor: TreeCheckpointer,
    ) -> Self {
        CheckpointCoordinator {
            registry,
            metadata,
            block_manager,
            txn_manager,
            executor,
        }
    }

    /// Single-table executor used by this coordinator
    pub fn executor(&self) -> &TreeCheckpointer {
        &self.executor
    }

    /// Checkpoint the database
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput` if the session has a transaction open, or the
    ///   request is malformed; nothing is written in either case
    /// - any table failure, tagged with the table's identifier
    /// - `Error::Internal` if the metadata table is not open
    pub fn checkpoint_database(
        &self,
        session: &mut Session,
        config: &CheckpointConfig,
    ) -> Result<CheckpointSummary> {
        if session.in_transaction() {
            return Err(Error::invalid_input(
                "checkpoint not permitted in a transaction",
            ));
        }

        let targets = CheckpointTargets::from_config(config)?;
        validate_request(config)?;

        let mut txn = session.txn_mut().preserve_isolation();
        let mut snapshot = self.txn_manager.begin_snapshot(&mut txn)?;
        let mut journal = MetaJournal::begin(Arc::clone(&self.block_manager));
        debug!(target: "pagestore::ckpt", txn_id = snapshot.id(), ?targets, "Checkpoint started");

        let result = self
            .checkpoint_targets(&targets, config, &mut snapshot, &mut journal)
            .and_then(|mut summary| {
                summary.metadata = Some(self.checkpoint_metadata(config, &mut snapshot)?);
                Ok(summary)
            });

        let settled = journal.end(result.is_err());
        drop(snapshot);

        let mut summary = match result {
            Ok(summary) => summary,
            Err(e) => {
                warn!(target: "pagestore::ckpt", error = %e, "Checkpoint failed");
                return Err(e);
            }
        };
        summary.journal = settled?;

        info!(
            target: "pagestore::ckpt",
            tables = summary.tables.len(),
            written = summary.written(),
            reclaimed = summary.journal.reclaimed,
            "Checkpoint complete"
        );
        Ok(summary)
    }

    fn checkpoint_targets(
        &self,
        targets: &CheckpointTargets,
        config: &CheckpointConfig,
        txn: &mut TransactionContext,
        journal: &mut MetaJournal,
    ) -> Result<CheckpointSummary> {
        let mut summary = CheckpointSummary::default();

        match targets {
            CheckpointTargets::Explicit(uris) => {
                for uri in uris.iter().filter(|u| u.as_str() != METADATA_URI) {
                    let handle = match self.registry.find(uri) {
                        Some(handle) => handle,
                        None => {
                            if self.metadata.get_checkpoint_list(uri)?.is_none() {
                                debug!(target: "pagestore::ckpt", table = %uri, "Target not found");
                                summary.absent.push(uri.clone());
                                continue;
                            }
                            Arc::new(TableHandle::new(uri.as_str()))
                        }
                    };
                    self.visit(&handle, config, txn, journal, &mut summary)?;
                }
            }
            CheckpointTargets::OpenTables => {
                self.registry.for_each_open(|handle| {
                    if handle.uri() == METADATA_URI {
                        return Ok(());
                    }
                    self.visit(handle, config, txn, journal, &mut summary)
                })?;
            }
            CheckpointTargets::AllTables => {
                for uri in self.metadata.tables()? {
                    if uri == METADATA_URI {
                        continue;
                    }
                    let handle = self
                        .registry
                        .find(&uri)
                        .unwrap_or_else(|| Arc::new(TableHandle::new(uri.as_str())));
                    self.visit(&handle, config, txn, journal, &mut summary)?;
                }
            }
        }

        Ok(summary)
    }

    fn visit(
        &self,
        handle: &TableHandle,
        config: &CheckpointConfig,
        txn: &mut TransactionContext,
        journal: &mut MetaJournal,
        summary: &mut CheckpointSummary,
    ) -> Result<()> {
        let outcome = self
            .executor
            .checkpoint_tree(handle, CheckpointKind::Explicit, Some(config), txn, Some(journal))
            .map_err(|e| e.with_target(handle.uri()))?;
        summary.tables.push(TableCheckpoint {
            uri: handle.uri().to_string(),
            outcome,
        });
        Ok(())
    }

    fn checkpoint_metadata(
        &self,
        config: &CheckpointConfig,
        txn: &mut TransactionContext,
    ) -> Result<TreeOutcome> {
        let meta = self
            .registry
            .find(METADATA_URI)
            .ok_or_else(|| Error::internal("metadata table is not open"))?;

        let mut txn = txn.scoped_isolation(IsolationLevel::ReadUncommitted);
        self.executor
            .checkpoint_tree(&meta, CheckpointKind::Explicit, Some(config), &mut txn, None)
            .map_err(|e| e.with_target(METADATA_URI))
    }
}

impl std::fmt::Debug for CheckpointCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointCoordinator")
            .field("open_tables", &self.registry.len())
            .field("txn_manager", &self.txn_manager)
            .finish_non_exhaustive()
    }
}
