//! Integration tests for database checkpoints
//!
//! These tests drive `Database` end to end with the in-memory collaborators
//! and check what reaches the cache, the metadata store and the block
//! manager:
//!
//! 1. **Naming** - skip, add, replace and generation naming
//! 2. **Drop clauses** - named and range deletion through a request
//! 3. **Request validation** - failures before any table is touched
//! 4. **Locking** - pinned checkpoints and backups
//! 5. **Journal** - deferred reclamation, commit and unroll
//! 6. **Table lifecycle** - close, drop and closed-table reach
//! 7. **Persistence** - file-backed metadata across reopen
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test checkpoint_tests
//! ```

use std::sync::Arc;

use pagestore_concurrency::{IsolationLevel, TransactionContext};
use pagestore_core::{CheckpointConfig, CheckpointList, Result};
use pagestore_durability::{
    InMemoryMetadata, MemoryPageCache, MetadataStore, SyncMode, TrackingBlockManager,
};
use pagestore_engine::{CheckpointSummary, Database, TreeOutcome, METADATA_URI};
use tempfile::TempDir;

struct Harness {
    db: Arc<Database>,
    cache: Arc<MemoryPageCache>,
    metadata: Arc<InMemoryMetadata>,
    blocks: Arc<TrackingBlockManager>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn harness() -> Harness {
    init_tracing();
    let cache = Arc::new(MemoryPageCache::new());
    let metadata = Arc::new(InMemoryMetadata::new());
    let blocks = Arc::new(TrackingBlockManager::new());
    let db = Database::builder()
        .cache(cache.clone())
        .metadata(metadata.clone())
        .block_manager(blocks.clone())
        .open()
        .expect("Failed to open database");
    Harness {
        db,
        cache,
        metadata,
        blocks,
    }
}

impl Harness {
    /// Create and open a table whose list holds `names`
    fn seed(&self, uri: &str, names: &[&str]) {
        self.db.create_table(uri).unwrap();
        let list = CheckpointList::from_names(names.iter().copied());
        self.metadata
            .set_checkpoint_list(uri, &list, &TransactionContext::default())
            .unwrap();
    }

    fn names(&self, uri: &str) -> Vec<String> {
        self.db
            .checkpoints(uri)
            .unwrap()
            .names()
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn checkpoint(&self, config: &CheckpointConfig) -> Result<CheckpointSummary> {
        let mut session = self.db.open_session();
        self.db.checkpoint(&mut session, config)
    }
}

// ============================================================================
// SECTION 1: Naming
// ============================================================================

mod naming {
    use super::*;

    #[test]
    fn test_clean_table_same_name_is_skipped() {
        let h = harness();
        h.seed("table:a", &["daily"]);

        let summary = h.checkpoint(&CheckpointConfig::new().with_name("daily")).unwrap();

        assert_eq!(summary.outcome("table:a"), Some(&TreeOutcome::Skipped));
        assert!(h.cache.flushes_of("table:a").is_empty());
        assert_eq!(h.names("table:a"), vec!["daily"]);
    }

    #[test]
    fn test_clean_table_new_name_is_added() {
        let h = harness();
        h.seed("table:a", &["daily"]);

        let summary = h.checkpoint(&CheckpointConfig::new().with_name("weekly")).unwrap();

        assert!(summary.outcome("table:a").unwrap().is_written());
        let flushes = h.cache.flushes_of("table:a");
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].mode, SyncMode::Sync);
        assert_eq!(h.names("table:a"), vec!["daily", "weekly"]);
    }

    #[test]
    fn test_modified_table_replaces_same_name() {
        let h = harness();
        h.seed("table:a", &["daily", "weekly"]);
        h.db.write("table:a").unwrap();

        h.checkpoint(&CheckpointConfig::new().with_name("daily")).unwrap();

        assert_eq!(h.names("table:a"), vec!["weekly", "daily"]);
        assert_eq!(h.blocks.freed_names("table:a"), vec!["daily"]);
    }

    #[test]
    fn test_unnamed_checkpoints_roll_generations() {
        let h = harness();
        h.seed("table:a", &[]);

        h.db.write("table:a").unwrap();
        h.checkpoint(&CheckpointConfig::new()).unwrap();
        assert_eq!(h.names("table:a"), vec!["PagestoreCheckpoint.1"]);

        h.db.write("table:a").unwrap();
        h.checkpoint(&CheckpointConfig::new()).unwrap();
        assert_eq!(h.names("table:a"), vec!["PagestoreCheckpoint.2"]);
        assert_eq!(h.blocks.freed_names("table:a"), vec!["PagestoreCheckpoint.1"]);
    }

    #[test]
    fn test_clean_unnamed_checkpoint_is_skipped() {
        let h = harness();
        h.seed("table:a", &["PagestoreCheckpoint.4"]);

        let summary = h.checkpoint(&CheckpointConfig::new()).unwrap();

        assert_eq!(summary.outcome("table:a"), Some(&TreeOutcome::Skipped));
        assert_eq!(h.names("table:a"), vec!["PagestoreCheckpoint.4"]);
    }

    #[test]
    fn test_metadata_table_checkpointed_last() {
        let h = harness();
        h.seed("table:a", &[]);
        h.seed("table:b", &[]);
        h.db.write("table:a").unwrap();
        h.db.write("table:b").unwrap();

        let summary = h.checkpoint(&CheckpointConfig::new()).unwrap();

        assert_eq!(summary.written(), 2);
        assert!(summary.metadata.as_ref().unwrap().is_written());

        let writes = h.metadata.writes();
        let last = writes.last().unwrap();
        assert_eq!(last.uri, METADATA_URI);
        assert_eq!(last.isolation, IsolationLevel::ReadUncommitted);

        let meta = h.db.registry().find(METADATA_URI).unwrap();
        assert!(!meta.is_modified());
    }

    #[test]
    fn test_checkpoint_restores_session_state() {
        let h = harness();
        h.seed("table:a", &[]);
        h.db.write("table:a").unwrap();

        let mut session = h.db.open_session();
        h.db.checkpoint(&mut session, &CheckpointConfig::new()).unwrap();

        assert!(!session.in_transaction());
        assert_eq!(session.txn().isolation(), IsolationLevel::ReadCommitted);
        assert_eq!(h.db.transaction_manager().active_count(), 0);
    }
}

// ============================================================================
// SECTION 2: Drop clauses
// ============================================================================

mod drop_clauses {
    use super::*;

    #[test]
    fn test_drop_from_first_match_through_end() {
        let h = harness();
        h.seed("table:a", &["v0", "v1", "v2", "v3", "v1", "v5"]);
        h.db.write("table:a").unwrap();

        let config = CheckpointConfig::new().with_name("fresh").drop_from("v1");
        let summary = h.checkpoint(&config).unwrap();

        assert_eq!(h.names("table:a"), vec!["v0", "fresh"]);
        assert_eq!(
            h.blocks.freed_names("table:a"),
            vec!["v1", "v2", "v3", "v1", "v5"]
        );
        assert!(summary.journal.committed);
        assert_eq!(summary.journal.reclaimed, 5);
    }

    #[test]
    fn test_drop_to_through_last_match() {
        let h = harness();
        h.seed("table:a", &["v0", "v1", "v2", "v1", "v4"]);
        h.db.write("table:a").unwrap();

        let config = CheckpointConfig::new().with_name("fresh").drop_to("v1");
        h.checkpoint(&config).unwrap();

        assert_eq!(h.names("table:a"), vec!["v4", "fresh"]);
    }

    #[test]
    fn test_drop_reaches_closed_tables() {
        let h = harness();
        h.seed("table:a", &["old", "keep"]);
        h.db.close_table("table:a").unwrap();

        let summary = h.checkpoint(&CheckpointConfig::new().drop_named("old")).unwrap();

        assert!(summary.outcome("table:a").unwrap().is_written());
        assert_eq!(h.names("table:a"), vec!["keep", "PagestoreCheckpoint.1"]);
    }
}

// ============================================================================
// SECTION 3: Request validation
// ============================================================================

mod validation {
    use super::*;

    #[test]
    fn test_malformed_target_fails_before_any_flush() {
        let h = harness();
        h.seed("table:a", &[]);
        h.db.write("table:a").unwrap();

        let config = CheckpointConfig::parse("target=(\"table:a\",table:b=c)").unwrap();
        let err = h.checkpoint(&config).unwrap_err();

        assert!(err.is_invalid_input());
        assert!(err.to_string().contains("table:b=c"));
        assert!(h.cache.flushes().is_empty());
        assert!(h.db.registry().find("table:a").unwrap().is_modified());
    }

    #[test]
    fn test_reserved_name_rejected() {
        let h = harness();
        h.seed("table:a", &[]);

        let err = h
            .checkpoint(&CheckpointConfig::new().with_name("PagestoreCheckpoint.7"))
            .unwrap_err();

        assert!(err.is_invalid_input());
        assert!(h.cache.flushes().is_empty());
    }

    #[test]
    fn test_reserved_drop_name_rejected() {
        let h = harness();
        h.seed("table:a", &[]);

        let err = h
            .checkpoint(&CheckpointConfig::new().drop_named("PagestoreCheckpoint"))
            .unwrap_err();

        assert!(err.is_invalid_input());
        assert_eq!(h.metadata.writes().len(), 1);
    }

    #[test]
    fn test_checkpoint_inside_transaction_is_refused() {
        let h = harness();
        h.seed("table:a", &[]);
        h.db.write("table:a").unwrap();

        let mut session = h.db.open_session();
        h.db.begin_transaction(&mut session).unwrap();

        let err = h
            .db
            .checkpoint(&mut session, &CheckpointConfig::new())
            .unwrap_err();
        assert!(err.is_invalid_input());
        assert!(err.to_string().contains("not permitted in a transaction"));
        assert!(session.in_transaction());
        assert!(h.cache.flushes().is_empty());

        h.db.end_transaction(&mut session);
        assert!(h.db.checkpoint(&mut session, &CheckpointConfig::new()).is_ok());
    }

    #[test]
    fn test_explicit_target_without_metadata_is_reported_absent() {
        let h = harness();
        h.seed("table:a", &[]);
        h.db.write("table:a").unwrap();

        let config = CheckpointConfig::new()
            .with_target("table:a")
            .with_target("table:missing");
        let summary = h.checkpoint(&config).unwrap();

        assert!(summary.outcome("table:a").unwrap().is_written());
        assert_eq!(summary.absent, vec!["table:missing".to_string()]);
    }
}

// ============================================================================
// SECTION 4: Locking
// ============================================================================

mod locking {
    use super::*;

    #[test]
    fn test_pinned_named_checkpoint_is_busy() {
        let h = harness();
        h.seed("table:a", &["daily"]);
        h.db.write("table:a").unwrap();

        let cursor = h.db.open_checkpoint("table:a", "daily").unwrap();
        assert_eq!(cursor.name(), "daily");
        assert!(h.db.locks().is_pinned("table:a", "daily"));

        let err = h
            .checkpoint(&CheckpointConfig::new().with_name("daily"))
            .unwrap_err();
        assert!(err.is_busy());
        assert!(err.to_string().contains("cannot be dropped when in use"));
        assert_eq!(h.names("table:a"), vec!["daily"]);
        assert!(h.cache.flushes_of("table:a").is_empty());

        drop(cursor);
        assert!(!h.db.locks().is_pinned("table:a", "daily"));
        assert!(h.db.registry().find_checkpoint("table:a", "daily").is_none());

        let summary = h.checkpoint(&CheckpointConfig::new().with_name("daily")).unwrap();
        assert_eq!(
            summary.outcome("table:a"),
            Some(&TreeOutcome::Written {
                name: "daily".to_string(),
                dropped: vec!["daily".to_string()],
                kept: vec![],
            })
        );
    }

    #[test]
    fn test_pinned_internal_checkpoint_is_kept() {
        let h = harness();
        h.seed("table:a", &["PagestoreCheckpoint.1"]);
        h.db.write("table:a").unwrap();

        let _cursor = h.db.open_checkpoint("table:a", "PagestoreCheckpoint").unwrap();

        let summary = h.checkpoint(&CheckpointConfig::new()).unwrap();
        assert_eq!(
            summary.outcome("table:a"),
            Some(&TreeOutcome::Written {
                name: "PagestoreCheckpoint.2".to_string(),
                dropped: vec![],
                kept: vec!["PagestoreCheckpoint.1".to_string()],
            })
        );
        assert_eq!(
            h.names("table:a"),
            vec!["PagestoreCheckpoint.1", "PagestoreCheckpoint.2"]
        );
    }

    #[test]
    fn test_backup_keeps_internal_checkpoints() {
        let h = harness();
        h.seed("table:a", &["PagestoreCheckpoint.1"]);

        let backup = h.db.begin_backup();
        assert!(h.db.is_backup_active());

        let config = CheckpointConfig::new().with_name("daily").drop_from("all");
        let summary = h.checkpoint(&config).unwrap();

        assert_eq!(
            summary.outcome("table:a"),
            Some(&TreeOutcome::Written {
                name: "daily".to_string(),
                dropped: vec![],
                kept: vec!["PagestoreCheckpoint.1".to_string()],
            })
        );
        assert_eq!(h.names("table:a"), vec!["PagestoreCheckpoint.1", "daily"]);
        assert!(h.blocks.freed_names("table:a").is_empty());
        drop(backup);
    }

    #[test]
    fn test_backup_refuses_named_drop() {
        let h = harness();
        h.seed("table:a", &["daily"]);
        h.db.write("table:a").unwrap();

        let _backup = h.db.begin_backup();
        let err = h
            .checkpoint(&CheckpointConfig::new().with_name("daily"))
            .unwrap_err();

        assert!(err.is_busy());
        assert!(err.to_string().contains("backup cursors are open"));
        assert_eq!(h.names("table:a"), vec!["daily"]);
    }

    #[test]
    fn test_locks_released_after_checkpoint() {
        let h = harness();
        h.seed("table:a", &["old"]);
        h.db.write("table:a").unwrap();

        let summary = h.checkpoint(&CheckpointConfig::new().drop_named("old")).unwrap();

        assert_eq!(summary.journal.locks_released, 1);
        assert!(h.db.locks().is_empty());
    }

    #[test]
    fn test_open_missing_checkpoint_not_found() {
        let h = harness();
        h.seed("table:a", &["daily"]);

        assert!(h.db.open_checkpoint("table:a", "weekly").unwrap_err().is_not_found());
        assert!(h.db.open_checkpoint("table:nope", "daily").unwrap_err().is_not_found());
        assert!(h.db.locks().is_empty());
    }
}

// ============================================================================
// SECTION 5: Journal
// ============================================================================

mod journal {
    use super::*;

    #[test]
    fn test_failure_unrolls_deferred_reclamation() {
        let h = harness();
        h.seed("table:a", &["PagestoreCheckpoint.1"]);
        h.seed("table:b", &["PagestoreCheckpoint.1"]);
        h.db.write("table:a").unwrap();
        h.db.write("table:b").unwrap();
        h.cache.fail_next_flush("table:b");

        let err = h.checkpoint(&CheckpointConfig::new()).unwrap_err();
        assert!(err.to_string().starts_with("table:b"));

        // Earlier tables keep their new checkpoint; nothing is freed
        assert_eq!(h.names("table:a"), vec!["PagestoreCheckpoint.2"]);
        assert_eq!(h.names("table:b"), vec!["PagestoreCheckpoint.1"]);
        assert!(h.blocks.freed().is_empty());
        assert!(h.db.registry().find("table:b").unwrap().is_modified());
        assert!(h.db.locks().is_empty());
    }

    #[test]
    fn test_retry_after_failure_commits() {
        let h = harness();
        h.seed("table:a", &["PagestoreCheckpoint.1"]);
        h.seed("table:b", &["PagestoreCheckpoint.1"]);
        h.db.write("table:a").unwrap();
        h.db.write("table:b").unwrap();
        h.cache.fail_next_flush("table:b");
        assert!(h.checkpoint(&CheckpointConfig::new()).is_err());

        let summary = h.checkpoint(&CheckpointConfig::new()).unwrap();

        assert_eq!(summary.outcome("table:a"), Some(&TreeOutcome::Skipped));
        assert!(summary.outcome("table:b").unwrap().is_written());
        assert!(summary.journal.committed);
        assert_eq!(h.blocks.freed_names("table:b"), vec!["PagestoreCheckpoint.1"]);
        assert!(h.blocks.freed_names("table:a").is_empty());
    }

    #[test]
    fn test_reclamation_waits_for_metadata_checkpoint() {
        let h = harness();
        h.seed("table:a", &["PagestoreCheckpoint.1"]);
        h.db.write("table:a").unwrap();
        h.metadata.fail_next_write(METADATA_URI);

        let err = h.checkpoint(&CheckpointConfig::new()).unwrap_err();

        assert!(err.to_string().starts_with(METADATA_URI));
        assert_eq!(h.names("table:a"), vec!["PagestoreCheckpoint.2"]);
        assert!(h.blocks.freed_names("table:a").is_empty());
    }

    #[test]
    fn test_failed_list_write_is_retried() {
        let h = harness();
        h.seed("table:a", &["PagestoreCheckpoint.1"]);
        h.db.write("table:a").unwrap();
        h.metadata.fail_next_write("table:a");

        let err = h.checkpoint(&CheckpointConfig::new()).unwrap_err();
        assert!(err.to_string().starts_with("table:a"));
        assert_eq!(h.names("table:a"), vec!["PagestoreCheckpoint.1"]);
        assert!(h.db.registry().find("table:a").unwrap().is_modified());

        let summary = h.checkpoint(&CheckpointConfig::new()).unwrap();

        assert!(summary.outcome("table:a").unwrap().is_written());
        assert_eq!(h.names("table:a"), vec!["PagestoreCheckpoint.2"]);
        assert_eq!(h.blocks.freed_names("table:a"), vec!["PagestoreCheckpoint.1"]);
    }
}

// ============================================================================
// SECTION 6: Table lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn test_close_modified_table_writes_and_discards() {
        let h = harness();
        h.seed("table:a", &[]);
        h.db.write("table:a").unwrap();

        let outcome = h.db.close_table("table:a").unwrap();

        assert!(outcome.is_written());
        let flush = h.cache.flushes_of("table:a").pop().unwrap();
        assert_eq!(flush.mode, SyncMode::SyncDiscard);
        assert_eq!(flush.isolation, IsolationLevel::ReadUncommitted);
        assert!(!h.cache.is_cached("table:a"));
        assert!(!h.db.registry().is_open("table:a"));
        assert_eq!(h.names("table:a"), vec!["PagestoreCheckpoint.1"]);

        assert!(h.db.close_table("table:a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_close_clean_table_discards() {
        let h = harness();
        h.seed("table:a", &["daily"]);

        let outcome = h.db.close_table("table:a").unwrap();

        assert_eq!(outcome, TreeOutcome::Discarded);
        assert_eq!(h.cache.write_count(), 0);
        assert_eq!(h.names("table:a"), vec!["daily"]);
    }

    #[test]
    fn test_failed_close_keeps_handle_open() {
        let h = harness();
        h.seed("table:a", &[]);
        h.db.write("table:a").unwrap();
        h.cache.fail_next_flush("table:a");

        assert!(h.db.close_table("table:a").is_err());
        let handle = h.db.registry().find("table:a").unwrap();
        assert!(handle.is_modified());
    }

    #[test]
    fn test_metadata_table_cannot_be_closed() {
        let h = harness();
        assert!(h.db.close_table(METADATA_URI).unwrap_err().is_invalid_input());
        assert!(h.db.drop_table(METADATA_URI).unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_dropped_table_is_discarded() {
        let h = harness();
        h.seed("table:a", &[]);
        h.db.write("table:a").unwrap();
        h.db.drop_table("table:a").unwrap();

        let summary = h.checkpoint(&CheckpointConfig::new()).unwrap();

        assert_eq!(summary.outcome("table:a"), Some(&TreeOutcome::Discarded));
        let flush = h.cache.flushes_of("table:a").pop().unwrap();
        assert_eq!(flush.mode, SyncMode::DiscardNoWrite);
    }

    #[test]
    fn test_named_checkpoint_reaches_closed_tables() {
        let h = harness();
        h.seed("table:a", &[]);
        h.seed("table:b", &[]);
        h.db.close_table("table:a").unwrap();

        let unnamed = h.checkpoint(&CheckpointConfig::new()).unwrap();
        assert!(unnamed.outcome("table:a").is_none());
        assert!(unnamed.outcome("table:b").is_some());

        let named = h.checkpoint(&CheckpointConfig::new().with_name("daily")).unwrap();
        assert!(named.outcome("table:a").unwrap().is_written());
        assert_eq!(h.names("table:a"), vec!["daily"]);
        assert!(!h.db.registry().is_open("table:a"));
    }

    #[test]
    fn test_explicit_target_reaches_closed_table() {
        let h = harness();
        h.seed("table:a", &[]);
        h.db.close_table("table:a").unwrap();

        let summary = h
            .checkpoint(&CheckpointConfig::new().with_target("table:a"))
            .unwrap();

        assert!(summary.outcome("table:a").unwrap().is_written());
        assert!(summary.absent.is_empty());
    }
}

// ============================================================================
// SECTION 7: Persistence
// ============================================================================

mod persistence {
    use super::*;

    #[test]
    fn test_checkpoints_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("db");

        {
            let db = Database::open(&db_path).expect("Failed to open database");
            db.create_table("table:orders").unwrap();
            db.write("table:orders").unwrap();
            let mut session = db.open_session();
            db.checkpoint(&mut session, &CheckpointConfig::new().with_name("daily"))
                .unwrap();
        }

        let db = Database::open(&db_path).expect("Failed to reopen database");
        assert_eq!(db.checkpoints("table:orders").unwrap().names(), vec!["daily"]);
        assert!(!db.checkpoints(METADATA_URI).unwrap().is_empty());

        db.open_table("table:orders").unwrap();
        let cursor = db.open_checkpoint("table:orders", "daily").unwrap();
        assert_eq!(cursor.checkpoint().order, 1);
    }

    #[test]
    fn test_config_file_drives_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("checkpoint.toml");
        std::fs::write(
            &config_path,
            "name = \"weekly\"\ntarget = [\"table:a\"]\n",
        )
        .unwrap();

        let h = harness();
        h.seed("table:a", &["daily"]);
        h.seed("table:b", &[]);

        let config = CheckpointConfig::from_file(&config_path).unwrap();
        let summary = h.checkpoint(&config).unwrap();

        assert!(summary.outcome("table:a").unwrap().is_written());
        assert!(summary.outcome("table:b").is_none());
        assert_eq!(h.names("table:a"), vec!["daily", "weekly"]);
    }
}
