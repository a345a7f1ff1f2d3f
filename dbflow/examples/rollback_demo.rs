//! Builds and runs a rollback pipeline against stub components.
//!
//! Run with `cargo run --example rollback_demo`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dbflow::catalog::{BackupCatalog, BackupSnapshot, BinlogFile};
use dbflow::errors::PreconditionError;
use dbflow::flows::{build_rollback_pipeline, components, RollbackParams, RollbackSource};
use dbflow::prelude::*;
use std::sync::Arc;

#[derive(Debug)]
struct PrintingComponent;

#[async_trait]
impl Component for PrintingComponent {
    async fn execute(&self, payload: &ActPayload, _ctx: &Context) -> ComponentOutcome {
        println!("executing {}", payload.kind());
        ComponentOutcome::ok_empty()
    }
}

struct DemoCatalog;

#[async_trait]
impl BackupCatalog for DemoCatalog {
    async fn latest_backup_before(
        &self,
        cluster_id: u64,
        ts: DateTime<Utc>,
    ) -> Result<Option<BackupSnapshot>, PreconditionError> {
        Ok(Some(BackupSnapshot {
            backup_id: "demo-backup".to_string(),
            cluster_id,
            snapshot_time: ts - chrono::Duration::minutes(10),
            file_list: vec!["full-0001.xbstream".to_string()],
            task_ids: vec!["task-1".to_string()],
        }))
    }

    async fn backup_by_id(
        &self,
        cluster_id: u64,
        backup_id: &str,
    ) -> Result<Option<BackupSnapshot>, PreconditionError> {
        self.latest_backup_before(cluster_id, Utc::now()).await.map(|s| {
            s.map(|mut snapshot| {
                snapshot.backup_id = backup_id.to_string();
                snapshot
            })
        })
    }

    async fn binlogs_in_window(
        &self,
        _cluster_id: u64,
        _host: &str,
        _port: u16,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BinlogFile>, PreconditionError> {
        Ok(vec![BinlogFile {
            file_name: "binlog.000042".to_string(),
            task_id: "task-2".to_string(),
            start_time: start,
            stop_time: end,
        }])
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let params = RollbackParams {
        cluster_id: 7,
        cloud_id: 0,
        master_ip: "10.0.0.1".to_string(),
        master_port: 3306,
        rollback_ip: "10.0.0.9".to_string(),
        backup_dir: "/data/rollback".to_string(),
        pkg_files: vec!["mysql-8.0.tar.gz".to_string()],
        target_time: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
        source: RollbackSource::RemoteAndTime,
    };
    let pipeline = build_rollback_pipeline(&DemoCatalog, &params).await?;

    let registry = Arc::new(ComponentRegistry::new());
    for reference in [
        components::TRANSFER_FILES,
        components::REMOTE_SCRIPT,
        components::BACKUP_DOWNLOADER,
        components::BINLOG_DOWNLOADER,
        components::RESTORE_TOOL,
        components::BINLOG_REPLAYER,
    ] {
        registry.register(ComponentRef::new(reference), Arc::new(PrintingComponent));
    }

    let executor = Executor::new(registry);
    let handle = pipeline.run(&executor, CompletionPolicy::WaitAll)?;
    handle.join().await?;
    println!("rollback pipeline finished");
    Ok(())
}
