use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::models::ModelFamily;
use super::workers::{SnapshotTable, WorkerLoadSnapshot};

/// 注册表写入端：心跳/发现层通过它发布新的快照表。
///
/// 每次写入都复制整张表再整体替换，读取方持有的旧表不受影响。
#[derive(Clone)]
pub struct RegistryFeed {
    table: Arc<watch::Sender<SnapshotTable>>,
}

/// worker 心跳内容
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub worker_id: String,
    pub endpoint: String,
    pub family: ModelFamily,
    pub load: u32,
}

impl RegistryFeed {
    pub(super) fn new(table: Arc<watch::Sender<SnapshotTable>>) -> Self {
        Self { table }
    }

    /// 以完整快照替换（或新增）同 id 的条目
    pub fn apply(&self, snapshot: WorkerLoadSnapshot) {
        self.table.send_modify(|table| {
            let mut next: Vec<WorkerLoadSnapshot> = table
                .iter()
                .filter(|w| w.worker_id != snapshot.worker_id)
                .cloned()
                .collect();
            next.push(snapshot);
            *table = Arc::from(next);
        });
    }

    /// 记录一次心跳，last_seen 取当前时间
    pub fn heartbeat(&self, hb: Heartbeat) -> WorkerLoadSnapshot {
        let snapshot = WorkerLoadSnapshot {
            worker_id: hb.worker_id,
            endpoint: hb.endpoint,
            family: hb.family,
            current_load: hb.load,
            last_seen: Utc::now(),
            pinned: false,
        };
        tracing::debug!(
            worker = %snapshot.worker_id,
            family = %snapshot.family,
            load = snapshot.current_load,
            "worker 心跳"
        );
        self.apply(snapshot.clone());
        snapshot
    }

    /// 清理长期失联的 worker（pinned 条目保留），返回清理数量
    pub fn prune_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let mut pruned = 0;
        self.table.send_if_modified(|table| {
            let next: Vec<WorkerLoadSnapshot> = table
                .iter()
                .filter(|w| w.is_fresh(now, max_age))
                .cloned()
                .collect();
            pruned = table.len() - next.len();
            if pruned == 0 {
                return false;
            }
            *table = Arc::from(next);
            true
        });
        pruned
    }
}
