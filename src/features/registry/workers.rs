use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::models::ModelFamily;
use crate::config::RegistryConfig;
use crate::error::DispatchError;

/// 单个 worker 的负载快照（由外部发现/心跳写入，核心只读）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerLoadSnapshot {
    pub worker_id: String,
    /// worker 基地址，例如 http://10.0.0.3:5002
    pub endpoint: String,
    pub family: ModelFamily,
    pub current_load: u32,
    pub last_seen: DateTime<Utc>,
    /// 静态配置的 worker 不参与新鲜度判断
    #[serde(default)]
    pub pinned: bool,
}

impl WorkerLoadSnapshot {
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        if self.pinned {
            return true;
        }
        match now.signed_duration_since(self.last_seen).to_std() {
            Ok(age) => age <= window,
            // last_seen 晚于 now（时钟漂移），按新鲜处理
            Err(_) => true,
        }
    }
}

pub(crate) type SnapshotTable = Arc<[WorkerLoadSnapshot]>;

/// worker 注册表的只读视图。
///
/// 快照表整体以 `Arc<[_]>` 发布，写入方（[`super::feed::RegistryFeed`]）每次更新都会构造新表并原子替换，
/// 读取方只克隆 `Arc`，从不原地修改。
#[derive(Clone)]
pub struct WorkerRegistry {
    table: Arc<watch::Sender<SnapshotTable>>,
    freshness: Duration,
}

impl WorkerRegistry {
    pub fn new(freshness: Duration) -> (Self, super::feed::RegistryFeed) {
        let empty: SnapshotTable = Arc::from(Vec::new());
        let (tx, _rx) = watch::channel(empty);
        let table = Arc::new(tx);
        let registry = Self {
            table: table.clone(),
            freshness,
        };
        (registry, super::feed::RegistryFeed::new(table))
    }

    /// 按配置构建，并预置静态 worker
    pub fn from_config(cfg: &RegistryConfig) -> (Self, super::feed::RegistryFeed) {
        let (registry, feed) = Self::new(cfg.freshness());
        let now = Utc::now();
        for w in &cfg.static_workers {
            feed.apply(WorkerLoadSnapshot {
                worker_id: w.id.clone(),
                endpoint: w.endpoint.clone(),
                family: w.family,
                current_load: w.load,
                last_seen: now,
                pinned: true,
            });
        }
        (registry, feed)
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// 当前快照表（廉价克隆）
    pub fn snapshot(&self) -> SnapshotTable {
        self.table.borrow().clone()
    }

    /// 选出指定 family 下负载最低的新鲜 worker
    pub fn select_worker(&self, family: ModelFamily) -> Result<WorkerLoadSnapshot, DispatchError> {
        self.select_worker_at(family, Utc::now())
    }

    pub fn select_worker_at(
        &self,
        family: ModelFamily,
        now: DateTime<Utc>,
    ) -> Result<WorkerLoadSnapshot, DispatchError> {
        let table = self.snapshot();
        least_busy(&table, family, now, self.freshness)
            .cloned()
            .ok_or(DispatchError::NoWorkerAvailable { family })
    }
}

/// 负载最小者胜出，负载相同按 worker_id 升序，保证结果确定
pub(crate) fn least_busy(
    table: &[WorkerLoadSnapshot],
    family: ModelFamily,
    now: DateTime<Utc>,
    freshness: Duration,
) -> Option<&WorkerLoadSnapshot> {
    table
        .iter()
        .filter(|w| w.family == family && w.is_fresh(now, freshness))
        .min_by(|a, b| {
            a.current_load
                .cmp(&b.current_load)
                .then_with(|| a.worker_id.cmp(&b.worker_id))
        })
}
