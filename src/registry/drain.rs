//! 延迟关闭
//!
//! 每轮重载替换下来的旧连接池作为一个批次，由各自的定时器在宽限期后关闭。
//! 批次只会被自己的定时器或注册表关闭移除。

use parking_lot::Mutex;
use rat_logger::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::pool::Pool;

type Batches = Arc<Mutex<HashMap<u64, Vec<Arc<Pool>>>>>;
type Timers = Arc<Mutex<HashMap<u64, JoinHandle<()>>>>;

/// 待关闭连接池集合
#[derive(Debug, Default)]
pub(crate) struct PendingCloseSet {
    next_batch: AtomicU64,
    batches: Batches,
    timers: Timers,
}

impl PendingCloseSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 登记一个批次，宽限期后关闭，返回批次号
    pub(crate) fn schedule(&self, pools: Vec<Arc<Pool>>, grace: Duration) -> u64 {
        let batch_id = self.next_batch.fetch_add(1, Ordering::SeqCst);
        let size = pools.len();
        self.batches.lock().insert(batch_id, pools);

        let batches = self.batches.clone();
        let timers = self.timers.clone();

        // 持锁登记句柄，定时器结束时的移除一定发生在登记之后
        let mut guard = self.timers.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let batch = batches.lock().remove(&batch_id);
            timers.lock().remove(&batch_id);

            if let Some(pools) = batch {
                for pool in &pools {
                    pool.close().await;
                }
                info!("批次 {} 的 {} 个旧连接池已关闭", batch_id, pools.len());
            }
        });
        guard.insert(batch_id, handle);
        drop(guard);

        debug!("批次 {} 登记 {} 个旧连接池，{:?} 后关闭", batch_id, size, grace);
        batch_id
    }

    /// 尚未关闭的旧连接池数量
    pub(crate) fn pending_pools(&self) -> usize {
        self.batches.lock().values().map(Vec::len).sum()
    }

    /// 尚未到期的批次数量
    pub(crate) fn pending_batches(&self) -> usize {
        self.batches.lock().len()
    }

    /// 取消所有定时器并立即关闭全部批次，返回关闭的连接池数量
    pub(crate) async fn close_all(&self) -> usize {
        let timers: Vec<JoinHandle<()>> = self.timers.lock().drain().map(|(_, h)| h).collect();
        for timer in &timers {
            timer.abort();
        }

        let batches: Vec<Vec<Arc<Pool>>> =
            self.batches.lock().drain().map(|(_, pools)| pools).collect();
        let mut closed = 0;
        for pool in batches.into_iter().flatten() {
            pool.close().await;
            closed += 1;
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSnapshot, PoolTuning, keys};
    use crate::pool::{MemoryConnector, PoolBuilder};
    use crate::resolver::{PlainTextDecryptor, resolve};

    async fn pool() -> Arc<Pool> {
        let snapshot = ConfigSnapshot::builder()
            .set(keys::MONGO_SERVERS, "mongodb://h1")
            .build();
        let target = resolve(&snapshot, "app", &PlainTextDecryptor).unwrap();
        let builder = PoolBuilder::new(Arc::new(MemoryConnector::new()));
        Arc::new(builder.build(target, None, &PoolTuning::default()).await.unwrap())
    }

    #[tokio::test]
    async fn test_batch_closes_after_grace() {
        let set = PendingCloseSet::new();
        let old = pool().await;
        set.schedule(vec![old.clone()], Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!old.is_closed());
        assert_eq!(set.pending_pools(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(old.is_closed());
        assert_eq!(set.pending_batches(), 0);
        assert!(set.timers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_batches_keep_their_own_timer() {
        let set = PendingCloseSet::new();
        let first = pool().await;
        let second = pool().await;
        set.schedule(vec![first.clone()], Duration::from_millis(50));
        set.schedule(vec![second.clone()], Duration::from_millis(400));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(set.pending_batches(), 1);
    }

    #[tokio::test]
    async fn test_close_all_cancels_timers() {
        let set = PendingCloseSet::new();
        let old = pool().await;
        set.schedule(vec![old.clone()], Duration::from_secs(30));
        assert_eq!(set.close_all().await, 1);
        assert!(old.is_closed());
        assert_eq!(set.pending_pools(), 0);
        assert!(set.timers.lock().is_empty());
    }
}
