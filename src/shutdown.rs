use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// 优雅关闭管理器
///
/// 关闭流程：
/// 1. 向所有后台循环广播关闭信号
/// 2. 等待循环退出（带超时）
/// 3. 导出最终的任务结果（带超时）
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    is_shutdown: Arc<RwLock<bool>>,
    wait_timeout: Duration,
    persist_timeout: Duration,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::with_timeouts(Duration::from_secs(30), Duration::from_secs(10))
    }

    pub fn with_timeouts(wait_timeout: Duration, persist_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            is_shutdown: Arc::new(RwLock::new(false)),
            wait_timeout,
            persist_timeout,
        }
    }

    pub fn sender(&self) -> &broadcast::Sender<()> {
        &self.shutdown_tx
    }

    /// 订阅关闭信号；已经关闭时返回立即触发的接收器
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        if *self.is_shutdown.read().await {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            return rx;
        }
        self.shutdown_tx.subscribe()
    }

    pub async fn is_shutdown(&self) -> bool {
        *self.is_shutdown.read().await
    }

    /// 触发关闭，重复调用无效果
    pub async fn shutdown(&self) {
        let mut is_shutdown = self.is_shutdown.write().await;
        if *is_shutdown {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        *is_shutdown = true;

        debug!(
            "发送关闭信号给 {} 个订阅者",
            self.shutdown_tx.receiver_count()
        );
        // 没有接收者时发送失败，可以忽略
        let _ = self.shutdown_tx.send(());
        info!("关闭信号已发送");
    }

    /// 执行完整的关闭流程
    pub async fn graceful_shutdown<W, P>(&self, wait_for_loops: W, persist_results: P)
    where
        W: Future<Output = ()>,
        P: Future<Output = Result<(), String>>,
    {
        self.shutdown().await;

        info!("等待后台循环退出（超时: {:?}）", self.wait_timeout);
        if timeout(self.wait_timeout, wait_for_loops).await.is_err() {
            warn!("等待后台循环退出超时，继续关闭流程");
        }

        match timeout(self.persist_timeout, persist_results).await {
            Ok(Ok(())) => info!("最终任务结果已导出"),
            Ok(Err(e)) => error!("导出最终任务结果失败: {}", e),
            Err(_) => error!("导出最终任务结果超时"),
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
