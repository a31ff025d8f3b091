use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use orchestrator_api::create_app;
use orchestrator_core::{traits::SnapshotSink, AppConfig};
use orchestrator_dispatcher::Orchestrator;
use orchestrator_infrastructure::{HttpWorkerClient, JsonFileSnapshotSink};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info};

/// 主应用程序
pub struct Application {
    config: AppConfig,
    orchestrator: Arc<Orchestrator>,
}

impl Application {
    /// 创建新的应用实例
    pub fn new(config: AppConfig) -> Result<Self> {
        let client = HttpWorkerClient::new(
            Duration::from_secs(config.health.probe_timeout_seconds),
            Duration::from_secs(config.dispatcher.dispatch_timeout_seconds),
            Duration::from_secs(config.dispatcher.task_timeout_seconds.unsigned_abs()),
        )
        .context("创建Worker客户端失败")?;

        let sink = config.snapshot.enabled.then(|| {
            Arc::new(JsonFileSnapshotSink::new(
                config.snapshot.state_file.clone(),
                config.snapshot.results_dir.clone(),
            )) as Arc<dyn SnapshotSink>
        });

        let orchestrator = Orchestrator::new(config.clone(), Arc::new(client), sink)
            .context("初始化编排器失败")?;

        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// 启动所有后台循环和API服务器，直到收到关闭信号
    pub async fn run(&self, shutdown_tx: &broadcast::Sender<()>) -> Result<()> {
        for worker in &self.config.workers {
            info!(
                worker_id = %worker.id,
                "注册Worker: {}:{}",
                worker.host,
                worker.port
            );
        }

        self.orchestrator.start(shutdown_tx).await;

        if self.config.api.enabled {
            self.run_api(shutdown_tx.subscribe()).await?;
        }
        Ok(())
    }

    async fn run_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let app = create_app(Arc::clone(&self.orchestrator));

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;

        info!("API服务器启动在 http://{}", self.config.api.bind_address);

        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            };
            if let Err(e) = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("API服务器运行失败: {}", e);
            }
        });
        Ok(())
    }

    /// 等待后台循环退出
    pub async fn stop(&self) {
        self.orchestrator.stop().await;
    }

    /// 导出最终的任务结果
    pub async fn persist_results(&self) -> Result<(), String> {
        self.orchestrator
            .dump_results()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
