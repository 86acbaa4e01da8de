// src/main.rs

use axum::serve;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use adx_auction::api::{self, handlers::AppState};
use adx_auction::bidding::category::InMemoryCategoryStore;
use adx_auction::bidding::engine::Exchange;
use adx_auction::bidding::transport::ReqwestTransport;
use adx_auction::config::config_manager::ConfigManager;
use adx_auction::logging::runtime_logger::RuntimeLogger;
use adx_auction::mock_partner;
use adx_auction::model::adapters::{ConfigAdapter, FileConfigAdapter};
use adx_auction::model::partner::demo_catalog;

#[derive(Parser, Debug)]
#[command(author = "whiteCcinn", version = "1.0", about = "An OpenRTB-based real-time bid exchange")]
struct CliArgs {
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
    #[arg(long, default_value = "logs")]
    log_dir: String,
    /// 交易所配置文件（JSON），缺省使用内置默认值
    #[arg(short, long)]
    config: Option<String>,
    #[arg(long, default_value_t = 9001)]
    mock_port: u16,
    /// 演示模式：启动 mock 合作方，并随机生成指向它的合作方目录
    #[arg(long, default_value_t = false)]
    demo: bool,
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "unable to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 设置环境变量 TZ 为东八区
    std::env::set_var("TZ", "Asia/Shanghai");

    let args = CliArgs::parse();

    // 初始化全局 tracing 日志
    let log_file = rolling::hourly(&args.log_dir, "auction_log.json");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);
    let subscriber = Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(non_blocking));
    tracing::subscriber::set_global_default(subscriber)?;
    info!("exchange starting on port {}", args.port);

    // 初始化运行日志记录器（用于记录服务运行状态、竞价汇总等）
    let runtime_logger = RuntimeLogger::new(&args.log_dir, "runtime", 1000, 100, 1000);
    runtime_logger.log("INFO", "exchange is starting...").await;

    // 配置：交易所参数 + 合作方目录 + 类目翻译表
    let base = FileConfigAdapter::new(args.config.as_deref());
    let settings = base.load_exchange_config()?;
    let adapter = base.with_data_files(&settings);
    let config = if args.demo {
        let endpoint = format!("http://127.0.0.1:{}/bid", args.mock_port);
        ConfigManager::new(settings, demo_catalog(&endpoint)?)
    } else {
        ConfigManager::from_adapter(&adapter)?
    };
    let store = InMemoryCategoryStore::new(adapter.load_categories()?);
    let config = Arc::new(config);

    // 定期重新加载合作方目录，进行中的竞价继续使用旧快照
    let reload_secs = config.config.catalog_reload_secs;
    if !args.demo && reload_secs > 0 {
        let config = Arc::clone(&config);
        let adapter = adapter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(reload_secs));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = config.reload_catalog(&adapter) {
                    tracing::warn!(error = %e, "partner catalog reload failed, keeping current catalog");
                }
            }
        });
    }

    let mock_server = args.demo.then(|| {
        let port = args.mock_port;
        tokio::spawn(async move {
            if let Err(e) = mock_partner::start_mock_partner_server(port).await {
                tracing::error!(error = %e, "mock partner server stopped");
            }
        })
    });

    let exchange = Exchange::new(config, Arc::new(ReqwestTransport::new()), Arc::new(store))
        .with_runtime_logger(runtime_logger.clone());
    let state = Arc::new(AppState {
        exchange: Arc::new(exchange),
    });

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr).await?;
    runtime_logger
        .log("INFO", &format!("exchange running at http://{}", addr))
        .await;

    serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    runtime_logger.log("INFO", "exchange shut down.").await;
    runtime_logger.shutdown().await;
    if let Some(mock_server) = mock_server {
        mock_server.abort();
    }
    Ok(())
}
