use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use sysmetrics::{Config, MetricsConfig, Platform, Registry, StatusServer};

/// 进程自省指标服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 服务器绑定地址 (默认: ::，支持 IPv4 和 IPv6)
    #[arg(short, long, default_value = "::")]
    address: String,

    /// 服务器端口 (默认: 8080)
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// 进程状态文件路径
    #[arg(short, long, default_value = sysmetrics::stats::DEFAULT_STAT_PATH)]
    stat_path: PathBuf,

    /// 每秒时钟滴答数，不指定时向系统查询
    #[arg(short, long)]
    clock_ticks: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(&args.log_level);

    info!("进程自省指标服务启动中...");

    let mut platform = Platform::detect();
    if let Some(clock_ticks) = args.clock_ticks.filter(|hz| *hz > 0.0) {
        platform.clock_ticks = clock_ticks;
    }
    let metrics_config = MetricsConfig {
        stat_path: args.stat_path,
        platform,
    };
    info!(
        "指标配置 - 状态文件: {}, CLK_TCK: {}, 页大小: {} 字节",
        metrics_config.stat_path.display(),
        metrics_config.platform.clock_ticks,
        metrics_config.platform.page_size
    );

    let registry = Arc::new(Registry::with_defaults(&metrics_config)?);

    let config = Config {
        bind_address: args.address,
        port: args.port,
    };
    let addr = config.address()?;
    info!("服务器将在 {addr} 启动");

    StatusServer::new(registry).run(addr).await?;

    Ok(())
}

/// 初始化日志系统
fn init_logger(level: &str) {
    match env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .try_init()
    {
        Ok(_) => info!("日志系统初始化成功，级别: {level}"),
        Err(e) => eprintln!("日志系统初始化失败: {e}，使用默认设置"),
    }
}
