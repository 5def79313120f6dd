use clap::{Arg, Command};
use energy_dash::{init_logger, DashboardConfig, DashboardOrchestrator, InMemoryConfigStore};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载环境变量
    dotenv::dotenv().ok();

    // 解析命令行参数
    let matches = Command::new("energy-dash")
        .version(env!("CARGO_PKG_VERSION"))
        .about("能源市场实时看板数据同步核心")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径（YAML），缺省时使用内置默认值"),
        )
        .arg(
            Arg::new("stream-url")
                .long("stream-url")
                .value_name("URL")
                .help("推送流地址，http(s)为SSE，ws(s)为WebSocket"),
        )
        .arg(
            Arg::new("poll-url")
                .long("poll-url")
                .value_name("URL")
                .help("定时轮询的数据接口"),
        )
        .arg(
            Arg::new("user")
                .short('u')
                .long("user")
                .value_name("KEY")
                .default_value("default")
                .help("布局存储使用的用户标识"),
        )
        .get_matches();

    // 配置优先级: 命令行 > 环境变量 > 配置文件 > 默认值
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => DashboardConfig::from_file(path)?,
        None => DashboardConfig::default(),
    };
    config.apply_env()?;
    if let Some(url) = matches.get_one::<String>("stream-url") {
        config.stream.url = url.clone();
    }
    if let Some(url) = matches.get_one::<String>("poll-url") {
        config.sync.url = url.clone();
    }
    config.validate()?;

    init_logger(&config.logging)?;

    let user = matches
        .get_one::<String>("user")
        .cloned()
        .unwrap_or_else(|| "default".to_string());
    log::info!(
        "启动看板 用户: {}, 推送流: {}, 轮询: {} (间隔 {} 秒)",
        user,
        config.stream.url,
        config.sync.url,
        config.sync.interval().as_secs()
    );

    let store = Arc::new(InMemoryConfigStore::new());
    let mut orchestrator = DashboardOrchestrator::from_config(&config, user, store)?;
    orchestrator.start().await;
    log::info!("📊 {}", orchestrator.view().status_line());

    let mut changes = orchestrator.changes();
    let mut resume_check =
        tokio::time::interval(config.resume_stale_after().max(Duration::from_secs(1)));
    resume_check.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("收到停止信号，正在关闭看板...");
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                log::info!("📊 {}", orchestrator.view().status_line());
            }
            _ = resume_check.tick() => {
                let report = orchestrator.on_resume().await;
                if report.resynced || report.reconnected {
                    log::info!("🔄 定期检查: 重新同步={}, 重新连接={}", report.resynced, report.reconnected);
                }
            }
        }
    }

    orchestrator.shutdown().await;
    log::info!("✅ 看板已关闭");
    Ok(())
}
