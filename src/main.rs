use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flux_gateway::{
    AppState,
    cache::{MemoryQuotaStore, MemoryUserStore, QuotaStore, RedisQuotaStore, RedisUserStore, UserStore},
    config::Config,
    gateway::{Gateway, GatewaySettings},
    providers::{ModelCatalog, UpstreamClient, UpstreamSettings},
    routes,
};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// 内存桶清理周期下限
const MIN_PURGE_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env()?;

    // 模型目录
    let catalog = match &config.model_catalog_path {
        Some(path) => ModelCatalog::from_file(Path::new(path))?,
        None => ModelCatalog::default(),
    };
    tracing::info!("Model catalog loaded with {} candidates", catalog.candidates().len());

    let configured: Vec<String> = config.provider_keys.keys().map(|p| p.to_string()).collect();
    if configured.is_empty() {
        tracing::warn!("No provider API keys configured, chat requests will get a configuration notice");
    } else {
        tracing::info!("Providers configured: {}", configured.join(", "));
    }

    // 存储：配置了 Redis 就用 Redis，否则全部放内存
    let memory_quota = Arc::new(MemoryQuotaStore::new());
    let (quota, users): (Arc<dyn QuotaStore>, Arc<dyn UserStore>) = match &config.redis_url {
        Some(url) => {
            let redis = Arc::new(redis::Client::open(url.as_str())?);
            tracing::info!("Using Redis stores");
            let quota: Arc<dyn QuotaStore> = Arc::new(RedisQuotaStore::new(redis.clone()));
            let users: Arc<dyn UserStore> = Arc::new(RedisUserStore::new(redis));
            (quota, users)
        }
        None => {
            tracing::warn!("REDIS_URL not set, quota and history are kept in memory only");
            let quota: Arc<dyn QuotaStore> = memory_quota.clone();
            let users: Arc<dyn UserStore> = Arc::new(MemoryUserStore::new());
            (quota, users)
        }
    };

    let backend = UpstreamClient::new(UpstreamSettings::from_config(&config))?;

    let gateway = Gateway::new(
        GatewaySettings::from_config(&config),
        Arc::new(catalog),
        Arc::new(backend),
        quota,
        users,
        config.maintenance_mode,
    );
    if config.maintenance_mode {
        tracing::warn!("Starting in maintenance mode");
    }

    let state = AppState::new(config, gateway);

    // 定期清理过期的内存配额桶
    let purge_every = (state.config.rate_limit_window() / 4).max(MIN_PURGE_INTERVAL);
    let purge_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_every);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            let removed = memory_quota.purge_expired(now)
                + purge_state.gateway.local_quota().purge_expired(now);
            if removed > 0 {
                tracing::debug!("Purged {} expired quota buckets", removed);
            }
        }
    });

    // 前端单独部署，需要跨域
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = routes::router(state.clone()).layer(cors);

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
