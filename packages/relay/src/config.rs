//! Runtime configuration, from command-line flags with environment fallbacks.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use crate::dedup::{
    DedupError, DedupLedger, FileLedger, MemoryLedger, RedisLedger, DEFAULT_CACHE_PATH,
};
use crate::filter::{NotifyPolicy, TradingPosts};
use crate::ledger::{GatewayConfig, QueryBackend, DEFAULT_GATEWAY, REQUEST_TIMEOUT_MS};
use crate::publisher::{WebhookTarget, DEFAULT_WEBHOOK_ENV};
use crate::relay::{RelayConfig, TradingPostSource};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    /// `/tx/{id}` and `/tx/{id}/status`
    Raw,
    /// `/graphql`
    Graphql,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheArg {
    Memory,
    File,
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NotifyOnArg {
    Broadcast,
    Confirmation,
}

#[derive(Parser, Debug, Clone)]
#[command(rename_all = "kebab-case", author, version, about = "Relays Verto swaps to a chat webhook")]
pub struct Config {
    #[arg(env = "LISTEN_ADDR", long, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,

    /// Arweave gateway base URL
    #[arg(env = "ARWEAVE_GATEWAY", long, default_value = DEFAULT_GATEWAY)]
    pub gateway: String,

    #[arg(env = "LEDGER_BACKEND", long, value_enum, default_value_t = BackendArg::Raw)]
    pub backend: BackendArg,

    #[arg(env = "REQUEST_TIMEOUT_MS", long, default_value_t = REQUEST_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// Comma separated trading post addresses; empty uses the live directory
    #[arg(env = "TRADING_POSTS", long, value_delimiter = ',')]
    pub trading_posts: Vec<String>,

    #[arg(env = "DEDUP_CACHE", long, value_enum, default_value_t = CacheArg::Memory)]
    pub cache: CacheArg,

    #[arg(env = "CACHE_PATH", long, default_value = DEFAULT_CACHE_PATH)]
    pub cache_path: PathBuf,

    #[arg(env = "REDIS_URL", long, default_value = DEFAULT_REDIS_URL)]
    pub redis_url: String,

    #[arg(env = "NOTIFY_ON", long, value_enum, default_value_t = NotifyOnArg::Broadcast)]
    pub notify_on: NotifyOnArg,

    /// Environment variable read for the webhook URL on every notification
    #[arg(long, default_value = DEFAULT_WEBHOOK_ENV)]
    pub webhook_env: String,
}

impl Config {
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            backend: match self.backend {
                BackendArg::Raw => QueryBackend::Raw,
                BackendArg::Graphql => QueryBackend::Graphql,
            },
            timeout_ms: self.timeout_ms,
            ..GatewayConfig::with_url(&self.gateway)
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        let posts: Vec<&str> = self
            .trading_posts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();

        RelayConfig {
            policy: match self.notify_on {
                NotifyOnArg::Broadcast => NotifyPolicy::OnBroadcast,
                NotifyOnArg::Confirmation => NotifyPolicy::OnConfirmation,
            },
            trading_posts: if posts.is_empty() {
                TradingPostSource::Directory
            } else {
                TradingPostSource::Fixed(TradingPosts::new(posts))
            },
        }
    }

    pub fn webhook_target(&self) -> WebhookTarget {
        WebhookTarget::Env(self.webhook_env.clone())
    }

    /// Open the configured dedup backend
    pub async fn open_dedup(&self) -> Result<Arc<dyn DedupLedger>, DedupError> {
        Ok(match self.cache {
            CacheArg::Memory => Arc::new(MemoryLedger::new()),
            CacheArg::File => Arc::new(FileLedger::open(&self.cache_path).await?),
            CacheArg::Redis => Arc::new(RedisLedger::connect(&self.redis_url).await?),
        })
    }
}
