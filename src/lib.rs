use slog::o;
use slog::Drain;
use std::io::Read;
use std::{env, fs};

pub mod analytics;
pub mod error;
pub mod import;
pub mod logging;
pub mod models;
pub mod service;
pub mod store;
pub mod summary;
pub mod utils;

pub use error::{Error, Result};

fn env_or(k: &str, default: &str) -> String {
    env::var(k).unwrap_or_else(|_| default.to_string())
}

lazy_static::lazy_static! {
    pub static ref CONFIG: Config = Config::load();

    // The "base" logger that all crates should branch off of
    pub static ref BASE_LOG: slog::Logger = {
        let level: slog::Level = CONFIG.log_level
                .parse()
                .unwrap_or(slog::Level::Info);
        if CONFIG.log_format == "pretty" {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::CompactFormat::new(decorator).build().fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        } else {
            let drain = slog_json::Json::default(std::io::stderr()).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        }
    };

    // Base logger
    pub static ref LOG: slog::Logger = BASE_LOG.new(slog::o!("app" => "spot-history"));
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub version: String,
    pub host: String,
    pub port: u16,
    pub log_format: String,
    pub log_level: String,
    pub db_url: String,
    pub db_max_connections: u32,
    // wall-clock offset used when deriving year/hour/date fields,
    // falls back to the host's current local offset
    pub utc_offset_minutes: Option<i32>,
    pub import_chunk_size: usize,
    pub stats_cache_seconds: u64,
}
impl Config {
    pub fn load() -> Self {
        let version = fs::File::open("commit_hash.txt")
            .map(|mut f| {
                let mut s = String::new();
                f.read_to_string(&mut s).expect("Error reading commit_hash");
                s.trim().to_string()
            })
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            version,
            host: env_or("HOST", "localhost"),
            port: env_or("PORT", "3030").parse().expect("invalid port"),
            log_format: env_or("LOG_FORMAT", "json")
                .to_lowercase()
                .trim()
                .to_string(),
            log_level: env_or("LOG_LEVEL", "INFO"),
            db_url: env_or("DATABASE_URL", "sqlite://spot-history.db"),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", "5")
                .parse()
                .expect("invalid db_max_connections"),
            utc_offset_minutes: env::var("UTC_OFFSET_MINUTES")
                .ok()
                .map(|s| s.parse().expect("invalid utc_offset_minutes")),
            import_chunk_size: env_or("IMPORT_CHUNK_SIZE", "1000")
                .parse()
                .expect("invalid import_chunk_size"),
            stats_cache_seconds: env_or("STATS_CACHE_SECONDS", "60")
                .parse()
                .expect("invalid stats_cache_seconds"),
        }
    }
    pub fn initialize(&self) -> anyhow::Result<()> {
        slog::info!(
            LOG, "initialized config";
            "version" => &CONFIG.version,
            "host" => &CONFIG.host,
            "port" => &CONFIG.port,
            "log_format" => &CONFIG.log_format,
            "log_level" => &CONFIG.log_level,
            "db_url" => &CONFIG.db_url,
            "utc_offset_minutes" => ?CONFIG.utc_offset_minutes,
            "import_chunk_size" => CONFIG.import_chunk_size,
        );
        Ok(())
    }
    pub fn host(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
    pub fn utc_offset(&self) -> chrono::FixedOffset {
        match self
            .utc_offset_minutes
            .and_then(|m| chrono::FixedOffset::east_opt(m * 60))
        {
            Some(offset) => offset,
            None => *chrono::Local::now().offset(),
        }
    }
}
