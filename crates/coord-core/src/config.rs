use std::time::Duration;

/// Coordination broker configuration (SPEC_FULL.md §4.2).
///
/// Loaded once from the environment at process start and passed explicitly
/// to every constructor that needs it. No global or lazily-initialized
/// singleton lives anywhere in this crate (§9 "Process-wide state").
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: i64,
    pub key_prefix: String,
    pub message_ttl_days: u32,
    pub presence_timeout_minutes: u32,
    pub timeline_max_size: u64,
    pub notifications_fetch_cap: u32,
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_key_prefix() -> String {
    "coord".to_string()
}

fn default_message_ttl_days() -> u32 {
    30
}

fn default_presence_timeout_minutes() -> u32 {
    5
}

fn default_timeline_max_size() -> u64 {
    1000
}

fn default_notifications_fetch_cap() -> u32 {
    100
}

pub const MAX_NOTIFICATIONS_FETCH_CAP: u32 = 1000;

impl Default for Config {
    fn default() -> Self {
        Config {
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            redis_db: 0,
            key_prefix: default_key_prefix(),
            message_ttl_days: default_message_ttl_days(),
            presence_timeout_minutes: default_presence_timeout_minutes(),
            timeline_max_size: default_timeline_max_size(),
            notifications_fetch_cap: default_notifications_fetch_cap(),
        }
    }
}

impl Config {
    /// Read the environment variables in SPEC_FULL.md §6, falling back to
    /// the documented default for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        if let Ok(v) = std::env::var("REDIS_HOST") {
            cfg.redis_host = v;
        }
        if let Some(v) = std::env::var("REDIS_PORT").ok().and_then(|v| v.parse().ok()) {
            cfg.redis_port = v;
        }
        if let Some(v) = std::env::var("REDIS_DB").ok().and_then(|v| v.parse().ok()) {
            cfg.redis_db = v;
        }
        if let Ok(v) = std::env::var("COORD_KEY_PREFIX") {
            cfg.key_prefix = v;
        }
        if let Some(v) = std::env::var("COORD_MESSAGE_TTL_DAYS").ok().and_then(|v| v.parse().ok()) {
            cfg.message_ttl_days = v;
        }
        if let Some(v) = std::env::var("COORD_PRESENCE_TIMEOUT_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            cfg.presence_timeout_minutes = v;
        }
        if let Some(v) = std::env::var("COORD_TIMELINE_MAX_SIZE").ok().and_then(|v| v.parse().ok()) {
            cfg.timeline_max_size = v;
        }
        cfg
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.redis_host, self.redis_port, self.redis_db)
    }

    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.message_ttl_days) * 24 * 60 * 60)
    }

    pub fn presence_staleness(&self) -> Duration {
        Duration::from_secs(u64::from(self.presence_timeout_minutes) * 60)
    }

    pub fn notifications_cap(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.notifications_fetch_cap)
            .min(MAX_NOTIFICATIONS_FETCH_CAP)
    }

    pub fn message_key(&self, id: &str) -> String {
        format!("{}:msg:{}", self.key_prefix, id)
    }

    pub fn timeline_key(&self) -> String {
        format!("{}:timeline", self.key_prefix)
    }

    pub fn inbox_key(&self, instance: &str) -> String {
        format!("{}:inbox:{}", self.key_prefix, instance)
    }

    pub fn pending_key(&self) -> String {
        format!("{}:pending", self.key_prefix)
    }

    pub fn presence_key(&self) -> String {
        format!("{}:presence", self.key_prefix)
    }

    pub fn notify_queue_key(&self, instance: &str) -> String {
        format!("{}:notify_queue:{}", self.key_prefix, instance)
    }

    pub fn instance_channel(&self, instance: &str) -> String {
        format!("{}:notify:{}", self.key_prefix, instance)
    }

    pub fn broadcast_channel(&self) -> String {
        format!("{}:notify:all", self.key_prefix)
    }
}
