use broker::connection::ws::WsSettings;
use broker::fanout::backoff::Backoff;
use broker::manager::BrokerSettings;
use broker::registry::BackpressurePolicy;
use broker::ticket::TicketSettings;
use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Header an upstream gateway sets to the authenticated user's id.
pub const DEFAULT_IDENTITY_HEADER: &str = "x-user-id";

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

/// Where the fan-out exchange and ticket store live.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StoreBackend {
    /// Shared Redis server; required when more than one instance runs.
    Redis,
    /// In-process only. Useful for local development and tests.
    Memory,
}

#[derive(Debug, PartialEq, Eq)]
pub struct StoreBackendParseError;

impl FromStr for StoreBackend {
    type Err = StoreBackendParseError;
    fn from_str(backend: &str) -> Result<StoreBackend, Self::Err> {
        match backend.to_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(StoreBackendParseError),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreBackend::Redis => write!(f, "redis"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,

    /// Backend for the fan-out exchange and the ticket store.
    #[arg(
        long,
        env,
        default_value_t = StoreBackend::Redis,
        value_parser = clap::builder::PossibleValuesParser::new(["redis", "memory"])
            .map(|s| s.parse::<StoreBackend>().unwrap()),
    )]
    pub store_backend: StoreBackend,

    /// Sets the Redis URL used for the fan-out exchange and ticket store
    #[arg(long, env, default_value = "redis://127.0.0.1:6379")]
    redis_url: Option<String>,

    /// Namespace prepended to every ticket key
    #[arg(long, env, default_value = "shopping-list")]
    pub redis_prefix: String,

    /// Pub/sub channel every instance publishes events to and consumes them from
    #[arg(long, env, default_value = "sse-events")]
    pub fanout_channel: String,

    /// Seconds a stream ticket stays redeemable
    #[arg(long, env, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub ticket_ttl_secs: u64,

    /// Delete a ticket once it has been redeemed
    #[arg(long, env, default_value_t = true, action = clap::ArgAction::Set)]
    pub ticket_single_use: bool,

    /// Bound on each session's outbound queue
    #[arg(long, env, default_value_t = broker::manager::DEFAULT_SESSION_QUEUE_CAPACITY)]
    pub session_queue_capacity: usize,

    /// What to do with a session whose outbound queue is full
    #[arg(
        long,
        env,
        default_value_t = BackpressurePolicy::Drop,
        value_parser = clap::builder::PossibleValuesParser::new(["drop", "close"])
            .map(|s| s.parse::<BackpressurePolicy>().unwrap()),
    )]
    pub backpressure_policy: BackpressurePolicy,

    /// Seconds allowed for a single WebSocket write
    #[arg(long, env, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub ws_write_wait_secs: u64,

    /// Seconds a WebSocket may go without a pong before it is closed
    #[arg(long, env, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub ws_pong_wait_secs: u64,

    /// Largest inbound WebSocket message accepted, in bytes
    #[arg(long, env, default_value_t = 512)]
    pub ws_max_message_size: usize,

    /// Seconds between SSE keep-alive comments
    #[arg(long, env, default_value_t = 15, value_parser = clap::value_parser!(u64).range(1..))]
    pub sse_keepalive_secs: u64,

    /// First delay in milliseconds before resubscribing to the fan-out exchange
    #[arg(long, env, default_value_t = 1000)]
    pub fanout_reconnect_base_ms: u64,

    /// Ceiling in milliseconds on the resubscribe delay
    #[arg(long, env, default_value_t = 30000)]
    pub fanout_reconnect_max_ms: u64,

    /// Give up resubscribing after this many consecutive failures. Unset retries forever.
    #[arg(long, env)]
    pub fanout_reconnect_max_attempts: Option<u32>,

    /// Request header carrying the identity verified by the upstream gateway
    #[arg(long, env, default_value = DEFAULT_IDENTITY_HEADER)]
    pub identity_header: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url.as_deref()
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }

    pub fn sse_keepalive(&self) -> Duration {
        Duration::from_secs(self.sse_keepalive_secs)
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            session_queue_capacity: self.session_queue_capacity,
            backpressure: self.backpressure_policy,
            backoff: Backoff::new(
                Duration::from_millis(self.fanout_reconnect_base_ms),
                Duration::from_millis(self.fanout_reconnect_max_ms),
            )
            .with_max_attempts(self.fanout_reconnect_max_attempts),
        }
    }

    pub fn ticket_settings(&self) -> TicketSettings {
        TicketSettings {
            key_prefix: self.redis_prefix.clone(),
            ttl: Duration::from_secs(self.ticket_ttl_secs),
            single_use: self.ticket_single_use,
        }
    }

    pub fn ws_settings(&self) -> WsSettings {
        WsSettings::new(
            Duration::from_secs(self.ws_write_wait_secs),
            Duration::from_secs(self.ws_pong_wait_secs),
            self.ws_max_message_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::parse_from(std::iter::once("shopping_list_rs").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = parse(&[]);

        assert_eq!(config.fanout_channel, "sse-events");
        assert_eq!(config.session_queue_capacity, 256);
        assert_eq!(config.backpressure_policy, BackpressurePolicy::Drop);
        assert!(config.ticket_single_use);

        let tickets = config.ticket_settings();
        assert_eq!(tickets.ttl, Duration::from_secs(30));

        let ws = config.ws_settings();
        assert_eq!(ws.write_wait, Duration::from_secs(10));
        assert_eq!(ws.pong_wait, Duration::from_secs(60));
        assert_eq!(ws.ping_period, Duration::from_secs(54));
        assert_eq!(ws.max_message_size, 512);
    }

    #[test]
    fn test_flags_flow_into_broker_settings() {
        let config = parse(&[
            "--backpressure-policy",
            "close",
            "--session-queue-capacity",
            "8",
            "--fanout-reconnect-max-attempts",
            "3",
            "--ticket-single-use",
            "false",
            "--store-backend",
            "memory",
        ]);

        let settings = config.broker_settings();
        assert_eq!(settings.session_queue_capacity, 8);
        assert_eq!(settings.backpressure, BackpressurePolicy::Close);
        assert!(settings.backoff.exhausted(3));
        assert!(!config.ticket_settings().single_use);
        assert_eq!(config.store_backend, StoreBackend::Memory);
    }

    #[test]
    fn test_zero_durations_are_rejected() {
        for flag in [
            "--ticket-ttl-secs",
            "--ws-write-wait-secs",
            "--ws-pong-wait-secs",
            "--sse-keepalive-secs",
        ] {
            let parsed =
                Config::try_parse_from(["shopping_list_rs", flag, "0"]);
            assert!(parsed.is_err(), "{flag} 0 should be rejected");
        }

        let config = parse(&["--ws-pong-wait-secs", "1", "--ticket-ttl-secs", "1"]);
        assert_eq!(config.ws_settings().ping_period, Duration::from_millis(900));
        assert_eq!(config.ticket_settings().ttl, Duration::from_secs(1));
    }

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!("Redis".parse::<StoreBackend>(), Ok(StoreBackend::Redis));
        assert_eq!("memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert_eq!("disk".parse::<StoreBackend>(), Err(StoreBackendParseError));
    }
}
