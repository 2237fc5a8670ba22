use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Readiness Audit: probes every registered surface of the platform and scores it.
#[derive(Parser, Debug, Clone)]
#[command(name = "readiness-audit")]
pub struct CliArgs {
    /// Base URL of the live platform that endpoint probes are sent to
    #[arg(
        short = 'b',
        long = "base-url",
        env = "PLATFORM_BASE_URL",
        default_value = DEFAULT_BASE_URL
    )]
    pub base_url: String,

    /// Directory holding the audit database
    #[arg(short = 'd', long = "data-dir", default_value = ".audit-data")]
    pub data_dir: PathBuf,

    /// JSON registry file replacing the built-in page/API registry
    #[arg(short = 'r', long = "registry")]
    pub registry: Option<PathBuf>,

    /// HTTP port for the audit API
    #[arg(long = "port", default_value_t = DEFAULT_AUDIT_PORT)]
    pub port: u16,

    /// Upper bound on concurrent in-flight endpoint probes
    #[arg(long = "max-concurrent-probes", default_value_t = DEFAULT_MAX_CONCURRENT_PROBES)]
    pub max_concurrent_probes: usize,

    /// Hard timeout for each endpoint probe
    #[arg(long = "probe-timeout-secs", default_value_t = PROBE_TIMEOUT_SECS)]
    pub probe_timeout_secs: u64,

    /// How a probe treats transport failures other than timeouts
    #[arg(long = "unreachable", value_enum, default_value_t = UnreachablePolicy::OptimisticPass)]
    pub unreachable: UnreachablePolicy,

    /// Run a single full audit, print its report as JSON, and exit
    #[arg(long = "audit-once")]
    pub audit_once: bool,
}

/// Outcome recorded when an endpoint cannot be reached at all (DNS failure,
/// connection refused). Timeouts always fail regardless of policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UnreachablePolicy {
    /// Count the endpoint as registered and pass the backend check.
    #[default]
    OptimisticPass,
    /// Fail the backend check.
    Fail,
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub base_url: String,
    pub data_dir: PathBuf,
    pub registry_file: Option<PathBuf>,
    pub port: u16,
    pub max_concurrent_probes: usize,
    pub probe_timeout: Duration,
    pub unreachable: UnreachablePolicy,
    pub audit_once: bool,
}

// Network defaults
pub const DEFAULT_AUDIT_PORT: u16 = 9890;
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

// Probe constants
pub const PROBE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 8;

// Classification thresholds (score is 0-100)
pub const FULLY_OPERATIONAL_MIN_SCORE: f64 = 80.0;
pub const PARTIALLY_OPERATIONAL_MIN_SCORE: f64 = 40.0;

// Per-target history kept on the target row
pub const TEST_HISTORY_CAPACITY: usize = 10;

// Activity log constants
pub const ACTIVITY_BUFFER_SIZE: usize = 500;

// Listing defaults
pub const DEFAULT_RUN_LIST_LIMIT: i64 = 50;
pub const DEFAULT_TREND_LIMIT: i64 = 20;

pub const AUDIT_DB_FILE: &str = "audit.db";

impl AuditConfig {
    pub fn from_args(args: CliArgs) -> anyhow::Result<Self> {
        let parsed = url::Url::parse(&args.base_url)
            .map_err(|e| anyhow::anyhow!("Invalid base URL {:?}: {}", args.base_url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("Base URL must be http or https, got {:?}", parsed.scheme());
        }

        Ok(AuditConfig {
            base_url: args.base_url.trim_end_matches('/').to_string(),
            data_dir: args.data_dir,
            registry_file: args.registry,
            port: args.port,
            max_concurrent_probes: args.max_concurrent_probes.max(1),
            probe_timeout: Duration::from_secs(args.probe_timeout_secs.max(1)),
            unreachable: args.unreachable,
            audit_once: args.audit_once,
        })
    }
}
