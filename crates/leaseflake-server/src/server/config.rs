use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use leaseflake::{
    BitLayout, DEFAULT_EPOCH, DEFAULT_PADDING_HIGH_BITS, DEFAULT_PADDING_LOW_BITS,
    DEFAULT_TIMESTAMP_BITS, DEFAULT_WORKER_ID_BITS, HolderIdentity, LeaseConfig, SequenceStart,
};
use std::path::PathBuf;

/// Widest worker field the server will seed a pool for. Every row is created
/// at startup and listed on every acquire.
pub const MAX_POOL_WORKER_ID_BITS: u8 = 16;

/// Runtime configuration for the `leaseflake-server` binary.
///
/// Every flag can also be set through the environment variable named next to
/// it, and a `.env` file in the working directory is loaded first. Layout
/// flags must be identical across every server sharing an ID namespace, or
/// their IDs stop being comparable.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "leaseflake-server",
    version,
    about = "An HTTP service for Snowflake-like IDs with leased worker IDs"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Directory of the sled database holding the worker lease pool.
    ///
    /// Environment variable: `STORE_PATH`
    #[arg(long, env = "STORE_PATH", default_value = "leaseflake-leases")]
    pub store_path: PathBuf,

    /// Claim this worker ID instead of the lowest free one.
    ///
    /// The ID is still leased from the pool and heartbeated, so startup fails
    /// if another process holds it.
    ///
    /// Environment variable: `WORKER_ID`
    #[arg(long, env = "WORKER_ID")]
    pub worker_id: Option<u64>,

    /// Identity recorded on the lease. Defaults to `host:pid:nonce`.
    ///
    /// Environment variable: `HOLDER_IDENTITY`
    #[arg(long, env = "HOLDER_IDENTITY")]
    pub identity: Option<String>,

    /// Width of the timestamp field, in bits.
    ///
    /// Environment variable: `TIMESTAMP_BITS`
    #[arg(long, env = "TIMESTAMP_BITS", default_value_t = DEFAULT_TIMESTAMP_BITS)]
    pub timestamp_bits: u8,

    /// Reserved bits between the timestamp and worker ID fields.
    ///
    /// Environment variable: `PADDING_HIGH_BITS`
    #[arg(long, env = "PADDING_HIGH_BITS", default_value_t = DEFAULT_PADDING_HIGH_BITS)]
    pub padding_high_bits: u8,

    /// Width of the worker ID field, in bits. Also sizes the lease pool, so
    /// at most 16.
    ///
    /// Environment variable: `WORKER_ID_BITS`
    #[arg(long, env = "WORKER_ID_BITS", default_value_t = DEFAULT_WORKER_ID_BITS)]
    pub worker_id_bits: u8,

    /// Reserved bits between the worker ID and sequence fields.
    ///
    /// Environment variable: `PADDING_LOW_BITS`
    #[arg(long, env = "PADDING_LOW_BITS", default_value_t = DEFAULT_PADDING_LOW_BITS)]
    pub padding_low_bits: u8,

    /// Custom epoch, in seconds since the Unix epoch.
    ///
    /// Environment variable: `EPOCH`
    #[arg(long, env = "EPOCH", default_value_t = DEFAULT_EPOCH)]
    pub epoch: u64,

    /// Start each second's sequence at a random value below this bound. `0`
    /// always starts at zero.
    ///
    /// Environment variable: `RANDOM_SEQUENCE_START_RANGE`
    #[arg(long, env = "RANDOM_SEQUENCE_START_RANGE", default_value_t = 0)]
    pub random_sequence_start_range: u64,

    /// Seconds between lease renewals.
    ///
    /// Environment variable: `HEARTBEAT_INTERVAL_SECS`
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value_t = 30)]
    pub heartbeat_interval_secs: u64,

    /// Heartbeat age, in seconds, after which a lease counts as abandoned.
    /// Must be at least three heartbeat intervals, and longer than one
    /// interval plus a renewal that exhausts every store retry.
    ///
    /// Environment variable: `RECLAIM_THRESHOLD_SECS`
    #[arg(long, env = "RECLAIM_THRESHOLD_SECS", default_value_t = 180)]
    pub reclaim_threshold_secs: u64,

    /// Seconds between stale lease sweeps. `0` disables the sweep.
    ///
    /// Environment variable: `RECLAIM_INTERVAL_SECS`
    #[arg(long, env = "RECLAIM_INTERVAL_SECS", default_value_t = 3600)]
    pub reclaim_interval_secs: u64,

    /// Upper bound on a single lease store call, in milliseconds.
    ///
    /// Environment variable: `STORE_TIMEOUT_MS`
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 5000)]
    pub store_timeout_ms: u64,

    /// Retries after a transient lease store failure.
    ///
    /// Environment variable: `STORE_MAX_RETRIES`
    #[arg(long, env = "STORE_MAX_RETRIES", default_value_t = 3)]
    pub store_max_retries: u32,

    /// Emit logs as JSON lines instead of human-readable text.
    ///
    /// Environment variable: `LOG_JSON`
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub store_path: PathBuf,
    pub worker_id: Option<u64>,
    pub identity: HolderIdentity,
    pub layout: BitLayout,
    pub sequence_start: SequenceStart,
    pub lease: LeaseConfig,
    pub reclaim_threshold: Duration,
    /// `None` disables the periodic sweep.
    pub reclaim_interval: Option<Duration>,
    pub log_json: bool,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let layout = BitLayout::new(
            args.timestamp_bits,
            args.padding_high_bits,
            args.worker_id_bits,
            args.padding_low_bits,
            args.epoch,
        )
        .context("invalid ID layout")?;

        if args.worker_id_bits > MAX_POOL_WORKER_ID_BITS {
            bail!(
                "WORKER_ID_BITS ({}) would seed a pool of 2^{} leases, the limit is {} bits",
                args.worker_id_bits,
                args.worker_id_bits,
                MAX_POOL_WORKER_ID_BITS
            );
        }

        if let Some(worker_id) = args.worker_id {
            layout
                .check_worker_id(worker_id)
                .context("WORKER_ID does not fit the layout")?;
        }

        let sequence_start = SequenceStart::from_random_range(args.random_sequence_start_range);
        sequence_start
            .validate(&layout)
            .context("RANDOM_SEQUENCE_START_RANGE does not fit the layout")?;

        if args.store_max_retries > 16 {
            bail!(
                "STORE_MAX_RETRIES ({}) is too large, backoff would exceed any sane timeout",
                args.store_max_retries
            );
        }

        let lease = LeaseConfig {
            heartbeat_interval: Duration::from_secs(args.heartbeat_interval_secs),
            store_timeout: Duration::from_millis(args.store_timeout_ms),
            max_retries: args.store_max_retries,
            ..LeaseConfig::for_layout(&layout)
        };
        let reclaim_threshold = Duration::from_secs(args.reclaim_threshold_secs);
        lease.validate(reclaim_threshold)?;

        let identity = args
            .identity
            .map_or_else(HolderIdentity::for_current_process, HolderIdentity::new);
        if identity.as_str().is_empty() {
            bail!("HOLDER_IDENTITY must not be empty");
        }

        Ok(Self {
            server_addr: args.server_addr,
            store_path: args.store_path,
            worker_id: args.worker_id,
            identity,
            layout,
            sequence_start,
            lease,
            reclaim_threshold,
            reclaim_interval: (args.reclaim_interval_secs > 0)
                .then(|| Duration::from_secs(args.reclaim_interval_secs)),
            log_json: args.log_json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> anyhow::Result<ServerConfig> {
        let args = CliArgs::try_parse_from(
            ["leaseflake-server"].iter().chain(extra).copied(),
        )?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn defaults_are_valid() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.layout, BitLayout::default());
        assert_eq!(config.lease.max_worker_id, 4095);
        assert_eq!(config.sequence_start, SequenceStart::Fixed(0));
        assert_eq!(config.reclaim_threshold, Duration::from_secs(180));
        assert_eq!(config.reclaim_interval, Some(Duration::from_secs(3600)));
        assert!(config.worker_id.is_none());
        assert!(!config.identity.as_str().is_empty());
    }

    #[test]
    fn pool_follows_the_worker_field() {
        let config = parse(&["--worker-id-bits", "4", "--timestamp-bits", "32"]).unwrap();
        assert_eq!(config.layout.sequence_bits(), 27);
        assert_eq!(config.lease.max_worker_id, 15);
        assert_eq!(config.lease.pool_size(), 16);
    }

    #[test]
    fn rejects_oversized_layouts() {
        assert!(parse(&["--timestamp-bits", "40", "--worker-id-bits", "24"]).is_err());
    }

    #[test]
    fn rejects_out_of_range_worker_ids() {
        assert!(parse(&["--worker-id", "4095"]).is_ok());
        assert!(parse(&["--worker-id", "4096"]).is_err());
    }

    #[test]
    fn rejects_random_range_beyond_the_sequence() {
        assert!(parse(&["--random-sequence-start-range", "1000"]).is_ok());
        assert!(
            parse(&[
                "--worker-id-bits",
                "16",
                "--timestamp-bits",
                "44",
                "--random-sequence-start-range",
                "9"
            ])
            .is_err()
        );
    }

    #[test]
    fn pool_size_is_capped() {
        let config = parse(&["--worker-id-bits", "16", "--timestamp-bits", "32"]).unwrap();
        assert_eq!(config.lease.pool_size(), 65_536);

        let err = parse(&["--worker-id-bits", "17", "--timestamp-bits", "32"]).unwrap_err();
        assert!(err.to_string().contains("WORKER_ID_BITS"));
        assert!(parse(&["--worker-id-bits", "32", "--timestamp-bits", "28"]).is_err());
    }

    #[test]
    fn reclaim_threshold_must_outlast_heartbeats() {
        assert!(
            parse(&[
                "--heartbeat-interval-secs",
                "60",
                "--reclaim-threshold-secs",
                "179"
            ])
            .is_err()
        );
        assert!(parse(&["--heartbeat-interval-secs", "0"]).is_err());
    }

    #[test]
    fn reclaim_threshold_must_outlast_a_stalled_renewal() {
        // 30s interval plus four 60s store timeouts is far past 90s
        assert!(
            parse(&[
                "--store-timeout-ms",
                "60000",
                "--heartbeat-interval-secs",
                "30",
                "--reclaim-threshold-secs",
                "90"
            ])
            .is_err()
        );
        // 10s interval plus 4 x 5s timeouts and 1.4s of backoff is 31.4s
        assert!(
            parse(&[
                "--heartbeat-interval-secs",
                "10",
                "--reclaim-threshold-secs",
                "31"
            ])
            .is_err()
        );
        assert!(
            parse(&[
                "--heartbeat-interval-secs",
                "10",
                "--reclaim-threshold-secs",
                "32"
            ])
            .is_ok()
        );
    }

    #[test]
    fn zero_interval_disables_the_sweep() {
        let config = parse(&["--reclaim-interval-secs", "0"]).unwrap();
        assert_eq!(config.reclaim_interval, None);
    }

    #[test]
    fn explicit_identity_is_kept() {
        let config = parse(&["--identity", "node-a"]).unwrap();
        assert_eq!(config.identity, HolderIdentity::new("node-a"));
        assert!(parse(&["--identity", ""]).is_err());
    }
}
