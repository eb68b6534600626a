use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

const MIB: u64 = 1024 * 1024;

/// Which store implementation backs the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Any S3-compatible endpoint (AWS, Wasabi, MinIO, R2, ...).
    S3,
    /// Payloads on local disk, metadata in SQLite.
    Local,
}

/// Connection settings for the object store.
#[derive(Clone)]
pub struct StoreConfig {
    pub backend: Backend,
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
    pub local_dir: PathBuf,
    pub database_url: String,
}

// Hand-written so credentials never reach the logs.
impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "<set>"))
            .field("force_path_style", &self.force_path_style)
            .field("local_dir", &self.local_dir)
            .field("database_url", &self.database_url)
            .finish_non_exhaustive()
    }
}

/// Tuning for the chunked uploader.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Default size of each part.
    pub part_size: u64,
    /// Files at or below this size go up in a single request.
    pub multipart_threshold: u64,
    /// Parts in flight at once; 1 means strictly serial.
    pub concurrency: usize,
    /// Per-part deadline. A part that misses it aborts the session.
    pub part_timeout: Option<Duration>,
    /// Minimum gap between progress snapshots.
    pub progress_interval: Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            part_size: 50 * MIB,
            multipart_threshold: 50 * MIB,
            concurrency: 4,
            part_timeout: None,
            progress_interval: Duration::from_secs(1),
        }
    }
}

/// Who may upload, how much, and how often.
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub premium_file: PathBuf,
    /// Files uploaded over HTTP must resolve inside this directory.
    pub spool_dir: PathBuf,
    pub admin_ids: Vec<i64>,
    pub max_file_size: u64,
    pub uploads_per_window: u32,
    pub window: Duration,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            premium_file: PathBuf::from("./data/premium.json"),
            spool_dir: PathBuf::from("./data/spool"),
            admin_ids: Vec::new(),
            max_file_size: 4 * 1024 * MIB,
            uploads_per_window: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreConfig,
    pub upload: UploadSettings,
    pub gate: GateSettings,
    pub link_expiry: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Relay local files into an S3-compatible bucket")]
pub struct Args {
    /// Host to bind to (overrides BUCKET_RELAY_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides BUCKET_RELAY_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Store backend (overrides BUCKET_RELAY_BACKEND)
    #[arg(long, value_enum, global = true)]
    pub backend: Option<Backend>,

    /// Destination bucket (overrides BUCKET_RELAY_BUCKET)
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// S3 endpoint URL (overrides BUCKET_RELAY_ENDPOINT)
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// S3 region (overrides BUCKET_RELAY_REGION)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Use path-style addressing (overrides BUCKET_RELAY_PATH_STYLE)
    #[arg(long, global = true)]
    pub path_style: bool,

    /// Directory for local payloads (overrides BUCKET_RELAY_LOCAL_DIR)
    #[arg(long, global = true)]
    pub local_dir: Option<PathBuf>,

    /// Local store database URL (overrides BUCKET_RELAY_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Part size in MiB (overrides BUCKET_RELAY_PART_SIZE_MB)
    #[arg(long, global = true)]
    pub part_size_mb: Option<u64>,

    /// Multipart threshold in MiB (overrides BUCKET_RELAY_MULTIPART_THRESHOLD_MB)
    #[arg(long, global = true)]
    pub multipart_threshold_mb: Option<u64>,

    /// Parts uploaded concurrently (overrides BUCKET_RELAY_CONCURRENCY)
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Per-part timeout in seconds (overrides BUCKET_RELAY_PART_TIMEOUT_SECS)
    #[arg(long, global = true)]
    pub part_timeout_secs: Option<u64>,

    /// Premium users file (overrides BUCKET_RELAY_PREMIUM_FILE)
    #[arg(long, global = true)]
    pub premium_file: Option<PathBuf>,

    /// Directory HTTP uploads are read from (overrides BUCKET_RELAY_SPOOL_DIR)
    #[arg(long, global = true)]
    pub spool_dir: Option<PathBuf>,

    /// Comma-separated admin user ids (overrides BUCKET_RELAY_ADMIN_IDS)
    #[arg(long, global = true, value_delimiter = ',')]
    pub admin_ids: Option<Vec<i64>>,

    /// Largest accepted file in MiB (overrides BUCKET_RELAY_MAX_FILE_SIZE_MB)
    #[arg(long, global = true)]
    pub max_file_size_mb: Option<u64>,

    /// Presigned link lifetime in seconds (overrides BUCKET_RELAY_LINK_EXPIRY_SECS)
    #[arg(long, global = true)]
    pub link_expiry_secs: Option<u64>,

    /// Run local store migrations and exit
    #[arg(long)]
    pub migrate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP relay (default)
    Serve,
    /// Upload a local file
    Upload {
        path: PathBuf,
        /// Object key; defaults to the file name
        #[arg(long)]
        key: Option<String>,
        /// Apply upload gating for this user id
        #[arg(long)]
        user: Option<i64>,
    },
    /// Download an object to a local path
    Download { key: String, dest: PathBuf },
    /// Print a time-limited download link
    Link {
        key: String,
        #[arg(long)]
        expires_in: Option<u64>,
    },
    /// Delete an object
    Delete { key: String },
    /// Manage premium users
    #[command(subcommand)]
    Premium(PremiumCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum PremiumCommand {
    Grant {
        user_id: i64,
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    Revoke {
        user_id: i64,
    },
    Check {
        user_id: i64,
    },
    List,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig, the migrate
    /// flag, and the command to run.
    pub fn from_env_and_args() -> Result<(Self, bool, Command)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let command = args.command.clone().unwrap_or(Command::Serve);
        let cfg = Self::resolve(args)?;
        Ok((cfg, migrate, command))
    }

    /// Merge parsed CLI args over environment variables over defaults.
    pub fn resolve(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_backend = match env_string("BUCKET_RELAY_BACKEND") {
            Some(value) => Some(
                <Backend as ValueEnum>::from_str(&value, true)
                    .map_err(|err| anyhow::anyhow!(err))
                    .with_context(|| format!("parsing BUCKET_RELAY_BACKEND value `{}`", value))?,
            ),
            None => None,
        };
        let env_admins = match env_string("BUCKET_RELAY_ADMIN_IDS") {
            Some(value) => Some(
                parse_admin_ids(&value)
                    .with_context(|| format!("parsing BUCKET_RELAY_ADMIN_IDS value `{}`", value))?,
            ),
            None => None,
        };

        let upload_defaults = UploadSettings::default();
        let gate_defaults = GateSettings::default();

        let part_size_mb = args
            .part_size_mb
            .or(env_parse("BUCKET_RELAY_PART_SIZE_MB")?);
        let threshold_mb = args
            .multipart_threshold_mb
            .or(env_parse("BUCKET_RELAY_MULTIPART_THRESHOLD_MB")?);
        let part_timeout_secs = args
            .part_timeout_secs
            .or(env_parse("BUCKET_RELAY_PART_TIMEOUT_SECS")?);
        let max_file_size_mb = args
            .max_file_size_mb
            .or(env_parse("BUCKET_RELAY_MAX_FILE_SIZE_MB")?);
        let link_expiry_secs = args
            .link_expiry_secs
            .or(env_parse("BUCKET_RELAY_LINK_EXPIRY_SECS")?)
            .unwrap_or(7 * 24 * 3600);

        // --- Merge ---
        let cfg = Self {
            host: args
                .host
                .or_else(|| env_string("BUCKET_RELAY_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args
                .port
                .or(env_parse("BUCKET_RELAY_PORT")?)
                .unwrap_or(3000),
            store: StoreConfig {
                backend: args.backend.or(env_backend).unwrap_or(Backend::Local),
                bucket: args
                    .bucket
                    .or_else(|| env_string("BUCKET_RELAY_BUCKET"))
                    .unwrap_or_else(|| "uploads".into()),
                endpoint: args
                    .endpoint
                    .or_else(|| env_string("BUCKET_RELAY_ENDPOINT")),
                region: args
                    .region
                    .or_else(|| env_string("BUCKET_RELAY_REGION"))
                    .unwrap_or_else(|| "us-east-1".into()),
                access_key_id: env_string("BUCKET_RELAY_ACCESS_KEY_ID"),
                secret_access_key: env_string("BUCKET_RELAY_SECRET_ACCESS_KEY"),
                force_path_style: args.path_style
                    || env_parse::<bool>("BUCKET_RELAY_PATH_STYLE")?.unwrap_or(false),
                local_dir: args
                    .local_dir
                    .or_else(|| env_string("BUCKET_RELAY_LOCAL_DIR").map(PathBuf::from))
                    .unwrap_or_else(|| PathBuf::from("./data/objects")),
                database_url: args
                    .database_url
                    .or_else(|| env_string("BUCKET_RELAY_DATABASE_URL"))
                    .unwrap_or_else(|| "sqlite://./data/meta/relay.db".into()),
            },
            upload: UploadSettings {
                part_size: part_size_mb
                    .map(|mb| mb * MIB)
                    .unwrap_or(upload_defaults.part_size),
                multipart_threshold: threshold_mb
                    .map(|mb| mb * MIB)
                    .unwrap_or(upload_defaults.multipart_threshold),
                concurrency: args
                    .concurrency
                    .or(env_parse("BUCKET_RELAY_CONCURRENCY")?)
                    .unwrap_or(upload_defaults.concurrency),
                part_timeout: part_timeout_secs.map(Duration::from_secs),
                progress_interval: upload_defaults.progress_interval,
            },
            gate: GateSettings {
                premium_file: args
                    .premium_file
                    .or_else(|| env_string("BUCKET_RELAY_PREMIUM_FILE").map(PathBuf::from))
                    .unwrap_or(gate_defaults.premium_file),
                spool_dir: args
                    .spool_dir
                    .or_else(|| env_string("BUCKET_RELAY_SPOOL_DIR").map(PathBuf::from))
                    .unwrap_or(gate_defaults.spool_dir),
                admin_ids: args.admin_ids.or(env_admins).unwrap_or_default(),
                max_file_size: max_file_size_mb
                    .map(|mb| mb * MIB)
                    .unwrap_or(gate_defaults.max_file_size),
                uploads_per_window: gate_defaults.uploads_per_window,
                window: gate_defaults.window,
            },
            link_expiry: Duration::from_secs(link_expiry_secs),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.bucket.trim().is_empty() {
            bail!("bucket name must not be empty");
        }
        if self.upload.part_size == 0 {
            bail!("part size must be positive");
        }
        if self.upload.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.store.access_key_id.is_some() ^ self.store.secret_access_key.is_some() {
            bail!(
                "BUCKET_RELAY_ACCESS_KEY_ID and BUCKET_RELAY_SECRET_ACCESS_KEY must be set together"
            );
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse a comma-separated list of user ids, ignoring blanks.
pub fn parse_admin_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .with_context(|| format!("`{}` is not a user id", s))
        })
        .collect()
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_admin_ids_with_blanks() {
        assert_eq!(parse_admin_ids("1, 2,,3 ").unwrap(), vec![1, 2, 3]);
        assert!(parse_admin_ids("1,abc").is_err());
        assert!(parse_admin_ids("").unwrap().is_empty());
    }

    #[test]
    fn cli_flags_override_defaults() {
        let args = Args::parse_from([
            "bucket-relay",
            "--backend",
            "local",
            "--bucket",
            "media-files",
            "--part-size-mb",
            "8",
            "--multipart-threshold-mb",
            "16",
            "--concurrency",
            "2",
            "--part-timeout-secs",
            "30",
            "--admin-ids",
            "7,9",
            "--spool-dir",
            "/srv/spool",
            "upload",
            "clip.mp4",
            "--user",
            "42",
        ]);
        assert_eq!(
            args.command,
            Some(Command::Upload {
                path: PathBuf::from("clip.mp4"),
                key: None,
                user: Some(42),
            })
        );

        let cfg = AppConfig::resolve(args).unwrap();
        assert_eq!(cfg.store.backend, Backend::Local);
        assert_eq!(cfg.store.bucket, "media-files");
        assert_eq!(cfg.upload.part_size, 8 * MIB);
        assert_eq!(cfg.upload.multipart_threshold, 16 * MIB);
        assert_eq!(cfg.upload.concurrency, 2);
        assert_eq!(cfg.upload.part_timeout, Some(Duration::from_secs(30)));
        assert_eq!(cfg.gate.admin_ids, vec![7, 9]);
        assert_eq!(cfg.gate.spool_dir, PathBuf::from("/srv/spool"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let args = Args::parse_from(["bucket-relay", "--concurrency", "0"]);
        assert!(AppConfig::resolve(args).is_err());
    }

    #[test]
    fn debug_output_hides_credentials() {
        let store = StoreConfig {
            backend: Backend::S3,
            bucket: "b".into(),
            endpoint: None,
            region: "us-east-1".into(),
            access_key_id: Some("AKIAEXAMPLE".into()),
            secret_access_key: Some("very-secret".into()),
            force_path_style: false,
            local_dir: PathBuf::from("."),
            database_url: "sqlite::memory:".into(),
        };
        let rendered = format!("{:?}", store);
        assert!(!rendered.contains("AKIAEXAMPLE"));
        assert!(!rendered.contains("very-secret"));
    }
}
