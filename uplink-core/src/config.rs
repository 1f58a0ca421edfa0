use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment};
use rand::Rng;
use serde::Deserialize;

use crate::sink::SinkType;
use crate::{Error, Result};

const ENV_PREFIX: &str = "UPLINK";

const DEFAULT_ENTRIES_PER_FILE: i64 = 1000;
const DEFAULT_SWEEP_INTERVAL_SECS: i64 = 60;
const DEFAULT_PORT: i64 = 8000;
const DEFAULT_OUTPUT_DIR: &str = ".";
const DEFAULT_S3_ENDPOINT: &str = "localhost:9000";
const DEFAULT_S3_BUCKET_NAME: &str = "uplink";
const DEFAULT_S3_LOCATION: &str = "us-east-1";

/// Alphabet for instance ids, base32 without the characters that are easy to confuse.
const INSTANCE_ID_ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";
const INSTANCE_ID_BYTES: usize = 5;

/// Which sink the backend writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Console,
    LocalFile,
    S3File,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Console => write!(f, "console"),
            BackendKind::LocalFile => write!(f, "localfile"),
            BackendKind::S3File => write!(f, "s3file"),
        }
    }
}

/// Settings of the local file sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileConfig {
    /// Directory the batch files are created in.
    pub dir: PathBuf,
}

/// Settings of the object store sink.
#[derive(Clone, PartialEq, Eq)]
pub struct ObjectStoreConfig {
    /// `host[:port]`, or a full URL.
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub use_ssl: bool,
    pub bucket: String,
    pub region: String,
    pub instance_id: String,
}

impl fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("use_ssl", &self.use_ssl)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl ObjectStoreConfig {
    /// Endpoint with a scheme, `https` when SSL is enabled.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            return self.endpoint.clone();
        }
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}", self.endpoint)
    }
}

/// Process settings, read from `UPLINK_*` environment variables. Key names are case-insensitive,
/// `UPLINK_ENTRIESPERFILE=500` sets `entries_per_file`.
#[derive(Clone, Deserialize)]
pub struct Settings {
    #[serde(rename = "instanceid")]
    pub instance_id: String,
    #[serde(rename = "entriesperfile")]
    pub entries_per_file: usize,
    /// Seconds, `0` disables the time based flush.
    #[serde(rename = "sweepinterval")]
    pub sweep_interval: u64,
    pub backend: BackendKind,
    pub port: u16,
    #[serde(rename = "outputdir")]
    pub output_dir: PathBuf,
    #[serde(rename = "s3endpoint")]
    pub s3_endpoint: String,
    #[serde(rename = "s3accesskeyid")]
    pub s3_access_key_id: String,
    #[serde(rename = "s3secretaccesskey")]
    pub s3_secret_access_key: String,
    #[serde(rename = "s3usessl")]
    pub s3_use_ssl: bool,
    #[serde(rename = "s3bucketname")]
    pub s3_bucket_name: String,
    #[serde(rename = "s3location")]
    pub s3_location: String,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("instance_id", &self.instance_id)
            .field("entries_per_file", &self.entries_per_file)
            .field("sweep_interval", &self.sweep_interval)
            .field("backend", &self.backend)
            .field("port", &self.port)
            .field("output_dir", &self.output_dir)
            .field("s3_endpoint", &self.s3_endpoint)
            .field("s3_bucket_name", &self.s3_bucket_name)
            .field("s3_location", &self.s3_location)
            .field("s3_use_ssl", &self.s3_use_ssl)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Loads the settings from the process environment.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Loads the settings from the given variables instead of the process environment.
    pub fn load_from(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let settings = Config::builder()
            .set_default("instanceid", new_instance_id())?
            .set_default("entriesperfile", DEFAULT_ENTRIES_PER_FILE)?
            .set_default("sweepinterval", DEFAULT_SWEEP_INTERVAL_SECS)?
            .set_default("backend", BackendKind::Console.to_string())?
            .set_default("port", DEFAULT_PORT)?
            .set_default("outputdir", DEFAULT_OUTPUT_DIR)?
            .set_default("s3endpoint", DEFAULT_S3_ENDPOINT)?
            .set_default("s3accesskeyid", "")?
            .set_default("s3secretaccesskey", "")?
            .set_default("s3usessl", false)?
            .set_default("s3bucketname", DEFAULT_S3_BUCKET_NAME)?
            .set_default("s3location", DEFAULT_S3_LOCATION)?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(vars),
            )
            .build()
            .map_err(|e| Error::Config(format!("generating runtime configuration: {e}")))?;

        let settings = settings
            .try_deserialize::<Self>()
            .map_err(|e| Error::Config(format!("parsing runtime configuration: {e}")))?;

        if settings.entries_per_file == 0 {
            return Err(Error::Config(
                "EntriesPerFile must be greater than 0".to_string(),
            ));
        }

        Ok(settings)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval > 0).then(|| Duration::from_secs(self.sweep_interval))
    }

    /// The sink selected by `Backend`, with its settings.
    pub fn sink_type(&self) -> SinkType {
        match self.backend {
            BackendKind::Console => SinkType::Console,
            BackendKind::LocalFile => SinkType::LocalFile(LocalFileConfig {
                dir: self.output_dir.clone(),
            }),
            BackendKind::S3File => SinkType::ObjectStore(ObjectStoreConfig {
                endpoint: self.s3_endpoint.clone(),
                access_key_id: self.s3_access_key_id.clone(),
                secret_access_key: self.s3_secret_access_key.clone(),
                use_ssl: self.s3_use_ssl,
                bucket: self.s3_bucket_name.clone(),
                region: self.s3_location.clone(),
                instance_id: self.instance_id.clone(),
            }),
        }
    }
}

/// Generates a random, 8 character instance id.
pub fn new_instance_id() -> String {
    let mut bytes = [0u8; INSTANCE_ID_BYTES];
    rand::rng().fill(&mut bytes);

    let bits = bytes
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));

    // 40 bits make exactly 8 symbols of 5 bits, so no padding is needed
    (0..INSTANCE_ID_BYTES * 8 / 5)
        .rev()
        .filter_map(|i| {
            let idx = ((bits >> (i * 5)) & 0x1f) as usize;
            INSTANCE_ID_ALPHABET.get(idx).map(|c| char::from(*c))
        })
        .collect()
}
