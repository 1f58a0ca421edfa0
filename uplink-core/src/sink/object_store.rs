use std::sync::Arc;

use ::object_store::aws::AmazonS3Builder;
use ::object_store::path::Path;
use ::object_store::{Attribute, Attributes, ObjectStore, PutMode, PutOptions, PutPayload};
use bytes::Bytes;
use tracing::{debug, info};

use super::{Batch, Sink};
use crate::codec::RowLayout;
use crate::config::ObjectStoreConfig;
use crate::payload::PartitionKey;
use crate::{Error, Result};

const CONTENT_TYPE: &str = "text/plain";

/// Uploads every flushed batch as one object to an S3 compatible bucket.
pub struct ObjectStoreSink {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    instance_id: String,
}

/// Path style requests against the configured endpoint, so MinIO and friends work.
pub(crate) fn s3_builder(config: &ObjectStoreConfig) -> AmazonS3Builder {
    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(&config.bucket)
        .with_region(&config.region)
        .with_endpoint(config.endpoint_url())
        .with_virtual_hosted_style_request(false)
        .with_allow_http(!config.use_ssl);

    if !config.access_key_id.is_empty() {
        builder = builder.with_access_key_id(&config.access_key_id);
    }
    if !config.secret_access_key.is_empty() {
        builder = builder.with_secret_access_key(&config.secret_access_key);
    }
    builder
}

impl ObjectStoreSink {
    /// Connects to the configured endpoint and makes sure the bucket is there.
    pub async fn connect(config: &ObjectStoreConfig) -> Result<Self> {
        let store = s3_builder(config)
            .build()
            .map_err(|e| Error::Config(format!("building the S3 client: {e}")))?;

        let sink = Self::new(Arc::new(store), &config.bucket, &config.instance_id);
        sink.verify_bucket().await?;
        Ok(sink)
    }

    pub fn new(store: Arc<dyn ObjectStore>, bucket: &str, instance_id: &str) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            instance_id: instance_id.to_string(),
        }
    }

    /// Lists the bucket root, which fails when the bucket does not exist or the endpoint cannot
    /// be reached. This is stricter than an existence check: the credentials also need list
    /// permission on the bucket. S3 answers a `HEAD` on a missing bucket and on a missing object
    /// with the same 404, so listing is the only check `object_store` can tell apart.
    pub async fn verify_bucket(&self) -> Result<()> {
        self.store
            .list_with_delimiter(None)
            .await
            .map_err(|e| Error::Bucket(format!("bucket {:?} is not usable: {e}", self.bucket)))?;
        debug!(bucket = %self.bucket, "Bucket is reachable");
        Ok(())
    }

    async fn put_new(&self, stem: &str, contents: Bytes) -> Result<Path> {
        let mut attempt = 0usize;
        loop {
            let location = Path::from(object_name(stem, attempt));

            let mut attributes = Attributes::new();
            attributes.insert(Attribute::ContentType, CONTENT_TYPE.into());
            let opts = PutOptions {
                mode: PutMode::Create,
                attributes,
                ..Default::default()
            };

            match self
                .store
                .put_opts(&location, PutPayload::from(contents.clone()), opts)
                .await
            {
                Ok(_) => return Ok(location),
                Err(::object_store::Error::AlreadyExists { .. }) => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// `{warehouse}-{schema}-{instance}-{secs}` or `{schema}-{instance}-{secs}`.
fn object_stem(key: &PartitionKey, instance_id: &str, unix_secs: i64) -> String {
    format!("{key}-{instance_id}-{unix_secs}")
}

fn object_name(stem: &str, attempt: usize) -> String {
    match attempt {
        0 => format!("{stem}.csv"),
        n => format!("{stem}-{n}.csv"),
    }
}

impl Sink for ObjectStoreSink {
    async fn write(&mut self, batch: Batch<'_>) -> Result<()> {
        let contents = RowLayout::Full.encode_batch(&batch);
        let size = contents.len();
        let stem = object_stem(batch.key, &self.instance_id, chrono::Utc::now().timestamp());

        let location = self.put_new(&stem, contents).await?;

        info!(
            partition = %batch.key,
            rows = batch.rows.len(),
            bytes = size,
            bucket = %self.bucket,
            object = %location,
            "Uploaded batch"
        );
        Ok(())
    }
}
