use std::time::Duration;

use anyhow::Context;
use aws_config::{defaults, timeout::TimeoutConfig, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    types::ObjectCannedAcl,
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use axum::async_trait;
use bytes::Bytes;

use crate::config::StorageConfig;

/// Canned ACL applied to an uploaded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    PublicRead,
}

impl Visibility {
    fn acl(self) -> ObjectCannedAcl {
        match self {
            Visibility::PublicRead => ObjectCannedAcl::PublicRead,
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Single-attempt put of the whole payload.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        visibility: Visibility,
    ) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
}

impl Storage {
    pub async fn new(cfg: &StorageConfig) -> Self {
        let endpoint = cfg.endpoint_url();
        let timeouts = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(cfg.upload_timeout_secs))
            .build();

        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&endpoint)
            .timeout_config(timeouts)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&endpoint)
            .force_path_style(cfg.force_path_style)
            .build();

        Self {
            client: Client::from_conf(conf),
        }
    }
}

#[async_trait]
impl ObjectStore for Storage {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        visibility: Visibility,
    ) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .acl(visibility.acl())
            .send()
            .await
            .context("s3 put_object")?;
        Ok(())
    }
}
