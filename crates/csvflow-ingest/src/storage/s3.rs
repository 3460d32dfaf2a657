use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    Client,
};
use tracing::{debug, info, instrument};

use super::{config::StorageConfig, CopyResult, ObjectMeta, ObjectRef, ObjectStore};

/// [`ObjectStore`] backed by S3 or an S3-compatible service (MinIO, GCS interop)
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn new(config: StorageConfig) -> Result<Self> {
        debug!("Initializing object store with config: {:?}", config.endpoint);

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "csvflow-storage");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
            },
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };

        builder = builder
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!(region = %config.region, "Object store client initialized");

        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectMeta>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix(prefix.map(str::to_string))
            .into_paginator()
            .send();

        let mut objects = Vec::new();

        while let Some(page) = pages.next().await {
            let page = page.with_context(|| format!("Failed to list objects in {}", bucket))?;

            objects.extend(page.contents().iter().filter_map(|obj| {
                obj.key().map(|key| ObjectMeta {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0),
                })
            }));
        }

        debug!("Listed {} objects in {}", objects.len(), bucket);

        Ok(objects)
    }

    #[instrument(skip(self), fields(source = %source, destination = %destination))]
    async fn copy(&self, source: &ObjectRef, destination: &ObjectRef) -> Result<CopyResult> {
        let response = self
            .client
            .copy_object()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .copy_source(format!("{}/{}", source.bucket, source.key))
            .send()
            .await
            .with_context(|| format!("Failed to copy {} to {}", source, destination))?;

        let confirmed = response
            .copy_object_result()
            .map(|result| result.e_tag().is_some())
            .unwrap_or(false);

        debug!(confirmed, "Copied {} to {}", source, destination);

        Ok(CopyResult { confirmed })
    }

    #[instrument(skip(self), fields(object = %object))]
    async fn delete(&self, object: &ObjectRef) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .with_context(|| format!("Failed to delete {}", object))?;

        debug!("Deleted {}", object);

        Ok(())
    }

    #[instrument(skip(self), fields(object = %object))]
    async fn exists(&self, object: &ObjectRef) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().is_some_and(|service| service.is_not_found()) {
                    Ok(false)
                } else {
                    Err(anyhow!("Failed to check existence of {}: {}", object, e))
                }
            },
        }
    }

    #[instrument(skip(self), fields(object = %object))]
    async fn download(&self, object: &ObjectRef) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", object))?;

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read object body")?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from {}", data.len(), object);

        Ok(data)
    }
}
