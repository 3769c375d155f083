//! S3-compatible object storage (Wasabi, R2, MinIO).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::gateway::{content_type_for, FileInfo, StorageGateway};
use crate::retry::{with_retry, RetryPolicy};

const BACKEND: &str = "s3";
const DEFAULT_REGION: &str = "us-east-1";

/// Configuration for the S3-compatible backend.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 API endpoint URL
    pub endpoint_url: String,
    /// Region (Wasabi requires the bucket's region)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
}

impl S3Config {
    /// Read `WASABI_*` variables.
    ///
    /// Returns `Ok(None)` when none of the required variables are set, and a
    /// configuration error naming the missing ones when only some are.
    pub fn from_env() -> StorageResult<Option<Self>> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> StorageResult<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let required = [
            ("WASABI_ENDPOINT", get("WASABI_ENDPOINT")),
            ("WASABI_BUCKET", get("WASABI_BUCKET")),
            ("WASABI_ACCESS_KEY_ID", get("WASABI_ACCESS_KEY_ID")),
            ("WASABI_SECRET_ACCESS_KEY", get("WASABI_SECRET_ACCESS_KEY")),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect();

        if missing.len() == required.len() {
            return Ok(None);
        }
        if !missing.is_empty() {
            return Err(StorageError::config_error(format!(
                "incomplete remote storage configuration, missing: {}",
                missing.join(", ")
            )));
        }

        let [(_, Some(endpoint)), (_, Some(bucket)), (_, Some(access_key_id)), (_, Some(secret_access_key))] = required
        else {
            return Ok(None);
        };

        let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint
        } else {
            format!("https://{}", endpoint)
        };

        Ok(Some(Self {
            endpoint_url,
            region: get("WASABI_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            bucket,
            access_key_id,
            secret_access_key,
        }))
    }
}

/// S3-compatible storage backend.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    retry: RetryPolicy,
}

impl S3Storage {
    /// Create a new client from configuration.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "wasabi",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Split a locator into bucket and key.
    ///
    /// Accepts `s3://bucket/key` and bare keys (resolved against the
    /// configured bucket).
    pub fn parse_locator(&self, locator: &str) -> StorageResult<(String, String)> {
        let (bucket, key) = match locator.strip_prefix("s3://") {
            Some(rest) => match rest.split_once('/') {
                Some((bucket, key)) if !bucket.is_empty() => (bucket.to_string(), key.to_string()),
                _ => return Err(StorageError::invalid_locator(locator)),
            },
            None => (self.bucket.clone(), locator.trim_start_matches('/').to_string()),
        };

        if key.is_empty() {
            return Err(StorageError::invalid_locator(locator));
        }
        Ok((bucket, key))
    }

    fn locator_for(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    async fn head(&self, bucket: &str, key: &str, locator: &str) -> StorageResult<bool> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => match classify_sdk_error(e, locator) {
                StorageError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    /// Verify credentials and bucket access.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, &self.bucket))?;
        Ok(())
    }
}

#[async_trait]
impl StorageGateway for S3Storage {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn download(&self, locator: &str, local_path: &Path) -> StorageResult<()> {
        let (bucket, key) = self.parse_locator(locator)?;
        debug!(locator = %locator, "Downloading to {}", local_path.display());

        let (bucket, key) = (&bucket, &key);
        with_retry(&self.retry, BACKEND, "download", || async move {
            let response = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| classify_sdk_error(e, locator))?;

            if let Some(parent) = local_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let mut file = tokio::fs::File::create(local_path).await?;
            let mut body = response.body.into_async_read();
            tokio::io::copy(&mut body, &mut file)
                .await
                .map_err(|e| StorageError::transient(format!("download of {} interrupted: {}", locator, e)))?;
            file.flush().await?;
            Ok(())
        })
        .await?;

        info!(locator = %locator, "Downloaded to {}", local_path.display());
        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str) -> StorageResult<String> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::invalid_locator(key));
        }
        let locator = self.locator_for(key);

        let locator_ref = locator.as_str();
        with_retry(&self.retry, BACKEND, "upload", || async move {
            if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
                return Err(StorageError::not_found(local_path.to_string_lossy()));
            }

            let body = ByteStream::from_path(local_path)
                .await
                .map_err(|e| StorageError::RequestFailed(format!("cannot read {}: {}", local_path.display(), e)))?;

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(body)
                .content_type(content_type_for(local_path))
                .send()
                .await
                .map_err(|e| classify_sdk_error(e, locator_ref))?;
            Ok(())
        })
        .await?;

        info!(locator = %locator, "Uploaded {}", local_path.display());
        Ok(locator)
    }

    async fn delete(&self, locator: &str) -> StorageResult<bool> {
        let (bucket, key) = self.parse_locator(locator)?;

        let (bucket, key) = (&bucket, &key);
        with_retry(&self.retry, BACKEND, "delete", || async move {
            // S3 deletes are idempotent and do not report absence
            if !self.head(bucket, key, locator).await? {
                return Ok(false);
            }
            self.client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| classify_sdk_error(e, locator))?;
            Ok(true)
        })
        .await
    }

    async fn exists(&self, locator: &str) -> StorageResult<bool> {
        let (bucket, key) = self.parse_locator(locator)?;
        let (bucket, key) = (&bucket, &key);
        with_retry(&self.retry, BACKEND, "exists", || async move {
            self.head(bucket, key, locator).await
        })
        .await
    }

    async fn download_url(&self, locator: &str, expires_in: Duration) -> StorageResult<String> {
        let (bucket, key) = self.parse_locator(locator)?;
        let presign_config =
            PresigningConfig::expires_in(expires_in).map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(format!("{}: {}", locator, DisplayErrorContext(&e))))?;

        info!(locator = %locator, expires_secs = expires_in.as_secs(), "Generated download URL");
        Ok(presigned.uri().to_string())
    }

    async fn file_info(&self, locator: &str) -> StorageResult<FileInfo> {
        let (bucket, key) = self.parse_locator(locator)?;

        let (bucket, key) = (&bucket, &key);
        with_retry(&self.retry, BACKEND, "file_info", || async move {
            let response = self
                .client
                .head_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| classify_sdk_error(e, locator))?;

            Ok(FileInfo {
                size: response.content_length().unwrap_or(0).max(0) as u64,
                last_modified: response
                    .last_modified()
                    .and_then(|t| t.to_millis().ok())
                    .map(|ms| ms as u64),
                content_type: response.content_type().map(str::to_string),
                etag: response.e_tag().map(|t| t.trim_matches('"').to_string()),
            })
        })
        .await
    }
}

/// Coarse category of an S3 error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseClass {
    NotFound,
    AccessDenied,
    Transient,
    Other,
}

fn classify_response(status: Option<u16>, code: Option<&str>) -> ResponseClass {
    match code {
        Some("NoSuchKey" | "NotFound" | "NoSuchBucket") => return ResponseClass::NotFound,
        Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "AccountProblem") => {
            return ResponseClass::AccessDenied
        }
        Some("SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable" | "Throttling") => {
            return ResponseClass::Transient
        }
        _ => {}
    }

    match status {
        Some(404) => ResponseClass::NotFound,
        Some(401 | 403) => ResponseClass::AccessDenied,
        Some(408 | 429) | Some(500..=599) => ResponseClass::Transient,
        _ => ResponseClass::Other,
    }
}

/// Map an SDK error onto the storage taxonomy.
fn classify_sdk_error<E>(err: SdkError<E, HttpResponse>, locator: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = format!("{}: {}", locator, DisplayErrorContext(&err));

    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            return StorageError::transient(message)
        }
        SdkError::ConstructionFailure(_) => return StorageError::RequestFailed(message),
        _ => {}
    }

    let status = err.raw_response().map(|r| r.status().as_u16());
    match classify_response(status, err.code()) {
        ResponseClass::NotFound => StorageError::not_found(locator),
        ResponseClass::AccessDenied => StorageError::access_denied(message),
        ResponseClass::Transient => StorageError::transient(message),
        ResponseClass::Other => StorageError::RequestFailed(message),
    }
}
