//! Object store on an S3-compatible server such as MinIO.

use std::path::Path;

use aws_config::Region;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadOutput;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use aws_smithy_types::byte_stream::Length;
use bytes::Bytes;
use tracing::{debug, trace};

use crate::config::StorageConfig;
use crate::error::StorageError;

/// Files above this size are sent with a multipart upload, in parts of
/// this size.
const CHUNK_SIZE: u64 = 1024 * 1024 * 5;
const MAX_CHUNKS: u64 = 10000;

#[derive(Debug, Clone)]
pub struct MinioStore {
    client: Client,
    bucket: String,
}

fn write_err(key: &str, e: impl std::error::Error) -> StorageError {
    StorageError::Write {
        key: key.to_string(),
        message: DisplayErrorContext(e).to_string(),
    }
}

fn read_err(key: &str, e: impl std::error::Error) -> StorageError {
    StorageError::Read {
        key: key.to_string(),
        message: DisplayErrorContext(e).to_string(),
    }
}

impl MinioStore {
    /// Connects with static credentials and creates the bucket if it does
    /// not exist yet.
    pub async fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        let credentials = Credentials::new(&config.user, &config.password, None, None, "minio");
        let s3_config = Builder::new()
            .region(Region::new("us-east-1"))
            .endpoint_url(&config.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .behavior_version(BehaviorVersion::latest())
            .build();
        let store = Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        };
        store.ensure_bucket().await?;
        Ok(store)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn ensure_bucket(&self) -> Result<(), StorageError> {
        if self.client.head_bucket().bucket(&self.bucket).send().await.is_ok() {
            return Ok(());
        }
        debug!(bucket = %self.bucket, "creating bucket");
        self.client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| write_err(&self.bucket, e))?;
        Ok(())
    }

    pub async fn put(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        trace!(bucket = %self.bucket, key, bytes = data.len(), "s3 put");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| write_err(key, e))?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        trace!(bucket = %self.bucket, key, "s3 get");
        let mut object = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(object) => object,
            Err(e) if e.as_service_error().map_or(false, |se| se.is_no_such_key()) => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(read_err(key, e)),
        };
        let mut content = Vec::new();
        while let Some(bytes) = object.body.try_next().await.map_err(|e| read_err(key, e))? {
            trace!("intermediate read of {}", bytes.len());
            content.extend_from_slice(&bytes);
        }
        Ok(Bytes::from(content))
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map_or(false, |se| se.is_not_found()) => Ok(false),
            Err(e) => Err(read_err(key, e)),
        }
    }

    /// Keys under `prefix`, following continuation tokens.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| StorageError::List {
                    prefix: prefix.to_string(),
                    message: DisplayErrorContext(e).to_string(),
                })?;
            for object in resp.contents.unwrap_or_default() {
                keys.push(object.key.unwrap_or_default());
            }
            match resp.next_continuation_token {
                Some(next) if resp.is_truncated.unwrap_or(false) => token = Some(next),
                _ => break,
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Uploads a local file, in parts when it is larger than one chunk.
    pub async fn upload_file(&self, key: &str, file: &Path) -> Result<u64, StorageError> {
        let file_size = tokio::fs::metadata(file).await?.len();
        if file_size <= CHUNK_SIZE {
            let body = ByteStream::from_path(file).await.map_err(|e| write_err(key, e))?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(body)
                .send()
                .await
                .map_err(|e| write_err(key, e))?;
            return Ok(file_size);
        }
        self.upload_parts(key, file, file_size).await?;
        Ok(file_size)
    }

    async fn upload_parts(&self, key: &str, file: &Path, file_size: u64) -> Result<(), StorageError> {
        let mut chunk_count = (file_size / CHUNK_SIZE) + 1;
        let mut size_of_last_chunk = file_size % CHUNK_SIZE;
        if size_of_last_chunk == 0 {
            size_of_last_chunk = CHUNK_SIZE;
            chunk_count -= 1;
        }
        if chunk_count > MAX_CHUNKS {
            return Err(StorageError::Write {
                key: key.to_string(),
                message: format!("{file_size} bytes needs more than {MAX_CHUNKS} parts"),
            });
        }

        let multipart_upload_res: CreateMultipartUploadOutput = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| write_err(key, e))?;
        let upload_id = multipart_upload_res.upload_id.ok_or_else(|| StorageError::Write {
            key: key.to_string(),
            message: "server returned no upload id".into(),
        })?;
        debug!(key, parts = chunk_count, "multipart upload");

        let mut upload_parts: Vec<CompletedPart> = Vec::new();
        for chunk_index in 0..chunk_count {
            let this_chunk = if chunk_count - 1 == chunk_index {
                size_of_last_chunk
            } else {
                CHUNK_SIZE
            };
            let stream = ByteStream::read_from()
                .path(file)
                .offset(chunk_index * CHUNK_SIZE)
                .length(Length::Exact(this_chunk))
                .build()
                .await
                .map_err(|e| write_err(key, e))?;
            // part numbers start at 1
            let part_number = (chunk_index as i32) + 1;
            let upload_part_res = self
                .client
                .upload_part()
                .key(key)
                .bucket(&self.bucket)
                .upload_id(&upload_id)
                .body(stream)
                .part_number(part_number)
                .send()
                .await
                .map_err(|e| write_err(key, e))?;
            upload_parts.push(
                CompletedPart::builder()
                    .e_tag(upload_part_res.e_tag.unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );
        }

        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(upload_parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .multipart_upload(completed_multipart_upload)
            .upload_id(&upload_id)
            .send()
            .await
            .map_err(|e| write_err(key, e))?;
        Ok(())
    }
}
