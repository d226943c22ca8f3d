//! Object-store listing for the upload bucket.

use std::collections::HashSet;

use aws_sdk_s3::Client;

/// Errors from the object-store listing.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Listing s3://{bucket}/{prefix} failed: {message}")]
    List {
        bucket: String,
        prefix: String,
        message: String,
    },
}

/// Lists object keys under a fixed bucket/prefix.
pub struct StorageLister {
    client: Client,
    bucket: String,
    prefix: String,
}

impl StorageLister {
    pub fn new(
        sdk_config: &aws_config::SdkConfig,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(sdk_config),
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// List every object key under the configured prefix, stripped of
    /// that prefix. The result is a set so reconciliation membership
    /// tests stay O(1) per asset.
    pub async fn list_keys(&self) -> Result<HashSet<String>, StorageError> {
        let mut keys = HashSet::new();

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| StorageError::List {
                bucket: self.bucket.clone(),
                prefix: self.prefix.clone(),
                message: e.to_string(),
            })?;

            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let stripped = key.strip_prefix(self.prefix.as_str()).unwrap_or(key);
                // The prefix itself comes back as an empty key.
                if !stripped.is_empty() {
                    keys.insert(stripped.to_string());
                }
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            prefix = %self.prefix,
            count = keys.len(),
            "Listed storage keys",
        );
        Ok(keys)
    }
}
