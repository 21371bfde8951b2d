//! Control-plane and object-store capabilities used by the pipeline.
//!
//! The pipeline only ever talks to the cloud through the three traits in
//! this module, bundled in a [`ControlPlane`]:
//!
//! - [`DeploymentCatalog`]: look up a stack's published outputs
//! - [`FunctionControl`]: overwrite a function's environment and invoke it asynchronously
//! - [`ObjectStore`]: put, list and get objects in the shared bucket
//!
//! [`aws::AwsControlPlane`] backs them with CloudFormation, Lambda and S3;
//! [`memory::InMemoryControlPlane`] is a scripted stand-in for tests.

pub mod aws;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RemoteError;

/// HTTP status a function returns when an `Event` invocation is queued.
pub const ASYNC_ACCEPTED_STATUS: i32 = 202;

/// One deployed stack matching a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub name: String,
    /// Last update time; `None` for stacks never updated since creation.
    pub last_updated: Option<DateTime<Utc>>,
    /// Published `(key, value)` outputs in declaration order.
    pub outputs: Vec<(String, String)>,
}

impl Deployment {
    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Acknowledgement of an asynchronous invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeAck {
    pub status_code: i32,
}

impl InvokeAck {
    pub fn accepted() -> Self {
        Self {
            status_code: ASYNC_ACCEPTED_STATUS,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status_code == ASYNC_ACCEPTED_STATUS
    }
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Present while more pages remain.
    pub next_token: Option<String>,
}

/// Lookup of deployed stacks.
#[async_trait]
pub trait DeploymentCatalog: Send + Sync {
    /// Returns every stack matching `name`, in no particular order.
    async fn describe_deployments(&self, name: &str) -> Result<Vec<Deployment>, RemoteError>;
}

/// Configuration and invocation of the worker function.
#[async_trait]
pub trait FunctionControl: Send + Sync {
    /// Replaces the function's environment with exactly `vars`.
    async fn replace_environment(
        &self,
        function: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<(), RemoteError>;

    /// Queues one asynchronous execution and returns its acknowledgement.
    async fn invoke_async(&self, function: &str) -> Result<InvokeAck, RemoteError>;
}

/// The shared bucket workers read scripts from and write results to.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), RemoteError>;

    /// Lists one page of keys under `prefix`, continuing from `token`.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> Result<ListPage, RemoteError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, RemoteError>;
}

/// The three capabilities the pipeline needs, shared behind `Arc`.
#[derive(Clone)]
pub struct ControlPlane {
    pub deployments: Arc<dyn DeploymentCatalog>,
    pub functions: Arc<dyn FunctionControl>,
    pub store: Arc<dyn ObjectStore>,
}

impl ControlPlane {
    pub fn new(
        deployments: Arc<dyn DeploymentCatalog>,
        functions: Arc<dyn FunctionControl>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            deployments,
            functions,
            store,
        }
    }

    /// Uses one value for all three capabilities.
    pub fn from_shared<T>(backend: Arc<T>) -> Self
    where
        T: DeploymentCatalog + FunctionControl + ObjectStore + 'static,
    {
        Self::new(backend.clone(), backend.clone(), backend)
    }
}

/// Lists every key under `prefix`, following continuation tokens to the end.
pub async fn list_all_keys(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<String>, RemoteError> {
    let mut keys = Vec::new();
    let mut token = None;
    loop {
        let page = store.list_objects(bucket, prefix, token).await?;
        keys.extend(page.keys);
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryControlPlane;
    use super::*;

    #[test]
    fn test_invoke_ack() {
        assert!(InvokeAck::accepted().is_accepted());
        assert!(!InvokeAck { status_code: 200 }.is_accepted());
        assert!(!InvokeAck { status_code: 429 }.is_accepted());
    }

    #[test]
    fn test_deployment_output_lookup() {
        let deployment = Deployment {
            name: "stack".to_string(),
            last_updated: None,
            outputs: vec![("BucketName".to_string(), "bucket-1".to_string())],
        };
        assert_eq!(deployment.output("BucketName"), Some("bucket-1"));
        assert_eq!(deployment.output("LambdaArn"), None);
    }

    #[tokio::test]
    async fn test_list_all_keys_independent_of_page_size() {
        let mut expected: Vec<String> = (0..23).map(|i| format!("run/result-{i:02}")).collect();
        expected.sort();

        for page_size in [1, 2, 5, 7, 23, 100] {
            let store = InMemoryControlPlane::new().with_page_size(page_size);
            for key in &expected {
                store.insert_object("bucket", key, b"ok".to_vec()).await;
            }
            store.insert_object("bucket", "other/result-x", b"no".to_vec()).await;

            let keys = list_all_keys(&store, "bucket", "run/result").await.unwrap();
            assert_eq!(keys, expected, "page size {page_size}");
        }
    }

    #[tokio::test]
    async fn test_list_all_keys_counts_pages() {
        let store = InMemoryControlPlane::new().with_page_size(4);
        for i in 0..10 {
            store
                .insert_object("bucket", &format!("p/{i}"), Vec::new())
                .await;
        }

        let keys = list_all_keys(&store, "bucket", "p/").await.unwrap();
        assert_eq!(keys.len(), 10);
        assert_eq!(store.list_calls().await, 3);
    }

    #[tokio::test]
    async fn test_list_all_keys_empty_prefix() {
        let store = InMemoryControlPlane::new();
        let keys = list_all_keys(&store, "bucket", "nothing/").await.unwrap();
        assert!(keys.is_empty());
        assert_eq!(store.list_calls().await, 1);
    }
}
