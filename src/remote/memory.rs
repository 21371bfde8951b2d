//! In-memory control plane.
//!
//! Implements every capability trait against process-local state so the
//! pipeline can be exercised end to end without a cloud account. Failures,
//! invocation acknowledgements and listing page sizes are scripted with
//! builder methods, and every call is recorded for later assertions.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    Deployment, DeploymentCatalog, FunctionControl, InvokeAck, ListPage, ObjectStore,
};
use crate::error::RemoteError;

const DEFAULT_PAGE_SIZE: usize = 1000;

/// A recorded call against the in-memory control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    DescribeDeployments { name: String },
    ReplaceEnvironment { function: String },
    Invoke { function: String },
    PutObject { bucket: String, key: String },
    ListObjects { bucket: String, prefix: String, token: Option<String> },
    GetObject { bucket: String, key: String },
}

/// Scripted acknowledgement for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedAck {
    Status(i32),
    Error(String),
}

#[derive(Default)]
struct Inner {
    deployments: Vec<Deployment>,
    describe_error: Option<String>,
    environments: HashMap<String, BTreeMap<String, String>>,
    acks: VecDeque<ScriptedAck>,
    simulate_workers: bool,
    workers_started: usize,
    objects: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    page_size: usize,
    hidden_listings: usize,
    environment_error: Option<String>,
    put_error: Option<String>,
    list_error: Option<String>,
    get_errors: HashSet<String>,
    calls: Vec<Call>,
}

/// Process-local implementation of [`DeploymentCatalog`], [`FunctionControl`]
/// and [`ObjectStore`].
pub struct InMemoryControlPlane {
    inner: Mutex<Inner>,
}

impl Default for InMemoryControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                page_size: DEFAULT_PAGE_SIZE,
                ..Inner::default()
            }),
        }
    }

    /// Adds a stack returned by name lookups.
    pub fn with_deployment(mut self, deployment: Deployment) -> Self {
        self.inner.get_mut().deployments.push(deployment);
        self
    }

    /// Makes every stack lookup fail.
    pub fn with_describe_error(mut self, message: impl Into<String>) -> Self {
        self.inner.get_mut().describe_error = Some(message.into());
        self
    }

    /// Queues acknowledgements for upcoming invocations; afterwards every
    /// invocation is accepted.
    pub fn with_acks(mut self, acks: impl IntoIterator<Item = ScriptedAck>) -> Self {
        self.inner.get_mut().acks.extend(acks);
        self
    }

    /// Each accepted invocation writes one result object, the way a real
    /// worker would once its run finishes.
    pub fn with_simulated_workers(mut self) -> Self {
        self.inner.get_mut().simulate_workers = true;
        self
    }

    /// Maximum keys returned per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.inner.get_mut().page_size = page_size.max(1);
        self
    }

    /// The first `count` listings report nothing, as if workers were still running.
    pub fn with_hidden_listings(mut self, count: usize) -> Self {
        self.inner.get_mut().hidden_listings = count;
        self
    }

    pub fn with_environment_error(mut self, message: impl Into<String>) -> Self {
        self.inner.get_mut().environment_error = Some(message.into());
        self
    }

    pub fn with_put_error(mut self, message: impl Into<String>) -> Self {
        self.inner.get_mut().put_error = Some(message.into());
        self
    }

    pub fn with_list_error(mut self, message: impl Into<String>) -> Self {
        self.inner.get_mut().list_error = Some(message.into());
        self
    }

    /// Fetching `key` fails.
    pub fn with_get_error(mut self, key: impl Into<String>) -> Self {
        self.inner.get_mut().get_errors.insert(key.into());
        self
    }

    pub async fn insert_object(&self, bucket: &str, key: &str, body: Vec<u8>) {
        self.inner
            .lock()
            .await
            .objects
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body);
    }

    pub async fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .await
            .objects
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
    }

    pub async fn environment(&self, function: &str) -> Option<BTreeMap<String, String>> {
        self.inner.lock().await.environments.get(function).cloned()
    }

    pub async fn set_environment(&self, function: &str, vars: BTreeMap<String, String>) {
        self.inner
            .lock()
            .await
            .environments
            .insert(function.to_string(), vars);
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn invoke_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, Call::Invoke { .. })).await
    }

    pub async fn list_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, Call::ListObjects { .. })).await
    }

    async fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.inner.lock().await.calls.iter().filter(|c| pred(c)).count()
    }
}

impl Inner {
    fn start_worker(&mut self, function: &str) {
        let Some(env) = self.environments.get(function) else {
            return;
        };
        let (Some(bucket), Some(prefix)) = (env.get("S3_BUCKET"), env.get("S3_RESULT_BASE_KEY"))
        else {
            return;
        };

        self.workers_started += 1;
        let key = format!("{}/worker-{:03}.txt", prefix, self.workers_started);
        let body = format!(
            "worker={} url={} duration={}\n",
            self.workers_started,
            env.get("WRK_URL").map(String::as_str).unwrap_or_default(),
            env.get("WRK_DURATION").map(String::as_str).unwrap_or_default(),
        );
        let bucket = bucket.clone();
        self.objects
            .entry(bucket)
            .or_default()
            .insert(key, body.into_bytes());
    }
}

#[async_trait]
impl DeploymentCatalog for InMemoryControlPlane {
    async fn describe_deployments(&self, name: &str) -> Result<Vec<Deployment>, RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::DescribeDeployments {
            name: name.to_string(),
        });

        if let Some(message) = &inner.describe_error {
            return Err(RemoteError::call("DescribeStacks", message.clone()));
        }

        Ok(inner
            .deployments
            .iter()
            .filter(|d| d.name == name)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FunctionControl for InMemoryControlPlane {
    async fn replace_environment(
        &self,
        function: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::ReplaceEnvironment {
            function: function.to_string(),
        });

        if let Some(message) = &inner.environment_error {
            return Err(RemoteError::call(
                "UpdateFunctionConfiguration",
                message.clone(),
            ));
        }

        inner
            .environments
            .insert(function.to_string(), vars.clone());
        Ok(())
    }

    async fn invoke_async(&self, function: &str) -> Result<InvokeAck, RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::Invoke {
            function: function.to_string(),
        });

        let ack = match inner.acks.pop_front() {
            Some(ScriptedAck::Error(message)) => return Err(RemoteError::call("Invoke", message)),
            Some(ScriptedAck::Status(status_code)) => InvokeAck { status_code },
            None => InvokeAck::accepted(),
        };

        if ack.is_accepted() && inner.simulate_workers {
            inner.start_worker(function);
        }
        Ok(ack)
    }
}

#[async_trait]
impl ObjectStore for InMemoryControlPlane {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::PutObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });

        if let Some(message) = &inner.put_error {
            return Err(RemoteError::call("PutObject", message.clone()));
        }

        inner
            .objects
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body);
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> Result<ListPage, RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::ListObjects {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            token: token.clone(),
        });

        if let Some(message) = &inner.list_error {
            return Err(RemoteError::call("ListObjectsV2", message.clone()));
        }
        if inner.hidden_listings > 0 {
            inner.hidden_listings -= 1;
            return Ok(ListPage::default());
        }

        // The continuation token is the last key of the previous page.
        let page_size = inner.page_size;
        let mut matching = inner
            .objects
            .get(bucket)
            .into_iter()
            .flat_map(|objects| objects.keys())
            .filter(|key| key.starts_with(prefix))
            .filter(|key| token.as_deref().map_or(true, |after| key.as_str() > after));

        let keys: Vec<String> = matching.by_ref().take(page_size).cloned().collect();
        let next_token = match matching.next() {
            Some(_) => keys.last().cloned(),
            None => None,
        };

        Ok(ListPage { keys, next_token })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::GetObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });

        if inner.get_errors.contains(key) {
            return Err(RemoteError::call("GetObject", format!("injected failure for {key}")));
        }

        inner
            .objects
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| RemoteError::call("GetObject", format!("NoSuchKey: {bucket}/{key}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_acks_then_default_accept() {
        let plane = InMemoryControlPlane::new().with_acks([
            ScriptedAck::Status(202),
            ScriptedAck::Status(500),
            ScriptedAck::Error("throttled".to_string()),
        ]);

        assert!(plane.invoke_async("fn").await.unwrap().is_accepted());
        assert_eq!(plane.invoke_async("fn").await.unwrap().status_code, 500);
        assert!(plane.invoke_async("fn").await.is_err());
        assert!(plane.invoke_async("fn").await.unwrap().is_accepted());
        assert_eq!(plane.invoke_calls().await, 4);
    }

    #[tokio::test]
    async fn test_simulated_worker_uses_pushed_environment() {
        let plane = InMemoryControlPlane::new().with_simulated_workers();
        let vars: BTreeMap<String, String> = [
            ("S3_BUCKET", "bucket"),
            ("S3_RESULT_BASE_KEY", "20240101000000/result"),
            ("WRK_URL", "https://example.com"),
            ("WRK_DURATION", "10s"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        plane.replace_environment("fn", &vars).await.unwrap();

        plane.invoke_async("fn").await.unwrap();

        let body = plane
            .object("bucket", "20240101000000/result/worker-001.txt")
            .await
            .expect("worker wrote its result");
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "worker=1 url=https://example.com duration=10s\n"
        );
    }

    #[tokio::test]
    async fn test_replace_environment_overwrites() {
        let plane = InMemoryControlPlane::new();
        let mut old = BTreeMap::new();
        old.insert("STALE".to_string(), "1".to_string());
        plane.set_environment("fn", old).await;

        let mut new = BTreeMap::new();
        new.insert("FRESH".to_string(), "2".to_string());
        plane.replace_environment("fn", &new).await.unwrap();

        let env = plane.environment("fn").await.unwrap();
        assert!(!env.contains_key("STALE"));
        assert_eq!(env.get("FRESH").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_hidden_listings() {
        let plane = InMemoryControlPlane::new().with_hidden_listings(1);
        plane.insert_object("b", "p/1", Vec::new()).await;

        assert!(plane.list_objects("b", "p/", None).await.unwrap().keys.is_empty());
        assert_eq!(plane.list_objects("b", "p/", None).await.unwrap().keys.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_object_fails() {
        let plane = InMemoryControlPlane::new();
        let err = plane.get_object("b", "missing").await.unwrap_err();
        assert!(err.to_string().contains("NoSuchKey"));
    }
}
