//! AWS implementation of the control-plane capabilities.
//!
//! Stacks are read from CloudFormation, the worker is a Lambda function
//! invoked with the `Event` invocation type, and the shared bucket is S3.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_cloudformation::types::Stack;
use aws_sdk_lambda::types::{Environment, InvocationType};
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, DateTime as AwsDateTime};
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Deployment, DeploymentCatalog, FunctionControl, InvokeAck, ListPage, ObjectStore};
use crate::error::RemoteError;
use crate::pipeline::config::AwsIdentity;

const CREDENTIALS_PROVIDER_NAME: &str = "wrk2-fleet";

/// CloudFormation, Lambda and S3 clients sharing one SDK configuration.
#[derive(Debug, Clone)]
pub struct AwsControlPlane {
    cloudformation: aws_sdk_cloudformation::Client,
    lambda: aws_sdk_lambda::Client,
    s3: aws_sdk_s3::Client,
}

impl AwsControlPlane {
    /// Builds clients for `region` authenticated as `identity`.
    ///
    /// Credentials are resolved lazily; a bad key pair or unknown profile
    /// surfaces on the first call.
    pub async fn connect(identity: &AwsIdentity, region: &str) -> Self {
        let loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()));
        let loader = match identity {
            AwsIdentity::StaticKeys { access_key, secret } => {
                loader.credentials_provider(Credentials::new(
                    access_key.clone(),
                    secret.clone(),
                    None,
                    None,
                    CREDENTIALS_PROVIDER_NAME,
                ))
            }
            AwsIdentity::Profile(name) => loader.profile_name(name),
        };
        let config = loader.load().await;
        debug!(region, "Loaded AWS configuration");

        Self {
            cloudformation: aws_sdk_cloudformation::Client::new(&config),
            lambda: aws_sdk_lambda::Client::new(&config),
            s3: aws_sdk_s3::Client::new(&config),
        }
    }
}

fn call_error<E>(operation: &'static str, err: E) -> RemoteError
where
    E: std::error::Error,
{
    RemoteError::call(operation, DisplayErrorContext(err).to_string())
}

fn to_utc(at: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(at.secs(), at.subsec_nanos())
}

fn deployment_from_stack(stack: &Stack) -> Deployment {
    Deployment {
        name: stack.stack_name().unwrap_or_default().to_string(),
        last_updated: stack.last_updated_time().and_then(to_utc),
        outputs: stack
            .outputs()
            .iter()
            .filter_map(|o| Some((o.output_key()?.to_string(), o.output_value()?.to_string())))
            .collect(),
    }
}

/// Continuation token to follow, if the listing says more pages remain.
fn continuation(is_truncated: Option<bool>, token: Option<&str>) -> Option<String> {
    if is_truncated.unwrap_or(false) {
        token.map(str::to_string)
    } else {
        None
    }
}

#[async_trait]
impl DeploymentCatalog for AwsControlPlane {
    async fn describe_deployments(&self, name: &str) -> Result<Vec<Deployment>, RemoteError> {
        debug!(stack = name, "DescribeStacks");
        let output = match self.cloudformation.describe_stacks().stack_name(name).send().await {
            Ok(output) => output,
            Err(err) => {
                let message = DisplayErrorContext(&err).to_string();
                // CloudFormation reports an unknown stack name as a validation error.
                if message.contains("does not exist") {
                    return Ok(Vec::new());
                }
                return Err(RemoteError::call("DescribeStacks", message));
            }
        };

        Ok(output.stacks().iter().map(deployment_from_stack).collect())
    }
}

#[async_trait]
impl FunctionControl for AwsControlPlane {
    async fn replace_environment(
        &self,
        function: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<(), RemoteError> {
        debug!(function, variables = vars.len(), "UpdateFunctionConfiguration");
        let variables: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        self.lambda
            .update_function_configuration()
            .function_name(function)
            .environment(Environment::builder().set_variables(Some(variables)).build())
            .send()
            .await
            .map_err(|e| call_error("UpdateFunctionConfiguration", e))?;
        Ok(())
    }

    async fn invoke_async(&self, function: &str) -> Result<InvokeAck, RemoteError> {
        let output = self
            .lambda
            .invoke()
            .function_name(function)
            .invocation_type(InvocationType::Event)
            .send()
            .await
            .map_err(|e| call_error("Invoke", e))?;

        debug!(function, status_code = output.status_code(), "Invoke");
        Ok(InvokeAck {
            status_code: output.status_code(),
        })
    }
}

#[async_trait]
impl ObjectStore for AwsControlPlane {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), RemoteError> {
        debug!(bucket, key, bytes = body.len(), "PutObject");
        self.s3
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| call_error("PutObject", e))?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> Result<ListPage, RemoteError> {
        debug!(bucket, prefix, continued = token.is_some(), "ListObjectsV2");
        let output = self
            .s3
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| call_error("ListObjectsV2", e))?;

        Ok(ListPage {
            keys: output
                .contents()
                .iter()
                .filter_map(|o| o.key().map(str::to_string))
                .collect(),
            next_token: continuation(output.is_truncated(), output.next_continuation_token()),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, RemoteError> {
        debug!(bucket, key, "GetObject");
        let output = self
            .s3
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| call_error("GetObject", e))?;

        let body = output.body.collect().await.map_err(|e| RemoteError::Body {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(body.into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_utc() {
        let at = AwsDateTime::from_secs(1_700_000_000);
        let converted = to_utc(&at).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
        assert_eq!(converted.to_rfc3339(), "2023-11-14T22:13:20+00:00");
    }

    #[test]
    fn test_continuation_requires_truncation() {
        assert_eq!(continuation(Some(true), Some("t1")), Some("t1".to_string()));
        assert_eq!(continuation(Some(false), Some("t1")), None);
        assert_eq!(continuation(None, Some("t1")), None);
        assert_eq!(continuation(Some(true), None), None);
    }

    #[test]
    fn test_call_error_names_operation() {
        let err = call_error(
            "Invoke",
            std::io::Error::other("throttled"),
        );
        let message = err.to_string();
        assert!(message.starts_with("Invoke failed: "));
        assert!(message.contains("throttled"));
    }

    #[tokio::test]
    async fn test_connect_builds_clients_offline() {
        let identity = AwsIdentity::StaticKeys {
            access_key: "AKIDEXAMPLE".to_string(),
            secret: "secret".to_string(),
        };
        let plane = AwsControlPlane::connect(&identity, "ap-northeast-1").await;
        assert_eq!(
            plane.s3.config().region().map(|r| r.as_ref()),
            Some("ap-northeast-1")
        );
    }
}
