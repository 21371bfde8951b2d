//! CLI command definitions for wrk2-fleet.
//!
//! This module provides the command-line surface for running a distributed
//! wrk2 load test against a deployed worker stack.

use crate::pipeline::{
    stages, AwsIdentity, ConfigError, Pipeline, ProgressSink, RunConfig, RunOutcome,
    SpinnerProgress, TracingProgress, WorkerTuning,
};
use crate::remote::aws::AwsControlPlane;
use crate::remote::ControlPlane;
use clap::{Args, Parser};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Distributed wrk2 load testing on AWS Lambda.
#[derive(Parser)]
#[command(name = "wrk2-fleet")]
#[command(about = "Run wrk2 load tests from many AWS Lambda workers at once")]
#[command(version)]
#[command(
    long_about = "wrk2-fleet pushes wrk2 settings to a deployed Lambda worker, invokes it N times, waits for every worker to write its result to S3 and downloads the results.\n\nExample usage:\n  wrk2-fleet run --aws-profile default --aws-region ap-northeast-1 --aws-stackname wrk2 \\\n    --parallel 4 --output-dir-path ./out --wrk2-thread 2 --wrk2-connection 100 \\\n    --wrk2-duration 30s --wrk2-request-per-sec 500 --wrk2-timeout 5 \\\n    --wrk2-url https://example.com/ --wrk2-script-path ./get.lua"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    ///
    /// Defaults to `warn` while the progress spinner is shown, `info` otherwise.
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Log filter to use when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> String {
        if let Some(level) = &self.log_level {
            return level.clone();
        }
        match &self.command {
            Commands::Run(args) if args.use_spinner() => "warn".to_string(),
            _ => "info".to_string(),
        }
    }
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a load test and download every worker's result.
    Run(Box<RunArgs>),

    /// Print the bucket and function published by a stack.
    Outputs(OutputsArgs),
}

/// AWS identity, region and stack selection shared by every command.
#[derive(Args, Debug, Clone)]
pub struct AwsArgs {
    /// AWS access key id (requires --aws-secret).
    #[arg(long)]
    pub aws_key: Option<String>,

    /// AWS secret access key (requires --aws-key).
    #[arg(long)]
    pub aws_secret: Option<String>,

    /// Named profile from the shared credentials file.
    #[arg(long, conflicts_with_all = ["aws_key", "aws_secret"])]
    pub aws_profile: Option<String>,

    /// Region the stack is deployed in.
    #[arg(long, env = "AWS_REGION")]
    pub aws_region: String,

    /// CloudFormation stack publishing BucketName and LambdaArn outputs.
    #[arg(long, env = "AWS_STACK_NAME")]
    pub aws_stackname: String,
}

impl AwsArgs {
    fn identity(&self) -> Result<AwsIdentity, ConfigError> {
        AwsIdentity::from_parts(
            self.aws_key.as_deref(),
            self.aws_secret.as_deref(),
            self.aws_profile.as_deref(),
        )
    }
}

/// Arguments for `wrk2-fleet run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub aws: AwsArgs,

    /// Number of workers to invoke.
    #[arg(long)]
    pub parallel: u32,

    /// Directory results are downloaded into.
    #[arg(long)]
    pub output_dir_path: PathBuf,

    /// wrk2 threads per worker.
    #[arg(long)]
    pub wrk2_thread: u32,

    /// wrk2 connections per worker.
    #[arg(long)]
    pub wrk2_connection: u32,

    /// wrk2 duration, e.g. 30s, 2m or 1h.
    #[arg(long)]
    pub wrk2_duration: String,

    /// wrk2 constant request rate per worker.
    #[arg(long)]
    pub wrk2_request_per_sec: u32,

    /// wrk2 socket timeout in seconds.
    #[arg(long)]
    pub wrk2_timeout: u32,

    /// Target URL.
    #[arg(long)]
    pub wrk2_url: String,

    /// Local wrk2 Lua script.
    #[arg(long)]
    pub wrk2_script_path: PathBuf,

    /// Output a JSON summary to stdout instead of interactive progress.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Report progress as log lines only.
    #[arg(long)]
    pub no_spinner: bool,
}

impl RunArgs {
    /// Builds and validates the run configuration.
    pub fn to_config(&self) -> Result<RunConfig, ConfigError> {
        let config = RunConfig::new(
            self.aws.identity()?,
            self.aws.aws_region.clone(),
            self.aws.aws_stackname.clone(),
            self.parallel,
            self.output_dir_path.clone(),
            WorkerTuning {
                threads: self.wrk2_thread,
                connections: self.wrk2_connection,
                duration: self.wrk2_duration.clone(),
                requests_per_sec: self.wrk2_request_per_sec,
                timeout_secs: self.wrk2_timeout,
                url: self.wrk2_url.clone(),
                script_path: self.wrk2_script_path.clone(),
            },
        );
        config.validate()?;
        Ok(config)
    }

    fn use_spinner(&self) -> bool {
        !self.json && !self.no_spinner
    }
}

/// Arguments for `wrk2-fleet outputs`.
#[derive(Parser, Debug)]
pub struct OutputsArgs {
    #[command(flatten)]
    pub aws: AwsArgs,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct OutputsSummary<'a> {
    stack: &'a str,
    bucket: &'a str,
    function: &'a str,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_load_test_command(*args).await,
        Commands::Outputs(args) => run_outputs_command(args).await,
    }
}

async fn run_load_test_command(args: RunArgs) -> anyhow::Result<()> {
    let config = args.to_config()?;
    let backend = AwsControlPlane::connect(&config.identity, &config.region).await;
    let plane = ControlPlane::from_shared(Arc::new(backend));

    let spinner = args.use_spinner().then(|| Arc::new(SpinnerProgress::new()));
    let progress: Arc<dyn ProgressSink> = match &spinner {
        Some(spinner) => spinner.clone() as Arc<dyn ProgressSink>,
        None => Arc::new(TracingProgress),
    };

    let outcome = execute(config, plane, progress).await;
    if let Some(spinner) = &spinner {
        spinner.finish();
    }
    let outcome = outcome?;

    if args.json {
        let json_output = serde_json::to_string_pretty(&outcome)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
    } else {
        println!("done. check results in {}", outcome.output_dir.display());
    }
    Ok(())
}

/// Runs one load test against `plane`.
pub async fn execute(
    config: RunConfig,
    plane: ControlPlane,
    progress: Arc<dyn ProgressSink>,
) -> anyhow::Result<RunOutcome> {
    let pipeline = Pipeline::new(config, plane, progress)?;
    match pipeline.run().await {
        Ok(outcome) => {
            info!(
                exec_id = %outcome.exec_id,
                files = outcome.downloaded.len(),
                "Load test completed"
            );
            Ok(outcome)
        }
        Err(err) => {
            if err.is_completion_timeout() {
                warn!("Workers may still be running; their results will land in the bucket later");
            }
            Err(err.into())
        }
    }
}

async fn run_outputs_command(args: OutputsArgs) -> anyhow::Result<()> {
    let identity = args.aws.identity()?;
    let backend = AwsControlPlane::connect(&identity, &args.aws.aws_region).await;
    let outputs = stages::resolve_outputs(&backend, &args.aws.aws_stackname).await?;

    if args.json {
        let summary = OutputsSummary {
            stack: &args.aws.aws_stackname,
            bucket: &outputs.bucket,
            function: &outputs.function,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Stack:    {}", args.aws.aws_stackname);
        println!("Bucket:   {}", outputs.bucket);
        println!("Function: {}", outputs.function);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::InMemoryControlPlane;
    use crate::remote::Deployment;
    use clap::CommandFactory;
    use std::path::Path;

    fn run_args(extra: &[&str]) -> Vec<String> {
        let mut args: Vec<String> = [
            "wrk2-fleet",
            "run",
            "--aws-region",
            "ap-northeast-1",
            "--aws-stackname",
            "wrk2",
            "--parallel",
            "4",
            "--output-dir-path",
            "./out",
            "--wrk2-thread",
            "2",
            "--wrk2-connection",
            "100",
            "--wrk2-duration",
            "30s",
            "--wrk2-request-per-sec",
            "500",
            "--wrk2-timeout",
            "5",
            "--wrk2-url",
            "https://example.com/",
            "--wrk2-script-path",
            "scripts/get.lua",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        // flags already present get their value replaced
        let mut rest = extra.iter();
        while let Some(arg) = rest.next() {
            match args.iter().position(|a| a == arg) {
                Some(i) => {
                    if let Some(value) = rest.next() {
                        args[i + 1] = value.to_string();
                    }
                }
                None => args.push(arg.to_string()),
            }
        }
        args
    }

    fn parse_run(extra: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(run_args(extra)).expect("should parse");
        match cli.command {
            Commands::Run(args) => *args,
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_with_profile() {
        let args = parse_run(&["--aws-profile", "loadtest"]);
        assert!(!args.json);
        assert!(args.use_spinner());

        let config = args.to_config().unwrap();
        assert_eq!(config.identity, AwsIdentity::Profile("loadtest".to_string()));
        assert_eq!(config.region, "ap-northeast-1");
        assert_eq!(config.stack_name, "wrk2");
        assert_eq!(config.parallel, 4);
        assert_eq!(config.output_dir, Path::new("./out"));
        assert_eq!(config.worker.threads, 2);
        assert_eq!(config.worker.connections, 100);
        assert_eq!(config.worker.duration, "30s");
        assert_eq!(config.worker.requests_per_sec, 500);
        assert_eq!(config.worker.timeout_secs, 5);
        assert_eq!(config.worker.url, "https://example.com/");
        assert_eq!(config.worker.script_path, Path::new("scripts/get.lua"));
    }

    #[test]
    fn test_run_command_with_key_pair() {
        let args = parse_run(&["--aws-key", "AKID", "--aws-secret", "s3cr3t", "--json"]);
        assert!(args.json);
        assert!(!args.use_spinner());

        let config = args.to_config().unwrap();
        assert_eq!(
            config.identity,
            AwsIdentity::StaticKeys {
                access_key: "AKID".to_string(),
                secret: "s3cr3t".to_string(),
            }
        );
    }

    #[test]
    fn test_run_command_profile_conflicts_with_keys() {
        let result = Cli::try_parse_from(run_args(&[
            "--aws-profile",
            "p",
            "--aws-key",
            "AKID",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_run_command_missing_credentials() {
        let err = parse_run(&[]).to_config().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "aws_credentials" }));

        let err = parse_run(&["--aws-key", "AKID"]).to_config().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "aws_credentials" }));
    }

    #[test]
    fn test_run_command_invalid_values() {
        let err = parse_run(&["--aws-profile", "p", "--parallel", "0"])
            .to_config()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "parallel" }));

        let err = parse_run(&["--aws-profile", "p", "--wrk2-duration", "30"])
            .to_config()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "wrk2_duration" }));
    }

    #[test]
    fn test_run_command_requires_tuning() {
        let result = Cli::try_parse_from([
            "wrk2-fleet",
            "run",
            "--aws-region",
            "r",
            "--aws-stackname",
            "s",
            "--aws-profile",
            "p",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_outputs_command() {
        let cli = Cli::try_parse_from([
            "wrk2-fleet",
            "outputs",
            "--aws-profile",
            "p",
            "--aws-region",
            "us-east-1",
            "--aws-stackname",
            "wrk2",
            "-j",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Outputs(args) => {
                assert!(args.json);
                assert_eq!(args.aws.aws_stackname, "wrk2");
                assert_eq!(args.aws.identity().unwrap(), AwsIdentity::Profile("p".to_string()));
            }
            _ => panic!("Expected Outputs command"),
        }
    }

    #[test]
    fn test_log_level_is_global() {
        let mut args = run_args(&["--aws-profile", "p"]);
        args.extend(["--log-level".to_string(), "debug".to_string()]);
        let cli = Cli::try_parse_from(args).expect("should parse");
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_filter(), "debug");
    }

    #[test]
    fn test_log_filter_quiet_under_spinner() {
        let cli = Cli::try_parse_from(run_args(&["--aws-profile", "p"])).expect("should parse");
        assert_eq!(cli.log_filter(), "warn");

        let cli = Cli::try_parse_from(run_args(&["--aws-profile", "p", "--no-spinner"]))
            .expect("should parse");
        assert_eq!(cli.log_filter(), "info");

        let cli = Cli::try_parse_from(run_args(&["--aws-profile", "p", "--json"]))
            .expect("should parse");
        assert_eq!(cli.log_filter(), "info");
    }

    #[test]
    fn test_run_args_override_replaces_default() {
        let args = run_args(&["--parallel", "0", "--json"]);
        assert_eq!(args.iter().filter(|a| *a == "--parallel").count(), 1);
        let i = args.iter().position(|a| a == "--parallel").unwrap();
        assert_eq!(args[i + 1], "0");
        assert_eq!(args.last().map(String::as_str), Some("--json"));
    }

    #[tokio::test]
    async fn test_execute_surfaces_pipeline_error() {
        let backend = Arc::new(InMemoryControlPlane::new());
        let config = parse_run(&["--aws-profile", "p"]).to_config().unwrap();

        let err = execute(
            config,
            ControlPlane::from_shared(backend.clone()),
            Arc::new(TracingProgress),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("no AWS stack named 'wrk2'"));
        assert_eq!(backend.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_execute_rejects_invalid_config_before_remote_calls() {
        let backend = Arc::new(InMemoryControlPlane::new().with_deployment(Deployment {
            name: "wrk2".to_string(),
            last_updated: None,
            outputs: Vec::new(),
        }));
        let mut config = parse_run(&["--aws-profile", "p"]).to_config().unwrap();
        config.worker.url = String::new();

        let err = execute(
            config,
            ControlPlane::from_shared(backend.clone()),
            Arc::new(TracingProgress),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("wrk2_url"));
        assert!(backend.calls().await.is_empty());
    }
}
