//! imgship: builds Lambda container images on CodeBuild and deploys them
//!
//! Every command drives one job to completion and removes the transient
//! resources (build project, uploaded build context, local archives) it
//! created, whether the job succeeds, fails or is interrupted.

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use imgship_common::RunId;
use imgship_common::defaults::{
    DEFAULT_BUILD_IMAGE, DEFAULT_COMPUTE_TYPE, DEFAULT_FUNCTION_TIMEOUT_SECS,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_RETRY_DELAY_SECS, DEFAULT_MEMORY_MB,
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_REGION, DEFAULT_RETRY_DELAY_SECS,
    DEFAULT_RUNTIME_VERSION, DEFAULT_SETTLE_DELAY_SECS,
};
use imgship_coordinator::aws::{
    AwsContext, AwsError, CodeBuildClient, EcrClient, IamClient, LambdaClient, S3Client,
    get_current_account_id,
};
use imgship_coordinator::config::{
    AwsConfig, BuildSettings, DeploySettings, ForgeConfig, RetrySettings,
};
use imgship_coordinator::orchestrator::{
    BuildOutcome, BuildPipeline, CleanupResult, Deployment, DeploymentProvisioner,
    DeploymentRequest, ImageRef, LogReporter, ReclaimReport,
};
use imgship_coordinator::staging::BaseImageContext;
use imgship_coordinator::wait::TokioClock;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "imgship")]
#[command(about = "Build Lambda container images on CodeBuild and deploy them")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

/// Options shared by every command
#[derive(clap::Args, Debug)]
struct CommonArgs {
    /// AWS region
    #[arg(long, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    region: String,

    /// AWS profile to use
    #[arg(long, env = "AWS_PROFILE")]
    aws_profile: Option<String>,

    /// S3 bucket for build contexts and deployment archives
    #[arg(long, env = "IMGSHIP_BUCKET")]
    bucket: String,

    /// AWS account id (looked up with STS when omitted)
    #[arg(long, env = "IMGSHIP_ACCOUNT_ID")]
    account_id: Option<String>,

    /// Seconds to wait after each IAM change
    #[arg(long, default_value_t = DEFAULT_SETTLE_DELAY_SECS)]
    settle_delay_secs: u64,

    /// Attempts for build submission, function creation and visibility checks
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Seconds between attempts
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY_SECS)]
    retry_delay_secs: u64,

    /// Double the delay after each attempt instead of keeping it fixed
    #[arg(long)]
    exponential_backoff: bool,

    /// Upper bound on the delay with --exponential-backoff
    #[arg(long, default_value_t = DEFAULT_MAX_RETRY_DELAY_SECS)]
    max_retry_delay_secs: u64,

    /// Seconds between build status polls
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    poll_interval_secs: u64,

    /// Give up on a build after this many seconds of polling (default: wait forever)
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Use the bare project name, without the per-invocation suffix.
    /// Concurrent invocations on the same image then conflict.
    #[arg(long)]
    shared_project_name: bool,

    /// CodeBuild image that runs `docker build`
    #[arg(long, default_value = DEFAULT_BUILD_IMAGE)]
    build_image: String,

    /// CodeBuild compute type
    #[arg(long, default_value = DEFAULT_COMPUTE_TYPE)]
    compute_type: String,
}

impl CommonArgs {
    fn into_config(self, deploy: DeploySettings) -> ForgeConfig {
        ForgeConfig {
            aws: AwsConfig {
                region: self.region,
                aws_profile: self.aws_profile,
                account_id: self.account_id,
                bucket: self.bucket,
            },
            build: BuildSettings {
                build_image: self.build_image,
                compute_type: self.compute_type,
                privileged: true,
                poll_interval: Duration::from_secs(self.poll_interval_secs),
                deadline: self.deadline_secs.map(Duration::from_secs),
                unique_project_names: !self.shared_project_name,
            },
            retry: RetrySettings {
                settle_delay: Duration::from_secs(self.settle_delay_secs),
                max_attempts: self.max_attempts,
                retry_delay: Duration::from_secs(self.retry_delay_secs),
                exponential: self.exponential_backoff,
                max_retry_delay: Duration::from_secs(self.max_retry_delay_secs),
            },
            deploy,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build and push a Lambda base image with a set of Python libraries
    BuildBaseImage {
        /// ECR repository (created if missing)
        #[arg(long)]
        repository: String,

        /// Image tag
        #[arg(long)]
        tag: String,

        /// Python version of the Lambda base image
        #[arg(long, default_value = DEFAULT_RUNTIME_VERSION)]
        runtime_version: String,

        /// Library to install, in pip requirement syntax (repeatable)
        #[arg(long = "library")]
        libraries: Vec<String>,
    },

    /// Build an image from an existing build context containing a buildspec.yml
    Build {
        /// Directory holding the build context
        #[arg(long)]
        source_dir: PathBuf,

        /// Name for the build project and uploaded context
        #[arg(long)]
        image_name: String,
    },

    /// Deploy a function running an already-built image
    Deploy {
        /// Directory holding the function code
        #[arg(long)]
        source_dir: PathBuf,

        /// Function name
        #[arg(long)]
        function_name: String,

        /// Namespace shared by related functions (role and archive prefix)
        #[arg(long)]
        namespace: String,

        /// ECR repository of the image
        #[arg(long)]
        repository: String,

        /// Image tag
        #[arg(long)]
        tag: String,

        /// Function memory in MB
        #[arg(long, default_value_t = DEFAULT_MEMORY_MB)]
        memory: i32,

        /// Function timeout in seconds
        #[arg(long, default_value_t = DEFAULT_FUNCTION_TIMEOUT_SECS)]
        timeout: i32,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    let suggestion = e
        .chain()
        .find_map(|cause| cause.downcast_ref::<AwsError>())
        .and_then(AwsError::suggestion);
    if let Some(suggestion) = suggestion {
        let _ = writeln!(stderr, "\n\x1b[36mHint:\x1b[0m {suggestion}");
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
                .add_directive("aws_config=warn".parse()?)
                .add_directive("aws_smithy_runtime=warn".parse()?),
        )
        .init();

    let deploy = match &args.command {
        Command::Deploy {
            memory, timeout, ..
        } => DeploySettings {
            memory_mb: *memory,
            timeout_secs: *timeout,
        },
        _ => DeploySettings {
            memory_mb: DEFAULT_MEMORY_MB,
            timeout_secs: DEFAULT_FUNCTION_TIMEOUT_SECS,
        },
    };
    let config = args.common.into_config(deploy);
    config.validate()?;

    if let Some(profile) = &config.aws.aws_profile {
        info!(profile = %profile, "Using AWS profile");
    }
    let aws = AwsContext::new(&config.aws.region, config.aws.aws_profile.as_deref()).await;
    let account = match config.configured_account_id()? {
        Some(account) => account,
        None => get_current_account_id(&aws).await?,
    };

    let run_id = RunId::new();
    info!(run_id = %run_id, account = %account, region = %config.aws.region, "Starting");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping and cleaning up");
                cancel.cancel();
            }
        }
    });

    let image_ref = |repository: String, tag: String| ImageRef {
        account_id: account.clone(),
        region: config.aws.region.clone(),
        repository,
        tag,
    };

    let iam = IamClient::from_context(&aws);
    let s3 = S3Client::from_context(&aws);
    let codebuild = CodeBuildClient::from_context(&aws);
    let ecr = EcrClient::from_context(&aws);
    let clock = TokioClock;
    let reporter = LogReporter::new();

    match args.command {
        Command::BuildBaseImage {
            repository,
            tag,
            runtime_version,
            libraries,
        } => {
            let ctx = BaseImageContext {
                image: image_ref(repository, tag),
                runtime_version,
                libraries,
            };
            let pipeline = BuildPipeline::new(
                &iam, &s3, &codebuild, &ecr, &clock, &reporter, &config, &account, &run_id,
            )
            .with_cancel(&cancel);

            let outcome = pipeline.build_base_image(&ctx).await?;
            print_build_outcome(&outcome, Some(&ctx.image.uri()));
        }

        Command::Build {
            source_dir,
            image_name,
        } => {
            let pipeline = BuildPipeline::new(
                &iam, &s3, &codebuild, &ecr, &clock, &reporter, &config, &account, &run_id,
            )
            .with_cancel(&cancel);

            let outcome = pipeline
                .build_from_directory(&source_dir, &image_name)
                .await?;
            print_build_outcome(&outcome, None);
        }

        Command::Deploy {
            source_dir,
            function_name,
            namespace,
            repository,
            tag,
            ..
        } => {
            let image = image_ref(repository, tag);
            ensure_image_exists(&ecr, &image).await?;

            let lambda = LambdaClient::from_context(&aws);
            let request = DeploymentRequest {
                source_dir,
                function_name,
                namespace,
                image,
            };
            let provisioner = DeploymentProvisioner::new(
                &iam, &s3, &lambda, &clock, &reporter, &config, &account, &run_id,
            )
            .with_cancel(&cancel);

            let deployment = provisioner.deploy(&request).await?;
            print_deployment(&deployment);
        }
    }

    Ok(())
}

/// A function can only be created against an image that is already pushed
async fn ensure_image_exists(ecr: &EcrClient, image: &ImageRef) -> Result<()> {
    if !ecr.image_exists(&image.repository, &image.tag).await? {
        bail!(
            "Image {} not found; build it first with `imgship build-base-image`",
            image.uri()
        );
    }
    Ok(())
}

fn print_build_outcome(outcome: &BuildOutcome, image_uri: Option<&str>) {
    println!("\n=== Build Report ===");
    println!("Status:   {}", outcome.status);
    if let Some(uri) = image_uri {
        println!("Image:    {uri}");
    }
    println!("Project:  {}", outcome.project_name);
    println!("Build:    {}", outcome.build_id);
    println!(
        "Polled:   {} time(s) over {}s",
        outcome.polls,
        outcome.elapsed.as_secs()
    );
    println!("Attempts: {}", outcome.submit_attempts);
    print_reclaim(&outcome.reclaim);
}

fn print_deployment(deployment: &Deployment) {
    println!("\n=== Deployment Report ===");
    println!("Function: {}", deployment.function_name);
    println!("ARN:      {}", deployment.function_arn);
    if let Some(state) = &deployment.function_state {
        println!("State:    {state}");
    }
    println!("Image:    {}", deployment.image_uri);
    println!("Archive:  {}", deployment.archive);
    println!(
        "Attempts: {} create, {} visibility",
        deployment.create_attempts, deployment.visibility_attempts
    );
    print_reclaim(&deployment.reclaim);
}

fn print_reclaim(report: &ReclaimReport) {
    use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

    if report.steps().is_empty() {
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Resource"), Cell::new("ID"), Cell::new("Cleanup")]);

    let steps = report
        .steps()
        .iter()
        .filter(|step| step.result != CleanupResult::Skipped);
    for step in steps {
        let result = match step.result {
            CleanupResult::Deleted => "deleted",
            CleanupResult::AlreadyDeleted => "already deleted",
            CleanupResult::Failed => "FAILED",
            CleanupResult::Skipped => "skipped",
        };
        table.add_row(vec![
            Cell::new(step.kind.as_str()),
            Cell::new(&step.id),
            Cell::new(result),
        ]);
    }

    println!("{table}");
    if !report.is_clean() {
        println!("Cleanup incomplete: remove the FAILED resources manually");
    }
}
