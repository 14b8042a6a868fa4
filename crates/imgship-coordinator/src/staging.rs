//! Base-image build context staging
//!
//! Renders the four files CodeBuild needs to build and push a Lambda base
//! image into a fresh temporary directory:
//!
//! - `requirements.txt`: one library specifier per line
//! - `Dockerfile`: AWS Lambda Python base image plus the requirements
//! - `buildspec.yml`: ECR login, `docker build`, tag and push
//! - `lambda_function.py`: handler that fetches the deployment archive the
//!   function was registered with and dispatches to its `main.handler`

use crate::config::{ConfigError, validate_name};
use crate::orchestrator::types::ImageRef;
use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::debug;

/// Handler baked into every base image
const FUNCTION_HANDLER: &str = r#"import importlib
import os
import sys
import zipfile

import boto3

_loaded = None


def _load():
    global _loaded
    if _loaded is None:
        bucket = os.environ["bucket"]
        api_id = os.environ["api_id"]
        name = os.environ["function_name"]
        target = os.path.join("/tmp", name)
        if not os.path.isdir(target):
            archive = target + ".zip"
            boto3.client("s3").download_file(bucket, api_id + "/" + name + ".zip", archive)
            with zipfile.ZipFile(archive) as z:
                z.extractall(target)
            os.remove(archive)
        sys.path.insert(0, target)
        _loaded = importlib.import_module("main")
    return _loaded


def handler(event, context):
    return _load().handler(event, context)
"#;

/// Characters that would break out of the quoted shell strings in buildspec
const FORBIDDEN: &[char] = &['"', '\\', '`', '$', '\n', '\r'];

/// Everything needed to render a base-image build context
#[derive(Debug, Clone)]
pub struct BaseImageContext {
    /// Where the built image is pushed
    pub image: ImageRef,
    /// Python version of the Lambda base image (e.g. `3.8`)
    pub runtime_version: String,
    /// Library specifiers installed with pip
    pub libraries: Vec<String>,
}

impl BaseImageContext {
    /// Reject values that would produce a broken Dockerfile or buildspec
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name("repository", &self.image.repository, &['-', '_', '.', '/'], 256)?;
        validate_name("image tag", &self.image.tag, &['-', '_', '.'], 128)?;

        let version_ok = self
            .runtime_version
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
        if !version_ok {
            return Err(ConfigError::InvalidName {
                field: "runtime version",
                value: self.runtime_version.clone(),
                reason: "expected dotted digits such as 3.8",
            });
        }

        for library in &self.libraries {
            if library.trim().is_empty() {
                return Err(ConfigError::InvalidName {
                    field: "library",
                    value: library.clone(),
                    reason: "cannot be empty",
                });
            }
            if library.chars().any(|c| FORBIDDEN.contains(&c)) {
                return Err(ConfigError::InvalidName {
                    field: "library",
                    value: library.clone(),
                    reason: "contains a forbidden character",
                });
            }
        }
        Ok(())
    }

    /// Docker label recording the installed libraries
    pub fn label(&self) -> String {
        format!("libraries={}", self.libraries.join(","))
    }
}

pub fn render_requirements(libraries: &[String]) -> String {
    libraries
        .iter()
        .map(|lib| format!("{}\n", lib.trim()))
        .collect()
}

pub fn render_dockerfile(runtime_version: &str) -> String {
    format!(
        r#"FROM public.ecr.aws/lambda/python:{runtime_version}

COPY requirements.txt ./
RUN pip3 install --no-cache-dir -r requirements.txt

COPY lambda_function.py ./

CMD ["lambda_function.handler"]
"#
    )
}

pub fn render_buildspec(ctx: &BaseImageContext) -> String {
    let registry = ctx.image.registry();
    let region = &ctx.image.region;
    let local = format!("{}:{}", ctx.image.repository, ctx.image.tag);
    let remote = ctx.image.uri();
    let label = ctx.label();

    format!(
        r#"version: 0.2

phases:
  pre_build:
    commands:
      - aws ecr get-login-password --region {region} | docker login --username AWS --password-stdin {registry}
  build:
    commands:
      - docker build --label "{label}" -t {local} .
      - docker tag {local} {remote}
  post_build:
    commands:
      - docker push {remote}
"#
    )
}

/// Write the build context into a fresh temporary directory.
pub async fn stage_base_image(ctx: &BaseImageContext) -> Result<TempDir> {
    ctx.validate()?;

    let dir = TempDir::new().context("Failed to create staging directory")?;
    let files = [
        ("requirements.txt", render_requirements(&ctx.libraries)),
        ("Dockerfile", render_dockerfile(&ctx.runtime_version)),
        ("buildspec.yml", render_buildspec(ctx)),
        ("lambda_function.py", FUNCTION_HANDLER.to_string()),
    ];

    for (name, contents) in files {
        let path = dir.path().join(name);
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    debug!(dir = %dir.path().display(), image = %ctx.image, "Staged base image context");
    Ok(dir)
}
