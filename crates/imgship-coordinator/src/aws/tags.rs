//! SDK tag builders for imgship resources
//!
//! Turns the tag schema in [`imgship_common::tags`] into the per-service
//! SDK tag types.

use anyhow::Result;
use imgship_common::tags::{TAG_IMAGE, standard_tags};

/// Build IAM tags with standard imgship tags.
pub fn iam_tags(run_id: &str) -> Result<Vec<aws_sdk_iam::types::Tag>> {
    standard_tags(run_id)
        .into_iter()
        .map(|(k, v)| {
            aws_sdk_iam::types::Tag::builder()
                .key(k)
                .value(v)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build IAM tag: {}", e))
        })
        .collect()
}

/// Build CodeBuild project tags with standard imgship tags plus the image name.
pub fn codebuild_tags(run_id: &str, image_name: &str) -> Vec<aws_sdk_codebuild::types::Tag> {
    standard_tags(run_id)
        .into_iter()
        .chain(std::iter::once((TAG_IMAGE, image_name.to_string())))
        .map(|(k, v)| {
            aws_sdk_codebuild::types::Tag::builder()
                .key(k)
                .value(v)
                .build()
        })
        .collect()
}
