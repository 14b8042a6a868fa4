//! Names and settings for live AWS tests
//!
//! Every name shares one per-process stamp, so resources left behind by a
//! killed test run can be matched up and removed by hand.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

/// Longest namespace for which `lambda_role_<namespace>` is a valid IAM role name
pub const MAX_NAMESPACE_LEN: usize = 52;

/// Region used when neither `AWS_REGION` nor `AWS_DEFAULT_REGION` is set
const FALLBACK_REGION: &str = "us-east-1";

/// Region the live tests run in
pub fn live_region() -> String {
    ["AWS_REGION", "AWS_DEFAULT_REGION"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|r| !r.is_empty()))
        .unwrap_or_else(|| FALLBACK_REGION.to_string())
}

/// Artifact bucket for live tests.
///
/// `IMGSHIP_TEST_BUCKET` when set, otherwise a name unique to this run.
pub fn live_bucket() -> String {
    std::env::var("IMGSHIP_TEST_BUCKET")
        .ok()
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| format!("imgship-it-{}", run_stamp()))
}

/// A deployment namespace no other call in this or an earlier run returned
pub fn live_namespace() -> String {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    format!("it_{}_{n}", run_stamp())
}

/// Lowercase hex of the process start time in milliseconds
fn run_stamp() -> &'static str {
    static STAMP: OnceLock<String> = OnceLock::new();
    STAMP.get_or_init(|| format!("{:x}", chrono::Utc::now().timestamp_millis()))
}
