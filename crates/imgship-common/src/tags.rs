//! AWS resource tag constants for imgship
//!
//! Roles, policies and build projects created by imgship carry these tags
//! so leftovers from a killed process can be found and attributed.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `imgship:tool` | Static identifier ("imgship") |
//! | `imgship:run-id` | Invocation identifier |
//! | `imgship:created-at` | RFC 3339 creation timestamp |
//! | `imgship:image` | Image name a build project belongs to (optional) |

/// Tag key for tool identification - all imgship resources have this
pub const TAG_TOOL: &str = "imgship:tool";

/// Tag value for tool identification
pub const TAG_TOOL_VALUE: &str = "imgship";

/// Tag key for the invocation that created the resource
pub const TAG_RUN_ID: &str = "imgship:run-id";

/// Tag key for creation timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "imgship:created-at";

/// Tag key for the image a build project produces
pub const TAG_IMAGE: &str = "imgship:image";

/// Helper to format creation timestamp for tags
pub fn format_created_at(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339()
}

/// Helper to parse creation timestamp from tags
pub fn parse_created_at(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Standard tag pairs for a resource created by `run_id` now
pub fn standard_tags(run_id: &str) -> Vec<(&'static str, String)> {
    vec![
        (TAG_TOOL, TAG_TOOL_VALUE.to_string()),
        (TAG_RUN_ID, run_id.to_string()),
        (TAG_CREATED_AT, format_created_at(chrono::Utc::now())),
    ]
}
