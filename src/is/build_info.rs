use chrono::{DateTime, Utc};

/// Render the build stamp baked in by build.rs.
pub fn build_time() -> String {
    option_env!("ISINIT_BUILD_EPOCH")
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(fmt_epoch)
        .unwrap_or_else(|| "unknown".to_string())
}

fn fmt_epoch(secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

/// The daemon's first boot event.
pub fn banner() -> String {
    format!(
        "is supervisor {} (build {})",
        env!("CARGO_PKG_VERSION"),
        build_time()
    )
}
