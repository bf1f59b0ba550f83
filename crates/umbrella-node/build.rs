use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

/// Stamp `BUILD_VERSION` as `<pkg version>[-<git hash>]-<build time>`.
///
/// `UMBRELLA_BUILD_VERSION` replaces the whole stamp; `SOURCE_DATE_EPOCH`
/// pins the build time for reproducible builds.
fn main() {
    println!("cargo:rerun-if-env-changed=UMBRELLA_BUILD_VERSION");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=src/");

    let version = std::env::var("UMBRELLA_BUILD_VERSION")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(stamp);
    println!("cargo:rustc-env=BUILD_VERSION={version}");
}

fn stamp() -> String {
    let mut parts = vec![env!("CARGO_PKG_VERSION").to_string()];
    parts.extend(git_short_hash());
    parts.push(build_time().to_string());
    parts.join("-")
}

fn git_short_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())?;
    let hash = String::from_utf8(output.stdout).ok()?;
    let hash = hash.trim();
    (!hash.is_empty()).then(|| hash.to_string())
}

fn build_time() -> u64 {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default()
        })
}
