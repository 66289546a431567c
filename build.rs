//! Stamps the binary with its git revision and build time.
//!
//! Both values can be pinned from the environment for reproducible images.

use std::process::Command;

fn main() {
    let git_hash = std::env::var("BUILD_GIT_HASH")
        .ok()
        .or_else(git_revision)
        .unwrap_or_else(|| "unknown".to_string());

    let datetime = std::env::var("BUILD_DATETIME")
        .unwrap_or_else(|_| chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string());

    println!("cargo:rustc-env=BUILD_GIT_HASH={git_hash}");
    println!("cargo:rustc-env=BUILD_DATETIME={datetime}");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=BUILD_GIT_HASH");
    println!("cargo:rerun-if-env-changed=BUILD_DATETIME");
}

/// Short revision of HEAD, suffixed with `-dirty` for uncommitted changes
fn git_revision() -> Option<String> {
    // Command-line git keeps libgit2 and OpenSSL out of the build
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let revision = String::from_utf8(output.stdout).ok()?.trim().to_string();

    let dirty = Command::new("git")
        .args(["diff", "--quiet"])
        .status()
        .is_ok_and(|status| !status.success());

    Some(if dirty {
        format!("{revision}-dirty")
    } else {
        revision
    })
}
