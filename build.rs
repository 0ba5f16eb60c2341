// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=SCANNER_VERSION");

    // Packagers can pin the version instead of relying on git
    let version = std::env::var("SCANNER_VERSION")
        .ok()
        .or_else(git_describe)
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// `git describe` output without the leading `v`
///
/// "v0.1.0" at a tag stays "0.1.0"; "v0.1.0-5-gabcdef1" after a tag becomes
/// "0.1.0-dev-abcdef1"; a tree without tags falls back to the short hash.
fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--match", "v*"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let described = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let described = described.strip_prefix('v').unwrap_or(&described);

    let parts: Vec<&str> = described.rsplitn(3, '-').collect();
    match parts.as_slice() {
        [hash, _commits, base] => Some(format!(
            "{}-dev-{}",
            base,
            hash.strip_prefix('g').unwrap_or(hash)
        )),
        _ => Some(described.to_string()),
    }
}
