//! Stamps `dosewatch --version` with the commit it was built from.

use std::path::Path;
use std::process::Command;

const SHA_VAR: &str = "DOSEWATCH_BUILD_SHA";

/// Packagers building from a tarball set the SHA themselves.
fn sha_from_env() -> Option<String> {
    let sha = std::env::var(SHA_VAR).ok()?;
    let sha = sha.trim();
    (!sha.is_empty()).then(|| sha.to_string())
}

fn sha_from_git(repo: &Path) -> Option<String> {
    let out = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(["describe", "--always", "--dirty", "--abbrev=8"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let sha = String::from_utf8(out.stdout).ok()?;
    let sha = sha.trim();
    (!sha.is_empty()).then(|| sha.to_string())
}

fn main() {
    let repo = Path::new(env!("CARGO_MANIFEST_DIR")).join("..");
    let sha = sha_from_env()
        .or_else(|| sha_from_git(&repo))
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env={SHA_VAR}={sha}");
    println!("cargo:rerun-if-env-changed={SHA_VAR}");
    let head = repo.join(".git").join("HEAD");
    if head.exists() {
        println!("cargo:rerun-if-changed={}", head.display());
    }
}
