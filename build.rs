use std::process::Command;

/// Short commit hash for `--version`. Release tarballs have no `.git`, so
/// packagers can pass the hash in `SYNCVIEW_GIT_HASH` instead.
fn git_hash() -> String {
    if let Ok(hash) = std::env::var("SYNCVIEW_GIT_HASH") {
        return hash;
    }
    Command::new("git")
        .args(["rev-parse", "--short=10", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".into())
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");
    println!("cargo:rerun-if-env-changed=SYNCVIEW_GIT_HASH");

    let profile = std::env::var("PROFILE").unwrap_or_default();
    println!("cargo:rustc-env=SYNCVIEW_BUILD_GIT_HASH={}", git_hash());
    println!("cargo:rustc-env=SYNCVIEW_BUILD_PROFILE={profile}");
}
