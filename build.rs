use std::env;
use std::process::Command;

/// Short commit of the checkout, or `GIT_SHA` when building without git
fn commit() -> Option<String> {
    let from_git = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string());
    from_git
        .or_else(|| env::var("GIT_SHA").ok())
        .filter(|sha| !sha.is_empty())
}

fn flag(name: &str) -> bool {
    env::var(name).is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn main() {
    let base = env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let commit = commit();

    // Nightly builds carry the commit in the version itself
    let version = match (flag("SUNMINE_NIGHTLY"), &commit) {
        (true, Some(sha)) => format!("{base}-nightly+{sha}"),
        (true, None) => format!("{base}-nightly"),
        (false, _) => base,
    };

    println!("cargo:rustc-env=APP_VERSION={version}");
    println!(
        "cargo:rustc-env=APP_COMMIT={}",
        commit.as_deref().unwrap_or("unknown")
    );
    for var in ["SUNMINE_NIGHTLY", "GIT_SHA"] {
        println!("cargo:rerun-if-env-changed={var}");
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}
