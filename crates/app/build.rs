use std::env;
use std::process::Command;

/// Run a command and return its trimmed stdout, if it succeeded
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn emit(key: &str, value: &str) {
    println!("cargo:rustc-env={}={}", key, value);
}

fn enabled_features() -> String {
    let mut features: Vec<String> = env::vars()
        .filter_map(|(key, _)| key.strip_prefix("CARGO_FEATURE_").map(|f| f.to_lowercase()))
        .collect();
    features.sort();

    if features.is_empty() {
        "none".to_string()
    } else {
        features.join(",")
    }
}

fn repository_version() -> String {
    env::var("CI_BUILD_REF")
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| command_output("git", &["describe", "--always", "--dirty", "--long", "--tags"]))
        .or_else(|| env::var("CARGO_PKG_VERSION").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=.git/HEAD");

    emit(
        "BUILD_PROFILE",
        &env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string()),
    );
    emit("BUILD_FEATURES", &enabled_features());
    emit("REPO_VERSION", &repository_version());
    emit("BUILD_TIMESTAMP", &chrono::Utc::now().to_rfc3339());
    emit(
        "RUST_VERSION",
        &command_output("rustc", &["--version"]).unwrap_or_else(|| "unknown".to_string()),
    );
}
