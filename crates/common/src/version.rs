use std::fmt;

/// Build metadata captured by the binary's build script
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub build_profile: &'static str,
    pub build_features: &'static str,
    pub version: &'static str,
    pub build_timestamp: &'static str,
    pub rust_version: &'static str,
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "version:   {}\nprofile:   {}\nfeatures:  {}\nbuilt:     {}\nrustc:     {}",
            self.version,
            self.build_profile,
            self.build_features,
            self.build_timestamp,
            self.rust_version
        )
    }
}

/// Collect [`BuildInfo`] from the calling crate's compile-time environment
///
/// Expands `env!` at the call site, so the calling crate needs a build script
/// that sets `BUILD_PROFILE`, `BUILD_FEATURES`, `REPO_VERSION`,
/// `BUILD_TIMESTAMP` and `RUST_VERSION`.
#[macro_export]
macro_rules! build_info {
    () => {
        $crate::version::BuildInfo {
            build_profile: env!("BUILD_PROFILE"),
            build_features: env!("BUILD_FEATURES"),
            version: env!("REPO_VERSION"),
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rust_version: env!("RUST_VERSION"),
        }
    };
}
