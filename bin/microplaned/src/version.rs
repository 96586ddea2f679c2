//! ---
//! mp_section: "06-daemon"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Build metadata reported by the daemon."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
const UNKNOWN: &str = "UNKNOWN";

/// Version and build metadata captured by the build script.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    pub semver: &'static str,
    pub git_sha: &'static str,
    pub build_timestamp: &'static str,
    pub target: &'static str,
    pub profile: &'static str,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION"),
            git_sha: option_env!("VERGEN_GIT_SHA").unwrap_or(UNKNOWN),
            build_timestamp: option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or(UNKNOWN),
            target: option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or(UNKNOWN),
            profile: option_env!("VERGEN_CARGO_PROFILE").unwrap_or(UNKNOWN),
        }
    }

    pub fn banner(&self) -> String {
        format!("microplane v{} (git {})", self.semver, self.git_sha)
    }

    /// Multi-line form printed by `microplaned version`.
    pub fn extended(&self) -> String {
        format!(
            "{banner}\nBuilt: {built}\nTarget: {target}\nProfile: {profile}",
            banner = self.banner(),
            built = self.build_timestamp,
            target = self.target,
            profile = self.profile
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_starts_with_banner() {
        let version = VersionInfo::current();
        let extended = version.extended();
        assert!(extended.starts_with(&version.banner()));
        assert!(extended.contains(env!("CARGO_PKG_VERSION")));
        assert_eq!(extended.lines().count(), 4);
    }
}
