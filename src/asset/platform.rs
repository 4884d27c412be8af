/// Host operating system and CPU architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn detect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Canonical `<os>_<arch>` token, e.g. `linux_x64`.
    pub fn target(&self) -> String {
        target_for(&self.os, &self.arch)
    }
}

/// The current host's target token.
pub fn detect_target() -> String {
    Platform::detect().target()
}

/// Map an (OS, architecture) pair onto the registry's target token.
///
/// Accepts both Go-style (`darwin`, `amd64`) and Rust-style (`macos`,
/// `x86_64`) names; anything else passes through lower-cased.
pub fn target_for(os: &str, arch: &str) -> String {
    let os = os.to_lowercase();
    let arch = arch.to_lowercase();

    let os = match os.as_str() {
        "darwin" | "macos" => "darwin",
        "linux" => "linux",
        "windows" => "win",
        other => other,
    };
    let arch = match arch.as_str() {
        "amd64" | "x86_64" => "x64",
        "386" | "x86" | "i686" => "x86",
        "arm64" | "aarch64" => "arm64",
        "arm" => "arm",
        other => other,
    };

    format!("{}_{}", os, arch)
}
