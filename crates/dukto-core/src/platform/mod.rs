//! Local identity used to announce this node on the network.
//!
//! Peers show each other a signature of the form
//! `"<username> at <hostname> (<platform>)"`. The same string is used to
//! recognize our own hellos when they loop back.

use std::fmt;
use std::path::PathBuf;

/// Fallback for any identity part that cannot be detected.
const UNKNOWN: &str = "Unknown";

/// The `(username, hostname, platform)` triple behind a discovery signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Display name of the local user
    pub username: String,
    /// Host name without any `.local` suffix
    pub hostname: String,
    /// Platform label (`Windows`, `Macintosh`, `Linux`, `Android`, `Unknown`)
    pub platform: String,
}

impl Identity {
    /// Create an identity from explicit parts.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        hostname: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            hostname: hostname.into(),
            platform: platform.into(),
        }
    }

    /// Detect the identity of the running process.
    #[must_use]
    pub fn detect() -> Self {
        let username = pick_username(
            std::env::var("USERNAME").ok(),
            std::env::var("USER").ok(),
        );
        let hostname = hostname::get().map_or_else(
            |_| UNKNOWN.to_string(),
            |h| clean_hostname(&h.to_string_lossy()),
        );

        Self::new(username, hostname, platform_name())
    }

    /// Replace the username with a user-chosen buddy name, if one is set.
    #[must_use]
    pub fn with_buddy_name(mut self, buddy_name: Option<&str>) -> Self {
        if let Some(name) = buddy_name.map(str::trim).filter(|n| !n.is_empty()) {
            self.username = name.to_string();
        }
        self
    }

    /// The signature announced in every hello.
    #[must_use]
    pub fn signature(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {} ({})", self.username, self.hostname, self.platform)
    }
}

/// Platform label for the current target.
#[must_use]
pub const fn platform_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "Windows"
    } else if cfg!(target_os = "macos") {
        "Macintosh"
    } else if cfg!(target_os = "android") {
        "Android"
    } else if cfg!(target_os = "linux") {
        "Linux"
    } else {
        UNKNOWN
    }
}

/// Default destination for received items: the desktop where one exists,
/// the home directory otherwise.
#[must_use]
pub fn default_dest_dir() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| {
            dirs.desktop_dir()
                .map(PathBuf::from)
                .or_else(|| Some(dirs.home_dir().to_path_buf()))
        })
        .unwrap_or_else(|| PathBuf::from("."))
}

fn pick_username(username: Option<String>, user: Option<String>) -> String {
    let name = username
        .filter(|n| !n.is_empty())
        .or_else(|| user.filter(|n| !n.is_empty()))
        .unwrap_or_else(|| UNKNOWN.to_string());
    capitalize_first(&name)
}

fn capitalize_first(name: &str) -> String {
    let mut chars = name.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

fn clean_hostname(host: &str) -> String {
    let host = host.replace(".local", "");
    if host.is_empty() {
        UNKNOWN.to_string()
    } else {
        host
    }
}
