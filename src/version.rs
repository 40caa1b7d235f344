//! Version information.

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name from Cargo.toml.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Full version string: `{name}/{version}`.
///
/// Sent as the `User-Agent` on backend calls and reported by `/health`.
pub fn version_string() -> String {
    format!("{PKG_NAME}/{PKG_VERSION}")
}
