//! Global configuration for the MDR converter
//!
//! Holds the cartridge volume name and the output overwrite policy.
//!
// Copyright (c) 2025 Tommy Olsen
// Licensed under the MIT License.

/// Application version
pub const VERSION: &str = "0.9-beta";

/// Volume name used when nothing else is configured
pub const DEFAULT_VOLUME_NAME: &str = "SNAPSHOT";

/// Environment variable that overrides the volume name in [`Config::auto`]
pub const VOLUME_ENV: &str = "Z80MDR_VOLUME";

/// Length of a Microdrive volume or file name
pub const NAME_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub volume_name: String,
    pub overwrite: bool,
}

impl Config {
    pub fn new(volume_name: &str, overwrite: bool) -> Self {
        Self {
            volume_name: volume_name.to_string(),
            overwrite,
        }
    }

    /// Create a Config from the environment
    ///
    /// - volume_name: `Z80MDR_VOLUME` if set and not blank, else [`DEFAULT_VOLUME_NAME`]
    /// - overwrite: false
    pub fn auto() -> Self {
        let volume_name = std::env::var(VOLUME_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_VOLUME_NAME.to_string());

        Self::new(&volume_name, false)
    }

    /// Volume name as stored in every sector header: space padded, cut at 10 bytes
    pub fn volume_bytes(&self) -> [u8; NAME_LEN] {
        pad_name(&self.volume_name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME_NAME, false)
    }
}

/// Space pad (or truncate) a name to the fixed Microdrive name length
pub fn pad_name(name: &str) -> [u8; NAME_LEN] {
    let mut out = [b' '; NAME_LEN];
    for (dst, src) in out.iter_mut().zip(name.bytes()) {
        *dst = src;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_short_name() {
        assert_eq!(&pad_name("run"), b"run       ");
    }

    #[test]
    fn test_truncate_long_name() {
        assert_eq!(&pad_name("ABCDEFGHIJKLMN"), b"ABCDEFGHIJ");
    }

    #[test]
    fn test_default_volume() {
        let config = Config::default();
        assert_eq!(&config.volume_bytes(), b"SNAPSHOT  ");
        assert!(!config.overwrite);
    }
}
