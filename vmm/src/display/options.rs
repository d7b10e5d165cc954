// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Display configuration

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable naming the framebuffer device.
pub const FRAMEBUFFER_ENV: &str = "FRAMEBUFFER";

/// Framebuffer used when neither the options nor the environment name one.
pub const DEFAULT_FRAMEBUFFER: &str = "/dev/fb0";

pub const DEFAULT_MOUSE_DEVICE: &str = "/dev/input/mice";

/// Default refresh poll interval (milliseconds)
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 30;

/// Resampling filter used when the guest surface is scaled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Nearest neighbour
    Fast,
    /// Bilinear
    #[default]
    Good,
    /// Bicubic
    Best,
}

impl FilterMode {
    pub fn quality(self) -> tiny_skia::FilterQuality {
        match self {
            FilterMode::Fast => tiny_skia::FilterQuality::Nearest,
            FilterMode::Good => tiny_skia::FilterQuality::Bilinear,
            FilterMode::Best => tiny_skia::FilterQuality::Bicubic,
        }
    }
}

impl FromStr for FilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(FilterMode::Fast),
            "good" => Ok(FilterMode::Good),
            "best" => Ok(FilterMode::Best),
            other => Err(format!("unknown filter '{other}', expected fast, good or best")),
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterMode::Fast => "fast",
            FilterMode::Good => "good",
            FilterMode::Best => "best",
        };
        f.write_str(name)
    }
}

/// Framebuffer display configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayOptions {
    /// Framebuffer device; falls back to `$FRAMEBUFFER`, then `/dev/fb0`.
    pub device: Option<PathBuf>,
    /// Scale the guest surface to fit the screen.
    pub scale: bool,
    pub filter: FilterMode,
    pub mouse_device: PathBuf,
    pub refresh_interval_ms: u64,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            device: None,
            scale: false,
            filter: FilterMode::default(),
            mouse_device: PathBuf::from(DEFAULT_MOUSE_DEVICE),
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
        }
    }
}

impl DisplayOptions {
    /// Framebuffer device path, consulting `lookup` for the environment.
    pub fn resolve_device<F>(&self, lookup: F) -> PathBuf
    where
        F: Fn(&str) -> Option<OsString>,
    {
        if let Some(device) = &self.device {
            return device.clone();
        }
        match lookup(FRAMEBUFFER_ENV) {
            Some(device) if !device.is_empty() => PathBuf::from(device),
            _ => PathBuf::from(DEFAULT_FRAMEBUFFER),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_resolution_order() {
        let env = |name: &str| (name == FRAMEBUFFER_ENV).then(|| OsString::from("/dev/fb1"));
        let none = |_: &str| None;

        let explicit = DisplayOptions {
            device: Some(PathBuf::from("/dev/fb2")),
            ..Default::default()
        };
        assert_eq!(explicit.resolve_device(env), PathBuf::from("/dev/fb2"));

        let options = DisplayOptions::default();
        assert_eq!(options.resolve_device(env), PathBuf::from("/dev/fb1"));
        assert_eq!(options.resolve_device(none), PathBuf::from("/dev/fb0"));
    }

    #[test]
    fn test_filter_parse() {
        assert_eq!("fast".parse::<FilterMode>(), Ok(FilterMode::Fast));
        assert_eq!("best".parse::<FilterMode>(), Ok(FilterMode::Best));
        assert!("sharp".parse::<FilterMode>().is_err());
        assert_eq!(FilterMode::default().to_string(), "good");
        assert_eq!(FilterMode::Fast.quality(), tiny_skia::FilterQuality::Nearest);
    }

    #[test]
    fn test_defaults() {
        let options = DisplayOptions::default();
        assert!(!options.scale);
        assert_eq!(options.refresh_interval(), Duration::from_millis(30));
        assert_eq!(options.mouse_device, PathBuf::from("/dev/input/mice"));
    }
}
