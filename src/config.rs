use crate::device::{DeviceHandle, DeviceKind};
use crate::error::{LazyError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Runtime settings for lazy mode, usually read from TOML:
///
/// ```toml
/// lazy_device = "lazy"
/// backend = "cpu"
/// ordinal = 0
/// eager_fallback_device = "cpu"
/// sync_wait = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LazyConfig {
    /// Device handle operands are moved to before meta kernels run.
    #[serde(default = "default_lazy_device")]
    pub lazy_device: DeviceHandle,

    /// Hardware kind lazy devices resolve to.
    #[serde(default = "default_backend")]
    pub backend: DeviceKind,

    #[serde(default)]
    pub ordinal: usize,

    #[serde(default = "default_backend")]
    pub eager_fallback_device: DeviceKind,

    /// Block at mode exit until pending work is submitted to the device queue.
    #[serde(default = "default_sync_wait")]
    pub sync_wait: bool,
}

fn default_lazy_device() -> DeviceHandle {
    DeviceHandle::lazy()
}

fn default_backend() -> DeviceKind {
    DeviceKind::Cpu
}

fn default_sync_wait() -> bool {
    true
}

impl Default for LazyConfig {
    fn default() -> Self {
        Self {
            lazy_device: default_lazy_device(),
            backend: default_backend(),
            ordinal: 0,
            eager_fallback_device: default_backend(),
            sync_wait: default_sync_wait(),
        }
    }
}

impl LazyConfig {
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| LazyError::Config(format!("{}: {e}", path.display())))?;
        Self::parse_toml(&content)
    }

    /// Defaults overridden by `RADE_LAZY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub(crate) fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(device) = lookup("RADE_LAZY_DEVICE") {
            self.lazy_device = device.parse()?;
        }
        if let Some(backend) = lookup("RADE_LAZY_BACKEND") {
            let handle: DeviceHandle = backend.parse()?;
            self.backend = handle.kind;
            self.ordinal = handle.index.unwrap_or(0);
        }
        if let Some(fallback) = lookup("RADE_LAZY_FALLBACK") {
            self.eager_fallback_device = fallback.parse()?;
        }
        if let Some(wait) = lookup("RADE_LAZY_SYNC_WAIT") {
            self.sync_wait = match wait.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(LazyError::Config(format!(
                        "RADE_LAZY_SYNC_WAIT: expected a boolean, got `{other}`"
                    )))
                }
            };
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if !self.lazy_device.kind.is_lazy() {
            return Err(LazyError::Config(format!(
                "lazy_device must be a lazy device, got `{}`",
                self.lazy_device
            )));
        }
        // There is a single logical lazy device; ordinals belong to `backend`.
        if self.lazy_device.has_index() {
            return Err(LazyError::Config(format!(
                "lazy_device must not carry an index, got `{}`",
                self.lazy_device
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = LazyConfig::parse_toml("").unwrap();
        assert_eq!(config, LazyConfig::default());
        assert!(config.sync_wait);
        assert_eq!(config.lazy_device, DeviceHandle::lazy());
    }

    #[test]
    fn test_parse() {
        let config = LazyConfig::parse_toml(
            r#"
            lazy_device = "lazy"
            backend = "cpu"
            ordinal = 2
            sync_wait = false
            "#,
        )
        .unwrap();
        assert_eq!(config.lazy_device, DeviceHandle::lazy());
        assert_eq!(config.ordinal, 2);
        assert!(!config.sync_wait);
        assert_eq!(config.eager_fallback_device, DeviceKind::Cpu);
    }

    #[test]
    fn test_reject_eager_lazy_device() {
        let err = LazyConfig::parse_toml(r#"lazy_device = "cpu""#).unwrap_err();
        assert!(matches!(err, LazyError::Config(_)));
        assert!(LazyConfig::parse_toml(r#"lazy_device = "tpu""#).is_err());
        assert!(LazyConfig::parse_toml(r#"lazy_device = "lazy:0""#).is_err());
    }

    #[test]
    fn test_overrides() {
        let vars = HashMap::from([
            ("RADE_LAZY_BACKEND", "cpu:3"),
            ("RADE_LAZY_SYNC_WAIT", "off"),
        ]);
        let mut config = LazyConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.ordinal, 3);
        assert!(!config.sync_wait);

        let bad = HashMap::from([("RADE_LAZY_SYNC_WAIT", "maybe")]);
        let mut config = LazyConfig::default();
        assert!(config
            .apply_overrides(|key| bad.get(key).map(|v| v.to_string()))
            .is_err());
    }
}
