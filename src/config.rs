use std::path::{Path, PathBuf};

pub const ENV_MODEL: &str = "RPIGPIO_MODEL";
pub const ENV_GPIOCHIP: &str = "RPIGPIO_GPIOCHIP";
pub const ENV_CONSUMER: &str = "RPIGPIO_CONSUMER";

/// Runtime settings for a [`Gpio`](crate::Gpio) controller.
///
/// The defaults match a stock Raspberry Pi OS install; every path can be
/// overridden for containers or unusual device layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    model: String,
    consumer: String,
    gpiomem: PathBuf,
    devmem: PathBuf,
    gpiochip: PathBuf,
    pi5_probe: PathBuf,
    soc_ranges: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "auto".to_owned(),
            consumer: "rpigpio".to_owned(),
            gpiomem: PathBuf::from("/dev/gpiomem"),
            devmem: PathBuf::from("/dev/mem"),
            gpiochip: PathBuf::from("/dev/gpiochip4"),
            pi5_probe: PathBuf::from("/dev/gpiochip4"),
            soc_ranges: PathBuf::from("/proc/device-tree/soc/ranges"),
        }
    }
}

impl Config {
    /// Defaults overlaid with `RPIGPIO_MODEL`, `RPIGPIO_GPIOCHIP` and
    /// `RPIGPIO_CONSUMER` from the environment
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(model) = lookup(ENV_MODEL).filter(|v| !v.is_empty()) {
            config.model = model;
        }
        if let Some(chip) = lookup(ENV_GPIOCHIP).filter(|v| !v.is_empty()) {
            config.gpiochip = PathBuf::from(chip);
        }
        if let Some(consumer) = lookup(ENV_CONSUMER).filter(|v| !v.is_empty()) {
            config.consumer = consumer;
        }
        config
    }

    pub fn with_model(self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self
        }
    }

    pub fn with_consumer(self, consumer: impl Into<String>) -> Self {
        Self {
            consumer: consumer.into(),
            ..self
        }
    }

    pub fn with_gpiomem(self, path: impl Into<PathBuf>) -> Self {
        Self {
            gpiomem: path.into(),
            ..self
        }
    }

    pub fn with_devmem(self, path: impl Into<PathBuf>) -> Self {
        Self {
            devmem: path.into(),
            ..self
        }
    }

    pub fn with_gpiochip(self, path: impl Into<PathBuf>) -> Self {
        Self {
            gpiochip: path.into(),
            ..self
        }
    }

    pub fn with_pi5_probe(self, path: impl Into<PathBuf>) -> Self {
        Self {
            pi5_probe: path.into(),
            ..self
        }
    }

    pub fn with_soc_ranges(self, path: impl Into<PathBuf>) -> Self {
        Self {
            soc_ranges: path.into(),
            ..self
        }
    }

    /// Model used when an operation initializes the controller implicitly
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Consumer label attached to requested character device lines
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn gpiomem(&self) -> &Path {
        &self.gpiomem
    }

    pub fn devmem(&self) -> &Path {
        &self.devmem
    }

    pub fn gpiochip(&self) -> &Path {
        &self.gpiochip
    }

    /// Device node whose presence marks a Pi 5
    pub fn pi5_probe(&self) -> &Path {
        &self.pi5_probe
    }

    pub fn soc_ranges(&self) -> &Path {
        &self.soc_ranges
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.model(), "auto");
        assert_eq!(config.gpiomem(), Path::new("/dev/gpiomem"));
        assert_eq!(config.devmem(), Path::new("/dev/mem"));
        assert_eq!(config.gpiochip(), Path::new("/dev/gpiochip4"));
    }

    #[test]
    fn vars_override_defaults() {
        let config = Config::from_vars(|key| match key {
            ENV_MODEL => Some("pi4".to_owned()),
            ENV_GPIOCHIP => Some("/dev/gpiochip0".to_owned()),
            _ => None,
        });
        assert_eq!(config.model(), "pi4");
        assert_eq!(config.gpiochip(), Path::new("/dev/gpiochip0"));
        assert_eq!(config.consumer(), "rpigpio");
    }

    #[test]
    fn empty_vars_are_ignored() {
        let config = Config::from_vars(|_| Some(String::new()));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn builder() {
        let config = Config::default()
            .with_model("linux-armv7")
            .with_consumer("test")
            .with_gpiomem("/tmp/gpiomem");
        assert_eq!(config.model(), "linux-armv7");
        assert_eq!(config.consumer(), "test");
        assert_eq!(config.gpiomem(), Path::new("/tmp/gpiomem"));
    }
}
