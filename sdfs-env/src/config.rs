use crate::env::{Env, Priority};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Settings for an sdfs-backed environment, usually loaded from YAML:
///
/// ```yaml
/// uri: sdfs:namenode:9000
/// background_threads:
///   low: 4
///   high: 2
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvConfig {
    pub uri: Option<String>,
    pub background_threads: BackgroundThreads,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackgroundThreads {
    pub bottom: usize,
    pub low: usize,
    pub high: usize,
}

impl Default for BackgroundThreads {
    fn default() -> Self {
        Self {
            bottom: 0,
            low: 1,
            high: 1,
        }
    }
}

impl BackgroundThreads {
    pub fn get(&self, pri: Priority) -> usize {
        match pri {
            Priority::Bottom => self.bottom,
            Priority::Low => self.low,
            Priority::High => self.high,
        }
    }
}

impl EnvConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| Error::InvalidArgument(format!("failed to parse env config: {e}")))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::from_io(path.display().to_string(), e))?;
        Self::from_yaml(&text)
    }

    /// Sizes the background pools of `env`.
    pub fn apply(&self, env: &dyn Env) {
        for pri in Priority::ALL {
            env.set_background_threads(self.background_threads.get(pri), pri);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posix::PosixEnv;
    use std::io::Write;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = EnvConfig::from_yaml("background_threads:\n  low: 4\n").unwrap();
        assert_eq!(cfg.uri, None);
        assert_eq!(
            cfg.background_threads,
            BackgroundThreads {
                bottom: 0,
                low: 4,
                high: 1
            }
        );
    }

    #[test]
    fn test_from_file_and_apply() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "uri: sdfs:namenode:9000")?;
        writeln!(file, "background_threads:\n  bottom: 2\n  high: 3")?;

        let cfg = EnvConfig::from_file(file.path())?;
        assert_eq!(cfg.uri.as_deref(), Some("sdfs:namenode:9000"));

        let env = PosixEnv::new();
        cfg.apply(&env);
        assert_eq!(env.background_threads(Priority::Bottom), 2);
        assert_eq!(env.background_threads(Priority::Low), 1);
        assert_eq!(env.background_threads(Priority::High), 3);
        Ok(())
    }

    #[test]
    fn test_bad_input() {
        let err = EnvConfig::from_yaml("background_threads: lots").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(EnvConfig::from_file("/nonexistent/sdfs-env.yaml")
            .unwrap_err()
            .is_not_found());
    }
}
