//! Configuration readable from a config file.
//!
//! garm reads its acceptor settings from a TOML file. This module
//! contains the [`AcceptorConfig`] struct holding such a configuration
//! and the usual load/store/validate plumbing around it.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptorConfig {
    /// name of the service to authenticate as, e.g. `kfs`
    pub service_name: String,

    /// host name component of the service principal
    ///
    /// Leave unset to let the protocol engine resolve the local host
    /// name.
    #[serde(default)]
    pub service_host: Option<String>,

    /// location of the key-material store, e.g. `FILE:/etc/garm.keytab`
    ///
    /// Leave unset to use the engine's default location.
    #[serde(default)]
    pub keytab: Option<String>,

    /// whether replayed client tokens are detected and rejected
    ///
    /// Disabling this also disables token timestamp checking.
    #[serde(default)]
    pub detect_replay: bool,

    /// path to the file which provided this configuration
    ///
    /// This item is of course not read from the TOML but is added by the
    /// algorithm that parses the config file.
    #[serde(skip)]
    pub config_file_path: PathBuf,
}

impl AcceptorConfig {
    /// load configuration from a TOML file
    ///
    /// NOTE: no validation is conducted, use [validate](Self::validate)
    /// before handing the result to an acceptor.
    pub fn load<P: AsRef<Path>>(p: P) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(&fs::read_to_string(&p)?)?;
        config.config_file_path = p.as_ref().to_owned();
        Ok(config)
    }

    /// Write a config to a file
    pub fn store<P: AsRef<Path>>(&self, p: P) -> anyhow::Result<()> {
        fs::write(p, toml::to_string_pretty(&self)?)?;
        Ok(())
    }

    /// Commit the configuration to where it came from, overwriting the
    /// original file
    pub fn commit(&self) -> anyhow::Result<()> {
        if self.config_file_path.as_os_str().is_empty() {
            bail!("no config file path known for this configuration");
        }
        self.store(&self.config_file_path)
    }

    /// Validate a configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.service_name.is_empty(), "service_name must be set");
        ensure!(
            !self.service_name.contains(['/', '@']),
            "service_name {:?} must be a bare name without '/' or '@'",
            self.service_name
        );

        if let Some(host) = self.service_host.as_deref() {
            ensure!(
                !host.is_empty(),
                "service_host, when given, must not be empty"
            );
            ensure!(
                !host.contains(['/', '@']),
                "service_host {host:?} must be a bare host name without '/' or '@'"
            );
        }

        if let Some(keytab) = self.keytab.as_deref() {
            ensure!(!keytab.is_empty(), "keytab, when given, must not be empty");
        }

        Ok(())
    }

    /// Creates a new configuration
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_owned(),
            service_host: None,
            keytab: None,
            detect_replay: false,
            config_file_path: PathBuf::new(),
        }
    }

    /// Generate an example configuration
    pub fn example_config() -> Self {
        Self {
            service_host: Some("meta.garm.test".into()),
            keytab: Some("FILE:/etc/garm/kfs.keytab".into()),
            detect_replay: true,
            ..Self::new("kfs")
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn minimal_toml_applies_defaults() {
        let config: AcceptorConfig = toml::from_str("service_name = \"kfs\"").unwrap();
        assert_eq!(config.service_name, "kfs");
        assert_eq!(config.service_host, None);
        assert_eq!(config.keytab, None);
        assert!(!config.detect_replay);
        assert_eq!(config.config_file_path, PathBuf::new());
    }

    #[test]
    fn example_config_is_valid() {
        AcceptorConfig::example_config().validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_names() {
        assert!(AcceptorConfig::new("").validate().is_err());
        assert!(AcceptorConfig::new("kfs/meta").validate().is_err());
        assert!(AcceptorConfig::new("kfs@REALM").validate().is_err());

        let mut config = AcceptorConfig::new("kfs");
        config.service_host = Some(String::new());
        assert!(config.validate().is_err());

        config.service_host = Some("meta.garm.test".into());
        config.keytab = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn commit_requires_known_path() {
        assert!(AcceptorConfig::new("kfs").commit().is_err());
    }
}
