use std::{
    io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

/// Agent configuration, loaded from a YAML file at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// PEM client certificate presented to the server.
    pub cert_file: PathBuf,
    /// PEM private key for the client certificate.
    pub cert_key_file: PathBuf,
    /// PEM trust anchor the server is validated against.
    pub ca_file: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {}", .0.display(), .1)]
    Read(PathBuf, #[source] io::Error),
    #[error("failed to parse {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Read(path.to_owned(), err))?;
        let config: Config =
            serde_yaml::from_str(&raw).map_err(|err| ConfigError::Parse(path.to_owned(), err))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid(
                "port must be between 1 and 65535".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{Config, ConfigError};

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_a_complete_config() {
        let file = write_config(
            "host: fim.example.com\n\
             port: 8443\n\
             cert_file: /etc/sentinel/client.pem\n\
             cert_key_file: /etc/sentinel/client.key\n\
             ca_file: /etc/sentinel/ca.pem\n",
        );

        let config = Config::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.host, "fim.example.com");
        assert_eq!(config.port, 8443);
        assert_eq!(config.ca_file.to_str(), Some("/etc/sentinel/ca.pem"));
    }

    #[test]
    fn rejects_port_zero() {
        let file = write_config(
            "host: fim.example.com\n\
             port: 0\n\
             cert_file: client.pem\n\
             cert_key_file: client.key\n\
             ca_file: ca.pem\n",
        );

        assert!(matches!(
            Config::from_yaml_file(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_empty_host() {
        let file = write_config(
            "host: \"\"\n\
             port: 8443\n\
             cert_file: client.pem\n\
             cert_key_file: client.key\n\
             ca_file: ca.pem\n",
        );

        assert!(matches!(
            Config::from_yaml_file(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn missing_field_is_a_parse_error() {
        let file = write_config("host: fim.example.com\nport: 8443\n");

        assert!(matches!(
            Config::from_yaml_file(file.path()),
            Err(ConfigError::Parse(_, _))
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            Config::from_yaml_file(std::path::Path::new("/nonexistent/config.yaml")),
            Err(ConfigError::Read(_, _))
        ));
    }
}
