//! Configuration of the crld daemon.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fmt, fs, io};
use clap::Parser;
use log::{error, info, LevelFilter};
use serde::{Deserialize, Deserializer};
use url::Url;
use crate::commons::util::ext_serde;
use crate::constants::{
    CRLD_DEFAULT_CONFIG_FILE, CRLD_ENV_LOG_LEVEL, CRLD_ENV_STORAGE_URI,
    CRLD_SERVER_APP,
};
use crate::ipoint::IssuingPointConfig;


//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn storage_uri() -> Url {
        env::var(CRLD_ENV_STORAGE_URI)
            .ok()
            .and_then(|uri| Url::parse(&uri).ok())
            .unwrap_or_else(|| {
                Url::from_str("local://./data").expect("valid default URI")
            })
    }

    fn key_dir() -> PathBuf {
        PathBuf::from("./keys")
    }

    fn publish_dir() -> PathBuf {
        PathBuf::from("./published")
    }

    fn log_level() -> LevelFilter {
        match env::var(CRLD_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}",
                        CRLD_ENV_LOG_LEVEL
                    );
                    ::std::process::exit(1);
                }
            },
            _ => LevelFilter::Info,
        }
    }

    fn log_type() -> LogType {
        LogType::File
    }

    fn log_file() -> PathBuf {
        PathBuf::from("./crld.log")
    }

    #[cfg(unix)]
    fn syslog_facility() -> syslog::Facility {
        syslog::Facility::LOG_DAEMON
    }
}


//------------ Options -------------------------------------------------------

/// The command line options of the daemon.
#[derive(Clone, Debug, Parser)]
#[command(version, about = "CRL issuing point daemon")]
pub struct Options {
    /// Path to the configuration file
    #[arg(
        short, long, value_name = "path",
        default_value = CRLD_DEFAULT_CONFIG_FILE,
    )]
    pub config: PathBuf,
}


//------------ Config --------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(
        default = "ConfigDefaults::storage_uri",
        alias = "data_dir",
        deserialize_with = "deserialize_storage_uri"
    )]
    pub storage_uri: Url,

    /// Where the CRL signing key is kept.
    #[serde(default = "ConfigDefaults::key_dir")]
    pub key_dir: PathBuf,

    /// Where CRLs are published to.
    #[serde(default = "ConfigDefaults::publish_dir")]
    pub publish_dir: PathBuf,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "ext_serde::de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    #[cfg(unix)]
    #[serde(
        default = "ConfigDefaults::syslog_facility",
        deserialize_with = "ext_serde::de_facility"
    )]
    pub syslog_facility: syslog::Facility,

    #[serde(default)]
    pub issuing_points: Vec<IssuingPointConfig>,
}

/// # Create
impl Config {
    /// Creates the config from the file given on the command line.
    ///
    /// Logging is initialised as soon as the file was read, so problems
    /// found while verifying it end up in the log.
    pub fn create() -> Result<Self, ConfigError> {
        let options = Options::parse();
        let config_file = options.config;

        let mut config = match Self::read_config(&config_file) {
            Err(e) => {
                if config_file == Path::new(CRLD_DEFAULT_CONFIG_FILE) {
                    return Err(ConfigError::other(
                        "Cannot find config file. Please use --config to \
                         specify its location.",
                    ))
                }
                return Err(ConfigError::Other(format!(
                    "Error parsing config file: {}, error: {}",
                    config_file.display(),
                    e
                )))
            }
            Ok(config) => config,
        };
        config.init_logging()?;
        info!(
            "{} uses configuration file: {}",
            CRLD_SERVER_APP,
            config_file.display()
        );

        config.verify().map_err(|e| {
            ConfigError::Other(format!(
                "Error in config file: {}, error: {}",
                config_file.display(),
                e
            ))
        })?;
        Ok(config)
    }

    pub fn read_config(file: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(file)?;
        Self::parse_str(&content)
    }

    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Checks the settings that cannot be checked while parsing.
    ///
    /// This also verifies every issuing point, which may switch off an
    /// unusable daily update list.
    pub fn verify(&mut self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for ip in &mut self.issuing_points {
            if !names.insert(ip.name.clone()) {
                return Err(ConfigError::Other(format!(
                    "Issuing point '{}' is configured more than once",
                    ip.name
                )))
            }
            ip.verify().map_err(|e| {
                ConfigError::Other(format!(
                    "Invalid issuing point '{}': {}", ip.name, e
                ))
            })?;
        }
        Ok(())
    }
}

/// # Logging
impl Config {
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
            #[cfg(unix)]
            LogType::Syslog => self.syslog_logger(self.syslog_facility),
            #[cfg(not(unix))]
            LogType::Syslog => Err(ConfigError::other(
                "syslog is not supported on this platform",
            )),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger().chain(io::stderr()).apply().map_err(|e| {
            ConfigError::Other(format!("Failed to init stderr logging: {e}"))
        })
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!(
                    "Failed to open log file '{}': {}",
                    path.display(),
                    err
                );
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger().chain(file).apply().map_err(|e| {
            ConfigError::Other(format!("Failed to init file logging: {e}"))
        })
    }

    /// Creates a syslog logger and configures correctly.
    #[cfg(unix)]
    fn syslog_logger(
        &self, facility: syslog::Facility
    ) -> Result<(), ConfigError> {
        let process = env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| String::from(CRLD_SERVER_APP));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| {
                syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514))
            });
        match logger {
            Ok(logger) => {
                self.fern_logger().chain(logger).apply().map_err(|e| {
                    ConfigError::Other(format!("Failed to init syslog: {e}"))
                })
            }
            Err(err) => {
                Err(ConfigError::Other(format!("Cannot connect to syslog: {err}")))
            }
        }
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        // Cache mutations are logged at trace level and are too noisy
        // for anything but trace logging.
        let cache_level = self.log_level.min(LevelFilter::Debug);
        let audit_level = self.log_level.max(LevelFilter::Info);

        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("crld::ipoint::cache", cache_level)
            .level_for("crld::audit", audit_level)
    }
}


//------------ deserialize_storage_uri ---------------------------------------

/// Accepts a storage URI or, for a plain path, a local store at that path.
pub fn deserialize_storage_uri<'de, D>(d: D) -> Result<Url, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    match Url::parse(&string) {
        Ok(uri) => Ok(uri),
        Err(_) => Url::parse(&format!("local://{string}"))
            .map_err(serde::de::Error::custom),
    }
}


//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}

impl std::error::Error for ConfigError {}


//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn parse_default_config() {
        let mut config =
            Config::parse_str(include_str!("../defaults/crld.conf")).unwrap();
        config.verify().unwrap();
        assert_eq!(config.storage_uri.as_str(), "local://./data/");
        assert_eq!(config.log_type, LogType::File);
        assert_eq!(config.issuing_points.len(), 2);

        let master = &config.issuing_points[0];
        assert_eq!(master.name, test::handle("master"));
        assert!(master.enable_cache);
        assert_eq!(master.update_schema, 4);

        let partition = &config.issuing_points[1];
        assert_eq!(partition.begin_serial, Some(test::serial(0x1000)));
        assert!(partition.ca_certs_only);
    }

    #[test]
    fn plain_path_is_local_storage() {
        let config = Config::parse_str(
            "data_dir = \"/var/lib/crld\"\nlog_type = \"stderr\"\n"
        ).unwrap();
        assert_eq!(config.storage_uri.scheme(), "local");
        assert_eq!(config.log_type, LogType::Stderr);
        assert!(config.issuing_points.is_empty());
    }

    #[test]
    fn reject_duplicate_issuing_points() {
        let mut config = Config::parse_str(
            "[[issuing_points]]\nname = \"master\"\n\
             [[issuing_points]]\nname = \"master\"\n"
        ).unwrap();
        assert!(config.verify().is_err());
    }

    #[test]
    fn reject_invalid_issuing_point() {
        let mut config = Config::parse_str(
            "[[issuing_points]]\nname = \"master\"\nupdate_schema = 0\n"
        ).unwrap();
        assert!(config.verify().is_err());
    }
}
