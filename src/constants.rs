//! Various crld-wide constants.


//------------ Binary Names -------------------------------------------------

/// The friendly name of the `crld` binary.
pub const CRLD_SERVER_APP: &str = "crld";


//------------ Config Files Paths -------------------------------------------

/// The default path to the crld config file.
pub const CRLD_DEFAULT_CONFIG_FILE: &str = "/etc/crld.conf";


//------------ Environment Variables ----------------------------------------

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “info.”
pub const CRLD_ENV_LOG_LEVEL: &str = "CRLD_LOG_LEVEL";

/// The environment variable indicating the default storage URI.
///
/// The value will be overwritten with that in the config file. Defaults to
/// `local://./data` if not set or not a valid URI.
pub const CRLD_ENV_STORAGE_URI: &str = "CRLD_STORAGE_URI";


//------------ Logging ------------------------------------------------------

/// The log target for events that belong in the audit trail.
pub const AUDIT_LOG_TARGET: &str = "crld::audit";


//------------ Storage ------------------------------------------------------

/// The name of the signing key file in the key directory.
pub const SIGNING_KEY_FILE: &str = "crl_signing.key";
