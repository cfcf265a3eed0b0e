//! Running issuing points in a process.

pub use self::manager::{CloneConnector, CrlManager, RevocationListener};
pub use self::start::start;

pub mod manager;
pub mod start;
