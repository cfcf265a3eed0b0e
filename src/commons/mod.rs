//! Common types used by the various crld components.
pub mod crypto;
pub mod error;
pub mod storage;
pub mod util;

pub use self::error::Error;

//------------ Response Aliases ----------------------------------------------

pub type CrlEmptyResult = std::result::Result<(), self::error::Error>;
pub type CrlResult<T> = std::result::Result<T, self::error::Error>;
