//! The stores an issuing point reads from and writes to.
//!
//! Each store is a trait so that an issuing point can be run against a
//! certificate authority's own database. The `Kv*` implementations keep
//! everything in a [`KeyValueStore`](crate::commons::storage::KeyValueStore).

pub use self::certs::{
    CertificateStore, KvCertStore, RevokedQuery, StoredCertificate,
};
pub use self::points::{IssuingPointRepository, KvRepository};
pub use self::requests::{KvRequestLog, LoggedRequest, RequestKind, RequestLog};

mod certs;
mod points;
mod requests;
