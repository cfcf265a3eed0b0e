//! The _crld_ library crate.
//!
//! This crate implements the revocation subsystem of a certificate
//! authority: CRL issuing points that cache revocations, decide when a full
//! or delta CRL is due, and sign, store, and publish the result.

pub mod api;
pub mod commons;
pub mod config;
pub mod constants;
pub mod ipoint;
pub mod publish;
pub mod server;
pub mod stores;
pub mod test;
