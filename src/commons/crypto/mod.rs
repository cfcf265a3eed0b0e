//! Signing of CRL content.

pub use self::signer::{CrlSigner, Signature, SignerError, SigningAlgorithm};
pub use self::softsigner::OpenSslSigner;

mod signer;
mod softsigner;
