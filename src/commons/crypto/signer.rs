use std::path::PathBuf;
use std::str::FromStr;
use std::{fmt, io};
use openssl::error::ErrorStack;
use serde::{Deserialize, Serialize};
use crate::commons::util::ext_serde;


//------------ CrlSigner -----------------------------------------------------

/// Signs the encoded content of a CRL.
///
/// Implementations are stateless from the point of view of the issuing
/// point and may be called from any worker thread.
pub trait CrlSigner: fmt::Debug + Send + Sync {
    fn sign(
        &self,
        data: &[u8],
        algorithm: SigningAlgorithm,
    ) -> Result<Signature, SignerError>;
}


//------------ SigningAlgorithm ----------------------------------------------

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum SigningAlgorithm {
    #[default]
    #[serde(rename = "SHA256withRSA")]
    Sha256WithRsa,

    #[serde(rename = "SHA384withRSA")]
    Sha384WithRsa,

    #[serde(rename = "SHA512withRSA")]
    Sha512WithRsa,
}

impl FromStr for SigningAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SHA256WITHRSA" => Ok(SigningAlgorithm::Sha256WithRsa),
            "SHA384WITHRSA" => Ok(SigningAlgorithm::Sha384WithRsa),
            "SHA512WITHRSA" => Ok(SigningAlgorithm::Sha512WithRsa),
            _ => Err(format!("unsupported signing algorithm: {s}")),
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SigningAlgorithm::Sha256WithRsa => write!(f, "SHA256withRSA"),
            SigningAlgorithm::Sha384WithRsa => write!(f, "SHA384withRSA"),
            SigningAlgorithm::Sha512WithRsa => write!(f, "SHA512withRSA"),
        }
    }
}


//------------ Signature -----------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Signature {
    algorithm: SigningAlgorithm,

    #[serde(
        serialize_with = "ext_serde::ser_bytes",
        deserialize_with = "ext_serde::de_bytes"
    )]
    value: Vec<u8>,
}

impl Signature {
    pub fn new(algorithm: SigningAlgorithm, value: Vec<u8>) -> Self {
        Signature { algorithm, value }
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}


//------------ SignerError ---------------------------------------------------

#[derive(Debug)]
pub enum SignerError {
    OpenSslError(ErrorStack),
    InvalidWorkDir(PathBuf),
    IoError(io::Error),
    KeyNotFound,
    DecodeError(String),
    Other(String),
}

impl SignerError {
    pub fn other(msg: impl fmt::Display) -> Self {
        SignerError::Other(msg.to_string())
    }
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignerError::OpenSslError(e) => write!(f, "OpenSsl Error: {e}"),
            SignerError::InvalidWorkDir(path) => {
                write!(f, "Invalid base path: {}", path.to_string_lossy())
            }
            SignerError::IoError(e) => e.fmt(f),
            SignerError::KeyNotFound => write!(f, "Could not find key"),
            SignerError::DecodeError(e) => {
                write!(f, "Could not decode key: {e}")
            }
            SignerError::Other(e) => e.fmt(f),
        }
    }
}

impl From<ErrorStack> for SignerError {
    fn from(e: ErrorStack) -> Self {
        SignerError::OpenSslError(e)
    }
}

impl From<io::Error> for SignerError {
    fn from(e: io::Error) -> Self {
        SignerError::IoError(e)
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_names() {
        assert_eq!(
            SigningAlgorithm::from_str("sha384WithRSA").unwrap(),
            SigningAlgorithm::Sha384WithRsa
        );
        assert!(SigningAlgorithm::from_str("md5WithRSA").is_err());
        assert_eq!(
            serde_json::to_string(&SigningAlgorithm::Sha512WithRsa).unwrap(),
            "\"SHA512withRSA\""
        );
    }

    #[test]
    fn signature_value_is_base64_in_json() {
        let sig = Signature::new(SigningAlgorithm::default(), vec![1, 2, 3]);
        let json = serde_json::to_string(&sig).unwrap();
        assert!(json.contains("\"AQID\""));
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }
}
