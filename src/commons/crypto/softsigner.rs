//! Support for signing things using a software key (through openssl)
//! stored unencrypted on disk.
use std::fs;
use std::path::{Path, PathBuf};
use log::info;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use super::signer::{CrlSigner, Signature, SignerError, SigningAlgorithm};

use crate::constants::SIGNING_KEY_FILE as KEY_FILE_NAME;


//------------ OpenSslSigner -------------------------------------------------

/// An openssl based signer holding a single RSA key.
#[derive(Clone, Debug)]
pub struct OpenSslSigner {
    key_path: PathBuf,
    pkey: PKey<Private>,
}

impl OpenSslSigner {
    /// Loads the signing key from the given directory, creating a new
    /// 2048 bit RSA key if there is none yet.
    pub fn build(keys_dir: &Path) -> Result<Self, SignerError> {
        if !keys_dir.exists() {
            fs::create_dir_all(keys_dir)?;
        }
        if !keys_dir.is_dir() {
            return Err(SignerError::InvalidWorkDir(keys_dir.to_path_buf()));
        }

        let key_path = keys_dir.join(KEY_FILE_NAME);
        let pkey = if key_path.exists() {
            let pem = fs::read(&key_path)?;
            PKey::private_key_from_pem(&pem)
                .map_err(|e| SignerError::DecodeError(e.to_string()))?
        } else {
            let rsa = Rsa::generate(2048)?;
            let pkey = PKey::from_rsa(rsa)?;
            fs::write(&key_path, pkey.private_key_to_pem_pkcs8()?)?;
            info!("Created new CRL signing key at {}", key_path.display());
            pkey
        };

        Ok(OpenSslSigner { key_path, pkey })
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Returns the public key in PEM format.
    pub fn public_key_pem(&self) -> Result<Vec<u8>, SignerError> {
        Ok(self.pkey.public_key_to_pem()?)
    }

    fn digest(algorithm: SigningAlgorithm) -> MessageDigest {
        match algorithm {
            SigningAlgorithm::Sha256WithRsa => MessageDigest::sha256(),
            SigningAlgorithm::Sha384WithRsa => MessageDigest::sha384(),
            SigningAlgorithm::Sha512WithRsa => MessageDigest::sha512(),
        }
    }
}

impl CrlSigner for OpenSslSigner {
    fn sign(
        &self,
        data: &[u8],
        algorithm: SigningAlgorithm,
    ) -> Result<Signature, SignerError> {
        let mut signer = openssl::sign::Signer::new(
            Self::digest(algorithm), &self.pkey
        )?;
        signer.update(data)?;
        Ok(Signature::new(algorithm, signer.sign_to_vec()?))
    }
}


//------------ Tests ---------------------------------------------------------
