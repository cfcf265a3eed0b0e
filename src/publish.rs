//! Publication of generated CRLs.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, info};
use crate::commons::error::{CrlIoError, Error};
use crate::commons::CrlResult;
use crate::ipoint::GeneratedCrl;


//------------ Publisher -----------------------------------------------------

/// Makes a CRL available to relying parties.
///
/// Failures are reported as [`Error::PublishFailed`]. The issuing point
/// keeps the CRL and tries again later.
pub trait Publisher: fmt::Debug + Send + Sync {
    /// Publishes a CRL to the given destination, or to the default one for
    /// its issuing point.
    fn publish(
        &self, crl: &GeneratedCrl, destination: Option<&str>
    ) -> CrlResult<()>;
}


//------------ FilePublisher -------------------------------------------------

/// Publishes CRLs as files in a directory.
///
/// A full CRL is written as `<name>.crl.json`, a delta CRL as
/// `<name>.delta.json`, where the name is the destination or the handle of
/// the issuing point. Files are replaced atomically.
#[derive(Clone, Debug)]
pub struct FilePublisher {
    base_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl FilePublisher {
    pub fn build(base_dir: &Path) -> CrlResult<Self> {
        let tmp_dir = base_dir.join(".tmp");
        fs::create_dir_all(&tmp_dir).map_err(|e| {
            CrlIoError::new(
                format!("Cannot create publication dir {}", tmp_dir.display()),
                e,
            )
        })?;
        Ok(FilePublisher { base_dir: base_dir.to_path_buf(), tmp_dir })
    }

    /// Returns the path a CRL is published at.
    pub fn path(
        &self, crl: &GeneratedCrl, destination: Option<&str>
    ) -> CrlResult<PathBuf> {
        let name = destination.unwrap_or(crl.issuing_point().as_str());
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\'])
        {
            return Err(Error::publish(
                format!("invalid publication destination '{name}'")
            ))
        }
        let suffix = if crl.is_delta() { "delta.json" } else { "crl.json" };
        Ok(self.base_dir.join(format!("{name}.{suffix}")))
    }
}

impl Publisher for FilePublisher {
    fn publish(
        &self, crl: &GeneratedCrl, destination: Option<&str>
    ) -> CrlResult<()> {
        let path = self.path(crl, destination)?;
        let bytes = crl.to_bytes()?;

        let tmp_file = tempfile::NamedTempFile::new_in(&self.tmp_dir)
            .map_err(Error::publish)?;
        fs::write(&tmp_file, &bytes).map_err(Error::publish)?;
        tmp_file.persist(&path).map_err(|e| {
            Error::publish(format!(
                "cannot rename {} to {}: {}",
                e.file.path().display(),
                path.display(),
                e.error
            ))
        })?;

        debug!("wrote {} bytes to {}", bytes.len(), path.display());
        info!("Published {crl} to {}", path.display());
        Ok(())
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::crypto::{Signature, SigningAlgorithm};
    use crate::ipoint::TbsCrl;
    use crate::test;

    fn crl(base: Option<u64>) -> GeneratedCrl {
        GeneratedCrl::new(
            TbsCrl {
                issuing_point: test::handle("master"),
                crl_number: 4,
                base_crl_number: base,
                this_update: test::time("2024-03-05T10:00:00Z"),
                next_update: None,
                algorithm: SigningAlgorithm::Sha256WithRsa,
                entries: vec![],
            },
            Signature::new(SigningAlgorithm::Sha256WithRsa, vec![1]),
        )
    }

    #[test]
    fn publish_to_files() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = FilePublisher::build(dir.path()).unwrap();

        publisher.publish(&crl(None), None).unwrap();
        publisher.publish(&crl(Some(3)), Some("public")).unwrap();

        let full = dir.path().join("master.crl.json");
        let delta = dir.path().join("public.delta.json");
        let back: GeneratedCrl =
            serde_json::from_slice(&fs::read(full).unwrap()).unwrap();
        assert_eq!(back, crl(None));
        assert!(delta.exists());

        assert!(publisher.publish(&crl(None), Some("../escape")).is_err());
    }
}
