//! Managing the issuing points of a certificate authority.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use clap::crate_version;
use log::{debug, info, warn};
use crate::api::{IssuingPointHandle, IssuingPointStatus, RevokedEntry, Serial};
use crate::commons::crypto::{OpenSslSigner, SigningAlgorithm};
use crate::commons::error::Error;
use crate::commons::CrlResult;
use crate::config::Config;
use crate::constants::CRLD_SERVER_APP;
use crate::ipoint::{
    Collaborators, ConfigUpdateReport, IssuingPoint, IssuingPointConfig,
    SystemClock,
};
use crate::publish::FilePublisher;
use crate::stores::{KvCertStore, KvRepository, KvRequestLog};


//------------ RevocationListener --------------------------------------------

/// Receives the revocation requests a certificate authority completed.
///
/// Each call is passed on to the issuing points whose serial range covers
/// the certificate.
pub trait RevocationListener: Send + Sync {
    fn revocation_completed(
        &self, request_id: Option<u64>, entry: RevokedEntry
    ) -> CrlResult<()>;

    fn unrevocation_completed(
        &self, request_id: Option<u64>, serial: &Serial
    ) -> CrlResult<()>;

    fn certificate_expired(&self, serial: &Serial) -> CrlResult<()>;
}


//------------ CloneConnector ------------------------------------------------

/// Passes requests on to another instance of the CA.
///
/// Used for serials no local issuing point is responsible for.
pub trait CloneConnector: fmt::Debug + Send + Sync {
    fn forward_revoked(
        &self, request_id: Option<u64>, entry: &RevokedEntry
    ) -> CrlResult<()>;

    fn forward_unrevoked(
        &self, request_id: Option<u64>, serial: &Serial
    ) -> CrlResult<()>;
}


//------------ CrlManager ----------------------------------------------------

/// The issuing points of one certificate authority.
///
/// All points share the same collaborators. A master point usually covers
/// all serials while partitioned points are limited to a serial range.
#[derive(Debug)]
pub struct CrlManager {
    collaborators: Collaborators,
    points: RwLock<BTreeMap<IssuingPointHandle, IssuingPoint>>,
    clone_connector: Option<Arc<dyn CloneConnector>>,
}

/// # Set up and initialization
impl CrlManager {
    pub fn new(collaborators: Collaborators) -> Self {
        CrlManager {
            collaborators,
            points: RwLock::new(BTreeMap::new()),
            clone_connector: None,
        }
    }

    pub fn with_clone_connector(
        mut self, connector: Arc<dyn CloneConnector>
    ) -> Self {
        self.clone_connector = Some(connector);
        self
    }

    /// Builds a manager for the daemon and starts all configured points.
    pub fn build(config: &Config) -> CrlResult<Self> {
        info!("Starting {} v{}", CRLD_SERVER_APP, crate_version!());
        info!("{CRLD_SERVER_APP} uses storage: {}", config.storage_uri);

        let collaborators = Collaborators {
            certs: Arc::new(KvCertStore::create(&config.storage_uri)?),
            requests: Arc::new(KvRequestLog::create(&config.storage_uri)?),
            repository: Arc::new(KvRepository::create(&config.storage_uri)?),
            signer: Arc::new(OpenSslSigner::build(&config.key_dir)?),
            publisher: Arc::new(FilePublisher::build(&config.publish_dir)?),
            clock: Arc::new(SystemClock),
        };

        let manager = CrlManager::new(collaborators);
        for ip_config in &config.issuing_points {
            manager.add_issuing_point(ip_config.clone())?;
        }
        Ok(manager)
    }

    /// Creates and starts an issuing point.
    pub fn add_issuing_point(
        &self, config: IssuingPointConfig
    ) -> CrlResult<IssuingPoint> {
        let mut points = self.points.write().expect("poisoned lock");
        if points.contains_key(&config.name) {
            return Err(Error::IssuingPointDuplicate(config.name))
        }
        let handle = config.name.clone();
        let point = IssuingPoint::create(config, self.collaborators.clone())?;
        point.start()?;
        points.insert(handle.clone(), point.clone());
        info!("Issuing point '{handle}' started");
        Ok(point)
    }

    /// Stops an issuing point and deletes everything stored for it.
    pub fn remove_issuing_point(
        &self, handle: &IssuingPointHandle
    ) -> CrlResult<()> {
        let point = self
            .points
            .write()
            .expect("poisoned lock")
            .remove(handle)
            .ok_or_else(|| Error::IssuingPointUnknown(handle.clone()))?;
        point.delete()
    }

    /// Stops all issuing points.
    ///
    /// Every point is stopped even if stopping one fails. The first error
    /// is returned.
    pub fn shutdown(&self) -> CrlResult<()> {
        let mut res = Ok(());
        for point in self.all() {
            if let Err(e) = point.shutdown() {
                warn!("Could not shut down '{}' cleanly: {e}", point.handle());
                if res.is_ok() {
                    res = Err(e);
                }
            }
        }
        res
    }
}

/// # Administration
impl CrlManager {
    pub fn get(&self, handle: &IssuingPointHandle) -> CrlResult<IssuingPoint> {
        self.points
            .read()
            .expect("poisoned lock")
            .get(handle)
            .cloned()
            .ok_or_else(|| Error::IssuingPointUnknown(handle.clone()))
    }

    pub fn issuing_points(&self) -> Vec<IssuingPointHandle> {
        self.points.read().expect("poisoned lock").keys().cloned().collect()
    }

    pub fn statuses(&self) -> Vec<IssuingPointStatus> {
        self.all().iter().map(IssuingPoint::status).collect()
    }

    pub fn update_config(
        &self,
        handle: &IssuingPointHandle,
        changes: &BTreeMap<String, String>,
    ) -> CrlResult<ConfigUpdateReport> {
        self.get(handle)?.update_config(changes)
    }

    pub fn request_manual_update(
        &self,
        handle: &IssuingPointHandle,
        algorithm: Option<SigningAlgorithm>,
    ) -> CrlResult<()> {
        self.get(handle)?.request_manual_update(algorithm)
    }

    fn all(&self) -> Vec<IssuingPoint> {
        self.points.read().expect("poisoned lock").values().cloned().collect()
    }

    /// Returns the issuing points responsible for a serial.
    fn responsible(&self, serial: &Serial) -> Vec<IssuingPoint> {
        self.all()
            .into_iter()
            .filter(|point| point.in_range(serial))
            .collect()
    }

    /// Runs `op` for every responsible point, returning the first error.
    fn for_responsible(
        &self,
        serial: &Serial,
        op: impl Fn(&IssuingPoint) -> CrlResult<()>,
    ) -> Option<CrlResult<()>> {
        let points = self.responsible(serial);
        if points.is_empty() {
            return None
        }
        let mut res = Ok(());
        for point in points {
            if let Err(e) = op(&point) {
                warn!(
                    "Issuing point '{}' could not record {serial}: {e}",
                    point.handle()
                );
                if res.is_ok() {
                    res = Err(e);
                }
            }
        }
        Some(res)
    }
}

impl RevocationListener for CrlManager {
    fn revocation_completed(
        &self, request_id: Option<u64>, entry: RevokedEntry
    ) -> CrlResult<()> {
        let serial = entry.serial.clone();
        let recorded = self.for_responsible(&serial, |point| {
            point.add_revoked(entry.clone(), request_id)
        });
        match (recorded, &self.clone_connector) {
            (Some(res), _) => res,
            (None, Some(connector)) => {
                debug!("Forwarding revocation of {serial} to clone");
                connector.forward_revoked(request_id, &entry)
            }
            (None, None) => {
                debug!("No issuing point for revoked serial {serial}");
                Ok(())
            }
        }
    }

    fn unrevocation_completed(
        &self, request_id: Option<u64>, serial: &Serial
    ) -> CrlResult<()> {
        let recorded = self.for_responsible(serial, |point| {
            point.add_unrevoked(serial, request_id)
        });
        match (recorded, &self.clone_connector) {
            (Some(res), _) => res,
            (None, Some(connector)) => {
                debug!("Forwarding unrevocation of {serial} to clone");
                connector.forward_unrevoked(request_id, serial)
            }
            (None, None) => {
                debug!("No issuing point for unrevoked serial {serial}");
                Ok(())
            }
        }
    }

    fn certificate_expired(&self, serial: &Serial) -> CrlResult<()> {
        self.for_responsible(serial, |point| point.add_expired(serial))
            .unwrap_or(Ok(()))
    }
}
