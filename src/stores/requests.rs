//! The log of completed revocation requests.
//!
//! Every revocation and unrevocation the certificate authority completes is
//! appended here with an ascending id. Issuing points use the log to
//! recover pending changes they had not yet written when they stopped.

use std::fmt;
use std::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use crate::api::{RevokedEntry, Serial};
use crate::commons::error::Error;
use crate::commons::storage::{Key, KeyValueStore};
use crate::commons::CrlResult;

const NAMESPACE: &str = "requests";


//------------ RequestKind ---------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum RequestKind {
    Revoke(RevokedEntry),
    Unrevoke(Serial),
}

impl RequestKind {
    pub fn serial(&self) -> &Serial {
        match self {
            RequestKind::Revoke(entry) => &entry.serial,
            RequestKind::Unrevoke(serial) => serial,
        }
    }
}


//------------ LoggedRequest -------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LoggedRequest {
    pub id: u64,
    pub completed: DateTime<Utc>,
    pub kind: RequestKind,
}


//------------ RequestLog ----------------------------------------------------

pub trait RequestLog: fmt::Debug + Send + Sync {
    /// Returns up to `limit` completed requests with an id of at least
    /// `from`, in ascending id order.
    fn completed_since(
        &self, from: u64, limit: usize
    ) -> CrlResult<Vec<LoggedRequest>>;
}


//------------ KvRequestLog --------------------------------------------------

/// A request log kept in a key value store.
///
/// Requests are stored under their zero padded id, so the sorted keys are
/// in id order.
#[derive(Debug)]
pub struct KvRequestLog {
    kv: KeyValueStore,
    next_id: Mutex<u64>,
}

impl KvRequestLog {
    pub fn create(storage_uri: &Url) -> CrlResult<Self> {
        let kv = KeyValueStore::create(storage_uri, NAMESPACE)
            .map_err(Error::request_log)?;
        let last = kv
            .keys(None)
            .map_err(Error::request_log)?
            .iter()
            .filter_map(|key| Self::id(key))
            .max()
            .unwrap_or(0);
        Ok(KvRequestLog { kv, next_id: Mutex::new(last + 1) })
    }

    fn key(id: u64) -> CrlResult<Key> {
        Key::new_global(&format!("{id:020}.json")).map_err(Error::request_log)
    }

    fn id(key: &Key) -> Option<u64> {
        key.name().strip_suffix(".json")?.parse().ok()
    }

    /// Appends a completed request and returns its id.
    pub fn append(&self, kind: RequestKind) -> CrlResult<u64> {
        let mut next_id = self.next_id.lock().expect("poisoned lock");
        let id = *next_id;
        let request = LoggedRequest { id, completed: Utc::now(), kind };
        self.kv
            .store(&Self::key(id)?, &request)
            .map_err(Error::request_log)?;
        *next_id += 1;
        Ok(id)
    }
}

impl RequestLog for KvRequestLog {
    fn completed_since(
        &self, from: u64, limit: usize
    ) -> CrlResult<Vec<LoggedRequest>> {
        let mut res = vec![];
        for key in self.kv.keys(None).map_err(Error::request_log)? {
            if res.len() >= limit {
                break
            }
            if Self::id(&key).is_none_or(|id| id < from) {
                continue
            }
            if let Some(request) =
                self.kv.get(&key).map_err(Error::request_log)?
            {
                res.push(request);
            }
        }
        Ok(res)
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn append_and_read_back() {
        let uri = test::mem_storage();
        let log = KvRequestLog::create(&uri).unwrap();

        let first = log.append(RequestKind::Unrevoke(Serial::from(1))).unwrap();
        assert_eq!(first, 1);
        for serial in 2..=12u64 {
            log.append(RequestKind::Unrevoke(Serial::from(serial))).unwrap();
        }

        let page = log.completed_since(10, 100).unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
        assert_eq!(page[0].kind.serial(), &Serial::from(10));

        assert_eq!(log.completed_since(1, 5).unwrap().len(), 5);
        assert!(log.completed_since(13, 5).unwrap().is_empty());

        // A new log on the same storage continues the ids.
        let again = KvRequestLog::create(&uri).unwrap();
        assert_eq!(
            again.append(RequestKind::Unrevoke(Serial::from(1))).unwrap(),
            13
        );
    }
}
