//! The RRD state store: one host slot plus the per-guest table.
//!
//! All mutation happens under a single mutex, held only for in-memory
//! work. Outbound transfer paths take deep-copy snapshots under the lock
//! and do their I/O after releasing it.

use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use domstats::ds::{DataSourceSpec, DsOwner, Sample};

use crate::rrd::Rrd;

/// Domain id recorded for entries whose domain is not (yet) known.
pub const UNKNOWN_DOMID: i64 = -1;

// ─── Data Model ─────────────────────────────────────────────────────

/// Everything the daemon holds for one entity: the live series, the
/// descriptors its producers declared, and the backing domain id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrdInfo {
    /// The live series.
    pub rrd: Rrd,
    /// Every descriptor seen from producers, enabled or not.
    pub known_datasources: Vec<DataSourceSpec>,
    /// Backing domain id; [`UNKNOWN_DOMID`] until the control plane says.
    #[serde(default = "unknown_domid")]
    pub domid: i64,
}

fn unknown_domid() -> i64 {
    UNKNOWN_DOMID
}

/// A known descriptor annotated with whether its series is live.
#[derive(Debug, Clone)]
pub struct DatasourceStatus {
    /// The descriptor as declared by the producer.
    pub spec: DataSourceSpec,
    /// Whether the datasource currently records into the series.
    pub enabled: bool,
}

/// Errors from store queries and datasource mutations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The named guest has no entry in the store.
    #[error("guest {uuid} is not in the store")]
    GuestNotFound {
        /// Guest uuid as given by the caller.
        uuid: String,
    },

    /// The entity exists but knows no datasource by that name.
    #[error("datasource {name} is not known to this entity")]
    DatasourceNotFound {
        /// Datasource name as given by the caller.
        name: String,
    },

    /// A query hit the host slot while it is empty.
    #[error("the host RRD slot is empty")]
    NoDataSource,
}

// ─── Store ──────────────────────────────────────────────────────────

pub(crate) struct StoreInner {
    host: Option<RrdInfo>,
    guests: HashMap<String, RrdInfo>,
}

/// Mutex-guarded host slot + guest table.
pub struct RrdStore {
    inner: Mutex<StoreInner>,
}

impl Default for RrdStore {
    fn default() -> Self {
        RrdStore::new()
    }
}

impl RrdStore {
    /// Empty store: no host RRD, no guests.
    pub fn new() -> Self {
        RrdStore {
            inner: Mutex::new(StoreInner {
                host: None,
                guests: HashMap::new(),
            }),
        }
    }

    /// Whether the given guest has a live RRD.
    pub fn has_guest_rrd(&self, uuid: &str) -> bool {
        self.inner.lock().guests.contains_key(uuid)
    }

    // ─── Guest Datasource Operations ───

    /// Enable a known datasource on a guest. The series gains the source
    /// with an unknown initial value; enabling an enabled source is a
    /// no-op.
    pub fn add_guest_datasource(&self, uuid: &str, ds_name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let info = guest_mut(&mut inner, uuid)?;
        let spec = known_spec(info, ds_name)?;
        info.rrd.add_source(&spec);
        Ok(())
    }

    /// Disable a known datasource on a guest. The descriptor stays known.
    pub fn remove_guest_datasource(&self, uuid: &str, ds_name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let info = guest_mut(&mut inner, uuid)?;
        known_spec(info, ds_name)?;
        info.rrd.remove_source(ds_name);
        Ok(())
    }

    /// Latest recorded value of an enabled guest datasource.
    pub fn query_guest_datasource(&self, uuid: &str, ds_name: &str) -> Result<f64, StoreError> {
        let inner = self.inner.lock();
        let info = inner
            .guests
            .get(uuid)
            .ok_or_else(|| StoreError::GuestNotFound { uuid: uuid.into() })?;
        info.rrd
            .last_value(ds_name)
            .ok_or_else(|| StoreError::DatasourceNotFound {
                name: ds_name.into(),
            })
    }

    /// Every known guest descriptor, annotated with enabled-ness.
    pub fn list_possible_guest_datasources(
        &self,
        uuid: &str,
    ) -> Result<Vec<DatasourceStatus>, StoreError> {
        let inner = self.inner.lock();
        let info = inner
            .guests
            .get(uuid)
            .ok_or_else(|| StoreError::GuestNotFound { uuid: uuid.into() })?;
        Ok(status_list(info))
    }

    // ─── Host Datasource Operations ───

    /// Enable a known host datasource. A no-op while the host slot is
    /// empty.
    pub fn add_host_datasource(&self, ds_name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let Some(info) = inner.host.as_mut() else {
            return Ok(());
        };
        let spec = known_spec(info, ds_name)?;
        info.rrd.add_source(&spec);
        Ok(())
    }

    /// Disable a known host datasource. A no-op while the host slot is
    /// empty.
    pub fn remove_host_datasource(&self, ds_name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let Some(info) = inner.host.as_mut() else {
            return Ok(());
        };
        known_spec(info, ds_name)?;
        info.rrd.remove_source(ds_name);
        Ok(())
    }

    /// Latest recorded value of an enabled host datasource.
    pub fn query_host_datasource(&self, ds_name: &str) -> Result<f64, StoreError> {
        let inner = self.inner.lock();
        let info = inner.host.as_ref().ok_or(StoreError::NoDataSource)?;
        info.rrd
            .last_value(ds_name)
            .ok_or_else(|| StoreError::DatasourceNotFound {
                name: ds_name.into(),
            })
    }

    /// Every known host descriptor, annotated with enabled-ness. Empty
    /// while the host slot is.
    pub fn list_possible_host_datasources(&self) -> Vec<DatasourceStatus> {
        let inner = self.inner.lock();
        inner.host.as_ref().map(status_list).unwrap_or_default()
    }

    // ─── Raw Slot Writers (load / push / migrate paths) ───

    /// Insert or overwrite a guest entry wholesale.
    pub fn replace_guest(&self, uuid: &str, info: RrdInfo) {
        self.inner.lock().guests.insert(uuid.to_string(), info);
    }

    /// Remove and return a guest entry.
    pub fn remove_guest(&self, uuid: &str) -> Option<RrdInfo> {
        self.inner.lock().guests.remove(uuid)
    }

    /// Set or clear the host slot.
    pub fn set_host(&self, info: Option<RrdInfo>) {
        self.inner.lock().host = info;
    }

    /// Deep copy of the host slot.
    pub fn snapshot_host(&self) -> Option<RrdInfo> {
        self.inner.lock().host.clone()
    }

    // ─── Snapshots ───

    /// Deep copy of every live entry, taken under the lock.
    pub fn snapshot_all(&self) -> (Option<RrdInfo>, Vec<(String, RrdInfo)>) {
        let inner = self.inner.lock();
        snapshot(&inner)
    }

    /// Like [`RrdStore::snapshot_all`] but with a single try-lock; `None`
    /// when the store is busy. The backup path builds its bounded-retry
    /// policy on this.
    pub fn try_snapshot_all(&self) -> Option<(Option<RrdInfo>, Vec<(String, RrdInfo)>)> {
        self.inner.try_lock().map(|inner| snapshot(&inner))
    }

    // ─── Sample Ingestion ───

    /// Fold one cycle's flat sample list into per-entity updates.
    ///
    /// Host samples update the host slot (creating it on first sight),
    /// guest samples update or create guest entries. Storage-owned
    /// samples have no slot here and are dropped with a debug log.
    pub fn fold_samples(&self, timestamp: f64, samples: Vec<(DsOwner, Sample)>) {
        let mut host_batch = Vec::new();
        let mut guest_batches: HashMap<String, Vec<Sample>> = HashMap::new();
        for (owner, sample) in samples {
            match owner {
                DsOwner::Host => host_batch.push(sample),
                DsOwner::Guest(uuid) => guest_batches.entry(uuid).or_default().push(sample),
                DsOwner::Sr(uuid) => {
                    debug!(sr = %uuid, name = %sample.spec.name, "dropping storage-owned sample");
                }
            }
        }
        if !host_batch.is_empty() {
            self.update_host(timestamp, &host_batch);
        }
        for (uuid, batch) in guest_batches {
            self.update_guest(&uuid, None, timestamp, &batch);
        }
    }

    /// Fold one batch of host samples into the host slot.
    pub fn update_host(&self, timestamp: f64, samples: &[Sample]) {
        let mut inner = self.inner.lock();
        match inner.host.as_mut() {
            Some(info) => apply_batch(info, None, timestamp, samples),
            None => inner.host = Some(new_entry(timestamp, samples, UNKNOWN_DOMID)),
        }
    }

    /// Fold one batch of guest samples into the guest's entry, creating
    /// it on first sight. `domid`, when given, overwrites the recorded
    /// domain id (it changes across migration).
    pub fn update_guest(
        &self,
        uuid: &str,
        domid: Option<i64>,
        timestamp: f64,
        samples: &[Sample],
    ) {
        let mut inner = self.inner.lock();
        match inner.guests.get_mut(uuid) {
            Some(info) => apply_batch(info, domid, timestamp, samples),
            None => {
                let entry = new_entry(timestamp, samples, domid.unwrap_or(UNKNOWN_DOMID));
                inner.guests.insert(uuid.to_string(), entry);
            }
        }
    }

    pub(crate) fn raw_lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock()
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn guest_mut<'a>(inner: &'a mut StoreInner, uuid: &str) -> Result<&'a mut RrdInfo, StoreError> {
    inner
        .guests
        .get_mut(uuid)
        .ok_or_else(|| StoreError::GuestNotFound { uuid: uuid.into() })
}

fn known_spec(info: &RrdInfo, ds_name: &str) -> Result<DataSourceSpec, StoreError> {
    info.known_datasources
        .iter()
        .find(|s| s.name == ds_name)
        .cloned()
        .ok_or_else(|| StoreError::DatasourceNotFound {
            name: ds_name.into(),
        })
}

fn status_list(info: &RrdInfo) -> Vec<DatasourceStatus> {
    info.known_datasources
        .iter()
        .map(|spec| DatasourceStatus {
            enabled: info.rrd.contains(&spec.name),
            spec: spec.clone(),
        })
        .collect()
}

fn snapshot(inner: &StoreInner) -> (Option<RrdInfo>, Vec<(String, RrdInfo)>) {
    let guests = inner
        .guests
        .iter()
        .map(|(uuid, info)| (uuid.clone(), info.clone()))
        .collect();
    (inner.host.clone(), guests)
}

/// Fold a batch into an existing entry: refresh the known descriptors,
/// auto-enable newly declared default datasources, then record values.
fn apply_batch(info: &mut RrdInfo, domid: Option<i64>, timestamp: f64, samples: &[Sample]) {
    if let Some(domid) = domid {
        info.domid = domid;
    }
    info.known_datasources = samples.iter().map(|s| s.spec.clone()).collect();
    for sample in samples {
        if sample.spec.default_enabled && !info.rrd.contains(&sample.spec.name) {
            info.rrd.add_source(&sample.spec);
        }
    }
    let values: Vec<(&str, f64)> = samples
        .iter()
        .map(|s| (s.spec.name.as_str(), s.value))
        .collect();
    info.rrd.update(timestamp, &values);
}

fn new_entry(timestamp: f64, samples: &[Sample], domid: i64) -> RrdInfo {
    let mut info = RrdInfo {
        rrd: Rrd::new(timestamp),
        known_datasources: Vec::new(),
        domid,
    };
    apply_batch(&mut info, None, timestamp, samples);
    info
}
