use std::collections::HashMap;

use chrono::NaiveDate;

use crate::models::{Device, DeviceHashRecord, DeviceReport, UnidentifiedHashRecord};

/// An account's known devices, indexed by the name the pool reports.
#[derive(Debug, Default, Clone)]
pub struct DeviceInventory {
    by_name: HashMap<String, Device>,
}

impl DeviceInventory {
    pub fn new(devices: Vec<Device>) -> Self {
        let by_name = devices.into_iter().map(|d| (d.name.clone(), d)).collect();
        DeviceInventory { by_name }
    }

    pub fn lookup(&self, reported_name: &str) -> Option<&Device> {
        self.by_name.get(reported_name)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Keys shared by every row produced from one page.
#[derive(Debug, Clone, Copy)]
pub struct RecordKey<'a> {
    pub account_id: &'a str,
    pub pool_coin_id: &'a str,
    pub hash_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerIdUpdate {
    pub device_id: String,
    pub pool_worker_id: i64,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reconciliation {
    pub device_rows: Vec<DeviceHashRecord>,
    pub unidentified_rows: Vec<UnidentifiedHashRecord>,
    pub worker_id_updates: Vec<WorkerIdUpdate>,
    /// Sum of every distinct report on the page, matched or not.
    pub page_hashrate: f64,
}

impl Reconciliation {
    pub fn row_count(&self) -> usize {
        self.device_rows.len() + self.unidentified_rows.len()
    }
}

/// Routes each report to a device row when its name is known to the account,
/// or to an unidentified row otherwise. Nothing is discarded. A name reported
/// twice on one page keeps its first position and its last value.
pub fn reconcile(
    inventory: &DeviceInventory,
    key: RecordKey<'_>,
    reports: Vec<DeviceReport>,
) -> Reconciliation {
    let mut latest: Vec<DeviceReport> = Vec::with_capacity(reports.len());
    let mut seen: HashMap<String, usize> = HashMap::new();
    for report in reports {
        match seen.get(&report.name) {
            Some(&i) => latest[i] = report,
            None => {
                seen.insert(report.name.clone(), latest.len());
                latest.push(report);
            }
        }
    }

    let mut out = Reconciliation::default();
    for report in latest {
        out.page_hashrate += report.hashrate_24h;
        match inventory.lookup(&report.name) {
            Some(device) => {
                if let Some(pool_worker_id) = report.pool_worker_id {
                    if device.pool_worker_id != Some(pool_worker_id) {
                        out.worker_id_updates.push(WorkerIdUpdate {
                            device_id: device.id.clone(),
                            pool_worker_id,
                        });
                    }
                }
                out.device_rows.push(DeviceHashRecord {
                    device_id: device.id.clone(),
                    pool_coin_id: key.pool_coin_id.to_string(),
                    hash_date: key.hash_date,
                    daily_hash: report.hashrate_24h,
                });
            }
            None => out.unidentified_rows.push(UnidentifiedHashRecord {
                account_id: key.account_id.to_string(),
                pool_coin_id: key.pool_coin_id.to_string(),
                hash_date: key.hash_date,
                reported_name: report.name,
                pool_worker_id: report.pool_worker_id,
                daily_hash: report.hashrate_24h,
            }),
        }
    }
    out
}

/// A zero, negative, non-finite or missing total means the pool had nothing
/// to say; it is never stored as a literal zero.
pub fn usable_total(total: Option<f64>) -> Option<f64> {
    total.filter(|t| t.is_finite() && *t > 0.0)
}
