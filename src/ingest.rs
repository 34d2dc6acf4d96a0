use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::{
    models::{
        Account, AccountHashRecord, Coin, DeviceHashRecord, DeviceReport, UnidentifiedHashRecord,
    },
    pools::{AdapterFactory, DateRange, DevicePage, FetchContext, FetchError, HistoryPage, PoolApi, Provider},
    reconcile::{reconcile, usable_total, DeviceInventory, RecordKey, WorkerIdUpdate},
    retry::RetryPolicy,
    slots::SlotPools,
    store::{AccountStore, HashSink},
};

/// Upper bound on pages followed one by one when a provider only reports
/// `has_next`.
const MAX_SEQUENTIAL_PAGES: u32 = 1_000;

/// Daily figures describe the previous day.
pub fn processing_date(now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    today.pred_opt().unwrap_or(today)
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Daily(NaiveDate),
    Backfill(DateRange),
}

#[derive(Debug, Default)]
struct CycleCounters {
    accounts: AtomicU64,
    accounts_skipped: AtomicU64,
    units_ok: AtomicU64,
    units_failed: AtomicU64,
    units_skipped: AtomicU64,
    account_rows: AtomicU64,
    device_rows: AtomicU64,
    unidentified_rows: AtomicU64,
    worker_ids_recorded: AtomicU64,
    writes_failed: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Summary of one finished cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub mode: &'static str,
    pub hash_date: Option<NaiveDate>,
    pub range_start: Option<NaiveDate>,
    pub range_end: Option<NaiveDate>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub accounts: u64,
    pub accounts_skipped: u64,
    pub units_ok: u64,
    pub units_failed: u64,
    pub units_skipped: u64,
    pub account_rows: u64,
    pub device_rows: u64,
    pub unidentified_rows: u64,
    pub worker_ids_recorded: u64,
    pub writes_failed: u64,
}

#[derive(Clone)]
struct Cycle {
    id: String,
    started: Instant,
    started_at: DateTime<Utc>,
    counters: Arc<CycleCounters>,
}

impl Cycle {
    fn new() -> Self {
        Cycle {
            id: uuid::Uuid::new_v4().to_string(),
            started: Instant::now(),
            started_at: Utc::now(),
            counters: Arc::default(),
        }
    }

    fn report(&self, mode: Mode) -> CycleReport {
        let c = &self.counters;
        let read = |v: &AtomicU64| v.load(Ordering::Relaxed);
        let (hash_date, range_start, range_end, mode_name) = match mode {
            Mode::Daily(date) => (Some(date), None, None, "daily"),
            Mode::Backfill(range) => (None, Some(range.start), Some(range.end), "backfill"),
        };
        CycleReport {
            cycle_id: self.id.clone(),
            mode: mode_name,
            hash_date,
            range_start,
            range_end,
            started_at: self.started_at,
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            accounts: read(&c.accounts),
            accounts_skipped: read(&c.accounts_skipped),
            units_ok: read(&c.units_ok),
            units_failed: read(&c.units_failed),
            units_skipped: read(&c.units_skipped),
            account_rows: read(&c.account_rows),
            device_rows: read(&c.device_rows),
            unidentified_rows: read(&c.unidentified_rows),
            worker_ids_recorded: read(&c.worker_ids_recorded),
            writes_failed: read(&c.writes_failed),
        }
    }
}

/// One eligible account with everything resolved for it.
struct AccountUnit {
    account: Account,
    pool_id: String,
    ctx: FetchContext,
    inventory: DeviceInventory,
    adapter: Arc<dyn PoolApi>,
}

/// The smallest retryable unit: one account on one coin.
struct CoinUnit {
    owner: Arc<AccountUnit>,
    coin: Coin,
    pool_coin_id: String,
}

impl CoinUnit {
    fn account_id(&self) -> &str {
        &self.owner.account.id
    }

    fn account_name(&self) -> &str {
        &self.owner.account.name
    }

    fn adapter(&self) -> &dyn PoolApi {
        self.owner.adapter.as_ref()
    }
}

enum UnitOutcome {
    Done,
    Failed,
    Skipped,
}

enum WriteJob {
    Account(AccountHashRecord),
    Device(DeviceHashRecord),
    Unidentified(UnidentifiedHashRecord),
    WorkerId(WorkerIdUpdate),
}

impl WriteJob {
    fn describe(&self) -> String {
        match self {
            WriteJob::Account(r) => format!("account hash for {}", r.hash_date),
            WriteJob::Device(r) => format!("device hash for device {} on {}", r.device_id, r.hash_date),
            WriteJob::Unidentified(r) => {
                format!("unidentified hash for {:?} on {}", r.reported_name, r.hash_date)
            }
            WriteJob::WorkerId(u) => {
                format!("pool worker id {} for device {}", u.pool_worker_id, u.device_id)
            }
        }
    }
}

/// Fetch, reconcile and persist cycles over every active account.
///
/// Outbound pool calls and database statements are bounded by two separate
/// slot pools. Failures are contained to the page or account×coin they hit.
#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<dyn AccountStore>,
    sink: Arc<dyn HashSink>,
    adapters: Arc<dyn AdapterFactory>,
    slots: SlotPools,
    retry: RetryPolicy,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn AccountStore>,
        sink: Arc<dyn HashSink>,
        adapters: Arc<dyn AdapterFactory>,
        slots: SlotPools,
        retry: RetryPolicy,
    ) -> Self {
        IngestPipeline {
            store,
            sink,
            adapters,
            slots,
            retry,
        }
    }

    pub async fn run_daily_cycle(&self, hash_date: NaiveDate) -> CycleReport {
        let cycle = Cycle::new();
        let mode = Mode::Daily(hash_date);
        info!(target: "server_log", "{} - Starting daily hashrate cycle for {} (api slots: {}, db slots: {})", cycle.id, hash_date, self.slots.api.capacity(), self.slots.db.capacity());
        self.run(&cycle, mode, None).await;
        finish(&cycle, mode)
    }

    pub async fn run_backfill(&self, range: DateRange, account_name: Option<String>) -> CycleReport {
        let cycle = Cycle::new();
        let mode = Mode::Backfill(range);
        info!(target: "server_log", "{} - Starting hashrate backfill from {} to {}", cycle.id, range.start, range.end);
        self.run(&cycle, mode, account_name.as_deref()).await;
        finish(&cycle, mode)
    }

    async fn run(&self, cycle: &Cycle, mode: Mode, account_name: Option<&str>) {
        let accounts = match self.slots.db.run(self.store.list_active_accounts()).await {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(target: "server_log", "{} - Failed to list active accounts: {}", cycle.id, e);
                return;
            }
        };

        let mut tasks = JoinSet::new();
        for account in accounts {
            if account_name.is_some_and(|name| name != account.name) {
                continue;
            }
            bump(&cycle.counters.accounts);
            let this = self.clone();
            let cycle = cycle.clone();
            tasks.spawn(async move { this.process_account(&cycle, mode, account).await });
        }
        drain(&mut tasks, &cycle.id).await;
    }

    async fn process_account(&self, cycle: &Cycle, mode: Mode, account: Account) {
        let Some(unit) = self.resolve_account(cycle, account).await else {
            bump(&cycle.counters.accounts_skipped);
            return;
        };
        let unit = Arc::new(unit);

        let coins = match self.slots.db.run(self.store.get_coins(&unit.pool_id)).await {
            Ok(coins) => coins,
            Err(e) => {
                error!(target: "server_log", "{} - Failed to load coins for account {}: {}", cycle.id, unit.account.name, e);
                bump(&cycle.counters.accounts_skipped);
                return;
            }
        };
        if coins.is_empty() {
            info!(target: "server_log", "{} - Pool {} tracks no coins for account {}", cycle.id, unit.ctx.base_url, unit.account.name);
        }

        let mut tasks = JoinSet::new();
        for coin in coins {
            let this = self.clone();
            let cycle = cycle.clone();
            let unit = unit.clone();
            tasks.spawn(async move {
                let outcome = this.process_coin(&cycle, mode, unit, coin).await;
                let counter = match outcome {
                    UnitOutcome::Done => &cycle.counters.units_ok,
                    UnitOutcome::Failed => &cycle.counters.units_failed,
                    UnitOutcome::Skipped => &cycle.counters.units_skipped,
                };
                bump(counter);
            });
        }
        drain(&mut tasks, &cycle.id).await;
    }

    /// Everything needed before any network call. `None` means the account is
    /// skipped for this cycle; the reason has been logged.
    async fn resolve_account(&self, cycle: &Cycle, account: Account) -> Option<AccountUnit> {
        let Some(pool_id) = account.eligible_pool_id().map(str::to_string) else {
            warn!(target: "server_log", "{} - Skipping account {}: missing public key or pool reference", cycle.id, account.name);
            return None;
        };

        let pool = match self.slots.db.run(self.store.get_pool(&pool_id)).await {
            Ok(pool) => pool,
            Err(e) => {
                warn!(target: "server_log", "{} - Skipping account {}: failed to load pool {}: {}", cycle.id, account.name, pool_id, e);
                return None;
            }
        };

        let provider = match pool.name.parse::<Provider>() {
            Ok(provider) => provider,
            Err(e) => {
                warn!(target: "server_log", "{} - Skipping account {}: {}", cycle.id, account.name, e);
                return None;
            }
        };

        let credentials = match self.slots.db.run(self.store.get_credentials(&account.id)).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(target: "server_log", "{} - Skipping account {}: failed to load credentials: {}", cycle.id, account.name, e);
                return None;
            }
        };
        if provider.requires_secret() && !credentials.has_secret() {
            warn!(target: "server_log", "{} - Skipping account {}: {} signs requests and the account has no secret key", cycle.id, account.name, provider.as_str());
            return None;
        }

        let devices = match self.slots.db.run(self.store.list_devices(&account.id)).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(target: "server_log", "{} - Skipping account {}: failed to load devices: {}", cycle.id, account.name, e);
                return None;
            }
        };
        let inventory = DeviceInventory::new(devices);
        if inventory.is_empty() {
            debug!(target: "server_log", "{} - Account {} has no known devices; every report will be quarantined", cycle.id, account.name);
        }
        info!(target: "server_log", "{} - Processing account {} on {} with {} known devices", cycle.id, account.name, provider.as_str(), inventory.len());

        Some(AccountUnit {
            ctx: FetchContext {
                base_url: pool.url,
                account_name: account.name.clone(),
                credentials,
            },
            adapter: self.adapters.adapter_for(provider),
            account,
            pool_id,
            inventory,
        })
    }

    async fn process_coin(
        &self,
        cycle: &Cycle,
        mode: Mode,
        owner: Arc<AccountUnit>,
        coin: Coin,
    ) -> UnitOutcome {
        let pool_coin = self
            .slots
            .db
            .run(self.store.resolve_pool_coin(&owner.pool_id, &coin.code))
            .await;
        let pool_coin_id = match pool_coin {
            Ok(Some(id)) if !id.is_empty() => id,
            Ok(_) => {
                warn!(target: "server_log", "{} - No pool coin for pool {} and coin {}; dropping reports of account {} for this coin", cycle.id, owner.pool_id, coin.code, owner.account.name);
                return UnitOutcome::Skipped;
            }
            Err(e) => {
                error!(target: "server_log", "{} - Failed to resolve pool coin {} for account {}: {}", cycle.id, coin.code, owner.account.name, e);
                return UnitOutcome::Failed;
            }
        };

        let unit = Arc::new(CoinUnit {
            owner,
            coin,
            pool_coin_id,
        });
        let complete = match mode {
            Mode::Daily(date) => self.ingest_daily(cycle, &unit, date).await,
            Mode::Backfill(range) => {
                if !unit.adapter().supports_history() {
                    info!(target: "server_log", "{} - {} has no history endpoints; skipping backfill of account {} coin {}", cycle.id, unit.adapter().provider().as_str(), unit.account_name(), unit.coin.code);
                    return UnitOutcome::Skipped;
                }
                self.ingest_backfill(cycle, &unit, range).await
            }
        };
        if complete {
            UnitOutcome::Done
        } else {
            UnitOutcome::Failed
        }
    }

    async fn ingest_daily(&self, cycle: &Cycle, unit: &Arc<CoinUnit>, date: NaiveDate) -> bool {
        let first = match self.fetch_page(cycle, unit, 1).await {
            Ok(page) => page,
            Err(e) => {
                error!(target: "server_log", "{} - Abandoning account {} coin {}: page 1 failed after {} attempts: {}", cycle.id, unit.account_name(), unit.coin.code, self.retry.max_attempts, e);
                return false;
            }
        };

        let mut complete = true;
        let mut page_sum = self.handle_page(cycle, unit, date, first.reports).await;

        match first.total_pages {
            Some(total) if total > 1 => {
                let mut pages = JoinSet::new();
                for page in 2..=total {
                    let this = self.clone();
                    let cycle = cycle.clone();
                    let unit = unit.clone();
                    pages.spawn(async move {
                        match this.fetch_page(&cycle, &unit, page).await {
                            Ok(fetched) => Some(this.handle_page(&cycle, &unit, date, fetched.reports).await),
                            Err(e) => {
                                error!(target: "server_log", "{} - Dropping page {} of account {} coin {} after {} attempts: {}", cycle.id, page, unit.account_name(), unit.coin.code, this.retry.max_attempts, e);
                                None
                            }
                        }
                    });
                }
                while let Some(joined) = pages.join_next().await {
                    match joined {
                        Ok(Some(sum)) => page_sum += sum,
                        Ok(None) => complete = false,
                        Err(e) => {
                            error!(target: "server_log", "{} - Page task for account {} coin {} aborted: {}", cycle.id, unit.account_name(), unit.coin.code, e);
                            complete = false;
                        }
                    }
                }
            }
            None if first.has_next => {
                let mut page = 2;
                loop {
                    let fetched = match self.fetch_page(cycle, unit, page).await {
                        Ok(fetched) => fetched,
                        Err(e) => {
                            error!(target: "server_log", "{} - Stopping at page {} of account {} coin {} after {} attempts: {}", cycle.id, page, unit.account_name(), unit.coin.code, self.retry.max_attempts, e);
                            complete = false;
                            break;
                        }
                    };
                    page_sum += self.handle_page(cycle, unit, date, fetched.reports).await;
                    if !fetched.has_next {
                        break;
                    }
                    if page >= MAX_SEQUENTIAL_PAGES {
                        warn!(target: "server_log", "{} - Account {} coin {} still reports more pages after {}; stopping", cycle.id, unit.account_name(), unit.coin.code, page);
                        break;
                    }
                    page += 1;
                }
            }
            _ => {}
        }

        self.record_account_total(cycle, unit, date, page_sum, complete).await && complete
    }

    /// Writes the account-level row from the pool's own total, or from the
    /// page sums when the pool has none. Returns false when the total could
    /// not be determined because of a failure.
    async fn record_account_total(
        &self,
        cycle: &Cycle,
        unit: &Arc<CoinUnit>,
        date: NaiveDate,
        page_sum: f64,
        pages_complete: bool,
    ) -> bool {
        let total = if unit.adapter().reports_account_total() {
            let what = format!("{} - Account total of {} coin {}", cycle.id, unit.account_name(), unit.coin.code);
            let fetched = self
                .retry
                .run(&what, || {
                    self.slots
                        .api
                        .run(unit.adapter().fetch_account_total(&unit.owner.ctx, &unit.coin))
                })
                .await;
            match fetched {
                Ok(total) => total,
                Err(e) => {
                    error!(target: "server_log", "{} - Failed to fetch account total of {} coin {} after {} attempts: {}", cycle.id, unit.account_name(), unit.coin.code, self.retry.max_attempts, e);
                    return false;
                }
            }
        } else if pages_complete {
            Some(page_sum)
        } else {
            warn!(target: "server_log", "{} - Not summing account total of {} coin {}: some pages are missing", cycle.id, unit.account_name(), unit.coin.code);
            return true;
        };

        match usable_total(total) {
            Some(daily_hash) => {
                let record = AccountHashRecord {
                    account_id: unit.account_id().to_string(),
                    pool_coin_id: unit.pool_coin_id.clone(),
                    hash_date: date,
                    daily_hash,
                };
                self.write(cycle, unit, WriteJob::Account(record)).await;
            }
            None => {
                info!(target: "server_log", "{} - No account hashrate available for {} coin {}; nothing written", cycle.id, unit.account_name(), unit.coin.code);
            }
        }
        true
    }

    async fn fetch_page(&self, cycle: &Cycle, unit: &CoinUnit, page: u32) -> Result<DevicePage, FetchError> {
        let what = format!("{} - Page {} of account {} coin {}", cycle.id, page, unit.account_name(), unit.coin.code);
        self.retry
            .run(&what, || {
                self.slots
                    .api
                    .run(unit.adapter().fetch_device_reports(&unit.owner.ctx, &unit.coin, page))
            })
            .await
    }

    /// Reconciles one page and persists it. Returns the page's hashrate sum.
    async fn handle_page(
        &self,
        cycle: &Cycle,
        unit: &Arc<CoinUnit>,
        date: NaiveDate,
        reports: Vec<DeviceReport>,
    ) -> f64 {
        let key = RecordKey {
            account_id: unit.account_id(),
            pool_coin_id: &unit.pool_coin_id,
            hash_date: date,
        };
        let outcome = reconcile(&unit.owner.inventory, key, reports);
        debug!(target: "server_log", "{} - Account {} coin {}: {} device rows, {} unidentified", cycle.id, unit.account_name(), unit.coin.code, outcome.device_rows.len(), outcome.unidentified_rows.len());

        let mut jobs = Vec::with_capacity(outcome.row_count() + outcome.worker_id_updates.len());
        jobs.extend(outcome.worker_id_updates.into_iter().map(WriteJob::WorkerId));
        jobs.extend(outcome.device_rows.into_iter().map(WriteJob::Device));
        jobs.extend(outcome.unidentified_rows.into_iter().map(WriteJob::Unidentified));
        self.write_all(cycle, unit, jobs).await;

        outcome.page_hashrate
    }

    async fn ingest_backfill(&self, cycle: &Cycle, unit: &Arc<CoinUnit>, range: DateRange) -> bool {
        let mut complete = self.backfill_account_history(cycle, unit, range).await;

        let (worker_ids, listed) = self.learn_worker_ids(cycle, unit).await;
        complete &= listed;

        let mut devices = JoinSet::new();
        for (device_id, pool_worker_id) in worker_ids {
            let this = self.clone();
            let cycle = cycle.clone();
            let unit = unit.clone();
            devices.spawn(async move {
                this.backfill_device_history(&cycle, &unit, device_id, pool_worker_id, range)
                    .await
            });
        }
        while let Some(joined) = devices.join_next().await {
            match joined {
                Ok(ok) => complete &= ok,
                Err(e) => {
                    error!(target: "server_log", "{} - Device backfill task for account {} aborted: {}", cycle.id, unit.account_name(), e);
                    complete = false;
                }
            }
        }
        complete
    }

    async fn backfill_account_history(&self, cycle: &Cycle, unit: &Arc<CoinUnit>, range: DateRange) -> bool {
        let mut page = 1;
        loop {
            let what = format!("{} - Account history page {} of {} coin {}", cycle.id, page, unit.account_name(), unit.coin.code);
            let fetched: Result<HistoryPage, FetchError> = self
                .retry
                .run(&what, || {
                    self.slots.api.run(unit.adapter().fetch_account_history(
                        &unit.owner.ctx,
                        &unit.coin,
                        &range,
                        page,
                    ))
                })
                .await;
            let history = match fetched {
                Ok(history) => history,
                Err(e) => {
                    error!(target: "server_log", "{} - Failed account history page {} of {} coin {} after {} attempts: {}", cycle.id, page, unit.account_name(), unit.coin.code, self.retry.max_attempts, e);
                    return false;
                }
            };

            let jobs = history
                .points
                .iter()
                .filter_map(|point| {
                    usable_total(Some(point.hashrate)).map(|daily_hash| {
                        WriteJob::Account(AccountHashRecord {
                            account_id: unit.account_id().to_string(),
                            pool_coin_id: unit.pool_coin_id.clone(),
                            hash_date: point.date,
                            daily_hash,
                        })
                    })
                })
                .collect();
            self.write_all(cycle, unit, jobs).await;

            if !history.has_next {
                return true;
            }
            if page >= MAX_SEQUENTIAL_PAGES {
                warn!(target: "server_log", "{} - Account history of {} coin {} still reports more pages after {}; stopping", cycle.id, unit.account_name(), unit.coin.code, page);
                return true;
            }
            page += 1;
        }
    }

    /// Walks the pool's current device list to pair known devices with
    /// pool-assigned ids, recording new ids as it goes.
    async fn learn_worker_ids(&self, cycle: &Cycle, unit: &Arc<CoinUnit>) -> (HashMap<String, i64>, bool) {
        let mut ids: HashMap<String, i64> = unit
            .owner
            .inventory_ids()
            .collect();

        let mut page = 1;
        loop {
            let fetched = match self.fetch_page(cycle, unit, page).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    error!(target: "server_log", "{} - Failed device list page {} of {} coin {} after {} attempts: {}", cycle.id, page, unit.account_name(), unit.coin.code, self.retry.max_attempts, e);
                    return (ids, false);
                }
            };

            let mut jobs = Vec::new();
            for report in &fetched.reports {
                let (Some(device), Some(pool_worker_id)) = (
                    unit.owner.inventory.lookup(&report.name),
                    report.pool_worker_id,
                ) else {
                    continue;
                };
                if ids.insert(device.id.clone(), pool_worker_id) != Some(pool_worker_id) {
                    jobs.push(WriteJob::WorkerId(WorkerIdUpdate {
                        device_id: device.id.clone(),
                        pool_worker_id,
                    }));
                }
            }
            self.write_all(cycle, unit, jobs).await;

            let more = match fetched.total_pages {
                Some(total) => page < total,
                None => fetched.has_next,
            };
            if !more {
                return (ids, true);
            }
            if page >= MAX_SEQUENTIAL_PAGES {
                warn!(target: "server_log", "{} - Device list of {} coin {} still reports more pages after {}; stopping", cycle.id, unit.account_name(), unit.coin.code, page);
                return (ids, true);
            }
            page += 1;
        }
    }

    async fn backfill_device_history(
        &self,
        cycle: &Cycle,
        unit: &Arc<CoinUnit>,
        device_id: String,
        pool_worker_id: i64,
        range: DateRange,
    ) -> bool {
        let mut page = 1;
        loop {
            let what = format!("{} - History page {} of device {} ({} coin {})", cycle.id, page, device_id, unit.account_name(), unit.coin.code);
            let fetched: Result<HistoryPage, FetchError> = self
                .retry
                .run(&what, || {
                    self.slots.api.run(unit.adapter().fetch_device_history(
                        &unit.owner.ctx,
                        &unit.coin,
                        pool_worker_id,
                        &range,
                        page,
                    ))
                })
                .await;
            let history = match fetched {
                Ok(history) => history,
                Err(e) => {
                    error!(target: "server_log", "{} - Failed history page {} of device {} ({} coin {}) after {} attempts: {}", cycle.id, page, device_id, unit.account_name(), unit.coin.code, self.retry.max_attempts, e);
                    return false;
                }
            };

            let jobs = history
                .points
                .iter()
                .map(|point| {
                    WriteJob::Device(DeviceHashRecord {
                        device_id: device_id.clone(),
                        pool_coin_id: unit.pool_coin_id.clone(),
                        hash_date: point.date,
                        daily_hash: point.hashrate,
                    })
                })
                .collect();
            self.write_all(cycle, unit, jobs).await;

            if !history.has_next {
                return true;
            }
            if page >= MAX_SEQUENTIAL_PAGES {
                warn!(target: "server_log", "{} - History of device {} ({} coin {}) still reports more pages after {}; stopping", cycle.id, device_id, unit.account_name(), unit.coin.code, page);
                return true;
            }
            page += 1;
        }
    }

    /// Runs every write concurrently, each under its own DB slot, and waits
    /// for all of them.
    async fn write_all(&self, cycle: &Cycle, unit: &Arc<CoinUnit>, jobs: Vec<WriteJob>) {
        if jobs.is_empty() {
            return;
        }
        let mut writes = JoinSet::new();
        for job in jobs {
            let this = self.clone();
            let cycle = cycle.clone();
            let unit = unit.clone();
            writes.spawn(async move { this.write(&cycle, &unit, job).await });
        }
        drain(&mut writes, &cycle.id).await;
    }

    async fn write(&self, cycle: &Cycle, unit: &CoinUnit, job: WriteJob) {
        let db = &self.slots.db;
        let result = match &job {
            WriteJob::Account(record) => db.run(self.sink.upsert_account_hash(record)).await,
            WriteJob::Device(record) => db.run(self.sink.upsert_device_hash(record)).await,
            WriteJob::Unidentified(record) => db.run(self.sink.upsert_unidentified(record)).await,
            WriteJob::WorkerId(update) => {
                db.run(self.store.record_pool_worker_id(&update.device_id, update.pool_worker_id))
                    .await
            }
        };

        let counters = &cycle.counters;
        match (result, &job) {
            (Ok(()), WriteJob::Account(_)) => bump(&counters.account_rows),
            (Ok(()), WriteJob::Device(_)) => bump(&counters.device_rows),
            (Ok(()), WriteJob::Unidentified(_)) => bump(&counters.unidentified_rows),
            (Ok(()), WriteJob::WorkerId(_)) => bump(&counters.worker_ids_recorded),
            (Err(e), WriteJob::WorkerId(_)) => {
                warn!(target: "server_log", "{} - Failed to record {} (account {}): {}", cycle.id, job.describe(), unit.account_name(), e);
            }
            (Err(e), _) => {
                bump(&counters.writes_failed);
                error!(target: "server_log", "{} - Dropping {} of account {} coin {}: {}", cycle.id, job.describe(), unit.account_name(), unit.coin.code, e);
            }
        }
    }
}

impl AccountUnit {
    fn inventory_ids(&self) -> impl Iterator<Item = (String, i64)> + '_ {
        self.inventory
            .devices()
            .filter_map(|d| d.pool_worker_id.map(|id| (d.id.clone(), id)))
    }
}

async fn drain(tasks: &mut JoinSet<()>, cycle_id: &str) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(target: "server_log", "{} - Task aborted: {}", cycle_id, e);
        }
    }
}

fn finish(cycle: &Cycle, mode: Mode) -> CycleReport {
    let report = cycle.report(mode);
    info!(target: "server_log", "{} - Cycle finished in {}ms: {} accounts ({} skipped), units ok/failed/skipped {}/{}/{}, rows account/device/unidentified {}/{}/{}, {} writes dropped", report.cycle_id, report.elapsed_ms, report.accounts, report.accounts_skipped, report.units_ok, report.units_failed, report.units_skipped, report.account_rows, report.device_rows, report.unidentified_rows, report.writes_failed);
    report
}
