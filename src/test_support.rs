//! In-memory collaborators for pipeline tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    Router,
};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::subscriber::DefaultGuard;

use crate::{
    app_database::AppDatabaseError,
    models::{
        Account, AccountHashRecord, Coin, Credentials, Device, DeviceHashRecord, DeviceReport,
        HashPoint, Pool, UnidentifiedHashRecord,
    },
    pools::{
        AdapterFactory, DateRange, DevicePage, FetchContext, FetchError, HistoryPage, PoolApi,
        Provider,
    },
    store::{AccountStore, HashSink, RateSink},
};

/// Tracks how many callers are inside a section at once.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

pub struct GaugeGuard<'a>(&'a Gauge);

impl Gauge {
    pub fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(self)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
}

pub type DayKey = (String, NaiveDate, String);

#[derive(Debug, Default)]
pub struct StoreState {
    pub account_rows: HashMap<DayKey, f64>,
    pub device_rows: HashMap<DayKey, f64>,
    pub unidentified_rows: HashMap<(String, NaiveDate, String, String), (f64, Option<i64>)>,
    pub worker_ids: HashMap<String, i64>,
    pub btc_rates: HashMap<NaiveDateTime, f64>,
    pub upserts: usize,
}

/// Inventory plus day-bucketed tables keyed exactly like the real unique
/// indexes.
#[derive(Default)]
pub struct MemoryStore {
    accounts: Vec<Account>,
    credentials: HashMap<String, Credentials>,
    pools: HashMap<String, Pool>,
    coins: HashMap<String, Vec<Coin>>,
    pool_coins: HashMap<(String, String), String>,
    devices: HashMap<String, Vec<Device>>,
    failing_devices: HashSet<String>,
    write_delay: Duration,
    state: Mutex<StoreState>,
    pub gauge: Gauge,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_pool(mut self, id: &str, name: &str) -> Self {
        self.pools.insert(
            id.to_string(),
            Pool {
                id: id.to_string(),
                name: name.to_string(),
                url: format!("https://{}.example", name),
            },
        );
        self
    }

    /// Adds a coin to a pool. `pool_coin_id` of `None` leaves the pair
    /// unresolvable.
    pub fn with_coin(mut self, pool_id: &str, code: &str, pool_coin_id: Option<&str>) -> Self {
        self.coins
            .entry(pool_id.to_string())
            .or_default()
            .push(Coin::new(code));
        if let Some(id) = pool_coin_id {
            self.pool_coins
                .insert((pool_id.to_string(), code.to_string()), id.to_string());
        }
        self
    }

    pub fn with_account(
        mut self,
        id: &str,
        name: &str,
        pool_id: Option<&str>,
        public_key: Option<&str>,
    ) -> Self {
        self.accounts.push(Account {
            id: id.to_string(),
            name: name.to_string(),
            public_key: public_key.map(str::to_string),
            pool_id: pool_id.map(str::to_string),
        });
        if let Some(key) = public_key {
            self.credentials.insert(
                id.to_string(),
                Credentials {
                    public_key: key.to_string(),
                    secret_key: Some("secret".to_string()),
                },
            );
        }
        self
    }

    pub fn with_device(
        mut self,
        account_id: &str,
        id: &str,
        name: &str,
        pool_worker_id: Option<i64>,
    ) -> Self {
        self.devices
            .entry(account_id.to_string())
            .or_default()
            .push(Device {
                id: id.to_string(),
                name: name.to_string(),
                pool_worker_id,
            });
        self
    }

    pub fn with_secret(mut self, account_id: &str, secret_key: Option<&str>) -> Self {
        if let Some(credentials) = self.credentials.get_mut(account_id) {
            credentials.secret_key = secret_key.map(str::to_string);
        }
        self
    }

    pub fn with_failing_device(mut self, device_id: &str) -> Self {
        self.failing_devices.insert(device_id.to_string());
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    async fn pause(&self) {
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn list_active_accounts(&self) -> Result<Vec<Account>, AppDatabaseError> {
        let _inside = self.gauge.enter();
        self.pause().await;
        Ok(self.accounts.clone())
    }

    async fn get_credentials(&self, account_id: &str) -> Result<Credentials, AppDatabaseError> {
        let _inside = self.gauge.enter();
        self.pause().await;
        self.credentials
            .get(account_id)
            .cloned()
            .ok_or(AppDatabaseError::MissingCredentials)
    }

    async fn get_pool(&self, pool_id: &str) -> Result<Pool, AppDatabaseError> {
        let _inside = self.gauge.enter();
        self.pause().await;
        self.pools
            .get(pool_id)
            .cloned()
            .ok_or(AppDatabaseError::EntityDoesNotExist)
    }

    async fn get_coins(&self, pool_id: &str) -> Result<Vec<Coin>, AppDatabaseError> {
        let _inside = self.gauge.enter();
        self.pause().await;
        Ok(self.coins.get(pool_id).cloned().unwrap_or_default())
    }

    async fn resolve_pool_coin(
        &self,
        pool_id: &str,
        coin_code: &str,
    ) -> Result<Option<String>, AppDatabaseError> {
        let _inside = self.gauge.enter();
        self.pause().await;
        Ok(self
            .pool_coins
            .get(&(pool_id.to_string(), coin_code.to_string()))
            .cloned())
    }

    async fn list_devices(&self, account_id: &str) -> Result<Vec<Device>, AppDatabaseError> {
        let _inside = self.gauge.enter();
        self.pause().await;
        Ok(self.devices.get(account_id).cloned().unwrap_or_default())
    }

    async fn record_pool_worker_id(
        &self,
        device_id: &str,
        pool_worker_id: i64,
    ) -> Result<(), AppDatabaseError> {
        let _inside = self.gauge.enter();
        self.pause().await;
        self.state()
            .worker_ids
            .insert(device_id.to_string(), pool_worker_id);
        Ok(())
    }
}

#[async_trait]
impl HashSink for MemoryStore {
    async fn upsert_account_hash(&self, record: &AccountHashRecord) -> Result<(), AppDatabaseError> {
        let _inside = self.gauge.enter();
        self.pause().await;
        let mut state = self.state();
        state.upserts += 1;
        state.account_rows.insert(
            (record.account_id.clone(), record.hash_date, record.pool_coin_id.clone()),
            record.daily_hash,
        );
        Ok(())
    }

    async fn upsert_device_hash(&self, record: &DeviceHashRecord) -> Result<(), AppDatabaseError> {
        let _inside = self.gauge.enter();
        self.pause().await;
        if self.failing_devices.contains(&record.device_id) {
            return Err(AppDatabaseError::QueryFailed("deadlock found".to_string()));
        }
        let mut state = self.state();
        state.upserts += 1;
        state.device_rows.insert(
            (record.device_id.clone(), record.hash_date, record.pool_coin_id.clone()),
            record.daily_hash,
        );
        Ok(())
    }

    async fn upsert_unidentified(
        &self,
        record: &UnidentifiedHashRecord,
    ) -> Result<(), AppDatabaseError> {
        let _inside = self.gauge.enter();
        self.pause().await;
        let mut state = self.state();
        state.upserts += 1;
        let key = (
            record.account_id.clone(),
            record.hash_date,
            record.pool_coin_id.clone(),
            record.reported_name.clone(),
        );
        let previous_id = state.unidentified_rows.get(&key).and_then(|(_, id)| *id);
        state
            .unidentified_rows
            .insert(key, (record.daily_hash, record.pool_worker_id.or(previous_id)));
        Ok(())
    }
}

#[async_trait]
impl RateSink for MemoryStore {
    async fn add_btc_rate(&self, rate_date: NaiveDateTime, rate: f64) -> Result<bool, AppDatabaseError> {
        let _inside = self.gauge.enter();
        self.pause().await;
        let mut state = self.state();
        if state.btc_rates.contains_key(&rate_date) {
            return Ok(false);
        }
        state.btc_rates.insert(rate_date, rate);
        Ok(true)
    }
}

/// A provider whose answers are fixed up front. Pages are keyed by coin code
/// and page number and are the same for every account.
pub struct ScriptedApi {
    provider: Provider,
    reports_total: bool,
    history_enabled: bool,
    pages: HashMap<(String, u32), DevicePage>,
    totals: HashMap<String, f64>,
    failing_coins: HashSet<String>,
    failing_pages: HashSet<(String, u32)>,
    account_history: HashMap<String, Vec<HistoryPage>>,
    device_history: HashMap<i64, Vec<HistoryPage>>,
    call_delay: Duration,
    calls: Mutex<HashMap<String, usize>>,
    pub gauge: Gauge,
}

impl ScriptedApi {
    pub fn new(provider: Provider, reports_total: bool) -> Self {
        ScriptedApi {
            provider,
            reports_total,
            history_enabled: false,
            pages: HashMap::new(),
            totals: HashMap::new(),
            failing_coins: HashSet::new(),
            failing_pages: HashSet::new(),
            account_history: HashMap::new(),
            device_history: HashMap::new(),
            call_delay: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
            gauge: Gauge::default(),
        }
    }

    pub fn with_page(
        mut self,
        coin: &str,
        page: u32,
        reports: Vec<DeviceReport>,
        has_next: bool,
        total_pages: Option<u32>,
    ) -> Self {
        self.pages.insert(
            (coin.to_string(), page),
            DevicePage {
                reports,
                has_next,
                total_pages,
            },
        );
        self
    }

    pub fn with_total(mut self, coin: &str, total: f64) -> Self {
        self.totals.insert(coin.to_string(), total);
        self
    }

    pub fn with_failing_coin(mut self, coin: &str) -> Self {
        self.failing_coins.insert(coin.to_string());
        self
    }

    pub fn with_failing_page(mut self, coin: &str, page: u32) -> Self {
        self.failing_pages.insert((coin.to_string(), page));
        self
    }

    pub fn with_account_history(mut self, coin: &str, pages: Vec<Vec<(NaiveDate, f64)>>) -> Self {
        self.history_enabled = true;
        self.account_history.insert(coin.to_string(), history_pages(pages));
        self
    }

    pub fn with_device_history(mut self, pool_worker_id: i64, pages: Vec<Vec<(NaiveDate, f64)>>) -> Self {
        self.history_enabled = true;
        self.device_history.insert(pool_worker_id, history_pages(pages));
        self
    }

    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub fn calls(&self, key: &str) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    fn count(&self, key: String) {
        *self.calls.lock().unwrap().entry(key).or_default() += 1;
    }

    async fn pause(&self) {
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
    }
}

fn history_pages(pages: Vec<Vec<(NaiveDate, f64)>>) -> Vec<HistoryPage> {
    let last = pages.len().saturating_sub(1);
    pages
        .into_iter()
        .enumerate()
        .map(|(i, points)| HistoryPage {
            points: points
                .into_iter()
                .map(|(date, hashrate)| HashPoint { date, hashrate })
                .collect(),
            has_next: i < last,
        })
        .collect()
}

fn nth_page(pages: Option<&Vec<HistoryPage>>, page: u32) -> HistoryPage {
    pages
        .and_then(|p| p.get(page.saturating_sub(1) as usize))
        .cloned()
        .unwrap_or_default()
}

fn refused() -> FetchError {
    FetchError::Status {
        status: 503,
        body: "service unavailable".to_string(),
    }
}

#[async_trait]
impl PoolApi for ScriptedApi {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn reports_account_total(&self) -> bool {
        self.reports_total
    }

    async fn fetch_device_reports(
        &self,
        _ctx: &FetchContext,
        coin: &Coin,
        page: u32,
    ) -> Result<DevicePage, FetchError> {
        let _inside = self.gauge.enter();
        self.count(format!("page:{}:{}", coin.code, page));
        self.pause().await;
        if self.failing_coins.contains(&coin.code)
            || self.failing_pages.contains(&(coin.code.clone(), page))
        {
            return Err(refused());
        }
        Ok(self
            .pages
            .get(&(coin.code.clone(), page))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_account_total(
        &self,
        _ctx: &FetchContext,
        coin: &Coin,
    ) -> Result<Option<f64>, FetchError> {
        let _inside = self.gauge.enter();
        self.count(format!("total:{}", coin.code));
        self.pause().await;
        if self.failing_coins.contains(&coin.code) {
            return Err(refused());
        }
        Ok(self.totals.get(&coin.code).copied())
    }

    fn supports_history(&self) -> bool {
        self.history_enabled
    }

    async fn fetch_account_history(
        &self,
        _ctx: &FetchContext,
        coin: &Coin,
        _range: &DateRange,
        page: u32,
    ) -> Result<HistoryPage, FetchError> {
        let _inside = self.gauge.enter();
        self.count(format!("history:{}:{}", coin.code, page));
        self.pause().await;
        Ok(nth_page(self.account_history.get(&coin.code), page))
    }

    async fn fetch_device_history(
        &self,
        _ctx: &FetchContext,
        _coin: &Coin,
        pool_worker_id: i64,
        _range: &DateRange,
        page: u32,
    ) -> Result<HistoryPage, FetchError> {
        let _inside = self.gauge.enter();
        self.count(format!("device-history:{}:{}", pool_worker_id, page));
        self.pause().await;
        Ok(nth_page(self.device_history.get(&pool_worker_id), page))
    }
}

/// Hands out the same scripted provider for every pool name.
pub struct ScriptedFactory(pub Arc<ScriptedApi>);

impl AdapterFactory for ScriptedFactory {
    fn adapter_for(&self, _provider: Provider) -> Arc<dyn PoolApi> {
        self.0.clone()
    }
}

pub fn report(name: &str, hashrate: f64) -> DeviceReport {
    DeviceReport::new(name, hashrate)
}

pub fn report_with_id(name: &str, hashrate: f64, pool_worker_id: i64) -> DeviceReport {
    let mut report = DeviceReport::new(name, hashrate);
    report.pool_worker_id = Some(pool_worker_id);
    report
}

pub fn fetch_context(base_url: &str, account_name: &str, public_key: &str, secret_key: Option<&str>) -> FetchContext {
    FetchContext {
        base_url: base_url.to_string(),
        account_name: account_name.to_string(),
        credentials: Credentials {
            public_key: public_key.to_string(),
            secret_key: secret_key.map(str::to_string),
        },
    }
}

/// A client that talks to loopback directly, whatever the proxy environment.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// One request as the fake server received it.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Default)]
struct FakeRoutes {
    responses: Mutex<HashMap<String, VecDeque<(u16, String)>>>,
    seen: Mutex<Vec<SeenRequest>>,
}

/// An in-process HTTP server standing in for a pool or quote provider.
/// Every request is recorded; unknown paths answer 404.
pub struct FakeHttp {
    pub base_url: String,
    routes: Arc<FakeRoutes>,
    server: tokio::task::JoinHandle<()>,
}

impl FakeHttp {
    pub async fn start() -> FakeHttp {
        let routes = Arc::new(FakeRoutes::default());
        let app = Router::new().fallback(answer).with_state(routes.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        FakeHttp {
            base_url,
            routes,
            server,
        }
    }

    /// Queues an answer for `path`. Answers are used in order and the last
    /// one repeats.
    pub fn respond(&self, path: &str, status: u16, body: &str) -> &Self {
        self.routes
            .responses
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back((status, body.to_string()));
        self
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.routes.seen.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.seen().into_iter().map(|r| r.path).collect()
    }
}

impl Drop for FakeHttp {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn answer(State(routes): State<Arc<FakeRoutes>>, request: Request) -> (StatusCode, String) {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    let path = parts.uri.path().to_string();
    routes.seen.lock().unwrap().push(SeenRequest {
        method: parts.method.to_string(),
        path: path.clone(),
        query: parts.uri.query().unwrap_or_default().to_string(),
        headers: parts.headers,
        body,
    });

    let mut responses = routes.responses.lock().unwrap();
    let (status, body) = match responses.get_mut(&path) {
        Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
        Some(queue) => queue.front().cloned().unwrap_or((404, String::new())),
        None => (404, format!("no route for {}", path)),
    };
    (StatusCode::from_u16(status).unwrap(), body)
}

/// Formatted log output captured on the current thread while the guard
/// returned by `install` is alive.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    pub fn install() -> (LogCapture, DefaultGuard) {
        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        (capture, tracing::subscriber::set_default(subscriber))
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Lines logged at `level` ("WARN", "ERROR", ...) that contain `needle`.
    pub fn count(&self, level: &str, needle: &str) -> usize {
        let level = format!(" {} ", level);
        self.lines()
            .iter()
            .filter(|line| line.contains(&level) && line.contains(needle))
            .count()
    }
}
