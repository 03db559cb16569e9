/// Resolution Service
///
/// `resolve_or_fallback` is the hot path: it never waits on I/O. It serves
/// whatever is cached (or the deterministic default) and, when the cached
/// value is stale and the source is not cooling down, queues one background
/// fetch for that source.
use crate::{
    config::PrivacyConfig,
    error::{FailureKind, FetchError},
    identity::ProfileIdentity,
    metrics,
    resolution::{
        cache::LookupCache,
        clock::{Clock, Jitter, RandomJitter, Sleeper, SystemClock, TokioSleeper},
        normalize_username,
        state::{FetchOutcome, LogDecision, SourceState},
        worker::{FetchExecutor, FetchWorker},
        DefaultTextureProvider, ExternalFallback, IdentityLookup, ModelVariant, ResolutionStatus,
        ResolvedTexture, TextureLoader,
    },
};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attempts per fetch before giving up
pub const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 600;
const BACKOFF_MAX_MS: u64 = 5_000;
const BACKOFF_JITTER_MS: u64 = 300;

/// Delay before retry number `attempt` (1-based), jitter excluded
pub fn backoff_delay(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    Duration::from_millis((BACKOFF_BASE_MS << shift).min(BACKOFF_MAX_MS))
}

/// Read-only view of one source's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub has_last_good: bool,
    pub in_flight: bool,
    pub consecutive_failures: u32,
    pub next_retry_ms: u64,
    pub last_error: Option<FailureKind>,
}

type SharedState = Arc<Mutex<SourceState>>;

struct Inner {
    sources: Mutex<HashMap<String, SharedState>>,
    lookups: LookupCache,
    lookup: Arc<dyn IdentityLookup>,
    loader: Arc<dyn TextureLoader>,
    defaults: Arc<dyn DefaultTextureProvider>,
    external: Option<Arc<dyn ExternalFallback>>,
    executor: Arc<dyn FetchExecutor>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn Jitter>,
}

/// Texture resolution service
#[derive(Clone)]
pub struct ResolutionService {
    inner: Arc<Inner>,
}

/// Builder for [`ResolutionService`]
pub struct ResolutionServiceBuilder {
    lookup: Arc<dyn IdentityLookup>,
    loader: Arc<dyn TextureLoader>,
    defaults: Arc<dyn DefaultTextureProvider>,
    external: Option<Arc<dyn ExternalFallback>>,
    executor: Option<Arc<dyn FetchExecutor>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn Jitter>,
    lookup_ttl: Option<Duration>,
}

impl ResolutionServiceBuilder {
    pub fn external(mut self, external: Arc<dyn ExternalFallback>) -> Self {
        self.external = Some(external);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn FetchExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn lookup_ttl(mut self, ttl: Duration) -> Self {
        self.lookup_ttl = Some(ttl);
        self
    }

    /// Build the service
    ///
    /// Without an explicit executor a [`FetchWorker`] is spawned, which
    /// needs a running tokio runtime.
    pub fn build(self) -> ResolutionService {
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(FetchWorker::spawn()));
        let lookups = match self.lookup_ttl {
            Some(ttl) => LookupCache::new().with_ttl(ttl),
            None => LookupCache::new(),
        };

        ResolutionService {
            inner: Arc::new(Inner {
                sources: Mutex::new(HashMap::new()),
                lookups,
                lookup: self.lookup,
                loader: self.loader,
                defaults: self.defaults,
                external: self.external,
                executor,
                clock: self.clock,
                sleeper: self.sleeper,
                jitter: self.jitter,
            }),
        }
    }
}

impl ResolutionService {
    pub fn builder(
        lookup: Arc<dyn IdentityLookup>,
        loader: Arc<dyn TextureLoader>,
        defaults: Arc<dyn DefaultTextureProvider>,
    ) -> ResolutionServiceBuilder {
        ResolutionServiceBuilder {
            lookup,
            loader,
            defaults,
            external: None,
            executor: None,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper::new()),
            jitter: Arc::new(RandomJitter),
            lookup_ttl: None,
        }
    }

    /// Cached texture for `source`, else the default for `fallback_id`
    ///
    /// Never blocks on the network. Queues at most one background fetch per
    /// source when the cached value is stale or missing and no cooldown is
    /// active.
    pub fn resolve_or_fallback(
        &self,
        source: &str,
        fallback_id: Uuid,
        allow_external: bool,
    ) -> ResolvedTexture {
        let normalized = normalize_username(source);
        if normalized.is_empty() {
            metrics::RESOLUTIONS_TOTAL.with_label_values(&["default"]).inc();
            return self.inner.defaults.default_texture(fallback_id);
        }

        let state = self.inner.state_for(&normalized);
        let now = self.inner.clock.now_ms();

        let (cached, fresh, begin) = {
            let mut guard = state.lock();
            let fresh = guard.is_fresh(now);
            let begin = guard.try_begin_fetch(now);
            (guard.last_good.clone(), fresh, begin)
        };

        if begin {
            self.schedule(normalized, state, Some(fallback_id), allow_external);
        }

        match cached {
            Some(texture) => {
                let label = if fresh { "fresh" } else { "stale" };
                metrics::RESOLUTIONS_TOTAL.with_label_values(&[label]).inc();
                texture
            }
            None => {
                metrics::RESOLUTIONS_TOTAL.with_label_values(&["default"]).inc();
                self.inner.defaults.default_texture(fallback_id)
            }
        }
    }

    /// Aggregate status over every tracked source
    ///
    /// Fetching beats rate-limited, which beats using-last-good.
    pub fn status_summary(&self) -> ResolutionStatus {
        let now = self.inner.clock.now_ms();
        let states: Vec<SharedState> = self.inner.sources.lock().values().cloned().collect();

        let mut fetching = false;
        let mut rate_limited_until: Option<u64> = None;
        let mut using_last_good = false;

        for state in states {
            let state = state.lock();
            fetching |= state.in_flight;
            if let Some(until) = state.rate_limited_until(now) {
                rate_limited_until = Some(rate_limited_until.map_or(until, |u| u.min(until)));
            }
            using_last_good |= state.is_using_last_good();
        }

        if fetching {
            ResolutionStatus::Fetching
        } else if let Some(until) = rate_limited_until {
            let eta_secs = ((until - now) + 999) / 1000;
            ResolutionStatus::RateLimited {
                eta_secs: eta_secs.max(1),
            }
        } else if using_last_good {
            ResolutionStatus::UsingLastGood
        } else {
            ResolutionStatus::Idle
        }
    }

    /// Drop cached textures, cooldowns and lookups
    ///
    /// Fetches already running keep their in-flight claim and land in the
    /// cleared state when they finish.
    pub fn clear_runtime_cache(&self) {
        let states: Vec<SharedState> = self.inner.sources.lock().values().cloned().collect();
        for state in &states {
            state.lock().reset();
        }
        self.inner.lookups.clear();
        info!("Cleared texture runtime cache ({} sources)", states.len());
    }

    /// Reset cooldowns and queue a fetch for every configured source
    pub fn force_refresh_sources(&self, config: &PrivacyConfig) {
        let sources: BTreeSet<String> = config
            .source_usernames()
            .into_iter()
            .map(normalize_username)
            .filter(|s| !s.is_empty())
            .collect();

        for normalized in sources {
            let state = self.inner.state_for(&normalized);
            let begin = state.lock().force_begin_fetch();
            if begin {
                debug!("Forcing refresh of texture source {}", normalized);
                self.schedule(normalized, state, None, config.allow_external_fallback);
            }
        }
    }

    /// State of one source, if it has been seen
    pub fn source_snapshot(&self, source: &str) -> Option<SourceSnapshot> {
        let state = self
            .inner
            .sources
            .lock()
            .get(&normalize_username(source))
            .cloned()?;
        let state = state.lock();

        Some(SourceSnapshot {
            has_last_good: state.last_good.is_some(),
            in_flight: state.in_flight,
            consecutive_failures: state.consecutive_failures,
            next_retry_ms: state.next_retry_ms,
            last_error: state.last_error,
        })
    }

    /// Drop expired username lookups
    pub fn cleanup_lookup_cache(&self) {
        self.inner.lookups.cleanup_expired(self.inner.clock.now_ms());
    }

    /// Queue a fetch whose in-flight slot is already claimed
    fn schedule(
        &self,
        normalized: String,
        state: SharedState,
        fallback_id: Option<Uuid>,
        allow_external: bool,
    ) {
        let claim = InFlightClaim::new(state);
        let inner = Arc::clone(&self.inner);
        let source = normalized.clone();
        let job = async move {
            inner
                .run_fetch(&source, fallback_id, allow_external, claim)
                .await
        }
        .boxed();

        metrics::FETCHES_SCHEDULED_TOTAL.inc();
        // A rejected job is dropped, and dropping the claim frees the slot
        if let Err(e) = self.inner.executor.submit(job) {
            warn!("Could not queue texture fetch for {}: {}", normalized, e);
        }
    }
}

impl Inner {
    fn state_for(&self, normalized: &str) -> SharedState {
        let mut sources = self.sources.lock();
        Arc::clone(sources.entry(normalized.to_string()).or_default())
    }

    async fn run_fetch(
        &self,
        normalized: &str,
        fallback_id: Option<Uuid>,
        allow_external: bool,
        claim: InFlightClaim,
    ) {
        metrics::FETCHES_IN_FLIGHT.inc();
        let started = Instant::now();

        self.seed_from_disk(normalized, &claim).await;

        let mut result = self.fetch_with_retries(normalized, fallback_id).await;
        if let Err(internal) = &result {
            if allow_external && !matches!(internal, FetchError::Interrupted) {
                if let Some(external) = &self.external {
                    match self.fetch_external(external.as_ref(), normalized).await {
                        Ok(texture) => {
                            debug!("Using external texture for {}", normalized);
                            result = Ok(texture);
                        }
                        Err(e) => debug!("External fallback failed for {}: {}", normalized, e),
                    }
                }
            }
        }

        let now = self.clock.now_ms();
        let outcome = claim.finish(|state| match &result {
            Ok(texture) => state.record_success(texture.clone(), now),
            Err(e) => state.record_failure(e, now),
        });

        metrics::FETCHES_IN_FLIGHT.dec();
        metrics::FETCH_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
        log_outcome(normalized, &result, outcome);
    }

    /// Load what an earlier run cached, the first time a source is fetched
    async fn seed_from_disk(&self, normalized: &str, claim: &InFlightClaim) {
        let needed = claim.update(|state| !state.disk_checked && state.last_good.is_none());
        if !needed {
            return;
        }

        let cached = match self.loader.load_cached(normalized).await {
            Ok(cached) => cached,
            Err(e) => {
                debug!("Ignoring cached textures for {}: {}", normalized, e);
                None
            }
        };
        if claim.update(|state| state.seed_cached(cached)) {
            debug!("Serving cached textures for {} until refreshed", normalized);
        }
    }

    async fn fetch_with_retries(
        &self,
        normalized: &str,
        fallback_id: Option<Uuid>,
    ) -> Result<ResolvedTexture, FetchError> {
        let mut attempt = 1;
        loop {
            let error = match self.attempt(normalized, fallback_id).await {
                Ok(texture) => return Ok(texture),
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= MAX_ATTEMPTS {
                return Err(error);
            }

            let delay = backoff_delay(attempt)
                + Duration::from_millis(self.jitter.jitter_ms(BACKOFF_JITTER_MS));
            debug!(
                "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                attempt,
                MAX_ATTEMPTS,
                normalized,
                error.code(),
                delay
            );
            self.sleeper.sleep(delay).await?;
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        normalized: &str,
        fallback_id: Option<Uuid>,
    ) -> Result<ResolvedTexture, FetchError> {
        let profile = self.lookup_profile(normalized).await?;
        let fallback_id = fallback_id.unwrap_or(profile.id);
        self.loader.load(&profile, fallback_id).await
    }

    async fn lookup_profile(&self, normalized: &str) -> Result<ProfileIdentity, FetchError> {
        if let Some(cached) = self.lookups.get(normalized, self.clock.now_ms()) {
            metrics::LOOKUP_CACHE_TOTAL.with_label_values(&["hit"]).inc();
            return Ok(cached);
        }

        metrics::LOOKUP_CACHE_TOTAL.with_label_values(&["miss"]).inc();
        let profile = self.lookup.lookup(normalized).await?;
        self.lookups
            .insert(normalized, profile.clone(), self.clock.now_ms());
        Ok(profile)
    }

    async fn fetch_external(
        &self,
        external: &dyn ExternalFallback,
        normalized: &str,
    ) -> Result<ResolvedTexture, FetchError> {
        let skin_url = external.probe_skin(normalized).await?.ok_or_else(|| {
            FetchError::NotFound(format!("No external skin for {}", normalized))
        })?;
        let texture = self
            .loader
            .register_url(&format!("external_skin/{}", normalized), &skin_url)
            .await?;

        let cape = match external.lookup_cape(normalized).await {
            Ok(Some(url)) => self
                .loader
                .register_url(&format!("external_cape/{}", normalized), &url)
                .await
                .map_err(|e| debug!("Ignoring external cape for {}: {}", normalized, e))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                debug!("External cape lookup failed for {}: {}", normalized, e);
                None
            }
        };

        Ok(ResolvedTexture {
            texture,
            model: ModelVariant::Default,
            cape,
            elytra: None,
        })
    }
}

fn log_outcome(normalized: &str, result: &Result<ResolvedTexture, FetchError>, outcome: FetchOutcome) {
    match (result, outcome) {
        (
            Ok(_),
            FetchOutcome::Updated {
                recovered_after,
                suppressed,
            },
        ) => {
            metrics::FETCH_OUTCOMES_TOTAL
                .with_label_values(&["success"])
                .inc();
            match recovered_after {
                Some(failures) => info!(
                    "Texture source {} recovered after {} failures ({} repeats suppressed)",
                    normalized, failures, suppressed
                ),
                None => debug!("Texture source {} updated", normalized),
            }
        }
        (
            Err(e),
            FetchOutcome::Failed {
                cooldown,
                consecutive_failures,
                log,
            },
        ) => {
            metrics::FETCH_OUTCOMES_TOTAL
                .with_label_values(&[e.kind().as_str()])
                .inc();
            if let LogDecision::Emit { suppressed } = log {
                warn!(
                    "[{}] Texture fetch for {} failed ({} in a row), next try in {}s: {}{}",
                    e.code(),
                    normalized,
                    consecutive_failures,
                    cooldown.as_secs(),
                    e,
                    if suppressed > 0 {
                        format!(" ({} repeats suppressed)", suppressed)
                    } else {
                        String::new()
                    }
                );
            }
        }
        _ => {}
    }
}

/// Owns a source's in-flight slot until the fetch outcome is recorded
///
/// Dropped without [`InFlightClaim::finish`] (job rejected, cancelled or
/// panicked) it releases the slot so the source can be fetched again.
struct InFlightClaim {
    state: SharedState,
    armed: bool,
}

impl InFlightClaim {
    fn new(state: SharedState) -> Self {
        Self { state, armed: true }
    }

    /// Touch the state without releasing the slot
    fn update<R>(&self, change: impl FnOnce(&mut SourceState) -> R) -> R {
        change(&mut self.state.lock())
    }

    /// Record the outcome and release the slot under one lock
    fn finish<R>(mut self, record: impl FnOnce(&mut SourceState) -> R) -> R {
        let result = {
            let mut state = self.state.lock();
            let result = record(&mut state);
            state.in_flight = false;
            result
        };
        self.armed = false;
        result
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::{
        clock::{ImmediateSleeper, ManualClock, NoJitter},
        worker::ManualExecutor,
        TextureHandle,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Lookup that replays scripted outcomes, repeating the last one
    struct ScriptedLookup {
        outcomes: Mutex<VecDeque<Result<ProfileIdentity, FetchError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedLookup {
        fn new(outcomes: Vec<Result<ProfileIdentity, FetchError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityLookup for ScriptedLookup {
        async fn lookup(&self, normalized: &str) -> Result<ProfileIdentity, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock();
            let next = if outcomes.len() > 1 {
                outcomes.pop_front()
            } else {
                outcomes.front().cloned()
            };
            next.unwrap_or_else(|| Err(FetchError::NotFound(normalized.to_string())))
        }
    }

    struct FixedLoader {
        calls: AtomicUsize,
        on_disk: Option<ResolvedTexture>,
        disk_reads: AtomicUsize,
    }

    #[async_trait]
    impl TextureLoader for FixedLoader {
        async fn load(
            &self,
            profile: &ProfileIdentity,
            _fallback_id: Uuid,
        ) -> Result<ResolvedTexture, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ResolvedTexture::new(
                TextureHandle::new(format!("cached_skin/{}", profile.name.to_lowercase())),
                ModelVariant::Slim,
            ))
        }

        async fn register_url(&self, key: &str, _url: &str) -> Result<TextureHandle, FetchError> {
            Ok(TextureHandle::new(key))
        }

        async fn load_cached(
            &self,
            _normalized: &str,
        ) -> Result<Option<ResolvedTexture>, FetchError> {
            self.disk_reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.on_disk.clone())
        }
    }

    struct PlainDefaults;

    impl DefaultTextureProvider for PlainDefaults {
        fn default_texture(&self, fallback_id: Uuid) -> ResolvedTexture {
            ResolvedTexture::new(
                TextureHandle::new(format!("default/{}", fallback_id)),
                ModelVariant::Default,
            )
        }
    }

    struct StaticExternal;

    #[async_trait]
    impl ExternalFallback for StaticExternal {
        async fn probe_skin(&self, normalized: &str) -> Result<Option<String>, FetchError> {
            Ok(Some(format!("https://skins.test/{}", normalized)))
        }

        async fn lookup_cape(&self, _normalized: &str) -> Result<Option<String>, FetchError> {
            Ok(None)
        }
    }

    struct Harness {
        service: ResolutionService,
        executor: Arc<ManualExecutor>,
        clock: Arc<ManualClock>,
        lookup: Arc<ScriptedLookup>,
        loader: Arc<FixedLoader>,
    }

    fn harness(outcomes: Vec<Result<ProfileIdentity, FetchError>>, external: bool) -> Harness {
        harness_with_disk(outcomes, external, None)
    }

    fn harness_with_disk(
        outcomes: Vec<Result<ProfileIdentity, FetchError>>,
        external: bool,
        on_disk: Option<ResolvedTexture>,
    ) -> Harness {
        let executor = Arc::new(ManualExecutor::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let lookup = Arc::new(ScriptedLookup::new(outcomes));
        let loader = Arc::new(FixedLoader {
            calls: AtomicUsize::new(0),
            on_disk,
            disk_reads: AtomicUsize::new(0),
        });

        let mut builder = ResolutionService::builder(
            lookup.clone(),
            loader.clone(),
            Arc::new(PlainDefaults),
        )
        .executor(executor.clone())
        .clock(clock.clone())
        .sleeper(Arc::new(ImmediateSleeper))
        .jitter(Arc::new(NoJitter));
        if external {
            builder = builder.external(Arc::new(StaticExternal));
        }

        Harness {
            service: builder.build(),
            executor,
            clock,
            lookup,
            loader,
        }
    }

    fn source_identity() -> ProfileIdentity {
        ProfileIdentity::new(Uuid::new_v4(), "SourceUser")
    }

    fn rate_limited() -> FetchError {
        FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(120)),
        }
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let delays: Vec<u64> = (1..=5).map(|n| backoff_delay(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![600, 1_200, 2_400, 4_800, 5_000]);
    }

    #[tokio::test]
    async fn test_first_resolve_returns_default_and_queues_one_fetch() {
        let h = harness(vec![Ok(source_identity())], false);
        let fallback = Uuid::new_v4();

        let first = h.service.resolve_or_fallback("SourceUser", fallback, false);
        assert_eq!(first, PlainDefaults.default_texture(fallback));
        assert_eq!(h.executor.pending(), 1);

        // Second call while in flight queues nothing new
        h.service.resolve_or_fallback("sourceuser", fallback, false);
        assert_eq!(h.executor.pending(), 1);
        assert_eq!(h.service.status_summary(), ResolutionStatus::Fetching);

        h.executor.run_all().await;

        let resolved = h.service.resolve_or_fallback("SourceUser", fallback, false);
        assert_eq!(resolved.texture.as_str(), "cached_skin/sourceuser");
        assert_eq!(resolved.model, ModelVariant::Slim);
        assert_eq!(h.lookup.calls(), 1);
        assert_eq!(h.executor.pending(), 0);
        assert_eq!(h.service.status_summary(), ResolutionStatus::Idle);
    }

    #[tokio::test]
    async fn test_textures_from_a_previous_run_cover_a_failing_fetch() {
        let on_disk = ResolvedTexture::new(TextureHandle::new("disk/sourceuser"), ModelVariant::Slim);
        let h = harness_with_disk(
            vec![Err(FetchError::Network("unreachable".to_string()))],
            false,
            Some(on_disk.clone()),
        );
        let fallback = Uuid::new_v4();

        h.service.resolve_or_fallback("SourceUser", fallback, false);
        h.executor.run_all().await;

        assert_eq!(h.service.resolve_or_fallback("SourceUser", fallback, false), on_disk);
        assert_eq!(h.service.status_summary(), ResolutionStatus::UsingLastGood);
        assert_eq!(h.loader.calls.load(Ordering::SeqCst), 0);

        // The disk is read once per source, later fetches go to the network only
        h.clock.advance(Duration::from_secs(3_600));
        h.service.resolve_or_fallback("SourceUser", fallback, false);
        h.executor.run_all().await;
        assert_eq!(h.loader.disk_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetched_texture_replaces_the_disk_copy() {
        let on_disk = ResolvedTexture::new(TextureHandle::new("disk/sourceuser"), ModelVariant::Default);
        let h = harness_with_disk(vec![Ok(source_identity())], false, Some(on_disk));
        let fallback = Uuid::new_v4();

        h.service.resolve_or_fallback("SourceUser", fallback, false);
        h.executor.run_all().await;

        let resolved = h.service.resolve_or_fallback("SourceUser", fallback, false);
        assert_eq!(resolved.texture.as_str(), "cached_skin/sourceuser");
        assert_eq!(h.service.status_summary(), ResolutionStatus::Idle);
    }

    #[tokio::test]
    async fn test_stale_value_is_served_while_one_refresh_runs() {
        let h = harness(vec![Ok(source_identity())], false);
        let fallback = Uuid::new_v4();

        h.service.resolve_or_fallback("SourceUser", fallback, false);
        h.executor.run_all().await;

        h.clock.advance(Duration::from_secs(601));
        let stale = h.service.resolve_or_fallback("SourceUser", fallback, false);
        assert_eq!(stale.texture.as_str(), "cached_skin/sourceuser");
        assert_eq!(h.executor.pending(), 1);

        h.service.resolve_or_fallback("SourceUser", fallback, false);
        assert_eq!(h.executor.pending(), 1);

        h.executor.run_all().await;
        assert_eq!(h.loader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_keeps_last_good_and_cools_down() {
        let h = harness(
            vec![
                Ok(source_identity()),
                Err(rate_limited()),
                Err(rate_limited()),
                Err(rate_limited()),
            ],
            false,
        );
        let fallback = Uuid::new_v4();

        h.service.resolve_or_fallback("SourceUser", fallback, false);
        h.executor.run_all().await;

        h.clock.advance(Duration::from_secs(601));
        h.service.resolve_or_fallback("SourceUser", fallback, false);
        h.executor.run_all().await;

        // One successful lookup plus three rate-limited attempts
        assert_eq!(h.lookup.calls(), 4);
        assert_eq!(
            h.service.status_summary(),
            ResolutionStatus::RateLimited { eta_secs: 120 }
        );

        let served = h.service.resolve_or_fallback("SourceUser", fallback, false);
        assert_eq!(served.texture.as_str(), "cached_skin/sourceuser");
        assert_eq!(h.executor.pending(), 0);
        assert_eq!(h.lookup.calls(), 4);

        let snapshot = h.service.source_snapshot("sourceuser").unwrap();
        assert_eq!(snapshot.last_error, Some(FailureKind::RateLimit));
        assert_eq!(snapshot.consecutive_failures, 1);

        // Cooldown over: rate limit gone, last good still flagged
        h.clock.advance(Duration::from_secs(120));
        assert_eq!(h.service.status_summary(), ResolutionStatus::UsingLastGood);
    }

    #[tokio::test]
    async fn test_not_found_is_attempted_once_per_window() {
        let h = harness(
            vec![Err(FetchError::NotFound("ghost".to_string()))],
            false,
        );
        let fallback = Uuid::new_v4();

        h.service.resolve_or_fallback("Ghost", fallback, false);
        h.executor.run_all().await;
        assert_eq!(h.lookup.calls(), 1);

        for _ in 0..5 {
            h.clock.advance(Duration::from_secs(100));
            let texture = h.service.resolve_or_fallback("Ghost", fallback, false);
            assert_eq!(texture, PlainDefaults.default_texture(fallback));
            h.executor.run_all().await;
        }
        assert_eq!(h.lookup.calls(), 1);

        h.clock.advance(Duration::from_secs(100));
        h.service.resolve_or_fallback("Ghost", fallback, false);
        h.executor.run_all().await;
        assert_eq!(h.lookup.calls(), 2);
    }

    #[tokio::test]
    async fn test_network_failures_retry_within_one_fetch() {
        let h = harness(
            vec![
                Err(FetchError::Network("reset".to_string())),
                Err(FetchError::Network("reset".to_string())),
                Ok(source_identity()),
            ],
            false,
        );

        h.service.resolve_or_fallback("SourceUser", Uuid::new_v4(), false);
        h.executor.run_all().await;

        assert_eq!(h.lookup.calls(), 3);
        let snapshot = h.service.source_snapshot("SourceUser").unwrap();
        assert!(snapshot.has_last_good);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_internal_error_is_not_retried() {
        let h = harness(vec![Err(FetchError::Internal("bad json".to_string()))], false);

        h.service.resolve_or_fallback("SourceUser", Uuid::new_v4(), false);
        h.executor.run_all().await;

        assert_eq!(h.lookup.calls(), 1);
        let snapshot = h.service.source_snapshot("SourceUser").unwrap();
        assert_eq!(snapshot.last_error, Some(FailureKind::Internal));
        assert_eq!(snapshot.next_retry_ms, 1_000_000 + 30_000);
    }

    #[tokio::test]
    async fn test_external_fallback_after_internal_failure() {
        let h = harness(vec![Err(FetchError::NotFound("ghost".to_string()))], true);
        let fallback = Uuid::new_v4();

        h.service.resolve_or_fallback("Ghost", fallback, true);
        h.executor.run_all().await;

        let texture = h.service.resolve_or_fallback("Ghost", fallback, true);
        assert_eq!(texture.texture.as_str(), "external_skin/ghost");
        assert_eq!(texture.model, ModelVariant::Default);
        assert!(texture.cape.is_none());
    }

    #[tokio::test]
    async fn test_external_fallback_not_used_when_disallowed() {
        let h = harness(vec![Err(FetchError::NotFound("ghost".to_string()))], true);
        let fallback = Uuid::new_v4();

        h.service.resolve_or_fallback("Ghost", fallback, false);
        h.executor.run_all().await;

        let texture = h.service.resolve_or_fallback("Ghost", fallback, false);
        assert_eq!(texture, PlainDefaults.default_texture(fallback));
    }

    #[tokio::test]
    async fn test_empty_source_returns_default_without_fetch() {
        let h = harness(vec![Ok(source_identity())], false);
        let fallback = Uuid::new_v4();

        assert_eq!(
            h.service.resolve_or_fallback("   ", fallback, false),
            PlainDefaults.default_texture(fallback)
        );
        assert_eq!(h.executor.pending(), 0);
    }

    #[tokio::test]
    async fn test_dropped_job_releases_in_flight_slot() {
        let h = harness(vec![Ok(source_identity())], false);
        let fallback = Uuid::new_v4();

        h.service.resolve_or_fallback("SourceUser", fallback, false);
        assert_eq!(h.executor.discard_all(), 1);

        h.service.resolve_or_fallback("SourceUser", fallback, false);
        assert_eq!(h.executor.pending(), 1);
    }

    #[tokio::test]
    async fn test_clear_runtime_cache_and_force_refresh() {
        let h = harness(vec![Ok(source_identity())], false);
        let fallback = Uuid::new_v4();

        h.service.resolve_or_fallback("SourceUser", fallback, false);
        h.executor.run_all().await;

        h.service.clear_runtime_cache();
        let cleared = h.service.resolve_or_fallback("SourceUser", fallback, false);
        assert_eq!(cleared, PlainDefaults.default_texture(fallback));
        h.executor.run_all().await;
        // Lookup cache was cleared too
        assert_eq!(h.lookup.calls(), 2);

        let mut config = PrivacyConfig::default();
        config.local_skin_source = "SourceUser".to_string();
        config.local_cape_source = "sourceuser".to_string();
        config.others_skin_source = "OtherSource".to_string();

        h.service.force_refresh_sources(&config);
        // Skin and cape share a source: one fetch each for two sources
        assert_eq!(h.executor.pending(), 2);
        h.service.force_refresh_sources(&config);
        assert_eq!(h.executor.pending(), 2);
    }
}
