/// Runtime context and dependency injection
///
/// `PrivacyRuntime` is the single entry point a host talks to. It is built
/// explicitly, owned by the host's lifecycle and passed to every call site.
use crate::{
    breaker::{BreakerState, HookCircuitBreaker},
    config::{EngineConfig, PrivacyConfig},
    error::{EngineError, EngineResult},
    identity::{AliasRegistry, IdentityMasker, MaskedIdentity},
    mojang::{HttpExternalFallback, MojangClient, RemoteHttp},
    resolution::{
        Clock, FetchWorker, ResolutionService, ResolvedTexture, SystemClock, TokioSleeper,
    },
    sanitize::{PlayerDirectory, SessionSnapshot, TextSanitizer},
    textures::{DefaultTextures, DiskTextureStore},
    validation::{describe, validate_privacy_config},
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, info};
use uuid::Uuid;

/// Runtime context holding all shared services
pub struct PrivacyRuntime {
    config: RwLock<Arc<PrivacyConfig>>,
    masker: IdentityMasker,
    sanitizer: TextSanitizer,
    resolution: ResolutionService,
    breaker: HookCircuitBreaker,
    directory: Arc<dyn PlayerDirectory>,
    sleeper: Option<TokioSleeper>,
}

impl PrivacyRuntime {
    /// Create a runtime backed by the remote profile services
    ///
    /// Must be called inside a tokio runtime: the fetch worker is spawned on
    /// it.
    pub async fn new(
        engine: &EngineConfig,
        privacy: PrivacyConfig,
        directory: Arc<dyn PlayerDirectory>,
    ) -> EngineResult<Self> {
        engine.validate()?;

        // Create data directories if they don't exist
        Self::ensure_directories(engine).await?;

        let aliases = Arc::new(AliasRegistry::open(&engine.storage.alias_file));
        let store = Arc::new(DiskTextureStore::new(&engine.storage.texture_directory));
        let defaults = Arc::new(DefaultTextures);

        // One client and limiter for every remote call
        let http = RemoteHttp::new(&engine.http)?;
        let client = Arc::new(MojangClient::with_http(
            http.clone(),
            &engine.http,
            store,
            defaults.clone(),
        ));
        let external = Arc::new(HttpExternalFallback::with_http(http, &engine.http));

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let sleeper = TokioSleeper::new();
        let resolution = ResolutionService::builder(client.clone(), client, defaults)
            .external(external)
            .executor(Arc::new(FetchWorker::spawn()))
            .clock(clock.clone())
            .sleeper(Arc::new(sleeper.clone()))
            .build();

        let breaker = HookCircuitBreaker::new(&engine.breaker, clock);

        let mut runtime = Self::with_parts(privacy, aliases, resolution, breaker, directory)?;
        runtime.sleeper = Some(sleeper);
        info!(
            "Privacy runtime ready (aliases: {}, textures: {:?})",
            engine.storage.alias_file.display(),
            engine.storage.texture_directory
        );
        Ok(runtime)
    }

    /// Assemble a runtime from prebuilt services
    pub fn with_parts(
        privacy: PrivacyConfig,
        aliases: Arc<AliasRegistry>,
        resolution: ResolutionService,
        breaker: HookCircuitBreaker,
        directory: Arc<dyn PlayerDirectory>,
    ) -> EngineResult<Self> {
        validate_privacy_config(&privacy)
            .map_err(|errors| EngineError::InvalidPrivacyConfig(describe(&errors)))?;

        let masker = IdentityMasker::new(aliases);
        let sanitizer = TextSanitizer::new(masker.clone(), directory.clone());

        Ok(Self {
            config: RwLock::new(Arc::new(privacy)),
            masker,
            sanitizer,
            resolution,
            breaker,
            directory,
            sleeper: None,
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(engine: &EngineConfig) -> EngineResult<()> {
        let mut dirs = vec![
            engine.storage.data_directory.clone(),
            engine.storage.texture_directory.clone(),
        ];
        if let Some(parent) = engine.storage.alias_file.parent() {
            dirs.push(parent.to_path_buf());
        }

        for dir in dirs {
            if dir.as_os_str().is_empty() || dir.exists() {
                continue;
            }
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                EngineError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    pub fn config(&self) -> Arc<PrivacyConfig> {
        self.config.read().clone()
    }

    pub fn resolution(&self) -> &ResolutionService {
        &self.resolution
    }

    pub fn masker(&self) -> &IdentityMasker {
        &self.masker
    }

    /// Validate and apply a new config, then refetch every source
    pub fn apply_config(&self, config: PrivacyConfig) -> EngineResult<()> {
        validate_privacy_config(&config)
            .map_err(|errors| EngineError::InvalidPrivacyConfig(describe(&errors)))?;

        *self.config.write() = Arc::new(config);
        self.refresh_sources();
        info!("Applied new privacy config");
        Ok(())
    }

    /// Name to render for `target`
    pub fn replacement_name(&self, target: Uuid, original: &str) -> String {
        let config = self.config();
        let snapshot = self.directory.snapshot();
        if !config.enabled || snapshot.player.is_none() {
            return original.to_string();
        }

        let local = snapshot.is_local(target, Some(original));
        self.masker
            .mask_for_name(Some(&config), local, target, original)
            .name
    }

    /// Masked identity for name rendering, `None` when nothing changes
    pub fn mask_identity_for_name(
        &self,
        target: Uuid,
        original: Option<&str>,
    ) -> Option<MaskedIdentity> {
        self.mask_identity(target, original, false)
    }

    /// Masked identity for texture rendering, `None` when nothing changes
    pub fn mask_identity_for_texture(
        &self,
        target: Uuid,
        original: Option<&str>,
    ) -> Option<MaskedIdentity> {
        self.mask_identity(target, original, true)
    }

    fn mask_identity(
        &self,
        target: Uuid,
        original: Option<&str>,
        for_texture: bool,
    ) -> Option<MaskedIdentity> {
        let config = self.config();
        let snapshot = self.directory.snapshot();
        if !config.enabled || snapshot.player.is_none() {
            return None;
        }

        let name = renderable_name(&snapshot, target, original);
        let local = snapshot.is_local(target, Some(&name));
        let masked = if for_texture {
            self.masker
                .mask_for_texture(Some(&config), local, target, &name)
        } else {
            self.masker.mask_for_name(Some(&config), local, target, &name)
        };

        (!masked.is_same_as(target, &name)).then_some(masked)
    }

    /// Replacement skin for `target`, `None` when its skin is not hidden
    pub fn replacement_texture(&self, target: Uuid, name: Option<&str>) -> Option<ResolvedTexture> {
        let config = self.config();
        let snapshot = self.directory.snapshot();
        if !config.enabled || snapshot.player.is_none() || self.breaker.is_open() {
            return None;
        }

        let local = snapshot.is_local(target, name);
        let (hidden, source) = if local {
            (config.hide_local_skin, config.local_skin_source.as_str())
        } else {
            (config.hide_other_skins, config.others_skin_source.as_str())
        };
        if !hidden {
            return None;
        }

        Some(
            self.resolution
                .resolve_or_fallback(source, target, config.allow_external_fallback),
        )
    }

    pub fn should_override_cape(&self, target: Uuid, name: Option<&str>) -> bool {
        let config = self.config();
        let snapshot = self.directory.snapshot();
        if !config.enabled || snapshot.player.is_none() || self.breaker.is_open() {
            return false;
        }

        if snapshot.is_local(target, name) {
            config.hide_local_cape
        } else {
            config.hide_other_capes
        }
    }

    /// Replacement cape for `target`
    ///
    /// The cape source falls back to the skin source. `None` when the cape is
    /// not overridden, no source is set, or the source has no cape.
    pub fn replacement_cape(&self, target: Uuid, name: Option<&str>) -> Option<ResolvedTexture> {
        if !self.should_override_cape(target, name) {
            return None;
        }

        let config = self.config();
        let local = self.directory.snapshot().is_local(target, name);
        let source = if local {
            preferred_cape_source(&config.local_cape_source, &config.local_skin_source)
        } else {
            preferred_cape_source(&config.others_cape_source, &config.others_skin_source)
        };
        if source.trim().is_empty() {
            return None;
        }

        let resolved = self
            .resolution
            .resolve_or_fallback(source, target, config.allow_external_fallback);
        resolved.has_cape_textures().then_some(resolved)
    }

    pub fn sanitize_text(&self, text: &str) -> String {
        let config = self.config();
        if !config.enabled {
            return text.to_string();
        }
        self.sanitizer.sanitize(text, &config)
    }

    /// One-line status for the host UI
    pub fn status_summary(&self) -> String {
        match self.breaker.state() {
            BreakerState::Open { remaining } => {
                format!("Temporarily disabled ({}s)", remaining.as_secs().max(1))
            }
            BreakerState::Closed => self.resolution.status_summary().to_string(),
        }
    }

    /// Report a failure inside a host texture hook
    pub fn report_hook_failure(&self, hook: &str, detail: &str) {
        self.breaker.record_failure(hook, detail);
    }

    pub fn on_session_join(&self) {
        self.refresh_sources();
        self.breaker.reset();
    }

    pub fn on_session_leave(&self) {
        self.resolution.clear_runtime_cache();
        self.breaker.reset();
    }

    /// Interrupt pending backoff waits
    pub fn shutdown(&self) {
        if let Some(sleeper) = &self.sleeper {
            sleeper.interrupt();
        }
    }

    /// Periodic lookup cache cleanup (runs every 5 minutes)
    pub fn start_maintenance(self: &Arc<Self>) {
        let runtime = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                match runtime.upgrade() {
                    Some(runtime) => runtime.resolution.cleanup_lookup_cache(),
                    None => break,
                }
            }
            debug!("Maintenance job stopped");
        });
    }

    fn refresh_sources(&self) {
        self.resolution.clear_runtime_cache();
        self.resolution.force_refresh_sources(&self.config());
    }
}

fn preferred_cape_source<'a>(cape_source: &'a str, skin_source: &'a str) -> &'a str {
    if cape_source.trim().is_empty() {
        skin_source
    } else {
        cape_source
    }
}

/// Name to mask when the caller has none: online list, then account, then a
/// shortened identifier
fn renderable_name(snapshot: &SessionSnapshot, target: Uuid, original: Option<&str>) -> String {
    if let Some(name) = original.filter(|n| !n.trim().is_empty()) {
        return name.to_string();
    }

    snapshot
        .name_for(target)
        .unwrap_or_else(|| target.simple().to_string()[..16].to_string())
}
