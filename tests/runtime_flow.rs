/// Runtime flow tests
/// Drive the public runtime API the way a host does: aliases on disk, chat
/// sanitization, deferred texture resolution into the disk store and the
/// hook circuit breaker.
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbaImage};
use nickhider::{
    breaker::HookCircuitBreaker,
    config::BreakerConfig,
    identity::{derive_identifier, AliasRegistry, ProfileIdentity},
    resolution::{
        IdentityLookup, ImmediateSleeper, ManualClock, ManualExecutor, ModelVariant, NoJitter,
        ResolutionService, ResolvedTexture, TextureHandle, TextureLoader,
    },
    sanitize::{forms::int_array_form, SessionSnapshot, StaticDirectory},
    textures::{DefaultTextures, DiskTextureStore, TextureKind, TextureStore},
    FetchError, PrivacyConfig, PrivacyRuntime,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

const LOCAL: u128 = 0x1111_2222_3333_4444_5555_6666_7777_8888;
const OTHER: u128 = 0x9999_aaaa_bbbb_cccc_dddd_eeee_ffff_0000;

fn skin_png() -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(RgbaImage::new(64, 64))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Source profile service that stores downloaded skins on disk
struct DiskBackedSource {
    store: DiskTextureStore,
    lookups: AtomicUsize,
    offline: bool,
}

fn skin_key(normalized: &str) -> String {
    format!("skin/{}", derive_identifier(normalized).simple())
}

#[async_trait]
impl IdentityLookup for DiskBackedSource {
    async fn lookup(&self, normalized: &str) -> Result<ProfileIdentity, FetchError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.offline {
            return Err(FetchError::NotFound(normalized.to_string()));
        }
        Ok(ProfileIdentity::new(derive_identifier(normalized), normalized))
    }
}

#[async_trait]
impl TextureLoader for DiskBackedSource {
    async fn load(
        &self,
        profile: &ProfileIdentity,
        _fallback_id: Uuid,
    ) -> Result<ResolvedTexture, FetchError> {
        let handle = self.register_url(&skin_key(&profile.name), "unused").await?;
        Ok(ResolvedTexture::new(handle, ModelVariant::Slim))
    }

    async fn load_cached(&self, normalized: &str) -> Result<Option<ResolvedTexture>, FetchError> {
        let handle = self
            .store
            .open(&skin_key(normalized), TextureKind::Skin)
            .await
            .map_err(|e| FetchError::Internal(e.to_string()))?;
        Ok(handle.map(|handle| ResolvedTexture::new(handle, ModelVariant::Slim)))
    }

    async fn register_url(&self, key: &str, _url: &str) -> Result<TextureHandle, FetchError> {
        self.store
            .register(key, TextureKind::for_key(key), skin_png())
            .await
            .map_err(|e| FetchError::Internal(e.to_string()))
    }
}

struct Host {
    dir: TempDir,
    runtime: PrivacyRuntime,
    source: Arc<DiskBackedSource>,
    executor: Arc<ManualExecutor>,
    clock: Arc<ManualClock>,
}

fn session() -> SessionSnapshot {
    let local = ProfileIdentity::new(Uuid::from_u128(LOCAL), "CaptainLocal");
    SessionSnapshot {
        account_id: Some(local.id),
        account_name: Some(local.name.clone()),
        player: Some(local.clone()),
        online: vec![
            local,
            ProfileIdentity::new(Uuid::from_u128(OTHER), "Wanderer"),
        ],
    }
}

fn host(config: PrivacyConfig) -> Host {
    host_in(tempdir().unwrap(), config, false)
}

fn host_in(dir: TempDir, config: PrivacyConfig, offline: bool) -> Host {
    let source = Arc::new(DiskBackedSource {
        store: DiskTextureStore::new(dir.path().join("skins")),
        lookups: AtomicUsize::new(0),
        offline,
    });
    let executor = Arc::new(ManualExecutor::new());
    let clock = Arc::new(ManualClock::new(5_000_000));

    let resolution =
        ResolutionService::builder(source.clone(), source.clone(), Arc::new(DefaultTextures))
            .executor(executor.clone())
            .clock(clock.clone())
            .sleeper(Arc::new(ImmediateSleeper))
            .jitter(Arc::new(NoJitter))
            .build();
    let breaker = HookCircuitBreaker::new(&BreakerConfig::default(), clock.clone());
    let aliases = Arc::new(AliasRegistry::open(dir.path().join("ids.json")));

    let runtime = PrivacyRuntime::with_parts(
        config,
        aliases,
        resolution,
        breaker,
        Arc::new(StaticDirectory::new(session())),
    )
    .unwrap();

    Host {
        dir,
        runtime,
        source,
        executor,
        clock,
    }
}

#[test]
fn test_alias_tokens_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ids.json");
    let first = Uuid::from_u128(OTHER);
    let second = Uuid::from_u128(LOCAL);

    let (token_a, token_b) = {
        let registry = AliasRegistry::open(&path);
        (
            registry.get_or_create_short_token(&first),
            registry.get_or_create_short_token(&second),
        )
    };

    assert_eq!(token_a.len(), 6);
    assert!(token_a.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    assert_ne!(token_a, token_b);

    let reopened = AliasRegistry::open(&path);
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.short_token(&first), Some(token_a.clone()));
    assert_eq!(reopened.owner_of(&token_b), Some(second));
    assert_eq!(reopened.get_or_create_short_token(&first), token_a);
}

#[test]
fn test_chat_line_is_fully_sanitized() {
    let host = host(PrivacyConfig {
        hide_other_names: true,
        ..PrivacyConfig::default()
    });
    let other = Uuid::from_u128(OTHER);
    let local = Uuid::from_u128(LOCAL);

    let line = format!(
        "<CaptainLocal> hi Wanderer ({}) {} {} short {}",
        other.hyphenated(),
        local.simple().to_string().to_uppercase(),
        int_array_form(&other),
        &other.simple().to_string()[..8],
    );
    let sanitized = host.runtime.sanitize_text(&line);

    assert!(!sanitized.contains("CaptainLocal"));
    assert!(!sanitized.contains("Wanderer"));
    assert!(!sanitized.contains(&other.hyphenated().to_string()));
    assert!(!sanitized.contains(&local.simple().to_string().to_uppercase()));
    assert!(!sanitized.contains(&int_array_form(&other)));
    assert!(!sanitized.contains(&other.simple().to_string()[..8]));

    let token = host
        .runtime
        .masker()
        .aliases()
        .short_token(&other)
        .unwrap();
    assert!(sanitized.starts_with("<Player> hi "));
    assert!(sanitized.contains(&format!("Player_{}", token)));
    assert!(sanitized.contains(&derive_identifier(&format!("Player_{}", token)).hyphenated().to_string()));

    // Alias persisted alongside the runtime
    assert!(host.dir.path().join("ids.json").exists());
}

#[tokio::test]
async fn test_skin_override_resolves_into_disk_store() {
    let host = host(PrivacyConfig {
        hide_other_skins: true,
        others_skin_source: "SkinSource".to_string(),
        ..PrivacyConfig::default()
    });
    let other = Uuid::from_u128(OTHER);

    // First frame renders the default skin while the fetch is queued
    let first = host
        .runtime
        .replacement_texture(other, Some("Wanderer"))
        .unwrap();
    assert!(first
        .texture
        .as_str()
        .starts_with("minecraft:textures/entity/player/"));
    assert_eq!(host.runtime.status_summary(), "Fetching");
    assert_eq!(host.executor.pending(), 1);

    // Repeated frames never queue a second fetch
    host.runtime.replacement_texture(other, Some("Wanderer"));
    assert_eq!(host.executor.pending(), 1);

    assert_eq!(host.executor.run_all().await, 1);

    let resolved = host
        .runtime
        .replacement_texture(other, Some("Wanderer"))
        .unwrap();
    let key = skin_key("skinsource");
    assert_eq!(resolved.texture.as_str(), format!("nickhider:{}", key));
    assert_eq!(resolved.model, ModelVariant::Slim);
    assert_eq!(host.runtime.status_summary(), "Idle");
    assert!(host.source.store.get(&key).await.unwrap().is_some());

    // Local skin is not hidden by the others toggle
    assert!(host
        .runtime
        .replacement_texture(Uuid::from_u128(LOCAL), Some("CaptainLocal"))
        .is_some());
    assert!(host
        .runtime
        .replacement_texture(other, Some("Wanderer"))
        .is_some());

    // Stale after ten minutes: served from cache, refreshed in the background
    host.clock.advance(Duration::from_secs(601));
    let stale = host
        .runtime
        .replacement_texture(other, Some("Wanderer"))
        .unwrap();
    assert_eq!(stale.texture, resolved.texture);
    assert_eq!(host.executor.pending(), 1);
    host.executor.run_all().await;
    assert_eq!(host.executor.pending(), 0);
    assert_eq!(host.runtime.status_summary(), "Idle");
    assert!(host.source.lookups.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_restart_serves_stored_skin_while_source_is_unreachable() {
    let config = PrivacyConfig {
        hide_other_skins: true,
        others_skin_source: "SkinSource".to_string(),
        ..PrivacyConfig::default()
    };
    let other = Uuid::from_u128(OTHER);

    let first_run = host(config.clone());
    first_run.runtime.replacement_texture(other, Some("Wanderer"));
    first_run.executor.run_all().await;
    let fetched = first_run
        .runtime
        .replacement_texture(other, Some("Wanderer"))
        .unwrap();

    let second_run = host_in(first_run.dir, config, true);
    let before = second_run
        .runtime
        .replacement_texture(other, Some("Wanderer"))
        .unwrap();
    assert_ne!(before.texture, fetched.texture);
    second_run.executor.run_all().await;

    let after = second_run
        .runtime
        .replacement_texture(other, Some("Wanderer"))
        .unwrap();
    assert_eq!(after.texture, fetched.texture);
    assert_eq!(second_run.runtime.status_summary(), "Using last good");
}

#[tokio::test]
async fn test_breaker_disables_overrides_until_next_session() {
    let host = host(PrivacyConfig {
        hide_other_skins: true,
        hide_other_capes: true,
        others_skin_source: "SkinSource".to_string(),
        ..PrivacyConfig::default()
    });
    let other = Uuid::from_u128(OTHER);

    for _ in 0..BreakerConfig::default().failure_threshold {
        host.runtime.report_hook_failure("skin", "renderer rejected texture");
    }

    assert!(host
        .runtime
        .status_summary()
        .starts_with("Temporarily disabled ("));
    assert!(host.runtime.replacement_texture(other, Some("Wanderer")).is_none());
    assert!(!host.runtime.should_override_cape(other, Some("Wanderer")));
    assert_eq!(host.executor.pending(), 0);

    host.runtime.on_session_join();
    assert!(!host.runtime.status_summary().starts_with("Temporarily disabled"));
    assert!(host.runtime.should_override_cape(other, Some("Wanderer")));
}

#[test]
fn test_invalid_config_is_rejected_and_previous_kept() {
    let host = host(PrivacyConfig::default());

    let result = host.runtime.apply_config(PrivacyConfig {
        local_name: "x".to_string(),
        ..PrivacyConfig::default()
    });

    assert!(result.is_err());
    assert_eq!(host.runtime.config().local_name, "Player");
}
