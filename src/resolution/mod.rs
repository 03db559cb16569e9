/// Texture Resolution System
///
/// Turns a replacement source username into a cached, renderable texture set
/// without ever blocking the caller. Fetches run on a single background
/// worker with retry, backoff, stale-while-revalidate and rate-limit aware
/// cooldowns.

pub mod cache;
pub mod clock;
pub mod service;
pub mod state;
pub mod worker;

pub use cache::LookupCache;
pub use clock::{
    Clock, ImmediateSleeper, Jitter, ManualClock, NoJitter, RandomJitter, Sleeper, SystemClock,
    TokioSleeper,
};
pub use service::{ResolutionService, ResolutionServiceBuilder, SourceSnapshot};
pub use worker::{FetchExecutor, FetchJob, FetchWorker, ManualExecutor};

use crate::{error::FetchError, identity::ProfileIdentity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque handle to a texture registered with the host renderer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureHandle(String);

impl TextureHandle {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Player model variant a skin is drawn on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    #[default]
    Default,
    Slim,
}

impl ModelVariant {
    /// Parse a remote model name, anything unknown is the default model
    pub fn from_model_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("slim") {
            ModelVariant::Slim
        } else {
            ModelVariant::Default
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::Default => "default",
            ModelVariant::Slim => "slim",
        }
    }
}

/// Renderable texture set for one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTexture {
    /// Primary (skin) texture
    pub texture: TextureHandle,
    pub model: ModelVariant,
    /// Secondary (cape) texture
    pub cape: Option<TextureHandle>,
    /// Tertiary (elytra) texture
    pub elytra: Option<TextureHandle>,
}

impl ResolvedTexture {
    pub fn new(texture: TextureHandle, model: ModelVariant) -> Self {
        Self {
            texture,
            model,
            cape: None,
            elytra: None,
        }
    }

    pub fn has_cape_textures(&self) -> bool {
        self.cape.is_some() || self.elytra.is_some()
    }
}

/// Coarse resolution status for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStatus {
    Fetching,
    RateLimited { eta_secs: u64 },
    UsingLastGood,
    Idle,
}

impl fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionStatus::Fetching => write!(f, "Fetching"),
            ResolutionStatus::RateLimited { eta_secs } => write!(f, "Rate limited ({}s)", eta_secs),
            ResolutionStatus::UsingLastGood => write!(f, "Using last good"),
            ResolutionStatus::Idle => write!(f, "Idle"),
        }
    }
}

/// Resolves a normalized username to a stable identity
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn lookup(&self, normalized_username: &str) -> Result<ProfileIdentity, FetchError>;
}

/// Fetches and registers the texture set of an identity
#[async_trait]
pub trait TextureLoader: Send + Sync {
    async fn load(
        &self,
        profile: &ProfileIdentity,
        fallback_id: Uuid,
    ) -> Result<ResolvedTexture, FetchError>;

    /// Download `url` and register it under `key`
    async fn register_url(&self, key: &str, url: &str) -> Result<TextureHandle, FetchError>;

    /// Texture set a previous run left in local storage, if any
    async fn load_cached(
        &self,
        _normalized_username: &str,
    ) -> Result<Option<ResolvedTexture>, FetchError> {
        Ok(None)
    }
}

/// Deterministic texture used while nothing better is cached
pub trait DefaultTextureProvider: Send + Sync {
    fn default_texture(&self, fallback_id: Uuid) -> ResolvedTexture;
}

/// Secondary texture provider consulted after internal resolution gives up
#[async_trait]
pub trait ExternalFallback: Send + Sync {
    /// URL of a skin for the username, if the provider has one
    async fn probe_skin(&self, normalized_username: &str) -> Result<Option<String>, FetchError>;

    /// URL of a cape for the username, if the provider has one
    async fn lookup_cape(&self, normalized_username: &str) -> Result<Option<String>, FetchError>;
}

/// Lowercased, trimmed form used as the cache key
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}
