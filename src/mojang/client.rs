/// Mojang Client - Username lookups and profile texture loading
use crate::{
    config::HttpConfig,
    error::{EngineError, EngineResult, FetchError},
    identity::ProfileIdentity,
    mojang::{
        profile::{NameLookupResponse, SessionProfileResponse},
        RemoteHttp,
    },
    resolution::{
        normalize_username, DefaultTextureProvider, IdentityLookup, ResolvedTexture,
        TextureHandle, TextureLoader,
    },
    textures::{TextureKind, TextureMetadata, TextureStore},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Identity and texture client for the official profile services
#[derive(Clone)]
pub struct MojangClient {
    http: RemoteHttp,
    api_base_url: String,
    session_base_url: String,
    store: Arc<dyn TextureStore>,
    defaults: Arc<dyn DefaultTextureProvider>,
}

impl MojangClient {
    /// Create a new client
    pub fn new(
        config: &HttpConfig,
        store: Arc<dyn TextureStore>,
        defaults: Arc<dyn DefaultTextureProvider>,
    ) -> EngineResult<Self> {
        Ok(Self::with_http(RemoteHttp::new(config)?, config, store, defaults))
    }

    /// Create a client sharing an existing HTTP client and limiter
    pub fn with_http(
        http: RemoteHttp,
        config: &HttpConfig,
        store: Arc<dyn TextureStore>,
        defaults: Arc<dyn DefaultTextureProvider>,
    ) -> Self {
        Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            session_base_url: config.session_base_url.trim_end_matches('/').to_string(),
            store,
            defaults,
        }
    }

    fn lookup_url(&self, username: &str) -> String {
        format!(
            "{}/users/profiles/minecraft/{}",
            self.api_base_url,
            urlencoding::encode(username)
        )
    }

    fn profile_url(&self, id: &Uuid) -> String {
        format!(
            "{}/session/minecraft/profile/{}?unsigned=false",
            self.session_base_url,
            id.simple()
        )
    }

    /// Stored textures are keyed by the normalized username they were
    /// resolved for, so a restart can find them before any lookup
    fn texture_key(kind: TextureKind, normalized: &str) -> String {
        format!("{}/{}", kind.as_str(), normalized)
    }

    async fn open_cached(&self, kind: TextureKind, normalized: &str) -> Option<TextureHandle> {
        let key = Self::texture_key(kind, normalized);
        match self.store.open(&key, kind).await {
            Ok(handle) => handle,
            Err(e) => {
                debug!("Could not read cached {}: {}", key, e);
                None
            }
        }
    }

    async fn download(
        &self,
        key: &str,
        kind: TextureKind,
        url: &str,
    ) -> Result<TextureHandle, FetchError> {
        let bytes = self.http.get_bytes("texture", url).await?;
        self.store
            .register(key, kind, bytes)
            .await
            .map_err(|e| match e {
                EngineError::TextureStorage(detail) => FetchError::Internal(detail),
                other => FetchError::Internal(other.to_string()),
            })
    }

    /// Secondary textures are best effort: a failure leaves them out
    async fn download_optional(
        &self,
        key: String,
        kind: TextureKind,
        url: Option<&str>,
    ) -> Option<TextureHandle> {
        let url = url?;
        match self.download(&key, kind, url).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!("Skipping {} {}: {}", kind.as_str(), key, e);
                None
            }
        }
    }
}

#[async_trait]
impl IdentityLookup for MojangClient {
    async fn lookup(&self, normalized_username: &str) -> Result<ProfileIdentity, FetchError> {
        let response: NameLookupResponse = self
            .http
            .get_json("profile_lookup", &self.lookup_url(normalized_username))
            .await?;
        response.into_identity()
    }
}

#[async_trait]
impl TextureLoader for MojangClient {
    async fn load(
        &self,
        profile: &ProfileIdentity,
        fallback_id: Uuid,
    ) -> Result<ResolvedTexture, FetchError> {
        let session: SessionProfileResponse = self
            .http
            .get_json("session_profile", &self.profile_url(&profile.id))
            .await?;
        let textures = session.textures()?;

        let name = normalize_username(&profile.name);
        let mut resolved = match textures.skin_url.as_deref() {
            Some(url) => {
                let key = Self::texture_key(TextureKind::Skin, &name);
                let handle = self.download(&key, TextureKind::Skin, url).await?;
                let metadata = TextureMetadata {
                    model: textures.model,
                };
                if let Err(e) = self.store.put_metadata(&key, &metadata).await {
                    debug!("Could not record model of {}: {}", key, e);
                }
                ResolvedTexture::new(handle, textures.model)
            }
            None => {
                debug!("{} uses a default skin", profile.name);
                self.defaults.default_texture(fallback_id)
            }
        };

        resolved.cape = self
            .download_optional(
                Self::texture_key(TextureKind::Cape, &name),
                TextureKind::Cape,
                textures.cape_url.as_deref(),
            )
            .await;
        resolved.elytra = self
            .download_optional(
                Self::texture_key(TextureKind::Elytra, &name),
                TextureKind::Elytra,
                textures.elytra_url.as_deref(),
            )
            .await;

        Ok(resolved)
    }

    async fn register_url(&self, key: &str, url: &str) -> Result<TextureHandle, FetchError> {
        self.download(key, TextureKind::for_key(key), url).await
    }

    async fn load_cached(
        &self,
        normalized_username: &str,
    ) -> Result<Option<ResolvedTexture>, FetchError> {
        let Some(skin) = self.open_cached(TextureKind::Skin, normalized_username).await else {
            return Ok(None);
        };

        let key = Self::texture_key(TextureKind::Skin, normalized_username);
        let model = self
            .store
            .get_metadata(&key)
            .await
            .map_err(|e| FetchError::Internal(e.to_string()))?
            .unwrap_or_default()
            .model;

        let mut resolved = ResolvedTexture::new(skin, model);
        resolved.cape = self.open_cached(TextureKind::Cape, normalized_username).await;
        resolved.elytra = self.open_cached(TextureKind::Elytra, normalized_username).await;
        Ok(Some(resolved))
    }
}
