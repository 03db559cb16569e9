/// External fallback provider
///
/// Consulted only after the official services gave up on a username. Skins
/// and capes live under separate base URLs and are probed with HEAD before
/// the texture loader downloads them.
use crate::{
    config::HttpConfig,
    error::{EngineResult, FetchError},
    mojang::RemoteHttp,
    resolution::ExternalFallback,
};
use async_trait::async_trait;
use tracing::debug;

#[derive(Clone)]
pub struct HttpExternalFallback {
    http: RemoteHttp,
    skin_base_url: String,
    cape_base_url: String,
}

impl HttpExternalFallback {
    pub fn new(config: &HttpConfig) -> EngineResult<Self> {
        Ok(Self::with_http(RemoteHttp::new(config)?, config))
    }

    pub fn with_http(http: RemoteHttp, config: &HttpConfig) -> Self {
        Self {
            http,
            skin_base_url: config.external_skin_base_url.trim_end_matches('/').to_string(),
            cape_base_url: config.external_cape_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn skin_url(&self, username: &str) -> String {
        format!("{}/{}", self.skin_base_url, urlencoding::encode(username))
    }

    fn cape_url(&self, username: &str) -> String {
        format!("{}/{}.png", self.cape_base_url, urlencoding::encode(username))
    }
}

#[async_trait]
impl ExternalFallback for HttpExternalFallback {
    async fn probe_skin(&self, normalized_username: &str) -> Result<Option<String>, FetchError> {
        let url = self.skin_url(normalized_username);
        let found = self.http.probe("external_skin", &url).await?;
        debug!("External skin probe for {}: {}", normalized_username, found);
        Ok(found.then_some(url))
    }

    async fn lookup_cape(&self, normalized_username: &str) -> Result<Option<String>, FetchError> {
        let url = self.cape_url(normalized_username);
        let found = self.http.probe("external_cape", &url).await?;
        Ok(found.then_some(url))
    }
}
