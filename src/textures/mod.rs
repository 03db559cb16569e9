/// Texture storage
///
/// Downloaded textures are registered with a store that hands back an
/// opaque [`TextureHandle`] for the host renderer.
pub mod defaults;
pub mod disk;
pub mod legacy;

pub use defaults::DefaultTextures;
pub use disk::DiskTextureStore;

use crate::{
    error::EngineResult,
    resolution::{ModelVariant, TextureHandle},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What a texture is drawn as, which decides how it is validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Skin,
    Cape,
    Elytra,
}

impl TextureKind {
    /// Kind encoded in the first segment of a texture key
    ///
    /// `skin/<id>`, `cape/<id>`, `external_cape/<name>` and so on. Anything
    /// unrecognised is treated as a skin.
    pub fn for_key(key: &str) -> Self {
        let head = key.split('/').next().unwrap_or_default();
        if head.ends_with("cape") {
            TextureKind::Cape
        } else if head.ends_with("elytra") {
            TextureKind::Elytra
        } else {
            TextureKind::Skin
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TextureKind::Skin => "skin",
            TextureKind::Cape => "cape",
            TextureKind::Elytra => "elytra",
        }
    }
}

/// Facts about a stored skin the PNG itself does not carry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureMetadata {
    pub model: ModelVariant,
}

/// Texture storage backend trait
#[async_trait]
pub trait TextureStore: Send + Sync {
    /// Validate and store PNG bytes under `key`
    async fn register(
        &self,
        key: &str,
        kind: TextureKind,
        data: Vec<u8>,
    ) -> EngineResult<TextureHandle>;

    /// Retrieve stored bytes
    async fn get(&self, key: &str) -> EngineResult<Option<Vec<u8>>>;

    /// Handle of a texture stored by an earlier run, if it is still usable
    async fn open(&self, key: &str, kind: TextureKind) -> EngineResult<Option<TextureHandle>>;

    /// Store metadata next to the texture under `key`
    async fn put_metadata(&self, key: &str, metadata: &TextureMetadata) -> EngineResult<()>;

    async fn get_metadata(&self, key: &str) -> EngineResult<Option<TextureMetadata>>;
}
