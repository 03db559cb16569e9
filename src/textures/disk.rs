/// Disk-based texture storage backend
use crate::{
    error::{EngineError, EngineResult},
    resolution::TextureHandle,
    textures::{legacy, TextureKind, TextureMetadata, TextureStore},
};
use async_trait::async_trait;
use image::ImageFormat;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// Namespace prefix of every handle this store issues
pub const HANDLE_NAMESPACE: &str = "nickhider";

/// Disk storage backend
///
/// Stores PNGs on the local filesystem with directory sharding based on a
/// hash prefix of the key to prevent too many files in one directory.
#[derive(Clone)]
pub struct DiskTextureStore {
    base_path: PathBuf,
}

impl DiskTextureStore {
    /// Create a new disk storage backend
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Get the file path for a key
    ///
    /// Uses directory sharding: {base}/{first2hex}/{file_name}.png
    fn get_texture_path(&self, key: &str) -> PathBuf {
        self.entry_path(key, "png")
    }

    /// Metadata sits beside the PNG with a `.json` extension
    fn get_metadata_path(&self, key: &str) -> PathBuf {
        self.entry_path(key, "json")
    }

    fn entry_path(&self, key: &str, extension: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let shard = format!("{:02x}", digest[0]);
        self.base_path
            .join(shard)
            .join(format!("{}.{}", file_name(key), extension))
    }

    fn handle_for(key: &str) -> TextureHandle {
        TextureHandle::new(format!("{}:{}", HANDLE_NAMESPACE, key))
    }

    /// Write through a temporary file so readers never see a partial entry
    async fn write_atomic(&self, path: PathBuf, key: &str, data: &[u8]) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::TextureStorage(format!("Failed to create texture directory: {}", e))
            })?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, data).await.map_err(|e| {
            EngineError::TextureStorage(format!("Failed to write texture {}: {}", key, e))
        })?;
        fs::rename(&tmp, &path).await.map_err(|e| {
            EngineError::TextureStorage(format!("Failed to move texture {} into place: {}", key, e))
        })?;
        Ok(())
    }

    async fn read_optional(&self, path: PathBuf, key: &str) -> EngineResult<Option<Vec<u8>>> {
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::TextureStorage(format!(
                "Failed to read texture {}: {}",
                key, e
            ))),
        }
    }
}

/// Filesystem-safe form of a key
fn file_name(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '_' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect()
}

/// Check the bytes decode as a PNG the renderer will accept for `kind`
pub fn validate_texture(kind: TextureKind, data: &[u8]) -> EngineResult<(u32, u32)> {
    let image = image::load_from_memory_with_format(data, ImageFormat::Png)
        .map_err(|e| EngineError::TextureStorage(format!("Invalid {} PNG: {}", kind.as_str(), e)))?;
    let (width, height) = (image.width(), image.height());

    let accepted = match kind {
        TextureKind::Skin => width == 64 && (height == 64 || height == 32),
        // Capes come in 64x32 and HD multiples, older ones in 22x17
        TextureKind::Cape | TextureKind::Elytra => width >= 22 && height >= 17 && width <= 4096,
    };

    if !accepted {
        return Err(EngineError::TextureStorage(format!(
            "Unexpected {} dimensions {}x{}",
            kind.as_str(),
            width,
            height
        )));
    }

    Ok((width, height))
}

#[async_trait]
impl TextureStore for DiskTextureStore {
    async fn register(
        &self,
        key: &str,
        kind: TextureKind,
        data: Vec<u8>,
    ) -> EngineResult<TextureHandle> {
        let (width, height) = validate_texture(kind, &data)?;
        let data = match kind {
            TextureKind::Skin => legacy::normalize_skin_png(&data)?,
            TextureKind::Cape | TextureKind::Elytra => data,
        };

        self.write_atomic(self.get_texture_path(key), key, &data)
            .await?;

        debug!("Stored {} {} ({}x{})", kind.as_str(), key, width, height);
        Ok(Self::handle_for(key))
    }

    async fn get(&self, key: &str) -> EngineResult<Option<Vec<u8>>> {
        self.read_optional(self.get_texture_path(key), key).await
    }

    async fn open(&self, key: &str, kind: TextureKind) -> EngineResult<Option<TextureHandle>> {
        let Some(data) = self.get(key).await? else {
            return Ok(None);
        };

        match validate_texture(kind, &data) {
            Ok(_) => Ok(Some(Self::handle_for(key))),
            Err(e) => {
                debug!("Ignoring stored {}: {}", key, e);
                Ok(None)
            }
        }
    }

    async fn put_metadata(&self, key: &str, metadata: &TextureMetadata) -> EngineResult<()> {
        let json = serde_json::to_vec(metadata)?;
        self.write_atomic(self.get_metadata_path(key), key, &json)
            .await
    }

    async fn get_metadata(&self, key: &str) -> EngineResult<Option<TextureMetadata>> {
        let Some(raw) = self.read_optional(self.get_metadata_path(key), key).await? else {
            return Ok(None);
        };

        match serde_json::from_slice(&raw) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                debug!("Ignoring unreadable metadata for {}: {}", key, e);
                Ok(None)
            }
        }
    }
}
