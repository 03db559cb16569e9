/// Built-in default skins
use crate::resolution::{DefaultTextureProvider, ModelVariant, ResolvedTexture, TextureHandle};
use uuid::Uuid;

const DEFAULT_SKIN_NAMES: [&str; 9] = [
    "alex", "ari", "efe", "kai", "makena", "noor", "steve", "sunny", "zuri",
];

/// Deterministic default skin per identifier
///
/// Slim variants come first, then wide ones, and the identifier's hash
/// picks one. The same identifier always gets the same skin.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTextures;

impl DefaultTextures {
    pub fn new() -> Self {
        Self
    }

    /// Number of built-in skins
    pub fn count() -> usize {
        DEFAULT_SKIN_NAMES.len() * 2
    }

    fn index_for(id: &Uuid) -> usize {
        let (high, low) = id.as_u64_pair();
        let folded = high ^ low;
        let hash = ((folded >> 32) ^ folded) as u32 as i32;
        hash.rem_euclid(Self::count() as i32) as usize
    }
}

impl DefaultTextureProvider for DefaultTextures {
    fn default_texture(&self, fallback_id: Uuid) -> ResolvedTexture {
        let index = Self::index_for(&fallback_id);
        let (model, folder) = if index < DEFAULT_SKIN_NAMES.len() {
            (ModelVariant::Slim, "slim")
        } else {
            (ModelVariant::Default, "wide")
        };
        let name = DEFAULT_SKIN_NAMES[index % DEFAULT_SKIN_NAMES.len()];

        ResolvedTexture::new(
            TextureHandle::new(format!(
                "minecraft:textures/entity/player/{}/{}.png",
                folder, name
            )),
            model,
        )
    }
}
