/// Profile and texture payloads returned by the identity service
use crate::{error::FetchError, identity::ProfileIdentity, resolution::ModelVariant};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use uuid::Uuid;

/// Name of the profile property carrying texture URLs
pub const TEXTURES_PROPERTY: &str = "textures";

/// `GET /users/profiles/minecraft/{name}` body
#[derive(Debug, Deserialize)]
pub struct NameLookupResponse {
    pub id: String,
    pub name: String,
}

impl NameLookupResponse {
    pub fn into_identity(self) -> Result<ProfileIdentity, FetchError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| FetchError::Internal(format!("Invalid profile id {}: {}", self.id, e)))?;
        Ok(ProfileIdentity::new(id, self.name))
    }
}

/// `GET /session/minecraft/profile/{id}` body
#[derive(Debug, Deserialize)]
pub struct SessionProfileResponse {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub properties: Vec<ProfileProperty>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct TexturesPayload {
    #[serde(default)]
    textures: TextureUrls,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct TextureUrls {
    skin: Option<TextureEntry>,
    cape: Option<TextureEntry>,
    elytra: Option<TextureEntry>,
}

#[derive(Debug, Deserialize)]
struct TextureEntry {
    url: String,
    #[serde(default)]
    metadata: Option<TextureMetadata>,
}

#[derive(Debug, Deserialize)]
struct TextureMetadata {
    model: Option<String>,
}

/// Texture URLs advertised by a profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileTextures {
    /// Absent when the account uses a default skin
    pub skin_url: Option<String>,
    pub model: ModelVariant,
    pub cape_url: Option<String>,
    pub elytra_url: Option<String>,
}

impl SessionProfileResponse {
    /// Decode the textures property, if the profile carries one
    pub fn textures(&self) -> Result<ProfileTextures, FetchError> {
        match self.properties.iter().find(|p| p.name == TEXTURES_PROPERTY) {
            Some(property) => decode_textures_property(&property.value),
            None => Err(FetchError::Internal(format!(
                "Profile {} has no textures property",
                self.id
            ))),
        }
    }
}

/// Decode a base64 `textures` property value
pub fn decode_textures_property(value: &str) -> Result<ProfileTextures, FetchError> {
    let decoded = STANDARD
        .decode(value.trim())
        .map_err(|e| FetchError::Internal(format!("Invalid textures encoding: {}", e)))?;
    let payload: TexturesPayload = serde_json::from_slice(&decoded)
        .map_err(|e| FetchError::Internal(format!("Invalid textures payload: {}", e)))?;

    let textures = payload.textures;
    let model = textures
        .skin
        .as_ref()
        .and_then(|s| s.metadata.as_ref())
        .and_then(|m| m.model.as_deref())
        .map(ModelVariant::from_model_name)
        .unwrap_or_default();

    Ok(ProfileTextures {
        skin_url: textures.skin.map(|s| s.url),
        model,
        cape_url: textures.cape.map(|c| c.url),
        elytra_url: textures.elytra.map(|e| e.url),
    })
}
