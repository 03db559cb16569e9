/// Identity Masker - computes the identity to display for a real identity
use crate::{
    config::PrivacyConfig,
    identity::{derive_identifier, expand_template, AliasRegistry, MaskedIdentity},
};
use std::sync::Arc;
use uuid::Uuid;

/// Pure masking policy over a privacy config
///
/// An absent config means the feature is disabled.
#[derive(Clone)]
pub struct IdentityMasker {
    aliases: Arc<AliasRegistry>,
}

impl IdentityMasker {
    pub fn new(aliases: Arc<AliasRegistry>) -> Self {
        Self { aliases }
    }

    pub fn aliases(&self) -> &Arc<AliasRegistry> {
        &self.aliases
    }

    /// Mask an identity for name rendering (name toggles)
    pub fn mask_for_name(
        &self,
        config: Option<&PrivacyConfig>,
        is_local: bool,
        id: Uuid,
        name: &str,
    ) -> MaskedIdentity {
        let config = match active(config, name) {
            Some(config) => config,
            None => return MaskedIdentity::new(id, name),
        };

        let masked_name = self.masked_name(config, is_local, &id, name);
        if masked_name == name {
            return MaskedIdentity::new(id, name);
        }

        MaskedIdentity::new(derive_identifier(&masked_name), masked_name)
    }

    /// Mask an identity for texture rendering (skin toggles)
    ///
    /// Without a texture source override the identifier follows the masked
    /// name. With an override it is keyed by the alias token so identities
    /// sharing a masked name stay apart on identifier-keyed caches.
    pub fn mask_for_texture(
        &self,
        config: Option<&PrivacyConfig>,
        is_local: bool,
        id: Uuid,
        name: &str,
    ) -> MaskedIdentity {
        let config = match active(config, name) {
            Some(config) => config,
            None => return MaskedIdentity::new(id, name),
        };

        let (hide_skin, source) = if is_local {
            (config.hide_local_skin, config.local_skin_source.as_str())
        } else {
            (config.hide_other_skins, config.others_skin_source.as_str())
        };
        if !hide_skin {
            return MaskedIdentity::new(id, name);
        }

        let rendered_name = self.masked_name(config, is_local, &id, name);

        let mut masked_id = if source.trim().is_empty() {
            derive_identifier(&rendered_name)
        } else {
            derive_identifier(&self.texture_key(&id))
        };
        if masked_id == id {
            masked_id = derive_identifier(&format!("{}:{}", self.texture_key(&id), rendered_name));
        }

        MaskedIdentity::new(masked_id, rendered_name)
    }

    fn masked_name(&self, config: &PrivacyConfig, is_local: bool, id: &Uuid, name: &str) -> String {
        if is_local {
            return if config.hide_local_name {
                config.local_name.clone()
            } else {
                name.to_string()
            };
        }

        if !config.hide_other_names {
            return name.to_string();
        }

        expand_template(
            &config.others_name_template,
            &self.aliases.get_or_create_short_token(id),
        )
    }

    fn texture_key(&self, id: &Uuid) -> String {
        format!("tex_{}", self.aliases.get_or_create_short_token(id))
    }
}

fn active<'a>(config: Option<&'a PrivacyConfig>, name: &str) -> Option<&'a PrivacyConfig> {
    match config {
        Some(config) if config.enabled && !name.trim().is_empty() => Some(config),
        _ => None,
    }
}
