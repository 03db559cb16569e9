/// Identity Masking System
///
/// Handles stable alias tokens, masked display identities and the
/// synthetic identifiers derived from masked names.

pub mod alias;
pub mod masking;

pub use alias::AliasRegistry;
pub use masking::IdentityMasker;

use serde::{Deserialize, Serialize};
use md5::{Digest, Md5};
use uuid::Uuid;

/// Prefix hashed together with a masked name to derive its identifier
pub const SYNTHETIC_PREFIX: &str = "OfflinePlayer:";

/// Placeholder substituted with an alias token in the others-name template
pub const ALIAS_PLACEHOLDER: &str = "[ID]";

/// Resolved stable identity: identifier plus canonical name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileIdentity {
    pub id: Uuid,
    pub name: String,
}

impl ProfileIdentity {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Identity as it should be displayed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaskedIdentity {
    pub id: Uuid,
    pub name: String,
}

impl MaskedIdentity {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// True when masking left the identity untouched
    pub fn is_same_as(&self, id: Uuid, name: &str) -> bool {
        self.id == id && self.name == name
    }
}

/// Derive the synthetic identifier for a (masked) name
///
/// Name-based (version 3, MD5) UUID of `SYNTHETIC_PREFIX + name`. This is
/// the offline-player identifier the host itself derives for a name, so the
/// same masked name maps to the same identifier everywhere.
pub fn derive_identifier(name: &str) -> Uuid {
    let mut hasher = Md5::new();
    hasher.update(SYNTHETIC_PREFIX.as_bytes());
    hasher.update(name.as_bytes());

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hasher.finalize());
    uuid::Builder::from_md5_bytes(bytes).into_uuid()
}

/// Expand the others-name template with an alias token
pub fn expand_template(template: &str, token: &str) -> String {
    template.replace(ALIAS_PLACEHOLDER, token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_identifier_is_deterministic() {
        let first = derive_identifier("AliasPlayer");
        let second = derive_identifier("AliasPlayer");
        let different = derive_identifier("AnotherAlias");

        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(first, Uuid::parse_str(&first.to_string()).unwrap());
    }

    #[test]
    fn test_derive_identifier_sets_variant() {
        let id = derive_identifier("Player_k3f9pl");
        assert_eq!(id.get_variant(), uuid::Variant::RFC4122);
        assert_eq!(id.get_version_num(), 3);
    }

    #[test]
    fn test_derive_identifier_matches_offline_player_ids() {
        assert_eq!(
            derive_identifier("Notch").to_string(),
            "b50ad385-829d-3141-a216-7e7d7539ba7f"
        );
        assert_eq!(
            derive_identifier("Player").to_string(),
            "a01e3843-e521-3998-958a-f459800e4d11"
        );
    }

    #[test]
    fn test_expand_template() {
        assert_eq!(expand_template("Player_[ID]", "k3f9pl"), "Player_k3f9pl");
        assert_eq!(expand_template("[ID]-x", "a"), "a-x");
    }
}
