/// Text Sanitizer
///
/// Rewrites every textual occurrence of a known real identity (names and
/// identifier encodings) into its masked counterpart.

pub mod forms;

use crate::{
    config::PrivacyConfig,
    identity::{IdentityMasker, ProfileIdentity},
};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Point-in-time view of the host session
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    /// Account identifier of the signed-in user
    pub account_id: Option<Uuid>,
    /// Account name of the signed-in user
    pub account_name: Option<String>,
    /// Local player entity, absent outside a session
    pub player: Option<ProfileIdentity>,
    /// Online player list
    pub online: Vec<ProfileIdentity>,
}

impl SessionSnapshot {
    /// Known (identifier, name) pairs, local player first, one per identifier
    pub fn known_names(&self) -> Vec<(Uuid, String)> {
        let mut names: Vec<(Uuid, String)> = Vec::new();
        let mut index: HashMap<Uuid, usize> = HashMap::new();

        for profile in self.player.iter().chain(self.online.iter()) {
            if profile.name.trim().is_empty() {
                continue;
            }
            match index.get(&profile.id) {
                Some(&i) => names[i].1 = profile.name.clone(),
                None => {
                    index.insert(profile.id, names.len());
                    names.push((profile.id, profile.name.clone()));
                }
            }
        }

        names
    }

    /// Identifier the local user is known by in `names`
    pub fn local_identity(&self, names: &[(Uuid, String)]) -> Option<Uuid> {
        if let Some(account_id) = self.account_id {
            if names.iter().any(|(id, _)| *id == account_id) {
                return Some(account_id);
            }
        }

        if let Some(account_name) = self.account_name.as_deref().filter(|n| !n.trim().is_empty()) {
            if let Some((id, _)) = names
                .iter()
                .find(|(_, name)| name.eq_ignore_ascii_case(account_name))
            {
                return Some(*id);
            }
        }

        self.account_id.or(self.player.as_ref().map(|p| p.id))
    }

    /// Whether `id` (or `name`) refers to the local user
    pub fn is_local(&self, id: Uuid, name: Option<&str>) -> bool {
        if self.account_id == Some(id) {
            return true;
        }
        if self.player.as_ref().map(|p| p.id) == Some(id) {
            return true;
        }

        match (name, self.account_name.as_deref()) {
            (Some(name), Some(account)) if !name.trim().is_empty() && !account.trim().is_empty() => {
                name.eq_ignore_ascii_case(account)
            }
            _ => false,
        }
    }

    /// Best displayable name for `id`
    pub fn name_for(&self, id: Uuid) -> Option<String> {
        if let Some(profile) = self
            .online
            .iter()
            .find(|p| p.id == id && !p.name.trim().is_empty())
        {
            return Some(profile.name.clone());
        }

        if self.account_id == Some(id) {
            return self
                .account_name
                .clone()
                .filter(|n| !n.trim().is_empty());
        }

        None
    }
}

/// Source of the current session snapshot, implemented by the host
pub trait PlayerDirectory: Send + Sync {
    fn snapshot(&self) -> SessionSnapshot;
}

/// Fixed snapshot directory
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    snapshot: SessionSnapshot,
}

impl StaticDirectory {
    pub fn new(snapshot: SessionSnapshot) -> Self {
        Self { snapshot }
    }
}

impl PlayerDirectory for StaticDirectory {
    fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.clone()
    }
}

/// Text sanitizer over the currently known identities
#[derive(Clone)]
pub struct TextSanitizer {
    masker: IdentityMasker,
    directory: Arc<dyn PlayerDirectory>,
}

impl TextSanitizer {
    pub fn new(masker: IdentityMasker, directory: Arc<dyn PlayerDirectory>) -> Self {
        Self { masker, directory }
    }

    /// Sanitize `text` against the directory's current snapshot
    pub fn sanitize(&self, text: &str, config: &PrivacyConfig) -> String {
        if text.is_empty() || !config.enabled {
            return text.to_string();
        }

        let snapshot = self.directory.snapshot();
        self.sanitize_with(text, config, &snapshot)
    }

    /// Sanitize `text` against an explicit snapshot
    pub fn sanitize_with(
        &self,
        text: &str,
        config: &PrivacyConfig,
        snapshot: &SessionSnapshot,
    ) -> String {
        if text.is_empty() || !config.enabled || snapshot.player.is_none() {
            return text.to_string();
        }

        let names = snapshot.known_names();
        let local = snapshot.local_identity(&names);

        let mut replacements: HashMap<String, String> = self
            .masker
            .aliases()
            .build_replacement_map(local, &names, config)
            .into_iter()
            .collect();

        let mut masks: Vec<(Uuid, Uuid)> = Vec::new();
        for (id, name) in &names {
            let masked = self
                .masker
                .mask_for_name(Some(config), Some(*id) == local, *id, name);
            if masked.id == *id {
                continue;
            }

            masks.push((*id, masked.id));
            replacements.extend(forms::identifier_pairs(id, &masked.id));
        }

        // Masked values map to themselves so output is never rewritten again
        let masked_values: Vec<String> = replacements.values().cloned().collect();
        for value in masked_values {
            replacements.insert(value.clone(), value);
        }

        substitute(text, &replacements, &forms::prefix_map(&masks))
    }
}

/// One left-to-right pass over `text`
///
/// At each position the longest matching key wins and the scan resumes after
/// the match, so replaced text is never matched again. Standalone 8-hex
/// tokens are looked up in `prefixes`.
fn substitute(
    text: &str,
    replacements: &HashMap<String, String>,
    prefixes: &HashMap<String, String>,
) -> String {
    let mut keys: Vec<&str> = replacements
        .keys()
        .map(String::as_str)
        .filter(|key| !key.is_empty())
        .collect();
    if keys.is_empty() && prefixes.is_empty() {
        return text.to_string();
    }
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut alternatives: Vec<String> = keys.iter().map(|key| regex::escape(key)).collect();
    if !prefixes.is_empty() {
        alternatives.push(format!("(?P<prefix>{})", forms::HEX8_PATTERN));
    }

    let pattern = match Regex::new(&alternatives.join("|")) {
        Ok(pattern) => pattern,
        Err(e) => {
            error!("Failed to build sanitizer pattern: {}", e);
            return text.to_string();
        }
    };

    pattern
        .replace_all(text, |caps: &Captures| {
            let Some(found) = caps.get(0) else {
                return String::new();
            };
            let token = found.as_str();

            if caps.name("prefix").is_some() {
                if text[found.end()..].starts_with('-') {
                    return token.to_string();
                }
                return forms::masked_prefix(token, prefixes).unwrap_or_else(|| token.to_string());
            }

            replacements
                .get(token)
                .cloned()
                .unwrap_or_else(|| token.to_string())
        })
        .into_owned()
}
