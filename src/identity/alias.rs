/// Alias Registry - persistent mapping from stable identifiers to short tokens
use crate::{
    config::PrivacyConfig,
    error::{EngineError, EngineResult},
    identity::expand_template,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Size of the token space (36^6)
const TOKEN_SPACE: u64 = 2_176_782_336;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// On-disk layout of the alias file
#[derive(Debug, Default, Serialize, Deserialize)]
struct AliasFile {
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct AliasTable {
    by_id: HashMap<Uuid, String>,
    by_token: HashMap<String, Uuid>,
}

/// Process-wide alias registry
///
/// Entries are append-only. Every new assignment rewrites the whole table
/// through a temp file and rename. A failed write is logged and the
/// in-memory assignment stays authoritative for the session.
pub struct AliasRegistry {
    path: PathBuf,
    table: Mutex<AliasTable>,
}

impl AliasRegistry {
    /// Open the registry backed by `path`, loading existing entries
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let table = match load_table(&path) {
            Ok(table) => table,
            Err(e) => {
                warn!("Failed to load alias cache from {:?}: {}", path, e);
                AliasTable::default()
            }
        };

        debug!("Loaded {} aliases from {:?}", table.by_id.len(), path);

        Self {
            path,
            table: Mutex::new(table),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of assigned tokens
    pub fn len(&self) -> usize {
        self.table.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Existing token for `id`, if any
    pub fn short_token(&self, id: &Uuid) -> Option<String> {
        self.table.lock().by_id.get(id).cloned()
    }

    /// Identifier owning `token`, if any
    pub fn owner_of(&self, token: &str) -> Option<Uuid> {
        self.table.lock().by_token.get(token).copied()
    }

    /// Get the token for `id`, assigning and persisting a new one if needed
    pub fn get_or_create_short_token(&self, id: &Uuid) -> String {
        let mut table = self.table.lock();
        if let Some(existing) = table.by_id.get(id) {
            return existing.clone();
        }

        let mut salt: u32 = 0;
        let token = loop {
            let candidate = candidate_token(id, salt);
            match table.by_token.get(&candidate) {
                Some(owner) if owner != id => salt += 1,
                _ => break candidate,
            }
        };

        table.by_id.insert(*id, token.clone());
        table.by_token.insert(token.clone(), *id);

        if let Err(e) = persist_table(&self.path, &table) {
            error!("Failed to persist alias cache at {:?}: {}", self.path, e);
        }

        token
    }

    /// Build the name replacement table for all known identities
    ///
    /// Returned pairs are ordered longest key first so that a name contained
    /// in another name is never substituted before the longer one.
    pub fn build_replacement_map(
        &self,
        local_id: Option<Uuid>,
        names: &[(Uuid, String)],
        config: &PrivacyConfig,
    ) -> Vec<(String, String)> {
        if !config.enabled {
            return Vec::new();
        }

        let mut replacements: HashMap<String, String> = HashMap::new();

        for (id, original) in names {
            if original.trim().is_empty() {
                continue;
            }

            if Some(*id) == local_id {
                if config.hide_local_name && config.local_name != *original {
                    replacements.insert(original.clone(), config.local_name.clone());
                }
                continue;
            }

            if !config.hide_other_names {
                continue;
            }

            let replacement =
                expand_template(&config.others_name_template, &self.get_or_create_short_token(id));
            if replacement != *original {
                replacements.insert(original.clone(), replacement);
            }
        }

        sort_longest_first(replacements.into_iter().collect())
    }
}

/// Sort replacement pairs by key length descending, ties by key
pub fn sort_longest_first(mut pairs: Vec<(String, String)>) -> Vec<(String, String)> {
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    pairs
}

fn candidate_token(id: &Uuid, salt: u32) -> String {
    let digest = Sha256::digest(format!("{}:{}", id, salt).as_bytes());

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let value = u64::from_be_bytes(prefix) % TOKEN_SPACE;

    to_base36(value)
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::with_capacity(6);
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_else(|_| "0".to_string())
}

fn load_table(path: &Path) -> EngineResult<AliasTable> {
    if !path.exists() {
        return Ok(AliasTable::default());
    }

    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(AliasTable::default());
    }

    let file: AliasFile = serde_json::from_str(&raw)?;

    let mut table = AliasTable::default();
    for (key, token) in file.aliases {
        let id = Uuid::parse_str(&key)
            .map_err(|e| EngineError::Internal(format!("Invalid alias key {}: {}", key, e)))?;
        if table.by_token.insert(token.clone(), id).is_some() {
            return Err(EngineError::Internal(format!(
                "Alias token {} assigned twice",
                token
            )));
        }
        table.by_id.insert(id, token);
    }

    Ok(table)
}

fn persist_table(path: &Path, table: &AliasTable) -> EngineResult<()> {
    let file = AliasFile {
        aliases: table
            .by_id
            .iter()
            .map(|(id, token)| (id.to_string(), token.clone()))
            .collect(),
    };
    let json = serde_json::to_string_pretty(&file)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = tmp_path(path);
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;

    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "aliases.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}
