//! Blacklist store
//!
//! Persistent deny list for users and guilds. Blacklisted users get no
//! command service at all; blacklisted guilds get none for any of
//! their members. The store is one JSON document on disk, rewritten
//! atomically on every mutation, and held in memory behind a RwLock
//! so the per-command check is cheap.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// One deny-list entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub id: String,
    /// Display name captured at add time, shown in listings
    pub name: String,
    pub added_at: DateTime<Utc>,
}

/// Per-id metadata stored in the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    name: String,
    added_at: DateTime<Utc>,
}

/// On-disk document shape.
#[derive(Debug, Default, Serialize, Deserialize)]
struct BlacklistDoc {
    #[serde(default)]
    users: BTreeMap<String, EntryMeta>,
    #[serde(default)]
    guilds: BTreeMap<String, EntryMeta>,
}

/// One page of a blacklist listing.
#[derive(Debug, Clone, Serialize)]
pub struct BlacklistPage {
    pub entries: Vec<BlacklistEntry>,
    pub total: usize,
    pub has_more: bool,
}

/// Which deny list a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistKind {
    User,
    Guild,
}

impl BlacklistKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlacklistKind::User => "user",
            BlacklistKind::Guild => "guild",
        }
    }
}

pub struct Blacklist {
    path: PathBuf,
    doc: RwLock<BlacklistDoc>,
}

impl Blacklist {
    /// Load the document from `path`, starting empty when the file
    /// does not exist yet. A corrupt file is an error, not silent data
    /// loss.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)
                .map_err(|e| Error::Config(format!("corrupt blacklist file {}: {e}", path.display())))?
        } else {
            BlacklistDoc::default()
        };
        Ok(Self {
            path,
            doc: RwLock::new(doc),
        })
    }

    /// Add an id with its display name to a deny list. Returns false
    /// when it was already present (no write happens then).
    pub async fn add(&self, kind: BlacklistKind, id: &str, name: &str) -> Result<bool> {
        let mut doc = self.doc.write().await;
        let list = match kind {
            BlacklistKind::User => &mut doc.users,
            BlacklistKind::Guild => &mut doc.guilds,
        };
        if list.contains_key(id) {
            return Ok(false);
        }
        list.insert(
            id.to_string(),
            EntryMeta {
                name: name.to_string(),
                added_at: Utc::now(),
            },
        );
        info!("Blacklisted {} {} ({})", kind.as_str(), id, name);
        Self::persist(&self.path, &doc)?;
        Ok(true)
    }

    /// Remove an id from a deny list. Returns false when it was not
    /// present.
    pub async fn remove(&self, kind: BlacklistKind, id: &str) -> Result<bool> {
        let mut doc = self.doc.write().await;
        let list = match kind {
            BlacklistKind::User => &mut doc.users,
            BlacklistKind::Guild => &mut doc.guilds,
        };
        if list.remove(id).is_none() {
            return Ok(false);
        }
        info!("Removed {} {} from blacklist", kind.as_str(), id);
        Self::persist(&self.path, &doc)?;
        Ok(true)
    }

    pub async fn is_user_blocked(&self, id: &str) -> bool {
        self.doc.read().await.users.contains_key(id)
    }

    pub async fn is_guild_blocked(&self, id: &str) -> bool {
        self.doc.read().await.guilds.contains_key(id)
    }

    /// Refuse service when either the user or the guild is denied.
    pub async fn check(&self, guild_id: &str, user_id: &str) -> Result<()> {
        let doc = self.doc.read().await;
        if doc.users.contains_key(user_id) {
            return Err(Error::Blacklisted {
                kind: "user",
                id: user_id.to_string(),
            });
        }
        if doc.guilds.contains_key(guild_id) {
            return Err(Error::Blacklisted {
                kind: "guild",
                id: guild_id.to_string(),
            });
        }
        Ok(())
    }

    /// Page through a deny list, `per_page` entries at a time
    /// (1-based page numbers).
    pub async fn page(&self, kind: BlacklistKind, page: usize, per_page: usize) -> BlacklistPage {
        let doc = self.doc.read().await;
        let list = match kind {
            BlacklistKind::User => &doc.users,
            BlacklistKind::Guild => &doc.guilds,
        };
        let total = list.len();
        let offset = page.saturating_sub(1).saturating_mul(per_page);
        let entries: Vec<BlacklistEntry> = list
            .iter()
            .skip(offset)
            .take(per_page)
            .map(|(id, meta)| BlacklistEntry {
                id: id.clone(),
                name: meta.name.clone(),
                added_at: meta.added_at,
            })
            .collect();
        let has_more = offset + entries.len() < total;
        BlacklistPage {
            entries,
            total,
            has_more,
        }
    }

    /// Write-then-rename so a crash mid-write never truncates the list.
    fn persist(path: &Path, doc: &BlacklistDoc) -> Result<()> {
        let raw = serde_json::to_string_pretty(doc)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            warn!("Failed to persist blacklist to {}: {}", path.display(), e);
            return Err(e.into());
        }
        Ok(())
    }
}
