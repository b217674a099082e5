//! Per-user memory entries ("rules") injected into the prompt prefix.
//!
//! Backed by a single JSON file keyed by lowercased nick. Writes go through
//! a write-to-temp + rename so readers never observe a half-written file.
//! The legacy single-rule shape `{"rules": "...", "enabled": true}` is
//! migrated to the multi-entry form the first time the file is loaded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleEntry {
    pub id: u32,
    pub content: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserRules {
    #[serde(default)]
    pub entries: Vec<RuleEntry>,
    #[serde(default = "one")]
    pub next_id: u32,
}

fn one() -> u32 {
    1
}

type RulesFile = BTreeMap<String, UserRules>;

pub struct UserRulesStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles; readers share the same lock
    /// because every operation reloads the file.
    lock: Mutex<()>,
}

impl UserRulesStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        };
        if let Some(parent) = store.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !store.path.exists() {
            store.write_file(&RulesFile::new())?;
        } else {
            store.migrate_legacy()?;
        }
        Ok(store)
    }

    /// Active (enabled) entries rendered as a bulleted list, or None when
    /// the user has nothing enabled. Consumed by the prompt assembler.
    pub fn active_rules(&self, nick: &str) -> Option<String> {
        let _guard = self.lock.lock().unwrap();
        let file = self.read_file().ok()?;
        let user = file.get(&nick.to_lowercase())?;
        let lines: Vec<String> = user
            .entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| format!("- {}", e.content))
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    pub fn list(&self, nick: &str) -> Result<Vec<RuleEntry>> {
        let _guard = self.lock.lock().unwrap();
        let file = self.read_file()?;
        Ok(file
            .get(&nick.to_lowercase())
            .map(|u| u.entries.clone())
            .unwrap_or_default())
    }

    /// Add a new entry; ids are monotone per user and never reused.
    pub fn add(&self, nick: &str, content: &str) -> Result<u32> {
        let _guard = self.lock.lock().unwrap();
        let mut file = self.read_file()?;
        let user = file.entry(nick.to_lowercase()).or_default();
        let id = user.next_id;
        user.entries.push(RuleEntry {
            id,
            content: content.to_string(),
            enabled: true,
        });
        user.next_id += 1;
        self.write_file(&file)?;
        Ok(id)
    }

    /// Replace an entry's content. Returns the old content.
    pub fn update(&self, nick: &str, id: u32, content: &str) -> Result<Option<String>> {
        self.mutate(nick, |user| {
            match user.entries.iter_mut().find(|e| e.id == id) {
                Some(entry) => {
                    let old = std::mem::replace(&mut entry.content, content.to_string());
                    Some(old)
                }
                None => None,
            }
        })
    }

    /// Remove an entry. Returns its content when it existed.
    pub fn delete(&self, nick: &str, id: u32) -> Result<Option<String>> {
        self.mutate(nick, |user| {
            let pos = user.entries.iter().position(|e| e.id == id)?;
            Some(user.entries.remove(pos).content)
        })
    }

    /// Remove every entry and reset the id counter. Returns the count removed.
    pub fn clear(&self, nick: &str) -> Result<usize> {
        self.mutate(nick, |user| {
            let count = user.entries.len();
            user.entries.clear();
            user.next_id = 1;
            count
        })
    }

    /// Toggle one entry, or all entries when `id` is None. Returns how many
    /// entries changed state (0 means the id was unknown).
    pub fn set_enabled(&self, nick: &str, id: Option<u32>, enabled: bool) -> Result<usize> {
        self.mutate(nick, |user| match id {
            Some(id) => match user.entries.iter_mut().find(|e| e.id == id) {
                Some(entry) => {
                    entry.enabled = enabled;
                    1
                }
                None => 0,
            },
            None => {
                for entry in &mut user.entries {
                    entry.enabled = enabled;
                }
                user.entries.len()
            }
        })
    }

    /// First entry whose content contains `term` (case-insensitive).
    pub fn find_by_content(&self, nick: &str, term: &str) -> Result<Option<RuleEntry>> {
        let entries = self.list(nick)?;
        let term = term.to_lowercase();
        Ok(entries
            .into_iter()
            .find(|e| e.content.to_lowercase().contains(&term)))
    }

    fn mutate<T>(&self, nick: &str, f: impl FnOnce(&mut UserRules) -> T) -> Result<T> {
        let _guard = self.lock.lock().unwrap();
        let mut file = self.read_file()?;
        let user = file.entry(nick.to_lowercase()).or_default();
        let out = f(user);
        self.write_file(&file)?;
        Ok(out)
    }

    fn read_file(&self) -> Result<RulesFile> {
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(RulesFile::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_file(&self, file: &RulesFile) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(file)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// One-time shape migration: `{"rules": "...", "enabled": bool}` per
    /// user becomes a single multi-entry record.
    fn migrate_legacy(&self) -> Result<()> {
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(());
        }
        let parsed: BTreeMap<String, Value> = serde_json::from_str(&raw)?;
        let needs_migration = parsed
            .values()
            .any(|v| v.get("rules").is_some() && v.get("entries").is_none());
        if !needs_migration {
            return Ok(());
        }

        let mut migrated = RulesFile::new();
        for (nick, value) in parsed {
            let is_legacy = value.get("rules").is_some() && value.get("entries").is_none();
            if is_legacy {
                let content = value
                    .get("rules")
                    .and_then(|r| r.as_str())
                    .unwrap_or("")
                    .to_string();
                let enabled = value.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true);
                let user = if content.is_empty() {
                    UserRules::default()
                } else {
                    UserRules {
                        entries: vec![RuleEntry {
                            id: 1,
                            content,
                            enabled,
                        }],
                        next_id: 2,
                    }
                };
                migrated.insert(nick, user);
            } else if let Ok(user) = serde_json::from_value::<UserRules>(value) {
                migrated.insert(nick, user);
            }
        }
        info!(users = migrated.len(), "migrated legacy user-rules file");
        self.write_file(&migrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, UserRulesStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = UserRulesStore::new(dir.path().join("rules.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn ids_are_monotone_and_never_reused() {
        let (_dir, store) = store();
        let a = store.add("Alice", "likes cats").unwrap();
        let b = store.add("alice", "prefers metric").unwrap();
        assert_eq!((a, b), (1, 2));

        store.delete("alice", 2).unwrap();
        let c = store.add("ALICE", "new fact").unwrap();
        assert_eq!(c, 3);
    }

    #[test]
    fn disabled_entries_are_kept_but_not_rendered() {
        let (_dir, store) = store();
        store.add("bob", "rule one").unwrap();
        store.add("bob", "rule two").unwrap();
        store.set_enabled("bob", Some(1), false).unwrap();

        let active = store.active_rules("bob").unwrap();
        assert!(!active.contains("rule one"));
        assert!(active.contains("- rule two"));
        assert_eq!(store.list("bob").unwrap().len(), 2);
    }

    #[test]
    fn clear_resets_counter() {
        let (_dir, store) = store();
        store.add("bob", "one").unwrap();
        store.add("bob", "two").unwrap();
        assert_eq!(store.clear("bob").unwrap(), 2);
        assert_eq!(store.add("bob", "fresh").unwrap(), 1);
    }

    #[test]
    fn legacy_single_rule_shape_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{"carol": {"rules": "speak like a pirate", "enabled": true}}"#,
        )
        .unwrap();

        let store = UserRulesStore::new(&path).unwrap();
        let entries = store.list("carol").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "speak like a pirate");
        assert_eq!(store.add("carol", "next").unwrap(), 2);
    }

    #[test]
    fn search_is_case_insensitive_partial() {
        let (_dir, store) = store();
        store.add("dave", "Loves Rust programming").unwrap();
        let found = store.find_by_content("dave", "rust").unwrap();
        assert_eq!(found.unwrap().id, 1);
    }
}
