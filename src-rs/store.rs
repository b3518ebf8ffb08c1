//! Persistence contract for anchor records and thumbnail blobs, plus an
//! in-memory and a directory-backed implementation.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::anchor::{Anchor, AnchorDraft, AnchorPatch};
use crate::error::StoreError;
use crate::kind::AnchorKind;
use crate::naming::slugify_route;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub route: Option<String>,
    pub query: Option<String>,
    pub kind: Option<AnchorKind>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub anchors: Vec<Anchor>,
    pub has_more: bool,
}

pub trait AnchorStore {
    /// Fails with [`StoreError::Duplicate`] when `(route, anchorId)` exists.
    fn create(&mut self, draft: AnchorDraft) -> Result<Anchor, StoreError>;
    fn update(&mut self, id: &str, patch: &AnchorPatch) -> Result<Anchor, StoreError>;
    fn get_by_id(&self, id: &str) -> Result<Option<Anchor>, StoreError>;
    fn get_by_anchor_id(&self, anchor_id: &str) -> Result<Option<Anchor>, StoreError>;
    fn get_by_route(&self, route: &str) -> Result<Vec<Anchor>, StoreError>;
    fn get_all(&self) -> Result<Vec<Anchor>, StoreError>;
    /// Removes the record and its thumbnail blob.
    fn delete(&mut self, id: &str) -> Result<bool, StoreError>;
    fn search(&self, query: &SearchQuery) -> Result<SearchPage, StoreError>;
    /// Writes to a path derived from `(route, anchor_id)`; re-uploads overwrite.
    fn upload_thumbnail(
        &mut self,
        anchor_id: &str,
        png: &[u8],
        route: &str,
    ) -> Result<String, StoreError>;
    fn delete_thumbnail(&mut self, url: &str) -> Result<bool, StoreError>;
}

pub fn thumbnail_key(route: &str, anchor_id: &str) -> String {
    let file: String = anchor_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("thumbnails/{}/{file}.png", slugify_route(route))
}

fn new_record_id() -> String {
    let ts = Utc::now().format("%Y%m%d%H%M%S");
    let rand = rand::thread_rng().gen_range(100_000..999_999);
    format!("anc-{ts}-{rand}")
}

fn search_records(records: &[Anchor], query: &SearchQuery) -> SearchPage {
    let needle = query
        .query
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());
    let matching: Vec<&Anchor> = records
        .iter()
        .filter(|a| query.route.as_deref().map_or(true, |r| a.route == r))
        .filter(|a| query.kind.map_or(true, |k| a.kind == k))
        .filter(|a| {
            needle.as_deref().map_or(true, |n| {
                a.friendly_name.to_lowercase().contains(n)
                    || a.anchor_id.to_lowercase().contains(n)
                    || a.selector.to_lowercase().contains(n)
            })
        })
        .collect();
    let limit = if query.limit == 0 { 50 } else { query.limit };
    let anchors: Vec<Anchor> = matching
        .iter()
        .skip(query.offset)
        .take(limit)
        .map(|a| (*a).clone())
        .collect();
    let has_more = matching.len() > query.offset + anchors.len();
    SearchPage { anchors, has_more }
}

/// Records and blobs held in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Vec<Anchor>,
    blobs: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob(&self, url: &str) -> Option<&[u8]> {
        self.blobs
            .get(url.strip_prefix("mem://").unwrap_or(url))
            .map(Vec::as_slice)
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Inserts a record verbatim, bypassing the uniqueness check. Used to
    /// seed stores that already contain duplicates.
    pub fn insert_raw(&mut self, anchor: Anchor) {
        self.records.push(anchor);
    }
}

impl AnchorStore for MemoryStore {
    fn create(&mut self, draft: AnchorDraft) -> Result<Anchor, StoreError> {
        if self
            .records
            .iter()
            .any(|a| a.route == draft.route && a.anchor_id == draft.anchor_id)
        {
            return Err(StoreError::Duplicate {
                route: draft.route,
                anchor_id: draft.anchor_id,
            });
        }
        let anchor = Anchor::from_draft(new_record_id(), draft);
        self.records.push(anchor.clone());
        Ok(anchor)
    }

    fn update(&mut self, id: &str, patch: &AnchorPatch) -> Result<Anchor, StoreError> {
        let record = self
            .records
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::UnknownId(id.to_string()))?;
        record.apply(patch);
        Ok(record.clone())
    }

    fn get_by_id(&self, id: &str) -> Result<Option<Anchor>, StoreError> {
        Ok(self.records.iter().find(|a| a.id == id).cloned())
    }

    fn get_by_anchor_id(&self, anchor_id: &str) -> Result<Option<Anchor>, StoreError> {
        Ok(self
            .records
            .iter()
            .find(|a| a.anchor_id == anchor_id)
            .cloned())
    }

    fn get_by_route(&self, route: &str) -> Result<Vec<Anchor>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|a| a.route == route)
            .cloned()
            .collect())
    }

    fn get_all(&self) -> Result<Vec<Anchor>, StoreError> {
        Ok(self.records.clone())
    }

    fn delete(&mut self, id: &str) -> Result<bool, StoreError> {
        let Some(pos) = self.records.iter().position(|a| a.id == id) else {
            return Ok(false);
        };
        let removed = self.records.remove(pos);
        if let Some(url) = removed.thumb_url.as_deref() {
            self.delete_thumbnail(url)?;
        }
        Ok(true)
    }

    fn search(&self, query: &SearchQuery) -> Result<SearchPage, StoreError> {
        Ok(search_records(&self.records, query))
    }

    fn upload_thumbnail(
        &mut self,
        anchor_id: &str,
        png: &[u8],
        route: &str,
    ) -> Result<String, StoreError> {
        let key = thumbnail_key(route, anchor_id);
        self.blobs.insert(key.clone(), png.to_vec());
        Ok(format!("mem://{key}"))
    }

    fn delete_thumbnail(&mut self, url: &str) -> Result<bool, StoreError> {
        let key = url.strip_prefix("mem://").unwrap_or(url);
        Ok(self.blobs.remove(key).is_some())
    }
}

/// Directory layout: `anchors.json` plus `thumbnails/<route>/<anchorId>.png`.
/// Every mutation rewrites `anchors.json`.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    records: Vec<Anchor>,
}

impl FileStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let index = root.join("anchors.json");
        let records = if index.exists() {
            let raw = fs::read_to_string(&index)?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            Vec::new()
        };
        debug!(root = %root.display(), records = records.len(), "opened anchor store");
        Ok(Self { root, records })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn flush(&self) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(&self.records)?;
        let tmp = self.root.join("anchors.json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, self.root.join("anchors.json"))?;
        Ok(())
    }

    fn blob_path(&self, url: &str) -> Option<PathBuf> {
        let relative = url.strip_prefix("file://").unwrap_or(url);
        let relative = relative
            .strip_prefix(self.root.to_string_lossy().as_ref())
            .map(|r| r.trim_start_matches('/'))
            .unwrap_or(relative);
        if !relative.starts_with("thumbnails/") || relative.contains("..") {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl AnchorStore for FileStore {
    fn create(&mut self, draft: AnchorDraft) -> Result<Anchor, StoreError> {
        if self
            .records
            .iter()
            .any(|a| a.route == draft.route && a.anchor_id == draft.anchor_id)
        {
            return Err(StoreError::Duplicate {
                route: draft.route,
                anchor_id: draft.anchor_id,
            });
        }
        let anchor = Anchor::from_draft(new_record_id(), draft);
        self.records.push(anchor.clone());
        self.flush()?;
        Ok(anchor)
    }

    fn update(&mut self, id: &str, patch: &AnchorPatch) -> Result<Anchor, StoreError> {
        let record = self
            .records
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::UnknownId(id.to_string()))?;
        record.apply(patch);
        let updated = record.clone();
        self.flush()?;
        Ok(updated)
    }

    fn get_by_id(&self, id: &str) -> Result<Option<Anchor>, StoreError> {
        Ok(self.records.iter().find(|a| a.id == id).cloned())
    }

    fn get_by_anchor_id(&self, anchor_id: &str) -> Result<Option<Anchor>, StoreError> {
        Ok(self
            .records
            .iter()
            .find(|a| a.anchor_id == anchor_id)
            .cloned())
    }

    fn get_by_route(&self, route: &str) -> Result<Vec<Anchor>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|a| a.route == route)
            .cloned()
            .collect())
    }

    fn get_all(&self) -> Result<Vec<Anchor>, StoreError> {
        Ok(self.records.clone())
    }

    fn delete(&mut self, id: &str) -> Result<bool, StoreError> {
        let Some(pos) = self.records.iter().position(|a| a.id == id) else {
            return Ok(false);
        };
        let removed = self.records.remove(pos);
        self.flush()?;
        if let Some(url) = removed.thumb_url.as_deref() {
            self.delete_thumbnail(url)?;
        }
        Ok(true)
    }

    fn search(&self, query: &SearchQuery) -> Result<SearchPage, StoreError> {
        Ok(search_records(&self.records, query))
    }

    fn upload_thumbnail(
        &mut self,
        anchor_id: &str,
        png: &[u8],
        route: &str,
    ) -> Result<String, StoreError> {
        let key = thumbnail_key(route, anchor_id);
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, png)?;
        Ok(key)
    }

    fn delete_thumbnail(&mut self, url: &str) -> Result<bool, StoreError> {
        let Some(path) = self.blob_path(url) else {
            return Ok(false);
        };
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn draft(route: &str, anchor_id: &str, kind: AnchorKind) -> AnchorDraft {
        AnchorDraft {
            route: route.to_string(),
            anchor_id: anchor_id.to_string(),
            friendly_name: anchor_id.rsplit('.').next().unwrap_or_default().to_string(),
            kind,
            selector: format!("#{anchor_id}"),
            width: 100,
            height: 40,
            thumb_url: None,
            last_verified_at: None,
            tags: BTreeSet::new(),
            updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn exercise(store: &mut dyn AnchorStore) {
        let a = store
            .create(draft("/transactions", "transactions.nav.add-button", AnchorKind::Button))
            .unwrap();
        store
            .create(draft("/transactions", "transactions.content.table-table", AnchorKind::Table))
            .unwrap();
        store
            .create(draft("/reports", "reports.content.export-button", AnchorKind::Button))
            .unwrap();

        let dup = store.create(draft("/transactions", "transactions.nav.add-button", AnchorKind::Button));
        assert!(matches!(dup, Err(StoreError::Duplicate { .. })));

        assert_eq!(store.get_by_route("/transactions").unwrap().len(), 2);
        assert_eq!(store.get_all().unwrap().len(), 3);
        assert_eq!(
            store.get_by_anchor_id("reports.content.export-button").unwrap().unwrap().route,
            "/reports"
        );

        let url = store
            .upload_thumbnail("transactions.nav.add-button", b"png-bytes", "/transactions")
            .unwrap();
        assert!(url.contains("thumbnails/transactions/transactions.nav.add-button.png"));
        let again = store
            .upload_thumbnail("transactions.nav.add-button", b"png-bytes-2", "/transactions")
            .unwrap();
        assert_eq!(url, again);

        let updated = store
            .update(
                &a.id,
                &AnchorPatch {
                    thumb_url: Some(Some(url.clone())),
                    friendly_name: Some("Add".to_string()),
                    ..AnchorPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.friendly_name, "Add");
        assert!(matches!(
            store.update("missing", &AnchorPatch::default()),
            Err(StoreError::UnknownId(_))
        ));

        let page = store
            .search(&SearchQuery {
                kind: Some(AnchorKind::Button),
                limit: 1,
                ..SearchQuery::default()
            })
            .unwrap();
        assert_eq!(page.anchors.len(), 1);
        assert!(page.has_more);

        let page = store
            .search(&SearchQuery {
                route: Some("/transactions".to_string()),
                query: Some("TABLE".to_string()),
                limit: 10,
                ..SearchQuery::default()
            })
            .unwrap();
        assert_eq!(page.anchors.len(), 1);
        assert!(!page.has_more);

        assert!(store.delete(&a.id).unwrap());
        assert!(!store.delete(&a.id).unwrap());
        assert!(!store.delete_thumbnail(&url).unwrap(), "blob removed with record");
    }

    #[test]
    fn memory_store_contract() {
        let mut store = MemoryStore::new();
        exercise(&mut store);
        assert_eq!(store.blob_count(), 0);
    }

    #[test]
    fn file_store_contract_and_reload() {
        let dir = tempdir().unwrap();
        {
            let mut store = FileStore::open(dir.path()).unwrap();
            exercise(&mut store);
        }
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get_all().unwrap().len(), 2);
        assert!(!dir
            .path()
            .join("thumbnails/transactions/transactions.nav.add-button.png")
            .exists());
    }

    #[test]
    fn file_store_ignores_foreign_paths() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        assert!(!store.delete_thumbnail("../etc/passwd").unwrap());
        assert!(!store.delete_thumbnail("thumbnails/../../x.png").unwrap());
    }

    #[test]
    fn thumbnail_key_is_deterministic() {
        assert_eq!(
            thumbnail_key("/", "home.content.save button"),
            "thumbnails/home/home.content.save_button.png"
        );
    }
}
