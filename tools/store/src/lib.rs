/*!
Content-addressed store of directory-tree snapshots, with a linear chain of
named commits per branch.

Each commit records the full tree (relative path → blob hash) reachable from
a working directory (the "app tree") at the moment of the commit, plus a
parent pointer. `lookup` and `commit` share an implicit handshake: a
`lookup(stage_key)` miss remembers `stage_key` as the *pending* stage: the
next `commit` call snapshots the (now-modified) app tree under that key. A
hit fast-forwards the app tree to the matching commit and needs no
`commit` call.
*/

mod error;

pub use error::Error;

use fingerprint::Accumulator;
use error::{
    CreateDirectorySnafu, NoPendingStageSnafu, ReadFileSnafu, RemovePathSnafu, RenameSnafu,
    WalkTreeSnafu, WriteFileSnafu,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub type Result<T> = error::Result<T>;

/// A path added, modified, or removed by a commit relative to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl Change {
    pub fn path(&self) -> &Path {
        match self {
            Change::Added(p) | Change::Modified(p) | Change::Removed(p) => p,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    parent: Option<String>,
    body: String,
    tree: BTreeMap<String, String>,
}

/// A content-addressed store of app-tree snapshots, tracking one linear
/// commit chain (`branch`) and mirroring its head's tree into `app_dir`.
pub struct Store {
    root: PathBuf,
    branch: String,
    app_dir: PathBuf,
    head: Option<String>,
    pending_key: Option<String>,
    tree: BTreeMap<String, String>,
    last_changes: Vec<Change>,
}

impl Store {
    /// Attach to (creating if absent) the object store rooted at `dir`,
    /// following `branch`'s commit chain, snapshotting from and restoring
    /// to `app_dir`.
    pub fn open(dir: &Path, branch: &str, app_dir: &Path) -> Result<Store> {
        for sub in ["objects", "commits", "refs"] {
            let path = dir.join(sub);
            fs::create_dir_all(&path).context(CreateDirectorySnafu { path })?;
        }

        let mut store = Store {
            root: dir.to_path_buf(),
            branch: branch.to_string(),
            app_dir: app_dir.to_path_buf(),
            head: None,
            pending_key: None,
            tree: BTreeMap::new(),
            last_changes: Vec::new(),
        };

        if let Some(head) = store.read_ref()? {
            let entry = store.read_entry(&head)?;
            store.tree = entry.tree;
            store.head = Some(head);
        }

        Ok(store)
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn commits_dir(&self) -> PathBuf {
        self.root.join("commits")
    }

    fn ref_path(&self) -> PathBuf {
        self.root.join("refs").join(&self.branch)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.commits_dir().join(format!("{key}.json"))
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        let (prefix, rest) = hash.split_at(2.min(hash.len()));
        self.objects_dir().join(prefix).join(rest)
    }

    fn read_ref(&self) -> Result<Option<String>> {
        let path = self.ref_path();
        if !path.is_file() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path).context(ReadFileSnafu { path })?;
        let key = contents.trim();
        if key.is_empty() {
            Ok(None)
        } else {
            Ok(Some(key.to_string()))
        }
    }

    fn write_ref(&self, key: &str) -> Result<()> {
        atomic_write(&self.ref_path(), key.as_bytes())
    }

    fn read_entry(&self, key: &str) -> Result<CacheEntry> {
        let path = self.entry_path(key);
        let bytes = fs::read(&path).context(ReadFileSnafu { path: path.clone() })?;
        serde_json::from_slice(&bytes).map_err(|e| error::Error::CorruptCommit {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn write_entry(&self, entry: &CacheEntry) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entry).map_err(|e| error::Error::CorruptCommit {
            key: entry.key.clone(),
            reason: e.to_string(),
        })?;
        atomic_write(&self.entry_path(&entry.key), &bytes)
    }

    /// Check whether a commit keyed by `stage_key` already exists as a
    /// child of the current head. On a hit, the app tree is fast-forwarded
    /// to that commit's snapshot. On a miss, `stage_key` becomes the
    /// pending stage for the next `commit` call.
    pub fn lookup(&mut self, stage_key: &str) -> Result<bool> {
        if !self.entry_path(stage_key).is_file() {
            self.pending_key = Some(stage_key.to_string());
            return Ok(false);
        }
        let entry = self.read_entry(stage_key)?;
        if entry.parent.as_deref() != self.head.as_deref() {
            self.pending_key = Some(stage_key.to_string());
            return Ok(false);
        }

        self.materialize(&entry.tree)?;
        self.last_changes = diff(&self.tree, &entry.tree);
        self.tree = entry.tree;
        self.head = Some(stage_key.to_string());
        self.pending_key = None;
        self.write_ref(stage_key)?;
        Ok(true)
    }

    /// Snapshot the current app tree under the stage key established by
    /// the last `lookup` miss, with `body` as the commit message.
    pub fn commit(&mut self, body: &str) -> Result<String> {
        let stage_key = self.pending_key.take().context(NoPendingStageSnafu)?;

        let new_tree = self.snapshot_app_dir()?;
        let changes = diff(&self.tree, &new_tree);

        let entry = CacheEntry {
            key: stage_key.clone(),
            parent: self.head.clone(),
            body: body.to_string(),
            tree: new_tree.clone(),
        };
        self.write_entry(&entry)?;
        self.write_ref(&stage_key)?;

        self.tree = new_tree;
        self.head = Some(stage_key.clone());
        self.last_changes = changes;
        Ok(stage_key)
    }

    /// Additions and modifications from the most recent `lookup` hit or
    /// `commit`, relative to its parent.
    pub fn get_changes(&self) -> Vec<PathBuf> {
        self.last_changes
            .iter()
            .filter(|c| !matches!(c, Change::Removed(_)))
            .map(|c| c.path().to_path_buf())
            .collect()
    }

    /// Every change (including removals) from the most recent `lookup` hit
    /// or `commit`, relative to its parent.
    pub fn get_all_changes(&self) -> Vec<Change> {
        self.last_changes.clone()
    }

    /// Every path live in the current commit, in sorted order.
    pub fn get_files(&self) -> Vec<PathBuf> {
        self.tree.keys().map(PathBuf::from).collect()
    }

    /// A fresh accumulator seeded with the current head, for the
    /// orchestrator to extend with stage-specific salt.
    pub fn checksum(&self) -> Accumulator {
        let mut acc = Accumulator::new("store-v1");
        acc.string(self.head.as_deref());
        acc
    }

    fn snapshot_app_dir(&self) -> Result<BTreeMap<String, String>> {
        let mut tree = BTreeMap::new();
        if !self.app_dir.is_dir() {
            return Ok(tree);
        }
        for entry in walkdir::WalkDir::new(&self.app_dir) {
            let entry = entry.context(WalkTreeSnafu {
                path: self.app_dir.clone(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.app_dir)
                .unwrap_or(entry.path());
            let key = to_forward_slash(relative);
            let bytes = fs::read(entry.path()).context(ReadFileSnafu {
                path: entry.path().to_path_buf(),
            })?;
            let hash = hex::encode(Sha256::digest(&bytes));
            self.write_blob(&hash, &bytes)?;
            tree.insert(key, hash);
        }
        Ok(tree)
    }

    fn write_blob(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(hash);
        if path.is_file() {
            return Ok(());
        }
        atomic_write(&path, bytes)
    }

    fn materialize(&self, tree: &BTreeMap<String, String>) -> Result<()> {
        let current = self.snapshot_app_dir()?;
        for path in current.keys() {
            if !tree.contains_key(path) {
                let full = self.app_dir.join(path);
                fs::remove_file(&full).context(RemovePathSnafu { path: full })?;
            }
        }
        for (path, hash) in tree {
            if current.get(path) == Some(hash) {
                continue;
            }
            let full = self.app_dir.join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).context(CreateDirectorySnafu {
                    path: parent.to_path_buf(),
                })?;
            }
            let blob = self.blob_path(hash);
            let bytes = fs::read(&blob).context(ReadFileSnafu { path: blob })?;
            fs::write(&full, bytes).context(WriteFileSnafu { path: full })?;
        }
        remove_empty_dirs(&self.app_dir);
        Ok(())
    }
}

fn to_forward_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn diff(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> Vec<Change> {
    let mut changes = Vec::new();
    for (path, hash) in new {
        match old.get(path) {
            None => changes.push(Change::Added(PathBuf::from(path))),
            Some(old_hash) if old_hash != hash => changes.push(Change::Modified(PathBuf::from(path))),
            _ => {}
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            changes.push(Change::Removed(PathBuf::from(path)));
        }
    }
    changes.sort_by(|a, b| a.path().cmp(b.path()));
    changes
}

fn remove_empty_dirs(root: &Path) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            remove_empty_dirs(&path);
            let _ = fs::remove_dir(&path);
        }
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context(CreateDirectorySnafu {
            path: parent.to_path_buf(),
        })?;
    }
    let tmp = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    fs::write(&tmp, bytes).context(WriteFileSnafu { path: tmp.clone() })?;
    fs::rename(&tmp, path).context(RenameSnafu {
        from: tmp,
        to: path.to_path_buf(),
    })?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn store_at(store_dir: &Path, app_dir: &Path) -> Store {
        Store::open(store_dir, "main", app_dir).unwrap()
    }

    #[test]
    fn miss_then_commit_then_hit_restores_tree() {
        let root = tempdir().unwrap();
        let store_dir = root.path().join("cache");
        let app_dir = root.path().join("app");
        fs::create_dir_all(&app_dir).unwrap();
        fs::write(app_dir.join("a.txt"), b"one").unwrap();

        let mut store = store_at(&store_dir, &app_dir);
        assert!(!store.lookup("stage-a").unwrap());
        let key = store.commit("Built a").unwrap();
        assert_eq!(key, "stage-a");

        // Mutate the app tree out from under the committed snapshot.
        fs::write(app_dir.join("a.txt"), b"mutated").unwrap();
        fs::write(app_dir.join("b.txt"), b"extra").unwrap();

        let mut store2 = store_at(&store_dir, &app_dir);
        assert!(store2.lookup("stage-a").unwrap());
        assert_eq!(fs::read(app_dir.join("a.txt")).unwrap(), b"one");
        assert!(!app_dir.join("b.txt").exists());
    }

    #[test]
    fn commit_without_lookup_miss_errors() {
        let root = tempdir().unwrap();
        let mut store = store_at(&root.path().join("cache"), &root.path().join("app"));
        let err = store.commit("oops").unwrap_err();
        assert!(matches!(err, Error::NoPendingStage));
    }

    #[test]
    fn get_changes_reports_additions_and_modifications_only() {
        let root = tempdir().unwrap();
        let store_dir = root.path().join("cache");
        let app_dir = root.path().join("app");
        fs::create_dir_all(&app_dir).unwrap();
        fs::write(app_dir.join("a.txt"), b"one").unwrap();

        let mut store = store_at(&store_dir, &app_dir);
        store.lookup("stage-a").unwrap();
        store.commit("first").unwrap();

        fs::write(app_dir.join("a.txt"), b"two").unwrap();
        fs::write(app_dir.join("b.txt"), b"new").unwrap();
        store.lookup("stage-b").unwrap();
        store.commit("second").unwrap();

        let mut changed: Vec<_> = store.get_changes();
        changed.sort();
        assert_eq!(changed, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
    }

    #[test]
    fn get_all_changes_includes_removals() {
        let root = tempdir().unwrap();
        let store_dir = root.path().join("cache");
        let app_dir = root.path().join("app");
        fs::create_dir_all(&app_dir).unwrap();
        fs::write(app_dir.join("a.txt"), b"one").unwrap();
        fs::write(app_dir.join("b.txt"), b"two").unwrap();

        let mut store = store_at(&store_dir, &app_dir);
        store.lookup("stage-a").unwrap();
        store.commit("first").unwrap();

        fs::remove_file(app_dir.join("b.txt")).unwrap();
        store.lookup("stage-b").unwrap();
        store.commit("second").unwrap();

        let all = store.get_all_changes();
        assert!(all.contains(&Change::Removed(PathBuf::from("b.txt"))));
    }

    #[test]
    fn checksum_changes_with_head() {
        let root = tempdir().unwrap();
        let store_dir = root.path().join("cache");
        let app_dir = root.path().join("app");
        fs::create_dir_all(&app_dir).unwrap();

        let mut store = store_at(&store_dir, &app_dir);
        let empty_head = store.checksum().finish();

        store.lookup("stage-a").unwrap();
        store.commit("first").unwrap();
        let after_commit = store.checksum().finish();

        assert_ne!(empty_head, after_commit);
    }

    #[test]
    fn reopening_resumes_from_persisted_ref() {
        let root = tempdir().unwrap();
        let store_dir = root.path().join("cache");
        let app_dir = root.path().join("app");
        fs::create_dir_all(&app_dir).unwrap();
        fs::write(app_dir.join("a.txt"), b"one").unwrap();

        {
            let mut store = store_at(&store_dir, &app_dir);
            store.lookup("stage-a").unwrap();
            store.commit("first").unwrap();
        }

        let mut reopened = store_at(&store_dir, &app_dir);
        assert!(reopened.lookup("stage-a").unwrap());
        assert_eq!(reopened.get_files(), vec![PathBuf::from("a.txt")]);
    }
}
