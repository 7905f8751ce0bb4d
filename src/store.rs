//! Hierarchical item store
//!
//! Keeps the folder tree of one user in memory, mirrors it to the `folders`
//! key of a [`KeyValueStore`] after every mutation and tracks where the user
//! currently is in the tree.
//!
//! Mutations never touch a node in place. The path from the root to the
//! edited folder is rebuilt with fresh nodes while every subtree off that path
//! is shared with the previous tree, so a [`ItemStore::snapshot`] taken earlier
//! still shows the old state.

use chrono::Local;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::item::{Folder, Item, ItemId, Items, seed_tree};
use crate::storage::{KeyValueStore, keys};
use crate::upload::{UploadedFile, upload_folder_name};

/// A step of the breadcrumb trail
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Crumb {
    pub id: ItemId,
    pub name: String,
}

pub struct ItemStore {
    storage: Arc<dyn KeyValueStore>,
    root: Items,
    /// Folder ids from the root down to the open folder, root itself excluded
    breadcrumbs: Vec<ItemId>,
}

impl ItemStore {
    /// Load the tree from storage, seeding the example folders when there is
    /// none or when the stored blob cannot be parsed.
    pub fn open(storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let stored = match storage.get(keys::FOLDERS)? {
            Some(blob) => match serde_json::from_str::<Items>(&blob) {
                Ok(root) => Some(root),
                Err(e) => {
                    warn!("Stored folder tree is malformed, reseeding: {}", e);
                    None
                }
            },
            None => None,
        };

        let mut store = ItemStore {
            storage,
            root: Vec::new(),
            breadcrumbs: Vec::new(),
        };

        match stored {
            Some(root) => store.root = root,
            None => {
                let seeded = seed_tree();
                store.persist(&seeded)?;
                store.root = seeded;
                info!("Seeded folder tree with example folders");
            }
        }

        Ok(store)
    }

    /// Items of the open folder, or the top level when no folder is open
    pub fn list_visible(&self) -> &[Arc<Item>] {
        let mut level: &[Arc<Item>] = &self.root;
        for id in &self.breadcrumbs {
            match find_child_folder(level, id) {
                Some(folder) => level = &folder.items,
                None => break,
            }
        }
        level
    }

    pub fn current_folder_id(&self) -> Option<&ItemId> {
        self.breadcrumbs.last()
    }

    pub fn breadcrumb_ids(&self) -> &[ItemId] {
        &self.breadcrumbs
    }

    /// Breadcrumb trail with display names
    pub fn breadcrumbs(&self) -> Vec<Crumb> {
        let mut crumbs = Vec::with_capacity(self.breadcrumbs.len());
        let mut level: &[Arc<Item>] = &self.root;
        for id in &self.breadcrumbs {
            let Some(folder) = find_child_folder(level, id) else {
                break;
            };
            crumbs.push(Crumb {
                id: folder.id.clone(),
                name: folder.name.clone(),
            });
            level = &folder.items;
        }
        crumbs
    }

    /// The whole tree as it is now; later mutations do not affect it
    pub fn snapshot(&self) -> Items {
        self.root.clone()
    }

    pub fn navigate_into(&mut self, folder_id: &ItemId) -> Result<()> {
        let item = self
            .list_visible()
            .iter()
            .find(|item| item.id() == folder_id)
            .ok_or_else(|| Error::NotVisible(folder_id.clone()))?;

        if !item.is_folder() {
            return Err(Error::NotAFolder(folder_id.clone()));
        }

        self.breadcrumbs.push(folder_id.clone());
        Ok(())
    }

    /// Leave the open folder. Does nothing at the root.
    pub fn navigate_up(&mut self) {
        self.breadcrumbs.pop();
    }

    /// Jump back to the breadcrumb at `index`.
    ///
    /// # Panics
    /// If `index` is not a position of the current breadcrumb trail.
    pub fn navigate_to_breadcrumb(&mut self, index: usize) {
        assert!(
            index < self.breadcrumbs.len(),
            "breadcrumb index {} out of range for a trail of {}",
            index,
            self.breadcrumbs.len()
        );
        self.breadcrumbs.truncate(index + 1);
    }

    pub fn navigate_to_root(&mut self) {
        self.breadcrumbs.clear();
    }

    /// Create an empty folder inside the open folder (or at the top level).
    ///
    /// Blank names are ignored and yield `Ok(None)`.
    pub fn create_folder(&mut self, name: &str) -> Result<Option<ItemId>> {
        let parent = self.current_folder_id().cloned();
        self.create_folder_in(name, parent.as_ref())
    }

    /// Create an empty folder under `parent`, searched for through the whole
    /// tree, or at the top level when `parent` is `None`.
    pub fn create_folder_in(
        &mut self,
        name: &str,
        parent: Option<&ItemId>,
    ) -> Result<Option<ItemId>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }

        let folder = Folder::new(name);
        let id = folder.id.clone();
        let added = vec![Arc::new(Item::Folder(folder))];

        let root = self.edit(parent, &|children| Ok(appended(children, &added)))?;
        self.commit(root)?;

        debug!("Created folder {} ({})", name, id);
        Ok(Some(id))
    }

    /// Add uploaded files to the open folder.
    ///
    /// At the top level the files are wrapped in a new `Uploads <date>`
    /// folder instead. Returns the ids of the new file items.
    pub fn insert_files(&mut self, files: &[UploadedFile]) -> Result<Vec<ItemId>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let entries: Items = files
            .iter()
            .map(|file| Arc::new(Item::File(file.to_entry())))
            .collect();
        let ids = entries.iter().map(|item| item.id().clone()).collect();

        let root = match self.current_folder_id().cloned() {
            Some(parent) => self.edit(Some(&parent), &|children| {
                Ok(appended(children, &entries))
            })?,
            None => {
                let mut wrapper = Folder::new(upload_folder_name(Local::now().date_naive()));
                wrapper.items = entries;
                let added = vec![Arc::new(Item::Folder(wrapper))];
                appended(&self.root, &added)
            }
        };
        self.commit(root)?;

        info!("Inserted {} uploaded file(s)", files.len());
        Ok(ids)
    }

    /// Remove an item of the current view together with everything beneath it
    pub fn delete_item(&mut self, item_id: &ItemId) -> Result<()> {
        let parent = self.current_folder_id().cloned();
        let root = self.edit(parent.as_ref(), &|children| {
            let index = children
                .iter()
                .position(|item| item.id() == item_id)
                .ok_or_else(|| Error::NotVisible(item_id.clone()))?;
            let mut remaining = children.to_vec();
            remaining.remove(index);
            Ok(remaining)
        })?;
        self.commit(root)?;

        debug!("Deleted item {}", item_id);
        Ok(())
    }

    /// New root with `edit` applied to the children of `parent`
    fn edit(
        &self,
        parent: Option<&ItemId>,
        edit: &dyn Fn(&[Arc<Item>]) -> Result<Items>,
    ) -> Result<Items> {
        match parent {
            None => edit(self.root.as_slice()),
            Some(id) => {
                rebuild(&self.root, id, edit)?.ok_or_else(|| Error::FolderNotFound(id.clone()))
            }
        }
    }

    /// Persist `root`, then make it the live tree
    fn commit(&mut self, root: Items) -> Result<()> {
        self.persist(&root)?;
        self.root = root;
        self.repair_navigation();
        Ok(())
    }

    fn persist(&self, root: &Items) -> Result<()> {
        let blob = serde_json::to_string(root)?;
        self.storage.set(keys::FOLDERS, &blob)
    }

    /// Cut the breadcrumb trail back to its deepest folder that still exists
    fn repair_navigation(&mut self) {
        let mut level: &[Arc<Item>] = &self.root;
        let mut valid = 0;
        for id in &self.breadcrumbs {
            match find_child_folder(level, id) {
                Some(folder) => {
                    level = &folder.items;
                    valid += 1;
                }
                None => break,
            }
        }

        if valid < self.breadcrumbs.len() {
            warn!(
                "Open folder {} no longer exists, moving up {} level(s)",
                self.breadcrumbs[valid],
                self.breadcrumbs.len() - valid
            );
            self.breadcrumbs.truncate(valid);
        }
    }
}

fn find_child_folder<'a>(items: &'a [Arc<Item>], id: &ItemId) -> Option<&'a Folder> {
    items
        .iter()
        .filter_map(|item| item.as_folder())
        .find(|folder| &folder.id == id)
}

fn appended(children: &[Arc<Item>], added: &[Arc<Item>]) -> Items {
    let mut items = Vec::with_capacity(children.len() + added.len());
    items.extend_from_slice(children);
    items.extend_from_slice(added);
    items
}

/// Depth-first search for the folder `target` beneath `items`.
///
/// On a hit the folder's children are replaced by `edit` and every folder on
/// the way down is rebuilt around the new child. Untouched siblings are
/// shared, not copied. Returns `None` when no folder matches; the first match
/// wins when ids repeat.
fn rebuild(
    items: &[Arc<Item>],
    target: &ItemId,
    edit: &dyn Fn(&[Arc<Item>]) -> Result<Items>,
) -> Result<Option<Items>> {
    for (index, item) in items.iter().enumerate() {
        let Item::Folder(folder) = item.as_ref() else {
            continue;
        };

        let children = if &folder.id == target {
            edit(folder.items.as_slice())?
        } else {
            match rebuild(&folder.items, target, edit)? {
                Some(children) => children,
                None => continue,
            }
        };

        let mut rebuilt = items.to_vec();
        rebuilt[index] = Arc::new(Item::Folder(folder.with_items(children)));
        return Ok(Some(rebuilt));
    }

    Ok(None)
}
