use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Children of a folder, or the top level of the tree.
///
/// Nodes are shared between snapshots, so a list taken before a mutation keeps
/// pointing at the old nodes after it.
pub type Items = Vec<Arc<Item>>;

/// Identity of a folder or file, unique across the whole tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Fresh random identity (UUID v4)
    pub fn generate() -> Self {
        ItemId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        ItemId(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        ItemId(id)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node of the folder tree
///
/// Serialized with a `type` tag so the persisted blob reads
/// `{"id": .., "name": .., "type": "folder", "items": [..]}` or
/// `{"id": .., "name": .., "type": "file", "size": .., "lastModified": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Item {
    Folder(Folder),
    File(FileEntry),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub items: Items,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub id: ItemId,
    pub name: String,
    /// Human readable size, e.g. `"1.40 MB"`
    pub size: String,
    /// Calendar date, `YYYY-MM-DD`
    pub last_modified: String,
}

impl Folder {
    /// Empty folder with a freshly generated id
    pub fn new(name: impl Into<String>) -> Self {
        Folder {
            id: ItemId::generate(),
            name: name.into(),
            items: Vec::new(),
        }
    }

    /// Same identity and name, different children
    pub fn with_items(&self, items: Items) -> Self {
        Folder {
            id: self.id.clone(),
            name: self.name.clone(),
            items,
        }
    }
}

impl Item {
    pub fn id(&self) -> &ItemId {
        match self {
            Item::Folder(folder) => &folder.id,
            Item::File(file) => &file.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Item::Folder(folder) => &folder.name,
            Item::File(file) => &file.name,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Item::Folder(_))
    }

    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Item::Folder(folder) => Some(folder),
            Item::File(_) => None,
        }
    }

    /// Children of a folder; `None` for files
    pub fn children(&self) -> Option<&[Arc<Item>]> {
        self.as_folder().map(|folder| folder.items.as_slice())
    }
}

fn seed_file(id: &str, name: &str, size: &str, last_modified: &str) -> Arc<Item> {
    Arc::new(Item::File(FileEntry {
        id: id.into(),
        name: name.to_string(),
        size: size.to_string(),
        last_modified: last_modified.to_string(),
    }))
}

/// The two example folders a brand new workspace starts with
pub fn seed_tree() -> Items {
    vec![
        Arc::new(Item::Folder(Folder {
            id: "1".into(),
            name: "Sales Data".to_string(),
            items: vec![
                seed_file("101", "Q1_Sales.csv", "1.2 MB", "2023-03-15"),
                seed_file("102", "Q2_Sales.csv", "1.4 MB", "2023-06-30"),
            ],
        })),
        Arc::new(Item::Folder(Folder {
            id: "2".into(),
            name: "Marketing".to_string(),
            items: vec![seed_file(
                "201",
                "Campaign_Results.xlsx",
                "2.3 MB",
                "2023-05-22",
            )],
        })),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_json_uses_type_tag() {
        let json = serde_json::to_value(seed_tree()).unwrap();

        assert_eq!(json[0]["type"], "folder");
        assert_eq!(json[0]["name"], "Sales Data");
        assert_eq!(json[0]["items"][0]["type"], "file");
        assert_eq!(json[0]["items"][0]["lastModified"], "2023-03-15");
        assert_eq!(json[1]["items"][0]["size"], "2.3 MB");
    }

    #[test]
    fn parses_blob_written_by_browser_client() {
        let blob = r#"[{"id":"9","name":"Inbox","type":"folder","items":[
            {"id":"9a","name":"a.csv","type":"file","size":"0.01 MB","lastModified":"2024-01-02"}]}]"#;
        let items: Items = serde_json::from_str(blob).unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name(), "Inbox");
        let children = items[0].children().unwrap();
        assert_eq!(children[0].id().as_str(), "9a");
        assert!(!children[0].is_folder());
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(ItemId::generate(), ItemId::generate());
    }
}
