/*!
# Datavisor

Back end of a browser-based data-upload workspace. Users log in, upload CSV
and Excel files or pull them from a linked cloud drive, and organize them in a
folder tree.

## Architecture

### Hierarchical item store
- **item**: folder and file nodes, their JSON shape and the example tree
- **store**: the per-user tree with navigation, folder creation, upload
  insertion and deletion; every mutation rebuilds only the path from the root
  to the edited folder and is written through to storage
- **storage**: the key-value blob each user's state lives in (gzip-compressed
  JSON on disk, or memory)
- **upload**: descriptors of uploaded files and their size/date formatting

### Accounts
- **login**: Argon2-hashed user registry, sessions, drive account linkage
- **catalog**: metadata rows of imported files

### Web layer (`web` feature)
- **drive**: proxy to the cloud drive API (list spreadsheets, download one)
- **app**: axum routes and shared state

## Persisted keys

| Key | Value |
|---|---|
| `isAuthenticated` | `"true"` or absent |
| `user` | `{id?, email, name}` |
| `folders` | array of items |
| `googleConnected` | `"true"` or absent |
*/

pub mod app;
pub mod catalog;
pub mod config;
pub mod drive;
pub mod error;
pub mod item;
pub mod login;
pub mod storage;
pub mod store;
pub mod upload;

pub use error::{Error, Result};
pub use item::{FileEntry, Folder, Item, ItemId, Items};
pub use storage::{FileStorage, KeyValueStore, MemoryStorage};
pub use store::ItemStore;
pub use upload::UploadedFile;
