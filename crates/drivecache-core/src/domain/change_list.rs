//! Transient loader inputs: change lists and directory fetch descriptors

use super::newtypes::ResourceId;
use super::resource_entry::ResourceEntry;

/// One change reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceChange {
    /// The entry was created or modified
    Updated(ResourceEntry),
    /// The entry was deleted (or trashed)
    Deleted(ResourceId),
}

impl ResourceChange {
    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Self::Updated(entry) => &entry.resource_id,
            Self::Deleted(id) => id,
        }
    }
}

/// Ordered changes plus the change log position they bring the tree to
///
/// A full listing is represented the same way, with every entry `Updated`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeList {
    pub changes: Vec<ResourceChange>,
    pub largest_changestamp: i64,
}

impl ChangeList {
    pub fn new(changes: Vec<ResourceChange>, largest_changestamp: i64) -> Self {
        Self {
            changes,
            largest_changestamp,
        }
    }

    /// Entries that were created or modified, in list order
    pub fn updated_entries(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.changes.iter().filter_map(|c| match c {
            ResourceChange::Updated(entry) => Some(entry),
            ResourceChange::Deleted(_) => None,
        })
    }
}

/// Names a directory to fast-fetch and the changestamp it is known at
///
/// The empty descriptor (no resource id) stands for "the whole tree".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DirectoryFetchInfo {
    resource_id: Option<ResourceId>,
    changestamp: i64,
}

impl DirectoryFetchInfo {
    pub fn new(resource_id: ResourceId, changestamp: i64) -> Self {
        Self {
            resource_id: Some(resource_id),
            changestamp,
        }
    }

    /// The whole-tree descriptor
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resource_id.is_none()
    }

    pub fn resource_id(&self) -> Option<&ResourceId> {
        self.resource_id.as_ref()
    }

    pub fn changestamp(&self) -> i64 {
        self.changestamp
    }

    /// Key under which concurrent loads of this scope are coalesced
    pub fn key(&self) -> String {
        self.resource_id
            .as_ref()
            .map(|id| id.as_str().to_string())
            .unwrap_or_default()
    }
}
