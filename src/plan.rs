//! Versioned plan tree with structural edits.
//!
//! A plan is the externally-proposed reorganization under user review:
//! folders of files and subfolders plus an "unassigned" bucket for files the
//! proposer left alone. Nodes live in a flat id-indexed arena with ordered
//! child-id lists and parent back-references, so locating the node holding a
//! file and reparenting a subtree are cheap map operations instead of
//! full-tree rewrites.
//!
//! Plans are transient. Applying one materializes an operation record and
//! the plan is discarded; only the ledger is durable. The exchange format
//! with the proposal layer is nested JSON (folders containing files and
//! children); loading it builds the arena.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::record::FileRecord;

/// Sentinel node id addressing the unassigned bucket in [`Plan::move_file`].
pub const UNASSIGNED: Uuid = Uuid::nil();

/// One proposed folder.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub id: Uuid,
    /// Folder name, used verbatim as the on-disk directory name.
    pub name: String,
    /// Files placed directly in this folder, in display order.
    pub files: Vec<FileRecord>,
    /// Ordered child folders, by arena id.
    pub child_ids: Vec<Uuid>,
    /// Back-reference into the arena; `None` for root folders.
    pub parent_id: Option<Uuid>,
    /// Proposer's explanation for why these files belong together.
    pub rationale: Option<String>,
}

/// Where a file currently sits within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLocation {
    /// Directly inside the node with this id.
    Node(Uuid),
    /// In the unassigned bucket.
    Unassigned,
}

/// A proposed, not-yet-applied reorganization.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: Uuid,
    /// Top-level folders in display order.
    pub root_ids: Vec<Uuid>,
    nodes: HashMap<Uuid, PlanNode>,
    /// Files the proposer did not place, in display order.
    pub unassigned: Vec<FileRecord>,
    /// Optional per-file explanation for why a file was left unassigned.
    pub unassigned_reasons: HashMap<Uuid, String>,
    /// Free-form plan-level notes from the proposer.
    pub notes: Option<String>,
    /// Bumped by every structural edit.
    pub version: u64,
    pub modified_at: DateTime<Utc>,
}

impl Plan {
    /// Empty plan, version 0.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            root_ids: Vec::new(),
            nodes: HashMap::new(),
            unassigned: Vec::new(),
            unassigned_reasons: HashMap::new(),
            notes: None,
            version: 0,
            modified_at: Utc::now(),
        }
    }

    /// Plan with every scanned file still unassigned, the state a proposer
    /// starts from.
    pub fn from_records(records: Vec<FileRecord>) -> Self {
        let mut plan = Self::new();
        plan.unassigned = records;
        plan
    }

    fn touch(&mut self) {
        self.version += 1;
        self.modified_at = Utc::now();
    }

    /// Look up a node in the arena.
    pub fn node(&self, node_id: Uuid) -> Option<&PlanNode> {
        self.nodes.get(&node_id)
    }

    /// All node ids currently in the arena, in no particular order.
    pub fn node_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.nodes.keys().copied()
    }

    /// Find the file with this id and report where it sits.
    pub fn locate_file(&self, file_id: Uuid) -> Option<FileLocation> {
        if self.unassigned.iter().any(|f| f.id == file_id) {
            return Some(FileLocation::Unassigned);
        }
        self.nodes
            .values()
            .find(|node| node.files.iter().any(|f| f.id == file_id))
            .map(|node| FileLocation::Node(node.id))
    }

    /// Number of files in this node and all its descendants.
    pub fn file_count(&self, node_id: Uuid) -> usize {
        let mut count = 0;
        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(&id) {
                count += node.files.len();
                stack.extend(node.child_ids.iter().copied());
            }
        }
        count
    }

    /// Number of files assigned to any folder.
    pub fn assigned_count(&self) -> usize {
        self.nodes.values().map(|n| n.files.len()).sum()
    }

    /// Folder path of a node relative to the plan root, built from folder
    /// names along the parent chain.
    pub fn node_path(&self, node_id: Uuid) -> Result<PathBuf> {
        let mut names = Vec::new();
        let mut cursor = Some(node_id);
        while let Some(id) = cursor {
            let node = self
                .nodes
                .get(&id)
                .ok_or(EngineError::NodeNotFound(node_id))?;
            names.push(node.name.clone());
            cursor = node.parent_id;
        }
        names.reverse();
        Ok(names.iter().collect())
    }

    /// Move a file to another folder, or to the unassigned bucket via
    /// [`UNASSIGNED`]. Remove-then-insert, never copy; the uniqueness
    /// invariant holds on exit. Moving a file onto the node it already
    /// occupies changes nothing but still bumps the version.
    ///
    /// # Errors
    ///
    /// `FileNotInPlan` if the file id is absent; `NodeNotFound` if the
    /// destination is neither a live node nor the unassigned sentinel.
    pub fn move_file(&mut self, file_id: Uuid, to_node_id: Uuid) -> Result<()> {
        if to_node_id != UNASSIGNED && !self.nodes.contains_key(&to_node_id) {
            return Err(EngineError::NodeNotFound(to_node_id));
        }

        let record = self
            .take_file(file_id)
            .ok_or(EngineError::FileNotInPlan(file_id))?;

        if to_node_id == UNASSIGNED {
            self.unassigned.push(record);
        } else {
            self.unassigned_reasons.remove(&file_id);
            if let Some(node) = self.nodes.get_mut(&to_node_id) {
                node.files.push(record);
            }
        }

        self.touch();
        Ok(())
    }

    /// Remove the file from wherever it currently sits.
    fn take_file(&mut self, file_id: Uuid) -> Option<FileRecord> {
        if let Some(pos) = self.unassigned.iter().position(|f| f.id == file_id) {
            return Some(self.unassigned.remove(pos));
        }
        for node in self.nodes.values_mut() {
            if let Some(pos) = node.files.iter().position(|f| f.id == file_id) {
                return Some(node.files.remove(pos));
            }
        }
        None
    }

    /// Add an empty folder under `parent` (or at the root for `None`) and
    /// return its id.
    ///
    /// # Errors
    ///
    /// `NodeNotFound` if the parent id is not in the arena.
    pub fn add_folder(&mut self, name: &str, parent: Option<Uuid>) -> Result<Uuid> {
        if let Some(parent_id) = parent
            && !self.nodes.contains_key(&parent_id)
        {
            return Err(EngineError::NodeNotFound(parent_id));
        }

        let id = Uuid::new_v4();
        self.nodes.insert(
            id,
            PlanNode {
                id,
                name: name.to_string(),
                files: Vec::new(),
                child_ids: Vec::new(),
                parent_id: parent,
                rationale: None,
            },
        );
        match parent {
            Some(parent_id) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                    parent_node.child_ids.push(id);
                }
            }
            None => self.root_ids.push(id),
        }

        self.touch();
        Ok(id)
    }

    /// Rename a folder.
    pub fn rename_folder(&mut self, node_id: Uuid, new_name: &str) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(EngineError::NodeNotFound(node_id))?;
        node.name = new_name.to_string();
        self.touch();
        Ok(())
    }

    /// Remove a folder and its entire subtree. Every file held anywhere in
    /// the subtree returns to the unassigned bucket; the folders themselves
    /// are dropped from the arena.
    pub fn remove_folder(&mut self, node_id: Uuid) -> Result<()> {
        if !self.nodes.contains_key(&node_id) {
            return Err(EngineError::NodeNotFound(node_id));
        }
        self.detach(node_id);

        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            if let Some(mut node) = self.nodes.remove(&id) {
                self.unassigned.append(&mut node.files);
                stack.extend(node.child_ids);
            }
        }

        self.touch();
        Ok(())
    }

    /// Reparent a folder under `new_parent` (or to the root for `None`).
    /// The subtree moves intact.
    ///
    /// # Errors
    ///
    /// `NodeNotFound` for unknown ids; `CycleRejected` if the destination is
    /// the node itself or one of its descendants.
    pub fn move_node(&mut self, node_id: Uuid, new_parent: Option<Uuid>) -> Result<()> {
        if !self.nodes.contains_key(&node_id) {
            return Err(EngineError::NodeNotFound(node_id));
        }
        if let Some(parent_id) = new_parent {
            if !self.nodes.contains_key(&parent_id) {
                return Err(EngineError::NodeNotFound(parent_id));
            }
            if parent_id == node_id || self.is_descendant(parent_id, node_id) {
                return Err(EngineError::CycleRejected(node_id));
            }
        }

        self.detach(node_id);
        match new_parent {
            Some(parent_id) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                    parent_node.child_ids.push(node_id);
                }
            }
            None => self.root_ids.push(node_id),
        }
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.parent_id = new_parent;
        }

        self.touch();
        Ok(())
    }

    /// Attach or replace the proposer's rationale on a folder.
    pub fn set_rationale(&mut self, node_id: Uuid, rationale: &str) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(EngineError::NodeNotFound(node_id))?;
        node.rationale = Some(rationale.to_string());
        self.touch();
        Ok(())
    }

    /// Set the plan-level notes.
    pub fn set_note(&mut self, note: &str) {
        self.notes = Some(note.to_string());
        self.touch();
    }

    /// Annotate why a file was left unassigned.
    ///
    /// # Errors
    ///
    /// `FileNotInPlan` if the file is not currently in the unassigned bucket.
    pub fn set_unassigned_reason(&mut self, file_id: Uuid, reason: &str) -> Result<()> {
        if !self.unassigned.iter().any(|f| f.id == file_id) {
            return Err(EngineError::FileNotInPlan(file_id));
        }
        self.unassigned_reasons.insert(file_id, reason.to_string());
        self.touch();
        Ok(())
    }

    /// True if `candidate` sits somewhere underneath `ancestor`.
    fn is_descendant(&self, candidate: Uuid, ancestor: Uuid) -> bool {
        let mut cursor = self.nodes.get(&candidate).and_then(|n| n.parent_id);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.nodes.get(&id).and_then(|n| n.parent_id);
        }
        false
    }

    /// Unlink a node from its parent's child list or from the root list,
    /// leaving it (and its subtree) in the arena.
    fn detach(&mut self, node_id: Uuid) {
        let parent = self.nodes.get(&node_id).and_then(|n| n.parent_id);
        match parent {
            Some(parent_id) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                    parent_node.child_ids.retain(|id| *id != node_id);
                }
            }
            None => self.root_ids.retain(|id| *id != node_id),
        }
    }

    /// Parse the nested JSON exchange document and build the arena.
    ///
    /// # Errors
    ///
    /// `PlanFormat` on malformed JSON, duplicate node ids, or a file id
    /// appearing more than once anywhere in the document.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: PlanDoc =
            serde_json::from_str(json).map_err(|e| EngineError::PlanFormat(e.to_string()))?;

        let mut plan = Self {
            id: doc.id.unwrap_or_else(Uuid::new_v4),
            root_ids: Vec::new(),
            nodes: HashMap::new(),
            unassigned: doc.unassigned,
            unassigned_reasons: doc.unassigned_reasons,
            notes: doc.notes,
            version: doc.version,
            modified_at: doc.modified_at.unwrap_or_else(Utc::now),
        };

        let mut seen_files: HashSet<Uuid> = HashSet::new();
        for file in &plan.unassigned {
            if !seen_files.insert(file.id) {
                return Err(EngineError::PlanFormat(format!(
                    "file {} appears more than once",
                    file.id
                )));
            }
        }
        for folder in doc.folders {
            let root_id = plan.insert_folder_doc(folder, None, &mut seen_files)?;
            plan.root_ids.push(root_id);
        }

        Ok(plan)
    }

    fn insert_folder_doc(
        &mut self,
        doc: FolderDoc,
        parent: Option<Uuid>,
        seen_files: &mut HashSet<Uuid>,
    ) -> Result<Uuid> {
        let id = doc.id.unwrap_or_else(Uuid::new_v4);
        if self.nodes.contains_key(&id) {
            return Err(EngineError::PlanFormat(format!(
                "folder {id} appears more than once"
            )));
        }
        for file in &doc.files {
            if !seen_files.insert(file.id) {
                return Err(EngineError::PlanFormat(format!(
                    "file {} appears more than once",
                    file.id
                )));
            }
        }

        self.nodes.insert(
            id,
            PlanNode {
                id,
                name: doc.name,
                files: doc.files,
                child_ids: Vec::new(),
                parent_id: parent,
                rationale: doc.rationale,
            },
        );
        for child in doc.children {
            let child_id = self.insert_folder_doc(child, Some(id), seen_files)?;
            if let Some(node) = self.nodes.get_mut(&id) {
                node.child_ids.push(child_id);
            }
        }
        Ok(id)
    }

    /// Render the plan back into the nested JSON exchange document.
    pub fn to_json(&self) -> Result<String> {
        let doc = PlanDoc {
            id: Some(self.id),
            version: self.version,
            modified_at: Some(self.modified_at),
            notes: self.notes.clone(),
            folders: self
                .root_ids
                .iter()
                .map(|id| self.folder_doc(*id))
                .collect(),
            unassigned: self.unassigned.clone(),
            unassigned_reasons: self.unassigned_reasons.clone(),
        };
        serde_json::to_string_pretty(&doc).map_err(|e| EngineError::PlanFormat(e.to_string()))
    }

    fn folder_doc(&self, node_id: Uuid) -> FolderDoc {
        let Some(node) = self.nodes.get(&node_id) else {
            return FolderDoc::default();
        };
        FolderDoc {
            id: Some(node.id),
            name: node.name.clone(),
            rationale: node.rationale.clone(),
            files: node.files.clone(),
            children: node
                .child_ids
                .iter()
                .map(|id| self.folder_doc(*id))
                .collect(),
        }
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

/// Nested JSON exchange format, the shape external proposers speak.
#[derive(Debug, Serialize, Deserialize)]
struct PlanDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Uuid>,
    #[serde(default)]
    version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
    #[serde(default)]
    folders: Vec<FolderDoc>,
    #[serde(default)]
    unassigned: Vec<FileRecord>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    unassigned_reasons: HashMap<Uuid, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FolderDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Uuid>,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rationale: Option<String>,
    #[serde(default)]
    files: Vec<FileRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<FolderDoc>,
}
