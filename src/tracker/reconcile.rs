//! Hint reconciliation inside one mutation transaction.
//!
//! A `Reconciler` diffs a hint against the persisted tree, stages the
//! structural edits in the transaction and buffers the resulting events. The
//! caller publishes the events only once the transaction has committed.

use super::events::FileChangeEvent;
use crate::error::StorageError;
use crate::hint::Hint;
use crate::store::persistence::Transaction;
use crate::store::{NodeId, NodeRecord};
use crate::tree::{FileRecord, Url};
use std::collections::BTreeMap;
use tracing::{trace, warn};

pub(crate) struct Reconciler<'t, 'a> {
    tx: &'t mut Transaction<'a>,
    events: Vec<FileChangeEvent>,
}

impl<'t, 'a> Reconciler<'t, 'a> {
    pub(crate) fn new(tx: &'t mut Transaction<'a>) -> Self {
        Self {
            tx,
            events: Vec::new(),
        }
    }

    pub(crate) fn into_events(self) -> Vec<FileChangeEvent> {
        self.events
    }

    pub(crate) fn apply(&mut self, hint: &Hint) -> Result<(), StorageError> {
        match hint {
            Hint::File { url, record: None } | Hint::Deleted { url } => self.destroy(url),
            Hint::File {
                url,
                record: Some(record),
            } => self.apply_file(url, record),
            Hint::Directory { url, children } => self.apply_directory(url, children),
        }
    }

    fn apply_file(&mut self, url: &Url, record: &FileRecord) -> Result<(), StorageError> {
        match self.tx.get_node(url)? {
            Some(node) => self.reconcile(node, record),
            None => {
                let parent_id = match url.parent() {
                    Some(parent) => Some(self.ensure_directory_chain(&parent)?),
                    None => None,
                };
                self.create(url, parent_id, record)
            }
        }
    }

    fn apply_directory(
        &mut self,
        url: &Url,
        children: &[(String, FileRecord)],
    ) -> Result<(), StorageError> {
        let directory_id = self.ensure_directory_chain(url)?;

        let mut incoming: BTreeMap<Url, &FileRecord> = BTreeMap::new();
        for (name, record) in children {
            let child = url.join(name);
            if child.parent().as_ref() != Some(url) {
                warn!(directory = %url, name = %name, "Ignoring invalid child name in listing");
                continue;
            }
            incoming.insert(child, record);
        }

        let mut existing: BTreeMap<Url, NodeRecord> = self
            .tx
            .children(url)?
            .into_iter()
            .map(|node| (node.url.clone(), node))
            .collect();

        // Removals first, so a batch never reports a creation before the
        // deletion it replaces.
        let removed: Vec<Url> = existing
            .keys()
            .filter(|child| !incoming.contains_key(*child))
            .cloned()
            .collect();
        for child in &removed {
            existing.remove(child);
            self.destroy(child)?;
        }

        for (child, record) in incoming {
            match existing.remove(&child) {
                Some(node) => self.reconcile(node, record)?,
                None => self.create(&child, Some(directory_id), record)?,
            }
        }
        Ok(())
    }

    /// Case analysis for a path that is already indexed.
    fn reconcile(&mut self, node: NodeRecord, record: &FileRecord) -> Result<(), StorageError> {
        let type_flipped = node.is_directory != record.is_directory();
        let identity_changed = node.is_observed() && node.identifier_tag != record.identifier_tag;

        if type_flipped || identity_changed {
            trace!(url = %node.url, type_flipped, identity_changed, "Replacing node");
            self.destroy(&node.url)?;
            return self.create(&node.url, node.parent_id, record);
        }

        if !node.is_observed() {
            let updated = NodeRecord {
                identifier_tag: record.identifier_tag.clone(),
                content_tag: record.content_tag.clone(),
                ..node
            };
            if updated.is_observed() {
                self.events.push(FileChangeEvent::created(updated.url.clone()));
            }
            return self.tx.put_node(&updated);
        }

        if node.content_tag != record.content_tag {
            let mut expired = Vec::new();
            for data in self.tx.attachments(&node.url)? {
                if !data.deletion_policy.survives_content_change() {
                    self.tx.remove_attachment(&node.url, &data.key)?;
                    expired.push(data);
                }
            }
            let updated = NodeRecord {
                content_tag: record.content_tag.clone(),
                ..node
            };
            self.tx.put_node(&updated)?;
            self.events
                .push(FileChangeEvent::changed(updated.url, expired));
        }
        Ok(())
    }

    /// Make sure `url` is an indexed directory, creating missing ancestors as
    /// directories with unknown tags. A non-directory found on the way is
    /// destroyed together with its subtree.
    fn ensure_directory_chain(&mut self, url: &Url) -> Result<NodeId, StorageError> {
        match self.tx.get_node(url)? {
            Some(node) if node.is_directory => return Ok(node.id),
            Some(_) => self.destroy(url)?,
            None => {}
        }
        let parent_id = match url.parent() {
            Some(parent) => Some(self.ensure_directory_chain(&parent)?),
            None => None,
        };
        let id = self.tx.next_id()?;
        self.tx
            .put_node(&NodeRecord::synthetic_directory(id, url.clone(), parent_id))?;
        Ok(id)
    }

    fn create(
        &mut self,
        url: &Url,
        parent_id: Option<NodeId>,
        record: &FileRecord,
    ) -> Result<(), StorageError> {
        let node = NodeRecord::observed(self.tx.next_id()?, url.clone(), parent_id, record);
        self.tx.put_node(&node)?;
        if node.is_observed() {
            self.events.push(FileChangeEvent::created(node.url));
        }
        Ok(())
    }

    /// Cascade-delete the subtree at `url`. Only nodes that were observed
    /// with an identity are reported.
    fn destroy(&mut self, url: &Url) -> Result<(), StorageError> {
        for (node, attachments) in self.tx.delete_subtree(url)? {
            if node.is_observed() {
                self.events
                    .push(FileChangeEvent::deleted(node.url, attachments));
            }
        }
        Ok(())
    }
}
