//! In-memory document store with a synchronous change feed.

use crate::error::{Result, StoreError};
use crate::feed::ChangeFeed;
use crate::query::Filter;
use crate::types::{Change, ChangeRecord, Document, DocumentId, Mutation, Sequence};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// State guarded by the store's single writer lock.
struct Inner {
    docs: HashMap<DocumentId, Document>,
    head: Sequence,
}

/// Mutable collection of documents keyed by unique identifier.
///
/// Every successful mutation assigns the next sequence number and
/// publishes exactly one [`ChangeRecord`] to the change feed before the
/// mutating call returns (write-then-notify). Reads take a shared lock
/// and see a consistent point-in-time view.
pub struct DocumentStore {
    inner: RwLock<Inner>,
    feed: Arc<ChangeFeed>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                docs: HashMap::new(),
                head: Sequence(0),
            }),
            feed: Arc::new(ChangeFeed::new()),
        }
    }

    /// The change feed fed by this store's mutations.
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    // --- Mutations ---

    /// Insert a document. Fails with [`StoreError::DuplicateKey`] if the
    /// identifier already exists.
    pub fn insert(&self, doc: Document) -> Result<DocumentId> {
        let mut inner = self.inner.write();
        if inner.docs.contains_key(&doc.id) {
            return Err(StoreError::DuplicateKey(doc.id));
        }

        let id = doc.id.clone();
        inner.docs.insert(id.clone(), doc.clone());
        Self::commit(&mut inner, &self.feed, Change::Inserted { document: doc });
        Ok(id)
    }

    /// Insert unless the identifier already exists.
    ///
    /// Returns `true` if the document was inserted, `false` if the key was
    /// already present (the existing document is left untouched and no
    /// change record is emitted). Lets racing fixture initializers
    /// converge without inspecting duplicate-key failures.
    pub fn insert_if_absent(&self, doc: Document) -> bool {
        let mut inner = self.inner.write();
        if inner.docs.contains_key(&doc.id) {
            return false;
        }

        inner.docs.insert(doc.id.clone(), doc.clone());
        Self::commit(&mut inner, &self.feed, Change::Inserted { document: doc });
        true
    }

    /// Remove a document. Returns `false` if the identifier is absent;
    /// absence is a normal outcome, not a failure.
    pub fn remove(&self, id: &DocumentId) -> bool {
        let mut inner = self.inner.write();
        match inner.docs.remove(id) {
            None => false,
            Some(document) => {
                Self::commit(&mut inner, &self.feed, Change::Removed { document });
                true
            }
        }
    }

    /// Apply a mutation to the document with the given identifier.
    ///
    /// Returns `Ok(false)` if the identifier is absent. The mutation is
    /// applied to a copy and committed only on success, so a failing
    /// mutation leaves the stored document untouched.
    pub fn update_by_id(&self, id: &DocumentId, mutation: Mutation) -> Result<bool> {
        let mut inner = self.inner.write();
        let Some(old) = inner.docs.get(id).cloned() else {
            return Ok(false);
        };

        let mut new = old.clone();
        mutation.apply(&mut new)?;

        inner.docs.insert(id.clone(), new.clone());
        Self::commit(&mut inner, &self.feed, Change::Updated { old, new });
        Ok(true)
    }

    /// Assign the next sequence number and publish, still inside the
    /// write critical section so feed order matches mutation order.
    fn commit(inner: &mut Inner, feed: &ChangeFeed, change: Change) {
        inner.head = inner.head.next();
        feed.publish(Arc::new(ChangeRecord {
            sequence: inner.head,
            change,
        }));
    }

    // --- Reads ---

    /// Point-in-time scan of documents matching the filter, ordered by
    /// identifier.
    pub fn find(&self, filter: &Filter) -> Vec<Document> {
        self.snapshot(filter).0
    }

    /// Like [`find`](Self::find), also returning the sequence number of
    /// the last mutation reflected in the result. Used by subscribers to
    /// de-duplicate change records that raced the snapshot.
    pub fn snapshot(&self, filter: &Filter) -> (Vec<Document>, Sequence) {
        let inner = self.inner.read();
        let mut matching: Vec<Document> = inner
            .docs
            .values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        (matching, inner.head)
    }

    /// Fetch a single document by identifier.
    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.inner.read().docs.get(id).cloned()
    }

    /// Sequence number of the most recent mutation.
    pub fn head(&self) -> Sequence {
        self.inner.read().head
    }

    pub fn len(&self) -> usize {
        self.inner.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().docs.is_empty()
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}
