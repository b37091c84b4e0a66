/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The reference-count structure that keeps a worker alive: the set of
//! documents currently holding a reference to it, and which client
//! connection owns each one. A worker's true death is driven entirely by
//! its document set becoming empty.

use serde::{Deserialize, Serialize};

use crate::{ConnectionId, DocumentId, PageId, ViewId};

/// One referencing document and where it came from.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DocumentInfo {
    connection: ConnectionId,
    document: DocumentId,
    page: PageId,
    view: ViewId,
}

impl DocumentInfo {
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn document(&self) -> DocumentId {
        self.document
    }

    pub fn page(&self) -> PageId {
        self.page
    }

    pub fn view(&self) -> ViewId {
        self.view
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct WorkerDocumentSet {
    documents: Vec<DocumentInfo>,
}

impl WorkerDocumentSet {
    pub fn new() -> WorkerDocumentSet {
        WorkerDocumentSet::default()
    }

    /// Add a referencing document. Adding the same (connection, document)
    /// pair again is a no-op.
    pub fn add(
        &mut self,
        connection: ConnectionId,
        document: DocumentId,
        page: PageId,
        view: ViewId,
    ) {
        if self.contains(connection, document) {
            return;
        }
        self.documents.push(DocumentInfo {
            connection,
            document,
            page,
            view,
        });
    }

    pub fn contains(&self, connection: ConnectionId, document: DocumentId) -> bool {
        self.documents
            .iter()
            .any(|info| info.connection == connection && info.document == document)
    }

    /// Remove a single referencing document.
    pub fn remove(&mut self, connection: ConnectionId, document: DocumentId) {
        self.documents
            .retain(|info| !(info.connection == connection && info.document == document));
    }

    /// Remove every document owned by the given connection, used when the
    /// whole connection shuts down.
    pub fn remove_all(&mut self, connection: ConnectionId) {
        self.documents.retain(|info| info.connection != connection);
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[DocumentInfo] {
        &self.documents
    }
}
