/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The `WorkerInstance` type: the identity of one worker, dedicated or
//! shared, together with the document set and client senders that keep
//! it alive. The same shape serves running instances, queued instances
//! awaiting admission, and the pending placeholders used to resolve
//! racing shared-worker lookups.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::document_set::WorkerDocumentSet;
use crate::{
    ClientWorkerId, ConnectionId, PageId, RequestContext, ResourceCacheHostId, ResourceCacheId,
    ViewId, WorkerId, WorkerProcessId,
};

/// A client connection and the handle it uses for this worker.
pub type SenderInfo = (ConnectionId, ClientWorkerId);

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WorkerInstance {
    url: Url,
    shared: bool,
    private: bool,
    /// Set once the worker context has invoked close(); a closed shared
    /// worker stops matching lookups but keeps draining its existing
    /// clients.
    closed: bool,
    name: String,
    /// `None` only for pending shared-worker placeholders, which never
    /// reach a process.
    worker_id: Option<WorkerId>,
    /// The process hosting the parent worker, for nested workers.
    parent_process: Option<WorkerProcessId>,
    parent_cache_host: Option<ResourceCacheHostId>,
    main_resource_cache: Option<ResourceCacheId>,
    request_context: Option<RequestContext>,
    document_set: WorkerDocumentSet,
    senders: Vec<SenderInfo>,
}

impl WorkerInstance {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: Url,
        shared: bool,
        private: bool,
        name: String,
        worker_id: WorkerId,
        parent_process: Option<WorkerProcessId>,
        parent_cache_host: Option<ResourceCacheHostId>,
        main_resource_cache: Option<ResourceCacheId>,
        request_context: RequestContext,
    ) -> WorkerInstance {
        debug_assert_eq!(private, request_context.is_private);
        WorkerInstance {
            url,
            shared,
            private,
            closed: false,
            name,
            worker_id: Some(worker_id),
            parent_process,
            parent_cache_host,
            main_resource_cache,
            request_context: Some(request_context),
            document_set: WorkerDocumentSet::new(),
            senders: Vec::new(),
        }
    }

    /// A placeholder for a shared worker that has been looked up but not
    /// yet created. It accumulates documents and senders until a real
    /// instance absorbs them.
    pub fn pending(url: Url, name: String, private: bool) -> WorkerInstance {
        WorkerInstance {
            url,
            shared: true,
            private,
            closed: false,
            name,
            worker_id: None,
            parent_process: None,
            parent_cache_host: None,
            main_resource_cache: None,
            request_context: None,
            document_set: WorkerDocumentSet::new(),
            senders: Vec::new(),
        }
    }

    /// Whether this instance answers a shared-worker request for the
    /// given key, per the WebWorkers spec matching algorithm: only open
    /// shared workers match, private workers never match non-private
    /// ones, the URL origins must be equal, and then either both names
    /// are empty and the full URLs are equal, or the names are equal.
    pub fn matches(&self, url: &Url, name: &str, private: bool) -> bool {
        if !self.shared || self.closed {
            return false;
        }
        if self.private != private {
            return false;
        }
        if self.url.origin() != url.origin() {
            return false;
        }
        if self.name.is_empty() && name.is_empty() {
            return self.url == *url;
        }
        self.name == name
    }

    pub fn add_sender(&mut self, connection: ConnectionId, client: ClientWorkerId) {
        if !self.has_sender(connection, client) {
            self.senders.push((connection, client));
        }
        // Only shared workers can have more than one attached client.
        debug_assert!(self.shared || self.senders.len() == 1);
    }

    pub fn remove_sender(&mut self, connection: ConnectionId, client: ClientWorkerId) {
        self.senders
            .retain(|&(conn, id)| !(conn == connection && id == client));
    }

    /// Remove every sender owned by the given connection.
    pub fn remove_senders(&mut self, connection: ConnectionId) {
        self.senders.retain(|&(conn, _)| conn != connection);
    }

    pub fn has_sender(&self, connection: ConnectionId, client: ClientWorkerId) -> bool {
        self.senders
            .iter()
            .any(|&(conn, id)| conn == connection && id == client)
    }

    pub fn num_senders(&self) -> usize {
        self.senders.len()
    }

    /// The single sender of a dedicated or freshly queued instance.
    pub fn sole_sender(&self) -> Option<SenderInfo> {
        debug_assert_eq!(self.senders.len(), 1);
        self.senders.first().copied()
    }

    pub fn senders(&self) -> &[SenderInfo] {
        &self.senders
    }

    /// Adopt another instance's accumulated documents and senders, used
    /// when a real shared worker absorbs its pending placeholder and any
    /// queued duplicates.
    pub fn merge_from(&mut self, other: &WorkerInstance) {
        for info in other.document_set.documents() {
            self.document_set
                .add(info.connection(), info.document(), info.page(), info.view());
        }
        for &(connection, client) in other.senders() {
            self.add_sender(connection, client);
        }
    }

    /// Whether any referencing document originates from the given
    /// (page, view) pair, used by per-page admission control.
    pub fn page_is_parent(&self, page: PageId, view: ViewId) -> bool {
        self.document_set
            .documents()
            .iter()
            .any(|info| info.page() == page && info.view() == view)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_closed(&mut self, closed: bool) {
        self.closed = closed;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker_id(&self) -> Option<WorkerId> {
        self.worker_id
    }

    pub fn parent_process(&self) -> Option<WorkerProcessId> {
        self.parent_process
    }

    pub fn parent_cache_host(&self) -> Option<ResourceCacheHostId> {
        self.parent_cache_host
    }

    pub fn main_resource_cache(&self) -> Option<ResourceCacheId> {
        self.main_resource_cache
    }

    pub fn request_context(&self) -> Option<&RequestContext> {
        self.request_context.as_ref()
    }

    pub fn document_set(&self) -> &WorkerDocumentSet {
        &self.document_set
    }

    pub fn document_set_mut(&mut self) -> &mut WorkerDocumentSet {
        &mut self.document_set
    }
}
