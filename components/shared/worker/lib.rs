/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![deny(unsafe_code)]

//! Types shared between the worker scheduler and the processes that host
//! workers on its behalf. This crate exists so that embedders can implement
//! a worker process host without depending on the scheduler itself.

pub mod document_set;
pub mod worker;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use crate::document_set::{DocumentInfo, WorkerDocumentSet};
pub use crate::worker::{SenderInfo, WorkerInstance};

/// A scheduler-unique handle for a worker, allocated from a monotonic
/// counter and never reused for the lifetime of the scheduler.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct WorkerId(pub u32);

/// The client-side handle a document uses to refer to a worker it asked
/// for. Scoped to the connection that issued it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ClientWorkerId(pub u32);

/// A handle for the channel back to a document's owning process. The
/// scheduler keys its sender registry by this, rather than holding raw
/// senders inside each instance.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ConnectionId(pub u32);

/// A single page or frame instance that can reference a worker.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct DocumentId(pub u64);

/// The page a referencing document originates from, used to attribute
/// workers for per-page admission control.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct PageId(pub u32);

/// The view within an originating page. Admission control counts workers
/// per (page, view) pair.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ViewId(pub u32);

/// A handle for a live worker process in the scheduler's process table.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct WorkerProcessId(pub u32);

/// The resource-cache host a nested dedicated worker inherits from its
/// parent. Opaque to the scheduler.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ResourceCacheHostId(pub u32);

/// The cache entry backing a shared worker's main script resource.
/// Opaque to the scheduler.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ResourceCacheId(pub u64);

/// An opaque identifier for the request context a worker loads in.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct RequestContextId(pub u32);

/// The request context a worker performs its loads in. The scheduler
/// carries this through to process creation without interpreting it,
/// beyond keeping private-mode workers out of non-private contexts.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RequestContext {
    pub id: RequestContextId,
    pub is_private: bool,
}

/// Messages delivered to a document's owning process over its registered
/// connection sender.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum WorkerClientMsg {
    /// The worker referred to by this client-side handle is running.
    /// Also sent when a create request resolved to an already-running
    /// shared worker.
    WorkerCreated(ClientWorkerId),
}

/// Messages relayed through the scheduler between a document and the
/// process hosting its worker.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum WorkerScriptMsg {
    /// Opaque traffic posted by a client to its worker. The scheduler
    /// routes it without decoding the payload.
    Message(Vec<u8>),
    /// The worker context exited, or is to be treated as if it had; the
    /// cancellation path synthesizes this so process bookkeeping stays
    /// consistent when a creator withdraws before acknowledgment.
    ContextDestroyed,
}

/// The scheduler's view of a child process hosting zero or more worker
/// instances. The scheduler tells a host which instances to run and
/// forwards lifecycle events inward; the host owns actual execution.
pub trait WorkerProcessHost {
    /// Hand this process an instance to execute. Fire-and-forget: the
    /// scheduler does not wait for the worker to start running.
    fn create_worker(&mut self, instance: WorkerInstance);

    /// A document went away (navigation or unload) without its whole
    /// connection dying. Shared instances losing their last document
    /// should be shut down.
    fn document_detached(&mut self, connection: ConnectionId, document: DocumentId);

    /// The connection to a client process was lost.
    fn connection_shutdown(&mut self, connection: ConnectionId);

    /// Claim a message destined for one of this process's instances.
    /// Returns false if no open instance has the given sender.
    fn filter_message(
        &mut self,
        message: &WorkerScriptMsg,
        route: ClientWorkerId,
        connection: ConnectionId,
    ) -> bool;

    /// Read-only enumeration of hosted instances, used by the
    /// scheduler's admission and placement scans.
    fn instances(&self) -> &[WorkerInstance];

    /// Mutable access to hosted instances, used when attaching a new
    /// document to an already-running shared worker.
    fn instances_mut(&mut self) -> &mut [WorkerInstance];
}

/// Everything the scheduler records about a freshly spawned process.
pub struct NewWorkerProcess {
    /// The connection handle the embedder assigned to the new process;
    /// nested workers created from within it use this as their sender.
    pub connection: ConnectionId,
    pub host: Box<dyn WorkerProcessHost>,
}

/// Spawns worker processes on behalf of the scheduler. A process that
/// fails to initialize is never returned; the error is surfaced to the
/// original creation request instead.
pub trait WorkerProcessFactory {
    fn create_process(
        &mut self,
        context: &RequestContext,
    ) -> Result<NewWorkerProcess, ProcessInitError>;
}

/// A worker process could not be spawned or failed its initialization
/// handshake.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProcessInitError;

impl fmt::Display for ProcessInitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "worker process failed to initialize")
    }
}

impl std::error::Error for ProcessInitError {}
