/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use worker_host::SchedulerConfig;
use worker_traits::{ClientWorkerId, ConnectionId, WorkerId, WorkerProcessId};

use crate::common::{created_acks, parse, Harness};

const URL: &str = "http://example.com/shared.js";

#[test]
fn racing_lookup_and_create_converge() {
    let mut harness = Harness::new(SchedulerConfig::default());
    let client_a = harness.client(1);
    let client_b = harness.client(2);

    // One page looks the worker up before any page has created it.
    let lookup = harness.lookup_shared(URL, "jobs", 2, 20, 20, 2);
    assert!(!lookup.found);
    assert!(!lookup.url_mismatch);
    assert_eq!(harness.scheduler.num_pending_shared_workers(), 1);

    // The creating page then arrives; the placeholder is absorbed and
    // both pages are attached to the one worker that starts.
    assert!(harness.create_shared(URL, "jobs", 1, 10, 10, 1));
    assert_eq!(harness.scheduler.num_pending_shared_workers(), 0);
    assert_eq!(*harness.spawned.borrow(), 1);

    let log = harness.log.borrow();
    let created = log.last().expect("no worker was created");
    assert_eq!(created.num_documents, 2);
    assert!(created.senders.contains(&(ConnectionId(1), ClientWorkerId(10))));
    assert!(created.senders.contains(&(ConnectionId(2), ClientWorkerId(20))));
    drop(log);

    assert_eq!(created_acks(&client_a), vec![ClientWorkerId(10)]);
    assert_eq!(created_acks(&client_b), vec![ClientWorkerId(20)]);
}

#[test]
fn lookup_attaches_to_running_instance() {
    let mut harness = Harness::new(SchedulerConfig::default());
    harness.client(1);
    harness.client(2);

    assert!(harness.create_shared(URL, "jobs", 1, 10, 10, 1));
    let lookup = harness.lookup_shared(URL, "jobs", 2, 20, 20, 2);
    assert!(lookup.found);
    assert!(!lookup.url_mismatch);

    let instance = harness
        .scheduler
        .shared_worker_instance(&parse(URL), "jobs", false)
        .expect("shared worker not running");
    assert_eq!(instance.num_senders(), 2);
    assert_eq!(instance.document_set().documents().len(), 2);
}

#[test]
fn create_after_lookup_acks_without_new_instance() {
    let mut harness = Harness::new(SchedulerConfig::default());
    harness.client(1);
    let client_b = harness.client(2);

    assert!(harness.create_shared(URL, "jobs", 1, 10, 10, 1));
    assert!(harness.lookup_shared(URL, "jobs", 2, 20, 20, 2).found);

    // The late create from the attached page is acknowledged without
    // starting anything.
    assert!(harness.create_shared(URL, "jobs", 2, 20, 21, 2));
    assert_eq!(*harness.spawned.borrow(), 1);
    assert_eq!(harness.scheduler.num_workers(), 1);
    assert_eq!(created_acks(&client_b), vec![ClientWorkerId(20)]);
}

#[test]
fn stale_create_without_attachment_is_refused() {
    let mut harness = Harness::new(SchedulerConfig::default());
    harness.client(1);
    harness.client(2);

    assert!(harness.create_shared(URL, "jobs", 1, 10, 10, 1));
    // A create referencing a running worker the requester was never
    // attached to points at a dead incarnation.
    assert!(!harness.create_shared(URL, "jobs", 2, 99, 99, 2));
    assert_eq!(harness.scheduler.num_workers(), 1);
    assert_eq!(*harness.spawned.borrow(), 1);
}

#[test]
fn url_mismatch_on_running_instance() {
    let mut harness = Harness::new(SchedulerConfig::default());
    harness.client(1);
    harness.client(2);

    assert!(harness.create_shared(URL, "jobs", 1, 10, 10, 1));
    let lookup = harness.lookup_shared("http://example.com/other.js", "jobs", 2, 20, 20, 2);
    assert!(!lookup.found);
    assert!(lookup.url_mismatch);

    let instance = harness
        .scheduler
        .shared_worker_instance(&parse(URL), "jobs", false)
        .expect("shared worker not running");
    assert_eq!(instance.num_senders(), 1);
}

#[test]
fn url_mismatch_on_pending_placeholder() {
    let mut harness = Harness::new(SchedulerConfig::default());
    harness.client(1);
    harness.client(2);

    assert!(!harness.lookup_shared(URL, "jobs", 1, 10, 10, 1).found);
    let lookup = harness.lookup_shared("http://example.com/other.js", "jobs", 2, 20, 20, 2);
    assert!(!lookup.found);
    assert!(lookup.url_mismatch);
    assert_eq!(harness.scheduler.num_pending_shared_workers(), 1);
}

#[test]
fn closed_worker_stops_matching() {
    let mut harness = Harness::new(SchedulerConfig::default());
    harness.client(1);
    harness.client(2);

    assert!(harness.create_shared(URL, "jobs", 1, 10, 10, 1));
    harness
        .scheduler
        .worker_context_closed(WorkerProcessId(0), WorkerId(0));

    // The draining worker is invisible to lookups; a new generation
    // starts pending.
    let lookup = harness.lookup_shared(URL, "jobs", 2, 20, 20, 2);
    assert!(!lookup.found);
    assert!(!lookup.url_mismatch);
    assert_eq!(harness.scheduler.num_pending_shared_workers(), 1);
}
