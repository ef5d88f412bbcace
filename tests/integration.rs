//! Integration tests for the message store.

use spyglass::{
    FilterConfig, Formatter, IncomingMessage, MessageStore, SearchConfig, SearchMatcher,
    StoreConfig, StoreEvent, SubscriptionConfig, SubscriptionFilter, ViewRead, ViewSource,
};
use std::time::Duration;

fn test_store(max_size: usize, floor: Option<usize>) -> MessageStore {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    MessageStore::new(StoreConfig {
        max_size,
        min_retained_per_topic: floor,
        ..Default::default()
    })
    .unwrap()
}

fn submit_all(store: &MessageStore, messages: &[(&str, &str)]) {
    for (topic, payload) in messages {
        store.submit(IncomingMessage::new(*topic, *payload)).unwrap();
    }
    store.sync().unwrap();
}

// --- Ingestion and retention ---

#[test]
fn test_bounded_retention_evicts_oldest() {
    let store = test_store(3, None);
    submit_all(&store, &[("t1", "a"), ("t1", "b"), ("t1", "c"), ("t1", "d")]);

    let payloads: Vec<Vec<u8>> = store
        .snapshot()
        .iter()
        .map(|r| r.raw_payload.clone())
        .collect();
    assert_eq!(payloads, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);

    // The eviction does not touch the ever-seen count.
    let summaries = store.topic_summaries();
    assert_eq!(summaries["t1"].count, 4);
    assert_eq!(store.stats().total_seen, 4);
}

#[test]
fn test_eviction_respects_topic_floor() {
    let store = test_store(3, Some(1));
    submit_all(
        &store,
        &[("rare", "r1"), ("busy", "b1"), ("busy", "b2"), ("busy", "b3")],
    );

    // "rare" sits at its floor, so the oldest "busy" record goes instead.
    let topics: Vec<String> = store.snapshot().iter().map(|r| r.topic.clone()).collect();
    assert_eq!(topics, vec!["rare", "busy", "busy"]);
}

#[test]
fn test_navigation_index_is_newest_first() {
    let store = test_store(10, None);
    submit_all(&store, &[("t1", "a"), ("t1", "b"), ("t1", "c")]);

    assert_eq!(&store.get(1).unwrap().raw_payload, b"c");
    assert_eq!(&store.get(3).unwrap().raw_payload, b"a");
    assert!(store.get(4).is_none());
    assert!(store.get(0).is_none());
}

// --- Views ---

#[test]
fn test_dedup_view_collapses_repeats() {
    let store = test_store(100, None);
    let view_id = store
        .create_view(FilterConfig::unique_only(), ViewSource::Buffer)
        .unwrap();
    submit_all(&store, &[("t1", "x"), ("t1", "x"), ("t1", "y")]);

    let view = store.view(view_id).unwrap();
    assert_eq!(view.len(), 2);
    assert_eq!(&view.get(1).unwrap().raw_payload, b"y");
    assert_eq!(&view.get(2).unwrap().raw_payload, b"x");

    // The buffer itself retains all three.
    assert_eq!(store.len(), 3);
}

#[test]
fn test_view_seeded_from_existing_history() {
    let store = test_store(100, None);
    submit_all(&store, &[("logs", "a"), ("sensors", "b"), ("logs", "c")]);

    let view_id = store
        .create_view(FilterConfig::topics(["logs"]), ViewSource::Buffer)
        .unwrap();
    store.sync().unwrap();

    let view = store.view(view_id).unwrap();
    assert_eq!(view.len(), 2);
}

#[test]
fn test_chained_views() {
    let store = test_store(100, None);
    let logs = store
        .create_view(FilterConfig::topics(["logs"]), ViewSource::Buffer)
        .unwrap();
    let dedup = store
        .create_view(FilterConfig::unique_only(), ViewSource::View(logs))
        .unwrap();
    submit_all(
        &store,
        &[("logs", "x"), ("other", "x"), ("logs", "x"), ("logs", "y")],
    );

    assert_eq!(store.view(logs).unwrap().len(), 3);
    // The child only sees what the parent accepted, then dedups.
    assert_eq!(store.view(dedup).unwrap().len(), 2);
}

#[test]
fn test_reconfigure_view_rebuilds_atomically() {
    let store = test_store(100, None);
    let view_id = store
        .create_view(FilterConfig::default(), ViewSource::Buffer)
        .unwrap();
    submit_all(&store, &[("t1", "a"), ("t2", "b"), ("t1", "c")]);

    store
        .reconfigure_view(view_id, FilterConfig::topics(["t2"]))
        .unwrap();
    store.sync().unwrap();

    let view = store.view(view_id).unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(&view.get(1).unwrap().raw_payload, b"b");
}

#[test]
fn test_eviction_propagates_to_views() {
    let store = test_store(2, None);
    let view_id = store
        .create_view(FilterConfig::default(), ViewSource::Buffer)
        .unwrap();
    submit_all(&store, &[("t1", "a"), ("t1", "b"), ("t1", "c")]);

    let view = store.view(view_id).unwrap();
    assert_eq!(view.len(), 2);
    assert_eq!(&view.get(2).unwrap().raw_payload, b"b");
}

// --- Cursors ---

#[test]
fn test_cursor_pinned_follows_latest() {
    let store = test_store(100, None);
    let cursor = store.create_cursor(ViewSource::Buffer);

    submit_all(&store, &[("t1", "a"), ("t1", "b")]);
    assert_eq!(store.cursor_position(cursor).unwrap(), 1);
    assert_eq!(&store.cursor_record(cursor).unwrap().unwrap().raw_payload, b"b");
}

#[test]
fn test_cursor_unpinned_holds_record_across_appends() {
    let store = test_store(100, None);
    submit_all(&store, &[("t1", "a"), ("t1", "b")]);

    let cursor = store.create_cursor(ViewSource::Buffer);
    store.set_cursor_pinned(cursor, false).unwrap();
    store.cursor_set_position(cursor, 1, None).unwrap(); // "b"

    submit_all(&store, &[("t1", "c")]);
    // Same record, renumbered.
    assert_eq!(store.cursor_position(cursor).unwrap(), 2);
    assert_eq!(&store.cursor_record(cursor).unwrap().unwrap().raw_payload, b"b");
}

#[test]
fn test_cursor_on_view() {
    let store = test_store(100, None);
    let view_id = store
        .create_view(FilterConfig::topics(["logs"]), ViewSource::Buffer)
        .unwrap();
    let cursor = store.create_cursor(ViewSource::View(view_id));
    submit_all(&store, &[("logs", "a"), ("other", "skip"), ("logs", "b")]);

    store.cursor_last(cursor, None).unwrap();
    assert_eq!(store.cursor_position(cursor).unwrap(), 2);
    assert_eq!(&store.cursor_record(cursor).unwrap().unwrap().raw_payload, b"a");

    store.cursor_step(cursor, -1, None).unwrap();
    assert_eq!(&store.cursor_record(cursor).unwrap().unwrap().raw_payload, b"b");
}

#[test]
fn test_cursor_empty_view_is_zero() {
    let store = test_store(100, None);
    let cursor = store.create_cursor(ViewSource::Buffer);

    assert_eq!(store.cursor_first(cursor).unwrap(), 0);
    assert!(store.cursor_record(cursor).unwrap().is_none());
}

// --- Search ---

#[test]
fn test_batch_search_scans_history() {
    let store = test_store(100, None);
    submit_all(
        &store,
        &[("t1", "error-1"), ("t1", "ok"), ("t1", "error-2")],
    );

    let search = store
        .create_search(
            SearchConfig::new(SearchMatcher::plain_text("error", false)),
            ViewSource::Buffer,
        )
        .unwrap();
    store.run_batch_search(search).unwrap();
    store.sync().unwrap();

    let results = store.search_results(search).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(&results.get(1).unwrap().raw_payload, b"error-2");
    assert_eq!(&results.get(2).unwrap().raw_payload, b"error-1");
}

#[test]
fn test_live_search_appends_matches() {
    let store = test_store(100, None);
    let search = store
        .create_search(
            SearchConfig::new(SearchMatcher::plain_text("err", false)).with_live(true),
            ViewSource::Buffer,
        )
        .unwrap();

    submit_all(&store, &[("t1", "ok"), ("t1", "error-1")]);

    let results = store.search_results(search).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(&results.get(1).unwrap().raw_payload, b"error-1");
}

#[test]
fn test_chain_view_over_live_search_results() {
    let store = test_store(100, None);
    let search = store
        .create_search(
            SearchConfig::new(SearchMatcher::plain_text("err", false)).with_live(true),
            ViewSource::Buffer,
        )
        .unwrap();
    store.sync().unwrap();
    let results = store.search_results(search).unwrap();

    // A chain view derived from the search's result view.
    let child = store
        .create_view(FilterConfig::default(), ViewSource::View(results.id()))
        .unwrap();
    submit_all(&store, &[("t1", "ok"), ("t1", "error-1")]);

    assert_eq!(results.len(), 1);
    let child = store.view(child).unwrap();
    assert_eq!(child.len(), 1);
    assert_eq!(&child.get(1).unwrap().raw_payload, b"error-1");
}

#[test]
fn test_search_completion_event() {
    let store = test_store(100, None);
    let handle = store.subscribe(SubscriptionConfig {
        filter: SubscriptionFilter::all(),
        ..Default::default()
    });
    submit_all(&store, &[("t1", "needle in here")]);
    // Drain the batch event for the submit.
    while let Ok(event) = handle.recv_timeout(Duration::from_millis(200)) {
        if matches!(event, StoreEvent::Batch { .. }) {
            break;
        }
    }

    let search = store
        .create_search(
            SearchConfig::new(SearchMatcher::plain_text("needle", false)),
            ViewSource::Buffer,
        )
        .unwrap();
    store.run_batch_search(search).unwrap();
    store.sync().unwrap();

    let event = handle.recv_timeout(Duration::from_millis(500)).unwrap();
    match event {
        StoreEvent::SearchCompleted { search: id, matches } => {
            assert_eq!(id, search);
            assert_eq!(matches, 1);
        }
        other => panic!("expected SearchCompleted, got {other:?}"),
    }
}

#[test]
fn test_case_insensitive_search() {
    let store = test_store(100, None);
    submit_all(&store, &[("t1", "WARNING: disk full")]);

    let search = store
        .create_search(
            SearchConfig::new(SearchMatcher::plain_text("warning", false)),
            ViewSource::Buffer,
        )
        .unwrap();
    store.run_batch_search(search).unwrap();
    store.sync().unwrap();

    assert_eq!(store.search_results(search).unwrap().len(), 1);
}

// --- Formatter ---

#[test]
fn test_formatter_change_rebuilds_dedup_views() {
    let store = test_store(100, None);
    let view_id = store
        .create_view(FilterConfig::unique_only(), ViewSource::Buffer)
        .unwrap();

    // Byte-distinct payloads that render identically as pretty JSON.
    submit_all(&store, &[("t1", "{\"a\":1}"), ("t1", "{ \"a\" : 1 }")]);
    assert_eq!(store.view(view_id).unwrap().len(), 2);

    store.set_formatter(Formatter::json_pretty()).unwrap();
    store.sync().unwrap();
    assert_eq!(store.view(view_id).unwrap().len(), 1);
}

// --- Subscriptions and clear ---

#[test]
fn test_batch_events_carry_totals() {
    let store = test_store(2, None);
    let handle = store.subscribe(SubscriptionConfig {
        filter: SubscriptionFilter::batches(),
        ..Default::default()
    });

    submit_all(&store, &[("t1", "a"), ("t1", "b"), ("t1", "c")]);

    let mut appended = 0;
    let mut evicted = 0;
    while let Ok(event) = handle.recv_timeout(Duration::from_millis(200)) {
        if let StoreEvent::Batch {
            total_appended,
            total_evicted,
            coalesced,
            ..
        } = event
        {
            assert!(!coalesced);
            appended += total_appended;
            evicted += total_evicted;
        }
        if appended == 3 {
            break;
        }
    }
    assert_eq!(appended, 3);
    assert_eq!(evicted, 1);
}

#[test]
fn test_clear_resets_everything() {
    let store = test_store(100, None);
    let view_id = store
        .create_view(FilterConfig::default(), ViewSource::Buffer)
        .unwrap();
    let cursor = store.create_cursor(ViewSource::Buffer);
    submit_all(&store, &[("t1", "a"), ("t1", "b")]);

    let handle = store.subscribe(SubscriptionConfig {
        filter: SubscriptionFilter::all(),
        ..Default::default()
    });
    store.clear().unwrap();
    store.sync().unwrap();

    assert_eq!(store.len(), 0);
    assert_eq!(store.stats().total_seen, 0);
    assert_eq!(store.view(view_id).unwrap().len(), 0);
    assert_eq!(store.cursor_position(cursor).unwrap(), 0);

    let mut saw_cleared = false;
    while let Ok(event) = handle.recv_timeout(Duration::from_millis(200)) {
        if matches!(event, StoreEvent::Cleared) {
            saw_cleared = true;
            break;
        }
    }
    assert!(saw_cleared);
}

#[test]
fn test_drop_view_cascades() {
    let store = test_store(100, None);
    let parent = store
        .create_view(FilterConfig::topics(["t1"]), ViewSource::Buffer)
        .unwrap();
    let child = store
        .create_view(FilterConfig::unique_only(), ViewSource::View(parent))
        .unwrap();
    let cursor = store.create_cursor(ViewSource::View(child));
    store.sync().unwrap();

    store.drop_view(parent).unwrap();
    store.sync().unwrap();

    assert!(store.view(parent).is_err());
    assert!(store.view(child).is_err());
    assert!(store.cursor_position(cursor).is_err());
}
