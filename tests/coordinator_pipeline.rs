// ==============================================
// COORDINATOR PIPELINE TESTS (integration)
// ==============================================
//
// End-to-end behavior of the layered read/write pipelines: bottom-write +
// eviction for add, promotion on read hits, fan-out for put and clears, and
// the per-handle statistics each pipeline leaves behind.

use std::sync::Arc;

use tierkit::builder::CoordinatorBuilder;
use tierkit::coordinator::TieredCache;
use tierkit::error::CacheErrorKind;
use tierkit::events::{CacheEvent, EventOrigin};
use tierkit::handle::memory::MemoryHandle;
use tierkit::handle::CacheHandle;
use tierkit::item::CacheItem;

type Handles = (
    Arc<MemoryHandle<String>>,
    Arc<MemoryHandle<String>>,
    TieredCache<String>,
);

fn two_layer_cache() -> Handles {
    let l1 = Arc::new(MemoryHandle::new("l1"));
    let l2 = Arc::new(MemoryHandle::new("l2"));
    let cache = CoordinatorBuilder::new("pipeline")
        .handle(l1.clone())
        .handle(l2.clone())
        .build()
        .unwrap();
    (l1, l2, cache)
}

fn string_item(key: &str, value: &str) -> CacheItem<String> {
    CacheItem::new(key, value.to_owned()).unwrap()
}

mod add_pipeline {
    use super::*;

    #[test]
    fn add_writes_bottom_and_evicts_top() {
        let (l1, l2, cache) = two_layer_cache();

        assert!(cache.add(string_item("k", "v")).unwrap());
        assert!(l1.get_item("k", None).unwrap().is_none(), "top layer must be evicted");
        assert_eq!(
            l2.get_item("k", None).unwrap().map(|i| i.into_value()),
            Some("v".to_owned()),
            "bottom layer holds the value",
        );
    }

    #[test]
    fn add_is_create_if_absent() {
        let (_, _, cache) = two_layer_cache();

        assert!(cache.add(string_item("k", "first")).unwrap());
        assert!(!cache.add(string_item("k", "second")).unwrap());
        assert_eq!(cache.get("k", None).unwrap(), Some("first".to_owned()));
    }

    #[test]
    fn failed_add_still_evicts_stale_top_copy() {
        let (l1, _, cache) = two_layer_cache();

        assert!(cache.add(string_item("k", "v")).unwrap());
        // A read promotes the value into l1...
        assert_eq!(cache.get("k", None).unwrap(), Some("v".to_owned()));
        assert!(l1.get_item("k", None).unwrap().is_some());

        // ...and a losing add still drops that copy.
        assert!(!cache.add(string_item("k", "other")).unwrap());
        assert!(l1.get_item("k", None).unwrap().is_none());
    }
}

mod read_pipeline {
    use super::*;

    #[test]
    fn hit_is_promoted_into_upper_layers() {
        let (l1, l2, cache) = two_layer_cache();

        cache.add(string_item("k", "v")).unwrap();
        assert!(l1.get_item("k", None).unwrap().is_none());

        assert_eq!(cache.get("k", None).unwrap(), Some("v".to_owned()));
        assert_eq!(
            l1.get_item("k", None).unwrap().map(|i| i.into_value()),
            Some("v".to_owned()),
            "hit at the bottom must be promoted to the top",
        );
        assert!(l2.get_item("k", None).unwrap().is_some());
    }

    #[test]
    fn promotion_does_not_overwrite_newer_upper_value() {
        let (l1, _, cache) = two_layer_cache();

        cache.add(string_item("k", "old")).unwrap();
        // A concurrent writer placed a newer version into the top layer.
        l1.put(&string_item("k", "newer")).unwrap();

        // The coordinator read hits l1 directly and returns the newer value.
        assert_eq!(cache.get("k", None).unwrap(), Some("newer".to_owned()));
    }

    #[test]
    fn miss_returns_none() {
        let (_, _, cache) = two_layer_cache();
        assert_eq!(cache.get("absent", None).unwrap(), None);
        assert!(cache.get_item("absent", None).unwrap().is_none());
    }

    #[test]
    fn keys_are_case_sensitive() {
        let (_, _, cache) = two_layer_cache();
        cache.put(string_item("Key", "upper")).unwrap();
        assert_eq!(cache.get("key", None).unwrap(), None);
        assert_eq!(cache.get("Key", None).unwrap(), Some("upper".to_owned()));
    }

    #[test]
    fn exists_does_not_promote() {
        let (l1, _, cache) = two_layer_cache();
        cache.add(string_item("k", "v")).unwrap();

        assert!(cache.exists("k", None).unwrap());
        assert!(!cache.exists("absent", None).unwrap());
        assert!(
            l1.get_item("k", None).unwrap().is_none(),
            "exists must not promote",
        );
    }
}

mod remove_and_clear {
    use super::*;

    #[test]
    fn remove_drops_every_layer() {
        let (l1, l2, cache) = two_layer_cache();

        cache.add(string_item("k", "v")).unwrap();
        cache.get("k", None).unwrap(); // populate l1 via promotion

        assert!(cache.remove("k", None).unwrap());
        assert!(l1.get_item("k", None).unwrap().is_none());
        assert!(l2.get_item("k", None).unwrap().is_none());
        assert_eq!(cache.get("k", None).unwrap(), None);

        // Second removal finds nothing.
        assert!(!cache.remove("k", None).unwrap());
    }

    #[test]
    fn clear_empties_every_layer() {
        let (l1, l2, cache) = two_layer_cache();

        cache.put(string_item("a", "1")).unwrap();
        cache.put(string_item("b", "2")).unwrap();
        cache.clear().unwrap();

        assert_eq!(l1.count(), 0);
        assert_eq!(l2.count(), 0);
        assert_eq!(cache.get("a", None).unwrap(), None);
    }

    #[test]
    fn region_isolation() {
        let (_, _, cache) = two_layer_cache();

        cache
            .put(CacheItem::with_region("k", "r", "regioned".to_owned()).unwrap())
            .unwrap();
        cache.put(string_item("k", "global")).unwrap();

        assert_eq!(
            cache.get("k", Some("r")).unwrap(),
            Some("regioned".to_owned()),
        );
        assert_eq!(cache.get("k", None).unwrap(), Some("global".to_owned()));

        cache.clear_region("r").unwrap();
        assert_eq!(cache.get("k", Some("r")).unwrap(), None);
        assert_eq!(
            cache.get("k", None).unwrap(),
            Some("global".to_owned()),
            "clearing a region must not touch the global namespace",
        );
    }
}

mod statistics {
    use super::*;

    #[test]
    fn add_counts_on_bottom_handle_only() {
        let (l1, l2, cache) = two_layer_cache();
        cache.add(string_item("k", "v")).unwrap();

        assert_eq!(l1.stats().adds, 0);
        assert_eq!(l2.stats().adds, 1);
    }

    #[test]
    fn put_counts_on_every_handle() {
        let (l1, l2, cache) = two_layer_cache();
        cache.put(string_item("k", "v")).unwrap();

        assert_eq!(l1.stats().puts, 1);
        assert_eq!(l2.stats().puts, 1);
    }

    #[test]
    fn clear_region_counts_separately_from_clear() {
        let (l1, l2, cache) = two_layer_cache();
        cache.clear_region("r").unwrap();

        for handle in [&l1, &l2] {
            let stats = handle.stats();
            assert_eq!(stats.clear_regions, 1);
            assert_eq!(stats.clears, 0);
        }

        cache.clear().unwrap();
        assert_eq!(l1.stats().clears, 1);
        assert_eq!(l2.stats().clears, 1);
    }

    #[test]
    fn misses_count_on_each_traversed_handle() {
        let (l1, l2, cache) = two_layer_cache();
        cache.get("absent", None).unwrap();

        assert_eq!(l1.stats().misses, 1);
        assert_eq!(l2.stats().misses, 1);

        cache.add(string_item("k", "v")).unwrap();
        cache.get("k", None).unwrap();
        // l1 missed again, l2 hit.
        assert_eq!(l1.stats().misses, 2);
        assert_eq!(l2.stats().hits, 1);
    }

    #[test]
    fn coordinator_stats_lists_handles_in_order() {
        let (_, _, cache) = two_layer_cache();
        let stats = cache.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].0, "l1");
        assert_eq!(stats[1].0, "l2");
    }
}

mod validation_and_lifecycle {
    use super::*;

    #[test]
    fn empty_key_rejected_before_touching_handles() {
        let (l1, _, cache) = two_layer_cache();
        let err = cache.get("", None).unwrap_err();
        assert_eq!(err.kind(), CacheErrorKind::InvalidArgument);
        assert_eq!(l1.stats().gets, 0, "validation failures must not reach handles");
    }

    #[test]
    fn empty_region_rejected() {
        let (_, _, cache) = two_layer_cache();
        let err = cache.get("k", Some("")).unwrap_err();
        assert_eq!(err.kind(), CacheErrorKind::InvalidArgument);
        let err = cache.clear_region(" ").unwrap_err();
        assert_eq!(err.kind(), CacheErrorKind::InvalidArgument);
    }

    #[test]
    fn operations_after_shutdown_fail_disposed() {
        let (_, _, cache) = two_layer_cache();
        cache.put(string_item("k", "v")).unwrap();
        cache.shutdown();

        let err = cache.get("k", None).unwrap_err();
        assert_eq!(err.kind(), CacheErrorKind::Disposed);
        let err = cache.add(string_item("x", "y")).unwrap_err();
        assert_eq!(err.kind(), CacheErrorKind::Disposed);
        let err = cache.clear().unwrap_err();
        assert_eq!(err.kind(), CacheErrorKind::Disposed);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (_, _, cache) = two_layer_cache();
        cache.shutdown();
        cache.shutdown();
    }
}

mod observers {
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn local_operations_emit_local_events() {
        let (_, _, cache) = two_layer_cache();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        cache.on_event(move |event| {
            let tag = match event {
                CacheEvent::Add { origin, .. } => format!("add:{origin:?}"),
                CacheEvent::Get { origin, .. } => format!("get:{origin:?}"),
                CacheEvent::Put { origin, .. } => format!("put:{origin:?}"),
                CacheEvent::Remove { origin, .. } => format!("remove:{origin:?}"),
                CacheEvent::Clear { origin } => format!("clear:{origin:?}"),
                _ => return,
            };
            sink.lock().push(tag);
        });

        cache.add(string_item("k", "v")).unwrap();
        cache.get("k", None).unwrap();
        cache.put(string_item("k", "v2")).unwrap();
        cache.remove("k", None).unwrap();
        cache.clear().unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                "add:Local",
                "get:Local",
                "put:Local",
                "remove:Local",
                "clear:Local",
            ],
        );
    }

    #[test]
    fn removed_observer_is_silent() {
        let (_, _, cache) = two_layer_cache();
        let seen = Arc::new(Mutex::new(0usize));

        let sink = seen.clone();
        let id = cache.on_event(move |_| *sink.lock() += 1);
        cache.put(string_item("k", "v")).unwrap();
        assert!(cache.remove_observer(id));
        cache.put(string_item("k", "v2")).unwrap();

        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn panicking_observer_does_not_break_the_operation() {
        let (_, _, cache) = two_layer_cache();
        cache.on_event(|_| panic!("observer bug"));

        assert!(cache.add(string_item("k", "v")).unwrap());
        assert_eq!(cache.get("k", None).unwrap(), Some("v".to_owned()));
    }

    #[test]
    fn events_carry_origin_accessor() {
        let event: CacheEvent<String> = CacheEvent::Clear {
            origin: EventOrigin::Local,
        };
        assert_eq!(event.origin(), EventOrigin::Local);
    }
}

mod capacity_eviction {
    use parking_lot::Mutex;
    use tierkit::events::RemoveReason;

    use super::*;

    #[test]
    fn bounded_handle_eviction_reaches_observers() {
        let l1 = Arc::new(MemoryHandle::bounded("l1", 2));
        let cache = CoordinatorBuilder::new("bounded")
            .handle(l1)
            .build()
            .unwrap();

        let seen: Arc<Mutex<Vec<(String, RemoveReason, usize)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        cache.on_event(move |event| {
            if let CacheEvent::RemoveByHandle {
                key, reason, level, ..
            } = event
            {
                sink.lock().push((key.clone(), *reason, *level));
            }
        });

        cache.put(string_item("a", "1")).unwrap();
        cache.put(string_item("b", "2")).unwrap();
        cache.get("a", None).unwrap(); // keep "a" warm; "b" is the victim
        cache.put(string_item("c", "3")).unwrap();

        assert_eq!(cache.get("b", None).unwrap(), None);
        assert_eq!(cache.get("a", None).unwrap(), Some("1".to_owned()));
        assert_eq!(cache.get("c", None).unwrap(), Some("3".to_owned()));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("b".to_owned(), RemoveReason::Evicted, 1));
    }
}

mod three_layers {
    use super::*;

    #[test]
    fn hit_in_middle_promotes_only_above() {
        let l1 = Arc::new(MemoryHandle::new("l1"));
        let l2 = Arc::new(MemoryHandle::new("l2"));
        let l3 = Arc::new(MemoryHandle::new("l3"));
        let cache = CoordinatorBuilder::new("three")
            .handle(l1.clone())
            .handle(l2.clone())
            .handle(l3.clone())
            .build()
            .unwrap();

        // Seed only the middle layer.
        l2.put(&string_item("k", "v")).unwrap();

        assert_eq!(cache.get("k", None).unwrap(), Some("v".to_owned()));
        assert!(
            l1.get_item("k", None).unwrap().is_some(),
            "layer above the hit receives the item",
        );
        assert!(
            l3.get_item("k", None).unwrap().is_none(),
            "layers below the hit stay untouched",
        );
    }
}
