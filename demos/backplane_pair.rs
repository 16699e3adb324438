use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use tierkit::backplane::{BackplaneHub, ChannelBackplane};
use tierkit::builder::CoordinatorBuilder;
use tierkit::config::HandleConfig;
use tierkit::handle::memory::MemoryHandle;
use tierkit::handle::CacheHandle;
use tierkit::item::CacheItem;

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    // Two coordinators on one hub stand in for two processes sharing a
    // pub/sub transport.
    let hub = BackplaneHub::new();

    let p1_mem = Arc::new(
        MemoryHandle::with_config(HandleConfig::new("mem").as_backplane_source()).unwrap(),
    );
    let p1 = CoordinatorBuilder::new("p1")
        .handle(p1_mem)
        .backplane(Arc::new(ChannelBackplane::new(hub.clone())))
        .build()
        .unwrap();

    let p2_mem = Arc::new(
        MemoryHandle::with_config(HandleConfig::new("mem").as_backplane_source()).unwrap(),
    );
    let _p2 = CoordinatorBuilder::new("p2")
        .handle(p2_mem.clone())
        .backplane(Arc::new(ChannelBackplane::new(hub)))
        .build()
        .unwrap();

    // p2 holds a stale copy.
    p2_mem
        .put(&CacheItem::new("config", "stale".to_owned()).unwrap())
        .unwrap();
    println!("p2 before: {:?}", p2_mem.get_item("config", None).unwrap().map(|i| i.into_value()));

    // p1 publishes a fresh value; the backplane tells p2 to drop its copy.
    p1.put(CacheItem::new("config", "fresh".to_owned()).unwrap())
        .unwrap();
    sleep(Duration::from_millis(100));

    println!("p2 after:  {:?}", p2_mem.get_item("config", None).unwrap().map(|i| i.into_value()));
    println!("p1 still:  {:?}", p1.get("config", None).unwrap());
}

// Expected output:
// p2 before: Some("stale")
// p2 after:  None
// p1 still:  Some("fresh")
//
// Explanation: the change event fans out to the other process and evicts its
// stale copy; the publisher's own subscription filters its own messages, so
// p1 keeps what it wrote.
