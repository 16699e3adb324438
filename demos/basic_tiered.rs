use std::sync::Arc;

use tierkit::builder::CoordinatorBuilder;
use tierkit::handle::memory::MemoryHandle;
use tierkit::handle::CacheHandle;
use tierkit::item::CacheItem;

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let l1 = Arc::new(MemoryHandle::new("l1"));
    let l2 = Arc::new(MemoryHandle::new("l2"));
    let cache = CoordinatorBuilder::new("demo")
        .handle(l1.clone())
        .handle(l2.clone())
        .build()
        .expect("two plain handles always assemble");

    cache
        .add(CacheItem::new("greeting", "hello".to_owned()).expect("valid key"))
        .expect("add");
    println!(
        "after add:  l1 has it? {}  l2 has it? {}",
        l1.exists("greeting", None).unwrap(),
        l2.exists("greeting", None).unwrap(),
    );

    let value = cache.get("greeting", None).expect("get");
    println!("get -> {:?}", value);
    println!(
        "after get:  l1 has it? {}  (the hit was promoted)",
        l1.exists("greeting", None).unwrap(),
    );

    let updated = cache
        .update("greeting", None, |v| Some(format!("{v}, world")))
        .expect("update");
    println!("update -> {updated}");
    println!(
        "after update: l1 has it? {}  (mode Up evicted the stale copy)",
        l1.exists("greeting", None).unwrap(),
    );
}

// Expected output:
// after add:  l1 has it? false  l2 has it? true
// get -> Some("hello")
// after get:  l1 has it? true  (the hit was promoted)
// update -> hello, world
// after update: l1 has it? false  (mode Up evicted the stale copy)
//
// Explanation: add writes the bottom layer and evicts the rest; a read hit
// promotes upward; a committed update evicts the layers above the bottom.
