//! Outstanding-memory accounting across pooled reuse.
//!
//! Kept in a binary of its own: every assertion reads the process-wide
//! counter, which concurrent allocating tests would skew.

use cycletrace::{ChunkAllocator, Scope, Site, SpanGuard};

static SITE: Site = Site::new("tests/memory.rs", "memory::churn", "churn", 3);

// Serialises the tests in this binary; both inspect the same counter.
static COUNTER_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn churn(allocator: &std::sync::Arc<ChunkAllocator>, pairs: usize) {
    let scope = Scope::with_allocator("churn", allocator.clone());
    for _ in 0..pairs {
        let _span = SpanGuard::new(&SITE);
    }
    drop(scope);
}

#[test]
fn pooled_scope_churn_holds_the_counter_flat() {
    let _guard = COUNTER_LOCK.lock().unwrap();
    let allocator = ChunkAllocator::new(4096);

    // Prime the pool: the first scope performs the only true
    // allocations, spilling into a second chunk (4096 words hold 455
    // nine-word pairs).
    churn(&allocator, 600);
    let high_water = cycletrace::total_memory_consumption();
    assert!(high_water >= 2 * 4096 * 4);

    for _ in 0..32 {
        churn(&allocator, 600);
        assert_eq!(
            cycletrace::total_memory_consumption(),
            high_water,
            "scope churn must reuse pooled chunks, not allocate"
        );
    }

    // Buffers die with the allocator and the counter drops with them.
    drop(allocator);
    assert_eq!(cycletrace::total_memory_consumption(), high_water - 2 * 4096 * 4);
}

#[test]
fn chunks_outliving_the_allocator_release_on_scope_drop() {
    let _guard = COUNTER_LOCK.lock().unwrap();
    let before = cycletrace::total_memory_consumption();
    let allocator = ChunkAllocator::new(4096);
    let scope = Scope::with_allocator("outlive", allocator.clone());
    {
        let _span = SpanGuard::new(&SITE);
    }
    drop(allocator);
    assert_eq!(cycletrace::total_memory_consumption(), before + 4096 * 4);
    drop(scope);
    assert_eq!(cycletrace::total_memory_consumption(), before);
}
