//! Runs a heap inside a reservation sized by `BRKALLOC_ARENA_CAPACITY` and
//! shows splitting, coalescing and corruption reports.

use brkalloc::{HEADER_SIZE, Heap, HeapConfig, ReservedBreak};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .init();

    let config = HeapConfig::from_env();
    let brk = ReservedBreak::from_config(&config).expect("reserve arena");
    println!("Reserved {} bytes", brk.capacity());

    let mut heap = Heap::new(brk);

    unsafe {
        let a = heap.allocate(64).expect("allocate");
        let b = heap.allocate(64).expect("allocate");
        let c = heap.allocate(16).expect("allocate");

        println!("Freeing a and b, they should merge");
        heap.free(Some(a)).expect("free");
        heap.free(Some(b)).expect("free");
        println!("Free blocks: {:?}", heap.free_blocks().collect::<Vec<_>>());

        let d = heap.allocate(32).expect("allocate");
        println!("Split the merged block: {d:?} (a was {a:?})");
        println!("Free blocks: {:?}", heap.free_blocks().collect::<Vec<_>>());

        // Smash d's sentinel and try to free it.
        d.as_ptr().sub(HEADER_SIZE).cast::<usize>().add(1).write(0);
        if let Err(err) = heap.free(Some(d)) {
            println!("Free refused: {err}");
        }

        let grown = heap.reallocate(Some(c), 256).expect("reallocate");
        println!("Reallocated c to {grown:?}");
    }

    println!("{:?}", heap.stats());
}
