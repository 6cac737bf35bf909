use brkalloc::{Heap, ReservedBreak};
use tracing_subscriber::EnvFilter;

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "trace".into()))
        .init();

    let mut heap = Heap::new(ReservedBreak::with_capacity(1 << 20).expect("reserve arena"));

    let addr1 = heap.allocate(8).expect("allocate");
    log_alloc(addr1.as_ptr(), 8);

    let addr2 = heap.allocate(8).expect("allocate");
    log_alloc(addr2.as_ptr(), 8);

    let addr3 = heap.allocate(16).expect("allocate");
    log_alloc(addr3.as_ptr(), 16);

    unsafe {
        heap.free(Some(addr1)).expect("free");
        heap.free(Some(addr2)).expect("free");
        heap.free(Some(addr3)).expect("free");
    }

    println!("{:?}", heap.stats());
}
