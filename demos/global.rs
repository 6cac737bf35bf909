//! This example is designed to test [`LockedHeap`] installed as the global
//! allocator on top of the real program break.
//!
//! No tracing subscriber is installed here: formatting events would allocate
//! from inside the allocator.

#[cfg(unix)]
mod demo {
    use brkalloc::{LockedHeap, SystemBreak};
    use std::thread;

    #[global_allocator]
    static ALLOCATOR: LockedHeap<SystemBreak> = LockedHeap::new(SystemBreak::new());

    pub fn run() {
        // Box example
        let val_box = Box::new(22);
        println!("Box Value: {}, At: {:p}", val_box, val_box);

        // Vec example
        let mut v = Vec::new();
        for i in 0..5 {
            v.push(i * 10);
            println!("Added {}; Capacity: {}; At: {:p}", v[i], v.capacity(), v.as_ptr());
        }

        // String example
        let msg = String::from("Heap Testing");
        println!("\nString '{}' - At: {:p}", msg, msg.as_ptr());

        let p1 = Box::new(2.22);
        let addr_p1 = format!("{:p}", p1);
        println!("P1 Allocated at: {}", addr_p1);

        drop(p1);
        println!("P1 Deallocated");

        let p2 = Box::new(2.22);
        println!("P2 at: {:p}", p2);

        // Merge example
        let a = Box::new([0u8; 64]);
        let b = Box::new([0u8; 64]);
        let ptr_a = a.as_ptr();

        drop(a);
        drop(b);

        let c = Box::new([0u8; 128]);
        let ptr_c = c.as_ptr();

        if ptr_a == ptr_c {
            println!("Correctly reused at {:p}", ptr_c);
        } else {
            println!("Not reused. A was at {:p} and C is at {:p}", ptr_a, ptr_c);
        }

        // Thread example test
        let t1 = thread::spawn(|| {
            let _ = Box::new(222);
        });

        let t2 = thread::spawn(|| {
            let _ = Box::new(222);
        });

        t1.join().unwrap();
        t2.join().unwrap();

        println!("{:?}", ALLOCATOR.stats());
    }
}

fn main() {
    #[cfg(unix)]
    demo::run();

    #[cfg(not(unix))]
    println!("The program break is only available on unix");
}
