// Memory Pools Integration Test
//
// Drives the arena pool and the slab pool the way the server does per
// request: bulk allocation, buffers handed out from pool memory, cleanup
// handlers bound to the request lifetime, and slab chunks shared across
// operations under one mutex.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use rusty_http_core::common::BufFlags;
use rusty_http_core::memory::{Pool, SlabPool, PAGE_SIZE};

#[test]
fn request_pool_lifecycle() {
    let events: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    {
        let pool = Pool::new(8 * 1024).unwrap();

        // Header buffer and body scratch out of the same pool.
        let header = pool.create_temp_buf(1024).unwrap();
        assert!(header.flags.contains(BufFlags::TEMPORARY));
        assert!(header.validate().is_ok());

        let scratch = pool.calloc(512).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(scratch.as_ptr(), 512) };
        assert!(bytes.iter().all(|&b| b == 0));

        // An oversize body lands on the side list and can be released
        // before the request finishes.
        let body = pool.alloc(PAGE_SIZE * 4).unwrap();
        pool.free(body).unwrap();

        let log = Rc::clone(&events);
        pool.add_cleanup(move || log.borrow_mut().push("request done".into()));
        let log = Rc::clone(&events);
        pool.add_cleanup(move || log.borrow_mut().push("connection closed".into()));
    }
    // LIFO: the later registration runs first.
    assert_eq!(
        *events.borrow(),
        vec!["connection closed".to_string(), "request done".to_string()]
    );
}

#[test]
fn pool_reset_reuses_block_memory() {
    let pool = Pool::new(4 * 1024).unwrap();
    let mut first_round = Vec::new();
    for _ in 0..8 {
        first_round.push(pool.alloc(256).unwrap().as_ptr() as usize);
    }
    pool.reset();
    for &expected in &first_round {
        assert_eq!(pool.alloc(256).unwrap().as_ptr() as usize, expected);
    }
}

#[test]
fn slab_pool_shared_across_threads() {
    let pool = Arc::new(SlabPool::new(4 * 1024 * 1024).unwrap());
    let mut handles = Vec::new();

    for t in 0..4u8 {
        let pool = Arc::clone(&pool);
        handles.push(std::thread::spawn(move || {
            let mut chunks = Vec::new();
            for i in 0..64usize {
                let size = 16 << (i % 4);
                let offset = pool.alloc(size).unwrap();
                unsafe { std::ptr::write_bytes(pool.chunk_ptr(offset), t, size) };
                chunks.push((offset, size));
            }
            for &(offset, size) in &chunks {
                let bytes =
                    unsafe { std::slice::from_raw_parts(pool.chunk_ptr(offset), size) };
                assert!(bytes.iter().all(|&b| b == t), "chunk clobbered");
                pool.free(offset).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Everything went back; a large run is allocatable again.
    let run = pool.alloc(PAGE_SIZE * 8).unwrap();
    pool.free(run).unwrap();
}

#[test]
fn slab_grouped_critical_section() {
    let pool = SlabPool::new(1024 * 1024).unwrap();
    let offsets: Vec<usize> = {
        let mut shared = pool.lock();
        (0..16).map(|_| shared.alloc(96).unwrap()).collect()
    };
    let mut shared = pool.lock();
    for offset in offsets {
        shared.free(offset).unwrap();
    }
}
