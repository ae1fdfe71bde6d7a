extern crate larder;
extern crate rand;
extern crate uuid;

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use larder::prelude::*;
use rand::Rng;
use uuid::Uuid;

use self::common::*;

fn payloads_converge(asynchronous: bool) {
    let codec = MockCodec::new();
    codec.insert("res.asset", MockFile::new().delay(50));

    let resources = Arc::new(threaded(&codec));
    let barrier = Arc::new(Barrier::new(8));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let resources = resources.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let handle = if asynchronous {
                    let handle = resources.load_async("res.asset");
                    resources.block_until_loaded(&handle);
                    handle
                } else {
                    resources.load("res.asset").unwrap()
                };

                let payload = resources.get(&handle).unwrap();
                (handle, payload)
            })
        })
        .collect();

    let results: Vec<_> = threads.into_iter().map(|v| v.join().unwrap()).collect();
    assert_eq!(codec.decodes("res.asset"), 1);

    let (handle, payload) = &results[0];
    for (h, p) in &results[1..] {
        assert_eq!(h, handle);
        assert!(Arc::ptr_eq(p, payload));
    }

    assert_eq!(handle.internal_ref_count(), 8);
}

#[test]
fn load_async_converges() {
    payloads_converge(true);
}

#[test]
fn load_converges() {
    payloads_converge(false);
}

#[test]
fn decodes_on_workers() {
    let codec = MockCodec::new();
    codec.insert("async.res", MockFile::new());
    codec.insert("sync.res", MockFile::new().sync_only());

    let resources = threaded(&codec);
    let handle = resources.load_async("async.res");
    resources.block_until_loaded(&handle);

    let threads = codec.decoding_threads("async.res");
    assert_eq!(threads.len(), 1);
    assert!(threads[0]
        .as_ref()
        .map(|v| v.starts_with("larder-worker"))
        .unwrap_or(false));

    // Resources that could not be decoded asynchronously are decoded by the caller.
    let handle = resources.load_async("sync.res");
    assert!(resources.get(&handle).is_some());
    assert_eq!(
        codec.decoding_threads("sync.res"),
        vec![thread::current().name().map(|v| v.to_owned())]
    );
}

#[test]
fn blocking_upgrade() {
    let codec = MockCodec::new();
    codec.insert("slow.res", MockFile::new().delay(200));

    let resources = threaded(&codec);
    let handle = resources.load_async("slow.res");
    assert!(resources.is_loaded(handle.uuid(), true));

    let again = resources.load("slow.res").unwrap();
    assert_eq!(again, handle);
    assert!(resources.get(&again).is_some());
    assert!(resources.is_loaded(handle.uuid(), false));
    assert_eq!(codec.decodes("slow.res"), 1);
}

#[test]
fn destroy_in_flight() {
    let codec = MockCodec::new();
    codec.insert("slow.res", MockFile::new().delay(200));

    let resources = threaded(&codec);
    let recorder = Arc::new(Recorder::default());
    resources.subscribe(recorder.clone());

    let handle = resources.load_async("slow.res");
    resources.destroy(&handle);

    assert_eq!(codec.decodes("slow.res"), 1);
    assert_eq!(recorder.loaded(), vec![handle.uuid()]);
    assert_eq!(recorder.destroyed(), vec![handle.uuid()]);
    assert!(!resources.is_loaded(handle.uuid(), true));
    assert_eq!(resources.state(&handle), ResourceState::Err);
    assert!(resources.get(&handle).is_none());
}

#[test]
fn release_in_flight() {
    let codec = MockCodec::new();
    codec.insert("slow.res", MockFile::new().delay(200));

    let resources = threaded(&codec);
    let recorder = Arc::new(Recorder::default());
    resources.subscribe(recorder.clone());

    let handle = resources.load_async("slow.res");
    let uuid = handle.uuid();
    resources.release(handle);

    assert_eq!(codec.decodes("slow.res"), 1);
    assert_eq!(recorder.loaded(), vec![uuid]);
    assert_eq!(recorder.destroyed(), vec![uuid]);
    assert!(!resources.is_loaded(uuid, true));
}

#[derive(Default)]
struct SlowAnnouncer {
    observed: AtomicBool,
    listened: AtomicBool,
}

impl ResourceObserver for SlowAnnouncer {
    fn on_loaded(&self, _: &ResourceHandle) {
        thread::sleep(Duration::from_millis(100));
        self.observed.store(true, Ordering::SeqCst);
    }
}

impl ResourceListener for SlowAnnouncer {
    fn on_resource_loaded(&self, _: Uuid) {
        thread::sleep(Duration::from_millis(100));
        self.listened.store(true, Ordering::SeqCst);
    }
}

#[test]
fn joined_loads_return_after_announcing() {
    let codec = MockCodec::new();
    codec.insert("slow.res", MockFile::new().delay(200));

    let resources = threaded(&codec);
    let uuid = register(&resources, "slow.res");

    let announcer = Arc::new(SlowAnnouncer::default());
    resources.subscribe(announcer.clone());
    resources.listeners().add(uuid, announcer.clone());

    // The worker finishes the load, and announces it on behalf of the blocked caller.
    let handle = resources.load_async("slow.res");
    let again = resources.load("slow.res").unwrap();
    assert_eq!(again, handle);
    assert!(announcer.observed.load(Ordering::SeqCst));
    assert!(announcer.listened.load(Ordering::SeqCst));
    assert_eq!(codec.decodes("slow.res"), 1);
}

#[derive(Default)]
struct SlowDestroy {
    destroying: AtomicBool,
    loaded: AtomicUsize,
}

impl ResourceObserver for SlowDestroy {
    fn on_loaded(&self, _: &ResourceHandle) {
        self.loaded.fetch_add(1, Ordering::SeqCst);
    }

    fn on_destroyed(&self, _: &ResourceHandle) {
        self.destroying.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(200));
    }
}

fn referenced_while_destroying<F>(collect: F)
where
    F: FnOnce(&Resources, ResourceHandle) + Send + 'static,
{
    let codec = MockCodec::new();
    codec.insert("x.res", MockFile::new());

    let resources = Arc::new(threaded(&codec));
    let observer = Arc::new(SlowDestroy::default());
    resources.subscribe(observer.clone());

    let handle = resources.load("x.res").unwrap();
    let collector = {
        let resources = resources.clone();
        thread::spawn(move || collect(&*resources, handle))
    };

    wait_until(|| observer.destroying.load(Ordering::SeqCst));
    let handle = resources.load("x.res").unwrap();
    collector.join().unwrap();

    assert_eq!(resources.state(&handle), ResourceState::Ok);
    assert!(resources.get(&handle).is_some());
    assert!(resources.is_loaded(handle.uuid(), false));
    assert!(handle.internal_ref_count() > 0);
    assert_eq!(codec.decodes("x.res"), 1);

    // The resource survived, so it is announced again.
    assert_eq!(observer.loaded.load(Ordering::SeqCst), 2);
}

#[test]
fn unload_all_unused_keeps_reloaded() {
    referenced_while_destroying(|resources, handle| {
        drop(handle);
        resources.unload_all_unused();
    });
}

#[test]
fn release_keeps_reloaded() {
    referenced_while_destroying(|resources, handle| resources.release(handle));
}

#[test]
fn missing_file_while_loading() {
    let codec = MockCodec::new();
    codec.insert("gone.res", MockFile::new().delay(200));

    let resources = threaded(&codec);
    let handle = resources.load_async("gone.res");
    wait_until(|| codec.decodes("gone.res") == 1);
    thread::sleep(Duration::from_millis(50));
    codec.remove("gone.res");

    // The pending load has read the file already, the caller joins it.
    let again = resources.load("gone.res").unwrap();
    assert_eq!(again, handle);
    assert_eq!(resources.state(&again), ResourceState::Ok);
    assert!(resources.get(&again).is_some());
    assert_eq!(codec.decodes("gone.res"), 1);
}

#[test]
fn async_errors() {
    let codec = MockCodec::new();
    codec.insert("corrupted.res", MockFile::new().corrupted());
    codec.insert("panics.res", MockFile::new().panics());

    let resources = threaded(&codec);
    for path in &["corrupted.res", "panics.res"] {
        let handle = resources.load_async(path);
        resources.block_until_loaded(&handle);
        assert_eq!(resources.state(&handle), ResourceState::Err);
        assert_eq!(handle.internal_ref_count(), 0);
    }

    // The workers survive panicking decoders.
    codec.insert("ok.res", MockFile::new());
    let handle = resources.load_async("ok.res");
    resources.block_until_loaded(&handle);
    assert_eq!(resources.state(&handle), ResourceState::Ok);
}

#[test]
fn stress() {
    let codec = MockCodec::new();
    let resources = Arc::new(threaded(&codec));

    let uuids: Vec<_> = (0..16)
        .map(|i| register(&resources, format!("{}.res", i)))
        .collect();

    for i in 0..16 {
        let dependencies: Vec<_> = (0..i).filter(|v| v % 3 == 0).map(|v| uuids[v]).collect();
        codec.insert(format!("{}.res", i), MockFile::new().depends_on(&dependencies));
    }

    let (tx, rx) = mpsc::channel();
    let mut threads = Vec::new();
    for _ in 0..8 {
        let resources = resources.clone();
        let tx = tx.clone();
        let t = thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for _ in 0..64 {
                let path = format!("{}.res", rng.gen_range(0, 16));
                match rng.gen_range(0, 4) {
                    0 => {
                        resources.load(&path).unwrap();
                    }
                    1 => {
                        let handle = resources.load_async(&path);
                        resources.block_until_loaded(&handle);
                    }
                    2 => {
                        let handle = resources.load_async(&path);
                        resources.release(handle);
                    }
                    _ => resources.unload_all_unused(),
                }
            }

            tx.send(()).unwrap();
        });

        threads.push(t);
    }

    for _ in 0..threads.len() {
        rx.recv_timeout(Duration::from_secs(10))
            .expect("deadlock found!");
    }

    for t in threads {
        t.join().unwrap();
    }

    resources.unload_all();
    for uuid in uuids {
        assert!(!resources.is_loaded(uuid, true));
    }
}
