use super::*;
use anyhow::Result;
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

// -------------------- Helpers --------------------

#[derive(Debug)]
struct MockWriter {
    id: usize,
}

#[derive(Default)]
struct MockFactory {
    next: AtomicUsize,
    fail_next: AtomicBool,
    destroyed: Mutex<Vec<usize>>,
}

impl WriterFactory for Arc<MockFactory> {
    type Writer = MockWriter;
    type Error = io::Error;

    fn create(&self) -> Result<MockWriter, io::Error> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "no storage"));
        }
        Ok(MockWriter {
            id: self.next.fetch_add(1, Ordering::SeqCst),
        })
    }

    fn destroy(&self, writer: MockWriter) -> Result<(), io::Error> {
        self.destroyed.lock().unwrap().push(writer.id);
        Ok(())
    }
}

fn pool(max_active: usize, max_wait: Duration) -> (WriterPool<Arc<MockFactory>>, Arc<MockFactory>) {
    let factory = Arc::new(MockFactory::default());
    let pool = WriterPool::new(
        Arc::clone(&factory),
        PoolParameters {
            max_active,
            max_wait,
        },
    );
    (pool, factory)
}

// -------------------- Checkout / release --------------------

#[test]
fn writers_are_created_lazily_and_reused() {
    let (pool, factory) = pool(3, Duration::from_secs(1));
    assert_eq!(pool.stats().live, 0);

    let first_id = {
        let w = pool.checkout().unwrap();
        assert_eq!(pool.stats().checked_out, 1);
        w.id
    };
    assert_eq!(pool.stats().idle, 1);

    let w = pool.checkout().unwrap();
    assert_eq!(w.id, first_id);
    assert_eq!(factory.next.load(Ordering::SeqCst), 1);
    pool.release(w);
    assert_eq!(pool.stats().created, 1);
}

#[test]
fn live_writers_never_exceed_max_active() {
    let (pool, _) = pool(2, Duration::from_millis(20));
    let a = pool.checkout().unwrap();
    let b = pool.checkout().unwrap();
    assert_ne!(a.id, b.id);

    assert!(matches!(pool.checkout(), Err(PoolError::Timeout { .. })));
    let stats = pool.stats();
    assert_eq!(stats.live, 2);
    assert_eq!(stats.timeouts, 1);
}

#[test]
fn third_caller_blocks_until_release() {
    let (pool, _) = pool(2, Duration::from_secs(10));
    let a = pool.checkout().unwrap();
    let _b = pool.checkout().unwrap();
    let held = a.id;

    thread::scope(|s| {
        let (tx, rx) = mpsc::channel();
        let pool = &pool;
        s.spawn(move || {
            let w = pool.checkout().unwrap();
            tx.send(w.id).unwrap();
        });

        thread::sleep(Duration::from_millis(100));
        assert!(rx.try_recv().is_err(), "third checkout did not block");

        drop(a);
        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, held);
    });
}

#[test]
fn timeout_waits_at_least_max_wait() {
    let max_wait = Duration::from_millis(150);
    let (pool, _) = pool(1, max_wait);
    let _held = pool.checkout().unwrap();

    let start = Instant::now();
    let err = pool.checkout().unwrap_err();
    assert!(start.elapsed() >= max_wait);
    assert!(matches!(err, PoolError::Timeout { waited } if waited == max_wait));
}

#[test]
fn timeout_has_no_side_effects() {
    let (pool, factory) = pool(1, Duration::from_millis(10));
    let held = pool.checkout().unwrap();
    assert!(pool.checkout_timeout(Duration::from_millis(5)).is_err());
    drop(held);

    let stats = pool.stats();
    assert_eq!(stats.live, 1);
    assert_eq!(stats.idle, 1);
    assert_eq!(factory.next.load(Ordering::SeqCst), 1);
}

#[test]
fn checked_out_writer_is_exclusive() {
    let (pool, _) = pool(3, Duration::from_secs(10));
    let in_use: Mutex<HashSet<usize>> = Mutex::new(HashSet::new());

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..200 {
                    let w = pool.checkout().unwrap();
                    assert!(in_use.lock().unwrap().insert(w.id), "writer {} handed out twice", w.id);
                    assert!(pool.stats().live <= 3);
                    thread::yield_now();
                    in_use.lock().unwrap().remove(&w.id);
                }
            });
        }
    });

    assert!(pool.stats().created <= 3);
}

#[test]
fn unbounded_wait_blocks_until_release() {
    let (pool, _) = pool(1, Duration::MAX);
    let held = pool.checkout().unwrap();
    let held_id = held.id;
    assert!(format!("{:?}", held).contains("PooledWriter"));

    thread::scope(|s| {
        let (tx, rx) = mpsc::channel();
        let pool = &pool;
        s.spawn(move || {
            let w = pool.checkout_timeout(Duration::MAX).unwrap();
            tx.send(w.id).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err());
        drop(held);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), held_id);
    });
    assert_eq!(pool.stats().timeouts, 0);
}

// -------------------- Failure & lifecycle --------------------

#[test]
fn creation_failure_frees_the_slot() {
    let (pool, factory) = pool(1, Duration::from_millis(50));
    factory.fail_next.store(true, Ordering::SeqCst);

    assert!(matches!(pool.checkout(), Err(PoolError::WriterCreation(_))));
    assert_eq!(pool.stats().live, 0);

    let w = pool.checkout().unwrap();
    assert_eq!(w.id, 0);
}

#[test]
fn evict_destroys_and_frees_slot() {
    let (pool, factory) = pool(1, Duration::from_millis(50));
    let w = pool.checkout().unwrap();
    let id = w.id;
    pool.evict(w);

    assert_eq!(*factory.destroyed.lock().unwrap(), vec![id]);
    assert_eq!(pool.stats().live, 0);

    let w = pool.checkout().unwrap();
    assert_ne!(w.id, id);
}

#[test]
fn evict_frees_the_slot_of_the_owning_pool() {
    let (owner, owner_factory) = pool(1, Duration::from_millis(50));
    let (other, other_factory) = pool(1, Duration::from_millis(50));
    let _busy = other.checkout().unwrap();

    let w = owner.checkout().unwrap();
    other.evict(w);

    assert_eq!(owner.stats().live, 0);
    assert_eq!(owner_factory.destroyed.lock().unwrap().len(), 1);
    assert_eq!(other.stats().live, 1);
    assert!(other_factory.destroyed.lock().unwrap().is_empty());
    assert!(owner.checkout().is_ok());
}

#[test]
fn shutdown_destroys_idle_and_rejects_checkout() {
    let (pool, factory) = pool(3, Duration::from_millis(50));
    let a = pool.checkout().unwrap();
    let b = pool.checkout().unwrap();
    let b_id = b.id;
    drop(b);

    assert_eq!(pool.shutdown(), 1);
    assert_eq!(*factory.destroyed.lock().unwrap(), vec![b_id]);
    assert!(matches!(pool.checkout(), Err(PoolError::Closed)));

    // a checked-out writer is destroyed when it comes back
    let a_id = a.id;
    drop(a);
    assert!(factory.destroyed.lock().unwrap().contains(&a_id));
    let stats = pool.stats();
    assert_eq!(stats.live, 0);
    assert!(stats.closed);
}

#[test]
fn shutdown_wakes_waiters() {
    let (pool, _) = pool(1, Duration::from_secs(30));
    let _held = pool.checkout().unwrap();

    thread::scope(|s| {
        let waiter = s.spawn(|| pool.checkout().map(|w| w.id));
        thread::sleep(Duration::from_millis(50));
        pool.shutdown();
        assert!(matches!(waiter.join().unwrap(), Err(PoolError::Closed)));
    });
}

#[test]
fn dropping_pool_destroys_idle_writers() {
    let (pool, factory) = pool(2, Duration::from_millis(50));
    {
        let _a = pool.checkout().unwrap();
        let _b = pool.checkout().unwrap();
    }
    drop(pool);
    assert_eq!(factory.destroyed.lock().unwrap().len(), 2);
}

// -------------------- Real writers --------------------

#[test]
fn concurrent_producers_through_real_writers() -> Result<()> {
    use config::WriterParameters;
    use seqfile::{LocalBackend, SeqFileReader};
    use writer::Capture;

    let dir = tempfile::tempdir()?;
    let settings = WriterParameters {
        prefix: Some("POOL".to_string()),
        max_size: Some(8 * 1024),
        ..WriterParameters::default()
    }
    .settings()?;
    let factory = CrawlWriterFactory::new(Arc::new(LocalBackend::new(dir.path())), settings);
    let pool = WriterPool::new(
        factory,
        PoolParameters {
            max_active: 3,
            max_wait: Duration::from_secs(10),
        },
    );

    thread::scope(|s| {
        for t in 0..6 {
            let pool = &pool;
            s.spawn(move || {
                for i in 0..50 {
                    let mut w = pool.checkout().unwrap();
                    w.write(
                        &format!("http://example.com/{}/{}", t, i),
                        b"\r\n",
                        Capture::empty(),
                        Capture::from_bytes(&[b'x'; 300]),
                    )
                    .unwrap();
                }
            });
        }
    });
    assert!(pool.stats().created <= 3);
    pool.shutdown();

    let mut total = 0;
    for entry in std::fs::read_dir(dir.path().join("crawl"))? {
        let path = entry?.path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(!name.ends_with(".open"), "{} was never finalized", name);
        total += SeqFileReader::open(&path)?.read_all()?.len();
    }
    assert_eq!(total, 300);
    Ok(())
}

#[test]
fn factory_from_config_validates_endpoint_and_prefix() {
    let cfg = config::Config::default();
    assert!(matches!(
        CrawlWriterFactory::from_config(&cfg),
        Err(PoolError::Backend(_))
    ));

    let mut cfg = config::Config::default();
    cfg.writer.endpoint = "local".to_string();
    assert!(matches!(
        CrawlWriterFactory::from_config(&cfg),
        Err(PoolError::Config(ConfigError::NotConfigured(_)))
    ));
}
