use levelmutex::{
    JustReturn, LevelLock, MutexContainer, SleepLevelMutex, SpinLevelMutex, count_held,
    multi_lock, multi_unlock,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

type Mutex<const L: u32> = SpinLevelMutex<L, JustReturn>;

const ROUNDS: usize = 2_000;

#[test]
fn test_opposite_order_batches_do_not_deadlock() {
    let a = Arc::new(Mutex::<5>::new());
    let b = Arc::new(Mutex::<5>::new());
    let busy = Arc::new(AtomicBool::new(false));
    let rounds = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let a = a.clone();
            let b = b.clone();
            let busy = busy.clone();
            let rounds = rounds.clone();

            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let mut group: MutexContainer<'_> = if n % 2 == 0 {
                        vec![&*a, &*b]
                    } else {
                        vec![&*b, &*a]
                    };

                    multi_lock(&mut group).unwrap();
                    assert!(!busy.swap(true, Ordering::SeqCst), "batch held twice");
                    rounds.fetch_add(1, Ordering::Relaxed);
                    busy.store(false, Ordering::SeqCst);
                    multi_unlock(&mut group).unwrap();
                }
                assert_eq!(count_held(), 0);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(rounds.load(Ordering::Relaxed), 4 * ROUNDS);
    assert!(!a.is_locked() && !b.is_locked());
}

#[test]
fn test_nested_levels_exclude_each_other() {
    let outer = Arc::new(Mutex::<10>::new());
    let inner = Arc::new(Mutex::<5>::new());
    let inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let outer = outer.clone();
            let inner = inner.clone();
            let inside = inside.clone();

            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    // Half the threads only need the inner mutex.
                    if n % 2 == 0 {
                        outer.lock().unwrap();
                    }
                    inner.lock().unwrap();

                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    assert!(inner.is_locked_by_current_thread());
                    assert!(!inner.is_locked_by_another_thread());
                    inside.fetch_sub(1, Ordering::SeqCst);

                    inner.unlock().unwrap();
                    if n % 2 == 0 {
                        outer.unlock().unwrap();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_sleeping_mutex_hands_over() {
    let m = Arc::new(SleepLevelMutex::<3, JustReturn>::new());
    m.raw().set_sleep_time(Duration::from_micros(200));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let m = m.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    m.lock().unwrap();
                    assert_eq!(m.lock_count(), 1);
                    m.unlock().unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!m.is_locked());
}

#[test]
fn test_owner_is_visible_to_other_threads() {
    let m = Arc::new(Mutex::<3>::new());

    let holder = {
        let m = m.clone();
        thread::spawn(move || {
            m.lock().unwrap();
            m.lock().unwrap();
            let id = m.id();
            m.unlock().unwrap();
            m.unlock().unwrap();
            id
        })
    };

    assert_eq!(holder.join().unwrap(), m.id());
    assert!(!m.is_locked_by_another_thread());
    assert_eq!(m.lock_count(), 0);
}
