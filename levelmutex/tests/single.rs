use levelmutex::{
    ErrorKind, JustReturn, Level, LevelLock, SpinLevelMutex, count_held, count_locks,
    current_level, current_mutex_id, validate,
};
use std::time::Duration;

type Mutex<const L: u32> = SpinLevelMutex<L, JustReturn>;

#[test]
fn test_nested_levels_round_trip() {
    let outer: Mutex<10> = Mutex::new();
    let inner: Mutex<5> = Mutex::new();

    outer.lock().unwrap();
    inner.lock().unwrap();
    assert_eq!(current_level(), Level::new(5));
    assert_eq!(current_mutex_id(), Some(inner.id()));

    inner.unlock().unwrap();
    assert_eq!(current_level(), Level::new(10));

    outer.unlock().unwrap();
    assert_eq!(current_level(), Level::UNLOCKED);
    assert_eq!(current_mutex_id(), None);
    assert!(validate());
}

#[test]
fn test_locking_upwards_is_rejected() {
    let outer: Mutex<10> = Mutex::new();
    let inner: Mutex<5> = Mutex::new();

    inner.lock().unwrap();

    let err = outer.lock().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LevelTooHigh);
    assert_eq!(err.level(), Level::new(10));
    assert!(!outer.is_locked());

    assert_eq!(inner.lock_count(), 1);
    assert_eq!(count_held(), 1);
    assert_eq!(current_level(), Level::new(5));

    inner.unlock().unwrap();
}

#[test]
fn test_try_and_timed_lock_check_levels_first() {
    let outer: Mutex<10> = Mutex::new();
    let inner: Mutex<5> = Mutex::new();

    inner.lock().unwrap();
    assert_eq!(outer.try_lock().unwrap_err().kind(), ErrorKind::LevelTooHigh);
    assert_eq!(
        outer
            .lock_timeout(Duration::from_millis(5))
            .unwrap_err()
            .kind(),
        ErrorKind::LevelTooHigh
    );
    inner.unlock().unwrap();

    assert_eq!(count_held(), 0);
}

#[test]
fn test_reentrant_round_trip() {
    let m: Mutex<8> = Mutex::new();

    for depth in 1..=4 {
        m.lock().unwrap();
        assert_eq!(m.lock_count(), depth);
    }
    m.try_lock().unwrap();
    m.lock_timeout(Duration::from_millis(1)).unwrap();
    assert_eq!(m.lock_count(), 6);
    assert_eq!(count_held(), 1);
    assert_eq!(count_locks(), 6);

    for depth in (0..6).rev() {
        m.unlock().unwrap();
        assert_eq!(m.lock_count(), depth);
    }

    assert!(!m.is_locked());
    assert_eq!(count_held(), 0);
    assert_eq!(current_level(), Level::UNLOCKED);
}

#[test]
fn test_same_level_peer_needs_a_batch() {
    let a: Mutex<7> = Mutex::new();
    let b: Mutex<7> = Mutex::new();

    a.lock().unwrap();
    assert_eq!(b.lock().unwrap_err().kind(), ErrorKind::LevelTooHigh);
    assert_eq!(b.try_lock().unwrap_err().kind(), ErrorKind::LevelTooHigh);
    assert!(!b.is_locked());
    a.unlock().unwrap();
}

#[test]
fn test_unlock_errors() {
    let outer: Mutex<10> = Mutex::new();
    let inner: Mutex<5> = Mutex::new();

    assert_eq!(outer.unlock().unwrap_err().kind(), ErrorKind::WasntLocked);

    outer.lock().unwrap();
    inner.lock().unwrap();

    // Releasing out of order is reported and changes nothing.
    assert_eq!(outer.unlock().unwrap_err().kind(), ErrorKind::LevelTooHigh);
    assert_eq!(outer.lock_count(), 1);

    inner.unlock().unwrap();
    assert_eq!(inner.unlock().unwrap_err().kind(), ErrorKind::WasntLocked);

    let deeper: Mutex<3> = Mutex::new();
    deeper.lock().unwrap();
    deeper.unlock().unwrap();

    outer.unlock().unwrap();
    assert!(validate());
}

#[test]
fn test_unlock_of_foreign_mutex() {
    let high: Mutex<10> = Mutex::new();
    let low: Mutex<2> = Mutex::new();

    // Left locked by a thread that has exited.
    std::thread::scope(|s| {
        s.spawn(|| low.lock().unwrap()).join().unwrap();
    });

    high.lock().unwrap();
    assert_eq!(low.unlock().unwrap_err().kind(), ErrorKind::LevelTooLow);
    high.unlock().unwrap();

    let other = Mutex::<2>::new();
    other.lock().unwrap();
    assert_eq!(
        low.unlock().unwrap_err().kind(),
        ErrorKind::NotLockedByThread
    );
    other.unlock().unwrap();
    assert!(low.is_locked());
}

#[test]
fn test_mutex_queries() {
    let outer: Mutex<10> = Mutex::new();
    let inner: Mutex<5> = Mutex::with_level(Level::new(4));

    assert_eq!(inner.level(), Level::new(4));
    assert!(!outer.is_locked_by_current_thread());
    assert!(!outer.is_locked_by_another_thread());

    outer.lock().unwrap();
    inner.lock().unwrap();

    assert!(outer.is_locked_by_current_thread());
    assert!(!outer.is_locked_by_another_thread());
    assert!(inner.is_recent_lock());
    assert!(!outer.is_recent_lock());
    assert!(outer.is_recent_lock_within(2));
    assert!(!outer.is_recent_lock_within(1));

    inner.unlock().unwrap();
    outer.unlock().unwrap();
}

#[test]
fn test_try_lock_reports_foreign_holder() {
    let m: Mutex<6> = Mutex::new();

    std::thread::scope(|s| {
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let m = &m;

        s.spawn(move || {
            m.lock().unwrap();
            locked_tx.send(()).unwrap();
            done_rx.recv().unwrap();
            m.unlock().unwrap();
        });

        locked_rx.recv().unwrap();
        assert!(m.is_locked_by_another_thread());
        assert!(!m.is_locked_by_current_thread());
        assert_eq!(m.try_lock().unwrap_err().kind(), ErrorKind::AlreadyLocked);
        assert_eq!(
            m.lock_timeout(Duration::from_millis(20)).unwrap_err().kind(),
            ErrorKind::TimedOut
        );
        assert_eq!(count_held(), 0);

        done_tx.send(()).unwrap();
    });

    m.try_lock().unwrap();
    m.unlock().unwrap();
}

#[test]
fn test_unbounded_timeout_blocks() {
    let m: Mutex<6> = Mutex::new();

    m.lock_timeout(Duration::MAX).unwrap();
    assert!(m.is_locked_by_current_thread());
    assert_eq!(current_level(), Level::new(6));

    // Re-entry takes the same path.
    m.lock_timeout(Duration::MAX).unwrap();
    assert_eq!(m.lock_count(), 2);

    m.unlock().unwrap();
    m.unlock().unwrap();
    assert_eq!(count_held(), 0);
}

#[test]
fn test_busy_peer_is_still_a_level_violation() {
    let a: Mutex<5> = Mutex::new();
    let b: Mutex<5> = Mutex::new();

    std::thread::scope(|s| {
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let b = &b;

        s.spawn(move || {
            b.lock().unwrap();
            locked_tx.send(()).unwrap();
            done_rx.recv().unwrap();
            b.unlock().unwrap();
        });

        locked_rx.recv().unwrap();
        a.lock().unwrap();

        // The level order is checked before anyone else's hold on `b`.
        assert_eq!(b.try_lock().unwrap_err().kind(), ErrorKind::LevelTooHigh);
        assert_eq!(
            b.lock_timeout(Duration::from_millis(5)).unwrap_err().kind(),
            ErrorKind::LevelTooHigh
        );
        assert_eq!(count_held(), 1);
        assert!(validate());

        a.unlock().unwrap();
        done_tx.send(()).unwrap();
    });
}
