use holdall::types::Holder;
use holdall::types::Key;
use loom::thread;
use std::sync::Arc as StdArc;
use triomphe::Arc;

/// Mints `count` keys and warms the array so the model stays on the
/// lock-free fast path.
fn warmed(count: usize) -> (Holder, Vec<Key<u64>>) {
  let holder: Holder = Holder::new();
  let keys: Vec<Key<u64>> = (0..count)
    .map(|_| holder.request_key().unwrap())
    .collect();

  // Touching the last slot allocates for every earlier one too.
  holder.set(keys.last().unwrap(), 0).unwrap();

  (holder, keys)
}

#[test]
fn concurrent_sets_on_distinct_keys() {
  loom::model(|| {
    let (holder, keys) = warmed(2);
    let holder: Arc<Holder> = Arc::new(holder);

    let t1 = {
      let holder: Arc<Holder> = Arc::clone(&holder);
      let key: Key<u64> = keys[0];

      thread::spawn(move || holder.set(&key, 11).unwrap())
    };

    let t2 = {
      let holder: Arc<Holder> = Arc::clone(&holder);
      let key: Key<u64> = keys[1];

      thread::spawn(move || holder.set(&key, 22).unwrap())
    };

    t1.join().unwrap();
    t2.join().unwrap();

    assert_eq!(*holder.get(&keys[0]).unwrap().unwrap(), 11);
    assert_eq!(*holder.get(&keys[1]).unwrap().unwrap(), 22);
  });
}

#[test]
fn concurrent_sets_on_one_key_serialize() {
  loom::model(|| {
    let (holder, keys) = warmed(1);
    let holder: Arc<Holder> = Arc::new(holder);
    let key: Key<u64> = keys[0];

    let t1 = {
      let holder: Arc<Holder> = Arc::clone(&holder);

      thread::spawn(move || holder.set(&key, 1).unwrap())
    };

    let t2 = {
      let holder: Arc<Holder> = Arc::clone(&holder);

      thread::spawn(move || holder.set(&key, 2).unwrap())
    };

    let p1: Option<StdArc<u64>> = t1.join().unwrap();
    let p2: Option<StdArc<u64>> = t2.join().unwrap();

    // The two writes form a total order over the warm-up value: one
    // displaced 0, the other displaced its rival.
    let final_value: u64 = *holder.get(&key).unwrap().unwrap();
    let priors: (u64, u64) = (*p1.unwrap(), *p2.unwrap());

    assert!(
      priors == (0, 1) || priors == (2, 0),
      "Writes did not serialize: {priors:?}",
    );

    match priors {
      (0, 1) => assert_eq!(final_value, 2),
      _ => assert_eq!(final_value, 1),
    }
  });
}

#[test]
fn set_if_absent_has_a_single_winner() {
  loom::model(|| {
    let (holder, keys) = warmed(2);
    let holder: Arc<Holder> = Arc::new(holder);

    // Slot 0 was never written during warm-up.
    let key: Key<u64> = keys[0];

    let t1 = {
      let holder: Arc<Holder> = Arc::clone(&holder);

      thread::spawn(move || holder.set_if_absent(&key, 1).unwrap())
    };

    let t2 = {
      let holder: Arc<Holder> = Arc::clone(&holder);

      thread::spawn(move || holder.set_if_absent(&key, 2).unwrap())
    };

    let w1: bool = t1.join().unwrap();
    let w2: bool = t2.join().unwrap();

    assert_ne!(w1, w2, "Both threads won (or lost) the empty slot!");

    let expected: u64 = if w1 { 1 } else { 2 };
    assert_eq!(*holder.get(&key).unwrap().unwrap(), expected);
  });
}

#[test]
fn reads_race_writes_without_tearing() {
  loom::model(|| {
    let (holder, keys) = warmed(1);
    let holder: Arc<Holder> = Arc::new(holder);
    let key: Key<u64> = keys[0];

    let writer = {
      let holder: Arc<Holder> = Arc::clone(&holder);

      thread::spawn(move || {
        holder.set(&key, 7).unwrap();
      })
    };

    let reader = {
      let holder: Arc<Holder> = Arc::clone(&holder);

      thread::spawn(move || *holder.get(&key).unwrap().unwrap())
    };

    writer.join().unwrap();
    let seen: u64 = reader.join().unwrap();

    assert!(seen == 0 || seen == 7, "Fabricated value {seen}!");
    assert_eq!(*holder.get(&key).unwrap().unwrap(), 7);
  });
}
