use holdall::types::Holder;
use holdall::types::Key;
use loom::thread;
use triomphe::Arc;

#[test]
fn concurrent_mints_at_one_level_are_unique() {
  loom::model(|| {
    let holder: Arc<Holder> = Arc::new(Holder::new());

    let t1 = {
      let holder: Arc<Holder> = Arc::clone(&holder);

      thread::spawn(move || holder.request_key::<u64>().unwrap().index())
    };

    let t2 = {
      let holder: Arc<Holder> = Arc::clone(&holder);

      thread::spawn(move || holder.request_key::<u64>().unwrap().index())
    };

    let a: u16 = t1.join().unwrap();
    let b: u16 = t2.join().unwrap();

    assert_ne!(a, b, "Concurrent mints produced the same index!");
    assert_eq!(a.max(b), 1, "Indices are not dense!");
  });
}

#[test]
fn concurrent_mints_reserve_deeper_levels() {
  loom::model(|| {
    let root: Arc<Holder> = Arc::new(Holder::new());
    let child: Arc<Holder> = Arc::new(root.derive(false).unwrap());
    let leaf: Holder = child.derive(false).unwrap();

    let t1 = {
      let root: Arc<Holder> = Arc::clone(&root);

      thread::spawn(move || {
        let key: Key<u64> = root.request_key().unwrap();
        key.index()
      })
    };

    let t2 = {
      let child: Arc<Holder> = Arc::clone(&child);

      thread::spawn(move || {
        let key: Key<u64> = child.request_key().unwrap();
        key.index()
      })
    };

    let _a: u16 = t1.join().unwrap();
    let _b: u16 = t2.join().unwrap();

    // Both mints advanced every deeper lane, so a later mint at the leaf
    // level must land past both of them.
    let late: Key<u64> = leaf.request_key().unwrap();

    assert_eq!(late.index(), 2, "Deeper lane missed a reservation!");
  });
}
