#![allow(missing_docs)]
mod common;

use common::{env, fail_fast_env, no_tls_env, populate};
use signet_lmdb::*;
use std::{
    sync::{Arc, Barrier},
    thread::{self, JoinHandle},
};

fn read(txn: &Transaction<impl TransactionKind>, db: Database, key: &[u8]) -> Option<Vec<u8>> {
    txn.get(db, key).unwrap().map(|v| v.to_vec().unwrap())
}

#[test]
fn test_put_get_del() {
    let env = env();

    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    txn.put(db, b"key1", b"val1", WriteFlags::empty()).unwrap();
    txn.put(db, b"key2", b"val2", WriteFlags::empty()).unwrap();
    txn.put(db, b"key3", b"val3", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    assert_eq!(read(&txn, db, b"key1").as_deref(), Some(&b"val1"[..]));
    assert_eq!(read(&txn, db, b"key2").as_deref(), Some(&b"val2"[..]));
    assert_eq!(read(&txn, db, b"key3").as_deref(), Some(&b"val3"[..]));
    assert_eq!(read(&txn, db, b"key"), None);

    assert!(txn.del(db, b"key1", None).unwrap());
    assert!(!txn.del(db, b"key1", None).unwrap());
    assert_eq!(read(&txn, db, b"key1"), None);
    txn.commit().unwrap();
}

#[test]
fn test_empty_value() {
    let env = env();
    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();

    txn.put(db, b"empty", b"", WriteFlags::empty()).unwrap();
    let value = txn.get(db, b"empty").unwrap().unwrap();
    assert!(value.is_empty());
    assert_eq!(value.try_get().unwrap(), b"");
}

#[test]
fn test_put_no_overwrite() {
    let env = env();
    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();

    txn.put(db, b"key", b"val", WriteFlags::empty()).unwrap();
    let err = txn.put(db, b"key", b"val2", WriteFlags::NO_OVERWRITE).unwrap_err();
    assert_eq!(err, LmdbError::KeyExist);
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(read(&txn, db, b"key").as_deref(), Some(&b"val"[..]));
}

#[test]
fn test_put_get_del_multi() {
    let env = env();

    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_db(None, DatabaseFlags::DUP_SORT).unwrap();
    for (k, v) in [(b"key1", b"val1"), (b"key1", b"val2"), (b"key1", b"val3")] {
        txn.put(db, k, v, WriteFlags::empty()).unwrap();
    }
    for (k, v) in [(b"key2", b"val1"), (b"key2", b"val2"), (b"key2", b"val3")] {
        txn.put(db, k, v, WriteFlags::empty()).unwrap();
    }
    assert_eq!(
        txn.put(db, b"key1", b"val2", WriteFlags::NO_DUP_DATA).unwrap_err(),
        LmdbError::KeyExist
    );
    txn.commit().unwrap();

    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    assert!(txn.del(db, b"key1", Some(&b"val2"[..])).unwrap());
    assert!(!txn.del(db, b"key1", Some(&b"val2"[..])).unwrap());
    assert!(txn.del(db, b"key2", None).unwrap());
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    let mut cursor = txn.cursor(db).unwrap();
    let dups: Vec<_> = cursor.iter_dup_of(b"key1").map(|r| r.unwrap().1.to_vec().unwrap()).collect();
    assert_eq!(dups, vec![b"val1".to_vec(), b"val3".to_vec()]);
    assert!(cursor.iter_dup_of(b"key2").next().is_none());
}

#[test]
fn test_reserve() {
    let env = env();

    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    txn.with_reservation(db, b"key1", 4, WriteFlags::empty(), |buf| {
        buf.copy_from_slice(b"val1");
    })
    .unwrap();
    txn.commit().unwrap();

    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    assert_eq!(read(&txn, db, b"key1").as_deref(), Some(&b"val1"[..]));
    assert_eq!(read(&txn, db, b"key"), None);

    txn.del(db, b"key1", None).unwrap();
    assert_eq!(read(&txn, db, b"key1"), None);
}

#[test]
fn test_reserve_rejects_dup_sort() {
    let env = env();
    let txn = env.begin_rw_txn().unwrap();
    let db = txn.create_db(Some("dups"), DatabaseFlags::DUP_SORT).unwrap();

    let err = txn.with_reservation(db, b"key", 4, WriteFlags::empty(), |_| {}).unwrap_err();
    assert_eq!(err, LmdbError::ReserveOnDupSort);
}

#[test]
fn test_nested_txn() {
    let env = env();

    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    txn.put(db, b"key1", b"val1", WriteFlags::empty()).unwrap();

    {
        let mut nested = txn.begin_nested_txn().unwrap();
        assert!(nested.is_nested());
        nested.put(db, b"key2", b"val2", WriteFlags::empty()).unwrap();
        assert_eq!(read(&nested, db, b"key1").as_deref(), Some(&b"val1"[..]));
        assert_eq!(read(&nested, db, b"key2").as_deref(), Some(&b"val2"[..]));

        // the parent only accepts commit and abort while the child is open
        assert_eq!(txn.get(db, b"key1").unwrap_err(), LmdbError::ChildTransactionOpen);
        nested.abort().unwrap();
    }

    assert_eq!(read(&txn, db, b"key2"), None);

    {
        let mut nested = txn.begin_nested_txn().unwrap();
        nested.put(db, b"key3", b"val3", WriteFlags::empty()).unwrap();
        nested.commit().unwrap();
    }

    assert_eq!(read(&txn, db, b"key3").as_deref(), Some(&b"val3"[..]));
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    assert_eq!(read(&txn, db, b"key1").as_deref(), Some(&b"val1"[..]));
    assert_eq!(read(&txn, db, b"key3").as_deref(), Some(&b"val3"[..]));
}

#[test]
fn test_nested_commit_is_not_durable_alone() {
    let env = env();

    {
        let mut txn = env.begin_rw_txn().unwrap();
        let db = txn.open_db(None).unwrap();
        let mut nested = txn.begin_nested_txn().unwrap();
        nested.put(db, b"key", b"val", WriteFlags::empty()).unwrap();
        nested.commit().unwrap();
        txn.abort().unwrap();
    }

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    assert_eq!(read(&txn, db, b"key"), None);
}

#[test]
fn test_parent_commit_aborts_open_child() {
    let env = env();

    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    let mut nested = txn.begin_nested_txn().unwrap();
    nested.put(db, b"key", b"val", WriteFlags::empty()).unwrap();

    txn.commit().unwrap();
    assert_eq!(nested.state(), TxnState::Done);
    assert_eq!(
        nested.commit().unwrap_err(),
        LmdbError::BadTransactionState { expected: TxnState::Ready, actual: TxnState::Done }
    );
    drop(nested);

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    assert_eq!(read(&txn, db, b"key"), None);
}

#[test]
fn test_nested_handle_promoted_on_commit() {
    let env = env();

    let mut txn = env.begin_rw_txn().unwrap();
    {
        let mut nested = txn.begin_nested_txn().unwrap();
        let db = nested.create_db(Some("inner"), DatabaseFlags::empty()).unwrap();
        nested.put(db, b"k", b"v", WriteFlags::empty()).unwrap();
        nested.commit().unwrap();
    }
    txn.commit().unwrap();

    let names: Vec<_> = env.databases().into_iter().filter_map(|(name, _)| name).collect();
    assert_eq!(names, vec!["inner".to_owned()]);
}

#[test]
fn test_aborted_handle_is_discarded() {
    let env = env();

    let mut txn = env.begin_rw_txn().unwrap();
    txn.create_db(Some("gone"), DatabaseFlags::empty()).unwrap();
    txn.abort().unwrap();
    assert!(env.databases().is_empty());

    let txn = env.begin_ro_txn().unwrap();
    assert_eq!(txn.open_db(Some("gone")).unwrap_err(), LmdbError::NotFound);
}

#[test]
fn test_concurrent_open_in_flight() {
    let env = env();
    populate(&env, Some("a"), DatabaseFlags::empty(), &[]);
    populate(&env, Some("b"), DatabaseFlags::empty(), &[]);
    // forget the published handles so both transactions go to the engine
    for (_, db) in env.databases() {
        unsafe { env.close_db(db).unwrap() };
    }

    let writer = env.begin_rw_txn().unwrap();
    writer.open_db(Some("a")).unwrap();

    let reader = env.begin_ro_txn().unwrap();
    let err = reader.open_db(Some("b")).unwrap_err();
    assert_eq!(err, LmdbError::DbiOpenInProgress);
    assert_eq!(err.kind(), ErrorKind::IllegalUsage);

    drop(writer);
    reader.open_db(Some("b")).unwrap();
}

#[test]
fn test_clear_db() {
    let env = env();

    {
        let mut txn = env.begin_rw_txn().unwrap();
        let db = txn.open_db(None).unwrap();
        txn.put(db, b"key", b"val", WriteFlags::empty()).unwrap();
        assert!(!txn.get(db, b"key").unwrap().unwrap().is_empty());
        txn.commit().unwrap();
    }

    {
        let mut txn = env.begin_rw_txn().unwrap();
        let db = txn.open_db(None).unwrap();
        txn.clear_db(db).unwrap();
        txn.commit().unwrap();
    }

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    assert_eq!(read(&txn, db, b"key"), None);
}

#[test]
fn test_drop_db() {
    let env = env();

    {
        let mut txn = env.begin_rw_txn().unwrap();
        let db = txn.create_db(Some("test"), DatabaseFlags::empty()).unwrap();
        txn.put(db, b"key", b"val", WriteFlags::empty()).unwrap();
        txn.commit().unwrap();
    }

    {
        let mut txn = env.begin_rw_txn().unwrap();
        let db = txn.open_db(Some("test")).unwrap();
        txn.drop_db(db).unwrap();
        assert_eq!(txn.open_db(Some("test")).unwrap_err(), LmdbError::NotFound);
        txn.commit().unwrap();
    }

    assert!(env.databases().is_empty());
    let txn = env.begin_ro_txn().unwrap();
    assert_eq!(txn.open_db(Some("test")).unwrap_err(), LmdbError::NotFound);
}

#[test]
fn test_stale_value_after_write() {
    let env = env();
    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    txn.put(db, b"key", b"v1", WriteFlags::empty()).unwrap();

    let value = txn.get(db, b"key").unwrap().unwrap();
    assert_eq!(value.try_get().unwrap(), b"v1");

    txn.put(db, b"other", b"x", WriteFlags::empty()).unwrap();
    assert!(!value.is_valid());
    assert_eq!(value.to_vec().unwrap_err(), LmdbError::StaleValue);
    assert_eq!(value.enforce_valid().unwrap_err().kind(), ErrorKind::InvalidState);
}

#[test]
fn test_ended_transaction_rejects_calls() {
    let env = env();

    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    txn.commit().unwrap();

    let done = LmdbError::BadTransactionState { expected: TxnState::Ready, actual: TxnState::Done };
    assert_eq!(txn.get(db, b"key").unwrap_err(), done);
    assert_eq!(txn.put(db, b"key", b"val", WriteFlags::empty()).unwrap_err(), done);
    assert_eq!(txn.commit().unwrap_err(), done);
    assert_eq!(txn.abort().unwrap_err(), done);

    txn.close();
    txn.close();
    assert_eq!(txn.state(), TxnState::Released);
}

#[test]
fn test_reset_renew() {
    let env = env();
    populate(&env, None, DatabaseFlags::empty(), &[(b"key", b"v1")]);

    let mut txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    assert_eq!(read(&txn, db, b"key").as_deref(), Some(&b"v1"[..]));
    let first_id = txn.id().unwrap();

    txn.reset().unwrap();
    assert_eq!(
        txn.get(db, b"key").unwrap_err(),
        LmdbError::BadTransactionState { expected: TxnState::Ready, actual: TxnState::Reset }
    );
    assert!(txn.reset().is_err());

    populate(&env, None, DatabaseFlags::empty(), &[(b"key", b"v2")]);

    txn.renew().unwrap();
    assert!(txn.id().unwrap() > first_id);
    assert_eq!(read(&txn, db, b"key").as_deref(), Some(&b"v2"[..]));
    assert!(txn.renew().is_err());
}

#[test]
fn test_snapshot_isolation() {
    let env = env();
    populate(&env, None, DatabaseFlags::empty(), &[(b"key", b"old")]);

    let reader = env.begin_ro_txn().unwrap();
    let db = reader.open_db(None).unwrap();

    populate(&env, None, DatabaseFlags::empty(), &[(b"key", b"new")]);

    assert_eq!(read(&reader, db, b"key").as_deref(), Some(&b"old"[..]));
}

#[test]
fn test_db_stat() {
    let env = env();
    populate(
        &env,
        Some("stats"),
        DatabaseFlags::empty(),
        &[(b"key1", b"val1"), (b"key2", b"val2"), (b"key3", b"val3")],
    );

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(Some("stats")).unwrap();
    let stat = txn.db_stat(db).unwrap();
    assert_eq!(stat.entries(), 3);
    assert_eq!(stat.depth(), 1);
}

#[test]
fn test_compare() {
    let env = env();
    let mut txn = env.begin_rw_txn().unwrap();
    let plain = txn.create_db(Some("plain"), DatabaseFlags::empty()).unwrap();
    let reversed = txn.create_db(Some("reversed"), DatabaseFlags::REVERSE_KEY).unwrap();
    let dups = txn.create_db(Some("dups"), DatabaseFlags::DUP_SORT).unwrap();

    use std::cmp::Ordering::*;
    assert_eq!(txn.compare(plain, b"ab", b"b").unwrap(), Less);
    assert_eq!(txn.compare(plain, b"ab", b"ab").unwrap(), Equal);
    // REVERSE_KEY compares from the last byte
    assert_eq!(txn.compare(reversed, b"ba", b"ab").unwrap(), Less);
    assert_eq!(txn.dup_compare(dups, b"a", b"b").unwrap(), Less);
    assert_eq!(txn.dup_compare(plain, b"a", b"b").unwrap_err(), LmdbError::RequiresDupSort);
    txn.commit().unwrap();
}

#[test]
fn test_integer_key() {
    let env = env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_db(Some("ints"), DatabaseFlags::INTEGER_KEY).unwrap();
    for i in [300u64, 2, 70_000, 1] {
        txn.put(db, i.to_ne_bytes(), b"", WriteFlags::empty()).unwrap();
    }
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(Some("ints")).unwrap();
    let mut cursor = txn.cursor(db).unwrap();
    let keys: Vec<u64> = cursor
        .iter_start()
        .map(|r| {
            let (k, _) = r.unwrap();
            u64::from_ne_bytes(<[u8; 8]>::try_from(&*k.try_get().unwrap()).unwrap())
        })
        .collect();
    assert_eq!(keys, vec![1, 2, 300, 70_000]);
}

#[test]
fn test_concurrent_readers_single_writer() {
    let env = env();

    let n = 10usize; // Number of concurrent readers
    let barrier = Arc::new(Barrier::new(n + 1));
    let mut threads: Vec<JoinHandle<bool>> = Vec::with_capacity(n);

    let key = b"key";
    let val = b"val";

    for _ in 0..n {
        let reader_env = env.env.clone();
        let reader_barrier = barrier.clone();

        threads.push(thread::spawn(move || {
            {
                let txn = reader_env.begin_ro_txn().unwrap();
                let db = txn.open_db(None).unwrap();
                assert!(txn.get(db, key).unwrap().is_none());
            }
            reader_barrier.wait();
            reader_barrier.wait();
            {
                let txn = reader_env.begin_ro_txn().unwrap();
                let db = txn.open_db(None).unwrap();
                txn.get(db, key).unwrap().unwrap().try_get().unwrap() == val
            }
        }));
    }

    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();

    barrier.wait();
    txn.put(db, key, val, WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    barrier.wait();

    assert!(threads.into_iter().all(|b| b.join().unwrap()))
}

#[test]
fn test_concurrent_writers() {
    let env = env();

    let n = 10usize; // Number of concurrent writers
    let mut threads: Vec<JoinHandle<bool>> = Vec::with_capacity(n);

    let key = "key";
    let val = "val";

    for i in 0..n {
        let writer_env = env.env.clone();

        threads.push(thread::spawn(move || {
            let mut txn = writer_env.begin_rw_txn().unwrap();
            let db = txn.open_db(None).unwrap();
            txn.put(db, format!("{key}{i}"), format!("{val}{i}"), WriteFlags::empty()).unwrap();
            txn.commit().is_ok()
        }));
    }
    assert!(threads.into_iter().all(|b| b.join().unwrap()));

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(None).unwrap();

    for i in 0..n {
        assert_eq!(
            format!("{val}{i}").as_bytes(),
            &*txn.get(db, format!("{key}{i}")).unwrap().unwrap().try_get().unwrap()
        );
    }
}

#[test]
fn test_sendable_ro_txn() {
    let env = no_tls_env();
    populate(&env, None, DatabaseFlags::empty(), &[(b"key", b"val")]);

    let sendable = env.begin_ro_txn().unwrap().into_sendable().unwrap();
    let seen = thread::spawn(move || {
        let txn = sendable.into_inner();
        let db = txn.open_db(None).unwrap();
        read(&txn, db, b"key")
    })
    .join()
    .unwrap();
    assert_eq!(seen.as_deref(), Some(&b"val"[..]));
}

#[test]
fn test_sendable_requires_no_tls() {
    let env = env();
    let err = env.begin_ro_txn().unwrap().into_sendable().unwrap_err();
    assert_eq!(err, LmdbError::RequiresNoTls);
    // the rejected transaction was closed
    env.close().unwrap();
}

#[test]
fn test_nested_rejected_with_write_map() {
    let env = common::open(|b| {
        b.set_flags(EnvironmentFlags::WRITE_MAP);
    });
    let txn = env.begin_rw_txn().unwrap();
    assert_eq!(txn.begin_nested_txn().unwrap_err(), LmdbError::NestedWithWriteMap);
}

#[test]
fn test_txn_flags() {
    let env = env();
    let mut txn = env.begin_rw_txn_with(TransactionFlags::NO_SYNC).unwrap();
    assert!(!txn.is_read_only());
    let db = txn.open_db(None).unwrap();
    txn.put(db, b"k", b"v", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    assert!(txn.is_read_only());
    let db = txn.open_db(None).unwrap();
    assert_eq!(read(&txn, db, b"k").as_deref(), Some(&b"v"[..]));
}

#[test]
fn test_abort_discards_writes() {
    let env = env();
    populate(&env, None, DatabaseFlags::empty(), &[(b"keep", b"1"), (b"change", b"old")]);

    {
        let mut txn = env.begin_rw_txn().unwrap();
        let db = txn.open_db(None).unwrap();
        txn.put(db, b"change", b"new", WriteFlags::empty()).unwrap();
        txn.put(db, b"added", b"x", WriteFlags::empty()).unwrap();
        txn.del(db, b"keep", None).unwrap();
        txn.abort().unwrap();
    }

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    assert_eq!(read(&txn, db, b"keep").as_deref(), Some(&b"1"[..]));
    assert_eq!(read(&txn, db, b"change").as_deref(), Some(&b"old"[..]));
    assert_eq!(read(&txn, db, b"added"), None);
    assert_eq!(txn.db_stat(db).unwrap().entries(), 2);
}

#[test]
fn test_borrowed_value_blocks_writes() {
    let env = env();
    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    txn.put(db, b"k", b"aaaa", WriteFlags::empty()).unwrap();

    let value = txn.get(db, b"k").unwrap().unwrap();
    {
        let bytes = value.try_get().unwrap();
        assert_eq!(
            txn.put(db, b"k", b"bbbb", WriteFlags::empty()).unwrap_err(),
            LmdbError::ValueBorrowed
        );
        assert_eq!(txn.del(db, b"k", None).unwrap_err(), LmdbError::ValueBorrowed);
        assert_eq!(txn.clear_db(db).unwrap_err(), LmdbError::ValueBorrowed);
        assert_eq!(
            txn.with_reservation(db, b"r", 4, WriteFlags::empty(), |_| {}).unwrap_err(),
            LmdbError::ValueBorrowed
        );
        {
            let mut cursor = txn.cursor(db).unwrap();
            assert_eq!(
                cursor.put(b"c", b"1", WriteFlags::empty()).unwrap_err(),
                LmdbError::ValueBorrowed
            );
        }

        // the borrowed bytes were never touched
        assert_eq!(bytes, b"aaaa");
        assert!(value.is_valid());
    }

    txn.put(db, b"k", b"bbbb", WriteFlags::empty()).unwrap();
    assert_eq!(value.try_get().unwrap_err(), LmdbError::StaleValue);
    assert_eq!(read(&txn, db, b"k").as_deref(), Some(&b"bbbb"[..]));
}

#[test]
fn test_inspect_blocks_writes() {
    let env = env();
    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    txn.put(db, b"k", b"v", WriteFlags::empty()).unwrap();

    let value = txn.get(db, b"k").unwrap().unwrap();
    let inner = value.inspect(|_| txn.put(db, b"k", b"w", WriteFlags::empty())).unwrap();
    assert_eq!(inner, Err(LmdbError::ValueBorrowed));
    assert_eq!(value.to_vec().unwrap(), b"v");
}

#[test]
fn test_reservation_blocks_writes() {
    let env = env();
    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();

    let mut inner = None;
    txn.with_reservation(db, b"r", 3, WriteFlags::empty(), |buf| {
        buf.copy_from_slice(b"abc");
        inner = Some(txn.put(db, b"x", b"y", WriteFlags::empty()));
    })
    .unwrap();

    assert_eq!(inner, Some(Err(LmdbError::ValueBorrowed)));
    assert_eq!(read(&txn, db, b"r").as_deref(), Some(&b"abc"[..]));
    assert_eq!(read(&txn, db, b"x"), None);
}

#[test]
fn test_borrowed_child_value_blocks_parent_end() {
    let env = env();
    let mut parent = env.begin_rw_txn().unwrap();
    let db = parent.open_db(None).unwrap();

    let child = parent.begin_nested_txn().unwrap();
    child.put(db, b"k", b"child", WriteFlags::empty()).unwrap();

    let value = child.get(db, b"k").unwrap().unwrap();
    {
        let bytes = value.try_get().unwrap();
        assert_eq!(parent.commit().unwrap_err(), LmdbError::ValueBorrowed);
        assert_eq!(parent.abort().unwrap_err(), LmdbError::ValueBorrowed);
        assert_eq!(bytes, b"child");
    }
    assert_eq!(parent.state(), TxnState::Ready);

    parent.commit().unwrap();
    assert_eq!(child.state(), TxnState::Done);
    assert!(!value.is_valid());
}

#[test]
fn test_borrowed_parent_value_blocks_child_writes() {
    let env = env();
    let parent = env.begin_rw_txn().unwrap();
    let db = parent.open_db(None).unwrap();
    parent.put(db, b"k", b"1", WriteFlags::empty()).unwrap();

    let value = parent.get(db, b"k").unwrap().unwrap();
    let mut child = parent.begin_nested_txn().unwrap();
    {
        let bytes = value.try_get().unwrap();
        assert_eq!(
            child.put(db, b"k", b"2", WriteFlags::empty()).unwrap_err(),
            LmdbError::ValueBorrowed
        );
        assert_eq!(child.commit().unwrap_err(), LmdbError::ValueBorrowed);
        assert_eq!(bytes, b"1");
    }

    child.put(db, b"k", b"2", WriteFlags::empty()).unwrap();
    child.commit().unwrap();
    assert!(!value.is_valid());
    assert_eq!(read(&parent, db, b"k").as_deref(), Some(&b"2"[..]));
}

#[test]
fn test_parent_drop_postponed_while_child_value_borrowed() {
    let env = fail_fast_env();
    let parent = env.begin_rw_txn().unwrap();
    let db = parent.open_db(None).unwrap();
    parent.put(db, b"base", b"1", WriteFlags::empty()).unwrap();

    let child = parent.begin_nested_txn().unwrap();
    child.put(db, b"k", b"child", WriteFlags::empty()).unwrap();
    {
        let value = child.get(db, b"k").unwrap().unwrap();
        let bytes = value.try_get().unwrap();
        drop(parent);
        assert_eq!(bytes, b"child");
        assert_eq!(env.begin_rw_txn().unwrap_err(), LmdbError::WriterBusy);
    }

    // ending the child runs the parent's abort
    drop(child);
    let txn = env.begin_rw_txn().unwrap();
    assert_eq!(read(&txn, db, b"base"), None);
    drop(txn);
    env.close().unwrap();
}

#[test]
fn test_put_rejects_reserve() {
    let env = env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();

    let err = txn.put(db, b"k", b"hello", WriteFlags::RESERVE).unwrap_err();
    assert_eq!(err, LmdbError::ReserveInPut);
    assert_eq!(err.kind(), ErrorKind::IllegalUsage);
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    assert_eq!(read(&txn, db, b"k"), None);
}

#[test]
fn test_put_append() {
    let env = env();
    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_db(None).unwrap();

    for key in [b"a", b"b", b"c"] {
        txn.put(db, key, b"v", WriteFlags::APPEND).unwrap();
    }
    assert_eq!(txn.put(db, b"b", b"w", WriteFlags::APPEND).unwrap_err(), LmdbError::KeyExist);
    assert_eq!(txn.put(db, b"c", b"w", WriteFlags::APPEND).unwrap_err(), LmdbError::KeyExist);

    // the failed appends changed nothing
    assert_eq!(read(&txn, db, b"b").as_deref(), Some(&b"v"[..]));
    assert_eq!(txn.db_stat(db).unwrap().entries(), 3);
}

#[test]
fn test_put_append_dup() {
    let env = env();
    let txn = env.begin_rw_txn().unwrap();
    let db = txn.create_db(Some("dups"), DatabaseFlags::DUP_SORT).unwrap();

    for data in [b"1", b"2", b"3"] {
        txn.put(db, b"k", data, WriteFlags::APPEND_DUP).unwrap();
    }
    assert_eq!(
        txn.put(db, b"k", b"0", WriteFlags::APPEND_DUP).unwrap_err(),
        LmdbError::KeyExist
    );

    let mut cursor = txn.cursor(db).unwrap();
    cursor.set(b"k").unwrap().unwrap();
    assert_eq!(cursor.count_duplicates().unwrap(), 3);
}

#[test]
fn test_create_db_respects_borrowed_values() {
    let env = env();
    let txn = env.begin_rw_txn().unwrap();
    let main = txn.open_db(None).unwrap();
    txn.put(main, b"k", b"v", WriteFlags::empty()).unwrap();

    let value = txn.get(main, b"k").unwrap().unwrap();
    {
        let _bytes = value.try_get().unwrap();
        assert_eq!(
            txn.create_db(Some("named"), DatabaseFlags::empty()).unwrap_err(),
            LmdbError::ValueBorrowed
        );
    }
    txn.create_db(Some("named"), DatabaseFlags::empty()).unwrap();
    assert!(!value.is_valid());
}
