//! Shared helpers for integration tests.
#![allow(missing_docs, dead_code)]
use parking_lot::Mutex;
use signet_lmdb::{DatabaseFlags, Environment, EnvironmentFlags, WriteFlags, WriteWait};
use tempfile::TempDir;

/// Serializes tests that touch the process-wide custom comparer registry.
pub static REGISTRY_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// An environment together with the directory that backs it.
pub struct TestEnv {
    pub env: Environment,
    pub dir: TempDir,
}

impl std::ops::Deref for TestEnv {
    type Target = Environment;

    fn deref(&self) -> &Environment {
        &self.env
    }
}

/// Opens a fresh environment with room for ten named databases.
pub fn env() -> TestEnv {
    open(|_| {})
}

/// Opens a fresh `NO_TLS` environment.
pub fn no_tls_env() -> TestEnv {
    open(|b| {
        b.set_flags(EnvironmentFlags::NO_TLS);
    })
}

/// Opens a fresh environment whose second writer fails instead of waiting.
pub fn fail_fast_env() -> TestEnv {
    open(|b| {
        b.set_write_wait(WriteWait::Fail);
    })
}

/// Opens a fresh environment after letting `configure` adjust the builder.
pub fn open(configure: impl FnOnce(&mut signet_lmdb::EnvironmentBuilder)) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let mut builder = Environment::builder();
    builder.set_max_dbs(10);
    configure(&mut builder);
    let env = builder.open(dir.path()).unwrap();
    TestEnv { env, dir }
}

/// Writes `pairs` into the default database (or `name`) and commits.
pub fn populate(env: &Environment, name: Option<&str>, flags: DatabaseFlags, pairs: &[(&[u8], &[u8])]) {
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_db(name, flags).unwrap();
    for (key, data) in pairs {
        txn.put(db, key, data, WriteFlags::empty()).unwrap();
    }
    txn.commit().unwrap();
}

/// Copies a sequence of cursor results into owned pairs.
pub fn owned<'tx>(
    items: impl IntoIterator<Item = signet_lmdb::LmdbResult<signet_lmdb::entries::Pair<'tx>>>,
) -> Vec<(Vec<u8>, Vec<u8>)> {
    items
        .into_iter()
        .map(|item| {
            let (k, v) = item.unwrap();
            (k.to_vec().unwrap(), v.to_vec().unwrap())
        })
        .collect()
}

/// Builds an owned pair from string literals.
pub fn pair(k: &str, v: &str) -> (Vec<u8>, Vec<u8>) {
    (k.as_bytes().to_vec(), v.as_bytes().to_vec())
}
