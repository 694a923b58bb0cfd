use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pobj_backend::{Backend, BackendId, BackendResult, ChangeEvent, ErasedBackend};
use tracing::{debug, warn};

use crate::config::ObjectConfig;
use crate::delegate::ObjectDelegate;
use crate::lifecycle::{LifecycleSource, LifecycleToken};

/// The cached value.
struct Cache<T> {
    value: Option<T>,
    /// Number of external changes applied so far.
    generation: u64,
}

fn lock<T>(cache: &Mutex<Cache<T>>) -> MutexGuard<'_, Cache<T>> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State reachable from lifecycle callbacks.
struct Inner<T> {
    backend: ErasedBackend<T>,
    cache: Arc<Mutex<Cache<T>>>,
}

impl<T> Inner<T> {
    fn save(&self) -> BackendResult<()> {
        let cache = lock(&self.cache);
        self.backend.archive(cache.value.as_ref())?;
        debug!(
            location = %self.backend.location(),
            present = cache.value.is_some(),
            "object saved"
        );
        Ok(())
    }

    // Never under the cache lock: a cloud synchronize may deliver an
    // external change on this thread.
    fn synchronize(&self) -> BackendResult<()> {
        self.backend.synchronize()
    }
}

struct LifecycleRegistration {
    source: Arc<dyn LifecycleSource>,
    tokens: Vec<LifecycleToken>,
}

impl LifecycleRegistration {
    fn attach<T>(
        source: Arc<dyn LifecycleSource>,
        inner: &Arc<Inner<T>>,
        config: &ObjectConfig,
    ) -> Self
    where
        T: Send + 'static,
    {
        let mut tokens = Vec::new();
        if config.save_on_background {
            let weak = Arc::downgrade(inner);
            tokens.push(source.on_background(Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    if let Err(e) = inner.save() {
                        warn!(
                            location = %inner.backend.location(),
                            error = %e,
                            "background save failed"
                        );
                    }
                }
            })));
        }
        if config.synchronize_on_foreground {
            let weak = Arc::downgrade(inner);
            tokens.push(source.on_foreground(Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    if let Err(e) = inner.synchronize() {
                        warn!(
                            location = %inner.backend.location(),
                            error = %e,
                            "foreground synchronize failed"
                        );
                    }
                }
            })));
        }
        Self { source, tokens }
    }

    fn detach(self) {
        for token in self.tokens {
            self.source.remove(token);
        }
    }
}

/// A cached value kept durable through a backend.
///
/// The value lives in memory. [`reset`](Self::reset) changes only the cache;
/// [`save`](Self::save) writes it to the backend and
/// [`synchronize`](Self::synchronize) flushes the backend. When the backend
/// reports that the record changed outside this process, the cache is
/// overwritten with the new value (last writer wins).
///
/// Dropping the object detaches it from its backend and lifecycle source
/// and saves once more. Drop-time failures are logged, not raised.
pub struct PersistentObject<T> {
    inner: Arc<Inner<T>>,
    lifecycle: Option<LifecycleRegistration>,
    config: ObjectConfig,
}

impl<T> PersistentObject<T>
where
    T: Clone + Send + 'static,
{
    /// Load the value from `backend` with default options.
    pub fn new(backend: impl Into<ErasedBackend<T>>) -> Self {
        Self::builder(backend).build()
    }

    pub fn builder(backend: impl Into<ErasedBackend<T>>) -> PersistentObjectBuilder<T> {
        PersistentObjectBuilder {
            backend: backend.into(),
            delegate: None,
            lifecycle: None,
            config: ObjectConfig::default(),
        }
    }

    /// A copy of the cached value.
    pub fn get(&self) -> Option<T> {
        lock(&self.inner.cache).value.clone()
    }

    /// Run `f` against a snapshot of the cached value.
    ///
    /// The cache is not locked while `f` runs, so `f` may call back into this
    /// object. Changes made meanwhile are not visible to `f`.
    pub fn with_value<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let value = self.get();
        f(value.as_ref())
    }
}

impl<T> PersistentObject<T> {
    pub fn is_some(&self) -> bool {
        lock(&self.inner.cache).value.is_some()
    }

    /// Replace the cached value. Nothing is written until the next save.
    pub fn reset(&self, value: Option<T>) {
        lock(&self.inner.cache).value = value;
    }

    /// Write the cached value to the backend, or delete the record if the
    /// value is `None`. On failure the cached value is unchanged.
    pub fn save(&self) -> BackendResult<()> {
        self.inner.save()
    }

    /// Flush the backend to its authoritative medium.
    ///
    /// Does not touch the cached value directly, but a cloud backend may
    /// deliver a remote change while this runs.
    pub fn synchronize(&self) -> BackendResult<()> {
        self.inner.synchronize()
    }

    /// Identity stamped on the external changes this object applies.
    pub fn backend_id(&self) -> BackendId {
        self.inner.backend.id()
    }

    pub fn location(&self) -> String {
        self.inner.backend.location()
    }

    pub fn config(&self) -> &ObjectConfig {
        &self.config
    }
}

impl<T> Drop for PersistentObject<T> {
    fn drop(&mut self) {
        if let Some(registration) = self.lifecycle.take() {
            registration.detach();
        }
        self.inner.backend.clear_external_change();
        if let Err(e) = self.inner.save() {
            warn!(location = %self.inner.backend.location(), error = %e, "final save failed");
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PersistentObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentObject")
            .field("backend", &self.inner.backend)
            .field("value", &lock(&self.inner.cache).value)
            .finish()
    }
}

/// Options for constructing a [`PersistentObject`].
pub struct PersistentObjectBuilder<T> {
    backend: ErasedBackend<T>,
    delegate: Option<Arc<dyn ObjectDelegate<T>>>,
    lifecycle: Option<Arc<dyn LifecycleSource>>,
    config: ObjectConfig,
}

impl<T> PersistentObjectBuilder<T>
where
    T: Clone + Send + 'static,
{
    /// Notify `delegate` after each applied external change.
    pub fn delegate(mut self, delegate: impl ObjectDelegate<T> + 'static) -> Self {
        self.delegate = Some(Arc::new(delegate));
        self
    }

    /// Save and synchronize on lifecycle transitions from `source`.
    pub fn lifecycle(mut self, source: Arc<dyn LifecycleSource>) -> Self {
        self.lifecycle = Some(source);
        self
    }

    pub fn config(mut self, config: ObjectConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach to the backend and load the initial value.
    pub fn build(self) -> PersistentObject<T> {
        let Self {
            backend,
            delegate,
            lifecycle,
            config,
        } = self;

        let cache = Arc::new(Mutex::new(Cache {
            value: None,
            generation: 0,
        }));

        // Attached before loading so a change that lands during the load is
        // not lost.
        let target = Arc::clone(&cache);
        backend.on_external_change(move |event: ChangeEvent<T>| {
            {
                let mut cache = lock(&target);
                cache.value = event.value.clone();
                cache.generation += 1;
            }
            debug!(
                source = %event.source,
                present = event.value.is_some(),
                "external change applied"
            );
            if let Some(delegate) = &delegate {
                delegate.did_apply_external_change(&event);
            }
        });

        let loaded = backend.unarchive();
        {
            let mut cache = lock(&cache);
            if cache.generation == 0 {
                cache.value = loaded;
            } else {
                debug!(
                    location = %backend.location(),
                    "external change during load replaces stored value"
                );
            }
        }
        debug!(location = %backend.location(), id = %backend.id(), "persistent object loaded");

        let inner = Arc::new(Inner { backend, cache });
        let lifecycle =
            lifecycle.map(|source| LifecycleRegistration::attach(source, &inner, &config));

        PersistentObject {
            inner,
            lifecycle,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use pobj_backend::{CloudKeyValueBackend, FileBackend, KeyValueBackend, NotificationChannel};
    use pobj_codec::{BincodeCodec, Codec};
    use proptest::prelude::*;
    use pobj_store::{
        ChangeReason, CloudAuthority, CloudKeyValueStore, CloudReplica, DefaultsDatabase,
        KeyValueStore,
    };
    use serde::{Deserialize, Serialize};

    use crate::lifecycle::ManualLifecycle;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        name: String,
        age: u32,
    }

    fn amanda() -> Person {
        Person {
            name: "Amanda".into(),
            age: 29,
        }
    }

    fn person_file(path: &std::path::Path) -> PersistentObject<Person> {
        PersistentObject::new(FileBackend::<Person, _>::new(path, BincodeCodec))
    }

    fn any_person() -> impl Strategy<Value = Option<Person>> {
        proptest::option::of(
            ("\\PC{0,24}", any::<u32>()).prop_map(|(name, age)| Person { name, age }),
        )
    }

    fn defaults_object(db: &Arc<DefaultsDatabase>) -> PersistentObject<Person> {
        let backend =
            KeyValueBackend::<Person, _>::new(db.clone(), "person", BincodeCodec).unwrap();
        PersistentObject::new(backend)
    }

    fn cloud_person(replica: &Arc<CloudReplica>) -> PersistentObject<Person> {
        let backend =
            CloudKeyValueBackend::<Person, _>::new(replica.clone(), "person", BincodeCodec)
                .unwrap();
        PersistentObject::new(backend)
    }

    fn encoded(value: u32) -> Vec<u8> {
        Codec::<u32>::encode(&BincodeCodec, &value).unwrap().to_vec()
    }

    /// File backend that counts archive calls.
    struct CountingBackend {
        inner: FileBackend<u32, BincodeCodec>,
        archives: Arc<AtomicUsize>,
    }

    impl Backend for CountingBackend {
        type Value = u32;

        fn archive(&self, value: Option<&u32>) -> BackendResult<()> {
            self.archives.fetch_add(1, Ordering::SeqCst);
            self.inner.archive(value)
        }

        fn unarchive(&self) -> Option<u32> {
            self.inner.unarchive()
        }

        fn synchronize(&self) -> BackendResult<()> {
            self.inner.synchronize()
        }

        fn channel(&self) -> &NotificationChannel<u32> {
            self.inner.channel()
        }

        fn location(&self) -> String {
            self.inner.location()
        }
    }

    fn counting(dir: &tempfile::TempDir) -> (Arc<AtomicUsize>, PersistentObject<u32>) {
        let archives = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend {
            inner: FileBackend::new(dir.path().join("count.bin"), BincodeCodec),
            archives: Arc::clone(&archives),
        };
        (archives, PersistentObject::new(ErasedBackend::new(backend)))
    }

    type Events = Arc<Mutex<Vec<ChangeEvent<u32>>>>;

    fn cloud_object(replica: &Arc<CloudReplica>, key: &str) -> (Events, PersistentObject<u32>) {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let backend =
            CloudKeyValueBackend::<u32, _>::new(replica.clone(), key, BincodeCodec).unwrap();
        let object = PersistentObject::builder(backend)
            .delegate(move |event: &ChangeEvent<u32>| sink.lock().unwrap().push(event.clone()))
            .build();
        (events, object)
    }

    #[test]
    fn amanda_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.bin");

        let object = person_file(&path);
        assert_eq!(object.get(), None);
        object.reset(Some(amanda()));
        object.save().unwrap();

        let fresh = person_file(&path);
        assert_eq!(fresh.get(), Some(amanda()));
        assert!(fresh.with_value(|p| p.map(|p| p.name == "Amanda").unwrap_or(false)));
    }

    #[test]
    fn saving_none_deletes_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.bin");

        let object = person_file(&path);
        object.reset(Some(amanda()));
        object.save().unwrap();
        object.reset(None);
        object.save().unwrap();

        assert!(!path.exists());
        assert_eq!(person_file(&path).get(), None);
    }

    #[test]
    fn reset_does_not_write_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.bin");

        let object = person_file(&path);
        object.reset(Some(amanda()));
        assert!(object.is_some());
        assert!(!path.exists());
        assert_eq!(person_file(&path).get(), None);
    }

    #[test]
    fn drop_saves_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let (archives, object) = counting(&dir);
        object.reset(Some(5));
        assert_eq!(archives.load(Ordering::SeqCst), 0);

        drop(object);
        assert_eq!(archives.load(Ordering::SeqCst), 1);

        let (_, reopened) = counting(&dir);
        assert_eq!(reopened.get(), Some(5));
    }

    #[test]
    fn explicit_save_plus_drop_archives_twice() {
        let dir = tempfile::tempdir().unwrap();
        let (archives, object) = counting(&dir);
        object.save().unwrap();
        drop(object);
        assert_eq!(archives.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_save_keeps_cached_value() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the record file should be.
        let object = person_file(dir.path());
        object.reset(Some(amanda()));
        assert!(object.save().is_err());
        assert_eq!(object.get(), Some(amanda()));
        // Drop logs the failure instead of panicking.
        drop(object);
    }

    #[test]
    fn server_change_for_owned_key_updates_value_and_notifies_once() {
        let authority = CloudAuthority::new();
        let replica = Arc::new(authority.replica());
        let (events, object) = cloud_object(&replica, "score");

        replica.simulate_remote_change(
            ChangeReason::ServerChange,
            "score",
            Some(encoded(41).as_slice()),
        );

        assert_eq!(object.get(), Some(41));
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, object.backend_id());
        assert_eq!(events[0].value, Some(41));
    }

    #[test]
    fn foreign_key_and_quota_changes_are_ignored() {
        let authority = CloudAuthority::new();
        let replica = Arc::new(authority.replica());
        let (events, object) = cloud_object(&replica, "score");
        object.reset(Some(1));

        replica.simulate_remote_change(
            ChangeReason::ServerChange,
            "other",
            Some(encoded(2).as_slice()),
        );
        replica.simulate_remote_change(
            ChangeReason::QuotaViolationChange,
            "score",
            Some(encoded(3).as_slice()),
        );

        assert_eq!(object.get(), Some(1));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn remote_deletion_clears_value() {
        let authority = CloudAuthority::new();
        let replica = Arc::new(authority.replica());
        let (events, object) = cloud_object(&replica, "score");
        object.reset(Some(9));

        replica.simulate_remote_change(ChangeReason::ServerChange, "score", None);
        assert_eq!(object.get(), None);
        assert_eq!(events.lock().unwrap()[0].value, None);
    }

    #[test]
    fn external_change_during_load_wins() {
        let authority = CloudAuthority::new();
        authority.set_record("score", Some(encoded(99).as_slice()));
        let replica = Arc::new(authority.replica());

        // The replica has not pulled yet; the synchronize inside the load
        // delivers the remote value.
        let (events, object) = cloud_object(&replica, "score");
        assert_eq!(object.get(), Some(99));
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn with_value_may_call_back_into_the_object() {
        let authority = CloudAuthority::new();
        let replica = Arc::new(authority.replica());
        let (tx, rx) = std::sync::mpsc::channel();

        thread::spawn(move || {
            let (events, object) = cloud_object(&replica, "score");
            object.reset(Some(1));
            authority.set_record("score", Some(encoded(8).as_slice()));

            let seen = object.with_value(|value| {
                object.synchronize().unwrap();
                object.reset(Some(2));
                object.save().unwrap();
                value.copied()
            });
            let delivered = events.lock().unwrap().len();
            tx.send((seen, delivered, object.get())).unwrap();
        });

        let (seen, delivered, after) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(seen, Some(1));
        assert_eq!(delivered, 1);
        assert_eq!(after, Some(2));
    }

    #[test]
    fn saved_value_reaches_other_device_after_synchronize() {
        let authority = CloudAuthority::new();
        let phone = Arc::new(authority.replica());
        let tablet = Arc::new(authority.replica());
        let (_, on_phone) = cloud_object(&phone, "score");
        let (tablet_events, on_tablet) = cloud_object(&tablet, "score");

        on_phone.reset(Some(12));
        on_phone.save().unwrap();
        assert_eq!(authority.record("score"), None);
        on_phone.synchronize().unwrap();
        assert_eq!(authority.record("score"), Some(encoded(12)));

        on_tablet.synchronize().unwrap();
        assert_eq!(on_tablet.get(), Some(12));
        assert_eq!(tablet_events.lock().unwrap().len(), 1);
    }

    #[test]
    fn last_writer_wins_over_unsaved_local_value() {
        let authority = CloudAuthority::new();
        let replica = Arc::new(authority.replica());
        let (_, object) = cloud_object(&replica, "score");

        object.reset(Some(100));
        replica.simulate_remote_change(
            ChangeReason::ServerChange,
            "score",
            Some(encoded(7).as_slice()),
        );
        assert_eq!(object.get(), Some(7));
    }

    #[test]
    fn concurrent_resets_and_remote_changes_do_not_deadlock() {
        let authority = CloudAuthority::new();
        let replica = Arc::new(authority.replica());
        let (_, object) = cloud_object(&replica, "score");

        thread::scope(|s| {
            s.spawn(|| {
                for i in 0..50 {
                    replica.simulate_remote_change(
                        ChangeReason::ServerChange,
                        "score",
                        Some(encoded(i).as_slice()),
                    );
                }
            });
            for i in 100..150 {
                object.reset(Some(i));
                object.save().unwrap();
            }
        });
        assert!(object.is_some());
    }

    #[test]
    fn drop_detaches_from_cloud_and_lifecycle() {
        let authority = CloudAuthority::new();
        let replica = Arc::new(authority.replica());
        let lifecycle = Arc::new(ManualLifecycle::new());
        let backend =
            CloudKeyValueBackend::<u32, _>::new(replica.clone(), "score", BincodeCodec).unwrap();
        let object: PersistentObject<u32> = PersistentObject::builder(backend)
            .lifecycle(lifecycle.clone())
            .build();
        assert_eq!(replica.subscriber_count(), 1);
        assert_eq!(lifecycle.observer_count(), 2);

        object.reset(Some(3));
        drop(object);

        assert_eq!(replica.subscriber_count(), 0);
        assert_eq!(lifecycle.observer_count(), 0);
        assert_eq!(replica.data("score").unwrap(), Some(encoded(3)));
    }

    #[test]
    fn background_saves_and_foreground_synchronizes() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DefaultsDatabase::open(&dir.path().join("defaults.db")).unwrap());
        let lifecycle = Arc::new(ManualLifecycle::new());
        let backend = KeyValueBackend::<u32, _>::new(db.clone(), "count", BincodeCodec).unwrap();
        let object: PersistentObject<u32> = PersistentObject::builder(backend)
            .lifecycle(lifecycle.clone())
            .build();

        object.reset(Some(3));
        assert!(!db.contains("count").unwrap());

        lifecycle.enter_background();
        assert!(db.contains("count").unwrap());
        assert!(db.has_unsynchronized_changes());

        lifecycle.enter_foreground();
        assert!(!db.has_unsynchronized_changes());
    }

    #[test]
    fn manual_config_ignores_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.bin");
        let lifecycle = Arc::new(ManualLifecycle::new());
        let object = PersistentObject::builder(FileBackend::<Person, _>::new(&path, BincodeCodec))
            .lifecycle(lifecycle.clone())
            .config(ObjectConfig::manual())
            .build();

        object.reset(Some(amanda()));
        assert_eq!(lifecycle.enter_background(), 0);
        assert!(!path.exists());
        assert_eq!(object.config(), &ObjectConfig::manual());
    }

    #[test]
    fn lifecycle_callback_after_drop_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = Arc::new(ManualLifecycle::new());
        let object = PersistentObject::builder(FileBackend::<Person, _>::new(
            dir.path().join("p.bin"),
            BincodeCodec,
        ))
        .lifecycle(lifecycle.clone())
        .build();
        drop(object);
        assert_eq!(lifecycle.enter_background(), 0);
        assert_eq!(lifecycle.enter_foreground(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn saved_value_reloads_from_file(value in any_person()) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("p.bin");
            let object = person_file(&path);
            object.reset(value.clone());
            object.save().unwrap();
            drop(object);

            prop_assert_eq!(person_file(&path).get(), value);
        }

        #[test]
        fn saved_value_reloads_from_reopened_defaults_database(value in any_person()) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("defaults.db");
            {
                let db = Arc::new(DefaultsDatabase::open(&path).unwrap());
                let object = defaults_object(&db);
                object.reset(value.clone());
                object.save().unwrap();
                object.synchronize().unwrap();
            }

            let db = Arc::new(DefaultsDatabase::open(&path).unwrap());
            prop_assert_eq!(defaults_object(&db).get(), value);
        }

        #[test]
        fn synchronized_value_loads_on_another_device(value in any_person()) {
            let authority = CloudAuthority::new();
            let phone = Arc::new(authority.replica());
            let object = cloud_person(&phone);
            object.reset(value.clone());
            object.save().unwrap();
            object.synchronize().unwrap();

            let tablet = Arc::new(authority.replica());
            prop_assert_eq!(cloud_person(&tablet).get(), value);
        }
    }
}
