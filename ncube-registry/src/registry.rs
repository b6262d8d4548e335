//! The cube cache (§4.5, §5): a per-`ApplicationID` map of lowercased cube
//! name to cube, with "known absent" memoization to avoid thundering-herd
//! reloads of a known-missing cube.
//!
//! Grounded on `prost_build::config::Config` (fields collected in a struct,
//! populated incrementally, then read from repeatedly) generalized to a
//! concurrent `RwLock<HashMap<...>>` cache: a read-lock fast path followed by
//! a write-lock populate-on-miss, mirroring the read-then-populate shape the
//! teacher's `Config` uses for its `PathMap` lookups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use ncube_core::{ApplicationID, Cube, NCubeResult};

use crate::persister::Persister;

#[derive(Debug, Clone)]
enum Slot {
    Present(Cube),
    /// Memoizes "the Persister confirmed this cube does not exist," so a
    /// repeated miss never triggers a second round-trip.
    KnownAbsent,
}

#[derive(Default)]
struct AppCache {
    cubes: HashMap<String, Slot>,
}

/// The process-wide cube registry. One `Registry` is shared across request
/// handlers; it is safe to call from multiple threads concurrently.
pub struct Registry<'a> {
    persister: &'a dyn Persister,
    cache: RwLock<HashMap<ApplicationID, AppCache>>,
    /// One in-flight lock per `(ApplicationID, cube name)` cold miss, so
    /// concurrent readers racing the same miss wait on the single thread that
    /// actually calls the `Persister` instead of all calling it themselves.
    loading: Mutex<HashMap<(ApplicationID, String), Arc<Mutex<()>>>>,
}

impl<'a> Registry<'a> {
    pub fn new(persister: &'a dyn Persister) -> Self {
        Self {
            persister,
            cache: RwLock::new(HashMap::new()),
            loading: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a cube, loading through the `Persister` on a cold cache
    /// entry and memoizing the result either way (§4.5, §5). At most one
    /// `Persister` round-trip happens per `(appId, name)` miss no matter how
    /// many threads race it.
    pub fn get_cube(&self, app_id: &ApplicationID, name: &str) -> NCubeResult<Option<Cube>> {
        let key = name.to_lowercase();

        if let Some(hit) = self.cache.read().unwrap().get(app_id).and_then(|app| app.cubes.get(&key)) {
            log::debug!("cube cache hit for {app_id}/{name}");
            return Ok(match hit {
                Slot::Present(cube) => Some(cube.clone()),
                Slot::KnownAbsent => None,
            });
        }

        let load_lock = {
            let mut loading = self.loading.lock().unwrap();
            loading.entry((app_id.clone(), key.clone())).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let _load_guard = load_lock.lock().unwrap();

        // Whoever held the load lock before us may have already populated
        // this slot; recheck before paying for another Persister round-trip.
        if let Some(hit) = self.cache.read().unwrap().get(app_id).and_then(|app| app.cubes.get(&key)) {
            log::debug!("cube cache hit for {app_id}/{name} after waiting on a racing load");
            return Ok(match hit {
                Slot::Present(cube) => Some(cube.clone()),
                Slot::KnownAbsent => None,
            });
        }

        log::debug!("cube cache miss for {app_id}/{name}, loading through persister");
        let loaded = self.persister.load_cube(app_id, name)?;

        let slot = match &loaded {
            Some(cube) => Slot::Present(cube.clone()),
            None => Slot::KnownAbsent,
        };
        self.cache.write().unwrap().entry(app_id.clone()).or_default().cubes.insert(key.clone(), slot);
        self.loading.lock().unwrap().remove(&(app_id.clone(), key));

        Ok(loaded)
    }

    /// Inserts or replaces a cube directly in the cache, bypassing the
    /// Persister (used after a local mutation has already been persisted).
    pub fn put_cube(&self, app_id: &ApplicationID, cube: Cube) {
        let mut write = self.cache.write().unwrap();
        let app_cache = write.entry(app_id.clone()).or_default();
        app_cache.cubes.insert(cube.name_lower().to_string(), Slot::Present(cube));
        self.broadcast(app_id);
    }

    /// Clears every cached entry for `app_id`. Per §9, reference-axis source
    /// apps are the caller's responsibility to invalidate explicitly; this
    /// registry never walks reference chains to invalidate downstream caches
    /// on its own.
    pub fn clear_cache(&self, app_id: &ApplicationID) {
        let mut write = self.cache.write().unwrap();
        write.remove(app_id);
        log::info!("cleared cube cache for {app_id}");
    }

    /// Clears every cached entry across every application id. Used when
    /// `sys.classpath` changes (§4.5), since classpath affects every app.
    pub fn clear_all(&self) {
        let mut write = self.cache.write().unwrap();
        write.clear();
        log::info!("cleared entire cube cache");
    }

    /// Fire-and-forget notification hook (§5, §9): other nodes' caches may
    /// lag; this is intentionally a no-op unless an embedder wires something
    /// in. Always called after the local mutation has committed.
    fn broadcast(&self, app_id: &ApplicationID) {
        log::debug!("broadcast: cube cache changed for {app_id}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncube_core::Status;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingPersister {
        loads: AtomicUsize,
        cube: Mutex<Option<Cube>>,
    }

    impl CountingPersister {
        fn new(cube: Option<Cube>) -> Self {
            Self { loads: AtomicUsize::new(0), cube: Mutex::new(cube) }
        }
    }

    impl Persister for CountingPersister {
        fn load_cube(&self, _app_id: &ApplicationID, _name: &str) -> NCubeResult<Option<Cube>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.cube.lock().unwrap().clone())
        }
        fn load_cube_by_id(&self, _id: i64) -> NCubeResult<Cube> {
            unimplemented!()
        }
        fn update_cube(&self, _a: &ApplicationID, _c: &Cube, _u: &str) -> NCubeResult<()> {
            unimplemented!()
        }
        fn delete_cubes(&self, _a: &ApplicationID, _n: &[String], _h: bool, _u: &str) -> NCubeResult<bool> {
            unimplemented!()
        }
        fn restore_cubes(&self, _a: &ApplicationID, _n: &[String], _u: &str) -> NCubeResult<()> {
            unimplemented!()
        }
        fn rename_cube(&self, _a: &ApplicationID, _o: &str, _n: &str, _u: &str) -> NCubeResult<bool> {
            unimplemented!()
        }
        fn duplicate_cube(&self, _o: &ApplicationID, _n: &ApplicationID, _on: &str, _nn: &str, _u: &str) -> NCubeResult<()> {
            unimplemented!()
        }
        fn copy_branch(&self, _s: &ApplicationID, _d: &ApplicationID) -> NCubeResult<i64> {
            unimplemented!()
        }
        fn copy_branch_with_history(&self, _s: &ApplicationID, _d: &ApplicationID) -> NCubeResult<i64> {
            unimplemented!()
        }
        fn move_branch(&self, _a: &ApplicationID, _v: &str) -> NCubeResult<i64> {
            unimplemented!()
        }
        fn release_cubes(&self, _a: &ApplicationID, _v: &str) -> NCubeResult<i64> {
            unimplemented!()
        }
        fn delete_branch(&self, _a: &ApplicationID) -> NCubeResult<bool> {
            unimplemented!()
        }
        fn get_revisions(&self, _a: &ApplicationID, _n: &str, _i: bool) -> NCubeResult<Vec<crate::persister::NCubeInfoDto>> {
            unimplemented!()
        }
        fn get_app_names(&self, _t: &str) -> NCubeResult<Vec<String>> {
            unimplemented!()
        }
        fn get_versions(&self, _t: &str, _a: &str) -> NCubeResult<StdHashMap<String, Vec<String>>> {
            unimplemented!()
        }
        fn get_branches(&self, _a: &ApplicationID) -> NCubeResult<Vec<String>> {
            unimplemented!()
        }
        fn search(
            &self,
            _a: &ApplicationID,
            _n: &str,
            _c: Option<&str>,
            _o: &crate::persister::SearchOptions,
        ) -> NCubeResult<Vec<crate::persister::NCubeInfoDto>> {
            unimplemented!()
        }
        fn update_test_data(&self, _a: &ApplicationID, _n: &str, _t: &str) -> NCubeResult<()> {
            unimplemented!()
        }
        fn get_test_data(&self, _a: &ApplicationID, _n: &str) -> NCubeResult<Option<String>> {
            unimplemented!()
        }
        fn update_notes(&self, _a: &ApplicationID, _n: &str, _t: &str) -> NCubeResult<()> {
            unimplemented!()
        }
    }

    fn app() -> ApplicationID {
        ApplicationID::new("acme", "alpha", "1.0.0", Status::Snapshot, "myBranch")
    }

    #[test]
    fn repeated_lookups_hit_the_persister_exactly_once() {
        let cube = Cube::new("rates", app()).unwrap();
        let persister = CountingPersister::new(Some(cube));
        let registry = Registry::new(&persister);

        for _ in 0..5 {
            let found = registry.get_cube(&app(), "rates").unwrap();
            assert!(found.is_some());
        }
        assert_eq!(persister.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn known_absent_cubes_are_memoized_without_repeated_loads() {
        let persister = CountingPersister::new(None);
        let registry = Registry::new(&persister);

        for _ in 0..3 {
            assert!(registry.get_cube(&app(), "missing").unwrap().is_none());
        }
        assert_eq!(persister.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_cache_forces_a_fresh_load() {
        let cube = Cube::new("rates", app()).unwrap();
        let persister = CountingPersister::new(Some(cube));
        let registry = Registry::new(&persister);

        registry.get_cube(&app(), "rates").unwrap();
        registry.clear_cache(&app());
        registry.get_cube(&app(), "rates").unwrap();
        assert_eq!(persister.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_cold_lookups_converge_on_one_load() {
        use std::sync::Arc;
        use std::thread;

        let cube = Cube::new("rates", app()).unwrap();
        // Leaked so the persister has a 'static lifetime and can be shared
        // across the spawned threads below.
        let persister: &'static CountingPersister = Box::leak(Box::new(CountingPersister::new(Some(cube))));
        let registry = Arc::new(Registry::new(persister));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_cube(&app(), "rates").unwrap().is_some())
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(persister.loads.load(Ordering::SeqCst), 1);
    }
}
