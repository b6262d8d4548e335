//! The app lock (§4.7, §5): an advisory, single-holder lock backed by the
//! `sys.lock` system cube, not a mutex. Grounded on
//! `prost_build::config::Config`'s single-owner mutable-builder discipline,
//! generalized to "single user id may hold this slot."

use ncube_core::axis::{Axis, AxisType, AxisValueType, ColumnOrder};
use ncube_core::{ApplicationID, ColumnIdSet, ColumnValue, Cube, MetaProperties, NCubeError, NCubeResult, Status, BOOTSTRAP_VERSION, HEAD_BRANCH};

use crate::persister::Persister;

const LOCK_CUBE_NAME: &str = "sys.lock";
const LOCK_AXIS_NAME: &str = "system";
const LOCK_COLUMN_VALUE: &str = "lock";

/// Per-tenant/app advisory lock, stored as a one-cell cube in the bootstrap
/// app (`0.0.0`/SNAPSHOT/HEAD), shared across every branch of that app.
pub struct AppLock<'a> {
    persister: &'a dyn Persister,
}

impl<'a> AppLock<'a> {
    pub fn new(persister: &'a dyn Persister) -> Self {
        Self { persister }
    }

    fn lock_app_id(app_id: &ApplicationID) -> ApplicationID {
        ApplicationID::new(app_id.tenant.clone(), app_id.app.clone(), BOOTSTRAP_VERSION, Status::Snapshot, HEAD_BRANCH)
    }

    fn read_holder(&self, app_id: &ApplicationID) -> NCubeResult<Option<String>> {
        let lock_app = Self::lock_app_id(app_id);
        let Some(cube) = self.persister.load_cube(&lock_app, LOCK_CUBE_NAME)? else {
            // No lock cube yet means the app has never been locked.
            return Ok(None);
        };
        let Some(axis) = cube.axis(LOCK_AXIS_NAME) else {
            return Ok(None);
        };
        let Some(col) = axis.columns().iter().find(|c| !c.is_default()) else {
            return Ok(None);
        };
        let mut ids = ColumnIdSet::new();
        ids.insert(col.id);
        match cube.cell(&ids) {
            Some(ColumnValue::Str(holder)) if !holder.is_empty() => Ok(Some(holder.clone())),
            _ => Ok(None),
        }
    }

    fn write_holder(&self, app_id: &ApplicationID, holder: Option<&str>) -> NCubeResult<()> {
        let lock_app = Self::lock_app_id(app_id);
        let mut cube = match self.persister.load_cube(&lock_app, LOCK_CUBE_NAME)? {
            Some(cube) => cube,
            None => {
                let mut cube = Cube::new(LOCK_CUBE_NAME, lock_app.clone())?;
                cube.add_axis(|id| {
                    Axis::new(id, LOCK_AXIS_NAME, AxisType::Discrete, AxisValueType::String, ColumnOrder::Sorted, false)
                })?;
                cube.axis_mut(LOCK_AXIS_NAME)
                    .unwrap()
                    .add_column(Some(ColumnValue::Str(LOCK_COLUMN_VALUE.into())), MetaProperties::new())?;
                cube
            }
        };

        let col_id = cube.axis(LOCK_AXIS_NAME).unwrap().columns()[0].id;
        let mut ids = ColumnIdSet::new();
        ids.insert(col_id);
        match holder {
            Some(user) => cube.set_cell(ids, ColumnValue::Str(user.to_string())),
            None => {
                cube.remove_cell(&ids);
            }
        }

        self.persister.update_cube(&lock_app, &cube, holder.unwrap_or("system"))
    }

    /// Acquires the lock for `user_id`. Returns `false` if already held by
    /// the caller (idempotent re-lock), `Security` if held by someone else.
    pub fn lock_app(&self, app_id: &ApplicationID, user_id: &str) -> NCubeResult<bool> {
        match self.read_holder(app_id)? {
            Some(holder) if holder == user_id => Ok(false),
            Some(holder) => Err(NCubeError::security(format!(
                "{app_id} is locked by '{holder}'"
            ))),
            None => {
                self.write_holder(app_id, Some(user_id))?;
                log::info!("app lock acquired by '{user_id}' for {app_id}");
                Ok(true)
            }
        }
    }

    /// Releases the lock. Refuses unless the caller is the current holder.
    pub fn unlock_app(&self, app_id: &ApplicationID, user_id: &str) -> NCubeResult<()> {
        match self.read_holder(app_id)? {
            Some(holder) if holder == user_id => {
                self.write_holder(app_id, None)?;
                log::info!("app lock released by '{user_id}' for {app_id}");
                Ok(())
            }
            Some(holder) => Err(NCubeError::security(format!(
                "only lock holder '{holder}' may unlock {app_id}"
            ))),
            None => Ok(()),
        }
    }

    /// Passes when the lock is free or held by `user_id`.
    pub fn assert_not_lock_blocked(&self, app_id: &ApplicationID, user_id: &str) -> NCubeResult<()> {
        match self.read_holder(app_id)? {
            None => Ok(()),
            Some(holder) if holder == user_id => Ok(()),
            Some(holder) => Err(NCubeError::security(format!(
                "{app_id} is locked by '{holder}'"
            ))),
        }
    }

    /// Passes only when held by `user_id`.
    pub fn assert_locked_by_me(&self, app_id: &ApplicationID, user_id: &str) -> NCubeResult<()> {
        match self.read_holder(app_id)? {
            Some(holder) if holder == user_id => Ok(()),
            _ => Err(NCubeError::security(format!(
                "caller '{user_id}' does not hold the lock on {app_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct InMemoryPersister {
        cubes: Mutex<HashMap<(String, String), Cube>>,
    }

    impl InMemoryPersister {
        fn new() -> Self {
            Self { cubes: Mutex::new(HashMap::new()) }
        }
    }

    impl Persister for InMemoryPersister {
        fn load_cube(&self, app_id: &ApplicationID, name: &str) -> NCubeResult<Option<Cube>> {
            Ok(self.cubes.lock().unwrap().get(&(app_id.to_string(), name.to_lowercase())).cloned())
        }
        fn update_cube(&self, app_id: &ApplicationID, cube: &Cube, _user_id: &str) -> NCubeResult<()> {
            self.cubes
                .lock()
                .unwrap()
                .insert((app_id.to_string(), cube.name_lower().to_string()), cube.clone());
            Ok(())
        }
        fn load_cube_by_id(&self, _id: i64) -> NCubeResult<Cube> {
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
        fn get_versions(&self, _t: &str, _a: &str) -> NCubeResult<HashMap<String, Vec<String>>> {
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
    fn lock_then_unlock_round_trips() {
        let persister = InMemoryPersister::new();
        let lock = AppLock::new(&persister);

        assert!(lock.lock_app(&app(), "alice").unwrap());
        assert!(lock.assert_locked_by_me(&app(), "alice").is_ok());
        assert!(lock.assert_not_lock_blocked(&app(), "bob").is_err());

        lock.unlock_app(&app(), "alice").unwrap();
        assert!(lock.assert_not_lock_blocked(&app(), "bob").is_ok());
    }

    #[test]
    fn second_locker_is_rejected() {
        let persister = InMemoryPersister::new();
        let lock = AppLock::new(&persister);

        lock.lock_app(&app(), "alice").unwrap();
        let err = lock.lock_app(&app(), "bob").unwrap_err();
        assert!(matches!(err, NCubeError::Security(_)));
    }

    #[test]
    fn relocking_by_the_same_user_is_a_noop() {
        let persister = InMemoryPersister::new();
        let lock = AppLock::new(&persister);

        assert!(lock.lock_app(&app(), "alice").unwrap());
        assert!(!lock.lock_app(&app(), "alice").unwrap());
    }

    #[test]
    fn only_the_holder_may_unlock() {
        let persister = InMemoryPersister::new();
        let lock = AppLock::new(&persister);

        lock.lock_app(&app(), "alice").unwrap();
        assert!(lock.unlock_app(&app(), "bob").is_err());
    }
}
