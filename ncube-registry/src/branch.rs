//! Branch & release controller (§4.5): copy / move / release / delete /
//! rename / duplicate semantics layered over the `Persister` port and the
//! cube cache. Grounded on `prost_build/src/module.rs` (module-path
//! split/join/rename operations over a small struct), generalized here to
//! `ApplicationID` manipulation.

use ncube_core::{ApplicationID, Cube, NCubeError, NCubeResult, Status, BOOTSTRAP_VERSION, HEAD_BRANCH};

use crate::lock::AppLock;
use crate::permissions::{Action, PermissionEngine};
use crate::persister::Persister;
use crate::registry::Registry;

pub struct BranchController<'a> {
    persister: &'a dyn Persister,
    registry: &'a Registry<'a>,
    permissions: &'a PermissionEngine<'a>,
    lock: AppLock<'a>,
}

fn reject_release(app_id: &ApplicationID, op: &str) -> NCubeResult<()> {
    if app_id.status == Status::Release {
        return Err(NCubeError::illegal_argument(format!(
            "{op} is not permitted against a RELEASE application id ({app_id})"
        )));
    }
    Ok(())
}

fn reject_bootstrap(app_id: &ApplicationID, op: &str) -> NCubeResult<()> {
    if app_id.version == BOOTSTRAP_VERSION {
        return Err(NCubeError::illegal_argument(format!(
            "{op} cannot target the bootstrap version ({app_id})"
        )));
    }
    Ok(())
}

impl<'a> BranchController<'a> {
    pub fn new(persister: &'a dyn Persister, registry: &'a Registry<'a>, permissions: &'a PermissionEngine<'a>) -> Self {
        Self { persister, registry, permissions, lock: AppLock::new(persister) }
    }

    /// `dst` must not be RELEASE and must not already hold content (§4.5).
    pub fn copy_branch(&self, src: &ApplicationID, dst: &ApplicationID, with_history: bool) -> NCubeResult<i64> {
        reject_release(dst, "copyBranch")?;
        let existing = self.persister.get_branches(dst)?;
        if existing.iter().any(|b| b == &dst.branch) {
            return Err(NCubeError::illegal_state(format!(
                "destination branch '{}' already exists for {dst}",
                dst.branch
            )));
        }
        let count = if with_history {
            self.persister.copy_branch_with_history(src, dst)?
        } else {
            self.persister.copy_branch(src, dst)?
        };
        self.registry.clear_cache(dst);
        Ok(count)
    }

    /// Requires the caller already holds the app lock (§4.5, §4.7); `0.0.0`
    /// is rejected as either source or target.
    pub fn move_branch(&self, app_id: &ApplicationID, new_version: &str, user_id: &str) -> NCubeResult<i64> {
        reject_bootstrap(app_id, "moveBranch")?;
        self.lock.assert_locked_by_me(app_id, user_id)?;
        let moved = self.persister.move_branch(app_id, new_version)?;
        self.registry.clear_cache(app_id);
        Ok(moved)
    }

    /// SNAPSHOT→RELEASE transition (§4.5): acquires the app lock, moves every
    /// non-HEAD branch to `new_version`, flips `app_id` to RELEASE, copies
    /// RELEASE content into a fresh HEAD SNAPSHOT at `new_version`, and
    /// always releases the lock even if an intermediate step fails.
    pub fn release_version(&self, app_id: &ApplicationID, new_version: &str, user_id: &str) -> NCubeResult<i64> {
        reject_bootstrap(app_id, "releaseVersion")?;
        self.lock.lock_app(app_id, user_id)?;

        let result = self.release_version_locked(app_id, new_version);

        // The lock is always released, even on failure; per §7 a crash
        // during release leaves the lock set by design, but an ordinary
        // error return must not strand it.
        self.lock.unlock_app(app_id, user_id)?;
        result
    }

    fn release_version_locked(&self, app_id: &ApplicationID, new_version: &str) -> NCubeResult<i64> {
        for branch in self.persister.get_branches(app_id)? {
            if branch != HEAD_BRANCH {
                let branch_app = app_id.with_branch(branch);
                self.persister.move_branch(&branch_app, new_version)?;
                self.registry.clear_cache(&branch_app);
            }
        }

        let count = self.persister.release_cubes(app_id, new_version)?;
        let released = app_id.with_status(Status::Release);

        let new_head = ApplicationID::new(
            app_id.tenant.clone(),
            app_id.app.clone(),
            new_version,
            Status::Snapshot,
            HEAD_BRANCH,
        );
        self.persister.copy_branch(&released, &new_head)?;

        self.registry.clear_cache(app_id);
        self.registry.clear_cache(&released);
        self.registry.clear_cache(&new_head);
        log::info!("released {app_id} as {new_version}, new HEAD SNAPSHOT opened at {new_head}");
        Ok(count)
    }

    pub fn delete_branch(&self, app_id: &ApplicationID, user_id: &str) -> NCubeResult<bool> {
        reject_release(app_id, "deleteBranch")?;
        self.permissions.check_permissions(app_id, user_id, "*", Action::Update)?;
        self.lock.assert_not_lock_blocked(app_id, user_id)?;
        let deleted = self.persister.delete_branch(app_id)?;
        self.registry.clear_cache(app_id);
        Ok(deleted)
    }

    pub fn rename_cube(&self, app_id: &ApplicationID, old_name: &str, new_name: &str, user_id: &str) -> NCubeResult<bool> {
        reject_release(app_id, "renameCube")?;
        self.permissions.check_permissions(app_id, user_id, old_name, Action::Update)?;
        self.lock.assert_not_lock_blocked(app_id, user_id)?;
        let renamed = self.persister.rename_cube(app_id, old_name, new_name, user_id)?;
        self.invalidate_after_change(app_id, old_name);
        Ok(renamed)
    }

    pub fn duplicate(
        &self,
        old_app_id: &ApplicationID,
        new_app_id: &ApplicationID,
        old_name: &str,
        new_name: &str,
        user_id: &str,
    ) -> NCubeResult<()> {
        reject_release(new_app_id, "duplicate")?;
        self.permissions.check_permissions(new_app_id, user_id, new_name, Action::Update)?;
        self.lock.assert_not_lock_blocked(new_app_id, user_id)?;
        self.persister.duplicate_cube(old_app_id, new_app_id, old_name, new_name, user_id)?;
        self.registry.clear_cache(new_app_id);
        Ok(())
    }

    pub fn update_cube(&self, app_id: &ApplicationID, cube: &Cube, user_id: &str) -> NCubeResult<()> {
        reject_release(app_id, "updateCube")?;
        self.permissions.check_permissions(app_id, user_id, cube.name(), Action::Update)?;
        self.lock.assert_not_lock_blocked(app_id, user_id)?;
        self.persister.update_cube(app_id, cube, user_id)?;
        self.invalidate_after_change(app_id, cube.name());
        Ok(())
    }

    pub fn delete_cubes(&self, app_id: &ApplicationID, names: &[String], allow_hard_delete: bool, user_id: &str) -> NCubeResult<bool> {
        reject_release(app_id, "deleteCubes")?;
        for name in names {
            self.permissions.check_permissions(app_id, user_id, name, Action::Update)?;
        }
        self.lock.assert_not_lock_blocked(app_id, user_id)?;
        let deleted = self.persister.delete_cubes(app_id, names, allow_hard_delete, user_id)?;
        for name in names {
            self.invalidate_after_change(app_id, name);
        }
        Ok(deleted)
    }

    pub fn restore_cubes(&self, app_id: &ApplicationID, names: &[String], user_id: &str) -> NCubeResult<()> {
        reject_release(app_id, "restoreCubes")?;
        for name in names {
            self.permissions.check_permissions(app_id, user_id, name, Action::Update)?;
        }
        self.lock.assert_not_lock_blocked(app_id, user_id)?;
        self.persister.restore_cubes(app_id, names, user_id)?;
        for name in names {
            self.invalidate_after_change(app_id, name);
        }
        Ok(())
    }

    /// `sys.classpath` affects every app, so changing it clears the entire
    /// cache rather than just `app_id`'s entry (§4.5).
    fn invalidate_after_change(&self, app_id: &ApplicationID, changed_cube: &str) {
        if changed_cube.eq_ignore_ascii_case("sys.classpath") {
            self.registry.clear_all();
        } else {
            self.registry.clear_cache(app_id);
        }
    }
}
