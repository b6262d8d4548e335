//! The permission engine (§4.6): permissions are themselves cubes in the
//! bootstrap app. Grounded on `prost_build/src/filters.rs` (pattern-based
//! inclusion/exclusion filtering over paths) for the wildcard-matching
//! shape, and `prost_build/src/extern_paths.rs` for the insert-once/
//! lookup-with-fallback cache shape.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use sha1::{Digest, Sha1};

use ncube_core::axis::{Axis, AxisType, AxisValueType, ColumnOrder};
use ncube_core::{ApplicationID, ColumnIdSet, ColumnValue, Cube, MetaProperties, NCubeError, NCubeResult, Status, BOOTSTRAP_VERSION, HEAD_BRANCH};

use crate::persister::{Persister, SearchOptions};

pub const CUBE_USERGROUPS: &str = "sys.usergroups";
pub const CUBE_PERMISSIONS: &str = "sys.permissions";
pub const CUBE_BRANCH_PERMISSIONS: &str = "sys.branch.permissions";
pub const CUBE_LOCK: &str = "sys.lock";

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

const DECISION_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Update,
    Commit,
    Release,
}

impl Action {
    fn is_mutating(self) -> bool {
        !matches!(self, Action::Read)
    }

    fn as_str(self) -> &'static str {
        match self {
            Action::Read => "READ",
            Action::Update => "UPDATE",
            Action::Commit => "COMMIT",
            Action::Release => "RELEASE",
        }
    }
}

struct CachedDecision {
    allowed: bool,
    at: Instant,
}

fn bootstrap_app_id(app_id: &ApplicationID) -> ApplicationID {
    ApplicationID::new(app_id.tenant.clone(), app_id.app.clone(), BOOTSTRAP_VERSION, Status::Snapshot, HEAD_BRANCH)
}

fn decision_key(user_id: &str, app_id: &ApplicationID, resource: &str, action: Action) -> String {
    let mut hasher = Sha1::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(app_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(resource.as_bytes());
    hasher.update(b"|");
    hasher.update(action.as_str().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Splits `resource/axisName` into its resource and optional axis segment.
fn split_resource(resource: &str) -> (&str, Option<&str>) {
    match resource.split_once('/') {
        Some((r, a)) => (r, Some(a)),
        None => (resource, None),
    }
}

/// Converts a `*`/`?` glob pattern into a case-insensitive anchored regex,
/// caching compiled patterns process-wide (§4.6: "compiled regexes are
/// cached globally").
static REGEX_CACHE: Lazy<RwLock<HashMap<String, Regex>>> = Lazy::new(|| RwLock::new(HashMap::new()));

fn wildcard_regex(pattern: &str) -> Regex {
    if let Some(cached) = REGEX_CACHE.read().unwrap().get(pattern) {
        return cached.clone();
    }
    let mut escaped = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => escaped.push_str(".*"),
            '?' => escaped.push('.'),
            c => escaped.push_str(&regex::escape(&c.to_string())),
        }
    }
    escaped.push('$');
    let compiled = Regex::new(&escaped).unwrap_or_else(|_| Regex::new("^$").unwrap());
    REGEX_CACHE.write().unwrap().insert(pattern.to_string(), compiled.clone());
    compiled
}

fn resource_matches(pattern_resource: &str, pattern_axis: Option<&str>, resource: &str, axis: Option<&str>) -> bool {
    if pattern_axis.is_some() != axis.is_some() {
        return false;
    }
    if !wildcard_regex(pattern_resource).is_match(resource) {
        return false;
    }
    match (pattern_axis, axis) {
        (Some(pa), Some(a)) => wildcard_regex(pa).is_match(a),
        _ => true,
    }
}

pub struct PermissionEngine<'a> {
    persister: &'a dyn Persister,
    decisions: RwLock<HashMap<String, CachedDecision>>,
}

impl<'a> PermissionEngine<'a> {
    pub fn new(persister: &'a dyn Persister) -> Self {
        Self { persister, decisions: RwLock::new(HashMap::new()) }
    }

    /// `checkPermissions` (§4.6). Returns `Ok(())` on allow, `Security` on deny.
    pub fn check_permissions(&self, app_id: &ApplicationID, user_id: &str, resource: &str, action: Action) -> NCubeResult<()> {
        if resource.eq_ignore_ascii_case(CUBE_LOCK) && action == Action::Read {
            return Ok(());
        }

        let key = decision_key(user_id, app_id, resource, action);
        if let Some(cached) = self.decisions.read().unwrap().get(&key) {
            if cached.at.elapsed() < DECISION_CACHE_TTL {
                log::debug!("permission decision cache hit for {user_id}/{resource}/{}", action.as_str());
                return if cached.allowed {
                    Ok(())
                } else {
                    Err(NCubeError::security(format!("user '{user_id}' may not {} {resource}", action.as_str())))
                };
            }
        }

        let allowed = self.evaluate(app_id, user_id, resource, action)?;
        self.decisions.write().unwrap().insert(key, CachedDecision { allowed, at: Instant::now() });

        if allowed {
            Ok(())
        } else {
            log::debug!("permission denied: user '{user_id}' action {} on {resource}", action.as_str());
            Err(NCubeError::security(format!("user '{user_id}' may not {} {resource}", action.as_str())))
        }
    }

    fn evaluate(&self, app_id: &ApplicationID, user_id: &str, resource: &str, action: Action) -> NCubeResult<bool> {
        let boot = bootstrap_app_id(app_id);
        let Some(permissions_cube) = self.persister.load_cube(&boot, CUBE_PERMISSIONS)? else {
            // Bootstrap mode: permission cubes not yet present, permit all.
            return Ok(true);
        };

        let roles = self.roles_for(&boot, user_id)?;
        let is_admin = roles.iter().any(|r| r.eq_ignore_ascii_case(ROLE_ADMIN));

        if !is_admin && action.is_mutating() {
            if !self.branch_permission_hit(&boot, resource, user_id)? {
                return Ok(false);
            }
        }

        let (res, axis) = split_resource(resource);
        for role in &roles {
            if self.permission_cube_hit(&permissions_cube, res, axis, role, action) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn roles_for(&self, boot: &ApplicationID, user_id: &str) -> NCubeResult<HashSet<String>> {
        let mut roles = HashSet::new();
        let Some(cube) = self.persister.load_cube(boot, CUBE_USERGROUPS)? else {
            return Ok(roles);
        };
        let Some(user_axis) = cube.axis("user") else { return Ok(roles) };
        let Some(role_axis) = cube.axis("role") else { return Ok(roles) };
        let Some(user_col) = user_axis.find_column(&ColumnValue::Str(user_id.to_string())) else {
            return Ok(roles);
        };
        for role_col in role_axis.columns() {
            if role_col.is_default() {
                continue;
            }
            let mut ids = ColumnIdSet::new();
            ids.insert(user_col.id);
            ids.insert(role_col.id);
            if matches!(cube.cell(&ids), Some(ColumnValue::Long(1))) {
                if let Some(ColumnValue::Str(role_name)) = &role_col.value {
                    roles.insert(role_name.to_lowercase());
                }
            }
        }
        Ok(roles)
    }

    fn branch_permission_hit(&self, boot: &ApplicationID, resource: &str, user_id: &str) -> NCubeResult<bool> {
        let Some(cube) = self.persister.load_cube(boot, CUBE_BRANCH_PERMISSIONS)? else {
            return Ok(false);
        };
        let Some(resource_axis) = cube.axis("resource") else { return Ok(false) };
        let Some(user_axis) = cube.axis("user") else { return Ok(false) };
        for resource_col in resource_axis.columns() {
            if resource_col.is_default() {
                continue;
            }
            let Some(ColumnValue::Str(pattern)) = &resource_col.value else { continue };
            if !wildcard_regex(pattern).is_match(resource) {
                continue;
            }
            if let Some(user_col) = user_axis.find_column(&ColumnValue::Str(user_id.to_string())) {
                let mut ids = ColumnIdSet::new();
                ids.insert(resource_col.id);
                ids.insert(user_col.id);
                if matches!(cube.cell(&ids), Some(ColumnValue::Long(1))) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn permission_cube_hit(&self, cube: &Cube, resource: &str, axis: Option<&str>, role: &str, action: Action) -> bool {
        let Some(resource_axis) = cube.axis("resource") else { return false };
        let Some(role_axis) = cube.axis("role") else { return false };
        let Some(action_axis) = cube.axis("action") else { return false };

        let Some(role_col) = role_axis.find_column(&ColumnValue::Str(role.to_string())) else { return false };
        let Some(action_col) = action_axis.find_column(&ColumnValue::Str(action.as_str().to_string())) else {
            return false;
        };

        for resource_col in resource_axis.columns() {
            if resource_col.is_default() {
                continue;
            }
            let Some(ColumnValue::Str(pattern)) = &resource_col.value else { continue };
            let (pattern_resource, pattern_axis) = split_resource(pattern);
            if !resource_matches(pattern_resource, pattern_axis, resource, axis) {
                continue;
            }
            let mut ids = ColumnIdSet::new();
            ids.insert(resource_col.id);
            ids.insert(role_col.id);
            ids.insert(action_col.id);
            if matches!(cube.cell(&ids), Some(ColumnValue::Long(1))) {
                return true;
            }
        }
        false
    }

    /// Seeds the bootstrap permission cubes for a brand-new app, making
    /// `seeding_user` both ADMIN and USER (§4.6). Detects "new" via an
    /// active-records-only search that returns nothing.
    pub fn detect_new_app_id(&self, app_id: &ApplicationID, seeding_user: &str) -> NCubeResult<bool> {
        let boot = bootstrap_app_id(app_id);
        let options = SearchOptions { active_records_only: true, ..Default::default() };
        let existing = self.persister.search(&boot, "*", None, &options)?;
        if !existing.is_empty() {
            return Ok(false);
        }

        self.seed_usergroups(&boot, seeding_user)?;
        self.seed_permissions(&boot)?;
        self.seed_branch_permissions(&boot)?;
        log::info!("bootstrapped permission cubes for {app_id}, admin='{seeding_user}'");
        Ok(true)
    }

    fn seed_usergroups(&self, boot: &ApplicationID, seeding_user: &str) -> NCubeResult<()> {
        let mut cube = Cube::new(CUBE_USERGROUPS, boot.clone())?;
        cube.add_axis(|id| Axis::new(id, "user", AxisType::Discrete, AxisValueType::String, ColumnOrder::Sorted, false))?;
        cube.add_axis(|id| Axis::new(id, "role", AxisType::Discrete, AxisValueType::String, ColumnOrder::Sorted, false))?;

        let user_col = cube
            .axis_mut("user")
            .unwrap()
            .add_column(Some(ColumnValue::Str(seeding_user.to_string())), MetaProperties::new())?;
        let admin_col = cube
            .axis_mut("role")
            .unwrap()
            .add_column(Some(ColumnValue::Str(ROLE_ADMIN.to_string())), MetaProperties::new())?;
        let user_role_col = cube
            .axis_mut("role")
            .unwrap()
            .add_column(Some(ColumnValue::Str(ROLE_USER.to_string())), MetaProperties::new())?;

        for role_col in [admin_col, user_role_col] {
            let mut ids = ColumnIdSet::new();
            ids.insert(user_col);
            ids.insert(role_col);
            cube.set_cell(ids, ColumnValue::Long(1));
        }
        self.persister.update_cube(boot, &cube, seeding_user)
    }

    fn seed_permissions(&self, boot: &ApplicationID) -> NCubeResult<()> {
        let mut cube = Cube::new(CUBE_PERMISSIONS, boot.clone())?;
        cube.add_axis(|id| Axis::new(id, "resource", AxisType::Discrete, AxisValueType::String, ColumnOrder::Sorted, false))?;
        cube.add_axis(|id| Axis::new(id, "role", AxisType::Discrete, AxisValueType::String, ColumnOrder::Sorted, false))?;
        cube.add_axis(|id| Axis::new(id, "action", AxisType::Discrete, AxisValueType::String, ColumnOrder::Sorted, false))?;

        let resource_col = cube
            .axis_mut("resource")
            .unwrap()
            .add_column(Some(ColumnValue::Str("*".to_string())), MetaProperties::new())?;
        let admin_col = cube
            .axis_mut("role")
            .unwrap()
            .add_column(Some(ColumnValue::Str(ROLE_ADMIN.to_string())), MetaProperties::new())?;

        for action in [Action::Read, Action::Update, Action::Commit, Action::Release] {
            let action_col = cube
                .axis_mut("action")
                .unwrap()
                .add_column(Some(ColumnValue::Str(action.as_str().to_string())), MetaProperties::new())?;
            let mut ids = ColumnIdSet::new();
            ids.insert(resource_col);
            ids.insert(admin_col);
            ids.insert(action_col);
            cube.set_cell(ids, ColumnValue::Long(1));
        }
        self.persister.update_cube(boot, &cube, "system")
    }

    fn seed_branch_permissions(&self, boot: &ApplicationID) -> NCubeResult<()> {
        let mut cube = Cube::new(CUBE_BRANCH_PERMISSIONS, boot.clone())?;
        cube.add_axis(|id| Axis::new(id, "resource", AxisType::Discrete, AxisValueType::String, ColumnOrder::Sorted, false))?;
        cube.add_axis(|id| Axis::new(id, "user", AxisType::Discrete, AxisValueType::String, ColumnOrder::Sorted, false))?;
        self.persister.update_cube(boot, &cube, "system")
    }
}
