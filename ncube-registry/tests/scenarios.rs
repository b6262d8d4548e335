//! Cross-module scenarios spanning reference axes, permissions, branch/release
//! and the registry cache together (§8 scenarios 5-6).

use std::collections::HashMap;
use std::sync::Mutex;

use ncube_core::axis::{Axis, AxisType, AxisValueType, ColumnOrder, RefCubeAxis, RefSpec, RefTransform};
use ncube_core::{ApplicationID, ColumnIdSet, ColumnValue, Cube, Expression, MetaProperties, NCubeError, Status};
use ncube_registry::{
    Action, AppLock, BranchController, ExpressionEvaluator, NCubeInfoDto, Persister, PermissionEngine,
    ReferenceAxisLoader, Registry, SearchOptions,
};

struct InMemoryPersister {
    cubes: Mutex<HashMap<(String, String), Cube>>,
    branches: Mutex<HashMap<String, Vec<String>>>,
}

impl InMemoryPersister {
    fn new() -> Self {
        Self { cubes: Mutex::new(HashMap::new()), branches: Mutex::new(HashMap::new()) }
    }

    fn app_key(app_id: &ApplicationID) -> String {
        format!("{}/{}/{}", app_id.tenant, app_id.app, app_id.version)
    }

    fn seed_branches(&self, app_id: &ApplicationID, branches: &[&str]) {
        self.branches
            .lock()
            .unwrap()
            .insert(Self::app_key(app_id), branches.iter().map(|b| b.to_string()).collect());
    }
}

impl Persister for InMemoryPersister {
    fn load_cube(&self, app_id: &ApplicationID, name: &str) -> ncube_core::NCubeResult<Option<Cube>> {
        Ok(self.cubes.lock().unwrap().get(&(app_id.to_string(), name.to_lowercase())).cloned())
    }
    fn load_cube_by_id(&self, _id: i64) -> ncube_core::NCubeResult<Cube> {
        unimplemented!()
    }
    fn update_cube(&self, app_id: &ApplicationID, cube: &Cube, _user_id: &str) -> ncube_core::NCubeResult<()> {
        self.cubes
            .lock()
            .unwrap()
            .insert((app_id.to_string(), cube.name_lower().to_string()), cube.clone());
        Ok(())
    }
    fn delete_cubes(&self, _a: &ApplicationID, _n: &[String], _h: bool, _u: &str) -> ncube_core::NCubeResult<bool> {
        unimplemented!()
    }
    fn restore_cubes(&self, _a: &ApplicationID, _n: &[String], _u: &str) -> ncube_core::NCubeResult<()> {
        unimplemented!()
    }
    fn rename_cube(&self, _a: &ApplicationID, _o: &str, _n: &str, _u: &str) -> ncube_core::NCubeResult<bool> {
        unimplemented!()
    }
    fn duplicate_cube(&self, _o: &ApplicationID, _n: &ApplicationID, _on: &str, _nn: &str, _u: &str) -> ncube_core::NCubeResult<()> {
        unimplemented!()
    }
    fn copy_branch(&self, _src: &ApplicationID, dst: &ApplicationID) -> ncube_core::NCubeResult<i64> {
        let mut branches = self.branches.lock().unwrap();
        let list = branches.entry(Self::app_key(dst)).or_default();
        if !list.contains(&dst.branch) {
            list.push(dst.branch.clone());
        }
        Ok(1)
    }
    fn copy_branch_with_history(&self, src: &ApplicationID, dst: &ApplicationID) -> ncube_core::NCubeResult<i64> {
        self.copy_branch(src, dst)
    }
    fn move_branch(&self, app_id: &ApplicationID, new_version: &str) -> ncube_core::NCubeResult<i64> {
        let mut branches = self.branches.lock().unwrap();
        let key = Self::app_key(app_id);
        if let Some(list) = branches.get_mut(&key) {
            list.retain(|b| b != &app_id.branch);
        }
        branches
            .entry(Self::app_key(&app_id.with_version(new_version)))
            .or_default()
            .push(app_id.branch.clone());
        Ok(1)
    }
    fn release_cubes(&self, _app_id: &ApplicationID, _new_version: &str) -> ncube_core::NCubeResult<i64> {
        Ok(1)
    }
    fn delete_branch(&self, _a: &ApplicationID) -> ncube_core::NCubeResult<bool> {
        unimplemented!()
    }
    fn get_revisions(&self, _a: &ApplicationID, _n: &str, _i: bool) -> ncube_core::NCubeResult<Vec<NCubeInfoDto>> {
        unimplemented!()
    }
    fn get_app_names(&self, _t: &str) -> ncube_core::NCubeResult<Vec<String>> {
        unimplemented!()
    }
    fn get_versions(&self, _t: &str, _a: &str) -> ncube_core::NCubeResult<HashMap<String, Vec<String>>> {
        unimplemented!()
    }
    fn get_branches(&self, app_id: &ApplicationID) -> ncube_core::NCubeResult<Vec<String>> {
        Ok(self.branches.lock().unwrap().get(&Self::app_key(app_id)).cloned().unwrap_or_default())
    }
    fn search(
        &self,
        app_id: &ApplicationID,
        _name_pattern: &str,
        _content_pattern: Option<&str>,
        _options: &SearchOptions,
    ) -> ncube_core::NCubeResult<Vec<NCubeInfoDto>> {
        let cubes = self.cubes.lock().unwrap();
        Ok(cubes
            .keys()
            .filter(|(app, _)| app == &app_id.to_string())
            .map(|(_, name)| NCubeInfoDto {
                name: name.clone(),
                application_id: app_id.clone(),
                revision: 0,
                sha1: String::new(),
                created_by: String::new(),
                notes: None,
                active: true,
            })
            .collect())
    }
    fn update_test_data(&self, _a: &ApplicationID, _n: &str, _t: &str) -> ncube_core::NCubeResult<()> {
        unimplemented!()
    }
    fn get_test_data(&self, _a: &ApplicationID, _n: &str) -> ncube_core::NCubeResult<Option<String>> {
        unimplemented!()
    }
    fn update_notes(&self, _a: &ApplicationID, _n: &str, _t: &str) -> ncube_core::NCubeResult<()> {
        unimplemented!()
    }
}

struct DoublingEvaluator;
impl ExpressionEvaluator for DoublingEvaluator {
    fn evaluate(&self, _source: &str, _coord: &HashMap<String, ColumnValue>) -> ncube_core::NCubeResult<bool> {
        unimplemented!()
    }
    fn transform_columns(&self, _source: &str, columns: &[ColumnValue]) -> ncube_core::NCubeResult<Vec<ColumnValue>> {
        Ok(columns
            .iter()
            .map(|v| match v {
                ColumnValue::Long(n) => ColumnValue::Long(n * 2),
                other => other.clone(),
            })
            .collect())
    }
}

fn app() -> ApplicationID {
    ApplicationID::new("acme", "alpha", "1.0.0", Status::Snapshot, "HEAD")
}

/// Scenario 5: reference axis with a transform cube (`double`, `[1,2,3] -> [2,4,6]`).
/// A cell set at `age=4` round-trips through JSON preserving both the cell and
/// the fact the axis is (was) a reference.
#[test]
fn reference_axis_with_transform_round_trips_through_json() {
    let _ = env_logger::try_init();
    let persister = InMemoryPersister::new();

    let mut source = Cube::new("ages", app()).unwrap();
    source
        .add_axis(|id| Axis::new(id, "age", AxisType::Discrete, AxisValueType::Long, ColumnOrder::Sorted, false))
        .unwrap();
    let age_axis = source.axis_mut("age").unwrap();
    age_axis.add_column(Some(ColumnValue::Long(1)), MetaProperties::new()).unwrap();
    age_axis.add_column(Some(ColumnValue::Long(2)), MetaProperties::new()).unwrap();
    age_axis.add_column(Some(ColumnValue::Long(3)), MetaProperties::new()).unwrap();
    persister.update_cube(&app(), &source, "alice").unwrap();

    let mut transform = Cube::new("transforms", app()).unwrap();
    transform
        .add_axis(|id| Axis::new(id, "method", AxisType::Rule, AxisValueType::Expression, ColumnOrder::Display, false))
        .unwrap();
    let method_axis = transform.axis_mut("method").unwrap();
    let mut meta = MetaProperties::new();
    meta.insert("name", serde_json::json!("double"));
    method_axis
        .add_column(Some(ColumnValue::Expression(Expression { cmd: Some("x * 2".into()), ..Default::default() })), meta)
        .unwrap();
    persister.update_cube(&app(), &transform, "alice").unwrap();

    let evaluator = DoublingEvaluator;
    let loader = ReferenceAxisLoader::new(&persister, &evaluator);
    let spec = RefSpec {
        source: RefCubeAxis {
            tenant: "acme".into(),
            app: "alpha".into(),
            version: "1.0.0".into(),
            status: "SNAPSHOT".into(),
            branch: "HEAD".into(),
            cube_name: "ages".into(),
            axis_name: "age".into(),
        },
        transform: Some(RefTransform {
            tenant: "acme".into(),
            app: "alpha".into(),
            version: "1.0.0".into(),
            status: "SNAPSHOT".into(),
            branch: "HEAD".into(),
            cube_name: "transforms".into(),
            method_name: "double".into(),
        }),
    };
    let resolved_columns = loader.load(&spec).unwrap();
    assert_eq!(resolved_columns.len(), 3);

    let mut cube = Cube::new("rates", app()).unwrap();
    cube.add_axis(|id| {
        let mut axis = Axis::new(id, "age", AxisType::Discrete, AxisValueType::Long, ColumnOrder::Sorted, false)?;
        axis.reference = Some(spec.clone());
        Ok(axis)
    })
    .unwrap();
    let age_axis = cube.axis_mut("age").unwrap();
    for col in &resolved_columns {
        age_axis.restore_column(col.id, col.value.clone(), col.display_order, col.meta_properties.clone()).unwrap();
    }

    let col4 = cube.axis("age").unwrap().find_column(&ColumnValue::Long(4)).unwrap().id;
    let mut ids = ColumnIdSet::new();
    ids.insert(col4);
    cube.set_cell(ids.clone(), ColumnValue::Str("quadrupled".into()));

    assert!(cube.axis("age").unwrap().is_reference());

    let json = cube.to_json(false);
    let restored = Cube::from_json(&json).unwrap();
    assert_eq!(restored.cell(&ids), Some(&ColumnValue::Str("quadrupled".into())));
    assert_eq!(restored.fingerprint(), cube.fingerprint());
    assert!(restored.axis("age").unwrap().is_reference());
}

/// Scenario 6: an app with no permission cubes allows everything; seeding
/// plants them and locks down `releaseVersion` to admins.
#[test]
fn full_app_lifecycle_locks_down_release_to_admins() {
    let _ = env_logger::try_init();
    let persister = InMemoryPersister::new();
    let registry = Registry::new(&persister);
    let permissions = PermissionEngine::new(&persister);
    let controller = BranchController::new(&persister, &registry, &permissions);

    let head_app = app();
    persister.seed_branches(&head_app, &["HEAD"]);

    // No permission cubes yet: every action is allowed.
    assert!(permissions.check_permissions(&head_app, "bob", "rates", Action::Release).is_ok());

    assert!(permissions.detect_new_app_id(&head_app, "alice").unwrap());
    // A second call against an app with content now returns `false`.
    assert!(!permissions.detect_new_app_id(&head_app, "alice").unwrap());

    let err = permissions.check_permissions(&head_app, "bob", "rates", Action::Release).unwrap_err();
    assert!(matches!(err, NCubeError::Security(_)));
    assert!(permissions.check_permissions(&head_app, "alice", "rates", Action::Release).is_ok());

    let released_count = controller.release_version(&head_app, "1.1.0", "alice").unwrap();
    assert_eq!(released_count, 1);

    // the app lock is released once the operation finishes
    let lock = AppLock::new(&persister);
    assert!(lock.assert_not_lock_blocked(&head_app, "bob").is_ok());
    let new_head = head_app.with_version("1.1.0");
    assert!(persister.get_branches(&new_head).unwrap().contains(&"HEAD".to_string()));
}
