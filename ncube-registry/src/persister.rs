//! The `Persister` and `ExpressionEvaluator` ports (§6): external
//! collaborators the registry depends on but never implements. Grounded on
//! `prost_build`'s `ServiceGenerator` trait (`lib.rs`): an injected
//! collaborator trait with a default-if-absent shape, rather than a
//! concrete backend baked into the library.

use std::collections::HashMap;

use ncube_core::{ApplicationID, ColumnValue, Cube, NCubeResult};

/// One revision record as reported by a persistence backend (§6).
#[derive(Debug, Clone, PartialEq)]
pub struct NCubeInfoDto {
    pub name: String,
    pub application_id: ApplicationID,
    pub revision: i64,
    pub sha1: String,
    pub created_by: String,
    pub notes: Option<String>,
    pub active: bool,
}

/// Filters accepted by [`Persister::search`] (§6).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub exact_match_name: bool,
    pub active_records_only: bool,
    pub deleted_records_only: bool,
    pub changed_records_only: bool,
    pub include_cube_data: bool,
    pub include_test_data: bool,
    pub include_notes: bool,
}

/// The storage backend boundary (§6). Every operation that mutates or reads
/// persisted cube state routes through here; `ncube-registry` never talks to
/// a database directly.
pub trait Persister: Send + Sync {
    fn load_cube(&self, app_id: &ApplicationID, name: &str) -> NCubeResult<Option<Cube>>;
    fn load_cube_by_id(&self, id: i64) -> NCubeResult<Cube>;
    fn update_cube(&self, app_id: &ApplicationID, cube: &Cube, user_id: &str) -> NCubeResult<()>;
    fn delete_cubes(
        &self,
        app_id: &ApplicationID,
        names: &[String],
        allow_hard_delete: bool,
        user_id: &str,
    ) -> NCubeResult<bool>;
    fn restore_cubes(&self, app_id: &ApplicationID, names: &[String], user_id: &str) -> NCubeResult<()>;
    fn rename_cube(&self, app_id: &ApplicationID, old_name: &str, new_name: &str, user_id: &str) -> NCubeResult<bool>;
    fn duplicate_cube(
        &self,
        old_app_id: &ApplicationID,
        new_app_id: &ApplicationID,
        old_name: &str,
        new_name: &str,
        user_id: &str,
    ) -> NCubeResult<()>;
    fn copy_branch(&self, src: &ApplicationID, dst: &ApplicationID) -> NCubeResult<i64>;
    fn copy_branch_with_history(&self, src: &ApplicationID, dst: &ApplicationID) -> NCubeResult<i64>;
    fn move_branch(&self, app_id: &ApplicationID, new_version: &str) -> NCubeResult<i64>;
    fn release_cubes(&self, app_id: &ApplicationID, new_version: &str) -> NCubeResult<i64>;
    fn delete_branch(&self, app_id: &ApplicationID) -> NCubeResult<bool>;
    fn get_revisions(&self, app_id: &ApplicationID, name: &str, ignore_version: bool) -> NCubeResult<Vec<NCubeInfoDto>>;
    fn get_app_names(&self, tenant: &str) -> NCubeResult<Vec<String>>;
    fn get_versions(&self, tenant: &str, app: &str) -> NCubeResult<HashMap<String, Vec<String>>>;
    fn get_branches(&self, app_id: &ApplicationID) -> NCubeResult<Vec<String>>;
    fn search(
        &self,
        app_id: &ApplicationID,
        name_pattern: &str,
        content_pattern: Option<&str>,
        options: &SearchOptions,
    ) -> NCubeResult<Vec<NCubeInfoDto>>;
    fn update_test_data(&self, app_id: &ApplicationID, name: &str, test_data: &str) -> NCubeResult<()>;
    fn get_test_data(&self, app_id: &ApplicationID, name: &str) -> NCubeResult<Option<String>>;
    fn update_notes(&self, app_id: &ApplicationID, name: &str, notes: &str) -> NCubeResult<()>;
}

/// The rule-execution boundary (§6). Evaluates a compiled RULE column's
/// expression source against a coordinate map. `ncube-core` never parses or
/// runs expression source itself; it only stores `cmd`/`url`/`cacheable`
/// (§4.1) and dispatches through this port.
pub trait ExpressionEvaluator: Send + Sync {
    /// Truthy/falsy outcome of evaluating `source` against `coord`.
    fn evaluate(&self, source: &str, coord: &HashMap<String, ColumnValue>) -> NCubeResult<bool>;

    /// Invokes a transform cube's `method` rule column, passing the copied
    /// reference-axis column list and returning its replacement (§4.3).
    fn transform_columns(
        &self,
        source: &str,
        columns: &[ColumnValue],
    ) -> NCubeResult<Vec<ColumnValue>>;
}
