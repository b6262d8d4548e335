//! `ApplicationID`, `Cube`, coordinate lookup, and the SHA-1 fingerprint (§3, §4.4).

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use sha1::{Digest, Sha1};

use crate::axis::{Axis, AxisType, Column};
use crate::error::{NCubeError, NCubeResult};
use crate::meta::MetaProperties;
use crate::value::ColumnValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Snapshot,
    Release,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Snapshot => "SNAPSHOT",
            Status::Release => "RELEASE",
        })
    }
}

/// Immutable 5-tuple identifying a branched, versioned application namespace (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplicationID {
    pub tenant: String,
    pub app: String,
    pub version: String,
    pub status: Status,
    pub branch: String,
}

pub const BOOTSTRAP_VERSION: &str = "0.0.0";
pub const HEAD_BRANCH: &str = "HEAD";

impl ApplicationID {
    pub fn new(
        tenant: impl Into<String>,
        app: impl Into<String>,
        version: impl Into<String>,
        status: Status,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            app: app.into(),
            version: version.into(),
            status,
            branch: branch.into(),
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        self.version == BOOTSTRAP_VERSION
    }

    pub fn is_head(&self) -> bool {
        self.branch == HEAD_BRANCH
    }

    pub fn with_branch(&self, branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            ..self.clone()
        }
    }

    pub fn with_status(&self, status: Status) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..self.clone()
        }
    }

    pub fn bootstrap(tenant: impl Into<String>, app: impl Into<String>) -> Self {
        Self::new(tenant, app, BOOTSTRAP_VERSION, Status::Snapshot, HEAD_BRANCH)
    }
}

impl fmt::Display for ApplicationID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.tenant, self.app, self.version, self.status, self.branch
        )
    }
}

/// An unordered set of column ids, one per bound axis. `BTreeSet`'s `Hash`
/// impl only depends on content, never on insertion order, which is exactly
/// the "unordered set, stored hashed" semantics §3 asks for.
pub type ColumnIdSet = BTreeSet<i64>;

/// Per-rule-column evaluation outcome recorded while resolving a coordinate
/// against a RULE axis (§4.4). `ncube-registry` populates this; `ncube-core`
/// only defines the shape so that `Cube`'s lookup result can carry it.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEvaluation {
    pub axis_name: String,
    pub column_id: i64,
    pub rule_name: String,
    pub truthy: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleInfo {
    pub evaluations: Vec<RuleEvaluation>,
}

/// Axis set + sparse cell map (§3).
#[derive(Debug, Clone)]
pub struct Cube {
    name: String,
    name_lower: String,
    pub application_id: ApplicationID,
    axes: Vec<Axis>,
    cells: HashMap<ColumnIdSet, ColumnValue>,
    pub default_cell_value: Option<ColumnValue>,
    pub meta_properties: MetaProperties,
    next_axis_id: u16,
}

impl Cube {
    pub fn new(name: impl Into<String>, application_id: ApplicationID) -> NCubeResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(NCubeError::illegal_argument("cube name must not be empty"));
        }
        let name_lower = name.to_lowercase();
        Ok(Self {
            name,
            name_lower,
            application_id,
            axes: Vec::new(),
            cells: HashMap::new(),
            default_cell_value: None,
            meta_properties: MetaProperties::new(),
            next_axis_id: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_lower(&self) -> &str {
        &self.name_lower
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn axes_mut(&mut self) -> &mut [Axis] {
        &mut self.axes
    }

    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|a| a.name_eq(name))
    }

    pub fn axis_mut(&mut self, name: &str) -> Option<&mut Axis> {
        self.axes.iter_mut().find(|a| a.name_eq(name))
    }

    /// Appends a new, empty axis to the cube, assigning it the next axis id
    /// scoped to this cube. Axis names must be unique case-insensitively.
    pub fn add_axis(&mut self, axis_builder: impl FnOnce(u16) -> NCubeResult<Axis>) -> NCubeResult<&mut Axis> {
        let id = self.next_axis_id;
        let axis = axis_builder(id)?;
        if self.axis(axis.name()).is_some() {
            return Err(NCubeError::illegal_argument(format!(
                "axis '{}' already exists on cube '{}'",
                axis.name(),
                self.name
            )));
        }
        self.next_axis_id += 1;
        self.axes.push(axis);
        Ok(self.axes.last_mut().unwrap())
    }

    /// Binds every non-RULE axis in `coord` to a column, in §4.4 order.
    /// RULE axes are skipped; the caller (typically the registry's
    /// rule-aware lookup) supplies their bindings separately after
    /// evaluating each rule column through the `ExpressionEvaluator` port.
    pub fn bind_non_rule_axes(
        &self,
        coord: &HashMap<String, ColumnValue>,
    ) -> NCubeResult<HashMap<String, i64>> {
        let lower_coord: HashMap<String, &ColumnValue> = coord
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();

        let mut bindings = HashMap::new();
        for axis in &self.axes {
            if axis.axis_type == AxisType::Rule {
                continue;
            }
            let supplied = lower_coord.get(&axis.name().to_lowercase());
            let column = match supplied {
                Some(value) => axis.find_column(value),
                None => None,
            };
            match column {
                Some(col) => {
                    bindings.insert(axis.name().to_string(), col.id);
                }
                None => {
                    return Err(NCubeError::coordinate_not_found(format!(
                        "no column on axis '{}' binds the supplied coordinate and no default exists",
                        axis.name()
                    )));
                }
            }
        }
        Ok(bindings)
    }

    /// Direct cell lookup by an already-assembled column id set, falling
    /// back to the default cell value (§4.4 step 5).
    pub fn cell(&self, column_ids: &ColumnIdSet) -> Option<&ColumnValue> {
        self.cells.get(column_ids).or(self.default_cell_value.as_ref())
    }

    pub fn set_cell(&mut self, column_ids: ColumnIdSet, value: ColumnValue) {
        self.cells.insert(column_ids, value);
    }

    pub fn remove_cell(&mut self, column_ids: &ColumnIdSet) -> Option<ColumnValue> {
        self.cells.remove(column_ids)
    }

    pub fn cells(&self) -> &HashMap<ColumnIdSet, ColumnValue> {
        &self.cells
    }

    /// Convenience entry point for cubes with no RULE axes: binds every axis
    /// and returns the resolved cell, or `None` if neither a cell nor a
    /// default cell value exists.
    pub fn get_cell(&self, coord: &HashMap<String, ColumnValue>) -> NCubeResult<Option<&ColumnValue>> {
        if self.axes.iter().any(|a| a.axis_type == AxisType::Rule) {
            return Err(NCubeError::illegal_state(
                "cube has RULE axes; use the registry's rule-aware lookup instead",
            ));
        }
        let bindings = self.bind_non_rule_axes(coord)?;
        let ids: ColumnIdSet = bindings.values().copied().collect();
        Ok(self.cell(&ids))
    }

    /// Column for a given id, searched across every axis.
    pub fn column_by_id(&self, id: i64) -> Option<&Column> {
        self.axes.iter().find_map(|a| a.columns().iter().find(|c| c.id == id))
    }

    /// Appends an axis already fully populated (columns, ids, meta)
    /// elsewhere, e.g. by the JSON codec. Skips the name-building closure
    /// `add_axis` requires since the axis's id was already assigned by its
    /// source.
    pub fn restore_axis(&mut self, axis: Axis) -> NCubeResult<()> {
        if self.axis(axis.name()).is_some() {
            return Err(NCubeError::illegal_argument(format!(
                "axis '{}' already exists on cube '{}'",
                axis.name(),
                self.name
            )));
        }
        self.axes.push(axis);
        Ok(())
    }

    /// Sets the axis-id counter used for axes added after a restore, so it
    /// never collides with an id carried over from storage.
    pub fn set_next_axis_id(&mut self, id: u16) {
        self.next_axis_id = id;
    }

    /// A stable fingerprint of the cube's structure and data (§3, §8). Two
    /// cubes that differ only in axis name case, SORTED-column insertion
    /// order, or meta-property iteration order hash identically; any change
    /// to a cell value, an axis's value set, its default flag, or its type
    /// changes the digest.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.name_lower.as_bytes());
        hasher.update(self.application_id.to_string().as_bytes());

        for axis in &self.axes {
            hasher.update(b"|axis:");
            hasher.update(axis.name().to_lowercase().as_bytes());
            hasher.update(format!(":{:?}:{:?}:{}", axis.axis_type, axis.value_type, axis.has_default).as_bytes());
            for col in axis.columns() {
                hasher.update(b";col:");
                match &col.value {
                    Some(v) => hasher.update(v.to_string().as_bytes()),
                    None => hasher.update(b"<default>"),
                }
            }
            for (k, v) in axis.meta_properties.iter() {
                hasher.update(format!(";meta:{}={v}", k.to_lowercase()).as_bytes());
            }
        }

        let mut cell_keys: Vec<&ColumnIdSet> = self.cells.keys().collect();
        cell_keys.sort();
        for key in cell_keys {
            hasher.update(b"|cell:");
            for id in key {
                hasher.update(id.to_le_bytes());
            }
            hasher.update(self.cells[key].to_string().as_bytes());
        }

        if let Some(def) = &self.default_cell_value {
            hasher.update(b"|default:");
            hasher.update(def.to_string().as_bytes());
        }

        hex::encode(hasher.finalize())
    }
}

/// Minimal hex encoding, avoiding a dependency on the `hex` crate for a
/// single call site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::{Axis, AxisType, AxisValueType, ColumnOrder};
    use crate::meta::MetaProperties;

    fn sample_cube() -> Cube {
        let app = ApplicationID::new("acme", "alpha", "1.0.0", Status::Snapshot, "HEAD");
        let mut cube = Cube::new("rates", app).unwrap();
        cube.add_axis(|id| Axis::new(id, "age", AxisType::Discrete, AxisValueType::Long, ColumnOrder::Sorted, true))
            .unwrap();
        let age_col = cube
            .axis_mut("age")
            .unwrap()
            .add_column(Some(ColumnValue::Long(18)), MetaProperties::new())
            .unwrap();
        let mut ids = ColumnIdSet::new();
        ids.insert(age_col);
        cube.set_cell(ids, ColumnValue::Str("adult".into()));
        cube
    }

    #[test]
    fn get_cell_binds_and_returns_value() {
        let cube = sample_cube();
        let mut coord = HashMap::new();
        coord.insert("AGE".to_string(), ColumnValue::Long(18));
        let result = cube.get_cell(&coord).unwrap().unwrap();
        assert_eq!(*result, ColumnValue::Str("adult".into()));
    }

    #[test]
    fn get_cell_falls_back_to_default_column() {
        let cube = sample_cube();
        let mut coord = HashMap::new();
        coord.insert("age".to_string(), ColumnValue::Long(99));
        let result = cube.get_cell(&coord).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn fingerprint_is_stable_under_axis_name_case_change() {
        let cube_a = sample_cube();
        let mut cube_b = sample_cube();
        // rename "age" -> "AGE": only case differs
        {
            let axis = cube_b.axes.first_mut().unwrap();
            axis.rename("AGE");
        }
        assert_eq!(cube_a.fingerprint(), cube_b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_when_a_cell_value_changes() {
        let mut cube = sample_cube();
        let before = cube.fingerprint();
        let col_id = cube.axis("age").unwrap().columns()[0].id;
        let mut ids = ColumnIdSet::new();
        ids.insert(col_id);
        cube.set_cell(ids, ColumnValue::Str("changed".into()));
        assert_ne!(before, cube.fingerprint());
    }
}
