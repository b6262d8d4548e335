//! The axis model: typed axes, column ordering, overlap detection, and
//! coordinate binding (§3, §4.2).

use std::cmp::Ordering;

use crate::error::{NCubeError, NCubeResult};
use crate::id::pack_column_id;
use crate::meta::MetaProperties;
use crate::value::ColumnValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisType {
    Discrete,
    Range,
    Set,
    Nearest,
    Rule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisValueType {
    String,
    Long,
    BigDecimal,
    Double,
    Date,
    Expression,
    Comparable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnOrder {
    Sorted,
    Display,
}

/// Where a reference axis's columns come from (§4.3). Resolution of this
/// pointer into a concrete column list is the job of `ReferenceAxisLoader`
/// in `ncube-registry`; the axis itself only carries the pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefCubeAxis {
    pub tenant: String,
    pub app: String,
    pub version: String,
    pub status: String,
    pub branch: String,
    pub cube_name: String,
    pub axis_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefTransform {
    pub tenant: String,
    pub app: String,
    pub version: String,
    pub status: String,
    pub branch: String,
    pub cube_name: String,
    pub method_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    pub source: RefCubeAxis,
    pub transform: Option<RefTransform>,
}

pub const MAX_DISPLAY_ORDER: i32 = i32::MAX;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub id: i64,
    /// `None` marks the default column.
    pub value: Option<ColumnValue>,
    pub display_order: i32,
    pub meta_properties: MetaProperties,
}

impl Column {
    pub fn is_default(&self) -> bool {
        self.value.is_none()
    }

    /// The name of a RULE column, read from its `name` meta property. RULE
    /// columns are indexed and looked up by this name rather than by their
    /// `Expression` value (§4.2).
    pub fn rule_name(&self) -> Option<&str> {
        self.meta_properties.get("name").and_then(|v| v.as_str())
    }
}

/// A named dimension with ordered, non-overlapping columns.
#[derive(Debug, Clone)]
pub struct Axis {
    pub id: u16,
    name: String,
    name_lower: String,
    pub axis_type: AxisType,
    pub value_type: AxisValueType,
    pub order: ColumnOrder,
    pub has_default: bool,
    columns: Vec<Column>,
    pub meta_properties: MetaProperties,
    next_sequence: u64,
    pub reference: Option<RefSpec>,
}

impl Axis {
    pub fn new(
        id: u16,
        name: impl Into<String>,
        axis_type: AxisType,
        value_type: AxisValueType,
        order: ColumnOrder,
        has_default: bool,
    ) -> NCubeResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(NCubeError::illegal_argument("axis name must not be empty"));
        }
        if axis_type == AxisType::Nearest && has_default {
            return Err(NCubeError::illegal_argument(
                "NEAREST axes must not have a default column",
            ));
        }

        // RULE axes are always DISPLAY ordered and always EXPRESSION typed;
        // both are silently upgraded rather than rejected (§3, §9).
        let (order, value_type) = if axis_type == AxisType::Rule {
            (ColumnOrder::Display, AxisValueType::Expression)
        } else {
            (order, value_type)
        };

        let name_lower = name.to_lowercase();
        let mut axis = Axis {
            id,
            name,
            name_lower,
            axis_type,
            value_type,
            order,
            has_default: false,
            columns: Vec::new(),
            meta_properties: MetaProperties::new(),
            next_sequence: 0,
            reference: None,
        };
        if has_default {
            axis.add_default_column()?;
        }
        Ok(axis)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_eq(&self, other: &str) -> bool {
        self.name_lower == other.to_lowercase()
    }

    /// Renames the axis in place. The fingerprint in §8 is defined to be
    /// stable across a case-only rename since hashing always canonicalizes
    /// to lowercase.
    pub fn rename(&mut self, new_name: impl Into<String>) {
        let new_name = new_name.into();
        self.name_lower = new_name.to_lowercase();
        self.name = new_name;
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }

    fn next_id(&mut self) -> i64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        pack_column_id(self.id, seq)
    }

    fn validate_value_type(&self, value: &ColumnValue) -> NCubeResult<()> {
        let matches = matches!(
            (self.value_type, value),
            (AxisValueType::String, ColumnValue::Str(_))
                | (AxisValueType::Long, ColumnValue::Long(_))
                | (AxisValueType::Double, ColumnValue::Double(_))
                | (AxisValueType::BigDecimal, ColumnValue::BigDecimal { .. })
                | (AxisValueType::Date, ColumnValue::Date(_))
                | (AxisValueType::Expression, ColumnValue::Expression(_))
                | (AxisValueType::Comparable, ColumnValue::Comparable(_))
                | (AxisValueType::Comparable, ColumnValue::LatLon(_))
                | (AxisValueType::Comparable, ColumnValue::Point3D(_))
        ) || match (self.axis_type, value) {
            (AxisType::Range, ColumnValue::Range(_)) => true,
            (AxisType::Set, ColumnValue::RangeSet(_)) => true,
            (AxisType::Nearest, ColumnValue::LatLon(_) | ColumnValue::Point3D(_)) => true,
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(NCubeError::illegal_argument(format!(
                "value {value} does not match axis '{}' value type",
                self.name
            )))
        }
    }

    fn overlaps_existing(&self, value: &ColumnValue, excluding: Option<i64>) -> Option<i64> {
        for col in &self.columns {
            if col.is_default() {
                continue;
            }
            if excluding == Some(col.id) {
                continue;
            }
            let col_value = col.value.as_ref().unwrap();
            let clash = match self.axis_type {
                AxisType::Discrete => col_value.canonical_key() == value.canonical_key(),
                AxisType::Range => match (col_value, value) {
                    (ColumnValue::Range(a), ColumnValue::Range(b)) => a.overlaps(b),
                    _ => false,
                },
                AxisType::Set => match (col_value, value) {
                    (ColumnValue::RangeSet(a), ColumnValue::RangeSet(b)) => a.overlaps(b),
                    _ => false,
                },
                AxisType::Nearest => false,
                AxisType::Rule => false, // rule uniqueness checked on rule name, not value
            };
            if clash {
                return Some(col.id);
            }
        }
        None
    }

    fn rule_name_clash(&self, name: &str, excluding: Option<i64>) -> bool {
        let lower = name.to_lowercase();
        self.columns.iter().any(|c| {
            Some(c.id) != excluding
                && c.rule_name()
                    .map(|n| n.to_lowercase() == lower)
                    .unwrap_or(false)
        })
    }

    fn add_default_column(&mut self) -> NCubeResult<()> {
        if self.has_default {
            return Err(NCubeError::illegal_argument(format!(
                "axis '{}' already has a default column",
                self.name
            )));
        }
        let id = self.next_id();
        self.columns.push(Column {
            id,
            value: None,
            display_order: MAX_DISPLAY_ORDER,
            meta_properties: MetaProperties::new(),
        });
        self.has_default = true;
        Ok(())
    }

    /// Adds a non-default column, or the axis's (sole) default column when
    /// `value` is `None` (§4.2).
    pub fn add_column(
        &mut self,
        value: Option<ColumnValue>,
        meta: MetaProperties,
    ) -> NCubeResult<i64> {
        let Some(value) = value else {
            self.add_default_column()?;
            return Ok(self.columns.last().unwrap().id);
        };

        if self.axis_type == AxisType::Nearest && self.has_default {
            unreachable!("NEAREST axis cannot have a default, enforced at construction");
        }

        self.validate_value_type(&value)?;

        if self.axis_type == AxisType::Rule {
            let name = meta
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    NCubeError::illegal_argument("RULE columns require a 'name' meta property")
                })?
                .to_string();
            if self.rule_name_clash(&name, None) {
                return Err(NCubeError::axis_overlap(format!(
                    "rule name '{name}' already exists on axis '{}'",
                    self.name
                )));
            }
        } else if let Some(existing) = self.overlaps_existing(&value, None) {
            return Err(NCubeError::axis_overlap(format!(
                "{value} overlaps existing column {existing} on axis '{}'",
                self.name
            )));
        }

        let id = self.next_id();
        let display_order = self.next_display_order();
        self.columns.push(Column {
            id,
            value: Some(value),
            display_order,
            meta_properties: meta,
        });
        self.resort();
        Ok(id)
    }

    fn next_display_order(&self) -> i32 {
        self.columns
            .iter()
            .filter(|c| !c.is_default())
            .map(|c| c.display_order)
            .filter(|&d| d != MAX_DISPLAY_ORDER)
            .max()
            .map(|m| m + 1)
            .unwrap_or(0)
    }

    fn resort(&mut self) {
        match self.order {
            ColumnOrder::Sorted => self.columns.sort_by(|a, b| {
                if a.is_default() {
                    return Ordering::Greater;
                }
                if b.is_default() {
                    return Ordering::Less;
                }
                a.value
                    .as_ref()
                    .unwrap()
                    .partial_cmp(b.value.as_ref().unwrap())
                    .unwrap_or(Ordering::Equal)
            }),
            ColumnOrder::Display => self.columns.sort_by_key(|c| c.display_order),
        }
    }

    fn default_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.is_default())
    }

    /// Binds `value` to a column, or the default column if none matches and
    /// one exists, or `None` otherwise (§4.2). Not valid for RULE axes; use
    /// [`Axis::find_rule_column`].
    pub fn find_column(&self, value: &ColumnValue) -> Option<&Column> {
        debug_assert!(self.axis_type != AxisType::Rule, "use find_rule_column for RULE axes");
        match self.axis_type {
            AxisType::Discrete => self
                .columns
                .iter()
                .find(|c| !c.is_default() && c.value.as_ref().unwrap().canonical_key() == value.canonical_key())
                .or_else(|| self.default_column()),
            AxisType::Range => self
                .columns
                .iter()
                .find(|c| match c.value.as_ref() {
                    Some(ColumnValue::Range(r)) => r.contains(value),
                    _ => false,
                })
                .or_else(|| self.default_column()),
            AxisType::Set => self
                .columns
                .iter()
                .find(|c| match c.value.as_ref() {
                    Some(ColumnValue::RangeSet(rs)) => rs.contains(value),
                    _ => false,
                })
                .or_else(|| self.default_column()),
            AxisType::Nearest => self
                .columns
                .iter()
                .filter(|c| !c.is_default())
                .filter_map(|c| c.value.as_ref().and_then(|v| v.distance(value)).map(|d| (c, d)))
                .min_by(|(_, d1), (_, d2)| d1.partial_cmp(d2).unwrap_or(Ordering::Equal))
                .map(|(c, _)| c),
            AxisType::Rule => None,
        }
    }

    /// RULE axis lookup by rule name (§4.2). A missing name with no default
    /// is `CoordinateNotFound`; a numeric/non-string coordinate is a
    /// programming error surfaced by the caller before reaching here.
    pub fn find_rule_column(&self, name: &str) -> NCubeResult<&Column> {
        let lower = name.to_lowercase();
        self.columns
            .iter()
            .find(|c| {
                !c.is_default() && c.rule_name().map(|n| n.to_lowercase() == lower).unwrap_or(false)
            })
            .or_else(|| self.default_column())
            .ok_or_else(|| {
                NCubeError::coordinate_not_found(format!(
                    "no rule column named '{name}' on axis '{}' and no default",
                    self.name
                ))
            })
    }

    /// The ordered tail of rule columns starting at `name` (or from the
    /// beginning when `name` is `None`); §4.2.
    pub fn rule_columns_starting_at(&self, name: Option<&str>) -> NCubeResult<Vec<&Column>> {
        let non_default: Vec<&Column> = self.columns.iter().filter(|c| !c.is_default()).collect();
        let start = match name {
            None => 0,
            Some(n) => {
                let lower = n.to_lowercase();
                non_default
                    .iter()
                    .position(|c| c.rule_name().map(|rn| rn.to_lowercase() == lower).unwrap_or(false))
                    .ok_or_else(|| {
                        NCubeError::coordinate_not_found(format!(
                            "no rule column named '{n}' on axis '{}'",
                            self.name
                        ))
                    })?
            }
        };
        Ok(non_default[start..].to_vec())
    }

    /// Reconciles the axis against an externally edited column list (§4.2).
    /// Positive ids must already exist (value/meta updated); negative ids are
    /// additions; existing columns absent from `new_cols` are removed. On any
    /// overlap the axis is left untouched.
    pub fn update_columns(&mut self, new_cols: Vec<ColumnUpdate>) -> NCubeResult<()> {
        let mut trial = self.clone();
        trial.columns.retain(|c| c.is_default());

        for update in &new_cols {
            if update.id >= 0 {
                let existing_idx = self
                    .columns
                    .iter()
                    .position(|c| c.id == update.id)
                    .ok_or_else(|| {
                        NCubeError::illegal_argument(format!(
                            "column {} does not exist on axis '{}'",
                            update.id, self.name
                        ))
                    })?;
                let existing = &self.columns[existing_idx];
                if let Some(v) = &update.value {
                    trial.validate_value_type(v)?;
                }
                if self.axis_type == AxisType::Rule {
                    let name = update
                        .meta_properties
                        .as_ref()
                        .and_then(|m| m.get("name"))
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                        .or_else(|| existing.rule_name().map(|s| s.to_string()))
                        .ok_or_else(|| {
                            NCubeError::illegal_argument("RULE columns require a 'name' meta property")
                        })?;
                    if trial.rule_name_clash(&name, Some(update.id)) {
                        return Err(NCubeError::axis_overlap(format!(
                            "rule name '{name}' already exists on axis '{}'",
                            self.name
                        )));
                    }
                } else if let Some(existing_clash) =
                    trial.overlaps_existing(update.value.as_ref().unwrap_or_else(|| existing.value.as_ref().unwrap()), Some(update.id))
                {
                    return Err(NCubeError::axis_overlap(format!(
                        "update of column {} overlaps column {existing_clash} on axis '{}'",
                        update.id, self.name
                    )));
                }
                trial.columns.push(Column {
                    id: update.id,
                    value: update.value.clone().or_else(|| existing.value.clone()),
                    display_order: existing.display_order,
                    meta_properties: update.meta_properties.clone().unwrap_or_else(|| existing.meta_properties.clone()),
                });
            } else {
                let value = update.value.clone().ok_or_else(|| {
                    NCubeError::illegal_argument("new columns must carry a value")
                })?;
                trial.validate_value_type(&value)?;
                if self.axis_type == AxisType::Rule {
                    let name = update
                        .meta_properties
                        .as_ref()
                        .and_then(|m| m.get("name"))
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                        .ok_or_else(|| {
                            NCubeError::illegal_argument("RULE columns require a 'name' meta property")
                        })?;
                    if trial.rule_name_clash(&name, None) {
                        return Err(NCubeError::axis_overlap(format!(
                            "rule name '{name}' already exists on axis '{}'",
                            self.name
                        )));
                    }
                } else if let Some(clash) = trial.overlaps_existing(&value, None) {
                    return Err(NCubeError::axis_overlap(format!(
                        "new column {value} overlaps column {clash} on axis '{}'",
                        self.name
                    )));
                }
                let id = trial.next_id();
                let display_order = trial.next_display_order();
                trial.columns.push(Column {
                    id,
                    value: Some(value),
                    display_order,
                    meta_properties: update.meta_properties.clone().unwrap_or_default(),
                });
            }
        }

        trial.resort();
        *self = trial;
        Ok(())
    }

    /// Materializes a reference axis into an ordinary one: cells referencing
    /// its columns are unaffected since column ids are preserved (§4.3).
    pub fn break_reference(&mut self) {
        self.reference = None;
    }

    /// Re-inserts a column with an id carried over from storage, bypassing
    /// id assignment and overlap checks (the source was already consistent).
    /// Used by the JSON codec to keep cell references resolvable across a
    /// round-trip. Advances the axis's sequence counter past `id` so that
    /// subsequently added columns never collide with it.
    pub fn restore_column(
        &mut self,
        id: i64,
        value: Option<ColumnValue>,
        display_order: i32,
        meta: MetaProperties,
    ) -> NCubeResult<()> {
        if let Some(v) = &value {
            self.validate_value_type(v)?;
        } else {
            self.has_default = true;
        }
        let (_, sequence) = crate::id::unpack_column_id(id);
        if sequence >= self.next_sequence {
            self.next_sequence = sequence + 1;
        }
        self.columns.push(Column {
            id,
            value,
            display_order,
            meta_properties: meta,
        });
        self.resort();
        Ok(())
    }
}

/// One entry in an [`Axis::update_columns`] batch (§4.2).
#[derive(Debug, Clone)]
pub struct ColumnUpdate {
    /// Positive: update existing column. Negative: add a new column.
    pub id: i64,
    pub value: Option<ColumnValue>,
    pub meta_properties: Option<MetaProperties>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discrete_long_axis(sorted: bool) -> Axis {
        Axis::new(
            1,
            "age",
            AxisType::Discrete,
            AxisValueType::Long,
            if sorted { ColumnOrder::Sorted } else { ColumnOrder::Display },
            false,
        )
        .unwrap()
    }

    #[test]
    fn sorted_discrete_axis_orders_columns_by_value() {
        let mut axis = discrete_long_axis(true);
        axis.add_column(Some(ColumnValue::Long(65)), MetaProperties::new()).unwrap();
        axis.add_column(Some(ColumnValue::Long(18)), MetaProperties::new()).unwrap();
        axis.add_column(Some(ColumnValue::Long(0)), MetaProperties::new()).unwrap();

        let values: Vec<i64> = axis
            .columns()
            .iter()
            .map(|c| match c.value.as_ref().unwrap() {
                ColumnValue::Long(n) => *n,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, vec![0, 18, 65]);
    }

    #[test]
    fn find_column_returns_default_or_none() {
        let mut axis = discrete_long_axis(true);
        axis.add_column(Some(ColumnValue::Long(18)), MetaProperties::new()).unwrap();

        assert!(axis.find_column(&ColumnValue::Long(7)).is_none());

        axis.add_column(None, MetaProperties::new()).unwrap();
        let found = axis.find_column(&ColumnValue::Long(7)).unwrap();
        assert!(found.is_default());

        let mid = axis.find_column(&ColumnValue::Long(18)).unwrap();
        assert!(!mid.is_default());
    }

    #[test]
    fn range_axis_rejects_overlap() {
        let mut axis = Axis::new(1, "age", AxisType::Range, AxisValueType::Long, ColumnOrder::Sorted, false).unwrap();
        axis.add_column(
            Some(ColumnValue::Range(long_range(0, 18))),
            MetaProperties::new(),
        )
        .unwrap();
        axis.add_column(
            Some(ColumnValue::Range(long_range(18, 30))),
            MetaProperties::new(),
        )
        .unwrap();
        axis.add_column(
            Some(ColumnValue::Range(long_range(65, 80))),
            MetaProperties::new(),
        )
        .unwrap();

        assert!(axis
            .add_column(Some(ColumnValue::Range(long_range(17, 20))), MetaProperties::new())
            .is_err());
        assert!(axis
            .add_column(Some(ColumnValue::Range(long_range(-150, 150))), MetaProperties::new())
            .is_err());
        assert!(axis
            .add_column(Some(ColumnValue::Range(long_range(30, 65))), MetaProperties::new())
            .is_ok());
        assert!(axis
            .add_column(Some(ColumnValue::Range(long_range(80, 100))), MetaProperties::new())
            .is_ok());
    }

    #[test]
    fn nearest_axis_cannot_have_default() {
        let err = Axis::new(1, "loc", AxisType::Nearest, AxisValueType::Comparable, ColumnOrder::Display, true)
            .unwrap_err();
        assert!(matches!(err, NCubeError::IllegalArgument(_)));
    }

    #[test]
    fn rule_axis_forces_display_and_expression() {
        let axis = Axis::new(
            1,
            "rule",
            AxisType::Rule,
            AxisValueType::String,
            ColumnOrder::Sorted,
            false,
        )
        .unwrap();
        assert_eq!(axis.order, ColumnOrder::Display);
        assert_eq!(axis.value_type, AxisValueType::Expression);
    }

    #[test]
    fn rule_columns_require_unique_name() {
        use crate::value::Expression;
        let mut axis = Axis::new(1, "rule", AxisType::Rule, AxisValueType::Expression, ColumnOrder::Display, false).unwrap();
        let mut meta_a = MetaProperties::new();
        meta_a.insert("name", serde_json::json!("r1"));
        axis.add_column(
            Some(ColumnValue::Expression(Expression { cmd: Some("true".into()), ..Default::default() })),
            meta_a,
        )
        .unwrap();

        let mut meta_b = MetaProperties::new();
        meta_b.insert("NAME", serde_json::json!("R1"));
        let err = axis
            .add_column(
                Some(ColumnValue::Expression(Expression { cmd: Some("false".into()), ..Default::default() })),
                meta_b,
            )
            .unwrap_err();
        assert!(matches!(err, NCubeError::AxisOverlap(_)));
    }

    use crate::value::Range;

    fn long_range(low: i64, high: i64) -> Range {
        Range::new(ColumnValue::Long(low), ColumnValue::Long(high)).unwrap()
    }
}
