//! Resolves reference axes (§4.3): axes whose columns are borrowed from
//! another cube's axis, optionally filtered through a transform cube.
//!
//! Grounded on `prost_build::message_graph::MessageGraph`'s visited-node
//! recursion-detection shape (`message_graph.rs`), with `petgraph::Graph`
//! traded for a plain `HashSet` walk: reference chains are discovered lazily
//! through the `Persister` rather than available as a fully materialized
//! graph up front.

use std::collections::HashSet;

use ncube_core::axis::{Column, RefSpec};
use ncube_core::{ApplicationID, ColumnValue, NCubeError, NCubeResult, Status};

use crate::persister::{ExpressionEvaluator, Persister};

fn parse_status(s: &str) -> NCubeResult<Status> {
    match s.to_uppercase().as_str() {
        "SNAPSHOT" => Ok(Status::Snapshot),
        "RELEASE" => Ok(Status::Release),
        other => Err(NCubeError::illegal_state(format!("unknown status '{other}' in reference axis spec"))),
    }
}

/// Identifies one node visited while chasing a reference chain, to detect
/// a reference axis that (transitively) points at itself.
type VisitKey = (String, String, String, String, String, String, String);

fn visit_key(spec: &RefSpec) -> VisitKey {
    let s = &spec.source;
    (
        s.tenant.clone(),
        s.app.clone(),
        s.version.clone(),
        s.status.clone(),
        s.branch.clone(),
        s.cube_name.clone(),
        s.axis_name.clone(),
    )
}

pub struct ReferenceAxisLoader<'a> {
    persister: &'a dyn Persister,
    evaluator: &'a dyn ExpressionEvaluator,
}

impl<'a> ReferenceAxisLoader<'a> {
    pub fn new(persister: &'a dyn Persister, evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self { persister, evaluator }
    }

    /// Resolves `spec` into a concrete column list (§4.3 steps 1-4).
    pub fn load(&self, spec: &RefSpec) -> NCubeResult<Vec<Column>> {
        let mut visited = HashSet::new();
        self.load_inner(spec, &mut visited)
    }

    fn load_inner(&self, spec: &RefSpec, visited: &mut HashSet<VisitKey>) -> NCubeResult<Vec<Column>> {
        if !visited.insert(visit_key(spec)) {
            return Err(NCubeError::illegal_state(format!(
                "cyclic reference axis: '{}'.'{}' refers back to an axis already being resolved",
                spec.source.cube_name, spec.source.axis_name
            )));
        }

        let source = &spec.source;
        let app_id = ApplicationID::new(
            source.tenant.clone(),
            source.app.clone(),
            source.version.clone(),
            parse_status(&source.status)?,
            source.branch.clone(),
        );
        let cube = self
            .persister
            .load_cube(&app_id, &source.cube_name)?
            .ok_or_else(|| {
                NCubeError::illegal_state(format!("reference source cube '{}' not found", source.cube_name))
            })?;
        let axis = cube.axis(&source.axis_name).ok_or_else(|| {
            NCubeError::illegal_state(format!(
                "reference source axis '{}' not found on cube '{}'",
                source.axis_name, source.cube_name
            ))
        })?;

        let mut columns = match &axis.reference {
            Some(inner) => self.load_inner(inner, visited)?,
            None => axis.columns().iter().filter(|c| !c.is_default()).cloned().collect(),
        };

        if let Some(transform) = &spec.transform {
            columns = self.apply_transform(transform, columns)?;
        }

        Ok(columns)
    }

    fn apply_transform(
        &self,
        transform: &ncube_core::axis::RefTransform,
        columns: Vec<Column>,
    ) -> NCubeResult<Vec<Column>> {
        let app_id = ApplicationID::new(
            transform.tenant.clone(),
            transform.app.clone(),
            transform.version.clone(),
            parse_status(&transform.status)?,
            transform.branch.clone(),
        );
        let transform_cube = self
            .persister
            .load_cube(&app_id, &transform.cube_name)?
            .ok_or_else(|| {
                NCubeError::illegal_state(format!("transform cube '{}' not found", transform.cube_name))
            })?;
        let method_axis = transform_cube.axis("method").ok_or_else(|| {
            NCubeError::illegal_state(format!(
                "transform cube '{}' has no 'method' axis",
                transform.cube_name
            ))
        })?;
        let method_column = method_axis
            .columns()
            .iter()
            .find(|c| c.rule_name().map(|n| n.eq_ignore_ascii_case(&transform.method_name)).unwrap_or(false))
            .ok_or_else(|| {
                NCubeError::illegal_state(format!(
                    "transform cube '{}' has no method column named '{}'",
                    transform.cube_name, transform.method_name
                ))
            })?;
        let source_text = match &method_column.value {
            Some(ColumnValue::Expression(e)) => e.cmd.clone().unwrap_or_default(),
            _ => {
                return Err(NCubeError::illegal_state(format!(
                    "transform method column '{}' is not an expression",
                    transform.method_name
                )))
            }
        };

        let values: Vec<ColumnValue> = columns.iter().filter_map(|c| c.value.clone()).collect();
        let new_values = self.evaluator.transform_columns(&source_text, &values)?;

        Ok(new_values
            .into_iter()
            .enumerate()
            .map(|(i, value)| match columns.get(i) {
                Some(existing) => Column {
                    id: existing.id,
                    value: Some(value),
                    display_order: existing.display_order,
                    meta_properties: existing.meta_properties.clone(),
                },
                None => Column {
                    id: -(i as i64) - 1,
                    value: Some(value),
                    display_order: i as i32,
                    meta_properties: ncube_core::MetaProperties::new(),
                },
            })
            .collect())
    }
}
