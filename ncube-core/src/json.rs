//! The Cube JSON round-trip shape (§6): not a pretty-printer, a contract.
//! `Cube::to_json`/`Cube::from_json` are the only supported entry points;
//! both the column-list and indexed cell encodings round-trip losslessly.

use chrono::NaiveDateTime;
use serde_json::{json, Map, Value as JsonValue};

use crate::axis::{Axis, AxisType, AxisValueType, Column, ColumnOrder, RefCubeAxis, RefSpec, RefTransform};
use crate::cube::{ApplicationID, ColumnIdSet, Cube, Status};
use crate::error::{NCubeError, NCubeResult};
use crate::meta::MetaProperties;
use crate::value::{ColumnValue, Expression, LatLon, Point3D, Range, RangeSet, RangeSetMember};

fn axis_type_tag(t: AxisType) -> &'static str {
    match t {
        AxisType::Discrete => "DISCRETE",
        AxisType::Range => "RANGE",
        AxisType::Set => "SET",
        AxisType::Nearest => "NEAREST",
        AxisType::Rule => "RULE",
    }
}

fn axis_type_from_tag(tag: &str) -> NCubeResult<AxisType> {
    match tag {
        "DISCRETE" => Ok(AxisType::Discrete),
        "RANGE" => Ok(AxisType::Range),
        "SET" => Ok(AxisType::Set),
        "NEAREST" => Ok(AxisType::Nearest),
        "RULE" => Ok(AxisType::Rule),
        other => Err(NCubeError::illegal_argument(format!("unknown axis type '{other}'"))),
    }
}

fn value_type_tag(t: AxisValueType) -> &'static str {
    match t {
        AxisValueType::String => "STRING",
        AxisValueType::Long => "LONG",
        AxisValueType::BigDecimal => "BIG_DECIMAL",
        AxisValueType::Double => "DOUBLE",
        AxisValueType::Date => "DATE",
        AxisValueType::Expression => "EXPRESSION",
        AxisValueType::Comparable => "COMPARABLE",
    }
}

fn value_type_from_tag(tag: &str) -> NCubeResult<AxisValueType> {
    match tag {
        "STRING" => Ok(AxisValueType::String),
        "LONG" => Ok(AxisValueType::Long),
        "BIG_DECIMAL" => Ok(AxisValueType::BigDecimal),
        "DOUBLE" => Ok(AxisValueType::Double),
        "DATE" => Ok(AxisValueType::Date),
        "EXPRESSION" => Ok(AxisValueType::Expression),
        "COMPARABLE" => Ok(AxisValueType::Comparable),
        other => Err(NCubeError::illegal_argument(format!("unknown value type '{other}'"))),
    }
}

fn order_tag(o: ColumnOrder) -> &'static str {
    match o {
        ColumnOrder::Sorted => "SORTED",
        ColumnOrder::Display => "DISPLAY",
    }
}

fn order_from_tag(tag: &str) -> NCubeResult<ColumnOrder> {
    match tag {
        "SORTED" => Ok(ColumnOrder::Sorted),
        "DISPLAY" => Ok(ColumnOrder::Display),
        other => Err(NCubeError::illegal_argument(format!("unknown column order '{other}'"))),
    }
}

fn meta_to_json(meta: &MetaProperties) -> JsonValue {
    let mut map = Map::new();
    for (k, v) in meta.iter() {
        map.insert(k.to_string(), v.clone());
    }
    JsonValue::Object(map)
}

fn meta_from_json(value: Option<&JsonValue>) -> MetaProperties {
    let mut meta = MetaProperties::new();
    if let Some(JsonValue::Object(map)) = value {
        for (k, v) in map {
            meta.insert(k.clone(), v.clone());
        }
    }
    meta
}

/// Encodes a `ColumnValue` to its JSON value plus the `type`/`url`/`cache`
/// sidecar fields a *cell* (as opposed to a column) needs (§6).
fn encode_cell_value(v: &ColumnValue) -> (JsonValue, Option<&'static str>, Option<String>, Option<bool>) {
    match v {
        ColumnValue::Expression(e) => (
            match &e.cmd {
                Some(c) => JsonValue::String(c.clone()),
                None => JsonValue::Null,
            },
            Some("exp"),
            e.url.clone(),
            if e.url.is_some() { Some(e.cacheable) } else { None },
        ),
        other => (encode_scalar(other), Some(scalar_type_tag(other)), None, None),
    }
}

fn scalar_type_tag(v: &ColumnValue) -> &'static str {
    match v {
        ColumnValue::Str(_) => "string",
        ColumnValue::Long(_) => "long",
        ColumnValue::Double(_) => "double",
        ColumnValue::BigDecimal { .. } => "big_decimal",
        ColumnValue::Date(_) => "date",
        ColumnValue::Comparable(_) => "comparable",
        ColumnValue::Range(_) => "range",
        ColumnValue::RangeSet(_) => "range_set",
        ColumnValue::LatLon(_) => "latlon",
        ColumnValue::Point3D(_) => "point3d",
        ColumnValue::Expression(_) => "exp",
    }
}

fn encode_scalar(v: &ColumnValue) -> JsonValue {
    match v {
        ColumnValue::Str(s) => json!(s),
        ColumnValue::Long(n) => json!(n),
        ColumnValue::Double(d) => json!(d),
        ColumnValue::BigDecimal { raw, .. } => json!(raw),
        ColumnValue::Date(d) => json!(d.format("%Y-%m-%dT%H:%M:%S").to_string()),
        ColumnValue::Comparable(j) => j.clone(),
        ColumnValue::Range(r) => encode_range_bounds(r),
        ColumnValue::RangeSet(rs) => JsonValue::Array(
            rs.members
                .iter()
                .map(|m| match m {
                    RangeSetMember::Point(p) => encode_tagged_scalar(p),
                    RangeSetMember::Range(r) => encode_range_bounds(r),
                })
                .collect(),
        ),
        ColumnValue::LatLon(p) => json!({"lat": p.lat, "lon": p.lon}),
        ColumnValue::Point3D(p) => json!({"x": p.x, "y": p.y, "z": p.z}),
        ColumnValue::Expression(e) => json!(e.to_string()),
    }
}

/// Tags a scalar with its `scalar_type_tag` so a bound/point nested inside a
/// `Range`/`RangeSet` (which otherwise carries no type of its own) can be
/// decoded back to the right `ColumnValue` variant instead of guessed from
/// the raw JSON primitive.
fn encode_tagged_scalar(v: &ColumnValue) -> JsonValue {
    json!({"value": encode_scalar(v), "type": scalar_type_tag(v)})
}

fn decode_tagged_scalar(json: &JsonValue) -> NCubeResult<ColumnValue> {
    let type_tag = json
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NCubeError::illegal_argument("range bound missing 'type'"))?;
    let value = json
        .get("value")
        .ok_or_else(|| NCubeError::illegal_argument("range bound missing 'value'"))?;
    decode_scalar(type_tag, value)
}

fn encode_range_bounds(r: &Range) -> JsonValue {
    json!({"low": encode_tagged_scalar(&r.low), "high": encode_tagged_scalar(&r.high)})
}

fn decode_range_bounds(json: &JsonValue) -> NCubeResult<Range> {
    let low = decode_tagged_scalar(
        json.get("low").ok_or_else(|| NCubeError::illegal_argument("missing 'low' bound"))?,
    )?;
    let high = decode_tagged_scalar(
        json.get("high").ok_or_else(|| NCubeError::illegal_argument("missing 'high' bound"))?,
    )?;
    Range::new(low, high).map_err(NCubeError::illegal_argument)
}

fn decode_scalar(type_tag: &str, value: &JsonValue) -> NCubeResult<ColumnValue> {
    let bad = |why: &str| NCubeError::illegal_argument(format!("cannot decode {type_tag} value: {why}"));
    match type_tag {
        "string" => Ok(ColumnValue::Str(
            value.as_str().ok_or_else(|| bad("not a string"))?.to_string(),
        )),
        "long" => Ok(ColumnValue::Long(value.as_i64().ok_or_else(|| bad("not an integer"))?)),
        "double" => Ok(ColumnValue::Double(
            value.as_f64().ok_or_else(|| bad("not a number"))?,
        )),
        "big_decimal" => {
            let raw = value.as_str().ok_or_else(|| bad("not a string"))?.to_string();
            let approx: f64 = raw.parse().map_err(|_| bad("not numeric"))?;
            Ok(ColumnValue::BigDecimal { raw, approx })
        }
        "date" => {
            let s = value.as_str().ok_or_else(|| bad("not a string"))?;
            let dt = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").map_err(|_| bad("bad date"))?;
            Ok(ColumnValue::Date(dt))
        }
        "comparable" => Ok(ColumnValue::Comparable(value.clone())),
        "range" => decode_range_bounds(value).map(ColumnValue::Range),
        "range_set" => {
            let arr = value.as_array().ok_or_else(|| bad("not an array"))?;
            let mut members = Vec::new();
            for item in arr {
                if item.get("low").is_some() {
                    members.push(RangeSetMember::Range(decode_range_bounds(item)?));
                } else {
                    members.push(RangeSetMember::Point(decode_tagged_scalar(item)?));
                }
            }
            Ok(ColumnValue::RangeSet(RangeSet::new(members)))
        }
        "latlon" => {
            let lat = value.get("lat").and_then(|v| v.as_f64()).ok_or_else(|| bad("missing lat"))?;
            let lon = value.get("lon").and_then(|v| v.as_f64()).ok_or_else(|| bad("missing lon"))?;
            Ok(ColumnValue::LatLon(LatLon { lat, lon }))
        }
        "point3d" => {
            let x = value.get("x").and_then(|v| v.as_f64()).ok_or_else(|| bad("missing x"))?;
            let y = value.get("y").and_then(|v| v.as_f64()).ok_or_else(|| bad("missing y"))?;
            let z = value.get("z").and_then(|v| v.as_f64()).ok_or_else(|| bad("missing z"))?;
            Ok(ColumnValue::Point3D(Point3D { x, y, z }))
        }
        "exp" => Ok(ColumnValue::Expression(Expression {
            cmd: if value.is_null() { None } else { value.as_str().map(|s| s.to_string()) },
            url: None,
            cacheable: false,
        })),
        other => Err(NCubeError::illegal_argument(format!("unknown cell type '{other}'"))),
    }
}

fn encode_column(col: &Column) -> JsonValue {
    let (value_json, type_tag, url, cache) = match &col.value {
        None => (JsonValue::Null, None, None, None),
        Some(v) => encode_cell_value(v),
    };
    let mut obj = Map::new();
    obj.insert("id".into(), json!(col.id));
    obj.insert("value".into(), value_json);
    if let Some(t) = type_tag {
        obj.insert("type".into(), json!(t));
    }
    if col.value.is_some() {
        obj.insert("displayOrder".into(), json!(col.display_order));
    }
    if let Some(u) = url {
        obj.insert("url".into(), json!(u));
    }
    if let Some(c) = cache {
        obj.insert("cache".into(), json!(c));
    }
    if !col.meta_properties.is_empty() {
        obj.insert("metaProperties".into(), meta_to_json(&col.meta_properties));
    }
    JsonValue::Object(obj)
}

fn decode_column(json: &JsonValue) -> NCubeResult<(i64, Option<ColumnValue>, i32, MetaProperties)> {
    let id = json
        .get("id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| NCubeError::illegal_argument("column missing 'id'"))?;
    let value = json.get("value").cloned().unwrap_or(JsonValue::Null);
    let meta = meta_from_json(json.get("metaProperties"));
    if value.is_null() {
        return Ok((id, None, crate::axis::MAX_DISPLAY_ORDER, meta));
    }
    let type_tag = json
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NCubeError::illegal_argument("non-default column missing 'type'"))?;
    let mut decoded = decode_scalar(type_tag, &value)?;
    if type_tag == "exp" {
        let url = json.get("url").and_then(|v| v.as_str()).map(|s| s.to_string());
        let cache = json.get("cache").and_then(|v| v.as_bool()).unwrap_or(false);
        if let ColumnValue::Expression(e) = &mut decoded {
            e.url = url;
            e.cacheable = cache;
        }
    }
    let display_order = json
        .get("displayOrder")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32)
        .unwrap_or(0);
    Ok((id, Some(decoded), display_order, meta))
}

fn encode_ref_cube_axis(r: &RefCubeAxis) -> JsonValue {
    json!({
        "tenant": r.tenant, "app": r.app, "version": r.version,
        "status": r.status, "branch": r.branch,
        "cubeName": r.cube_name, "axisName": r.axis_name,
    })
}

fn decode_ref_cube_axis(json: &JsonValue) -> NCubeResult<RefCubeAxis> {
    let field = |name: &str| -> NCubeResult<String> {
        json.get(name)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| NCubeError::illegal_argument(format!("reference source missing '{name}'")))
    };
    Ok(RefCubeAxis {
        tenant: field("tenant")?,
        app: field("app")?,
        version: field("version")?,
        status: field("status")?,
        branch: field("branch")?,
        cube_name: field("cubeName")?,
        axis_name: field("axisName")?,
    })
}

fn encode_ref_transform(t: &RefTransform) -> JsonValue {
    json!({
        "tenant": t.tenant, "app": t.app, "version": t.version,
        "status": t.status, "branch": t.branch,
        "cubeName": t.cube_name, "methodName": t.method_name,
    })
}

fn decode_ref_transform(json: &JsonValue) -> NCubeResult<RefTransform> {
    let field = |name: &str| -> NCubeResult<String> {
        json.get(name)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| NCubeError::illegal_argument(format!("reference transform missing '{name}'")))
    };
    Ok(RefTransform {
        tenant: field("tenant")?,
        app: field("app")?,
        version: field("version")?,
        status: field("status")?,
        branch: field("branch")?,
        cube_name: field("cubeName")?,
        method_name: field("methodName")?,
    })
}

fn encode_reference(r: &RefSpec) -> JsonValue {
    let mut obj = Map::new();
    obj.insert("source".into(), encode_ref_cube_axis(&r.source));
    if let Some(t) = &r.transform {
        obj.insert("transform".into(), encode_ref_transform(t));
    }
    JsonValue::Object(obj)
}

fn decode_reference(json: &JsonValue) -> NCubeResult<RefSpec> {
    let source = decode_ref_cube_axis(
        json.get("source").ok_or_else(|| NCubeError::illegal_argument("reference missing 'source'"))?,
    )?;
    let transform = match json.get("transform") {
        Some(t) if !t.is_null() => Some(decode_ref_transform(t)?),
        _ => None,
    };
    Ok(RefSpec { source, transform })
}

fn encode_axis(axis: &Axis) -> JsonValue {
    let mut obj = json!({
        "name": axis.name(),
        "type": axis_type_tag(axis.axis_type),
        "valueType": value_type_tag(axis.value_type),
        "hasDefault": axis.has_default,
        "preferredOrder": order_tag(axis.order),
        "id": axis.id,
        "columns": axis.columns().iter().map(encode_column).collect::<Vec<_>>(),
    });
    if let Some(r) = &axis.reference {
        obj.as_object_mut().unwrap().insert("reference".into(), encode_reference(r));
    }
    obj
}

/// Rebuilds an `Axis` from its JSON form. Column ids and display orders are
/// restored verbatim (not reassigned), since serialized ids must remain
/// stable for cells elsewhere in the cube to keep resolving.
fn decode_axis(json: &JsonValue) -> NCubeResult<Axis> {
    let name = json
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NCubeError::illegal_argument("axis missing 'name'"))?;
    let axis_type = axis_type_from_tag(
        json.get("type").and_then(|v| v.as_str()).ok_or_else(|| NCubeError::illegal_argument("axis missing 'type'"))?,
    )?;
    let value_type = value_type_from_tag(
        json.get("valueType")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NCubeError::illegal_argument("axis missing 'valueType'"))?,
    )?;
    let order = order_from_tag(
        json.get("preferredOrder")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NCubeError::illegal_argument("axis missing 'preferredOrder'"))?,
    )?;
    let has_default = json.get("hasDefault").and_then(|v| v.as_bool()).unwrap_or(false);
    let id = json.get("id").and_then(|v| v.as_u64()).unwrap_or(0) as u16;

    let mut axis = Axis::new(id, name, axis_type, value_type, order, false)?;
    let columns = json
        .get("columns")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    for col_json in &columns {
        let (col_id, value, display_order, meta) = decode_column(col_json)?;
        axis.restore_column(col_id, value, display_order, meta)?;
    }
    if has_default && !axis.has_default {
        return Err(NCubeError::illegal_argument(format!(
            "axis '{name}' declares hasDefault but no default column was present"
        )));
    }
    if let Some(reference_json) = json.get("reference") {
        axis.reference = Some(decode_reference(reference_json)?);
    }
    Ok(axis)
}

fn status_tag(s: Status) -> &'static str {
    match s {
        Status::Snapshot => "SNAPSHOT",
        Status::Release => "RELEASE",
    }
}

fn status_from_tag(tag: &str) -> NCubeResult<Status> {
    match tag {
        "SNAPSHOT" => Ok(Status::Snapshot),
        "RELEASE" => Ok(Status::Release),
        other => Err(NCubeError::illegal_argument(format!("unknown status '{other}'"))),
    }
}

fn encode_app_id(app: &ApplicationID) -> JsonValue {
    json!({
        "tenant": app.tenant,
        "app": app.app,
        "version": app.version,
        "status": status_tag(app.status),
        "branch": app.branch,
    })
}

fn decode_app_id(json: &JsonValue) -> NCubeResult<ApplicationID> {
    let field = |name: &str| -> NCubeResult<String> {
        json.get(name)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| NCubeError::illegal_argument(format!("applicationID missing '{name}'")))
    };
    Ok(ApplicationID::new(
        field("tenant")?,
        field("app")?,
        field("version")?,
        status_from_tag(&field("status")?)?,
        field("branch")?,
    ))
}

impl Cube {
    /// `indexFormat = false` emits cell ids as a plain `[colId, ...]` array;
    /// `true` emits them as a `{colId: axisName}` object (§6).
    pub fn to_json(&self, index_format: bool) -> JsonValue {
        let mut cells = Vec::with_capacity(self.cells().len());
        for (ids, value) in self.cells() {
            let (value_json, type_tag, url, cache) = encode_cell_value(value);
            let mut cell = Map::new();
            cell.insert("id".into(), self.encode_cell_id(ids, index_format));
            cell.insert("value".into(), value_json);
            if let Some(t) = type_tag {
                cell.insert("type".into(), json!(t));
            }
            if let Some(u) = url {
                cell.insert("url".into(), json!(u));
            }
            if let Some(c) = cache {
                cell.insert("cache".into(), json!(c));
            }
            cells.push(JsonValue::Object(cell));
        }

        let mut obj = Map::new();
        obj.insert("ncube".into(), json!(self.name()));
        obj.insert("applicationID".into(), encode_app_id(&self.application_id));
        obj.insert(
            "axes".into(),
            JsonValue::Array(self.axes().iter().map(encode_axis).collect()),
        );
        obj.insert("cells".into(), JsonValue::Array(cells));
        if let Some(def) = &self.default_cell_value {
            let (v, type_tag, url, cache) = encode_cell_value(def);
            let mut def_obj = Map::new();
            def_obj.insert("value".into(), v);
            if let Some(t) = type_tag {
                def_obj.insert("type".into(), json!(t));
            }
            if let Some(u) = url {
                def_obj.insert("url".into(), json!(u));
            }
            if let Some(c) = cache {
                def_obj.insert("cache".into(), json!(c));
            }
            obj.insert("defaultCellValue".into(), JsonValue::Object(def_obj));
        }
        if !self.meta_properties.is_empty() {
            obj.insert("metaProperties".into(), meta_to_json(&self.meta_properties));
        }
        obj.insert("sha1".into(), json!(self.fingerprint()));
        JsonValue::Object(obj)
    }

    fn encode_cell_id(&self, ids: &ColumnIdSet, index_format: bool) -> JsonValue {
        if !index_format {
            return JsonValue::Array(ids.iter().map(|id| json!(id)).collect());
        }
        let mut obj = Map::new();
        for id in ids {
            if let Some(axis) = self.axes().iter().find(|a| a.columns().iter().any(|c| c.id == *id)) {
                obj.insert(id.to_string(), json!(axis.name()));
            }
        }
        JsonValue::Object(obj)
    }

    pub fn from_json(json: &JsonValue) -> NCubeResult<Cube> {
        let name = json
            .get("ncube")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NCubeError::illegal_argument("cube JSON missing 'ncube'"))?;
        let app_id = decode_app_id(
            json.get("applicationID")
                .ok_or_else(|| NCubeError::illegal_argument("cube JSON missing 'applicationID'"))?,
        )?;
        let mut cube = Cube::new(name, app_id)?;

        let axes_json = json
            .get("axes")
            .and_then(|v| v.as_array())
            .ok_or_else(|| NCubeError::illegal_argument("cube JSON missing 'axes'"))?;
        let mut max_axis_id = 0u16;
        for axis_json in axes_json {
            let axis = decode_axis(axis_json)?;
            max_axis_id = max_axis_id.max(axis.id);
            cube.restore_axis(axis)?;
        }
        cube.set_next_axis_id(max_axis_id.saturating_add(1));

        if let Some(cells) = json.get("cells").and_then(|v| v.as_array()) {
            for cell_json in cells {
                let ids = cube.decode_cell_id(cell_json.get("id").ok_or_else(|| {
                    NCubeError::illegal_argument("cell missing 'id'")
                })?)?;
                let value_json = cell_json.get("value").cloned().unwrap_or(JsonValue::Null);
                let type_tag = cell_json
                    .get("type")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| NCubeError::illegal_argument("cell missing 'type'"))?;
                let mut value = decode_scalar(type_tag, &value_json)?;
                if type_tag == "exp" {
                    if let ColumnValue::Expression(e) = &mut value {
                        e.url = cell_json.get("url").and_then(|v| v.as_str()).map(|s| s.to_string());
                        e.cacheable = cell_json.get("cache").and_then(|v| v.as_bool()).unwrap_or(false);
                    }
                }
                cube.set_cell(ids, value);
            }
        }

        if let Some(def) = json.get("defaultCellValue") {
            if !def.is_null() {
                let value_json = def.get("value").cloned().unwrap_or(JsonValue::Null);
                let type_tag = def
                    .get("type")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| NCubeError::illegal_argument("defaultCellValue missing 'type'"))?;
                let mut value = decode_scalar(type_tag, &value_json)?;
                if type_tag == "exp" {
                    if let ColumnValue::Expression(e) = &mut value {
                        e.url = def.get("url").and_then(|v| v.as_str()).map(|s| s.to_string());
                        e.cacheable = def.get("cache").and_then(|v| v.as_bool()).unwrap_or(false);
                    }
                }
                cube.default_cell_value = Some(value);
            }
        }
        cube.meta_properties = meta_from_json(json.get("metaProperties"));

        Ok(cube)
    }

    fn decode_cell_id(&self, json: &JsonValue) -> NCubeResult<ColumnIdSet> {
        match json {
            JsonValue::Array(arr) => Ok(arr
                .iter()
                .filter_map(|v| v.as_i64())
                .collect::<ColumnIdSet>()),
            JsonValue::Object(map) => Ok(map
                .keys()
                .filter_map(|k| k.parse::<i64>().ok())
                .collect::<ColumnIdSet>()),
            other => Err(NCubeError::illegal_argument(format!("cell id must be an array or object, got {other}"))),
        }
    }
}
