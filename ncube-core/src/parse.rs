//! Parses textual column values into [`ColumnValue`]s according to the
//! axis's type and value-type (§4.1).

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::axis::{AxisType, AxisValueType};
use crate::error::{NCubeError, NCubeResult};
use crate::value::{ColumnValue, Expression, LatLon, Point3D, Range, RangeSet, RangeSetMember};

/// Parses a single discrete-shaped token (no range/set wrapping) into the
/// `ColumnValue` matching `value_type`.
pub fn parse_discrete(value_type: AxisValueType, token: &str, axis_name: &str) -> NCubeResult<ColumnValue> {
    let token = token.trim();
    match value_type {
        AxisValueType::String => Ok(ColumnValue::Str(unquote(token))),
        AxisValueType::Long => token
            .parse::<i64>()
            .map(ColumnValue::Long)
            .map_err(|_| bad_token(token, axis_name, "LONG")),
        AxisValueType::Double => token
            .parse::<f64>()
            .map(ColumnValue::Double)
            .map_err(|_| bad_token(token, axis_name, "DOUBLE")),
        AxisValueType::BigDecimal => {
            let approx: f64 = token.parse().map_err(|_| bad_token(token, axis_name, "BIG_DECIMAL"))?;
            Ok(ColumnValue::BigDecimal {
                raw: token.to_string(),
                approx,
            })
        }
        AxisValueType::Date => parse_date(token, axis_name).map(ColumnValue::Date),
        AxisValueType::Comparable => {
            let json: serde_json::Value = serde_json::from_str(token)
                .map_err(|_| bad_token(token, axis_name, "COMPARABLE (JSON object)"))?;
            Ok(ColumnValue::Comparable(json))
        }
        AxisValueType::Expression => Ok(ColumnValue::Expression(parse_rule(token))),
    }
}

fn bad_token(token: &str, axis_name: &str, kind: &str) -> NCubeError {
    NCubeError::illegal_argument(format!(
        "'{token}' is not a valid {kind} value for axis '{axis_name}'"
    ))
}

/// Several common date formats are accepted, tried in order: `YYYY/MM/DD`,
/// `MM/DD/YYYY`, `Mon DD YYYY [HH:MM:SS]`, and ISO-8601.
fn parse_date(token: &str, axis_name: &str) -> NCubeResult<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(token, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(token, "%Y-%m-%d") {
        return Ok(d.and_time(NaiveTime::MIN));
    }
    if let Ok(d) = NaiveDate::parse_from_str(token, "%Y/%m/%d") {
        return Ok(d.and_time(NaiveTime::MIN));
    }
    if let Ok(d) = NaiveDate::parse_from_str(token, "%m/%d/%Y") {
        return Ok(d.and_time(NaiveTime::MIN));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(token, "%b %d %Y %H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(token, "%b %d %Y") {
        return Ok(d.and_time(NaiveTime::MIN));
    }
    Err(bad_token(token, axis_name, "DATE"))
}

/// `"low, high"` or `"[low, high]"`; fails on `low == high` or a bad bound.
pub fn parse_range(value_type: AxisValueType, token: &str, axis_name: &str) -> NCubeResult<ColumnValue> {
    let inner = token.trim().trim_start_matches('[').trim_end_matches(']');
    let (low_tok, high_tok) = split_once_top_level(inner).ok_or_else(|| {
        NCubeError::illegal_argument(format!(
            "'{token}' is not a valid RANGE (expected \"low, high\") for axis '{axis_name}'"
        ))
    })?;
    let low = parse_discrete(value_type, low_tok.trim(), axis_name)?;
    let high = parse_discrete(value_type, high_tok.trim(), axis_name)?;
    Range::new(low, high)
        .map(ColumnValue::Range)
        .map_err(NCubeError::illegal_argument)
}

/// Comma-separated discrete tokens and bracketed `[low, high]` ranges.
pub fn parse_set(value_type: AxisValueType, token: &str, axis_name: &str) -> NCubeResult<ColumnValue> {
    let mut members = Vec::new();
    for part in split_top_level(token) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if part.eq_ignore_ascii_case("null") {
            return Err(NCubeError::illegal_argument(format!(
                "null members are not permitted inside a SET value on axis '{axis_name}'"
            )));
        }
        if part.starts_with('[') && part.ends_with(']') {
            match parse_range(value_type, part, axis_name)? {
                ColumnValue::Range(r) => members.push(RangeSetMember::Range(r)),
                _ => unreachable!(),
            }
        } else {
            members.push(RangeSetMember::Point(parse_discrete(value_type, part, axis_name)?));
        }
    }
    if members.is_empty() {
        return Err(NCubeError::illegal_argument(format!(
            "SET value on axis '{axis_name}' must contain at least one member"
        )));
    }
    Ok(ColumnValue::RangeSet(RangeSet::new(members)))
}

/// `"x, y"` -> `LatLon`, `"x, y, z"` -> `Point3D` (NEAREST / COMPARABLE).
pub fn parse_nearest(token: &str, axis_name: &str) -> NCubeResult<ColumnValue> {
    let parts: Vec<&str> = split_top_level(token).into_iter().map(|p| p.trim()).collect();
    let as_f64 = |s: &str| -> NCubeResult<f64> {
        s.parse::<f64>()
            .map_err(|_| NCubeError::illegal_argument(format!("'{s}' is not numeric for axis '{axis_name}'")))
    };
    match parts.as_slice() {
        [x, y] => Ok(ColumnValue::LatLon(LatLon {
            lat: as_f64(x)?,
            lon: as_f64(y)?,
        })),
        [x, y, z] => Ok(ColumnValue::Point3D(Point3D {
            x: as_f64(x)?,
            y: as_f64(y)?,
            z: as_f64(z)?,
        })),
        _ => Err(NCubeError::illegal_argument(format!(
            "'{token}' is not a valid NEAREST point (expected \"x, y\" or \"x, y, z\") for axis '{axis_name}'"
        ))),
    }
}

/// Pipe-prefixed options in any order from `{url|, cache|}` followed by the payload.
pub fn parse_rule(token: &str) -> Expression {
    let mut url = false;
    let mut cacheable = false;
    let mut rest = token;
    loop {
        if let Some(stripped) = rest.strip_prefix("url|") {
            url = true;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("cache|") {
            cacheable = true;
            rest = stripped;
        } else {
            break;
        }
    }
    if url {
        Expression {
            cmd: None,
            url: Some(rest.to_string()),
            cacheable,
        }
    } else {
        Expression {
            cmd: Some(rest.to_string()),
            url: None,
            cacheable,
        }
    }
}

/// Dispatches to the right parser for `(axis_type, value_type)`; the entry
/// point used by `Axis`-level callers (§4.1).
pub fn parse_value(
    axis_type: AxisType,
    value_type: AxisValueType,
    token: &str,
    axis_name: &str,
) -> NCubeResult<ColumnValue> {
    match axis_type {
        AxisType::Range => parse_range(value_type, token, axis_name),
        AxisType::Set => parse_set(value_type, token, axis_name),
        AxisType::Nearest => parse_nearest(token, axis_name),
        AxisType::Rule => Ok(ColumnValue::Expression(parse_rule(token))),
        AxisType::Discrete => {
            if value_type == AxisValueType::Comparable {
                parse_nearest(token, axis_name).or_else(|_| parse_discrete(value_type, token, axis_name))
            } else {
                parse_discrete(value_type, token, axis_name)
            }
        }
    }
}

fn unquote(token: &str) -> String {
    if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
        token[1..token.len() - 1].replace("\\\"", "\"")
    } else {
        token.to_string()
    }
}

fn split_once_top_level(s: &str) -> Option<(&str, &str)> {
    let idx = top_level_comma_positions(s).into_iter().next()?;
    Some((&s[..idx], &s[idx + 1..]))
}

/// Splits on top-level commas, respecting double-quoted substrings with
/// backslash-escaped quotes so that delimiters inside quoted tokens are not
/// treated as separators (required for STRING/DATE members of a SET, §4.1).
fn split_top_level(s: &str) -> Vec<&str> {
    let positions = top_level_comma_positions(s);
    let mut parts = Vec::with_capacity(positions.len() + 1);
    let mut start = 0;
    for pos in positions {
        parts.push(&s[start..pos]);
        start = pos + 1;
    }
    parts.push(&s[start..]);
    parts
}

fn top_level_comma_positions(s: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut depth = 0i32;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '[' if !in_quotes => depth += 1,
            ']' if !in_quotes => depth -= 1,
            ',' if !in_quotes && depth == 0 => positions.push(i),
            _ => {}
        }
    }
    positions
}
