//! Column-value variants: the typed, comparable values that columns bind and
//! that coordinates are matched against.

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

/// A single bound, half of a [`Range`].
pub type Bound = ColumnValue;

/// A contiguous `[low, high)` interval. `low` is strictly less than `high`;
/// construction enforces this so that every live `Range` is well-formed.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub low: Box<ColumnValue>,
    pub high: Box<ColumnValue>,
}

impl Range {
    pub fn new(low: ColumnValue, high: ColumnValue) -> Result<Self, String> {
        match low.partial_cmp(&high) {
            Some(Ordering::Less) => Ok(Self {
                low: Box::new(low),
                high: Box::new(high),
            }),
            Some(_) => Err(format!(
                "range low must be strictly less than high, got [{low}, {high})"
            )),
            None => Err(format!(
                "range bounds are not comparable: {low} vs {high}"
            )),
        }
    }

    /// `a.low < b.high && b.low < a.high`
    pub fn overlaps(&self, other: &Range) -> bool {
        matches!(self.low.partial_cmp(&other.high), Some(Ordering::Less))
            && matches!(other.low.partial_cmp(&self.high), Some(Ordering::Less))
    }

    pub fn contains(&self, v: &ColumnValue) -> bool {
        matches!(self.low.partial_cmp(v), Some(Ordering::Less) | Some(Ordering::Equal))
            && matches!(v.partial_cmp(&self.high), Some(Ordering::Less))
    }
}

impl PartialOrd for Range {
    /// Lexicographic by `(low, high)`, as specified.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.low.partial_cmp(&other.low) {
            Some(Ordering::Equal) => self.high.partial_cmp(&other.high),
            other => other,
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.low, self.high)
    }
}

/// One member of a [`RangeSet`]: either a bare discrete point or a sub-range.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeSetMember {
    Point(ColumnValue),
    Range(Range),
}

impl RangeSetMember {
    fn overlaps_member(&self, other: &RangeSetMember) -> bool {
        match (self, other) {
            (RangeSetMember::Point(a), RangeSetMember::Point(b)) => a == b,
            (RangeSetMember::Point(p), RangeSetMember::Range(r))
            | (RangeSetMember::Range(r), RangeSetMember::Point(p)) => r.contains(p),
            (RangeSetMember::Range(a), RangeSetMember::Range(b)) => a.overlaps(b),
        }
    }
}

impl fmt::Display for RangeSetMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeSetMember::Point(v) => write!(f, "{v}"),
            RangeSetMember::Range(r) => write!(f, "{r}"),
        }
    }
}

/// An ordered collection of points and ranges bound together as one column value.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSet {
    pub members: Vec<RangeSetMember>,
}

impl RangeSet {
    pub fn new(members: Vec<RangeSetMember>) -> Self {
        Self { members }
    }

    /// Two range-sets overlap iff any element of one overlaps/equals any element of the other.
    pub fn overlaps(&self, other: &RangeSet) -> bool {
        self.members
            .iter()
            .any(|a| other.members.iter().any(|b| a.overlaps_member(b)))
    }

    pub fn contains(&self, v: &ColumnValue) -> bool {
        self.members.iter().any(|m| match m {
            RangeSetMember::Point(p) => p == v,
            RangeSetMember::Range(r) => r.contains(v),
        })
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.members.iter().map(|m| m.to_string()).collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// A nearest-neighbor point in two dimensions (used by NEAREST axes).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn distance(&self, other: &LatLon) -> f64 {
        ((self.lat - other.lat).powi(2) + (self.lon - other.lon).powi(2)).sqrt()
    }
}

impl fmt::Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.lat, self.lon)
    }
}

/// A nearest-neighbor point in three dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub fn distance(&self, other: &Point3D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }
}

impl fmt::Display for Point3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.x, self.y, self.z)
    }
}

/// A RULE column's compiled form. Execution is delegated entirely to the
/// injected `ExpressionEvaluator` port (see `ncube-registry`); this struct
/// only carries what the core itself needs to parse and serialize (§4.1).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Expression {
    /// The rule source text, `None` when only a `url` reference is given.
    pub cmd: Option<String>,
    /// `url|` option: load the source from this URL instead of `cmd`.
    pub url: Option<String>,
    /// `cache|` option: whether a URL-backed expression's fetched source may be cached.
    pub cacheable: bool,
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(url) = &self.url {
            write!(f, "url|")?;
            if self.cacheable {
                write!(f, "cache|")?;
            }
            write!(f, "{url}")
        } else {
            write!(f, "{}", self.cmd.as_deref().unwrap_or(""))
        }
    }
}

/// The value bound by a [`crate::axis::Column`].
///
/// Variants are grouped by how they participate in overlap detection and
/// ordering: scalar variants (`Str`..`Comparable`) support total ordering
/// among themselves when of the same kind; `Range`/`RangeSet` carry their
/// own overlap predicate; `LatLon`/`Point3D` are only ever compared by
/// distance (NEAREST axes never sort).
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Str(String),
    Long(i64),
    Double(f64),
    /// Stored as the original decimal text plus an `f64` approximation used
    /// purely for ordering/distance; see DESIGN.md for why no arbitrary
    /// precision decimal type is used.
    BigDecimal { raw: String, approx: f64 },
    Date(NaiveDateTime),
    Expression(Expression),
    /// Arbitrary JSON-object valued column (`AxisValueType::Comparable`).
    Comparable(JsonValue),
    Range(Range),
    RangeSet(RangeSet),
    LatLon(LatLon),
    Point3D(Point3D),
}

impl ColumnValue {
    /// Absolute-difference / euclidean distance used by NEAREST axes (§4.2).
    pub fn distance(&self, other: &ColumnValue) -> Option<f64> {
        match (self, other) {
            (ColumnValue::Long(a), ColumnValue::Long(b)) => Some((a - b).unsigned_abs() as f64),
            (ColumnValue::Double(a), ColumnValue::Double(b)) => Some((a - b).abs()),
            (ColumnValue::BigDecimal { approx: a, .. }, ColumnValue::BigDecimal { approx: b, .. }) => {
                Some((a - b).abs())
            }
            (ColumnValue::Date(a), ColumnValue::Date(b)) => {
                Some((*a - *b).num_seconds().unsigned_abs() as f64)
            }
            (ColumnValue::LatLon(a), ColumnValue::LatLon(b)) => Some(a.distance(b)),
            (ColumnValue::Point3D(a), ColumnValue::Point3D(b)) => Some(a.distance(b)),
            _ => None,
        }
    }

    /// A lowercase canonical form used for case-insensitive discrete/rule lookups.
    pub fn canonical_key(&self) -> String {
        match self {
            ColumnValue::Str(s) => s.to_lowercase(),
            other => other.to_string(),
        }
    }
}

impl PartialOrd for ColumnValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use ColumnValue::*;
        match (self, other) {
            (Str(a), Str(b)) => a.partial_cmp(b),
            (Long(a), Long(b)) => a.partial_cmp(b),
            (Double(a), Double(b)) => a.partial_cmp(b),
            (BigDecimal { approx: a, .. }, BigDecimal { approx: b, .. }) => a.partial_cmp(b),
            (Date(a), Date(b)) => a.partial_cmp(b),
            (Range(a), Range(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Str(s) => write!(f, "{s}"),
            ColumnValue::Long(n) => write!(f, "{n}"),
            ColumnValue::Double(d) => write!(f, "{d}"),
            ColumnValue::BigDecimal { raw, .. } => write!(f, "{raw}"),
            ColumnValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%dT%H:%M:%S")),
            ColumnValue::Expression(e) => write!(f, "{e}"),
            ColumnValue::Comparable(v) => write!(f, "{v}"),
            ColumnValue::Range(r) => write!(f, "{r}"),
            ColumnValue::RangeSet(rs) => write!(f, "{rs}"),
            ColumnValue::LatLon(p) => write!(f, "{p}"),
            ColumnValue::Point3D(p) => write!(f, "{p}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_overlap_matches_spec_predicate() {
        let a = Range::new(ColumnValue::Long(0), ColumnValue::Long(18)).unwrap();
        let b = Range::new(ColumnValue::Long(17), ColumnValue::Long(20)).unwrap();
        let c = Range::new(ColumnValue::Long(18), ColumnValue::Long(30)).unwrap();
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c), "half-open ranges touching at a boundary do not overlap");
    }

    #[test]
    fn range_rejects_low_equal_high() {
        let err = Range::new(ColumnValue::Long(5), ColumnValue::Long(5)).unwrap_err();
        assert!(err.contains("strictly less"));
    }

    #[test]
    fn range_ordering_is_lexicographic() {
        let a = Range::new(ColumnValue::Long(0), ColumnValue::Long(18)).unwrap();
        let b = Range::new(ColumnValue::Long(0), ColumnValue::Long(30)).unwrap();
        assert_eq!(a.partial_cmp(&b), Some(Ordering::Less));
    }

    #[test]
    fn rangeset_overlap_checks_every_pair() {
        let rs_a = RangeSet::new(vec![
            RangeSetMember::Point(ColumnValue::Long(4)),
            RangeSetMember::Range(Range::new(ColumnValue::Long(10), ColumnValue::Long(20)).unwrap()),
        ]);
        let rs_b = RangeSet::new(vec![RangeSetMember::Point(ColumnValue::Long(15))]);
        assert!(rs_a.overlaps(&rs_b));

        let rs_c = RangeSet::new(vec![RangeSetMember::Point(ColumnValue::Long(99))]);
        assert!(!rs_a.overlaps(&rs_c));
    }

    #[test]
    fn latlon_distance_is_euclidean() {
        let a = LatLon { lat: 0.0, lon: 0.0 };
        let b = LatLon { lat: 3.0, lon: 4.0 };
        assert_eq!(a.distance(&b), 5.0);
    }

    #[test]
    fn distance_across_mismatched_variants_is_none() {
        assert_eq!(
            ColumnValue::Long(1).distance(&ColumnValue::Str("x".into())),
            None
        );
    }
}
