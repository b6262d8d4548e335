//! Axis and cube data model for the N-Cube multi-dimensional decision table
//! store: typed axes with overlap detection, sparse cube cell storage, value
//! parsing, and the JSON wire format. Cube/branch lifecycle, reference axes,
//! permissions and persistence live in `ncube-registry`, one layer up.

pub mod axis;
pub mod cube;
pub mod error;
pub mod id;
pub mod json;
pub mod meta;
pub mod parse;
pub mod value;

pub use axis::{Axis, AxisType, AxisValueType, Column, ColumnOrder, ColumnUpdate, RefSpec};
pub use cube::{
    ApplicationID, ColumnIdSet, Cube, RuleEvaluation, RuleInfo, Status, BOOTSTRAP_VERSION, HEAD_BRANCH,
};
pub use error::{NCubeError, NCubeResult};
pub use meta::MetaProperties;
pub use value::{ColumnValue, Expression, LatLon, Point3D, Range, RangeSet, RangeSetMember};
