//! Cube registry, branch/release lifecycle, reference-axis resolution and
//! the permission engine for N-Cube (§4.3, §4.5, §4.6, §4.7). Built on the
//! data model in `ncube-core` and the `Persister`/`ExpressionEvaluator`
//! ports this crate defines but never implements.

pub mod branch;
pub mod lock;
pub mod params;
pub mod permissions;
pub mod persister;
pub mod reference_axis;
pub mod registry;

pub use branch::BranchController;
pub use lock::AppLock;
pub use params::{ncube_params, NcubeParams};
pub use permissions::{Action, PermissionEngine};
pub use persister::{ExpressionEvaluator, NCubeInfoDto, Persister, SearchOptions};
pub use reference_axis::ReferenceAxisLoader;
pub use registry::Registry;
