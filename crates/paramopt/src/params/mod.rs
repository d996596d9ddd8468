//! Parameter groups and the flat parameter vector layout.
//!
//! A group is declared through one of three registration variants:
//!
//! - **scalar**: one parameter, named after the group;
//! - **fixed-3**: three parameters named `{group}{suffix}` with default
//!   suffixes `x`, `y`, `z`;
//! - **vector**: `N` parameters, `N` explicit or inferred from the getter, with
//!   default suffixes `0..N`.
//!
//! Every group owns a contiguous slice of the flat vector, appended in
//! registration order.

mod bound;
mod group;
mod registry;

pub use bound::Bound;
pub use group::{GroupOptions, ParamGroup};
pub use registry::ParamRegistry;

pub(crate) use group::{erase_getter, erase_setter, GroupKind};
pub(crate) use registry::GroupSpec;
