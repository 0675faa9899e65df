//! Program model for nodeflow: values, operators, the nested node document
//! and its id-addressed arena.

mod edit;
mod node;
mod operator;
mod tree;
mod value;

pub use self::edit::{NodeUpdate, Placement, VarLabel};
pub use self::node::{NodeId, NodeKind, NodeTag, ProgramNode};
pub use self::operator::{Operation, UnknownOperation};
pub use self::tree::{NodeRecord, ParentLink, ProgramTree, TreeError};
pub use self::value::{Value, ValueKind, format_number, parse_number_prefix};
