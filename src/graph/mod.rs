//! Pipeline graph model.
//!
//! Nodes and edges live in id-indexed maps; edges refer to their endpoints by
//! id, never by reference, so snapshots serialize without cycles.
//!
//! ## Modules
//!
//! - [`models`] — `Node`, `Edge`, `Position`, `EntityRef`, `GraphModel`, `GraphDocument`
//! - [`gate`] — `Mutation` primitives and the atomic `GraphModel::apply_all` gate

pub mod gate;
pub mod models;

pub use gate::Mutation;
pub use models::{Edge, EntityRef, GraphDocument, GraphModel, Node, Position};
