#[allow(clippy::module_inception)]
mod cluster;
mod health;
mod node;

pub use self::cluster::{Cluster, RouteHint};
pub use self::node::{CbState, Node, NodeStats};
