//! Data shared by every layer: values, property maps, records and the
//! graph entities they can hold. Nothing here does I/O.

mod graph;
mod property_map;
mod record;
mod value;

pub use graph::{Direction, Node, NodeId, RelId, Relationship};
pub use property_map::PropertyMap;
pub use record::Record;
pub use value::{FromValue, Value};
