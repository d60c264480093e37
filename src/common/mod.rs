// Shared containers and descriptors used across the core.

pub mod buf;
pub mod list;
pub mod queue;

pub use buf::{Buf, BufFlags, Chain};
pub use list::AppendList;
pub use queue::{NodeId, Queue};
