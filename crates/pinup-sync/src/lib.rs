//! pinup-sync: bounded task pool, upload → pin pipeline, and the content tree

pub mod error;
pub mod notify;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod state;
pub mod tree;

pub use error::{PipelineError, PoolError, TreeError};
pub use notify::{LogNotifier, Notifier};
pub use pipeline::Pipeline;
pub use pool::TaskPool;
pub use registry::{Outcome, RegistrySummary, TaskRegistry};
pub use state::TreeStore;
pub use tree::{ContentTree, FileNode, FolderNode, Node, SharedTree};
