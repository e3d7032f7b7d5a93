pub mod error;
pub mod manager;
pub mod model;

pub use error::TaskError;
pub use manager::{TaskFeed, TaskManager};
pub use model::{Task, TaskId};
