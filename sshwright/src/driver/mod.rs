//! High-level execution API.
//!
//! [`Executor`] runs shells and commands over any
//! [`Connection`](crate::transport::Connection), one channel per call, with
//! behaviour controlled by [`ExecutionSettings`].

mod background;
mod builder;
mod executor;
mod settings;

pub use background::BackgroundMonitor;
pub use builder::ExecutorBuilder;
pub use executor::{Executor, MISSING_EXIT_STATUS};
pub use settings::{ExecutionSettings, ResultCallback, SettingsOverride};
