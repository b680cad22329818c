//! # sshwright
//!
//! Async remote command execution over SSH channels, with output
//! classification and rule-based interaction automation.
//!
//! - Foreground commands returning their standard output
//! - Background commands reporting through a callback
//! - Interactive shells driven by interaction rules
//! - Exit status enforcement with a guaranteed channel disconnect
//! - A scripted in-process connection for testing automation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sshwright::driver::{ExecutionSettings, ExecutorBuilder};
//! use sshwright::interaction::{Matcher, RuleSet};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sshwright::Error> {
//!     let executor = ExecutorBuilder::new("192.168.1.1")
//!         .username("admin")
//!         .private_key("/home/admin/.ssh/id_ed25519")
//!         .connect()
//!         .await?;
//!
//!     let settings = ExecutionSettings::default().with_interaction(
//!         RuleSet::builder()
//!             .when(Matcher::contains("Do you want to continue?"))
//!             .once()
//!             .reply_line("Y")
//!             .build(),
//!     );
//!
//!     let output = executor.execute(&settings, "sudo apt-get upgrade").await?;
//!     println!("{output}");
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod driver;
pub mod error;
pub mod interaction;
pub mod transport;

// Re-export main types for convenience
pub use channel::StreamTag;
pub use driver::{ExecutionSettings, Executor, ExecutorBuilder};
pub use error::{Error, Result};
pub use interaction::{Matcher, RuleSet};
pub use transport::{Connection, RemoteChannel, ScriptedConnection, SshTransport};
