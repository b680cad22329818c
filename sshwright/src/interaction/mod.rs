//! Output-driven interaction automation.
//!
//! A [`RuleSet`] declares which output to watch for and what to type back.
//! An [`InteractionEngine`] binds a rule set to a channel's input sink,
//! listens to classified output lines, and answers matching prompts:
//!
//! ```rust
//! use sshwright::interaction::{Matcher, RuleSet};
//!
//! let rules = RuleSet::builder()
//!     .when(Matcher::contains("Are you sure"))
//!     .once()
//!     .reply_line("yes")
//!     .when(Matcher::partial(r"[Pp]assword: $").unwrap())
//!     .reply_line("secret")
//!     .build();
//! assert_eq!(rules.len(), 2);
//! ```
//!
//! Unmatched output is ignored; automation is best effort, not validation.

mod engine;
mod rules;

pub use engine::InteractionEngine;
pub use rules::{
    Firing, MatchOutcome, Matcher, Reply, Rule, RuleBuilder, RuleSet, RuleSetBuilder, StreamFilter,
};
