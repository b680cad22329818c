//! Declarative interaction rules.

use std::sync::Arc;

use regex::{Captures, Regex};

use crate::channel::StreamTag;
use crate::error::{ChannelError, Result};

/// Which stream a rule listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamFilter {
    /// Lines from either stream.
    #[default]
    Any,
    /// Lines from one stream only.
    Only(StreamTag),
}

impl StreamFilter {
    pub fn accepts(&self, tag: StreamTag) -> bool {
        match self {
            StreamFilter::Any => true,
            StreamFilter::Only(only) => *only == tag,
        }
    }
}

/// How a rule recognizes output.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// A completed line containing the text.
    Contains(String),
    /// A completed line equal to the text.
    Exact(String),
    /// A completed line matched by the regex.
    Regex(Regex),
    /// The unterminated tail of the current line matched by the regex,
    /// e.g. a `Password: ` prompt. Fires at most once per line.
    Partial(Regex),
}

/// What a matcher saw, kept for rendering template replies.
#[derive(Debug)]
pub enum MatchOutcome<'t> {
    Plain,
    Captured(Captures<'t>),
}

impl Matcher {
    pub fn contains(text: impl Into<String>) -> Self {
        Matcher::Contains(text.into())
    }

    pub fn exact(text: impl Into<String>) -> Self {
        Matcher::Exact(text.into())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(Matcher::Regex(
            Regex::new(pattern).map_err(ChannelError::InvalidPattern)?,
        ))
    }

    pub fn partial(pattern: &str) -> Result<Self> {
        Ok(Matcher::Partial(
            Regex::new(pattern).map_err(ChannelError::InvalidPattern)?,
        ))
    }

    /// Whether this matcher looks at unterminated tails rather than lines.
    pub fn is_partial(&self) -> bool {
        matches!(self, Matcher::Partial(_))
    }

    /// Test `text` against this matcher.
    pub fn matches<'t>(&self, text: &'t str) -> Option<MatchOutcome<'t>> {
        match self {
            Matcher::Contains(needle) => text.contains(needle.as_str()).then_some(MatchOutcome::Plain),
            Matcher::Exact(expected) => (text == expected).then_some(MatchOutcome::Plain),
            Matcher::Regex(re) | Matcher::Partial(re) => re.captures(text).map(MatchOutcome::Captured),
        }
    }
}

/// Input written back when a rule fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Written verbatim.
    Text(String),
    /// Written followed by `\n`.
    Line(String),
    /// Regex capture references (`$1`, `${name}`) expanded from the match.
    /// Matchers without captures write the template unchanged.
    Template(String),
}

impl Reply {
    pub fn render(&self, outcome: &MatchOutcome<'_>) -> String {
        match self {
            Reply::Text(text) => text.clone(),
            Reply::Line(text) => format!("{text}\n"),
            Reply::Template(template) => match outcome {
                MatchOutcome::Captured(caps) => {
                    let mut out = String::new();
                    caps.expand(template, &mut out);
                    out
                }
                MatchOutcome::Plain => template.clone(),
            },
        }
    }
}

/// Whether a rule survives after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Firing {
    /// Stays eligible after firing.
    #[default]
    Repeat,
    /// Removed from the active set after its first match.
    Once,
}

/// One interaction rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub stream: StreamFilter,
    pub matcher: Matcher,
    /// `None` matches without writing anything.
    pub reply: Option<Reply>,
    pub firing: Firing,
    /// Rule set that replaces the active one after this rule fires.
    pub next: Option<RuleSet>,
}

impl Rule {
    pub fn new(matcher: Matcher) -> Self {
        Self {
            stream: StreamFilter::Any,
            matcher,
            reply: None,
            firing: Firing::Repeat,
            next: None,
        }
    }

    pub fn on(mut self, stream: StreamFilter) -> Self {
        self.stream = stream;
        self
    }

    pub fn reply(mut self, reply: Reply) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn once(mut self) -> Self {
        self.firing = Firing::Once;
        self
    }

    pub fn then(mut self, next: RuleSet) -> Self {
        self.next = Some(next);
        self
    }
}

/// Immutable, ordered snapshot of rules.
///
/// Cloning is cheap; the engine swaps whole snapshots instead of mutating
/// the rules it is iterating.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Arc<[Rule]>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: rules.into(),
        }
    }

    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Rule> {
        self.rules.get(index)
    }

    /// A new snapshot without the rule at `index`.
    pub fn without(&self, index: usize) -> Self {
        let rules: Vec<Rule> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, rule)| rule.clone())
            .collect();
        Self::new(rules)
    }
}

impl From<Vec<Rule>> for RuleSet {
    fn from(rules: Vec<Rule>) -> Self {
        Self::new(rules)
    }
}

/// Fluent construction of a [`RuleSet`].
///
/// Each rule starts with [`when`](Self::when) and ends with one of the
/// reply methods on [`RuleBuilder`].
#[derive(Debug, Default)]
pub struct RuleSetBuilder {
    rules: Vec<Rule>,
}

impl RuleSetBuilder {
    /// Start a rule with the given matcher.
    pub fn when(self, matcher: Matcher) -> RuleBuilder {
        RuleBuilder {
            builder: self,
            rule: Rule::new(matcher),
        }
    }

    /// Add an already built rule.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn build(self) -> RuleSet {
        RuleSet::new(self.rules)
    }
}

/// Intermediate state for the builder after `when()` is called.
#[derive(Debug)]
pub struct RuleBuilder {
    builder: RuleSetBuilder,
    rule: Rule,
}

impl RuleBuilder {
    /// Only match lines from standard output.
    pub fn on_stdout(mut self) -> Self {
        self.rule.stream = StreamFilter::Only(StreamTag::StandardOutput);
        self
    }

    /// Only match lines from standard error.
    pub fn on_stderr(mut self) -> Self {
        self.rule.stream = StreamFilter::Only(StreamTag::StandardError);
        self
    }

    /// Fire at most once.
    pub fn once(mut self) -> Self {
        self.rule.firing = Firing::Once;
        self
    }

    /// Replace the active rule set with `next` after firing.
    pub fn then(mut self, next: RuleSet) -> Self {
        self.rule.next = Some(next);
        self
    }

    pub fn reply(mut self, text: impl Into<String>) -> RuleSetBuilder {
        self.rule.reply = Some(Reply::Text(text.into()));
        self.finish()
    }

    pub fn reply_line(mut self, text: impl Into<String>) -> RuleSetBuilder {
        self.rule.reply = Some(Reply::Line(text.into()));
        self.finish()
    }

    pub fn reply_template(mut self, template: impl Into<String>) -> RuleSetBuilder {
        self.rule.reply = Some(Reply::Template(template.into()));
        self.finish()
    }

    /// Match without replying, e.g. to switch to a follow-up rule set.
    pub fn ignore(self) -> RuleSetBuilder {
        self.finish()
    }

    fn finish(mut self) -> RuleSetBuilder {
        self.builder.rules.push(self.rule);
        self.builder
    }
}
