//! Rule interpreter bound to a channel's input sink.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, trace, warn};

use super::rules::{Firing, RuleSet};
use crate::channel::{InputSink, LineClassifier, LineListener, StreamTag};

/// Answers prompts on a channel according to a [`RuleSet`].
///
/// Clones share state, so one engine can be attached to both the standard
/// output and standard error classifiers of a channel and still fire each
/// single-shot rule only once.
#[derive(Debug, Clone)]
pub struct InteractionEngine {
    state: Arc<Mutex<EngineState>>,
}

#[derive(Debug)]
struct EngineState {
    rules: RuleSet,
    input: InputSink,
    /// Streams whose current unterminated line already fired a partial rule.
    partial_fired: HashSet<StreamTag>,
    replies: usize,
}

impl InteractionEngine {
    pub fn new(rules: RuleSet, input: InputSink) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState {
                rules,
                input,
                partial_fired: HashSet::new(),
                replies: 0,
            })),
        }
    }

    fn guard(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Listen to every line the classifier frames.
    pub fn attach(&self, classifier: &mut LineClassifier) {
        trace!("interaction: attached to {}", classifier.tag());
        classifier.add_listener(self.clone());
    }

    /// Offer a completed line. Returns whether a rule fired.
    pub fn on_line(&self, tag: StreamTag, line: &str) -> bool {
        let mut state = self.guard();
        state.partial_fired.remove(&tag);
        state.evaluate(tag, line, false)
    }

    /// Offer the unterminated tail of the current line. Returns whether a
    /// rule fired.
    pub fn on_partial(&self, tag: StreamTag, partial: &str) -> bool {
        let mut state = self.guard();
        if state.partial_fired.contains(&tag) {
            return false;
        }
        let fired = state.evaluate(tag, partial, true);
        if fired {
            state.partial_fired.insert(tag);
        }
        fired
    }

    /// Snapshot of the currently eligible rules.
    pub fn rules(&self) -> RuleSet {
        self.guard().rules.clone()
    }

    /// Number of replies written so far.
    pub fn replies(&self) -> usize {
        self.guard().replies
    }
}

impl EngineState {
    fn evaluate(&mut self, tag: StreamTag, text: &str, partial: bool) -> bool {
        let snapshot = self.rules.clone();

        for (index, rule) in snapshot.iter().enumerate() {
            if !rule.stream.accepts(tag) || rule.matcher.is_partial() != partial {
                continue;
            }
            let Some(outcome) = rule.matcher.matches(text) else {
                continue;
            };

            debug!("interaction: rule #{} matched on {}: {:?}", index, tag, text);

            if let Some(reply) = &rule.reply {
                let input = reply.render(&outcome);
                trace!("interaction: writing {} bytes", input.len());
                match self.input.write(input) {
                    Ok(()) => self.replies += 1,
                    Err(e) => warn!("interaction: reply for rule #{} dropped: {}", index, e),
                }
            }

            self.rules = match (&rule.next, rule.firing) {
                (Some(next), _) => next.clone(),
                (None, Firing::Once) => snapshot.without(index),
                (None, Firing::Repeat) => snapshot.clone(),
            };
            return true;
        }

        false
    }
}

impl LineListener for InteractionEngine {
    fn on_line(&mut self, tag: StreamTag, line: &str) {
        InteractionEngine::on_line(self, tag, line);
    }

    fn on_partial(&mut self, tag: StreamTag, partial: &str) {
        InteractionEngine::on_partial(self, tag, partial);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::channel::{LineCollector, OutputSink};
    use crate::interaction::Matcher;

    fn drain(rx: &mut UnboundedReceiver<Bytes>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            out.push(String::from_utf8_lossy(&bytes).into_owned());
        }
        out
    }

    #[test]
    fn test_single_fire_rule_writes_once() {
        let (input, mut rx) = InputSink::pair();
        let rules = RuleSet::builder()
            .when(Matcher::contains("continue?"))
            .on_stdout()
            .once()
            .reply("yes\n")
            .build();
        let engine = InteractionEngine::new(rules, input);

        assert!(engine.on_line(StreamTag::StandardOutput, "continue?"));
        assert!(!engine.on_line(StreamTag::StandardOutput, "continue?"));

        assert_eq!(drain(&mut rx), vec!["yes\n"]);
        assert!(engine.rules().is_empty());
        assert_eq!(engine.replies(), 1);
    }

    #[test]
    fn test_repeatable_rule_fires_every_time() {
        let (input, mut rx) = InputSink::pair();
        let rules = RuleSet::builder()
            .when(Matcher::exact("more?"))
            .reply_line("y")
            .build();
        let engine = InteractionEngine::new(rules, input);

        engine.on_line(StreamTag::StandardOutput, "more?");
        engine.on_line(StreamTag::StandardError, "more?");
        assert_eq!(drain(&mut rx), vec!["y\n", "y\n"]);
    }

    #[test]
    fn test_stream_filter_is_respected() {
        let (input, mut rx) = InputSink::pair();
        let rules = RuleSet::builder()
            .when(Matcher::contains("warn"))
            .on_stderr()
            .reply("ack\n")
            .build();
        let engine = InteractionEngine::new(rules, input);

        assert!(!engine.on_line(StreamTag::StandardOutput, "warn"));
        assert!(engine.on_line(StreamTag::StandardError, "warn"));
        assert_eq!(drain(&mut rx), vec!["ack\n"]);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let (input, mut rx) = InputSink::pair();
        let rules = RuleSet::builder()
            .when(Matcher::contains("pass"))
            .reply("first")
            .when(Matcher::contains("password"))
            .reply("second")
            .build();
        let engine = InteractionEngine::new(rules, input);

        engine.on_line(StreamTag::StandardOutput, "password");
        assert_eq!(drain(&mut rx), vec!["first"]);
    }

    #[test]
    fn test_unmatched_lines_are_ignored() {
        let (input, mut rx) = InputSink::pair();
        let rules = RuleSet::builder().when(Matcher::exact("x")).reply("y").build();
        let engine = InteractionEngine::new(rules, input);

        assert!(!engine.on_line(StreamTag::StandardOutput, "something else"));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(engine.rules().len(), 1);
    }

    #[test]
    fn test_follow_up_rule_set_replaces_active_rules() {
        let (input, mut rx) = InputSink::pair();
        let confirm = RuleSet::builder()
            .when(Matcher::contains("Confirm"))
            .reply_line("again")
            .build();
        let rules = RuleSet::builder()
            .when(Matcher::contains("New password"))
            .then(confirm)
            .reply_line("hunter2")
            .when(Matcher::contains("Confirm"))
            .reply_line("too early")
            .build();
        let engine = InteractionEngine::new(rules, input);

        engine.on_line(StreamTag::StandardOutput, "New password:");
        engine.on_line(StreamTag::StandardOutput, "New password:");
        engine.on_line(StreamTag::StandardOutput, "Confirm:");

        assert_eq!(drain(&mut rx), vec!["hunter2\n", "again\n"]);
        assert_eq!(engine.rules().len(), 1);
    }

    #[test]
    fn test_partial_rule_fires_once_per_line() {
        let (input, mut rx) = InputSink::pair();
        let rules = RuleSet::builder()
            .when(Matcher::partial(r"[Pp]assword: $").unwrap())
            .reply_line("secret")
            .build();
        let engine = InteractionEngine::new(rules, input);

        let mut classifier = LineClassifier::new(StreamTag::StandardOutput);
        engine.attach(&mut classifier);

        classifier.write(b"Password: ");
        classifier.write(b"");
        classifier.write(b"\nPassword: ");

        assert_eq!(drain(&mut rx), vec!["secret\n", "secret\n"]);
    }

    #[test]
    fn test_empty_rule_set_leaves_other_listeners_unchanged() {
        let (input, mut rx) = InputSink::pair();
        let engine = InteractionEngine::new(RuleSet::default(), input);

        let plain = LineCollector::new();
        let mut reference = LineClassifier::new(StreamTag::StandardOutput);
        reference.add_listener(plain.clone());

        let observed = LineCollector::new();
        let mut classifier = LineClassifier::new(StreamTag::StandardOutput);
        classifier.add_listener(observed.clone());
        engine.attach(&mut classifier);

        let feed: &[&[u8]] = &[b"one\r\ntw", b"o\n\nthr", b"ee"];
        for chunk in feed {
            reference.write(chunk);
            classifier.write(chunk);
        }
        reference.close();
        classifier.close();

        assert_eq!(observed.lines(), plain.lines());
        assert_eq!(observed.join().as_bytes(), plain.join().as_bytes());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_closed_input_does_not_panic() {
        let (input, rx) = InputSink::pair();
        drop(rx);
        let rules = RuleSet::builder().when(Matcher::exact("q")).reply("a").build();
        let engine = InteractionEngine::new(rules, input);

        assert!(engine.on_line(StreamTag::StandardOutput, "q"));
        assert_eq!(engine.replies(), 0);
    }
}
