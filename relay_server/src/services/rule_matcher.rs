//! Matches a commit branch against the configured commit response rules.

use crate::config::CommitRules;
use crate::models::rule::CommitResponseRule;

/// Result of matching one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatch<'a> {
    /// An ignore rule matched; nothing else is evaluated.
    Ignored(&'a CommitResponseRule),
    /// Respond rules whose prefix matched, in configuration order. May be empty.
    Matched(Vec<&'a CommitResponseRule>),
}

#[derive(Debug, Clone, Default)]
pub struct RuleMatcher {
    ignore: Vec<CommitResponseRule>,
    respond: Vec<CommitResponseRule>,
}

impl RuleMatcher {
    pub fn new(rules: CommitRules) -> Self {
        Self {
            ignore: rules.ignore,
            respond: rules.respond,
        }
    }

    /// Ignore rules are checked first and short-circuit.
    pub fn match_branch(&self, branch: &str) -> RuleMatch<'_> {
        if let Some(rule) = self.ignore.iter().find(|rule| rule.matches(branch)) {
            return RuleMatch::Ignored(rule);
        }

        RuleMatch::Matched(
            self.respond
                .iter()
                .filter(|rule| rule.matches(branch))
                .collect(),
        )
    }
}
