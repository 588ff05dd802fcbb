//! kube-events rules: immutable classification rule sets and the record transformer.

#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use kevents_core::{ResourceKind, ResourceType, Severity};
use regex::Regex;

pub mod classify;
pub mod reasons;

pub use classify::{ClassifyError, Classifier, RuleKey};
use reasons::Reason;

/// Kinds of involved objects whose Events are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvolvedKind {
    Pod,
    PersistentVolumeClaim,
    Node,
}

impl InvolvedKind {
    pub const ALL: [InvolvedKind; 3] = [InvolvedKind::Pod, InvolvedKind::PersistentVolumeClaim, InvolvedKind::Node];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvolvedKind::Pod => "Pod",
            InvolvedKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            InvolvedKind::Node => "Node",
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            InvolvedKind::Pod => ResourceType::Pod,
            InvolvedKind::PersistentVolumeClaim => ResourceType::Volume,
            InvolvedKind::Node => ResourceType::Node,
        }
    }
}

impl FromStr for InvolvedKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|k| k.as_str() == s).ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for InvolvedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Event rule scoped to one involved kind. Scoped rules are checked in the
/// order they were added; the first whose reason set matches wins.
#[derive(Debug, Clone)]
pub struct ScopedRule {
    pub scope: InvolvedKind,
    pub reasons: HashSet<String>,
    pub severity: Severity,
    pub name: String,
}

/// Immutable rule tables: the rule keys it classifies, scoped precedence
/// rules, the generic error-reason set and the reason allow-list with
/// per-reason message deny patterns.
#[derive(Debug, Clone, Default)]
pub struct ClassificationRuleSet {
    supported: HashSet<RuleKey>,
    scoped: Vec<ScopedRule>,
    error_reasons: HashSet<String>,
    allowed: HashMap<String, Vec<Regex>>,
}

impl ClassificationRuleSet {
    pub fn builder() -> RuleSetBuilder { RuleSetBuilder::default() }

    /// Rule set for the stock kubelet, scheduler and volume controller reasons.
    pub fn kubernetes_default() -> Result<Self, regex::Error> {
        let mut b = Self::builder()
            .support(ResourceKind::ALL.iter().copied().map(RuleKey::Resource))
            .support(InvolvedKind::ALL.into_iter().map(RuleKey::Event))
            .scoped(InvolvedKind::Pod, Severity::Warning, "PodFailed", reasons::POD_FAILED_REASONS)
            .scoped(InvolvedKind::Pod, Severity::Warning, "PodKillFailed", reasons::POD_KILL_FAILED_REASONS)
            .scoped(
                InvolvedKind::PersistentVolumeClaim,
                Severity::Info,
                "VolumeSuccessful",
                reasons::VOLUME_PROVISIONED_REASONS,
            )
            .error_reasons(reasons::ERROR_REASONS);
        for (reason, deny) in reasons::ALLOWED_REASONS {
            b = b.allow(*reason, deny);
        }
        b.build()
    }

    pub fn supports(&self, key: RuleKey) -> bool { self.supported.contains(&key) }

    /// First scoped rule for `scope` whose reasons contain `reason`.
    pub fn scoped_match(&self, scope: InvolvedKind, reason: &str) -> Option<&ScopedRule> {
        self.scoped.iter().find(|r| r.scope == scope && r.reasons.contains(reason))
    }

    pub fn is_error_reason(&self, reason: &str) -> bool { self.error_reasons.contains(reason) }

    /// Allow-list check: the reason must be listed and the message must not
    /// match any of its deny patterns.
    pub fn admits(&self, reason: &str, message: &str) -> bool {
        match self.allowed.get(reason) {
            Some(deny) => !deny.iter().any(|re| re.is_match(message)),
            None => false,
        }
    }

    pub fn allowed_len(&self) -> usize { self.allowed.len() }
}

/// Builder collecting rule tables; regexes are compiled in `build`.
#[derive(Debug, Default)]
pub struct RuleSetBuilder {
    supported: HashSet<RuleKey>,
    scoped: Vec<ScopedRule>,
    error_reasons: HashSet<String>,
    allowed: Vec<(String, Vec<String>)>,
}

impl RuleSetBuilder {
    /// Classify notifications under these keys. Anything else is refused.
    pub fn support(mut self, keys: impl IntoIterator<Item = RuleKey>) -> Self {
        self.supported.extend(keys);
        self
    }

    /// Add a scoped rule; its Event scope becomes supported.
    pub fn scoped(mut self, scope: InvolvedKind, severity: Severity, name: &str, reasons: &[Reason]) -> Self {
        self.supported.insert(RuleKey::Event(scope));
        let reasons = reasons.iter().flat_map(|r| r.spellings()).map(str::to_string).collect();
        self.scoped.push(ScopedRule { scope, reasons, severity, name: name.to_string() });
        self
    }

    pub fn error_reasons(mut self, reasons: &[Reason]) -> Self {
        self.error_reasons.extend(reasons.iter().flat_map(|r| r.spellings()).map(str::to_string));
        self
    }

    /// Allow `reason` unless the message matches one of `deny`. Allowing the
    /// same spelling twice unions the deny patterns.
    pub fn allow(mut self, reason: Reason, deny: &[&str]) -> Self {
        for spelling in reason.spellings() {
            self.allowed.push((spelling.to_string(), deny.iter().map(|d| d.to_string()).collect()));
        }
        self
    }

    /// Allow a raw reason string not covered by the constants.
    pub fn allow_raw(mut self, reason: &str, deny: &[&str]) -> Self {
        self.allowed.push((reason.to_string(), deny.iter().map(|d| d.to_string()).collect()));
        self
    }

    pub fn build(self) -> Result<ClassificationRuleSet, regex::Error> {
        let mut allowed: HashMap<String, Vec<Regex>> = HashMap::new();
        for (reason, deny) in self.allowed {
            let entry = allowed.entry(reason).or_default();
            for pattern in deny {
                entry.push(Regex::new(&pattern)?);
            }
        }
        Ok(ClassificationRuleSet { supported: self.supported, scoped: self.scoped, error_reasons: self.error_reasons, allowed })
    }
}
