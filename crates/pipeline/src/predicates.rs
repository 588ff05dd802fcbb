//! Kind-specific filters. Each one only has an opinion about its own
//! resource kind and lets every other notification through.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, ResourceQuota};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kevents_core::{Notification, NotificationKind, Payload};
use kevents_rules::{ClassificationRuleSet, InvolvedKind};

use crate::filter::Predicate;

/// Quota keys whose spec/status drift is worth recording.
pub const QUOTA_LIMIT_KEYS: &[&str] = &["limits.cpu", "limits.memory", "requests.cpu", "requests.memory"];

/// Drops Error notifications unless `permit_errors` is set.
#[derive(Debug, Clone, Copy)]
pub struct ErrorFilter {
    pub permit_errors: bool,
}

impl Predicate for ErrorFilter {
    fn name(&self) -> &'static str { "error" }
    fn test(&self, n: &Notification) -> bool { self.permit_errors || !n.is_error() }
}

/// Modified quotas pass only when a tracked hard limit differs between spec
/// and status.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceQuotaFilter;

impl ResourceQuotaFilter {
    pub fn limits_changed(rq: &ResourceQuota) -> bool {
        let spec = rq.spec.as_ref().and_then(|s| s.hard.as_ref());
        let status = rq.status.as_ref().and_then(|s| s.hard.as_ref());
        QUOTA_LIMIT_KEYS.iter().any(|k| quantity_differs(lookup(spec, k), lookup(status, k)))
    }
}

impl Predicate for ResourceQuotaFilter {
    fn name(&self) -> &'static str { "resource_quota" }
    fn test(&self, n: &Notification) -> bool {
        match (&n.payload, n.kind) {
            (Payload::ResourceQuota(rq), NotificationKind::Modified) => Self::limits_changed(rq),
            _ => true,
        }
    }
}

/// Modified claims pass only while they still carry finalizers and are not
/// being deleted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PvcFilter;

impl PvcFilter {
    pub fn is_live(pvc: &PersistentVolumeClaim) -> bool {
        let has_finalizers = pvc.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty());
        has_finalizers && pvc.metadata.deletion_timestamp.is_none()
    }
}

impl Predicate for PvcFilter {
    fn name(&self) -> &'static str { "pvc" }
    fn test(&self, n: &Notification) -> bool {
        match (&n.payload, n.kind) {
            (Payload::PersistentVolumeClaim(pvc), NotificationKind::Modified) => Self::is_live(pvc),
            _ => true,
        }
    }
}

/// Events pass when they are Added or Error, involve a supported kind and
/// are admitted by the rule set's allow-list. Watch failures pass untouched.
#[derive(Debug, Clone)]
pub struct EventFilter {
    rules: Arc<ClassificationRuleSet>,
}

impl EventFilter {
    pub fn new(rules: Arc<ClassificationRuleSet>) -> Self { Self { rules } }
}

impl Predicate for EventFilter {
    fn name(&self) -> &'static str { "event" }
    fn test(&self, n: &Notification) -> bool {
        let Payload::Event(ev) = &n.payload else { return true };
        // A failed watch carries no event to inspect; ErrorFilter decides.
        if n.is_watch_failure() {
            return true;
        }
        if !matches!(n.kind, NotificationKind::Added | NotificationKind::Error) {
            return false;
        }
        let involved = ev.involved_object.kind.as_deref().unwrap_or("");
        if involved.parse::<InvolvedKind>().is_err() {
            return false;
        }
        self.rules.admits(ev.reason.as_deref().unwrap_or(""), ev.message.as_deref().unwrap_or(""))
    }
}

fn lookup<'a>(m: Option<&'a BTreeMap<String, Quantity>>, key: &str) -> Option<&'a Quantity> { m.and_then(|m| m.get(key)) }

/// Exact comparison; absent means zero. Unparseable values fall back to
/// comparing the raw strings.
fn quantity_differs(a: Option<&Quantity>, b: Option<&Quantity>) -> bool {
    let value = |q: Option<&Quantity>| match q {
        Some(q) => parse_quantity(&q.0),
        None => Some(ParsedQuantity::ZERO),
    };
    match (value(a), value(b)) {
        (Some(x), Some(y)) => x != y,
        _ => a.map(|q| q.0.as_str()) != b.map(|q| q.0.as_str()),
    }
}

/// A quantity as `mantissa * 10^exp`, with trailing zeros folded into the
/// exponent so equal amounts compare equal whatever their spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParsedQuantity {
    mantissa: i128,
    exp: i32,
}

impl ParsedQuantity {
    pub const ZERO: Self = Self { mantissa: 0, exp: 0 };

    pub fn new(mut mantissa: i128, mut exp: i32) -> Self {
        if mantissa == 0 {
            return Self::ZERO;
        }
        while mantissa % 10 == 0 {
            mantissa /= 10;
            exp = exp.saturating_add(1);
        }
        Self { mantissa, exp }
    }

    pub fn mantissa(&self) -> i128 { self.mantissa }

    pub fn exp(&self) -> i32 { self.exp }
}

/// Powers of 1024.
const BINARY_SUFFIXES: &[(&str, u32)] = &[("Ki", 1), ("Mi", 2), ("Gi", 3), ("Ti", 4), ("Pi", 5), ("Ei", 6)];

/// Powers of ten.
const DECIMAL_SUFFIXES: &[(char, i32)] =
    &[('n', -9), ('u', -6), ('m', -3), ('k', 3), ('M', 6), ('G', 9), ('T', 12), ('P', 15), ('E', 18)];

/// Parse a Kubernetes quantity ("500m", "1Gi", "2", "1e3") exactly. `None`
/// when the text is not a quantity or its digits do not fit.
pub fn parse_quantity(s: &str) -> Option<ParsedQuantity> {
    let s = s.trim();
    for (suffix, power) in BINARY_SUFFIXES {
        if let Some(num) = s.strip_suffix(suffix) {
            let (mantissa, exp) = parse_decimal(num)?;
            let mantissa = mantissa.checked_mul(1024i128.checked_pow(*power)?)?;
            return Some(ParsedQuantity::new(mantissa, exp));
        }
    }
    let last = s.chars().last()?;
    // A trailing digit means no suffix, or a decimal exponent like "1e3".
    if last.is_ascii_digit() || last == '.' {
        let (num, shift) = match s.find(['e', 'E']) {
            Some(i) => (&s[..i], s[i + 1..].parse::<i32>().ok()?),
            None => (s, 0),
        };
        let (mantissa, exp) = parse_decimal(num)?;
        return Some(ParsedQuantity::new(mantissa, exp.checked_add(shift)?));
    }
    let (_, shift) = DECIMAL_SUFFIXES.iter().find(|(c, _)| *c == last)?;
    let (mantissa, exp) = parse_decimal(&s[..s.len() - last.len_utf8()])?;
    Some(ParsedQuantity::new(mantissa, exp.checked_add(*shift)?))
}

/// Signed decimal number to (digits, exponent of the last digit).
fn parse_decimal(s: &str) -> Option<(i128, i32)> {
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int, frac) = s.split_once('.').unwrap_or((s, ""));
    if int.is_empty() && frac.is_empty() {
        return None;
    }
    let mut mantissa: i128 = 0;
    for c in int.chars().chain(frac.chars()) {
        let d = c.to_digit(10)?;
        mantissa = mantissa.checked_mul(10)?.checked_add(i128::from(d))?;
    }
    let exp = -i32::try_from(frac.len()).ok()?;
    Some((if negative { -mantissa } else { mantissa }, exp))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity { Quantity(s.to_string()) }

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("2"), Some(ParsedQuantity::new(2, 0)));
        assert_eq!(parse_quantity("1Gi"), Some(ParsedQuantity::new(1_073_741_824, 0)));
        assert_eq!(parse_quantity("1e3"), Some(ParsedQuantity::new(1, 3)));
        assert_eq!(parse_quantity("2k"), Some(ParsedQuantity::new(2, 3)));
        assert_eq!(parse_quantity("1E"), Some(ParsedQuantity::new(1, 18)));
        assert_eq!(parse_quantity("250m"), Some(ParsedQuantity::new(25, -2)));
        assert_eq!(parse_quantity("-1.50"), Some(ParsedQuantity::new(-15, -1)));
        assert_eq!(parse_quantity("0.000"), Some(ParsedQuantity::ZERO));
        assert_eq!(parse_quantity("lots"), None);
        assert_eq!(parse_quantity("."), None);
        assert_eq!(parse_quantity(""), None);
    }

    #[test]
    fn large_values_compare_exactly() {
        assert!(quantity_differs(Some(&q("9007199254740993")), Some(&q("9007199254740992"))));
        assert!(quantity_differs(Some(&q("8Ei")), Some(&q("9223372036854775807"))));
        assert!(!quantity_differs(Some(&q("8Ei")), Some(&q("9223372036854775808"))));
        assert!(quantity_differs(Some(&q("1n")), Some(&q("0"))));
    }

    #[test]
    fn equal_spellings_do_not_differ() {
        assert!(!quantity_differs(Some(&q("1Gi")), Some(&q("1024Mi"))));
        assert!(!quantity_differs(Some(&q("1.5Gi")), Some(&q("1536Mi"))));
        assert!(!quantity_differs(Some(&q("1e3")), Some(&q("1k"))));
        assert!(!quantity_differs(Some(&q("1")), Some(&q("1000m"))));
        assert!(!quantity_differs(Some(&q("500m")), Some(&q("0.5"))));
        assert!(!quantity_differs(None, Some(&q("0"))));
        assert!(quantity_differs(Some(&q("2")), Some(&q("3"))));
        assert!(quantity_differs(Some(&q("x")), Some(&q("y"))));
        assert!(!quantity_differs(Some(&q("x")), Some(&q("x"))));
    }

    #[test]
    fn error_filter_toggle() {
        let cm = || Notification::new(NotificationKind::Error, k8s_openapi::api::core::v1::ConfigMap::default());
        assert!(!ErrorFilter { permit_errors: false }.test(&cm()));
        assert!(ErrorFilter { permit_errors: true }.test(&cm()));
    }
}
