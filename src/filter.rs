//! Three-outcome MIME policy.
//!
//! A pure decision over the detected type; translating each outcome into a
//! response (rejection, forced text/plain, passthrough) is the handlers'
//! job. Blacklist wins over whitelist, whitelist over sanitize.

use crate::config::FilterConfig;

/// Policy decision for one detected MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Serve/store with the detected type.
    Pass,
    /// Reject the request with the given reason.
    Deny(&'static str),
    /// Accept, but force the response content type to text/plain.
    Sanitize,
}

/// Run `mime` through the configured lists.
pub fn evaluate(filter: &FilterConfig, mime: &str) -> FilterOutcome {
    let contains = |list: &[String]| list.iter().any(|t| t.eq_ignore_ascii_case(mime));

    if !filter.blacklist.is_empty() && contains(&filter.blacklist) {
        return FilterOutcome::Deny("This file type is blacklisted.");
    }
    if !filter.whitelist.is_empty() && !contains(&filter.whitelist) {
        return FilterOutcome::Deny("This file type is not whitelisted.");
    }
    if !filter.sanitize.is_empty() && contains(&filter.sanitize) {
        return FilterOutcome::Sanitize;
    }
    FilterOutcome::Pass
}
