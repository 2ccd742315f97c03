//! Logging helpers with sensitive data redaction.
//!
//! Bearer tokens and key material must never reach log output raw. These
//! wrappers plug into `tracing` field syntax, e.g.
//! `info!(token = %RedactedToken(&auth.token), "authenticating")`.

use std::fmt;

/// A wrapper that redacts its contents entirely when displayed.
pub struct Redacted<T>(pub T);

impl<T: fmt::Display> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: fmt::Debug> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Redact a bearer token, showing only its length.
pub struct RedactedToken<'a>(pub &'a str);

impl<'a> fmt::Display for RedactedToken<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[bearer {} chars]", self.0.len())
    }
}

impl<'a> fmt::Debug for RedactedToken<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact a hex-encoded key, showing only the first and last 4 characters.
///
/// Public key material is not secret, but full keys bloat log lines and
/// invite copy-paste comparisons; the fingerprint APIs exist for that.
pub struct RedactedKey<'a>(pub &'a str);

impl<'a> fmt::Display for RedactedKey<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        if s.len() > 12 {
            write!(f, "{}...{}", &s[..4], &s[s.len() - 4..])
        } else {
            write!(f, "[REDACTED KEY]")
        }
    }
}

impl<'a> fmt::Debug for RedactedKey<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Patterns that mark a string as unsafe to log verbatim.
const SENSITIVE_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "private",
    "key",
    "token",
    "auth",
    "credential",
];

/// Check whether a string appears to contain sensitive data.
pub fn appears_sensitive(s: &str) -> bool {
    let lower = s.to_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitize remote-supplied text (error payloads, disconnect reasons) before
/// it is logged.
pub fn sanitize_for_log(s: &str) -> String {
    if appears_sensitive(s) {
        "[REDACTED]".to_string()
    } else {
        s.to_string()
    }
}
