//! Access policy for protected manager operations.
//!
//! Each protected operation may carry a rule. Operations without a rule are
//! open to every caller.
//!
//! # Check Order
//!
//! 1. The rule lists capabilities and the caller holds none of them -> deny
//! 2. The rule lists executables and the caller's image is one of them (or
//!    cannot be resolved) -> deny
//! 3. The rule lists uids and the caller's uid is one of them -> deny
//! 4. Otherwise -> allow

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use appman_config::AccessPolicySection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::caller::{CallerResolver, ProcfsCallerResolver};
use crate::error::{PolicyError, PolicyResult};

/// Deny reason when no listed capability is held.
pub const REASON_INSUFFICIENT_CAPABILITIES: &str = "insufficient capabilities";
/// Deny reason when the caller's image cannot be resolved.
pub const REASON_NO_EXECUTABLE: &str = "cannot get executable";
/// Deny reason for a blocked image.
pub const REASON_EXECUTABLE_BLOCKED: &str = "executable blocked";
/// Deny reason for a blocked uid.
pub const REASON_UID_BLOCKED: &str = "uid blocked";

/// Restrictions on one operation. Empty lists are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// Any one of these admits the caller.
    pub capabilities: BTreeSet<String>,
    /// Images that may not call.
    pub blocked_executables: BTreeSet<PathBuf>,
    /// Uids that may not call.
    pub blocked_uids: BTreeSet<u32>,
}

impl AccessRule {
    /// Build a rule from its configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidRule`] for empty capability names or
    /// relative executable paths.
    pub fn from_section(operation: &str, section: &AccessPolicySection) -> PolicyResult<Self> {
        let invalid = |reason: String| PolicyError::InvalidRule {
            operation: operation.to_owned(),
            reason,
        };

        if section.capabilities.iter().any(String::is_empty) {
            return Err(invalid("empty capability name".to_owned()));
        }
        if let Some(path) = section
            .executables
            .iter()
            .find(|exe| !Path::new(exe).is_absolute())
        {
            return Err(invalid(format!("executable '{path}' is not absolute")));
        }

        Ok(Self {
            capabilities: section.capabilities.iter().cloned().collect(),
            blocked_executables: section.executables.iter().map(PathBuf::from).collect(),
            blocked_uids: section.uids.iter().copied().collect(),
        })
    }

    /// Whether the rule restricts anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
            && self.blocked_executables.is_empty()
            && self.blocked_uids.is_empty()
    }
}

/// Access policy over protected operations.
///
/// # Example
///
/// ```
/// use std::collections::BTreeSet;
/// use appman_policy::{AccessPolicy, AccessRule};
///
/// let mut policy = AccessPolicy::permissive();
/// policy.set_rule(
///     "stopApplication",
///     AccessRule {
///         capabilities: BTreeSet::from(["appman.admin".to_owned()]),
///         ..AccessRule::default()
///     },
/// );
///
/// let none = BTreeSet::new();
/// assert!(policy.evaluate(std::process::id(), "stopApplication", &none).is_denied());
/// assert!(policy.evaluate(std::process::id(), "openUrl", &none).is_allowed());
/// ```
#[derive(Clone)]
pub struct AccessPolicy {
    rules: BTreeMap<String, AccessRule>,
    resolver: Arc<dyn CallerResolver>,
}

impl fmt::Debug for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPolicy")
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}

impl AccessPolicy {
    /// A policy without rules.
    #[must_use]
    pub fn permissive() -> Self {
        Self::with_resolver(Arc::new(ProcfsCallerResolver::default()))
    }

    /// A policy without rules that resolves callers through `resolver`.
    #[must_use]
    pub fn with_resolver(resolver: Arc<dyn CallerResolver>) -> Self {
        Self {
            rules: BTreeMap::new(),
            resolver,
        }
    }

    /// Build a policy from the `[access_policy.<operation>]` sections.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidRule`] for the first unusable section.
    pub fn from_config(
        sections: &BTreeMap<String, AccessPolicySection>,
        resolver: Arc<dyn CallerResolver>,
    ) -> PolicyResult<Self> {
        let mut policy = Self::with_resolver(resolver);
        for (operation, section) in sections {
            let rule = AccessRule::from_section(operation, section)?;
            if rule.is_empty() {
                continue;
            }
            debug!(operation = %operation, "access rule loaded");
            policy.rules.insert(operation.clone(), rule);
        }
        Ok(policy)
    }

    /// Install or replace the rule for `operation`.
    pub fn set_rule(&mut self, operation: impl Into<String>, rule: AccessRule) {
        self.rules.insert(operation.into(), rule);
    }

    /// Rule for `operation`, if any.
    #[must_use]
    pub fn rule(&self, operation: &str) -> Option<&AccessRule> {
        self.rules.get(operation)
    }

    /// Whether `operation` carries a rule.
    #[must_use]
    pub fn is_protected(&self, operation: &str) -> bool {
        self.rules.contains_key(operation)
    }

    /// Decide whether the process `pid`, holding `capabilities`, may invoke
    /// `operation`.
    #[must_use]
    pub fn evaluate(
        &self,
        pid: u32,
        operation: &str,
        capabilities: &BTreeSet<String>,
    ) -> AccessDecision {
        let Some(rule) = self.rules.get(operation) else {
            return AccessDecision::Allowed;
        };

        let decision = self.check_rule(rule, pid, capabilities);
        if let AccessDecision::Denied { reason } = &decision {
            warn!(pid, operation, reason, "protected call denied");
        }
        decision
    }

    /// Like [`evaluate`](Self::evaluate), as a `Result`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::AccessDenied`] when the call is not allowed.
    pub fn authorize(
        &self,
        pid: u32,
        operation: &str,
        capabilities: &BTreeSet<String>,
    ) -> PolicyResult<()> {
        match self.evaluate(pid, operation, capabilities) {
            AccessDecision::Allowed => Ok(()),
            AccessDecision::Denied { reason } => Err(PolicyError::AccessDenied {
                operation: operation.to_owned(),
                reason: reason.to_owned(),
            }),
        }
    }

    fn check_rule(
        &self,
        rule: &AccessRule,
        pid: u32,
        capabilities: &BTreeSet<String>,
    ) -> AccessDecision {
        if !rule.capabilities.is_empty() && rule.capabilities.is_disjoint(capabilities) {
            return AccessDecision::denied(REASON_INSUFFICIENT_CAPABILITIES);
        }

        if !rule.blocked_executables.is_empty() {
            let Some(exe) = self.resolver.executable(pid) else {
                return AccessDecision::denied(REASON_NO_EXECUTABLE);
            };
            if rule.blocked_executables.contains(&exe) {
                return AccessDecision::denied(REASON_EXECUTABLE_BLOCKED);
            }
        }

        if !rule.blocked_uids.is_empty()
            && let Some(uid) = self.resolver.uid(pid)
            && rule.blocked_uids.contains(&uid)
        {
            return AccessDecision::denied(REASON_UID_BLOCKED);
        }

        AccessDecision::Allowed
    }
}

/// Outcome of [`AccessPolicy::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// The call may proceed.
    Allowed,
    /// The call is rejected.
    Denied {
        /// Why it was rejected.
        reason: &'static str,
    },
}

impl AccessDecision {
    fn denied(reason: &'static str) -> Self {
        Self::Denied { reason }
    }

    /// Whether the call may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Whether the call is rejected.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }
}

impl fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::Denied { reason } => write!(f, "denied: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct FakeResolver {
        uids: HashMap<u32, u32>,
        exes: HashMap<u32, PathBuf>,
    }

    impl FakeResolver {
        fn with(mut self, pid: u32, uid: u32, exe: &str) -> Self {
            self.uids.insert(pid, uid);
            self.exes.insert(pid, PathBuf::from(exe));
            self
        }
    }

    impl CallerResolver for FakeResolver {
        fn uid(&self, pid: u32) -> Option<u32> {
            self.uids.get(&pid).copied()
        }

        fn executable(&self, pid: u32) -> Option<PathBuf> {
            self.exes.get(&pid).cloned()
        }
    }

    fn policy(toml_src: &str, resolver: FakeResolver) -> AccessPolicy {
        let sections: BTreeMap<String, AccessPolicySection> = toml::from_str(toml_src).unwrap();
        AccessPolicy::from_config(&sections, Arc::new(resolver)).unwrap()
    }

    fn caps(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_unconfigured_operation_allowed() {
        let policy = policy(
            "[stopApplication]\nexecutables = [\"/bin/evil\"]\n",
            FakeResolver::default().with(10, 1000, "/bin/evil"),
        );
        assert!(policy.evaluate(10, "startApplication", &caps(&[])).is_allowed());
    }

    #[test]
    fn test_blocked_executable_denied() {
        let policy = policy(
            "[stopApplication]\nexecutables = [\"/bin/evil\"]\n",
            FakeResolver::default()
                .with(10, 1000, "/bin/evil")
                .with(11, 1000, "/usr/bin/sysui"),
        );

        assert_eq!(
            policy.evaluate(10, "stopApplication", &caps(&[])),
            AccessDecision::Denied {
                reason: REASON_EXECUTABLE_BLOCKED
            }
        );
        assert!(policy.evaluate(11, "stopApplication", &caps(&[])).is_allowed());
    }

    #[test]
    fn test_unresolvable_executable_denied() {
        let policy = policy(
            "[stopApplication]\nexecutables = [\"/bin/evil\"]\n",
            FakeResolver::default(),
        );
        assert_eq!(
            policy.evaluate(99, "stopApplication", &caps(&[])),
            AccessDecision::Denied {
                reason: REASON_NO_EXECUTABLE
            }
        );
    }

    #[test]
    fn test_capabilities_any_of() {
        let policy = policy(
            "[openUrl]\ncapabilities = [\"browser\", \"system\"]\n",
            FakeResolver::default().with(10, 1000, "/usr/bin/app"),
        );

        assert!(policy.evaluate(10, "openUrl", &caps(&["system"])).is_allowed());
        assert!(policy.evaluate(10, "openUrl", &caps(&["browser", "x"])).is_allowed());
        assert_eq!(
            policy.evaluate(10, "openUrl", &caps(&["media"])),
            AccessDecision::Denied {
                reason: REASON_INSUFFICIENT_CAPABILITIES
            }
        );
    }

    #[test]
    fn test_uid_list_blocks_listed_uids() {
        let policy = policy(
            "[startApplication]\nuids = [0]\n",
            FakeResolver::default()
                .with(10, 0, "/usr/bin/a")
                .with(11, 1000, "/usr/bin/b"),
        );

        assert_eq!(
            policy.evaluate(10, "startApplication", &caps(&[])),
            AccessDecision::Denied {
                reason: REASON_UID_BLOCKED
            }
        );
        assert!(policy.evaluate(11, "startApplication", &caps(&[])).is_allowed());
        // Unknown uid cannot match the list.
        assert!(policy.evaluate(12, "startApplication", &caps(&[])).is_allowed());
    }

    #[test]
    fn test_capability_check_runs_first() {
        let policy = policy(
            "[stopApplication]\ncapabilities = [\"admin\"]\nexecutables = [\"/bin/evil\"]\n",
            FakeResolver::default().with(10, 1000, "/bin/evil"),
        );
        assert_eq!(
            policy.evaluate(10, "stopApplication", &caps(&[])),
            AccessDecision::Denied {
                reason: REASON_INSUFFICIENT_CAPABILITIES
            }
        );
        assert_eq!(
            policy.evaluate(10, "stopApplication", &caps(&["admin"])),
            AccessDecision::Denied {
                reason: REASON_EXECUTABLE_BLOCKED
            }
        );
    }

    #[test]
    fn test_authorize_error_text() {
        let policy = policy(
            "[stopApplication]\nexecutables = [\"/bin/evil\"]\n",
            FakeResolver::default().with(10, 1000, "/bin/evil"),
        );
        let err = policy.authorize(10, "stopApplication", &caps(&[])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Protected function call (stopApplication) denied: executable blocked"
        );
    }

    #[test]
    fn test_relative_executable_rejected() {
        let sections: BTreeMap<String, AccessPolicySection> =
            toml::from_str("[stopApplication]\nexecutables = [\"evil\"]\n").unwrap();
        let err = AccessPolicy::from_config(&sections, Arc::new(FakeResolver::default()))
            .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidRule { .. }));
    }

    #[test]
    fn test_empty_sections_are_not_protected() {
        let policy = policy("[openUrl]\n", FakeResolver::default());
        assert!(!policy.is_protected("openUrl"));
    }
}
