//! Static interface schemas.
//!
//! Every interface exposed over a transport is described by a constant
//! [`InterfaceSchema`]. Incoming and outgoing calls are checked against it
//! before they are decoded into typed messages.

use crate::error::{CoreError, CoreResult};
use crate::value::{Value, ValueKind};

/// Signature of one method or signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSignature {
    /// Member name.
    pub name: &'static str,
    /// Argument kinds, in order.
    pub args: &'static [ValueKind],
}

impl MethodSignature {
    /// Declare a member.
    #[must_use]
    pub const fn new(name: &'static str, args: &'static [ValueKind]) -> Self {
        Self { name, args }
    }
}

/// Declared members of one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceSchema {
    /// Interface name, e.g. `io.appman.ApplicationInterface`.
    pub name: &'static str,
    /// Members callable on this interface.
    pub members: &'static [MethodSignature],
}

impl InterfaceSchema {
    /// Declare an interface.
    #[must_use]
    pub const fn new(name: &'static str, members: &'static [MethodSignature]) -> Self {
        Self { name, members }
    }

    /// Look up a member by name.
    #[must_use]
    pub fn member(&self, name: &str) -> Option<&MethodSignature> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Check a call against the declared signature.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownMember`] for undeclared members and
    /// [`CoreError::ArgumentMismatch`] for wrong arity or argument kinds.
    pub fn check_call(&self, member: &str, args: &[Value]) -> CoreResult<()> {
        let sig = self.member(member).ok_or_else(|| CoreError::UnknownMember {
            interface: self.name.to_string(),
            member: member.to_string(),
        })?;

        if sig.args.len() != args.len() {
            return Err(CoreError::ArgumentMismatch {
                interface: self.name.to_string(),
                member: member.to_string(),
                reason: format!("expected {} arguments, got {}", sig.args.len(), args.len()),
            });
        }

        for (idx, (kind, value)) in sig.args.iter().zip(args).enumerate() {
            if !value.conforms_to(*kind) {
                return Err(CoreError::ArgumentMismatch {
                    interface: self.name.to_string(),
                    member: member.to_string(),
                    reason: format!("argument {idx} is not a {kind}"),
                });
            }
        }
        Ok(())
    }
}
