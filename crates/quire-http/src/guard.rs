//! Decoration hook - lets an application veto or annotate an operation
//! before it commits

use axum::http::StatusCode;
use quire_core::Envelope;

/// The operation a guard is being consulted about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedOp {
    Read,
    ReadMany,
    Create,
    Replace,
    Patch,
    Delete,
    History,
}

/// Context handed to the guard: the operation, its target, and the
/// envelopes involved — the stored envelopes for reads, the candidate
/// envelope for create/replace. The patch and delete paths carry no
/// envelope; a guard there decides on collection and id alone.
pub struct GuardContext<'a> {
    pub op: GuardedOp,
    pub collection: &'a str,
    pub id: Option<&'a str>,
    pub envelopes: &'a [Envelope],
}

/// What the guard decided. A non-OK status aborts the operation before any
/// write and becomes the response verbatim.
#[derive(Debug, Clone)]
pub struct GuardAction {
    pub status: StatusCode,
    pub message: Option<String>,
}

impl GuardAction {
    pub fn allow() -> Self {
        Self {
            status: StatusCode::OK,
            message: None,
        }
    }

    pub fn deny(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.status == StatusCode::OK
    }
}

/// Hook installed once on the transport state and consulted on every
/// operation.
pub trait RequestGuard: Send + Sync {
    fn inspect(&self, ctx: &GuardContext<'_>) -> GuardAction;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyCollection(&'static str);

    impl RequestGuard for DenyCollection {
        fn inspect(&self, ctx: &GuardContext<'_>) -> GuardAction {
            if ctx.collection == self.0 {
                GuardAction::deny(StatusCode::FORBIDDEN, "off limits")
            } else {
                GuardAction::allow()
            }
        }
    }

    #[test]
    fn test_guard_action_verdicts() {
        assert!(GuardAction::allow().is_allowed());
        assert!(!GuardAction::deny(StatusCode::FORBIDDEN, "no").is_allowed());
    }

    #[test]
    fn test_guard_sees_the_target() {
        let guard = DenyCollection("secrets");

        let denied = guard.inspect(&GuardContext {
            op: GuardedOp::Read,
            collection: "secrets",
            id: Some("1"),
            envelopes: &[],
        });
        assert_eq!(denied.status, StatusCode::FORBIDDEN);

        let allowed = guard.inspect(&GuardContext {
            op: GuardedOp::Read,
            collection: "notes",
            id: Some("1"),
            envelopes: &[],
        });
        assert!(allowed.is_allowed());
    }
}
