//! The order lifecycle engine.
//!
//! Every state-changing operation runs the same loop: read the order, gate
//! the actor's capabilities, check the transition table, then compare-and-set
//! on the revision that was read. A lost compare-and-set re-reads and retries
//! while the operation is still legal; a race the operation cannot survive
//! surfaces as a `Conflict` carrying the progress that won.

use crate::config::WorkflowConfig;
use crate::error::{DbcmError, Result};
use crate::hook::HookRecord;
use crate::order::{Order, OrderDraft};
use crate::permission::PermissionGate;
use crate::reply::Reply;
use crate::store::{HookRegistry, OrderStore, ReplyLog};
use crate::types::{AuditDecision, Capability, EnvironmentId, OrderId, Progress};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Operation table
// ---------------------------------------------------------------------------

/// Engine operations. The transition table and capability requirements live
/// here so both are closed and inspectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Commit,
    Audit,
    Execute,
    Complete,
    Close,
    Review,
    Hook,
    Unhook,
    Reply,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Commit => "commit",
            Operation::Audit => "audit",
            Operation::Execute => "execute",
            Operation::Complete => "complete",
            Operation::Close => "close",
            Operation::Review => "review",
            Operation::Hook => "hook",
            Operation::Unhook => "unhook",
            Operation::Reply => "reply",
        }
    }

    /// States the operation may legally start from. Commit creates the
    /// order, so it has no sources; Reply never moves the order and is
    /// accepted in every state.
    pub fn allowed_from(self) -> &'static [Progress] {
        match self {
            Operation::Commit => &[],
            Operation::Audit => &[Progress::PendingApproval],
            Operation::Execute => &[Progress::Approved],
            Operation::Complete => &[Progress::Processing],
            Operation::Close => &[
                Progress::PendingApproval,
                Progress::NotApproved,
                Progress::Approved,
                Progress::Processing,
            ],
            Operation::Review => &[Progress::Completed],
            Operation::Hook => &[
                Progress::PendingApproval,
                Progress::NotApproved,
                Progress::Approved,
                Progress::Processing,
                Progress::Completed,
            ],
            Operation::Unhook => &[Progress::Hooked],
            Operation::Reply => Progress::all(),
        }
    }

    /// Capabilities that satisfy the gate for this operation, any one
    /// sufficing.
    pub fn required_capabilities(self) -> &'static [Capability] {
        match self {
            Operation::Commit => &[Capability::Commit],
            Operation::Audit | Operation::Review => &[Capability::Audit],
            Operation::Execute | Operation::Complete => &[Capability::Execute],
            Operation::Close | Operation::Hook | Operation::Unhook | Operation::Reply => {
                Capability::all()
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OrderWorkflow
// ---------------------------------------------------------------------------

const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

enum Step {
    /// Compare-and-set the stored order to this one.
    Apply(Order),
    /// Nothing to change; return this order as the outcome.
    Done(Order),
}

pub struct OrderWorkflow {
    orders: Arc<dyn OrderStore>,
    replies: Arc<dyn ReplyLog>,
    hooks: Arc<dyn HookRegistry>,
    gate: Arc<dyn PermissionGate>,
    max_conflict_retries: u32,
}

impl OrderWorkflow {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        replies: Arc<dyn ReplyLog>,
        hooks: Arc<dyn HookRegistry>,
        gate: Arc<dyn PermissionGate>,
    ) -> Self {
        Self {
            orders,
            replies,
            hooks,
            gate,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Apply the tuning section of a loaded config.
    pub fn with_config(self, config: &WorkflowConfig) -> Self {
        self.with_max_conflict_retries(config.max_conflict_retries)
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Submit a new order. The draft is validated first because the gate
    /// scope comes from its environment.
    pub fn commit(&self, draft: OrderDraft, actor: &str) -> Result<Order> {
        draft.validate()?;
        self.authorize(actor, Operation::Commit, Some(draft.environment))?;

        let order = Order::submit(draft, actor);
        self.orders.insert(&order)?;
        info!(
            order = %order.id,
            environment = %order.environment,
            kind = %order.kind,
            actor,
            "order committed"
        );
        Ok(order)
    }

    /// Record an audit decision on a pending order: accept moves it to
    /// Approved, reject to NotApproved.
    pub fn audit(
        &self,
        id: OrderId,
        actor: &str,
        decision: AuditDecision,
        comment: Option<String>,
    ) -> Result<Order> {
        let (order, _) = self.run(id, actor, Operation::Audit, |order| {
            Self::check_source(Operation::Audit, order)?;
            let mut updated = order.clone();
            updated.record_audit(actor, decision, comment.clone());
            Ok(Step::Apply(updated))
        })?;
        Ok(order)
    }

    /// Start processing an approved order.
    pub fn execute(&self, id: OrderId, actor: &str) -> Result<Order> {
        let (order, _) = self.run(id, actor, Operation::Execute, |order| {
            Self::check_source(Operation::Execute, order)?;
            let mut updated = order.clone();
            updated.begin_processing(actor);
            Ok(Step::Apply(updated))
        })?;
        Ok(order)
    }

    /// The external completion signal: whoever processed the order reports
    /// that processing finished.
    pub fn complete(&self, id: OrderId, actor: &str) -> Result<Order> {
        let (order, _) = self.run(id, actor, Operation::Complete, |order| {
            Self::check_source(Operation::Complete, order)?;
            let mut updated = order.clone();
            updated.record_completion(actor);
            Ok(Step::Apply(updated))
        })?;
        Ok(order)
    }

    /// Close an order that has not completed. Completed orders are reviewed
    /// instead, and a hooked order must be released first.
    pub fn close(&self, id: OrderId, actor: &str, reason: &str) -> Result<Order> {
        let (order, _) = self.run(id, actor, Operation::Close, |order| {
            require_text("reason", reason)?;
            Self::check_source(Operation::Close, order)?;
            let mut updated = order.clone();
            updated.record_close(actor, reason);
            Ok(Step::Apply(updated))
        })?;
        Ok(order)
    }

    /// Sign off on a completed order, ending its lifecycle.
    pub fn review(&self, id: OrderId, actor: &str, comment: Option<String>) -> Result<Order> {
        let (order, _) = self.run(id, actor, Operation::Review, |order| {
            Self::check_source(Operation::Review, order)?;
            let mut updated = order.clone();
            updated.record_review(actor, comment.clone());
            Ok(Step::Apply(updated))
        })?;
        Ok(order)
    }

    /// Park the order. Hooking an order that is already hooked is a no-op
    /// that reports success, so racing holds both land.
    pub fn hook(&self, id: OrderId, actor: &str, reason: &str) -> Result<Order> {
        let (order, applied) = self.run(id, actor, Operation::Hook, |order| {
            require_text("reason", reason)?;
            if order.progress == Progress::Hooked {
                return Ok(Step::Done(order.clone()));
            }
            Self::check_source(Operation::Hook, order)?;
            let mut updated = order.clone();
            updated.hold(actor);
            Ok(Step::Apply(updated))
        })?;

        // Only the hold that actually landed writes a record, keeping one
        // active record per hold. The state change stands even if this
        // append fails.
        if applied {
            if let Some(prior) = order.hooked_from {
                self.hooks
                    .append_hook(&HookRecord::new(id, actor, reason, prior))?;
            }
        }
        Ok(order)
    }

    /// Release a hooked order back to the state it was hooked from.
    pub fn unhook(&self, id: OrderId, actor: &str) -> Result<Order> {
        let (order, _) = self.run(id, actor, Operation::Unhook, |order| {
            Self::check_source(Operation::Unhook, order)?;
            let mut updated = order.clone();
            match updated.release(actor) {
                Some(_) => Ok(Step::Apply(updated)),
                None => Err(DbcmError::Storage(format!(
                    "order {id} is hooked without a prior state"
                ))),
            }
        })?;
        Ok(order)
    }

    /// Attach a discussion reply. Never changes lifecycle state and is
    /// accepted in every state, terminal ones included.
    pub fn reply(&self, id: OrderId, actor: &str, body: &str) -> Result<Reply> {
        self.orders.get(id)?;
        self.authorize(actor, Operation::Reply, None)?;
        require_text("body", body)?;

        let reply = Reply::new(id, actor, body);
        self.replies.append_reply(&reply)?;
        Ok(reply)
    }

    // -----------------------------------------------------------------------
    // Engine loop
    // -----------------------------------------------------------------------

    /// Read, gate, decide, compare-and-set. Returns the resulting order and
    /// whether a compare-and-set was applied (false for no-op outcomes).
    ///
    /// On a lost compare-and-set the order is re-read and `decide` runs
    /// again. An `InvalidTransition` from `decide` after a conflict means
    /// the actor lost a race, so it surfaces as `Conflict` instead.
    fn run<F>(&self, id: OrderId, actor: &str, operation: Operation, decide: F) -> Result<(Order, bool)>
    where
        F: Fn(&Order) -> Result<Step>,
    {
        let mut attempts: u32 = 0;
        let mut conflicted = false;
        loop {
            let order = self.orders.get(id)?;
            self.authorize(actor, operation, None)?;

            let step = match decide(&order) {
                Ok(step) => step,
                Err(DbcmError::InvalidTransition { .. }) if conflicted => {
                    warn!(
                        order = %id,
                        operation = %operation,
                        current = %order.progress,
                        "operation no longer legal after conflict"
                    );
                    return Err(DbcmError::Conflict {
                        id,
                        current: order.progress,
                    });
                }
                Err(e) => return Err(e),
            };

            let updated = match step {
                Step::Done(current) => return Ok((current, false)),
                Step::Apply(updated) => updated,
            };

            match self.orders.update_progress(id, order.revision, &updated) {
                Ok(()) => {
                    info!(
                        order = %id,
                        from = %order.progress,
                        to = %updated.progress,
                        actor,
                        operation = %operation,
                        "transition applied"
                    );
                    return Ok((updated, true));
                }
                Err(DbcmError::Conflict { current, .. }) => {
                    conflicted = true;
                    if attempts >= self.max_conflict_retries {
                        warn!(
                            order = %id,
                            operation = %operation,
                            current = %current,
                            attempts,
                            "conflict retries exhausted"
                        );
                        return Err(DbcmError::Conflict { id, current });
                    }
                    attempts += 1;
                    debug!(
                        order = %id,
                        operation = %operation,
                        attempt = attempts,
                        "progress moved underneath, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn check_source(operation: Operation, order: &Order) -> Result<()> {
        if operation.allowed_from().contains(&order.progress) {
            Ok(())
        } else {
            Err(DbcmError::InvalidTransition {
                operation: operation.as_str().to_string(),
                current: order.progress,
            })
        }
    }

    fn authorize(
        &self,
        actor: &str,
        operation: Operation,
        environment: Option<EnvironmentId>,
    ) -> Result<()> {
        if self
            .gate
            .has_any(actor, operation.required_capabilities(), environment)
        {
            Ok(())
        } else {
            Err(DbcmError::PermissionDenied {
                actor: actor.to_string(),
                operation: operation.as_str().to_string(),
            })
        }
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(DbcmError::Validation {
            field: field.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{Grant, StaticGrants};
    use crate::store::{MemoryStore, OrderFilter, Page};
    use crate::types::{EnvironmentId, OrderKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Barrier;

    fn grant(actor: &str, capability: Capability, environment: Option<i64>) -> Grant {
        Grant {
            actor: actor.to_string(),
            capability,
            environment: environment.map(EnvironmentId),
        }
    }

    /// alice commits anywhere, frank commits only to environment 1, bob
    /// audits, carol executes. mallory holds nothing.
    fn gate() -> Arc<StaticGrants> {
        Arc::new(StaticGrants::new(vec![
            grant("alice", Capability::Commit, None),
            grant("frank", Capability::Commit, Some(1)),
            grant("bob", Capability::Audit, None),
            grant("carol", Capability::Execute, None),
        ]))
    }

    fn engine() -> (Arc<MemoryStore>, OrderWorkflow) {
        let store = Arc::new(MemoryStore::new());
        let workflow = OrderWorkflow::new(store.clone(), store.clone(), store.clone(), gate());
        (store, workflow)
    }

    fn draft() -> OrderDraft {
        OrderDraft::new(
            "backfill user emails",
            OrderKind::Dml,
            EnvironmentId(1),
            "UPDATE users SET email = lower(email);",
        )
    }

    fn pending(workflow: &OrderWorkflow) -> Order {
        workflow.commit(draft(), "alice").unwrap()
    }

    fn approved(workflow: &OrderWorkflow) -> Order {
        let order = pending(workflow);
        workflow
            .audit(order.id, "bob", AuditDecision::Accepted, None)
            .unwrap()
    }

    fn processing(workflow: &OrderWorkflow) -> Order {
        let order = approved(workflow);
        workflow.execute(order.id, "carol").unwrap()
    }

    // -- commit --------------------------------------------------------------

    #[test]
    fn commit_creates_pending_order() {
        let (store, workflow) = engine();
        let order = workflow.commit(draft(), "alice").unwrap();
        assert_eq!(order.progress, Progress::PendingApproval);
        assert_eq!(store.get(order.id).unwrap().owner, "alice");
    }

    #[test]
    fn commit_requires_commit_capability() {
        let (_store, workflow) = engine();
        let err = workflow.commit(draft(), "bob").unwrap_err();
        assert!(matches!(err, DbcmError::PermissionDenied { .. }));
    }

    #[test]
    fn commit_scope_limits_environment() {
        let (_store, workflow) = engine();
        assert!(workflow.commit(draft(), "frank").is_ok());

        let mut other_env = draft();
        other_env.environment = EnvironmentId(2);
        let err = workflow.commit(other_env, "frank").unwrap_err();
        assert!(matches!(err, DbcmError::PermissionDenied { .. }));
    }

    #[test]
    fn commit_validates_before_gating() {
        let (_store, workflow) = engine();
        let mut bad = draft();
        bad.payload = String::new();
        // mallory holds nothing, but the draft failure comes first.
        let err = workflow.commit(bad, "mallory").unwrap_err();
        assert!(matches!(err, DbcmError::Validation { .. }));
    }

    // -- audit ---------------------------------------------------------------

    #[test]
    fn audit_accept_approves() {
        let (_store, workflow) = engine();
        let order = pending(&workflow);
        let order = workflow
            .audit(order.id, "bob", AuditDecision::Accepted, Some("ok".to_string()))
            .unwrap();
        assert_eq!(order.progress, Progress::Approved);
        assert_eq!(order.auditor.len(), 1);
        assert_eq!(order.auditor[0].actor, "bob");
    }

    #[test]
    fn audit_reject_lands_not_approved() {
        let (_store, workflow) = engine();
        let order = pending(&workflow);
        let order = workflow
            .audit(order.id, "bob", AuditDecision::Rejected, None)
            .unwrap();
        assert_eq!(order.progress, Progress::NotApproved);
    }

    #[test]
    fn audit_requires_audit_capability() {
        let (_store, workflow) = engine();
        let order = pending(&workflow);
        let err = workflow
            .audit(order.id, "carol", AuditDecision::Accepted, None)
            .unwrap_err();
        assert!(matches!(err, DbcmError::PermissionDenied { .. }));
    }

    #[test]
    fn audit_unknown_order_not_found() {
        let (_store, workflow) = engine();
        let err = workflow
            .audit(OrderId::new(), "bob", AuditDecision::Accepted, None)
            .unwrap_err();
        assert!(matches!(err, DbcmError::OrderNotFound(_)));
    }

    // -- execute / complete --------------------------------------------------

    #[test]
    fn execute_requires_approved() {
        let (_store, workflow) = engine();
        let order = pending(&workflow);
        let err = workflow.execute(order.id, "carol").unwrap_err();
        match err {
            DbcmError::InvalidTransition { current, .. } => {
                assert_eq!(current, Progress::PendingApproval);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }

        let order = approved(&workflow);
        let order = workflow.execute(order.id, "carol").unwrap();
        assert_eq!(order.progress, Progress::Processing);
    }

    #[test]
    fn complete_requires_processing() {
        let (_store, workflow) = engine();
        let order = approved(&workflow);
        assert!(matches!(
            workflow.complete(order.id, "carol").unwrap_err(),
            DbcmError::InvalidTransition { .. }
        ));

        let order = processing(&workflow);
        let order = workflow.complete(order.id, "carol").unwrap();
        assert_eq!(order.progress, Progress::Completed);
    }

    #[test]
    fn execute_requires_execute_capability() {
        let (_store, workflow) = engine();
        let order = approved(&workflow);
        assert!(matches!(
            workflow.execute(order.id, "bob").unwrap_err(),
            DbcmError::PermissionDenied { .. }
        ));
    }

    // -- close ---------------------------------------------------------------

    #[test]
    fn close_legal_from_pre_completion_states() {
        let (_store, workflow) = engine();

        let order = pending(&workflow);
        assert_eq!(
            workflow.close(order.id, "alice", "withdrawn").unwrap().progress,
            Progress::Closed
        );

        let order = pending(&workflow);
        workflow
            .audit(order.id, "bob", AuditDecision::Rejected, None)
            .unwrap();
        assert!(workflow.close(order.id, "alice", "rejected").is_ok());

        let order = approved(&workflow);
        assert!(workflow.close(order.id, "alice", "superseded").is_ok());

        let order = processing(&workflow);
        assert!(workflow.close(order.id, "alice", "aborted").is_ok());
    }

    #[test]
    fn close_sets_close_info() {
        let (store, workflow) = engine();
        let order = pending(&workflow);
        let order = workflow.close(order.id, "alice", "withdrawn").unwrap();
        let info = order.close_info.as_ref().unwrap();
        assert_eq!(info.actor, "alice");
        assert_eq!(info.reason, "withdrawn");
        assert!(store.get(order.id).unwrap().close_info.is_some());
    }

    #[test]
    fn close_rejected_from_completed() {
        let (_store, workflow) = engine();
        let order = processing(&workflow);
        workflow.complete(order.id, "carol").unwrap();
        let err = workflow.close(order.id, "alice", "late").unwrap_err();
        match err {
            DbcmError::InvalidTransition { current, .. } => {
                assert_eq!(current, Progress::Completed);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn close_requires_reason() {
        let (_store, workflow) = engine();
        let order = pending(&workflow);
        assert!(matches!(
            workflow.close(order.id, "alice", "  ").unwrap_err(),
            DbcmError::Validation { .. }
        ));
    }

    #[test]
    fn close_accepts_any_capability() {
        let (_store, workflow) = engine();
        // carol only executes; that suffices for close.
        let order = pending(&workflow);
        assert!(workflow.close(order.id, "carol", "stale").is_ok());

        let order = pending(&workflow);
        assert!(matches!(
            workflow.close(order.id, "mallory", "stale").unwrap_err(),
            DbcmError::PermissionDenied { .. }
        ));
    }

    // -- review --------------------------------------------------------------

    #[test]
    fn review_finishes_completed_order() {
        let (_store, workflow) = engine();
        let order = processing(&workflow);
        workflow.complete(order.id, "carol").unwrap();
        let order = workflow
            .review(order.id, "bob", Some("verified".to_string()))
            .unwrap();
        assert_eq!(order.progress, Progress::Reviewed);
        assert_eq!(order.reviewer.as_ref().unwrap().actor, "bob");

        // Terminal: nothing moves it afterwards.
        assert!(matches!(
            workflow.close(order.id, "alice", "late").unwrap_err(),
            DbcmError::InvalidTransition { .. }
        ));
        assert!(matches!(
            workflow.hook(order.id, "bob", "freeze").unwrap_err(),
            DbcmError::InvalidTransition { .. }
        ));
    }

    #[test]
    fn review_requires_audit_capability() {
        let (_store, workflow) = engine();
        let order = processing(&workflow);
        workflow.complete(order.id, "carol").unwrap();
        assert!(matches!(
            workflow.review(order.id, "carol", None).unwrap_err(),
            DbcmError::PermissionDenied { .. }
        ));
    }

    #[test]
    fn review_requires_completed() {
        let (_store, workflow) = engine();
        let order = approved(&workflow);
        assert!(matches!(
            workflow.review(order.id, "bob", None).unwrap_err(),
            DbcmError::InvalidTransition { .. }
        ));
    }

    // -- hook / unhook -------------------------------------------------------

    #[test]
    fn hook_blocks_everything_but_unhook() {
        let (_store, workflow) = engine();
        let order = processing(&workflow);
        let order = workflow.hook(order.id, "bob", "incident 4412").unwrap();
        assert_eq!(order.progress, Progress::Hooked);
        assert_eq!(order.hooked_from, Some(Progress::Processing));

        for err in [
            workflow.complete(order.id, "carol").unwrap_err(),
            workflow.close(order.id, "alice", "r").unwrap_err(),
            workflow.execute(order.id, "carol").unwrap_err(),
            workflow.audit(order.id, "bob", AuditDecision::Accepted, None).unwrap_err(),
        ] {
            match err {
                DbcmError::InvalidTransition { current, .. } => {
                    assert_eq!(current, Progress::Hooked);
                }
                other => panic!("expected InvalidTransition, got {other:?}"),
            }
        }

        let order = workflow.unhook(order.id, "bob").unwrap();
        assert_eq!(order.progress, Progress::Processing);
        assert!(order.hooked_from.is_none());
        assert_eq!(
            workflow.complete(order.id, "carol").unwrap().progress,
            Progress::Completed
        );
    }

    #[test]
    fn hook_writes_one_active_record() {
        let (store, workflow) = engine();
        let order = approved(&workflow);
        workflow.hook(order.id, "bob", "freeze week").unwrap();

        // Second hook is a reported success and appends nothing.
        let again = workflow.hook(order.id, "carol", "still frozen").unwrap();
        assert_eq!(again.progress, Progress::Hooked);
        assert_eq!(again.hooked_from, Some(Progress::Approved));

        let hooks = store.hooks(order.id).unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].actor, "bob");
        assert_eq!(hooks[0].hooked_from, Progress::Approved);
    }

    #[test]
    fn hook_restores_exact_prior_state() {
        let (_store, workflow) = engine();

        let order = pending(&workflow);
        workflow
            .audit(order.id, "bob", AuditDecision::Rejected, None)
            .unwrap();
        workflow.hook(order.id, "bob", "double checking").unwrap();
        assert_eq!(
            workflow.unhook(order.id, "bob").unwrap().progress,
            Progress::NotApproved
        );

        let order = processing(&workflow);
        workflow.complete(order.id, "carol").unwrap();
        workflow.hook(order.id, "bob", "hold the signoff").unwrap();
        assert_eq!(
            workflow.unhook(order.id, "bob").unwrap().progress,
            Progress::Completed
        );
    }

    #[test]
    fn hook_rejected_on_terminal_states() {
        let (_store, workflow) = engine();
        let order = pending(&workflow);
        workflow.close(order.id, "alice", "withdrawn").unwrap();
        assert!(matches!(
            workflow.hook(order.id, "bob", "too late").unwrap_err(),
            DbcmError::InvalidTransition { .. }
        ));
    }

    #[test]
    fn unhook_requires_hooked() {
        let (_store, workflow) = engine();
        let order = approved(&workflow);
        assert!(matches!(
            workflow.unhook(order.id, "bob").unwrap_err(),
            DbcmError::InvalidTransition { .. }
        ));
    }

    #[test]
    fn hook_requires_reason() {
        let (_store, workflow) = engine();
        let order = approved(&workflow);
        assert!(matches!(
            workflow.hook(order.id, "bob", "").unwrap_err(),
            DbcmError::Validation { .. }
        ));
    }

    // -- reply ---------------------------------------------------------------

    #[test]
    fn reply_attaches_in_any_state() {
        let (store, workflow) = engine();
        let order = pending(&workflow);
        workflow.reply(order.id, "bob", "please add a rollback plan").unwrap();

        workflow.close(order.id, "alice", "withdrawn").unwrap();
        workflow.reply(order.id, "alice", "will resubmit next week").unwrap();

        let replies = store.replies(order.id).unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].actor, "bob");
    }

    #[test]
    fn reply_gated_and_validated() {
        let (_store, workflow) = engine();
        let order = pending(&workflow);
        assert!(matches!(
            workflow.reply(order.id, "mallory", "hi").unwrap_err(),
            DbcmError::PermissionDenied { .. }
        ));
        assert!(matches!(
            workflow.reply(order.id, "bob", "   ").unwrap_err(),
            DbcmError::Validation { .. }
        ));
        assert!(matches!(
            workflow.reply(OrderId::new(), "bob", "hi").unwrap_err(),
            DbcmError::OrderNotFound(_)
        ));
    }

    // -- operation table -----------------------------------------------------

    #[test]
    fn transition_table_shape() {
        assert_eq!(Operation::Audit.allowed_from(), &[Progress::PendingApproval]);
        assert_eq!(Operation::Execute.allowed_from(), &[Progress::Approved]);
        assert_eq!(Operation::Complete.allowed_from(), &[Progress::Processing]);
        assert!(!Operation::Close.allowed_from().contains(&Progress::Completed));
        assert!(!Operation::Hook.allowed_from().contains(&Progress::Hooked));
        assert!(Operation::Hook.allowed_from().contains(&Progress::Completed));
        assert_eq!(Operation::Unhook.allowed_from(), &[Progress::Hooked]);
    }

    #[test]
    fn capability_table_shape() {
        assert_eq!(Operation::Commit.required_capabilities(), &[Capability::Commit]);
        assert_eq!(Operation::Review.required_capabilities(), &[Capability::Audit]);
        assert_eq!(Operation::Complete.required_capabilities(), &[Capability::Execute]);
        assert_eq!(Operation::Reply.required_capabilities(), Capability::all());
        assert_eq!(Operation::Hook.required_capabilities(), Capability::all());
    }

    // -- conflicts -----------------------------------------------------------

    /// OrderStore wrapper that holds the first two readers at a barrier so
    /// both observe the same progress before either compare-and-sets.
    struct RacingStore {
        inner: Arc<MemoryStore>,
        barrier: Barrier,
        reads: AtomicU32,
    }

    impl RacingStore {
        fn new(inner: Arc<MemoryStore>) -> Self {
            Self {
                inner,
                barrier: Barrier::new(2),
                reads: AtomicU32::new(0),
            }
        }
    }

    impl OrderStore for RacingStore {
        fn insert(&self, order: &Order) -> Result<()> {
            self.inner.insert(order)
        }

        fn get(&self, id: OrderId) -> Result<Order> {
            let order = self.inner.get(id)?;
            if self.reads.fetch_add(1, Ordering::SeqCst) < 2 {
                self.barrier.wait();
            }
            Ok(order)
        }

        fn update_progress(&self, id: OrderId, expected_revision: u64, updated: &Order) -> Result<()> {
            self.inner.update_progress(id, expected_revision, updated)
        }

        fn list(&self, filter: &OrderFilter, page: Page) -> Result<crate::store::Paged<Order>> {
            self.inner.list(filter, page)
        }
    }

    #[test]
    fn concurrent_audits_one_wins() {
        let store = Arc::new(MemoryStore::new());
        let order = Order::submit(draft(), "alice");
        store.insert(&order).unwrap();

        let racing = Arc::new(RacingStore::new(store.clone()));
        let workflow = OrderWorkflow::new(racing, store.clone(), store.clone(), gate());

        let (accept, reject) = std::thread::scope(|s| {
            let accept = s.spawn(|| {
                workflow.audit(order.id, "bob", AuditDecision::Accepted, None)
            });
            let reject = s.spawn(|| {
                workflow.audit(order.id, "bob", AuditDecision::Rejected, None)
            });
            (accept.join().unwrap(), reject.join().unwrap())
        });

        // Exactly one decision lands; the loser sees the conflict.
        assert!(accept.is_ok() != reject.is_ok());
        let err = if accept.is_err() {
            accept.unwrap_err()
        } else {
            reject.unwrap_err()
        };
        match err {
            DbcmError::Conflict { current, .. } => {
                assert!(matches!(
                    current,
                    Progress::Approved | Progress::NotApproved
                ));
            }
            other => panic!("expected Conflict, got {other:?}"),
        }

        let stored = store.get(order.id).unwrap();
        assert_eq!(stored.auditor.len(), 1);
    }

    #[test]
    fn concurrent_hooks_both_succeed() {
        let store = Arc::new(MemoryStore::new());
        let order = Order::submit(draft(), "alice");
        store.insert(&order).unwrap();

        let racing = Arc::new(RacingStore::new(store.clone()));
        let workflow = OrderWorkflow::new(racing, store.clone(), store.clone(), gate());

        let (a, b) = std::thread::scope(|s| {
            let a = s.spawn(|| workflow.hook(order.id, "bob", "freeze"));
            let b = s.spawn(|| workflow.hook(order.id, "carol", "freeze"));
            (a.join().unwrap(), b.join().unwrap())
        });

        assert_eq!(a.unwrap().progress, Progress::Hooked);
        assert_eq!(b.unwrap().progress, Progress::Hooked);
        assert_eq!(store.hooks(order.id).unwrap().len(), 1);
    }

    /// OrderStore wrapper whose compare-and-set always loses, for pinning
    /// down the bounded retry policy.
    struct AlwaysConflict {
        inner: Arc<MemoryStore>,
        cas_calls: AtomicU32,
    }

    impl OrderStore for AlwaysConflict {
        fn insert(&self, order: &Order) -> Result<()> {
            self.inner.insert(order)
        }

        fn get(&self, id: OrderId) -> Result<Order> {
            self.inner.get(id)
        }

        fn update_progress(&self, id: OrderId, _expected_revision: u64, _updated: &Order) -> Result<()> {
            self.cas_calls.fetch_add(1, Ordering::SeqCst);
            Err(DbcmError::Conflict {
                id,
                current: Progress::PendingApproval,
            })
        }

        fn list(&self, filter: &OrderFilter, page: Page) -> Result<crate::store::Paged<Order>> {
            self.inner.list(filter, page)
        }
    }

    #[test]
    fn conflict_retries_are_bounded_by_config() {
        let store = Arc::new(MemoryStore::new());
        let order = Order::submit(draft(), "alice");
        store.insert(&order).unwrap();

        let conflicting = Arc::new(AlwaysConflict {
            inner: store.clone(),
            cas_calls: AtomicU32::new(0),
        });
        let workflow =
            OrderWorkflow::new(conflicting.clone(), store.clone(), store.clone(), gate())
                .with_config(&crate::config::WorkflowConfig {
                    max_conflict_retries: 2,
                });

        let err = workflow
            .audit(order.id, "bob", AuditDecision::Accepted, None)
            .unwrap_err();
        assert!(matches!(err, DbcmError::Conflict { .. }));
        // One initial attempt plus two retries.
        assert_eq!(conflicting.cas_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn concurrent_closes_loser_conflicts() {
        let store = Arc::new(MemoryStore::new());
        let order = Order::submit(draft(), "alice");
        store.insert(&order).unwrap();

        let racing = Arc::new(RacingStore::new(store.clone()));
        let workflow = OrderWorkflow::new(racing, store.clone(), store.clone(), gate());

        let (a, b) = std::thread::scope(|s| {
            let a = s.spawn(|| workflow.close(order.id, "alice", "mine"));
            let b = s.spawn(|| workflow.close(order.id, "bob", "no mine"));
            (a.join().unwrap(), b.join().unwrap())
        });

        assert!(a.is_ok() != b.is_ok());
        let err = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        match err {
            DbcmError::Conflict { current, .. } => assert_eq!(current, Progress::Closed),
            other => panic!("expected Conflict, got {other:?}"),
        }
        assert!(store.get(order.id).unwrap().close_info.is_some());
    }
}
