//! Group-membership access gate.
//!
//! Admission is decided per incoming event against a single required group,
//! so revoking membership locks a user out mid-conversation. The oracle is
//! a trait; the transport layer supplies the real lookup.

use async_trait::async_trait;
use std::sync::Arc;

/// Membership standing reported by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Member,
    Owner,
    Administrator,
    /// Left, kicked, restricted or never joined.
    Outside,
}

impl MemberStatus {
    pub fn admits(self) -> bool {
        matches!(self, Self::Member | Self::Owner | Self::Administrator)
    }
}

/// Upstream source of membership truth.
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    /// Standing of `user_id` in `group_id`. An error means the check could
    /// not be performed, not that the user is outside.
    async fn member_status(&self, group_id: i64, user_id: i64) -> anyhow::Result<MemberStatus>;
}

/// Admission check against the required group.
pub struct AccessGate {
    oracle: Arc<dyn MembershipOracle>,
    group_id: i64,
}

impl AccessGate {
    pub fn new(oracle: Arc<dyn MembershipOracle>, group_id: i64) -> Self {
        Self { oracle, group_id }
    }

    /// Whether `user_id` may use the bot right now.
    ///
    /// Fails closed: when the oracle cannot answer, the user is denied and
    /// the failure is logged rather than surfaced.
    pub async fn admit(&self, user_id: i64) -> bool {
        match self.oracle.member_status(self.group_id, user_id).await {
            Ok(status) => status.admits(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Membership check failed, denying access");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedOracle {
        status: MemberStatus,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MembershipOracle for FixedOracle {
        async fn member_status(&self, _group_id: i64, _user_id: i64) -> anyhow::Result<MemberStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.status)
        }
    }

    struct BrokenOracle;

    #[async_trait]
    impl MembershipOracle for BrokenOracle {
        async fn member_status(&self, _group_id: i64, _user_id: i64) -> anyhow::Result<MemberStatus> {
            bail!("network down")
        }
    }

    fn gate(status: MemberStatus) -> (AccessGate, Arc<FixedOracle>) {
        let oracle = Arc::new(FixedOracle {
            status,
            calls: AtomicUsize::new(0),
        });
        (AccessGate::new(Arc::clone(&oracle) as _, -100), oracle)
    }

    #[tokio::test]
    async fn test_member_statuses_admit() {
        for status in [MemberStatus::Member, MemberStatus::Owner, MemberStatus::Administrator] {
            let (gate, _) = gate(status);
            assert!(gate.admit(7).await, "{status:?} should admit");
        }
    }

    #[tokio::test]
    async fn test_outsiders_are_denied() {
        let (gate, _) = gate(MemberStatus::Outside);
        assert!(!gate.admit(7).await);
    }

    #[tokio::test]
    async fn test_oracle_failure_denies() {
        let gate = AccessGate::new(Arc::new(BrokenOracle), -100);
        assert!(!gate.admit(7).await);
    }

    #[tokio::test]
    async fn test_membership_is_rechecked_per_call() {
        let (gate, oracle) = gate(MemberStatus::Member);
        gate.admit(7).await;
        gate.admit(7).await;
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
    }
}
