// src/bidding/deadline.rs

use std::time::Duration;
use tokio::time::Instant;

use crate::error::AuctionError;

/// **共享截止时间**
/// 所有合作方任务共用同一个时间点，单个合作方的超时只能让它更早。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn from_tmax(start: Instant, tmax_ms: u64) -> Self {
        Self {
            at: start + Duration::from_millis(tmax_ms),
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    /// 剩余时间，已过期时为 0
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// 为响应组装 / 缓存预留时间；预留后预算不为正时整场竞价失败
    pub fn reserve(self, reserved_ms: u64) -> Result<Deadline, AuctionError> {
        let remaining = self.remaining().as_millis() as u64;
        if remaining <= reserved_ms {
            return Err(AuctionError::DeadlineExhausted(format!(
                "remaining {}ms, reserved {}ms",
                remaining, reserved_ms
            )));
        }
        Ok(Deadline {
            at: self.at - Duration::from_millis(reserved_ms),
        })
    }

    /// 与合作方自身超时取较早者
    pub fn bounded_by(self, timeout_ms: Option<u64>) -> Deadline {
        match timeout_ms {
            Some(ms) => {
                let own = Instant::now() + Duration::from_millis(ms);
                Deadline { at: self.at.min(own) }
            }
            None => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_shrinks_budget() {
        let deadline = Deadline::from_tmax(Instant::now(), 500).reserve(100).unwrap();
        let remaining = deadline.remaining().as_millis();
        assert!(remaining <= 400);
        assert!(remaining > 300);
    }

    #[test]
    fn test_reserve_fails_when_budget_not_positive() {
        let deadline = Deadline::from_tmax(Instant::now(), 100);
        assert!(matches!(deadline.reserve(100), Err(AuctionError::DeadlineExhausted(_))));
        assert!(matches!(deadline.reserve(5000), Err(AuctionError::DeadlineExhausted(_))));
    }

    #[test]
    fn test_partner_timeout_only_shortens() {
        let shared = Deadline::from_tmax(Instant::now(), 1000);
        assert!(shared.bounded_by(Some(50)).instant() < shared.instant());
        assert_eq!(shared.bounded_by(Some(5000)).instant(), shared.instant());
        assert_eq!(shared.bounded_by(None), shared);
    }

    #[test]
    fn test_expired_deadline_has_zero_remaining() {
        let deadline = Deadline::from_tmax(Instant::now() - Duration::from_millis(10), 5);
        assert!(deadline.remaining().is_zero());
    }
}
