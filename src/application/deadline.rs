use crate::domain::errors::{DomainError, DomainResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// 调用方给定的截止时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// 已过期则直接失败，不做任何事
    pub fn check(&self, operation: &str) -> DomainResult<()> {
        if self.is_expired() {
            return Err(DomainError::Timeout(operation.to_string()));
        }
        Ok(())
    }

    /// 在截止时间内等待 future 完成
    pub async fn run<F, T>(&self, operation: &str, future: F) -> DomainResult<T>
    where
        F: Future<Output = DomainResult<T>>,
    {
        self.check(operation)?;
        tokio::time::timeout_at(self.0, future)
            .await
            .map_err(|_| DomainError::Timeout(operation.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expired_deadline_never_polls() {
        let deadline = Deadline::at(Instant::now());
        let mut polled = false;
        let result = deadline
            .run("testing", async {
                polled = true;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(DomainError::Timeout(_))));
        assert!(!polled);
    }

    #[tokio::test]
    async fn test_slow_future_times_out() {
        let deadline = Deadline::after(Duration::from_millis(10));
        let result: DomainResult<()> = deadline
            .run("sleeping", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(DomainError::Timeout(_))));
    }
}
