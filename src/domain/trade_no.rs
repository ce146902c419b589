use chrono::{DateTime, Local, Offset, TimeZone};
use std::sync::atomic::{AtomicI64, Ordering};

/// 商户单号生成器
///
/// 格式为 `S` + `yyyyMMddHHmmss` + 6 位微秒。同一微秒内的多次调用会顺延到
/// 下一微秒，保证单进程内严格递增。
#[derive(Debug, Default)]
pub struct TradeNoGenerator {
    last_micros: AtomicI64,
}

impl TradeNoGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> String {
        self.next_at(Local::now())
    }

    fn next_at<Tz: TimeZone>(&self, now: DateTime<Tz>) -> String {
        let offset = now.offset().fix();
        let candidate = now.timestamp_micros();
        let mut last = self.last_micros.load(Ordering::Relaxed);
        let issued = loop {
            let next = candidate.max(last + 1);
            match self.last_micros.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break next,
                Err(actual) => last = actual,
            }
        };

        let at = DateTime::from_timestamp_micros(issued)
            .unwrap_or_default()
            .with_timezone(&offset);
        format!(
            "S{}{:06}",
            at.format("%Y%m%d%H%M%S"),
            issued.rem_euclid(1_000_000)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_format() {
        let generator = TradeNoGenerator::new();
        let at = Utc.with_ymd_and_hms(2021, 2, 19, 16, 34, 1).unwrap()
            + chrono::Duration::microseconds(844_556);
        assert_eq!(generator.next_at(at), "S20210219163401844556");
    }

    #[test]
    fn test_same_instant_is_bumped() {
        let generator = TradeNoGenerator::new();
        let at = Utc.with_ymd_and_hms(2021, 2, 19, 16, 34, 1).unwrap();
        let first = generator.next_at(at);
        let second = generator.next_at(at);
        assert_eq!(first, "S20210219163401000000");
        assert_eq!(second, "S20210219163401000001");
    }

    #[test]
    fn test_unique_across_threads() {
        let generator = Arc::new(TradeNoGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || (0..500).map(|_| generator.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for no in handle.join().unwrap() {
                assert_eq!(no.len(), 21);
                assert!(seen.insert(no));
            }
        }
    }
}
