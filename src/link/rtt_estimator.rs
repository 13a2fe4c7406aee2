use std::time::Duration;

/// Round trip time estimation and the derived retransmission timeout, following RFC 6298 with
///  alpha = 1/8, beta = 1/4 and K = 4.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    smoothed_rtt: Option<Duration>,
    rtt_variance: Duration,
    timeout: Duration,
    min_timeout: Duration,
    max_timeout: Duration,
}

impl RttEstimator {
    const K: u32 = 4;

    pub fn new(initial_timeout: Duration, min_timeout: Duration, max_timeout: Duration) -> RttEstimator {
        RttEstimator {
            smoothed_rtt: None,
            rtt_variance: Duration::ZERO,
            timeout: initial_timeout.clamp(min_timeout, max_timeout),
            min_timeout,
            max_timeout,
        }
    }

    pub fn on_sample(&mut self, rtt: Duration) {
        let smoothed_rtt = match self.smoothed_rtt {
            None => {
                self.rtt_variance = rtt / 2;
                rtt
            }
            Some(smoothed_rtt) => {
                // variance first: it is based on the previous smoothed value
                self.rtt_variance = self.rtt_variance * 3 / 4 + smoothed_rtt.abs_diff(rtt) / 4;
                smoothed_rtt * 7 / 8 + rtt / 8
            }
        };
        self.smoothed_rtt = Some(smoothed_rtt);

        self.timeout = (smoothed_rtt + self.rtt_variance * Self::K)
            .clamp(self.min_timeout, self.max_timeout);
    }

    pub fn smoothed_rtt(&self) -> Option<Duration> {
        self.smoothed_rtt
    }

    pub fn rtt_variance(&self) -> Duration {
        self.rtt_variance
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn estimator() -> RttEstimator {
        RttEstimator::new(Duration::from_millis(3000), Duration::from_millis(1000), Duration::from_millis(10000))
    }

    #[rstest]
    #[case::within_bounds(3000, 3000)]
    #[case::below_min(10, 1000)]
    #[case::above_max(60000, 10000)]
    fn test_initial_timeout(#[case] initial_millis: u64, #[case] expected_millis: u64) {
        let estimator = RttEstimator::new(Duration::from_millis(initial_millis), Duration::from_millis(1000), Duration::from_millis(10000));
        assert_eq!(estimator.timeout(), Duration::from_millis(expected_millis));
        assert_eq!(estimator.smoothed_rtt(), None);
    }

    #[rstest]
    #[case::small(100, 1000)]
    #[case::medium(500, 1500)]
    #[case::big(4000, 10000)]
    fn test_first_sample(#[case] rtt_millis: u64, #[case] expected_timeout_millis: u64) {
        let mut estimator = estimator();
        estimator.on_sample(Duration::from_millis(rtt_millis));
        assert_eq!(estimator.smoothed_rtt(), Some(Duration::from_millis(rtt_millis)));
        assert_eq!(estimator.rtt_variance(), Duration::from_millis(rtt_millis) / 2);
        assert_eq!(estimator.timeout(), Duration::from_millis(expected_timeout_millis));
    }

    #[test]
    fn test_second_sample() {
        let mut estimator = estimator();
        estimator.on_sample(Duration::from_millis(800));
        estimator.on_sample(Duration::from_millis(400));

        // 400 * 3/4 + 400 / 4
        assert_eq!(estimator.rtt_variance(), Duration::from_millis(400));
        // 800 * 7/8 + 400 / 8
        assert_eq!(estimator.smoothed_rtt(), Some(Duration::from_millis(750)));
        assert_eq!(estimator.timeout(), Duration::from_millis(2350));
    }

    #[rstest]
    #[case::below_min_timeout(200, 1000)]
    #[case::inside_bounds(3000, 3000)]
    #[case::above_max_timeout(12000, 10000)]
    fn test_constant_rtt_converges(#[case] rtt_millis: u64, #[case] expected_timeout_millis: u64) {
        let rtt = Duration::from_millis(rtt_millis);
        let mut estimator = estimator();
        estimator.on_sample(Duration::from_millis(50));

        for _ in 0..200 {
            estimator.on_sample(rtt);
            assert!(estimator.timeout() >= Duration::from_millis(1000));
            assert!(estimator.timeout() <= Duration::from_millis(10000));
        }

        let smoothed = estimator.smoothed_rtt().unwrap();
        assert!(smoothed.abs_diff(rtt) < Duration::from_millis(1), "{:?}", smoothed);
        assert!(estimator.rtt_variance() < Duration::from_millis(1));
        assert!(estimator.timeout().abs_diff(Duration::from_millis(expected_timeout_millis)) < Duration::from_millis(5));
    }
}
