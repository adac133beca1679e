//! Utility functions shared by the pool and its workers.

use std::time::Duration;

/// Largest shift applied to the base delay. Retry counts above this saturate.
pub const MAX_BACKOFF_SHIFT: u32 = 62;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Exponential backoff: `base * 2^retry_count`.
///
/// The shift is clamped at [`MAX_BACKOFF_SHIFT`] and the product saturates at
/// [`Duration::MAX`], so the delay keeps growing (or stays flat) as the retry
/// count increases and never wraps around to something shorter.
///
/// ```rust
/// use anvil_pool::utils::calculate_backoff;
/// use std::time::Duration;
///
/// let base = Duration::from_millis(100);
/// assert_eq!(calculate_backoff(0, base), Duration::from_millis(100));
/// assert_eq!(calculate_backoff(3, base), Duration::from_millis(800));
/// ```
pub fn calculate_backoff(retry_count: u32, base: Duration) -> Duration {
    let shift = retry_count.min(MAX_BACKOFF_SHIFT);
    let nanos = base.as_nanos().saturating_mul(1u128 << shift);

    match u64::try_from(nanos / NANOS_PER_SEC) {
        Ok(secs) => Duration::new(secs, (nanos % NANOS_PER_SEC) as u32),
        Err(_) => Duration::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(calculate_backoff(0, base), Duration::from_millis(100));
        assert_eq!(calculate_backoff(1, base), Duration::from_millis(200));
        assert_eq!(calculate_backoff(2, base), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_clamps_at_ceiling() {
        let base = Duration::from_nanos(1);
        let at_ceiling = calculate_backoff(MAX_BACKOFF_SHIFT, base);

        assert_eq!(at_ceiling, Duration::from_nanos(1 << MAX_BACKOFF_SHIFT));
        assert_eq!(calculate_backoff(MAX_BACKOFF_SHIFT + 1, base), at_ceiling);
        assert_eq!(calculate_backoff(u32::MAX, base), at_ceiling);
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        let base = Duration::from_secs(3600);
        assert_eq!(calculate_backoff(MAX_BACKOFF_SHIFT, base), Duration::MAX);
        assert_eq!(calculate_backoff(200, Duration::MAX), Duration::MAX);
    }

    #[test]
    fn test_zero_base_stays_zero() {
        assert_eq!(calculate_backoff(10, Duration::ZERO), Duration::ZERO);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 1000,
                ..ProptestConfig::default()
            })]

            /// Property: backoff never shrinks as the retry count grows.
            #[test]
            fn backoff_is_monotonic(
                base_ms in 1u64..=60_000,
                retry in 0u32..=(MAX_BACKOFF_SHIFT + 8),
            ) {
                let base = Duration::from_millis(base_ms);
                prop_assert!(calculate_backoff(retry + 1, base) >= calculate_backoff(retry, base));
            }

            /// Property: a positive base never yields a zero delay or one shorter than the base.
            #[test]
            fn backoff_is_bounded_below_by_base(
                base_nanos in 1u64..=u64::MAX,
                retry in any::<u32>(),
            ) {
                let base = Duration::from_nanos(base_nanos);
                let delay = calculate_backoff(retry, base);
                prop_assert!(delay > Duration::ZERO);
                prop_assert!(delay >= base);
            }

            /// Property: past the ceiling the delay stops changing.
            #[test]
            fn backoff_saturates_past_ceiling(
                base_ms in 1u64..=1_000,
                extra in 1u32..=1_000,
            ) {
                let base = Duration::from_millis(base_ms);
                prop_assert_eq!(
                    calculate_backoff(MAX_BACKOFF_SHIFT + extra, base),
                    calculate_backoff(MAX_BACKOFF_SHIFT, base)
                );
            }
        }
    }
}
