//! Property tests for the token bucket.
//!
//! For any interleaving of consumption and elapsed time, the token count
//! stays within `[0, capacity]` and consumption from an empty bucket never
//! succeeds.

use std::time::Duration;

use proptest::prelude::*;

use tower_dispatch::{RateLimit, RateLimiter};

const LIMIT: RateLimit = RateLimit {
    capacity: 5.0,
    refill_per_sec: 2.0,
};

proptest! {
    // Keep case counts modest; each case spins up a paused runtime.
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn tokens_stay_within_bounds(ops in prop::collection::vec((0u8..6, 0u64..4000), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(async {
            let limiter = RateLimiter::new();
            for (consumes, advance_ms) in ops {
                tokio::time::advance(Duration::from_millis(advance_ms)).await;
                for _ in 0..consumes {
                    let before = limiter
                        .tokens("search", "alice", LIMIT)
                        .await
                        .unwrap_or(LIMIT.capacity);
                    let granted = limiter.try_consume("search", "alice", LIMIT).await;
                    // Consuming from an empty bucket never succeeds
                    if before < 1.0 {
                        prop_assert!(!granted);
                    }
                }
                let tokens = limiter.tokens("search", "alice", LIMIT).await.unwrap();
                prop_assert!(tokens >= 0.0, "tokens {} went negative", tokens);
                prop_assert!(
                    tokens <= LIMIT.capacity,
                    "tokens {} exceeded capacity {}",
                    tokens,
                    LIMIT.capacity
                );
            }
            Ok(())
        })?;
    }
}
