//! Concurrency properties of the shared response cache

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use alertpull_core::{CacheKey, ResponseCache};
use proptest::prelude::*;
use serde_json::json;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Writers on disjoint upstreams never see each other's payloads
    #[test]
    fn disjoint_upstreams_do_not_interfere(
        endpoints in prop::collection::vec("[a-z/]{1,16}", 1..24),
        rounds in 1usize..8,
    ) {
        let cache = Arc::new(ResponseCache::new());
        let ttl = Duration::from_secs(60);

        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|upstream| {
                let cache = cache.clone();
                let endpoints = endpoints.clone();
                thread::spawn(move || {
                    for round in 0..rounds {
                        for endpoint in &endpoints {
                            let key = CacheKey::new(upstream, endpoint.as_str());
                            cache.set(key.clone(), Arc::new(json!([upstream, round])), ttl);
                            let seen = cache.get(&key).expect("fresh entry");
                            assert_eq!(seen[0], upstream);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let mut distinct = endpoints.clone();
        distinct.sort();
        distinct.dedup();
        prop_assert_eq!(cache.len(), distinct.len() * 2);

        for endpoint in &distinct {
            for upstream in ["a", "b"] {
                let payload = cache.get(&CacheKey::new(upstream, endpoint.as_str())).unwrap();
                prop_assert_eq!(payload[0].as_str(), Some(upstream));
                prop_assert_eq!(payload[1].as_u64(), Some(rounds as u64 - 1));
            }
        }
    }

    /// Dropping one upstream leaves every other upstream's entries alone
    #[test]
    fn invalidate_upstream_is_scoped(
        a_endpoints in prop::collection::hash_set("[a-z]{1,8}", 0..16),
        b_endpoints in prop::collection::hash_set("[a-z]{1,8}", 0..16),
    ) {
        let cache = ResponseCache::new();
        let ttl = Duration::from_secs(60);

        for endpoint in &a_endpoints {
            cache.set(CacheKey::new("a", endpoint.as_str()), Arc::new(json!(1)), ttl);
        }
        for endpoint in &b_endpoints {
            cache.set(CacheKey::new("b", endpoint.as_str()), Arc::new(json!(2)), ttl);
        }

        prop_assert_eq!(cache.invalidate_upstream("a"), a_endpoints.len());
        prop_assert_eq!(cache.len(), b_endpoints.len());
    }
}
