//! Property-based tests for subscriber ordering

use event_bus::EventBus;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Invocation order is priority ascending, then registration order
    #[test]
    fn prop_trigger_order_is_stable_priority_sort(priorities in prop::collection::vec(-5i32..5, 0..30)) {
        let bus = EventBus::<()>::new("prop");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for (index, priority) in priorities.iter().copied().enumerate() {
            let seen = Arc::clone(&seen);
            bus.register(priority, move |_| {
                seen.lock().push(index);
                Ok(())
            });
        }

        let invoked = bus.trigger(&());
        prop_assert_eq!(invoked, priorities.len());

        let mut expected: Vec<usize> = (0..priorities.len()).collect();
        expected.sort_by_key(|&i| priorities[i]);
        prop_assert_eq!(seen.lock().clone(), expected);
    }

    /// Failing subscribers never change which other subscribers run
    #[test]
    fn prop_failures_are_isolated(failing in prop::collection::vec(any::<bool>(), 1..20)) {
        let bus = EventBus::<()>::new("prop");
        let succeeded = Arc::new(Mutex::new(0usize));

        for fail in failing.iter().copied() {
            let succeeded = Arc::clone(&succeeded);
            bus.register(0, move |_| {
                if fail {
                    return Err("failed".into());
                }
                *succeeded.lock() += 1;
                Ok(())
            });
        }

        prop_assert_eq!(bus.trigger(&()), failing.len());
        prop_assert_eq!(*succeeded.lock(), failing.iter().filter(|f| !**f).count());
    }
}
