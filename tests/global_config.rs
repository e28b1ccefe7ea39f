//! Tests that change the process-wide configuration.
//!
//! Everything lives in one test function: the test harness runs tests of a
//! binary in parallel, and these steps must not interleave.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use recoil::{
    Config, Failure, Kind, Preset, Thrown, configure, create_error, create_scope, get_config, release,
    reset_config, set_config, try_sync,
};

#[test]
fn test_global_configuration_lifecycle() {
    reset_config();
    let hooked = Arc::new(AtomicUsize::new(0));
    let counter = hooked.clone();
    configure(move |config| {
        config.on_error = Some(Arc::new(move |failure: Failure| {
            counter.fetch_add(1, Ordering::SeqCst);
            failure.with_context("hooked", true)
        }));
        config
            .default_context
            .insert("service".to_owned(), "catalog".into());
    });

    // Successful operations never reach the factory.
    for n in 0..1_000 {
        assert_eq!(try_sync(|| Ok::<_, Thrown>(n)).unwrap(), n);
    }
    assert_eq!(hooked.load(Ordering::SeqCst), 0);

    let failure = try_sync(|| "12x".parse::<u32>()).unwrap_err();
    assert_eq!(failure.kind(), &Kind::PARSE);
    assert_eq!(failure.context()["service"], "catalog");
    assert_eq!(failure.context()["hooked"], true);
    assert_eq!(hooked.load(Ordering::SeqCst), 1);

    // Scopes carry their own configuration and ignore the global hook.
    let minimal = create_scope(Config::preset(Preset::Minimal));
    let quiet = minimal.create_error(Kind::ERROR, "scoped", None, None);
    assert!(quiet.location().is_none());
    assert!(quiet.created_at().is_none());
    assert!(quiet.context().is_empty());
    assert_eq!(hooked.load(Ordering::SeqCst), 1);

    // Pooled and interned records.
    set_config(Config::preset(Preset::HighThroughput));
    let first = create_error("BurstError", "queue full", None, None);
    let second = create_error("BurstError", "queue full", None, None);
    assert!(Arc::ptr_eq(first.fragment(), second.fragment()));
    assert!(first.location().is_none());
    assert!(release(first));
    let recycled = create_error("BurstError", "queue full again", None, None);
    assert_eq!(recycled.message(), "queue full again");
    assert!(recycled.context().is_empty());
    assert!(recoil::is_failure(&recycled));

    reset_config();
    let config = get_config();
    assert!(config.on_error.is_none());
    assert!(!config.minimal);
    assert_eq!(config.pool_capacity, 0);
}
