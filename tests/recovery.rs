//! Test restarting issuing points from their stored state.

use chrono::Duration;
use crld::api::PublishStatus;
use crld::ipoint::{IssuingPoint, Watermark};
use crld::stores::IssuingPointRepository;
use crld::test;

mod common;


#[test]
fn clean_shutdown_keeps_pending_changes() {
    let env = common::env();
    let mut config = common::config("master");
    config.update_schema = 4;
    env.issue(0x10, false);
    let point = common::started(config.clone(), &env);

    let (entry, id) = env.revoke(0x10);
    point.add_revoked(entry, Some(id)).unwrap();
    point.shutdown().unwrap();

    let handle = test::handle("master");
    assert_eq!(
        env.repository.get_watermark(&handle).unwrap(),
        Watermark::Clean
    );

    let env = env.reopen();
    let point = IssuingPoint::create(config, env.collaborators()).unwrap();
    assert_eq!(point.crl_number(), 1);
    assert_eq!(point.last_update(), Some(common::start_time()));
    assert_eq!(point.cache().pending_len(), 1);
    assert!(!point.cache().needs_rebuild());
    assert_eq!(
        point.next_scheduled_update().unwrap().at,
        common::start_time() + Duration::minutes(240)
    );

    point.start().unwrap();
    common::advance(&env, &point, 240);
    let delta = env.publisher.last().unwrap();
    assert!(delta.is_delta());
    assert_eq!(delta.crl_number(), 2);
    assert_eq!(common::serials(&delta), vec![0x10]);

    point.shutdown().unwrap();
}

#[test]
fn unwritten_changes_are_replayed_from_request_log() {
    let env = common::env();
    let mut config = common::config("master");
    config.update_schema = 4;
    config.cache_update_interval = 15;
    env.issue(0x10, false);
    env.issue(0x11, true);

    // The first process never gets to write its cache.
    let crashed = common::started(config.clone(), &env);
    let (entry, first) = env.revoke(0x10);
    crashed.add_revoked(entry, Some(first)).unwrap();
    let (entry, second) = env.revoke(0x11);
    crashed.add_revoked(entry, Some(second)).unwrap();

    let handle = test::handle("master");
    assert_eq!(
        env.repository.get_watermark(&handle).unwrap(),
        Watermark::At(first)
    );

    let env = env.reopen();
    let point = IssuingPoint::create(config, env.collaborators()).unwrap();
    assert_eq!(point.crl_number(), 1);
    assert_eq!(point.cache().pending_len(), 2);
    assert!(!point.cache().needs_rebuild());
    assert_eq!(
        env.repository.get_watermark(&handle).unwrap(),
        Watermark::Clean
    );

    point.start().unwrap();
    common::advance(&env, &point, 240);
    let delta = env.publisher.last().unwrap();
    assert!(delta.is_delta());
    assert_eq!(common::serials(&delta), vec![0x10, 0x11]);

    point.shutdown().unwrap();
}

#[test]
fn without_recovery_cache_is_rebuilt() {
    let env = common::env();
    let mut config = common::config("master");
    config.update_schema = 4;
    config.cache_update_interval = 15;
    config.enable_cache_recovery = false;
    env.issue(0x10, false);

    let crashed = common::started(config.clone(), &env);
    let (entry, id) = env.revoke(0x10);
    crashed.add_revoked(entry, Some(id)).unwrap();

    let env = env.reopen();
    let point = IssuingPoint::create(config, env.collaborators()).unwrap();
    assert!(point.cache().needs_rebuild());
    assert!(point.is_cache_empty());

    // Without a valid cache the next scheduled update is a full CRL.
    point.start().unwrap();
    common::advance(&env, &point, 240);
    let crl = env.publisher.last().unwrap();
    assert!(!crl.is_delta());
    assert_eq!(crl.crl_number(), 2);
    assert_eq!(common::serials(&crl), vec![0x10]);

    point.shutdown().unwrap();
}

#[test]
fn publish_on_start_republishes_current_crl() {
    let env = common::env();
    let mut config = common::config("master");
    config.publish_on_start = true;
    config.publish_destination = Some("ca1".to_string());
    let point = common::started(config.clone(), &env);
    point.shutdown().unwrap();

    let env = env.reopen();
    let point = IssuingPoint::create(config, env.collaborators()).unwrap();
    point.start().unwrap();
    common::settle(&point);

    let published = env.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].crl_number(), 1);
    assert_eq!(env.publisher.destinations(), vec![Some("ca1".to_string())]);
    assert!(matches!(
        point.status().publish,
        PublishStatus::Published { crl_number: 1, .. }
    ));

    point.shutdown().unwrap();
}

#[test]
fn deleted_point_starts_over() {
    let env = common::env();
    let config = common::config("master");
    let point = common::started(config.clone(), &env);
    assert_eq!(point.crl_number(), 1);
    point.delete().unwrap();

    let handle = test::handle("master");
    assert!(env.repository.get_crl(&handle, false).unwrap().is_none());

    let point = IssuingPoint::create(config, env.collaborators()).unwrap();
    assert_eq!(point.crl_number(), 0);
    assert!(point.cache().needs_rebuild());
}
