mod common;

use std::time::Duration;

use skylab::{Error, ExperimentConfig, FetchOutcome, FileBackend, Registry, UserContext, Variant};

use common::{TestServer, API_KEY};

const WAIT: Duration = Duration::from_secs(10);

fn config(server: &TestServer) -> ExperimentConfig {
    ExperimentConfig::new()
        .with_instance_name("exp")
        .with_server_url(server.uri())
}

#[test]
fn instances_are_independent() {
    let server = TestServer::start();
    server.respond_with(200, r#"{"flagA":{"key":"on"}}"#);
    let registry = Registry::new().unwrap();

    let exp = registry.init(API_KEY, config(&server)).unwrap();
    let default = registry
        .init(API_KEY, ExperimentConfig::new().with_server_url(server.uri()))
        .unwrap();

    exp.start(Some(UserContext::builder().device_id("d1").build()))
        .get_timeout(WAIT)
        .unwrap();

    assert_eq!(exp.get_variant("flagA"), Variant::new("on"));
    assert!(default.get_variant("flagA").is_empty());
    assert_eq!(
        registry.get_instance("EXP").unwrap().get_variant("flagA"),
        Variant::new("on")
    );
    assert!(registry.get_instance_or_err("").is_ok());
}

#[test]
fn variants_are_available_in_next_registry() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start();
    server.respond_with(200, r#"{"flagA":{"value":"on","payload":[1,2]}}"#);

    {
        let registry = Registry::with_persistence(FileBackend::new(dir.path())).unwrap();
        let client = registry.init(API_KEY, config(&server)).unwrap();
        client
            .start(Some(UserContext::builder().device_id("d1").build()))
            .get_timeout(WAIT)
            .unwrap();
        registry.shutdown();
    }

    let registry = Registry::with_persistence(FileBackend::new(dir.path())).unwrap();
    let exp = registry.init(API_KEY, config(&server)).unwrap();
    let default = registry
        .init(API_KEY, ExperimentConfig::new().with_server_url(server.uri()))
        .unwrap();

    assert_eq!(exp.get_variant("flagA").value(), Some("on"));
    assert_eq!(
        exp.get_variant("flagA").payload(),
        Some(&serde_json::json!([1, 2]))
    );
    assert!(default.get_variants().is_empty());
    assert_eq!(server.requests().len(), 1);
}

#[test]
fn shutdown_stops_polling_and_fetching() {
    let server = TestServer::start();
    server.respond_with(200, r#"{"flagA":{"key":"on"}}"#);
    let registry = Registry::new().unwrap();
    let client = registry
        .init(
            API_KEY,
            config(&server).with_poll_interval(Duration::from_millis(50)),
        )
        .unwrap();
    client
        .start(Some(UserContext::builder().device_id("d1").build()))
        .get_timeout(WAIT)
        .unwrap();
    client.start_polling().unwrap();

    registry.shutdown();

    assert!(!client.is_polling());
    assert_eq!(registry.resources().scheduler().active_timers(), 0);
    assert!(matches!(
        client.refetch_all().get_timeout(WAIT),
        Err(Error::Shutdown)
    ));
    assert!(matches!(client.start_polling(), Err(Error::Shutdown)));
    // Cached variants are still served.
    assert_eq!(client.get_variant("flagA"), Variant::new("on"));
    // Equal users never reach the scheduler.
    assert_eq!(
        client
            .set_user(Some(UserContext::builder().device_id("d1").build()))
            .get_timeout(WAIT)
            .unwrap(),
        FetchOutcome::Unchanged
    );
}
