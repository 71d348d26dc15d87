use std::time::Duration;

use skylab::{ExperimentConfig, Registry, UserContext, Variant};

pub fn main() {
    // Configure env_logger to see SDK logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("skylab=debug")).init();

    let api_key = std::env::var("SKYLAB_API_KEY").unwrap();
    let registry = Registry::new().unwrap();
    let client = registry
        .init(
            api_key,
            ExperimentConfig::new().with_fallback_variant(Variant::new("control")),
        )
        .unwrap();

    // Block waiting for variants. Until they arrive, the client returns the fallback variant.
    let user = UserContext::builder()
        .user_id("test-user")
        .device_id("test-device")
        .build();
    client.start_and_wait(Some(user), Duration::from_secs(5));

    // Keep variants up to date in the background.
    client.start_polling().unwrap();

    let variant = client.get_variant("a-flag");
    println!("Variant: {:?}", variant);

    registry.shutdown();
}
