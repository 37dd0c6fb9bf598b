//! Global log subscriber installation

use rvoip_phone_bridge::logging::setup_logging;
use rvoip_phone_bridge::{PhoneConfig, PhoneError};
use serial_test::serial;

#[test]
#[serial]
fn test_subscriber_installed_once_from_phone_config() {
    let config = PhoneConfig::from_toml_str(
        r#"
        [logging]
        bridge_level = "debug"
        source_location = true
        "#,
    )
    .unwrap();
    let first = setup_logging(&config.logging);
    assert!(first.is_ok(), "first install failed: {:?}", first);

    let second = setup_logging(&config.logging.clone().with_json());
    assert!(matches!(second, Err(PhoneError::Configuration { .. })));
}
