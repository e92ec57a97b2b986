use fleetpulse_core::config::ConfigLoader;
use fleetpulse_core::{
    Config, DeviceStatus, NewNotification, NotificationRecord, NotificationType, PresenceStatus,
};

#[test]
fn core_smoke_config_file_is_validated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "reconciler:\n  interval_secs: 0\n").unwrap();

    let err = ConfigLoader::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("reconciler.interval_secs"));

    std::fs::write(&path, "reconciler:\n  interval_secs: 15\n").unwrap();
    let config = Config::load(&Some(path.to_string_lossy().into_owned())).unwrap();
    assert_eq!(config.reconciler.interval_secs, 15);
}

#[test]
fn core_smoke_notification_view_shape() {
    let record = NotificationRecord::from_new(
        "u1",
        NewNotification::new("Device Offline", "Pump went quiet")
            .kind(NotificationType::Warning)
            .device("d1"),
    );
    let json = serde_json::to_value(record.view()).unwrap();

    assert_eq!(json["type"], "warning");
    assert_eq!(json["device_id"], "d1");
    assert_eq!(json["is_read"], false);
    assert_eq!(json["user_id"], "u1");
    assert!(json.get("metadata").is_none());
}

#[test]
fn core_smoke_presence_maps_to_status() {
    assert_eq!(PresenceStatus::offline().desired_status(), DeviceStatus::Offline);
    assert_eq!("online".parse::<DeviceStatus>().unwrap(), DeviceStatus::Online);
}
