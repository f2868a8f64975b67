//! End-to-end activation runs against in-memory hardware.
//!
//! Every test runs with tokio's clock paused, so association pauses,
//! DHCP ceilings and scan intervals elapse instantly.

mod common;

use std::net::Ipv4Addr;
use std::time::Duration;

use common::*;
use nmd::{
    ActivationStage, ActivationTarget, AuthMethod, DeviceDescriptor, DeviceError, DeviceEvent,
    DeviceManager, EncKey, KeyResponse, NetworkMode, RememberedNetwork, TimeoutConfig,
};

use ActivationStage::*;

const FULL_RUN: [ActivationStage; 6] = [
    DevicePrepare,
    DeviceConfigure,
    IpConfigStart,
    IpConfigGet,
    IpConfigCommit,
    Activated,
];

async fn wireless_manager(
    fakes: &Fakes,
    radio: std::sync::Arc<FakeRadio>,
) -> (DeviceManager, tokio::sync::broadcast::Receiver<DeviceEvent>) {
    let manager = DeviceManager::new(fakes.providers());
    let events = manager.subscribe();
    manager
        .add_device(DeviceDescriptor::wireless("wlan0", radio))
        .await
        .unwrap();
    (manager, events)
}

#[tokio::test(start_paused = true)]
async fn test_home_network_activates_end_to_end() {
    let radio = FakeRadio::new(vec![FakeNetwork::open("home", HOME_ADDR, 2.437)]);
    radio.set_scan_buffer(sighting(ScanBuffer::new(), HOME_ADDR, "home", 2437, 80).build());
    let fakes = Fakes::new(vec![DhcpBehavior::Bind(home_lease())], vec![]);
    let (manager, mut events) = wireless_manager(&fakes, radio.clone()).await;

    assert!(manager.request_scan("wlan0").await.unwrap());
    let best = manager.best_candidate("wlan0").await.unwrap().unwrap();
    assert_eq!(best.essid.as_deref(), Some("home"));

    manager
        .activate("wlan0", ActivationTarget::Best)
        .await
        .unwrap();
    settle(Duration::from_secs(30)).await;

    let status = manager.status("wlan0").unwrap();
    assert_eq!(status.stage, Some(Activated));
    assert_eq!(status.ip4_address, Some(Ipv4Addr::new(192, 168, 1, 50)));
    assert_eq!(status.essid.as_deref(), Some("home"));
    assert!(status.link_active);

    let events = drain(&mut events);
    assert_eq!(stages(&events, "wlan0"), FULL_RUN);
    assert!(events.contains(&DeviceEvent::LinkChanged {
        iface: "wlan0".into(),
        active: true,
    }));

    let commits = fakes.installer.commits.lock().unwrap().clone();
    assert_eq!(commits, vec![("wlan0".to_string(), home_lease())]);
    assert!(fakes.prompter.requests.lock().unwrap().is_empty());
    assert_eq!(manager.signal_strength("wlan0").unwrap(), Some(60));
    radio.with_state(|state| {
        assert_eq!(state.essid, "home");
        assert_eq!(state.key, None);
    });
}

#[tokio::test(start_paused = true)]
async fn test_successful_activation_records_last_use() {
    let radio = FakeRadio::new(vec![FakeNetwork::open("home", HOME_ADDR, 2.437)]);
    radio.set_scan_buffer(sighting(ScanBuffer::new(), HOME_ADDR, "home", 2437, 80).build());
    let fakes = Fakes::new(vec![DhcpBehavior::Bind(home_lease())], vec![]);
    let (manager, _events) = wireless_manager(&fakes, radio).await;
    manager.history().remember(RememberedNetwork::new("home", 1));

    manager.request_scan("wlan0").await.unwrap();
    manager
        .activate("wlan0", ActivationTarget::Best)
        .await
        .unwrap();
    settle(Duration::from_secs(30)).await;

    let remembered = manager.history().get("home").unwrap();
    assert!(remembered.timestamp > 1);
}

#[tokio::test(start_paused = true)]
async fn test_office_network_falls_back_to_shared_key() {
    let radio = FakeRadio::new(vec![FakeNetwork::encrypted(
        "office",
        OFFICE_ADDR,
        2.412,
        AuthMethod::SharedKey,
    )]);
    radio.set_scan_buffer(
        sighting(ScanBuffer::new(), OFFICE_ADDR, "office", 2412, 70)
            .encrypted()
            .build(),
    );
    let fakes = Fakes::new(vec![DhcpBehavior::Bind(office_lease())], vec![]);
    let (manager, mut events) = wireless_manager(&fakes, radio.clone()).await;
    manager.request_scan("wlan0").await.unwrap();

    manager
        .activate(
            "wlan0",
            ActivationTarget::Essid {
                essid: "office".into(),
                key: Some(EncKey::hex("0123456789")),
            },
        )
        .await
        .unwrap();
    settle(Duration::from_secs(60)).await;

    assert_eq!(manager.status("wlan0").unwrap().stage, Some(Activated));
    assert_eq!(stages(&drain(&mut events), "wlan0"), FULL_RUN);
    assert!(fakes.prompter.requests.lock().unwrap().is_empty());

    let auths: Vec<AuthMethod> = radio.with_state(|state| {
        state
            .key_writes
            .iter()
            .filter(|(key, _)| key.is_some())
            .map(|(_, auth)| *auth)
            .collect()
    });
    assert_eq!(auths, vec![AuthMethod::OpenSystem, AuthMethod::SharedKey]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_key_is_requested_and_retried() {
    let radio = FakeRadio::new(vec![FakeNetwork::encrypted(
        "office",
        OFFICE_ADDR,
        2.412,
        AuthMethod::OpenSystem,
    )]);
    radio.set_scan_buffer(
        sighting(ScanBuffer::new(), OFFICE_ADDR, "office", 2412, 70)
            .encrypted()
            .build(),
    );
    let fakes = Fakes::new(
        vec![DhcpBehavior::Bind(office_lease())],
        vec![PromptBehavior::Answer(KeyResponse::Key(EncKey::ascii(
            "s3cr3",
        )))],
    );
    let (manager, mut events) = wireless_manager(&fakes, radio.clone()).await;
    manager.request_scan("wlan0").await.unwrap();

    manager
        .activate(
            "wlan0",
            ActivationTarget::Essid {
                essid: "office".into(),
                key: None,
            },
        )
        .await
        .unwrap();
    settle(Duration::from_secs(60)).await;

    let status = manager.status("wlan0").unwrap();
    assert_eq!(status.stage, Some(Activated));
    assert_eq!(status.ip4_address, Some(office_lease().address));
    assert_eq!(
        stages(&drain(&mut events), "wlan0"),
        vec![
            DevicePrepare,
            DeviceConfigure,
            NeedUserKey,
            DeviceConfigure,
            IpConfigStart,
            IpConfigGet,
            IpConfigCommit,
            Activated,
        ]
    );
    let requests = fakes.prompter.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].essid, "office");
    assert!(!requests[0].retry);
    radio.with_state(|state| {
        assert!(state.key.is_some());
        assert_eq!(state.auth, AuthMethod::OpenSystem);
    });
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_key_entry_fails_and_blacklists() {
    let radio = FakeRadio::new(vec![FakeNetwork::encrypted(
        "office",
        OFFICE_ADDR,
        2.412,
        AuthMethod::OpenSystem,
    )]);
    radio.set_scan_buffer(
        sighting(ScanBuffer::new(), OFFICE_ADDR, "office", 2412, 70)
            .encrypted()
            .build(),
    );
    let fakes = Fakes::new(
        vec![],
        vec![PromptBehavior::Answer(KeyResponse::Cancelled)],
    );
    let (manager, mut events) = wireless_manager(&fakes, radio.clone()).await;
    manager.request_scan("wlan0").await.unwrap();

    manager
        .activate(
            "wlan0",
            ActivationTarget::Essid {
                essid: "office".into(),
                key: None,
            },
        )
        .await
        .unwrap();
    settle(Duration::from_secs(10)).await;

    assert_eq!(manager.status("wlan0").unwrap().stage, Some(Failed));
    assert_eq!(
        stages(&drain(&mut events), "wlan0"),
        vec![DevicePrepare, DeviceConfigure, NeedUserKey, Failed]
    );
    assert!(manager.history().is_blacklisted("office"));
    assert_eq!(*fakes.dhcp.started.lock().unwrap(), 0);
    radio.with_state(|state| assert_eq!(state.essid, ""));

    // Blacklisted networks are not picked automatically
    assert!(manager.best_candidate("wlan0").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_naming_a_blacklisted_network_clears_it() {
    let radio = FakeRadio::new(vec![FakeNetwork::open("home", HOME_ADDR, 2.437)]);
    radio.set_scan_buffer(sighting(ScanBuffer::new(), HOME_ADDR, "home", 2437, 80).build());
    let fakes = Fakes::new(vec![DhcpBehavior::Bind(home_lease())], vec![]);
    let (manager, _events) = wireless_manager(&fakes, radio).await;
    manager.history().blacklist("home");
    manager.request_scan("wlan0").await.unwrap();

    assert!(matches!(
        manager.activate("wlan0", ActivationTarget::Best).await,
        Err(DeviceError::NoCandidate)
    ));

    manager
        .activate(
            "wlan0",
            ActivationTarget::Essid {
                essid: "home".into(),
                key: None,
            },
        )
        .await
        .unwrap();
    settle(Duration::from_secs(30)).await;

    assert!(!manager.history().is_blacklisted("home"));
    assert_eq!(manager.status("wlan0").unwrap().stage, Some(Activated));
}

#[tokio::test(start_paused = true)]
async fn test_dhcp_timeout_on_open_system_retries_with_shared_key() {
    let radio = FakeRadio::new(vec![FakeNetwork::encrypted_any_auth(
        "cafe", CAFE_ADDR, 2.462,
    )]);
    radio.set_scan_buffer(
        sighting(ScanBuffer::new(), CAFE_ADDR, "cafe", 2462, 50)
            .encrypted()
            .build(),
    );
    let fakes = Fakes::new(
        vec![DhcpBehavior::TimeOut, DhcpBehavior::Bind(home_lease())],
        vec![],
    );
    let (manager, mut events) = wireless_manager(&fakes, radio.clone()).await;
    manager.request_scan("wlan0").await.unwrap();

    manager
        .activate(
            "wlan0",
            ActivationTarget::Essid {
                essid: "cafe".into(),
                key: Some(EncKey::ascii("latte")),
            },
        )
        .await
        .unwrap();
    settle(Duration::from_secs(90)).await;

    assert_eq!(manager.status("wlan0").unwrap().stage, Some(Activated));
    assert_eq!(
        stages(&drain(&mut events), "wlan0"),
        vec![
            DevicePrepare,
            DeviceConfigure,
            IpConfigStart,
            IpConfigGet,
            DeviceConfigure,
            IpConfigStart,
            IpConfigGet,
            IpConfigCommit,
            Activated,
        ]
    );
    assert_eq!(*fakes.dhcp.started.lock().unwrap(), 2);
    assert_eq!(*fakes.autoip.generated.lock().unwrap(), 0);
    radio.with_state(|state| assert_eq!(state.auth, AuthMethod::SharedKey));
}

#[tokio::test(start_paused = true)]
async fn test_dhcp_timeout_on_shared_key_asks_for_new_key() {
    let radio = FakeRadio::new(vec![FakeNetwork::encrypted(
        "office",
        OFFICE_ADDR,
        2.412,
        AuthMethod::SharedKey,
    )]);
    radio.set_scan_buffer(
        sighting(ScanBuffer::new(), OFFICE_ADDR, "office", 2412, 70)
            .encrypted()
            .build(),
    );
    let fakes = Fakes::new(
        vec![DhcpBehavior::TimeOut],
        vec![PromptBehavior::Answer(KeyResponse::Cancelled)],
    );
    let (manager, _events) = wireless_manager(&fakes, radio).await;
    manager.history().remember(
        RememberedNetwork::new("office", 5).with_key(EncKey::hex("0123456789"), AuthMethod::SharedKey),
    );
    manager.request_scan("wlan0").await.unwrap();

    manager
        .activate(
            "wlan0",
            ActivationTarget::Essid {
                essid: "office".into(),
                key: None,
            },
        )
        .await
        .unwrap();
    settle(Duration::from_secs(60)).await;

    assert_eq!(manager.status("wlan0").unwrap().stage, Some(Failed));
    let requests = fakes.prompter.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].retry);
    assert_eq!(*fakes.autoip.generated.lock().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_wired_dhcp_timeout_falls_back_to_link_local() {
    let fakes = Fakes::new(vec![DhcpBehavior::TimeOut], vec![]);
    let manager = DeviceManager::new(fakes.providers());
    let mut events = manager.subscribe();
    manager
        .add_device(DeviceDescriptor::wired("eth0", FakeWired::new(true)))
        .await
        .unwrap();

    manager
        .activate("eth0", ActivationTarget::Wired)
        .await
        .unwrap();
    settle(Duration::from_secs(10)).await;

    let status = manager.status("eth0").unwrap();
    assert_eq!(status.stage, Some(Activated));
    assert_eq!(status.ip4_address, Some(link_local().address));
    assert!(status.link_active);
    assert_eq!(stages(&drain(&mut events), "eth0"), FULL_RUN);
    assert_eq!(*fakes.autoip.generated.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dhcp_that_never_answers_hits_the_ceiling() {
    let fakes = Fakes::new(vec![DhcpBehavior::Hang], vec![]);
    let config = TimeoutConfig::new().with_dhcp_timeout(Duration::from_secs(20));
    let manager = DeviceManager::with_config(fakes.providers(), config);
    manager
        .add_device(DeviceDescriptor::wired("eth0", FakeWired::new(true)))
        .await
        .unwrap();

    manager
        .activate("eth0", ActivationTarget::Wired)
        .await
        .unwrap();
    settle(Duration::from_secs(10)).await;
    assert_eq!(
        manager.status("eth0").unwrap().stage,
        Some(IpConfigStart)
    );

    settle(Duration::from_secs(15)).await;
    assert_eq!(manager.status("eth0").unwrap().stage, Some(Activated));
    assert_eq!(*fakes.dhcp.cancelled.lock().unwrap(), 1);
    assert_eq!(*fakes.autoip.generated.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_static_configuration_skips_dhcp() {
    let fakes = Fakes::new(vec![DhcpBehavior::Hang], vec![]);
    let manager = DeviceManager::new(fakes.providers());
    manager
        .add_device(DeviceDescriptor::wired("eth0", FakeWired::new(true)).with_static_config())
        .await
        .unwrap();

    manager
        .activate("eth0", ActivationTarget::Wired)
        .await
        .unwrap();
    settle(Duration::from_secs(5)).await;

    let status = manager.status("eth0").unwrap();
    assert_eq!(status.stage, Some(Activated));
    assert_eq!(status.ip4_address, Some(Ipv4Addr::new(10, 0, 0, 5)));
    assert_eq!(*fakes.dhcp.started.lock().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_commit_fails_activation() {
    let fakes = Fakes::new(vec![DhcpBehavior::Bind(home_lease())], vec![]);
    *fakes.installer.fail_commit.lock().unwrap() = true;
    let manager = DeviceManager::new(fakes.providers());
    let mut events = manager.subscribe();
    manager
        .add_device(DeviceDescriptor::wired("eth0", FakeWired::new(true)))
        .await
        .unwrap();

    manager
        .activate("eth0", ActivationTarget::Wired)
        .await
        .unwrap();
    settle(Duration::from_secs(5)).await;

    assert_eq!(manager.status("eth0").unwrap().stage, Some(Failed));
    assert_eq!(
        stages(&drain(&mut events), "eth0"),
        vec![
            DevicePrepare,
            DeviceConfigure,
            IpConfigStart,
            IpConfigGet,
            IpConfigCommit,
            Failed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_for_dhcp() {
    let fakes = Fakes::new(vec![DhcpBehavior::Hang], vec![]);
    let manager = DeviceManager::new(fakes.providers());
    let mut events = manager.subscribe();
    manager
        .add_device(DeviceDescriptor::wired("eth0", FakeWired::new(true)))
        .await
        .unwrap();

    manager
        .activate("eth0", ActivationTarget::Wired)
        .await
        .unwrap();
    settle(Duration::from_secs(5)).await;
    assert_eq!(
        manager.status("eth0").unwrap().stage,
        Some(IpConfigStart)
    );

    manager.cancel_activation("eth0").await.unwrap();

    assert_eq!(manager.status("eth0").unwrap().stage, Some(Cancelled));
    assert_eq!(*fakes.dhcp.cancelled.lock().unwrap(), 1);
    assert_eq!(
        stages(&drain(&mut events), "eth0"),
        vec![DevicePrepare, DeviceConfigure, IpConfigStart, Cancelled]
    );

    // Nothing left running: the ceiling passing changes nothing
    settle(Duration::from_secs(60)).await;
    assert_eq!(manager.status("eth0").unwrap().stage, Some(Cancelled));
    assert_eq!(*fakes.dhcp.cancelled.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_for_key() {
    let radio = FakeRadio::new(vec![FakeNetwork::encrypted(
        "office",
        OFFICE_ADDR,
        2.412,
        AuthMethod::OpenSystem,
    )]);
    radio.set_scan_buffer(
        sighting(ScanBuffer::new(), OFFICE_ADDR, "office", 2412, 70)
            .encrypted()
            .build(),
    );
    let fakes = Fakes::new(vec![], vec![PromptBehavior::Hang]);
    let (manager, _events) = wireless_manager(&fakes, radio).await;
    manager.request_scan("wlan0").await.unwrap();

    manager
        .activate(
            "wlan0",
            ActivationTarget::Essid {
                essid: "office".into(),
                key: None,
            },
        )
        .await
        .unwrap();
    settle(Duration::from_secs(5)).await;
    assert_eq!(manager.status("wlan0").unwrap().stage, Some(NeedUserKey));

    manager.cancel_activation("wlan0").await.unwrap();

    assert_eq!(manager.status("wlan0").unwrap().stage, Some(Cancelled));
    let cancelled = fakes.prompter.cancelled.lock().unwrap().clone();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].essid, "office");
    assert!(!manager.history().is_blacklisted("office"));
}

#[tokio::test(start_paused = true)]
async fn test_new_activation_replaces_one_in_flight() {
    let fakes = Fakes::new(vec![DhcpBehavior::Hang, DhcpBehavior::Bind(home_lease())], vec![]);
    let manager = DeviceManager::new(fakes.providers());
    manager
        .add_device(DeviceDescriptor::wired("eth0", FakeWired::new(true)))
        .await
        .unwrap();

    let first = manager
        .activate("eth0", ActivationTarget::Wired)
        .await
        .unwrap();
    settle(Duration::from_secs(5)).await;

    let second = manager
        .activate("eth0", ActivationTarget::Wired)
        .await
        .unwrap();
    assert_ne!(first, second);
    settle(Duration::from_secs(5)).await;

    assert_eq!(manager.status("eth0").unwrap().stage, Some(Activated));
    assert_eq!(*fakes.dhcp.cancelled.lock().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_back_to_back_activations_replace_each_other() {
    let fakes = Fakes::new(vec![DhcpBehavior::Hang], vec![]);
    let config = TimeoutConfig::new().with_cancel_poll_interval(Duration::from_millis(1));
    let manager = DeviceManager::with_config(fakes.providers(), config);
    manager
        .add_device(DeviceDescriptor::wired("eth0", FakeWired::new(true)))
        .await
        .unwrap();

    // The second call races the worker publishing the first one's stage.
    for round in 0..200 {
        for _ in 0..2 {
            let result = manager.activate("eth0", ActivationTarget::Wired).await;
            assert!(result.is_ok(), "round {round}: {result:?}");
        }
    }

    manager.shutdown().await;
    assert!(manager.devices().is_empty());
}

/// An encrypted network nothing in range answers for. Left alone, the
/// activation retries with shared key and then asks for a new key.
async fn unreachable_office(
    fakes: &Fakes,
) -> (
    DeviceManager,
    tokio::sync::broadcast::Receiver<DeviceEvent>,
    std::sync::Arc<FakeRadio>,
) {
    let radio = FakeRadio::new(vec![]);
    let (manager, events) = wireless_manager(fakes, radio.clone()).await;
    manager
        .activate(
            "wlan0",
            ActivationTarget::Essid {
                essid: "office".into(),
                key: Some(EncKey::hex("0123456789")),
            },
        )
        .await
        .unwrap();
    settle(Duration::from_millis(1500)).await;
    assert_eq!(manager.status("wlan0").unwrap().stage, Some(DeviceConfigure));
    assert_eq!(radio.with_state(|state| state.essid_writes.len()), 1);
    (manager, events, radio)
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_for_link() {
    let fakes = Fakes::new(vec![], vec![PromptBehavior::Hang]);
    let (manager, mut events, radio) = unreachable_office(&fakes).await;

    manager.cancel_activation("wlan0").await.unwrap();
    assert_eq!(manager.status("wlan0").unwrap().stage, Some(Cancelled));

    // Nothing runs on after the cancel
    settle(Duration::from_secs(60)).await;
    assert_eq!(
        stages(&drain(&mut events), "wlan0"),
        vec![DevicePrepare, DeviceConfigure, Cancelled]
    );
    assert_eq!(radio.with_state(|state| state.essid_writes.len()), 1);
    assert!(fakes.prompter.requests.lock().unwrap().is_empty());
    assert!(!manager.history().is_blacklisted("office"));
}

#[tokio::test(start_paused = true)]
async fn test_removing_a_device_cancels_its_activation() {
    let fakes = Fakes::new(vec![], vec![PromptBehavior::Hang]);
    let (manager, mut events, radio) = unreachable_office(&fakes).await;

    manager.remove_device("wlan0").await.unwrap();

    let events = drain(&mut events);
    assert_eq!(
        stages(&events, "wlan0"),
        vec![DevicePrepare, DeviceConfigure, Cancelled]
    );
    assert!(events.contains(&DeviceEvent::DeviceRemoved {
        iface: "wlan0".into(),
    }));
    assert_eq!(radio.with_state(|state| state.essid_writes.len()), 1);
    assert!(fakes.prompter.requests.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deactivate_clears_addressing() {
    let radio = FakeRadio::new(vec![FakeNetwork::open("home", HOME_ADDR, 2.437)]);
    radio.set_scan_buffer(sighting(ScanBuffer::new(), HOME_ADDR, "home", 2437, 80).build());
    let fakes = Fakes::new(vec![DhcpBehavior::Bind(home_lease())], vec![]);
    let (manager, _events) = wireless_manager(&fakes, radio.clone()).await;
    manager.request_scan("wlan0").await.unwrap();
    manager
        .activate("wlan0", ActivationTarget::Best)
        .await
        .unwrap();
    settle(Duration::from_secs(30)).await;

    manager.deactivate("wlan0").await.unwrap();

    let status = manager.status("wlan0").unwrap();
    assert_eq!(status.ip4_address, None);
    assert_eq!(status.stage, None);
    assert_eq!(manager.signal_strength("wlan0").unwrap(), None);
    assert_eq!(
        fakes.installer.flushes.lock().unwrap().as_slice(),
        ["wlan0".to_string()]
    );
    radio.with_state(|state| {
        assert_eq!(state.essid, "");
        assert_eq!(state.mode, NetworkMode::Infrastructure);
    });
}

#[tokio::test(start_paused = true)]
async fn test_create_adhoc_network_uses_free_channel() {
    let radio = FakeRadio::new(vec![]);
    radio.set_scan_buffer(sighting(ScanBuffer::new(), HOME_ADDR, "home", 2412, 80).build());
    let fakes = Fakes::new(vec![DhcpBehavior::Hang], vec![]);
    let (manager, mut events) = wireless_manager(&fakes, radio.clone()).await;
    manager.request_scan("wlan0").await.unwrap();

    manager
        .activate(
            "wlan0",
            ActivationTarget::CreateAdHoc {
                essid: "party".into(),
                key: None,
            },
        )
        .await
        .unwrap();
    settle(Duration::from_secs(30)).await;

    let status = manager.status("wlan0").unwrap();
    assert_eq!(status.stage, Some(Activated));
    assert_eq!(status.ip4_address, Some(link_local().address));
    assert_eq!(stages(&drain(&mut events), "wlan0"), FULL_RUN);
    assert_eq!(*fakes.dhcp.started.lock().unwrap(), 0);

    radio.with_state(|state| {
        assert_eq!(state.mode, NetworkMode::AdHoc);
        assert!((state.frequency - 2.437).abs() < 1e-9);
        assert_eq!(state.bitrate, 11000);
        assert_eq!(state.essid, "party");
    });
    // Failing or not, a network the user created is never blacklisted
    assert!(!manager.history().is_blacklisted("party"));
}

#[tokio::test(start_paused = true)]
async fn test_unencrypted_network_without_link_fails() {
    // The scan sees the AP but the card never associates with it.
    let radio = FakeRadio::new(vec![]);
    radio.set_scan_buffer(sighting(ScanBuffer::new(), CAFE_ADDR, "cafe", 2462, 40).build());
    let fakes = Fakes::new(vec![DhcpBehavior::Bind(home_lease())], vec![]);
    let (manager, mut events) = wireless_manager(&fakes, radio).await;
    manager.request_scan("wlan0").await.unwrap();

    manager
        .activate(
            "wlan0",
            ActivationTarget::Essid {
                essid: "cafe".into(),
                key: None,
            },
        )
        .await
        .unwrap();
    settle(Duration::from_secs(60)).await;

    assert_eq!(manager.status("wlan0").unwrap().stage, Some(Failed));
    assert_eq!(
        stages(&drain(&mut events), "wlan0"),
        vec![DevicePrepare, DeviceConfigure, Failed]
    );
    assert!(manager.history().is_blacklisted("cafe"));
}

#[tokio::test(start_paused = true)]
async fn test_carrier_change_reported_on_probe() {
    let fakes = Fakes::new(vec![], vec![]);
    let wired = FakeWired::new(false);
    let manager = DeviceManager::new(fakes.providers());
    let mut events = manager.subscribe();
    manager
        .add_device(DeviceDescriptor::wired("eth0", wired.clone()))
        .await
        .unwrap();
    assert!(!manager.probe_link("eth0").await.unwrap());

    *wired.carrier.lock().unwrap() = true;
    assert!(manager.probe_link("eth0").await.unwrap());
    assert!(manager.status("eth0").unwrap().link_active);

    let links: Vec<DeviceEvent> = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, DeviceEvent::LinkChanged { .. }))
        .collect();
    assert_eq!(
        links,
        vec![DeviceEvent::LinkChanged {
            iface: "eth0".into(),
            active: true,
        }]
    );
}
