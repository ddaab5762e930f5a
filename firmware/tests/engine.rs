//! Whole-engine behaviour: scan loop, weight task and main loop together.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Frame, Harness, MemorySettings};
use spoolscale_firmware::nfc::layout::TagFamily;
use spoolscale_firmware::nfc::sim::SimTag;
use spoolscale_firmware::scale::sim::SIM_COUNTS_PER_GRAM;
use spoolscale_firmware::{EngineConfig, ReaderState, TagError};
use tokio::time::sleep;

const SPOOL_JSON: &str = r#"{"sm_id":"42","name":"PLA Galaxy Black"}"#;

fn spool_tag() -> SimTag {
    SimTag::new(TagFamily::T215).with_json(SPOOL_JSON).unwrap()
}

async fn started(harness: &Harness) {
    harness.engine.start_tag_engine().await.unwrap();
    harness.engine.start_scale().await.unwrap();
    // boot tare
    sleep(Duration::from_secs(3)).await;
}

#[tokio::test(start_paused = true)]
async fn missing_reader_fails_boot() {
    let harness = Harness::calibrated();
    harness.tag.disconnect_reader();

    let err = harness.engine.start_tag_engine().await.unwrap_err();
    assert_eq!(err, TagError::ReaderNotFound);
    assert!(harness.display.shows_status("No RFID Board found"));
}

#[tokio::test(start_paused = true)]
async fn steady_weight_reported_once_per_tag() {
    let harness = Harness::calibrated();
    started(&harness).await;

    harness.load.set_load(812.0);
    harness.tag.place(spool_tag());
    assert!(
        harness
            .wait_for_state(ReaderState::ReadSuccess, Duration::from_secs(5))
            .await
    );

    sleep(Duration::from_secs(8)).await;
    let reports = harness.database.weights();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, "42");
    assert!((reports[0].1 - 812).abs() <= 1, "reported {}", reports[0].1);
    assert!(harness.engine.snapshot().tag_processed);

    sleep(Duration::from_secs(20)).await;
    assert_eq!(harness.database.weights().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn removed_tag_ends_session() {
    let harness = Harness::calibrated();
    started(&harness).await;

    harness.tag.place(spool_tag());
    assert!(
        harness
            .wait_for_state(ReaderState::ReadSuccess, Duration::from_secs(5))
            .await
    );
    assert_eq!(harness.engine.snapshot().active_spool_id, "42");

    harness.tag.remove();
    assert!(
        harness
            .wait_for_state(ReaderState::Idle, Duration::from_secs(5))
            .await
    );
    assert!(harness.engine.snapshot().active_spool_id.is_empty());
    assert!(harness.database.weights().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_report_shows_failure_icon() {
    let harness = Harness::calibrated();
    started(&harness).await;
    harness.database.reject_all();

    harness.load.set_load(640.0);
    harness.tag.place(spool_tag());
    sleep(Duration::from_secs(12)).await;

    assert_eq!(harness.database.weights().len(), 1);
    assert!(
        harness
            .display
            .frames()
            .contains(&Frame::Icon("failed".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn tare_request_zeroes_platform() {
    let harness = Harness::calibrated();
    started(&harness).await;

    harness.load.set_load(300.0);
    sleep(Duration::from_secs(3)).await;
    assert_eq!(harness.engine.displayed_weight(), 300);

    harness.engine.request_tare();
    sleep(Duration::from_secs(4)).await;
    assert_eq!(harness.engine.displayed_weight(), 0);
    assert_eq!(harness.engine.current_weight(), 0);
    assert!(harness.display.shows_message("TARE Scale"));
    assert_eq!(harness.display.last_weight(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn calibration_suspends_scan_and_resumes() {
    let harness = Harness::new(EngineConfig::default(), MemorySettings::default());
    started(&harness).await;
    assert!(!harness.engine.is_calibrated());
    assert!(harness.display.shows_message("Scale not calibrated"));

    let calibration = tokio::spawn({
        let engine = Arc::clone(&harness.engine);
        async move { engine.calibrate().await }
    });
    sleep(Duration::from_secs(1)).await;
    harness.tag.place(spool_tag());
    sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.engine.snapshot().state, ReaderState::Idle);
    assert_eq!(harness.tag.reads(), 0);

    // "Place the weight" step
    sleep(Duration::from_secs(4)).await;
    harness.load.set_load(500.0);

    let factor = calibration.await.unwrap().unwrap();
    assert!((factor - SIM_COUNTS_PER_GRAM).abs() < 0.01);
    assert!(harness.engine.is_calibrated());
    assert_eq!(*harness.settings.calibration.lock().unwrap(), Some(factor));

    assert!(
        harness
            .wait_for_state(ReaderState::ReadSuccess, Duration::from_secs(5))
            .await
    );
    assert!(harness.engine.watchdog().starved().is_empty());
}

#[tokio::test(start_paused = true)]
async fn auto_tare_preference_persists() {
    let harness = Harness::calibrated();
    harness.engine.set_auto_tare(false).await.unwrap();
    assert!(!harness.engine.auto_tare_enabled());
    assert_eq!(*harness.settings.auto_tare.lock().unwrap(), Some(false));
}

#[tokio::test(start_paused = true)]
async fn tasks_keep_watchdog_fed() {
    let harness = Harness::calibrated();
    started(&harness).await;
    harness.tag.place(spool_tag());
    sleep(Duration::from_secs(15)).await;
    assert!(harness.engine.watchdog().starved().is_empty());
}
