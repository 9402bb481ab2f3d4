mod common;

use altmeter::orchestrator::{BulkOutcome, Caller};
use altmeter::quota::Remaining;
use altmeter::remote::Limits;
use altmeter::telemetry::MeterEvent;
use altmeter::{MeterConfig, RemoteError, RequestContext};
use common::test_helpers::*;

fn batch(size: usize) -> MeterConfig {
    MeterConfig { bulk_batch_size: size, ..MeterConfig::default() }
}

async fn run(h: &Harness) -> BulkOutcome {
    h.meter.scan_and_tag(&Caller::admin("1"), RequestContext::default()).await
}

#[tokio::test]
async fn stops_as_soon_as_quota_runs_out() {
    let account = FakeAccount::with_limits(8, Limits { current_limit: 10, plan: "free".into(), is_pro: false });
    let h = Harness::with_config(account, 5, batch(5)).await;

    let BulkOutcome::Completed(report) = run(&h).await else {
        panic!("expected a completed run");
    };
    assert_eq!(report.candidates, 5);
    assert_eq!(report.tagged(), 2);
    assert_eq!(report.remaining, Remaining::Limited(0));
    assert_eq!(report.message(), "Tagged 2 image(s).");
    assert_eq!(h.generator.calls(), 2);

    assert!(!h.media.alt_text(1).unwrap().is_empty());
    assert!(!h.media.alt_text(2).unwrap().is_empty());
    assert_eq!(h.media.alt_text(3).as_deref(), Some(""));
}

#[tokio::test]
async fn default_batch_is_two_images_per_call() {
    let h = Harness::new(FakeAccount::free(0), 5).await;

    let BulkOutcome::Completed(first) = run(&h).await else { panic!("first run") };
    assert_eq!(first.images.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2]);

    let BulkOutcome::Completed(second) = run(&h).await else { panic!("second run") };
    assert_eq!(second.images.iter().map(|i| i.id).collect::<Vec<_>>(), vec![3, 4]);
    assert_eq!(second.remaining, Remaining::Limited(11));
}

#[tokio::test]
async fn per_image_failures_are_skipped() {
    let h = Harness::with_config(FakeAccount::free(0), 3, batch(3)).await;
    h.generator.push(Err(transport_error()));
    h.generator.push(Ok(""));

    let BulkOutcome::Completed(report) = run(&h).await else { panic!("expected a completed run") };
    assert_eq!(report.candidates, 3);
    assert_eq!(report.images.len(), 1);
    assert_eq!(report.images[0].id, 3);
    assert_eq!(report.remaining, Remaining::Limited(14));

    let events = h.sink.events();
    assert!(events.iter().any(|e| matches!(e, MeterEvent::GenerationFailed { image_id: 1, bulk: true, .. })));
    assert!(events.iter().any(|e| matches!(e, MeterEvent::EmptyResult { image_id: 2, bulk: true })));
    assert!(events.iter().any(|e| matches!(e, MeterEvent::BulkCompleted { tagged: 1, candidates: 3 })));
}

#[tokio::test]
async fn unregistered_site_is_not_reregistered_in_bulk() {
    let h = Harness::new(FakeAccount::free(0), 2).await;
    h.generator.push(Err(RemoteError::SiteNotRegistered));

    let BulkOutcome::Completed(report) = run(&h).await else { panic!("expected a completed run") };
    assert_eq!(report.tagged(), 1);
    assert!(h.account.registrations.lock().unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_quota_denies_the_whole_run() {
    let h = Harness::new(FakeAccount::free(15), 2).await;
    let outcome = run(&h).await;
    let json = outcome.to_json();
    assert_eq!(json["limit_reached"], true);
    assert_eq!(json["remaining"], 0);
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn nothing_to_tag_still_succeeds() {
    let h = Harness::new(FakeAccount::free(0), 0).await;
    let json = run(&h).await.to_json();
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Tagged 0 image(s).");
    assert_eq!(json["images"], serde_json::json!([]));
}

#[tokio::test]
async fn report_lists_tagged_images() {
    let h = Harness::new(FakeAccount::free(0), 1).await;
    let json = run(&h).await.to_json();
    assert_eq!(json["images"][0]["id"], 1);
    assert_eq!(json["images"][0]["url"], format!("{SITE_URL}/uploads/photo-1.jpg"));
    assert_eq!(json["images"][0]["alt"], "A photo described by photo-1.jpg");
    assert_eq!(json["images"][0]["title"], "Photo 1");
    assert_eq!(json["remaining"], 14);
}

#[tokio::test]
async fn unauthorized_bulk_run_is_rejected() {
    let h = Harness::new(FakeAccount::free(0), 2).await;
    let json = h.meter.scan_and_tag(&Caller::new("5", false), RequestContext::default()).await.to_json();
    assert_eq!(json["code"], "unauthorized");
    assert_eq!(h.generator.calls(), 0);
}
