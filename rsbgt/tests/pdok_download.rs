//! Runs against the live PDOK API: `cargo test -- --ignored`

use rsbgt::collect::pdok::{PdokCollect, PollState};
use rsbgt::config::BgtConfig;
use rsbgt::geometric::bgt::Bgt;
use rsbgt::geometric::bgt_layer::{GeometryFamily, OutputFormat};
use rsbgt::geometric::clip::ClipMode;
use rsbgt::BgtError;

fn config() -> BgtConfig {
    BgtConfig {
        poll_timeout_secs: Some(1200),
        ..BgtConfig::default()
    }
}

#[test]
#[ignore]
fn test_download_and_clip_pand() {
    let output = tempfile::tempdir().unwrap();
    let mut bgt = Bgt::new(
        Some(output.path().to_string_lossy().to_string()),
        config(),
    )
    .unwrap();
    bgt.set_bbox(136000.0, 455800.0, 136200.0, 456000.0, 28992);
    bgt.set_layers(&["pand"]);
    bgt.set_clip_mode(ClipMode::BoundingBox);
    bgt.set_buffer_distance(10.0);

    let bgt = bgt.run().unwrap();
    assert!(bgt.get_download_request_id().is_some());

    let pand = bgt.get_layer("pand").unwrap();
    assert!(!pand.is_empty());
    assert_eq!(pand.family, Some(GeometryFamily::Polygon));

    let written = bgt.to_files(OutputFormat::GeoJson).unwrap();
    assert!(written["pand"].exists());
}

#[test]
#[ignore]
fn test_submit_and_check_status() {
    let mut pdok = PdokCollect::new(&config()).unwrap();
    let id = pdok
        .submit(
            &["wegdeel".to_string()],
            "POLYGON ((136000 455800, 136100 455800, 136100 455900, 136000 455900, 136000 455800))",
        )
        .unwrap();
    match pdok.check_status(&id).unwrap() {
        PollState::Pending { .. } => {}
        PollState::Ready { download_href } => assert!(!download_href.is_empty()),
    }
}

#[test]
#[ignore]
fn test_rejected_request() {
    let mut pdok = PdokCollect::new(&config()).unwrap();
    let err = pdok
        .submit(&["wegdeel".to_string()], "POLYGON ((0 0, 1 0, 0 0))")
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BgtError>(),
        Some(BgtError::RequestRejected { .. })
    ));
}
