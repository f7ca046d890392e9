//! Router wired from a `ServeConfig`, as the binary builds it.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use eegscope::serve::ServeConfig;
use eegscope::web::router;
use std::time::Duration;
use tower::ServiceExt;

fn serve_config(root: &std::path::Path) -> ServeConfig {
    ServeConfig {
        addr: "127.0.0.1:0".to_string(),
        data_root: root.to_path_buf(),
        idle_threshold: Duration::from_secs(3600),
        sweep_interval: Duration::from_secs(600),
        montage: "standard_1020".to_string(),
        data_suffixes: vec!["data.bdf".to_string()],
        experiments: vec!["RSVP".to_string(), "MI".to_string()],
    }
}

#[tokio::test]
async fn test_dataset_is_browsable_and_loadable() {
    let temp_dir = tempfile::tempdir().unwrap();
    let experiments = vec!["RSVP".to_string(), "MI".to_string()];
    eegscope::synth::write_dataset(temp_dir.path(), &experiments, 2, 12.0).unwrap();
    let state = serve_config(temp_dir.path()).build_state();

    let response = router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/zcc/data_files.csv")
                .header(header::AUTHORIZATION, "Bearer researcher")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let csv = String::from_utf8(body.to_vec()).unwrap();
    assert_eq!(csv.lines().count(), 1 + 4);

    let response = router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/zcc/eegAnalysis.json?experimentName=MI&subjectID=MI/S02")
                .header(header::AUTHORIZATION, "Bearer researcher")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["stage"], "Ready");
    assert_eq!(json["experiment"], "MI");

    let session = state.registry.get_session("researcher").unwrap();
    assert_eq!(session.current_subject().as_deref(), Some("MI/S02"));
    assert!(state.failures.is_empty());
}
