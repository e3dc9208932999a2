mod common;

use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use common::{closed_port, part, solid_jpeg, AfterPayload, FakeCamera, RESPONSE_HEADERS};
use walksense::detect::CLASS_COUNT;
use walksense::{
    DetectError, DetectionTensor, Direction, DistanceBucket, GuideConfig, GuideEvent,
    ObstacleGuide, StubBackend,
};

const S: u32 = 64;
const WAIT: Duration = Duration::from_secs(10);

fn config_for(url: &str) -> GuideConfig {
    let mut config = GuideConfig::default();
    config.stream.apply_url(url).unwrap();
    config.detection.input_size = S;
    config
}

/// Three anchors, column by column:
/// a small chair on the left, a large stair on the right, and a confident
/// but tiny bird below the default threshold's objectness gate.
fn scene_tensor() -> DetectionTensor {
    let anchors = 3;
    let rows = 5 + CLASS_COUNT;
    let mut data = vec![0.0f32; rows * anchors];
    let mut set = |row: usize, anchor: usize, value: f32| data[row * anchors + anchor] = value;

    // chair: center x 0.15, 0.2 x 0.2, obj 0.9, class 4 at 0.8
    for (row, v) in [0.15, 0.5, 0.2, 0.2, 0.9].into_iter().enumerate() {
        set(row, 0, v);
    }
    set(5 + 4, 0, 0.8);

    // stair: center x 0.8, 0.4 x 0.9, obj 0.95, class 16 at 0.9
    for (row, v) in [0.8, 0.5, 0.4, 0.9, 0.95].into_iter().enumerate() {
        set(row, 1, v);
    }
    set(5 + 16, 1, 0.9);

    // bird: obj 0.5, class 1 at 1.0
    for (row, v) in [0.5, 0.5, 0.05, 0.05, 0.5].into_iter().enumerate() {
        set(row, 2, v);
    }
    set(5 + 1, 2, 1.0);

    DetectionTensor::new(data, CLASS_COUNT, anchors).unwrap()
}

fn wait_for(rx: &Receiver<GuideEvent>, expected: GuideEvent) {
    let deadline = Instant::now() + WAIT;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(event) if event == expected => return,
            Ok(_) => continue,
            Err(err) => panic!("never saw {:?}: {}", expected, err),
        }
    }
}

#[test]
fn streamed_frame_produces_guidance() {
    let mut payload = RESPONSE_HEADERS.to_vec();
    payload.extend(part(&solid_jpeg(96, 72, 120)));
    let camera = FakeCamera::spawn(payload, AfterPayload::Hold);

    let mut guide = ObstacleGuide::new(config_for(&camera.url())).unwrap();
    guide
        .load_model(Box::new(StubBackend::new(S, scene_tensor())))
        .unwrap();

    let (tx, rx) = mpsc::channel();
    guide.start_stream(Some(tx)).unwrap();
    wait_for(&rx, GuideEvent::StreamConnected);
    assert!(guide.is_streaming());

    let report = guide.detect_from_stream(None).unwrap().unwrap();
    assert_eq!(report.class_name, "stair");
    assert_eq!(report.direction, Direction::Right);
    // Clamped box covers about 35% of the frame.
    assert_eq!(report.distance, DistanceBucket::VeryClose);
    assert!((report.confidence - 0.855).abs() < 1e-5);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["class"], "stair");
    assert_eq!(json["distance"], "very close");
    assert_eq!(json["direction"], "right side");
    assert_eq!(report.phrase(), "stair, very close, right side");

    // Lower threshold lets the bird in, but the stair is still largest.
    let detections = guide
        .detections(&image::RgbImage::new(S, S), Some(0.3))
        .unwrap();
    assert_eq!(detections.len(), 3);
    assert_eq!(
        guide.detect_from_stream(Some(0.3)).unwrap().unwrap().class_name,
        "stair"
    );

    guide.stop_stream();
    assert!(!guide.is_streaming());
    assert!(matches!(
        guide.detect_from_stream(None),
        Err(DetectError::NoFrame)
    ));
    guide.stop_stream();

    camera.finish();
}

#[test]
fn stream_fault_reaches_the_host() {
    let url = format!("http://127.0.0.1:{}/stream", closed_port());
    let mut guide = ObstacleGuide::new(config_for(&url)).unwrap();

    let (tx, rx) = mpsc::channel();
    guide.start_stream(Some(tx)).unwrap();
    match rx.recv_timeout(WAIT).unwrap() {
        GuideEvent::StreamError(message) => assert!(message.starts_with("Stream error:")),
        other => panic!("expected a stream error, got {:?}", other),
    }

    let deadline = Instant::now() + WAIT;
    while guide.is_streaming() {
        assert!(Instant::now() < deadline, "session never ended");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!guide.frame_cache().has_frame());
}

#[test]
fn restart_replaces_the_running_session() {
    let mut payload = RESPONSE_HEADERS.to_vec();
    payload.extend(part(&solid_jpeg(24, 24, 2)));
    let camera = FakeCamera::spawn(payload, AfterPayload::Hold);

    let mut guide = ObstacleGuide::new(config_for(&camera.url())).unwrap();
    let (tx, rx) = mpsc::channel();
    guide.start_stream(Some(tx)).unwrap();
    wait_for(&rx, GuideEvent::StreamConnected);
    let frame = guide.frame_cache().snapshot().unwrap();
    assert_eq!((frame.width(), frame.height()), (24, 24));

    // The camera serves one connection; the replacement session never gets
    // a frame, so the cache must stay empty after the restart.
    guide.start_stream(None).unwrap();
    assert!(!guide.frame_cache().has_frame());

    // Returns only once the first connection was shut down.
    camera.finish();
    assert!(!guide.frame_cache().has_frame());
    guide.stop_stream();
}
