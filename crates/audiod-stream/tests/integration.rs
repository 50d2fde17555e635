use audiod_core::{
    DeviceDescriptor, DeviceRole, DeviceType, ProcessConfig, SampleFormat, SessionEvent,
    StreamError, StreamInfo, StreamIntent, StreamUsage,
};
use audiod_device::{AdapterAttr, AdapterRegistry};
use audiod_stream::{Endpoint, SessionState, StreamService};
use std::sync::Arc;
use std::time::Duration;

fn mono_f32() -> StreamInfo {
    StreamInfo {
        sample_rate: 48000,
        channels: 1,
        format: SampleFormat::F32Le,
    }
}

fn music(span_frames: u32) -> ProcessConfig {
    ProcessConfig {
        intent: StreamIntent::Render(StreamUsage::Music),
        stream_info: mono_f32(),
        client_uid: 1000,
        total_size_frames: span_frames * 8,
        span_size_frames: span_frames,
    }
}

fn speaker() -> DeviceDescriptor {
    DeviceDescriptor::new(DeviceType::Speaker, DeviceRole::Output).with_timestamp(10)
}

fn samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[test]
fn test_client_frames_reach_loopback_monitor() {
    let service = Arc::new(StreamService::new());
    let registry = AdapterRegistry::new();
    let mut sink = registry
        .open_sink("loopback", &AdapterAttr::new(speaker(), mono_f32()))
        .unwrap();
    let mut monitor = sink.take_monitor().unwrap();
    monitor.start().unwrap();

    let session = service.create_session(music(64)).unwrap();
    let handle = session.resolve_buffer().unwrap();
    // Client claims the buffer it will write into.
    let client_side = service.claim_buffer(handle.id).unwrap();
    session.bind_device(speaker()).unwrap();
    session.start().unwrap();

    let signal: Vec<f32> = (0..64).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
    let frame: Vec<u8> = signal.iter().flat_map(|s| s.to_le_bytes()).collect();
    client_side.write(&frame, 2_000).unwrap();

    let endpoint = Endpoint::new(speaker(), mono_f32(), 64, Arc::clone(&service), sink).unwrap();
    let handle = endpoint.start(Duration::from_millis(1)).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(handle.stop().is_some());

    let mut out = vec![0u8; frame.len()];
    monitor.capture_frame(&mut out).unwrap();
    for (a, b) in samples(&out).iter().zip(signal.iter()) {
        assert!((a - b).abs() < 1e-6);
    }
    assert_eq!(session.handle_info().unwrap().last_timestamp_ns, 2_000);
}

#[test]
fn test_pending_start_survives_until_device_bound() {
    let service = StreamService::new();
    let session = service.create_session(music(16)).unwrap();
    session.resolve_buffer().unwrap();

    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Prepared);
    assert!(service.running_sessions().is_empty());

    // Data written while parked stays buffered.
    session.write_frame(&[0u8; 64], 0).unwrap();
    session.bind_device(speaker()).unwrap();
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.buffer().readable_spans(), 1);
}

#[test]
fn test_ring_fills_then_rejects_without_moving_cursors() {
    let service = StreamService::new();
    let session = service.create_session(music(16)).unwrap();
    session.resolve_buffer().unwrap();
    for _ in 0..8 {
        session.write_frame(&[1u8; 64], 0).unwrap();
    }
    let before = session.buffer().read_write_position();
    assert_eq!(session.write_frame(&[1u8; 64], 0), Err(StreamError::BufferFull));
    assert_eq!(session.buffer().read_write_position(), before);
    assert_eq!(session.position().overruns, 1);
}

#[tokio::test]
async fn test_invalidated_session_reported_and_reaped() {
    let service = StreamService::new();
    let mut events = service.take_events().unwrap();
    let session = service.create_session(music(16)).unwrap();
    session.resolve_buffer().unwrap();

    session.invalidate("peer died");
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        event,
        SessionEvent::Invalidated { session_id, .. } if session_id == session.id()
    ));
    assert!(session.start().is_err());
    assert_eq!(service.reap(), 1);
    assert!(service.is_empty());
}
