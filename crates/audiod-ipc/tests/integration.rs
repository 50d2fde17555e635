use audiod_core::{
    DeviceDescriptor, DeviceRole, DeviceType, IpcError, PrivacyClass, ProcessConfig,
    RoutingConfig, SessionNotification, SourceType, StatusCode, StreamInfo, StreamIntent,
    StreamUsage, VolumeConfig,
};
use audiod_device::{
    AdapterAttr, DeviceManager, LoopbackSink, RouterCenter, RouterRegistry, SinkAdapter,
};
use audiod_ipc::{
    serve_connection, AudioServer, Client, Dispatcher, Notification, ProcessClient, ServerParts,
    INTERFACE_DESCRIPTOR,
};
use audiod_policy::{Orchestrator, ParameterStore, VolumePolicy};
use audiod_stream::{CaptureEndpoint, SessionState, StreamService};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::DuplexStream;

struct Daemon {
    devices: Arc<DeviceManager>,
    orchestrator: Arc<Orchestrator>,
    streams: Arc<StreamService>,
    server: Arc<AudioServer>,
    dispatcher: Arc<Dispatcher<AudioServer>>,
    // Ring files live here until the daemon is dropped.
    _buffers: TempDir,
}

fn speaker() -> DeviceDescriptor {
    DeviceDescriptor::new(DeviceType::Speaker, DeviceRole::Output).with_timestamp(1)
}

fn mic() -> DeviceDescriptor {
    DeviceDescriptor::new(DeviceType::Mic, DeviceRole::Input).with_timestamp(2)
}

fn daemon() -> Daemon {
    let devices = Arc::new(DeviceManager::default());
    devices.on_device_connected(speaker());
    devices.on_device_connected(mic());
    let router = RouterCenter::new(
        Arc::clone(&devices),
        &RoutingConfig::default(),
        &RouterRegistry::new(),
    )
    .unwrap();
    let buffers = tempfile::tempdir().unwrap();
    let streams = Arc::new(StreamService::with_buffer_dir(buffers.path().to_path_buf()));
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(router)));
    let server = Arc::new(AudioServer::new(ServerParts {
        orchestrator: Arc::clone(&orchestrator),
        volume: Arc::new(VolumePolicy::new(
            &VolumeConfig::default(),
            Arc::clone(&streams),
        )),
        parameters: Arc::new(ParameterStore::default()),
        streams: Arc::clone(&streams),
    }));
    let dispatcher = Arc::new(Dispatcher::new(INTERFACE_DESCRIPTOR, Arc::clone(&server)));
    Daemon {
        devices,
        orchestrator,
        streams,
        server,
        dispatcher,
        _buffers: buffers,
    }
}

fn connect(
    d: &Daemon,
    conn: u64,
    token: &str,
) -> (
    Client<DuplexStream>,
    tokio::task::JoinHandle<Result<(), IpcError>>,
) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let task = tokio::spawn(serve_connection(
        server_io,
        conn,
        Arc::clone(&d.dispatcher),
    ));
    (Client::new(client_io, token), task)
}

fn music() -> ProcessConfig {
    ProcessConfig {
        intent: StreamIntent::Render(StreamUsage::Music),
        stream_info: StreamInfo::default(),
        client_uid: 1000,
        total_size_frames: 960,
        span_size_frames: 240,
    }
}

fn mic_capture() -> ProcessConfig {
    ProcessConfig {
        intent: StreamIntent::Capture(SourceType::Mic),
        ..music()
    }
}

async fn next_note(client: &mut ProcessClient<DuplexStream>) -> Notification {
    tokio::time::timeout(Duration::from_secs(2), client.next_notification())
        .await
        .expect("no notification")
        .unwrap()
}

#[tokio::test]
async fn test_client_renders_through_its_own_mapping() {
    let d = daemon();
    let (client, _task) = connect(&d, 1, INTERFACE_DESCRIPTOR);

    let mut stream = ProcessClient::create(client, music()).await.unwrap();
    assert_eq!(stream.device().device_type, DeviceType::Speaker);
    let handle = stream.handle();
    assert_eq!(handle.span_count, 4);
    // Resolving spent the handle; nobody else can claim the ring.
    assert!(d.streams.claim_buffer(handle.id).is_err());

    stream.start().await.unwrap();
    let span = vec![3u8; handle.span_size_bytes as usize];
    stream.write(&span, 10).unwrap();
    stream.write(&span, 20).unwrap();

    let info = stream.handle_info().await.unwrap();
    assert_eq!(info.handle, handle);
    assert_eq!(info.write_cursor, 2);
    assert_eq!(info.read_cursor, 0);

    // The daemon's side of the ring sees what the client mapping wrote.
    let session = d.streams.get(stream.session_id()).unwrap();
    let mut dest = vec![0u8; span.len()];
    let outcome = session.read_frame_into(&mut dest).unwrap();
    assert_eq!(outcome.bytes_read, span.len());
    assert_eq!(dest, span);
    assert_eq!(stream.handle_info().await.unwrap().read_cursor, 1);

    let outputs = stream
        .client()
        .get_devices(DeviceRole::Output, PrivacyClass::Public)
        .await
        .unwrap();
    assert_eq!(outputs.len(), 1);

    let id = stream.session_id();
    let ring_path = session.buffer().path().unwrap().to_path_buf();
    stream.stop().await.unwrap();
    let _client = stream.release().await.unwrap();
    assert!(session.buffer().is_released());
    assert!(d.streams.get(id).is_err());
    assert!(!ring_path.exists());
}

#[tokio::test]
async fn test_capture_endpoint_feeds_client_mapping() {
    let d = daemon();
    let (client, _task) = connect(&d, 1, INTERFACE_DESCRIPTOR);
    let mut stream = ProcessClient::create(client, mic_capture()).await.unwrap();
    assert_eq!(stream.device().device_type, DeviceType::Mic);
    stream.start().await.unwrap();

    let info = StreamInfo::default();
    let mut microphone = LoopbackSink::new();
    microphone.init(&AdapterAttr::new(mic(), info)).unwrap();
    microphone.start().unwrap();
    let mut source = microphone.take_monitor().unwrap();
    source.start().unwrap();
    let mut capture =
        CaptureEndpoint::new(mic(), info, 240, Arc::clone(&d.streams), source).unwrap();

    let span_bytes = stream.handle().span_size_bytes as usize;
    let spoken: Vec<u8> = (0..span_bytes).map(|i| (i % 251) as u8).collect();
    microphone.render_frame(&spoken).unwrap();
    assert_eq!(capture.capture_once().unwrap(), span_bytes);

    let mut heard = vec![0u8; span_bytes];
    let outcome = stream.read_into(&mut heard).unwrap();
    assert!(!outcome.underrun);
    assert_eq!(heard, spoken);
}

#[tokio::test]
async fn test_device_change_reaches_client() {
    let d = daemon();
    let (client, _task) = connect(&d, 1, INTERFACE_DESCRIPTOR);
    let mut stream = ProcessClient::create(client, music()).await.unwrap();
    assert!(d.server.is_linked(1));

    let headset = DeviceDescriptor::new(DeviceType::WiredHeadset, DeviceRole::Output)
        .with_timestamp(3);
    let change = d.devices.on_device_connected(headset);
    assert_eq!(d.orchestrator.handle_device_change(&change), 1);

    match next_note(&mut stream).await {
        Notification::Session(SessionNotification::DeviceChanged {
            session_id,
            previous,
            current,
        }) => {
            assert_eq!(session_id, stream.session_id());
            assert_eq!(previous.device_type, DeviceType::Speaker);
            assert_eq!(current.device_type, DeviceType::WiredHeadset);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(stream.device().device_type, DeviceType::WiredHeadset);
}

#[tokio::test]
async fn test_parameter_change_pushed_to_other_clients() {
    let d = daemon();
    let (listener, _listener_task) = connect(&d, 1, INTERFACE_DESCRIPTOR);
    let (mut setter, _setter_task) = connect(&d, 2, INTERFACE_DESCRIPTOR);
    let mut listener = ProcessClient::create(listener, music()).await.unwrap();

    setter.set_audio_parameter("A2dpSuspended", "1").await.unwrap();
    match next_note(&mut listener).await {
        Notification::Parameter(change) => {
            assert_eq!(change.key, "A2dpSuspended");
            assert_eq!(change.value, "1");
            assert!(change.network_id.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }
    // The setter's own connection is notified as well.
    assert!(matches!(
        tokio::time::timeout(Duration::from_secs(2), setter.next_notification())
            .await
            .expect("no notification")
            .unwrap(),
        Notification::Parameter(_)
    ));
}

#[tokio::test]
async fn test_ring_without_backing_file_is_refused() {
    let d = daemon();
    let plain = Arc::new(StreamService::new());
    let server = Arc::new(AudioServer::new(ServerParts {
        orchestrator: Arc::clone(&d.orchestrator),
        volume: Arc::new(VolumePolicy::new(&VolumeConfig::default(), Arc::clone(&plain))),
        parameters: Arc::new(ParameterStore::default()),
        streams: Arc::clone(&plain),
    }));
    let dispatcher = Arc::new(Dispatcher::new(INTERFACE_DESCRIPTOR, server));
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    tokio::spawn(serve_connection(server_io, 1, dispatcher));

    let client = Client::new(client_io, INTERFACE_DESCRIPTOR);
    let result = ProcessClient::create(client, music()).await;
    assert!(matches!(result, Err(IpcError::Buffer(_))));
    assert!(plain.is_empty());
}

#[tokio::test]
async fn test_wrong_interface_token_denied() {
    let d = daemon();
    let (mut client, _task) = connect(&d, 1, "someone.IElse");
    assert!(matches!(
        client.create_session(music()).await,
        Err(IpcError::Status(StatusCode::PermissionDenied))
    ));
    assert!(d.streams.is_empty());
}

#[tokio::test]
async fn test_peer_death_invalidates_only_its_sessions() {
    let d = daemon();
    let (mut alive, _alive_task) = connect(&d, 1, INTERFACE_DESCRIPTOR);
    let (mut dying, dying_task) = connect(&d, 2, INTERFACE_DESCRIPTOR);

    let (kept, _) = alive.create_session(music()).await.unwrap();
    let (lost, _) = dying.create_session(music()).await.unwrap();
    let (_, path) = dying.resolve_buffer(lost).await.unwrap();
    assert!(path.is_some());
    let lost_session = d.streams.get(lost).unwrap();

    drop(dying);
    tokio::time::timeout(Duration::from_secs(2), dying_task)
        .await
        .expect("connection task did not finish")
        .unwrap()
        .unwrap();

    assert_eq!(lost_session.state(), SessionState::Invalid);
    assert!(d.streams.get(lost).is_err());
    assert!(d.server.sessions_of(2).is_empty());

    alive.resolve_buffer(kept).await.unwrap();
    assert_eq!(d.streams.get(kept).unwrap().state(), SessionState::Prepared);
}

#[tokio::test]
async fn test_parameters_and_volume_over_socket() {
    let d = daemon();
    let (mut client, _task) = connect(&d, 1, INTERFACE_DESCRIPTOR);

    assert_eq!(client.get_audio_parameter("missing").await.unwrap(), "");
    client.set_audio_parameter("A2dpSuspended", "1").await.unwrap();
    assert_eq!(client.get_audio_parameter("A2dpSuspended").await.unwrap(), "1");

    client
        .set_stream_volume(audiod_core::AudioStreamType::Music, 0.25)
        .await
        .unwrap();
    assert_eq!(
        client
            .get_stream_volume(audiod_core::AudioStreamType::Music)
            .await
            .unwrap(),
        0.25
    );
    assert!(matches!(
        client
            .set_stream_volume(audiod_core::AudioStreamType::Music, -1.0)
            .await,
        Err(IpcError::Status(StatusCode::InvalidParam))
    ));
}
