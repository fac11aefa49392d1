#![cfg(feature = "backend-mock")]

use fungen_decoder::{Backend, Configuration};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread")]
async fn mock_backend_streams_from_offset() {
    let config = Configuration {
        backend: Backend::Mock,
        ..Configuration::default()
    };
    let source = config.create_provider().expect("mock backend available");
    let metadata = source.metadata();
    assert_eq!(metadata.fps, Some(30.0));

    let mut stream = source.stream_frames(40, 5, CancellationToken::new());
    let mut frames = Vec::new();
    while let Some(frame) = stream.next().await {
        frames.push(frame.unwrap());
    }
    assert_eq!(frames.len(), 5);
    assert_eq!(frames[0].width(), 320);
    assert_eq!(frames[0].frame_index(), Some(40));
    assert_eq!(frames[4].frame_index(), Some(44));
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_stream_early_does_not_block() {
    let source = Configuration {
        backend: Backend::Mock,
        ..Configuration::default()
    }
    .create_provider()
    .unwrap();
    let mut stream = source.stream_frames(0, 300, CancellationToken::new());
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.frame_index(), Some(0));
    drop(stream);

    let again: Vec<_> = source
        .stream_frames(0, 2, CancellationToken::new())
        .collect()
        .await;
    assert_eq!(again.len(), 2);
}
