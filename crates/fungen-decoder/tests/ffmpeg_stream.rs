#![cfg(feature = "backend-ffmpeg")]

use std::env;
use std::path::PathBuf;

use fungen_decoder::{Backend, Configuration};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread")]
async fn ffmpeg_backend_streams_window() {
    let asset = match env::var("FUNGEN_TEST_ASSET") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            eprintln!("skipping ffmpeg backend test - FUNGEN_TEST_ASSET not set");
            return;
        }
    };

    let config = Configuration {
        backend: Backend::Ffmpeg,
        input: Some(asset),
        ..Configuration::default()
    };
    let source = match config.create_provider() {
        Ok(source) => source,
        Err(err) => panic!("failed to initialize ffmpeg backend: {err:?}"),
    };

    let metadata = source.metadata();
    assert!(metadata.fps.is_some());

    let mut stream = source.stream_frames(10, 3, CancellationToken::new());
    let frame = stream
        .next()
        .await
        .expect("ffmpeg backend should produce at least one frame")
        .expect("frame decoding should succeed");
    assert!(frame.width() > 0);
    assert!(frame.frame_index().unwrap() >= 10);
}
