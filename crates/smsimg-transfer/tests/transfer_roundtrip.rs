//! Integration test: full transfer over the loopback transport
//!
//! Compress → fragment → encrypt → transmit → decrypt → reassemble with an
//! in-memory key backend and artifact store, so no keychain or disk is
//! required.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use smsimg_core::config::SmsimgConfig;
use smsimg_core::{Caveat, FailureKind, TransferState};
use smsimg_secrets::{KeyStore, MemoryBackend};
use smsimg_transfer::{ArtifactStore, LoopbackTransport, TransferEvent, TransferPipeline};
use tokio_util::sync::CancellationToken;

fn png_bytes(img: RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

fn solid_png(size: u32) -> Vec<u8> {
    png_bytes(RgbImage::from_pixel(size, size, Rgb([40, 120, 200])))
}

/// Deterministic high-entropy image that JPEG cannot squeeze much.
fn noise_png(size: u32) -> Vec<u8> {
    let mut state = 0x2545_F491_4F6C_DD1Du64;
    let img = RgbImage::from_fn(size, size, |_, _| {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let b = state.to_le_bytes();
        Rgb([b[0], b[1], b[2]])
    });
    png_bytes(img)
}

fn keystore(backend: &MemoryBackend) -> Arc<KeyStore> {
    Arc::new(KeyStore::new(
        Arc::new(backend.clone()),
        "smsimg-encryption-key",
    ))
}

fn pipeline(config: &SmsimgConfig) -> TransferPipeline {
    TransferPipeline::new(
        keystore(&MemoryBackend::default()),
        ArtifactStore::memory("jpg").unwrap(),
        config,
    )
}

#[tokio::test]
async fn roundtrip_solid_image_reproduces_compressed_bytes() {
    let config = SmsimgConfig::default();
    let source = solid_png(2000);
    let expected = smsimg_codec::compress_to_budget(&source, &config.compress)
        .unwrap()
        .payload
        .decode()
        .unwrap();

    let p = pipeline(&config);
    let report = p
        .send_bytes(source, LoopbackTransport::new())
        .await
        .expect("transfer should succeed");

    assert!(report.compressed_size <= 5500);
    assert_eq!(report.width, 128);
    assert_eq!(report.fragments, report.payload_len.div_ceil(110));
    assert!(report.caveats.is_empty(), "{:?}", report.caveats);

    let written = p.store().read(&report.artifact.name).await.unwrap();
    assert_eq!(written, expected, "reconstructed bytes must match compressed bytes");
    assert_eq!(report.artifact.bytes, expected.len());
}

#[tokio::test]
async fn stages_are_entered_in_order() {
    let config = SmsimgConfig::default();
    let report = pipeline(&config)
        .send_bytes(solid_png(300), LoopbackTransport::new())
        .await
        .unwrap();

    let n = report.fragments;
    let mut expected = vec![
        TransferState::Idle,
        TransferState::Compressing,
        TransferState::Encrypting,
    ];
    expected.extend((0..=n).map(|sent| TransferState::Transmitting { sent, total: n }));
    expected.push(TransferState::Reconstructing);
    expected.push(TransferState::Done);
    assert_eq!(report.stages, expected);
}

#[tokio::test]
async fn observer_sees_every_fragment() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    let config = SmsimgConfig::default();
    let report = pipeline(&config)
        .with_observer(Box::new(move |e| sink.lock().unwrap().push(e.clone())))
        .send_bytes(solid_png(500), LoopbackTransport::new())
        .await
        .unwrap();

    let events = events.lock().unwrap();
    let sent = events
        .iter()
        .filter(|e| matches!(e, TransferEvent::FragmentSent { .. }))
        .count();
    let received = events
        .iter()
        .filter(|e| matches!(e, TransferEvent::FragmentReceived { .. }))
        .count();
    assert_eq!(sent, report.fragments);
    assert_eq!(received, report.fragments);

    // The loopback echoes every send, so each fragment is seen sent then received.
    let pattern: String = events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::FragmentSent { .. } => Some('S'),
            TransferEvent::FragmentReceived { .. } => Some('R'),
            _ => None,
        })
        .collect();
    assert_eq!(pattern, "SR".repeat(report.fragments));
    let received_counts: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::FragmentReceived { received } => Some(*received),
            _ => None,
        })
        .collect();
    assert_eq!(received_counts, (1..=report.fragments).collect::<Vec<_>>());
    assert_eq!(
        events.first(),
        Some(&TransferEvent::Stage(TransferState::Compressing))
    );
    assert_eq!(events.last(), Some(&TransferEvent::Stage(TransferState::Done)));
}

#[tokio::test]
async fn sequential_mode_matches_parallel() {
    let mut config = SmsimgConfig::default();
    config.fragments.parallel = false;
    let source = solid_png(800);
    let expected = smsimg_codec::compress_to_budget(&source, &config.compress)
        .unwrap()
        .payload
        .decode()
        .unwrap();

    let p = pipeline(&config);
    let report = p.send_bytes(source, LoopbackTransport::new()).await.unwrap();
    assert_eq!(p.store().read(&report.artifact.name).await.unwrap(), expected);
}

#[tokio::test]
async fn unreachable_budget_still_delivers() {
    let mut config = SmsimgConfig::default();
    config.compress.target_bytes = 100;
    config.fragments.max_fragments = 1;

    let report = pipeline(&config)
        .send_bytes(noise_png(256), LoopbackTransport::new())
        .await
        .expect("budget miss is not a failure");

    assert!(report.compressed_size > 100);
    assert_eq!(report.width, 64);
    assert!(report.caveats.iter().any(|c| matches!(
        c,
        Caveat::BudgetExceeded { target: 100, .. }
    )));
    assert!(report
        .caveats
        .iter()
        .any(|c| matches!(c, Caveat::TooManyFragments { max: 1, .. })));
}

#[tokio::test]
async fn undecodable_source_fails_in_compressing() {
    let config = SmsimgConfig::default();
    let failure = pipeline(&config)
        .send_bytes(b"definitely not an image".to_vec(), LoopbackTransport::new())
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::DecodeFault);
    assert_eq!(failure.stage, TransferState::Compressing);
}

#[tokio::test]
async fn missing_source_file_is_decode_fault() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let config = SmsimgConfig::default();
    let failure = pipeline(&config)
        .with_observer(Box::new(move |e| sink.lock().unwrap().push(e.clone())))
        .send_file(
            std::path::Path::new("/nonexistent/smsimg/photo.png"),
            LoopbackTransport::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::DecodeFault);
    assert_eq!(failure.stage, TransferState::Compressing);
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            TransferEvent::Stage(TransferState::Compressing),
            TransferEvent::Stage(TransferState::Failed(FailureKind::DecodeFault)),
        ]
    );
}

#[tokio::test]
async fn send_file_reads_from_disk() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("photo.png");
    std::fs::write(&path, solid_png(400)).unwrap();

    let out_dir = tmp.path().join("out");
    let p = TransferPipeline::new(
        keystore(&MemoryBackend::default()),
        ArtifactStore::fs(&out_dir, "jpg").unwrap(),
        &SmsimgConfig::default(),
    );
    let report = p.send_file(&path, LoopbackTransport::new()).await.unwrap();

    let written = report.artifact.path.expect("fs store reports a path");
    assert!(written.starts_with(&out_dir));
    let decoded = image::load_from_memory(&std::fs::read(written).unwrap()).unwrap();
    assert_eq!(decoded.width(), 128);
}

#[tokio::test]
async fn key_write_fault_yields_ephemeral_caveat() {
    let backend = MemoryBackend::default();
    backend.fail_writes(true);
    let p = TransferPipeline::new(
        keystore(&backend),
        ArtifactStore::memory("jpg").unwrap(),
        &SmsimgConfig::default(),
    );

    let report = p
        .send_bytes(solid_png(200), LoopbackTransport::new())
        .await
        .unwrap();
    assert!(report.caveats.contains(&Caveat::EphemeralKey));
}

#[tokio::test]
async fn key_is_shared_across_transfers_and_restarts() {
    let backend = MemoryBackend::default();
    let config = SmsimgConfig::default();

    let first = TransferPipeline::new(
        keystore(&backend),
        ArtifactStore::memory("jpg").unwrap(),
        &config,
    );
    let a = first
        .send_bytes(solid_png(200), LoopbackTransport::new())
        .await
        .unwrap();
    let b = first
        .send_bytes(solid_png(210), LoopbackTransport::new())
        .await
        .unwrap();

    // New pipeline and keystore over the same backend: a process restart.
    let restarted = TransferPipeline::new(
        keystore(&backend),
        ArtifactStore::memory("jpg").unwrap(),
        &config,
    );
    let c = restarted
        .send_bytes(solid_png(220), LoopbackTransport::new())
        .await
        .unwrap();

    assert_eq!(a.key_fingerprint, b.key_fingerprint);
    assert_eq!(a.key_fingerprint, c.key_fingerprint);
    assert_eq!(backend.write_count(), 1);
}

#[tokio::test]
async fn artifact_write_fault_fails_in_reconstructing() {
    let tmp = tempfile::TempDir::new().unwrap();
    let out_dir = tmp.path().join("out");
    let store = ArtifactStore::fs(&out_dir, "jpg").unwrap();
    std::fs::remove_dir_all(&out_dir).ok();
    std::fs::write(&out_dir, b"in the way").unwrap();

    let p = TransferPipeline::new(
        keystore(&MemoryBackend::default()),
        store,
        &SmsimgConfig::default(),
    );
    let failure = p
        .send_bytes(solid_png(200), LoopbackTransport::new())
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::StorageFault);
    assert_eq!(failure.stage, TransferState::Reconstructing);
}

#[tokio::test]
async fn pre_cancelled_transfer_does_nothing() {
    let token = CancellationToken::new();
    token.cancel();
    let failure = pipeline(&SmsimgConfig::default())
        .with_cancellation(token)
        .send_bytes(solid_png(200), LoopbackTransport::new())
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert_eq!(failure.stage, TransferState::Idle);
}

#[tokio::test]
async fn cancel_during_transmission() {
    let token = CancellationToken::new();
    let trigger = token.clone();

    let failure = pipeline(&SmsimgConfig::default())
        .with_cancellation(token)
        .with_observer(Box::new(move |e| {
            if matches!(e, TransferEvent::FragmentSent { index: 0, .. }) {
                trigger.cancel();
            }
        }))
        .send_bytes(solid_png(600), LoopbackTransport::new())
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert!(matches!(
        failure.stage,
        TransferState::Transmitting { sent: 1, .. }
    ));
}
