//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use remo_gateway::config::VoiceConfig;
use remo_gateway::persona::{PersonaCatalog, PersonaSpeechBinding, VoiceParams};
use remo_gateway::voice::{
    SPOKEN_SYMBOLS, SpeechBackend, VoiceRenderer, clean_for_speech, extension_for, validate_wav,
};

mod common;
use common::{FakeSpeech, wav_bytes};

fn renderer_with(fake: FakeSpeech) -> VoiceRenderer {
    let backend: Arc<dyn SpeechBackend> = Arc::new(fake);
    VoiceRenderer::new(Some(backend), &VoiceConfig::default())
}

#[test]
fn test_clean_for_speech_reads_model_output_aloud() {
    let reply = "**Sure!** Check https://docs.rs/tokio for `spawn`...\n\n```rust\nfn main() {}\n```\nThat's 100% it!!!";
    assert_eq!(
        clean_for_speech(reply),
        "Sure! Check docs.rs slash tokio for spawn. That's 100 percent it!"
    );
}

#[test]
fn test_clean_for_speech_is_stable() {
    for (symbol, _) in SPOKEN_SYMBOLS {
        let text = format!("a {symbol}{symbol} b **c** ... ?? `d`");
        let once = clean_for_speech(&text);
        assert_eq!(clean_for_speech(&once), once);
        assert!(!once.contains(*symbol));
    }
}

#[test]
fn test_wav_validation() {
    let info = tokio_test::assert_ok!(validate_wav(&wav_bytes(22_050, 22_050)));
    assert_eq!(info.sample_rate, 22_050);
    assert_eq!(info.duration_ms(), 1000);

    tokio_test::assert_err!(validate_wav(&wav_bytes(16_000, 0)));
    tokio_test::assert_err!(validate_wav(b"RIFF????WAVE"));
}

#[test]
fn test_supported_upload_types() {
    assert_eq!(extension_for("audio/x-wav"), Some("wav"));
    assert_eq!(extension_for("audio/ogg; codecs=vorbis"), Some("ogg"));
    assert_eq!(extension_for("audio/flac"), Some("flac"));
    assert_eq!(extension_for("application/octet-stream"), None);
}

#[tokio::test]
async fn test_renderer_speaks_cleaned_text_with_configured_voice() {
    let fake = FakeSpeech::new(Duration::from_millis(10));
    let spoken = fake.spoken.clone();
    let renderer = renderer_with(fake);

    renderer.configure(VoiceParams {
        voice_id: "en-gb".to_string(),
        rate_wpm: 10_000,
        pitch: 60,
        gain: 105,
    });
    assert!(renderer.speak("Tea & *biscuits*", true).await);

    let spoken = spoken.lock().unwrap();
    assert_eq!(spoken.len(), 1);
    assert_eq!(spoken[0].0, "Tea and biscuits");
    assert_eq!(spoken[0].1.voice_id, "en-gb");
    assert_eq!(spoken[0].1.rate_wpm, *VoiceParams::RATE_RANGE.end());
}

#[tokio::test]
async fn test_new_speech_interrupts_the_previous_job() {
    let fake = FakeSpeech::new(Duration::from_secs(30));
    let started = fake.started.clone();
    let renderer = Arc::new(renderer_with(fake));

    let first = {
        let renderer = renderer.clone();
        tokio::spawn(async move { renderer.speak("first sentence", true).await })
    };
    while started.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(renderer.speak("second sentence", false).await);
    assert!(!first.await.unwrap());
    assert!(renderer.status().await.speaking);

    renderer.stop().await;
    assert!(!renderer.status().await.speaking);
}

#[tokio::test]
async fn test_disabled_renderer_refuses_speech() {
    let fake = FakeSpeech::new(Duration::from_millis(10));
    let started = fake.started.clone();
    let renderer = renderer_with(fake);

    renderer.disable().await;
    assert!(!renderer.speak("Hello", true).await);
    assert!(!renderer.speak("   ", true).await);
    assert_eq!(started.load(Ordering::SeqCst), 0);

    renderer.enable();
    assert!(!renderer.speak("   ", true).await);
    assert!(renderer.speak("Hello", true).await);
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_renderer_without_backend() {
    let renderer = VoiceRenderer::unavailable();

    assert!(!renderer.is_available());
    assert!(!renderer.speak("Hello", true).await);
    assert!(renderer.synthesize_wav("Hello", None).await.is_err());

    let status = renderer.status().await;
    assert!(!status.available);
    assert!(status.backend.is_none());
}

#[tokio::test]
async fn test_synthesized_audio_is_wav() {
    let renderer = renderer_with(FakeSpeech::new(Duration::ZERO));

    let audio = renderer.synthesize_wav("Hello there", None).await.unwrap();
    assert_eq!(validate_wav(&audio).unwrap().sample_rate, 16_000);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.wav");
    assert!(renderer.speak_to_file("Hello there", &path).await);
    assert!(validate_wav(&std::fs::read(&path).unwrap()).is_ok());
}

#[tokio::test]
async fn test_persona_switch_changes_voice() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = PersonaCatalog::open(dir.path().join("personas.yaml"));
    let renderer = Arc::new(renderer_with(FakeSpeech::new(Duration::ZERO)));
    let _binding = PersonaSpeechBinding::attach(&catalog, renderer.clone());

    assert_eq!(renderer.voice_params(), catalog.active().voice);

    assert!(catalog.set_active("professional"));
    assert_eq!(renderer.voice_params().voice_id, "en-us");
    assert_eq!(renderer.voice_params().rate_wpm, 160);

    assert!(!catalog.set_active("nobody"));
    assert_eq!(renderer.voice_params().voice_id, "en-us");
}
