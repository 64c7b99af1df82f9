//! Voice job tests with stubbed transcoders and speech models.
//!
//! Run with: `cargo test -p palaver-media --test pipeline`

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};

use palaver_core::types::MediaAttachment;
use palaver_media::download::HttpDownloader;
use palaver_media::transcode::Transcoder;
use palaver_media::{AudioIngestPipeline, FailureKind, IngestOutcome, Recognizer, SpeechModel};

/// Ignores its input and writes a synthetic WAV with the given header.
struct WavTranscoder {
    spec: WavSpec,
    frames: usize,
}

#[async_trait]
impl Transcoder for WavTranscoder {
    async fn transcode(&self, _input: &Path, output: &Path) -> anyhow::Result<()> {
        let mut w = WavWriter::create(output, self.spec)?;
        for i in 0..self.frames * self.spec.channels as usize {
            w.write_sample((i % 64) as i16)?;
        }
        w.finalize()?;
        Ok(())
    }
}

struct BrokenTranscoder;

#[async_trait]
impl Transcoder for BrokenTranscoder {
    async fn transcode(&self, _input: &Path, output: &Path) -> anyhow::Result<()> {
        std::fs::write(output, b"partial")?;
        anyhow::bail!("Invalid data found when processing input")
    }
}

struct SlowTranscoder;

#[async_trait]
impl Transcoder for SlowTranscoder {
    async fn transcode(&self, _input: &Path, _output: &Path) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

/// Returns a fixed final result and records chunk sizes.
struct FixedModel {
    result: String,
    fed: Arc<Mutex<Vec<usize>>>,
}

impl FixedModel {
    fn new(result: &str) -> Arc<Self> {
        Arc::new(Self {
            result: result.into(),
            fed: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

struct FixedRecognizer {
    result: String,
    fed: Arc<Mutex<Vec<usize>>>,
}

impl Recognizer for FixedRecognizer {
    fn feed(&mut self, pcm: &[i16]) -> anyhow::Result<bool> {
        self.fed.lock().unwrap().push(pcm.len());
        Ok(false)
    }

    fn finalize(&mut self) -> anyhow::Result<String> {
        Ok(self.result.clone())
    }
}

impl SpeechModel for FixedModel {
    fn name(&self) -> &str {
        "fixed"
    }

    fn new_recognizer(&self, _sample_rate: u32) -> anyhow::Result<Box<dyn Recognizer>> {
        Ok(Box::new(FixedRecognizer {
            result: self.result.clone(),
            fed: self.fed.clone(),
        }))
    }
}

/// Takes `delay` per chunk and counts chunks fed.
struct SlowModel {
    delay: Duration,
    fed: Arc<AtomicUsize>,
}

struct SlowRecognizer {
    delay: Duration,
    fed: Arc<AtomicUsize>,
}

impl Recognizer for SlowRecognizer {
    fn feed(&mut self, _pcm: &[i16]) -> anyhow::Result<bool> {
        std::thread::sleep(self.delay);
        self.fed.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }

    fn finalize(&mut self) -> anyhow::Result<String> {
        Ok(r#"{"text": "too late"}"#.into())
    }
}

impl SpeechModel for SlowModel {
    fn name(&self) -> &str {
        "slow"
    }

    fn new_recognizer(&self, _sample_rate: u32) -> anyhow::Result<Box<dyn Recognizer>> {
        Ok(Box::new(SlowRecognizer {
            delay: self.delay,
            fed: self.fed.clone(),
        }))
    }
}

fn spec(channels: u16, sample_rate: u32) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn pipeline(
    dir: &Path,
    transcoder: impl Transcoder + 'static,
    model: Arc<dyn SpeechModel>,
) -> AudioIngestPipeline {
    AudioIngestPipeline::new(
        Arc::new(HttpDownloader::default()),
        Arc::new(transcoder),
        model,
        dir.join("voice"),
    )
}

fn voice() -> MediaAttachment {
    MediaAttachment::from_bytes(b"OggS fake opus payload".to_vec(), "audio/ogg")
}

fn assert_no_temp_files(pipeline: &AudioIngestPipeline) {
    let left: Vec<_> = std::fs::read_dir(pipeline.work_dir())
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    assert!(left.is_empty(), "temp files left behind: {left:?}");
}

fn failure_kind(outcome: &IngestOutcome) -> FailureKind {
    match outcome {
        IngestOutcome::Failure { kind, .. } => *kind,
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_recognized_text_and_chunking() {
    let dir = tempfile::tempdir().unwrap();
    let model = FixedModel::new(r#"{"text": "what is the weather"}"#);
    let p = pipeline(
        dir.path(),
        WavTranscoder {
            spec: spec(1, 16000),
            frames: 9000,
        },
        model.clone(),
    );

    let outcome = p.ingest("42", &voice()).await;
    assert_eq!(outcome, IngestOutcome::RecognizedText("what is the weather".into()));
    assert_eq!(*model.fed.lock().unwrap(), vec![4000, 4000, 1000]);
    assert_no_temp_files(&p);
}

#[tokio::test]
async fn test_stereo_rejected_before_recognition() {
    let dir = tempfile::tempdir().unwrap();
    let model = FixedModel::new(r#"{"text": "never"}"#);
    let p = pipeline(
        dir.path(),
        WavTranscoder {
            spec: spec(2, 16000),
            frames: 100,
        },
        model.clone(),
    );

    let outcome = p.ingest("42", &voice()).await;
    assert_eq!(failure_kind(&outcome), FailureKind::FormatValidation);
    assert!(model.fed.lock().unwrap().is_empty());
    assert_no_temp_files(&p);
}

#[tokio::test]
async fn test_unsupported_rate_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(
        dir.path(),
        WavTranscoder {
            spec: spec(1, 11025),
            frames: 100,
        },
        FixedModel::new(r#"{"text": "never"}"#),
    );
    let outcome = p.ingest("42", &voice()).await;
    assert_eq!(failure_kind(&outcome), FailureKind::FormatValidation);
    assert_no_temp_files(&p);
}

#[tokio::test]
async fn test_transcode_failure_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), BrokenTranscoder, FixedModel::new(r#"{"text": "x"}"#));
    let outcome = p.ingest("42", &voice()).await;
    assert_eq!(failure_kind(&outcome), FailureKind::Transcode);
    assert_no_temp_files(&p);
}

#[tokio::test]
async fn test_download_failure() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(
        dir.path(),
        WavTranscoder {
            spec: spec(1, 16000),
            frames: 10,
        },
        FixedModel::new(r#"{"text": "x"}"#),
    );
    let empty = MediaAttachment::from_bytes(Vec::new(), "audio/ogg");
    let outcome = p.ingest("42", &empty).await;
    assert_eq!(failure_kind(&outcome), FailureKind::Transport);
    assert!(failure_kind(&outcome).is_transient());
    assert_no_temp_files(&p);
}

#[tokio::test]
async fn test_silence_is_not_recognized() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(
        dir.path(),
        WavTranscoder {
            spec: spec(1, 8000),
            frames: 4000,
        },
        FixedModel::new(r#"{"text": ""}"#),
    );
    let outcome = p.ingest("42", &voice()).await;
    assert_eq!(failure_kind(&outcome), FailureKind::NotRecognized);
    assert_no_temp_files(&p);
}

#[tokio::test]
async fn test_garbled_result_is_recognition_failure() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(
        dir.path(),
        WavTranscoder {
            spec: spec(1, 48000),
            frames: 4800,
        },
        FixedModel::new("{partial"),
    );
    let outcome = p.ingest("42", &voice()).await;
    assert_eq!(failure_kind(&outcome), FailureKind::Recognition);
    assert_no_temp_files(&p);
}

#[tokio::test]
async fn test_timeout_reports_transient_failure() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), SlowTranscoder, FixedModel::new(r#"{"text": "x"}"#))
        .with_timeout(Duration::from_millis(200));
    let outcome = p.ingest("42", &voice()).await;
    assert_eq!(failure_kind(&outcome), FailureKind::Timeout);
    assert!(failure_kind(&outcome).is_transient());
    assert_no_temp_files(&p);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_during_recognition_stops_feeding() {
    let dir = tempfile::tempdir().unwrap();
    let fed = Arc::new(AtomicUsize::new(0));
    let model = Arc::new(SlowModel {
        delay: Duration::from_millis(50),
        fed: fed.clone(),
    });
    // 100 chunks at 50ms each would take 5s.
    let p = pipeline(
        dir.path(),
        WavTranscoder {
            spec: spec(1, 16000),
            frames: 100 * 400,
        },
        model,
    )
    .with_chunk_frames(400)
    .with_timeout(Duration::from_millis(300));

    let outcome = p.ingest("42", &voice()).await;
    assert_eq!(failure_kind(&outcome), FailureKind::Timeout);
    assert_no_temp_files(&p);

    let at_timeout = fed.load(Ordering::SeqCst);
    assert!(at_timeout > 0, "recognition never started");
    assert!(at_timeout < 100);

    // At most the chunk in flight when the job was cancelled completes.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let after = fed.load(Ordering::SeqCst);
    assert!(after <= at_timeout + 1, "fed {at_timeout} then {after} after cancel");
    assert_no_temp_files(&p);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_jobs_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let p = Arc::new(pipeline(
        dir.path(),
        WavTranscoder {
            spec: spec(1, 16000),
            frames: 8000,
        },
        FixedModel::new(r#"{"text": "hello"}"#),
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let p = p.clone();
        handles.push(tokio::spawn(async move {
            let user = if i % 2 == 0 { "same-user" } else { "other" };
            p.ingest(user, &voice()).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().text(), Some("hello"));
    }
    assert_no_temp_files(&p);
}
