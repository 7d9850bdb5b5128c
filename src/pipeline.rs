//! Screenshot → transcript orchestration.
//! preprocess (blocking pool) → cache / OCR (scheduler slot) → noise filter →
//! cluster → classifier chain (blocking pool) → speaker resolve → assemble.
//! One image failing never affects its siblings in a batch.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::cancellation::RequestGuard;
use crate::error::PipelineError;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::ocr::{OcrProvider, OcrResultCache, RawTextLine};
use crate::preprocess::{self, ImageLimits, PreparedImage};
use crate::scheduler::BatchScheduler;
use crate::state_machine::{PipelineStage, StageTracker};
use crate::transcript::{
    assemble, BubbleClusterer, ClassifierChain, NoiseFilter, SpeakerMapping, Transcript,
};

pub const NO_TEXT_DETECTED: &str = "No text detected in image";

/// One uploaded image.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            content_type: None,
            file_name: None,
        }
    }
}

/// Per-image counters surfaced next to the transcript.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub raw_lines: usize,
    pub noise_dropped: usize,
    pub bubbles: usize,
    pub color_decisions: usize,
    pub position_decisions: usize,
    pub cache_hit: bool,
    pub resized: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ImageOutcome {
    pub transcript: Transcript,
    pub info: Option<String>,
    pub stats: PipelineStats,
}

pub struct OcrPipeline {
    provider: Arc<dyn OcrProvider>,
    scheduler: Arc<BatchScheduler>,
    cache: Arc<OcrResultCache>,
    metrics: Arc<MetricsRegistry>,
    limits: ImageLimits,
    noise: NoiseFilter,
    clusterer: BubbleClusterer,
}

impl OcrPipeline {
    pub fn new(
        provider: Arc<dyn OcrProvider>,
        scheduler: Arc<BatchScheduler>,
        cache: Arc<OcrResultCache>,
        metrics: Arc<MetricsRegistry>,
        limits: ImageLimits,
    ) -> Self {
        Self {
            provider,
            scheduler,
            cache,
            metrics,
            limits,
            noise: NoiseFilter::new(),
            clusterer: BubbleClusterer::default(),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Process every image of a request, results in upload order.
    pub async fn process_batch(
        &self,
        inputs: Vec<ImageInput>,
        chain: Arc<ClassifierChain>,
        mapping: &SpeakerMapping,
        guard: &RequestGuard,
    ) -> Vec<Result<ImageOutcome, PipelineError>> {
        self.scheduler
            .run_ordered(inputs, |(index, input)| {
                let stage = guard.stage(index);
                let chain = Arc::clone(&chain);
                let token = guard.token().clone();
                let span = info_span!("ocr_image", image_index = index);
                async move {
                    self.process_image(input, chain, mapping, &token, &stage)
                        .await
                }
                .instrument(span)
            })
            .await
    }

    /// Run one image through every stage, keeping `stage` up to date.
    pub async fn process_image(
        &self,
        input: ImageInput,
        chain: Arc<ClassifierChain>,
        mapping: &SpeakerMapping,
        cancel: &CancellationToken,
        stage: &StageTracker,
    ) -> Result<ImageOutcome, PipelineError> {
        let started = Instant::now();
        let total = self.metrics.span(metric_names::PIPELINE_TOTAL);

        let result = self.run_stages(input, chain, mapping, cancel, stage).await;
        total.finish();

        match &result {
            Ok(outcome) => {
                stage.advance(PipelineStage::Completed);
                info!(
                    messages = outcome.transcript.len(),
                    bubbles = outcome.stats.bubbles,
                    cache_hit = outcome.stats.cache_hit,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "ocr_image_completed"
                );
            }
            Err(PipelineError::Cancelled) => {
                stage.advance(PipelineStage::Cancelled);
                info!("ocr_image_cancelled");
            }
            Err(e) => {
                stage.advance(PipelineStage::Failed);
                warn!(kind = %e.kind(), error = %e, "ocr_image_failed");
            }
        }

        result.map(|mut outcome| {
            outcome.stats.elapsed_ms = started.elapsed().as_millis() as u64;
            outcome
        })
    }

    async fn run_stages(
        &self,
        input: ImageInput,
        chain: Arc<ClassifierChain>,
        mapping: &SpeakerMapping,
        cancel: &CancellationToken,
        stage: &StageTracker,
    ) -> Result<ImageOutcome, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let mut stats = PipelineStats::default();

        stage.advance(PipelineStage::Preprocessing);
        let (prepared, cache_key) = self.preprocess(input).await?;
        stats.resized = prepared.was_resized();

        let lines = match self.cache.get(&cache_key) {
            Some(lines) => {
                self.metrics.increment(metric_names::OCR_CACHE_HIT);
                debug!(lines = lines.len(), "ocr_cache_hit");
                stats.cache_hit = true;
                lines
            }
            None => {
                self.metrics.increment(metric_names::OCR_CACHE_MISS);
                stage.advance(PipelineStage::Recognizing);
                let lines = self.recognize(&prepared, cancel).await?;
                self.cache.insert(cache_key, lines)
            }
        };
        stats.raw_lines = lines.len();

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        stage.advance(PipelineStage::Filtering);
        let span = self.metrics.span(metric_names::FILTER_CLUSTER);
        let content = self.noise.filter(&lines);
        stats.noise_dropped = lines.len() - content.len();
        stage.advance(PipelineStage::Clustering);
        let mut bubbles = self.clusterer.cluster(content);
        span.finish();
        stats.bubbles = bubbles.len();
        debug!(
            raw = stats.raw_lines,
            dropped = stats.noise_dropped,
            bubbles = stats.bubbles,
            "lines_clustered"
        );

        stage.advance(PipelineStage::Classifying);
        if bubbles.is_empty() {
            info!("no_text_detected");
            stage.advance(PipelineStage::Assembling);
            return Ok(ImageOutcome {
                transcript: Transcript::default(),
                info: Some(NO_TEXT_DETECTED.to_string()),
                stats,
            });
        }

        let span = self.metrics.span(metric_names::CLASSIFY);
        let pixels = prepared.pixels;
        let (classified, labels) = tokio::task::spawn_blocking(move || {
            let labels = chain.classify(&bubbles, &pixels);
            (bubbles, labels)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("classification task failed: {e}")))?;
        span.finish();
        bubbles = classified;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        for (bubble, label) in bubbles.iter_mut().zip(&labels) {
            bubble.color_class = label.color_class();
        }
        stats.color_decisions = labels.iter().filter(|l| l.is_color()).count();
        stats.position_decisions = labels.len() - stats.color_decisions;

        stage.advance(PipelineStage::Assembling);
        let transcript = assemble(&bubbles, &labels, mapping);

        Ok(ImageOutcome {
            transcript,
            info: None,
            stats,
        })
    }

    async fn preprocess(
        &self,
        input: ImageInput,
    ) -> Result<(PreparedImage, [u8; 32]), PipelineError> {
        let span = self.metrics.span(metric_names::PREPROCESS);
        let limits = self.limits.clone();
        let ImageInput {
            bytes,
            content_type,
            file_name,
        } = input;
        debug!(bytes = bytes.len(), file_name = ?file_name, "preprocess_start");

        let result = tokio::task::spawn_blocking(move || {
            let key = OcrResultCache::compute_key(&bytes);
            preprocess::prepare(&bytes, content_type.as_deref(), &limits).map(|p| (p, key))
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("image decoding task failed: {e}")))?;
        span.finish();
        result
    }

    async fn recognize(
        &self,
        prepared: &PreparedImage,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawTextLine>, PipelineError> {
        let _permit = self.scheduler.acquire_ocr(cancel).await?;
        let span = self.metrics.span(metric_names::OCR_RECOGNIZE);
        let lines = self.provider.recognize(&prepared.bytes, cancel).await;
        span.finish();
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, RgbImage};

    use crate::cancellation::RequestRegistry;
    use crate::ocr::BoundingPolygon;
    use crate::preprocess::tests::png_bytes;
    use crate::transcript::color::tests::two_bubble_screenshot;
    use crate::transcript::{Classifier, Label, MessageBubble, MySide, PositionClassifier};

    struct ScriptedProvider {
        result: Result<Vec<RawTextLine>, PipelineError>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn lines(lines: Vec<RawTextLine>) -> Arc<Self> {
            Arc::new(Self {
                result: Ok(lines),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(err: PipelineError) -> Arc<Self> {
            Arc::new(Self {
                result: Err(err),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl OcrProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn recognize(
            &self,
            _image: &[u8],
            cancel: &CancellationToken,
        ) -> Result<Vec<RawTextLine>, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            self.result.clone()
        }
    }

    fn pipeline(provider: Arc<ScriptedProvider>) -> OcrPipeline {
        let metrics = Arc::new(MetricsRegistry::new());
        OcrPipeline::new(
            provider,
            Arc::new(BatchScheduler::new(2, Arc::clone(&metrics))),
            Arc::new(OcrResultCache::new(8, Duration::from_secs(60))),
            metrics,
            ImageLimits::default(),
        )
    }

    fn line(text: &str, x: f64, y: f64, w: f64) -> RawTextLine {
        RawTextLine::new(text, BoundingPolygon::from_rect(x, y, w, 36.0))
    }

    fn sam_and_ali(side: MySide) -> SpeakerMapping {
        SpeakerMapping {
            me_name: "Sam".into(),
            them_name: "Ali".into(),
            my_side: side,
        }
    }

    fn encode(img: RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    async fn run_one(
        pipeline: &OcrPipeline,
        bytes: Vec<u8>,
        chain: ClassifierChain,
        mapping: &SpeakerMapping,
    ) -> (Result<ImageOutcome, PipelineError>, PipelineStage) {
        let stage = StageTracker::new();
        let result = pipeline
            .process_image(
                ImageInput::new(bytes),
                Arc::new(chain),
                mapping,
                &CancellationToken::new(),
                &stage,
            )
            .await;
        (result, stage.current())
    }

    #[tokio::test]
    async fn timestamp_dropped_and_speakers_assigned_by_side() {
        let provider = ScriptedProvider::lines(vec![
            line("10:32", 500.0, 120.0, 80.0),
            line("Hey, you free later?", 40.0, 300.0, 340.0),
            line("Yeah after 6", 700.0, 420.0, 250.0),
        ]);
        let pipeline = pipeline(provider);

        let (result, stage) = run_one(
            &pipeline,
            png_bytes(1080, 800, [255, 255, 255]),
            ClassifierChain::color_then_position(),
            &sam_and_ali(MySide::Right),
        )
        .await;
        let outcome = result.unwrap();

        let pairs: Vec<_> = outcome
            .transcript
            .messages
            .iter()
            .map(|m| (m.text.as_str(), m.speaker.as_str()))
            .collect();
        assert_eq!(pairs, [("Hey, you free later?", "Ali"), ("Yeah after 6", "Sam")]);
        assert_eq!(outcome.stats.noise_dropped, 1);
        assert_eq!(outcome.stats.position_decisions, 2);
        assert_eq!(stage, PipelineStage::Completed);
    }

    #[tokio::test]
    async fn zero_lines_is_an_empty_success() {
        let pipeline = pipeline(ScriptedProvider::lines(Vec::new()));
        let (result, stage) = run_one(
            &pipeline,
            png_bytes(400, 800, [255, 255, 255]),
            ClassifierChain::color_then_position(),
            &SpeakerMapping::default(),
        )
        .await;
        let outcome = result.unwrap();
        assert!(outcome.transcript.is_empty());
        assert_eq!(outcome.info.as_deref(), Some(NO_TEXT_DETECTED));
        assert_eq!(stage, PipelineStage::Completed);
    }

    #[tokio::test]
    async fn green_bubble_belongs_to_me() {
        let provider = ScriptedProvider::lines(vec![
            RawTextLine::new(
                "hey, you free later?",
                BoundingPolygon::from_rect(40.0, 60.0, 120.0, 20.0),
            ),
            RawTextLine::new(
                "yeah after 6",
                BoundingPolygon::from_rect(230.0, 230.0, 120.0, 20.0),
            ),
        ]);
        let pipeline = pipeline(provider);

        let (result, _) = run_one(
            &pipeline,
            encode(two_bubble_screenshot()),
            ClassifierChain::color_then_position(),
            &sam_and_ali(MySide::Green),
        )
        .await;
        let outcome = result.unwrap();

        assert_eq!(outcome.transcript.messages[0].speaker, "Ali");
        assert_eq!(outcome.transcript.messages[1].speaker, "Sam");
        assert_eq!(outcome.stats.color_decisions, 2);
    }

    #[tokio::test]
    async fn repeated_upload_hits_the_cache() {
        let provider = ScriptedProvider::lines(vec![line("see you there", 40.0, 300.0, 200.0)]);
        let pipeline = pipeline(Arc::clone(&provider));
        let bytes = png_bytes(400, 800, [255, 255, 255]);

        let mapping = SpeakerMapping::default();

        let (first, _) =
            run_one(&pipeline, bytes.clone(), ClassifierChain::position_only(), &mapping).await;
        let (second, stage) =
            run_one(&pipeline, bytes, ClassifierChain::position_only(), &mapping).await;

        assert!(!first.unwrap().stats.cache_hit);
        assert!(second.unwrap().stats.cache_hit);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stage, PipelineStage::Completed);
    }

    #[tokio::test]
    async fn provider_failure_marks_image_failed() {
        let pipeline = pipeline(ScriptedProvider::failing(PipelineError::ProviderProcessingFailed(
            "Read operation reported status `failed`".into(),
        )));
        let (result, stage) = run_one(
            &pipeline,
            png_bytes(400, 800, [255, 255, 255]),
            ClassifierChain::color_then_position(),
            &SpeakerMapping::default(),
        )
        .await;
        assert!(matches!(result, Err(PipelineError::ProviderProcessingFailed(_))));
        assert_eq!(stage, PipelineStage::Failed);
    }

    /// A classifier stage that always panics.
    struct Exploding;

    impl Classifier for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn classify(&self, _bubbles: &[MessageBubble], _image: &RgbImage) -> Vec<Option<Label>> {
            panic!("classifier bug")
        }
    }

    #[tokio::test]
    async fn classifier_panic_is_an_internal_error() {
        let provider = ScriptedProvider::lines(vec![line("hello there", 40.0, 300.0, 200.0)]);
        let pipeline = pipeline(provider);
        let chain = ClassifierChain::new(vec![Box::new(Exploding)], PositionClassifier::default());

        let (result, stage) = run_one(
            &pipeline,
            png_bytes(400, 800, [255, 255, 255]),
            chain,
            &SpeakerMapping::default(),
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, PipelineError::Internal(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(stage, PipelineStage::Failed);
    }

    #[tokio::test]
    async fn cancelled_request_stops_before_ocr() {
        let provider = ScriptedProvider::lines(vec![line("hello there", 40.0, 300.0, 200.0)]);
        let pipeline = pipeline(Arc::clone(&provider));
        let token = CancellationToken::new();
        token.cancel();
        let stage = StageTracker::new();

        let result = pipeline
            .process_image(
                ImageInput::new(png_bytes(400, 800, [255, 255, 255])),
                Arc::new(ClassifierChain::position_only()),
                &SpeakerMapping::default(),
                &token,
                &stage,
            )
            .await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(stage.current(), PipelineStage::Cancelled);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_isolates_failures_and_keeps_order() {
        let provider = ScriptedProvider::lines(vec![line("morning!", 40.0, 300.0, 200.0)]);
        let pipeline = pipeline(provider);
        let registry = Arc::new(RequestRegistry::new());
        let guard = registry.register(3);

        let results = pipeline
            .process_batch(
                vec![
                    ImageInput::new(png_bytes(400, 800, [255, 255, 255])),
                    ImageInput::new(vec![0x42; 512]),
                    ImageInput::new(png_bytes(600, 900, [255, 255, 255])),
                ],
                Arc::new(ClassifierChain::position_only()),
                &SpeakerMapping::default(),
                &guard,
            )
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(PipelineError::UnsupportedFormat(_))));
        assert!(results[2].is_ok());

        let snapshot = registry.snapshot(guard.request_id()).unwrap();
        assert_eq!(
            snapshot.stages,
            [PipelineStage::Completed, PipelineStage::Failed, PipelineStage::Completed]
        );
    }
}
