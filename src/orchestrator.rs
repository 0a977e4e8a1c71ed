//! Recommendation pipeline.
//!
//! One request runs five stages in a fixed order and stops at the first
//! failure:
//!
//! ```text
//! QuotaCheck -> Embed -> Retrieve -> Generate -> Extract
//! ```
//!
//! Nothing is retried. Every stage after validation is bounded by the
//! request deadline; generation also has its own, shorter budget. The
//! collaborators sit behind traits so the pipeline can be driven by
//! in-process fakes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::embedding::Embedder;
use crate::error::{PipelineError, Stage, ValidationError};
use crate::extract::extract_recommendations;
use crate::llm::Generator;
use crate::model::{RecommendRequest, Recommendation};
use crate::quota::QuotaLimiter;
use crate::retrieval::Retriever;

/// Tunables for one pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Candidates requested from the index.
    pub candidate_limit: usize,
    /// Deadline for the whole run when none is supplied.
    pub request_timeout: Duration,
    /// Budget for the generation stage. Never extends past the deadline.
    pub generation_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            candidate_limit: 100,
            request_timeout: Duration::from_secs(90),
            generation_timeout: Duration::from_secs(60),
        }
    }
}

/// Drives one request through every stage.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    quota: Arc<dyn QuotaLimiter>,
    embedder: Arc<dyn Embedder>,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    options: PipelineOptions,
}

impl Orchestrator {
    pub fn new(
        quota: Arc<dyn QuotaLimiter>,
        embedder: Arc<dyn Embedder>,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            quota,
            embedder,
            retriever,
            generator,
            options,
        }
    }

    /// Run the pipeline with the configured request timeout.
    pub async fn handle_request(
        &self,
        request: RecommendRequest,
        identity: &str,
    ) -> Result<Vec<Recommendation>, PipelineError> {
        let deadline = Instant::now() + self.options.request_timeout;
        self.handle_request_until(request, identity, deadline).await
    }

    /// Run the pipeline, giving up once `deadline` passes.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure. Quota exhaustion, quota store
    /// failures, upstream failures, deadline overruns and parse failures
    /// each keep their own variant of [`PipelineError`].
    pub async fn handle_request_until(
        &self,
        mut request: RecommendRequest,
        identity: &str,
        deadline: Instant,
    ) -> Result<Vec<Recommendation>, PipelineError> {
        request.normalize();
        request.validate()?;
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(ValidationError::new("identity", "caller identity must not be empty").into());
        }

        let started = Instant::now();
        let request_budget = deadline.saturating_duration_since(started);

        bounded(Stage::QuotaCheck, deadline, request_budget, async {
            match self.quota.allow(identity).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(PipelineError::QuotaExceeded {
                    identity: identity.to_string(),
                }),
                Err(source) => Err(PipelineError::QuotaStore {
                    identity: identity.to_string(),
                    source,
                }),
            }
        })
        .await?;

        let vector = bounded(Stage::Embed, deadline, request_budget, async {
            self.embedder
                .embed(&request.user_question)
                .await
                .map_err(|source| PipelineError::Upstream {
                    stage: Stage::Embed,
                    source,
                })
        })
        .await?;

        let candidates = bounded(Stage::Retrieve, deadline, request_budget, async {
            self.retriever
                .search(&vector, request.category, self.options.candidate_limit)
                .await
                .map_err(|source| PipelineError::Upstream {
                    stage: Stage::Retrieve,
                    source,
                })
        })
        .await?;

        let generation_deadline = deadline.min(Instant::now() + self.options.generation_timeout);
        let generation_budget = generation_deadline.saturating_duration_since(Instant::now());
        let reply = bounded(Stage::Generate, generation_deadline, generation_budget, async {
            self.generator
                .generate(&request.user_question, &candidates)
                .await
                .map_err(|source| PipelineError::Upstream {
                    stage: Stage::Generate,
                    source,
                })
        })
        .await?;

        let recommendations = extract_recommendations(&reply)?;

        tracing::info!(
            identity = %identity,
            category = request.category,
            candidates = candidates.len(),
            recommendations = recommendations.len(),
            elapsed_ms = millis(started.elapsed()),
            "Recommendation request complete"
        );
        Ok(recommendations)
    }
}

/// Await one stage, converting a missed deadline into
/// [`PipelineError::DeadlineExceeded`].
async fn bounded<T>(
    stage: Stage,
    deadline: Instant,
    budget: Duration,
    fut: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    let started = Instant::now();
    let outcome = match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::DeadlineExceeded { stage, budget }),
    };
    let elapsed_ms = millis(started.elapsed());
    match &outcome {
        Ok(_) => tracing::debug!(stage = %stage, elapsed_ms, "Stage complete"),
        Err(e) => tracing::warn!(stage = %stage, elapsed_ms, error = %e, "Stage failed"),
    }
    outcome
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, QuotaError, UpstreamError};
    use crate::model::{AttributeValue, Candidate};
    use crate::quota::{MemoryQuotaLimiter, QuotaPolicy, QuotaStatus};
    use async_trait::async_trait;
    use chrono::Weekday;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FakeEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    #[derive(Debug, Default)]
    struct FakeRetriever {
        candidates: Vec<Candidate>,
        seen: Mutex<Vec<(i64, usize)>>,
    }

    #[async_trait]
    impl Retriever for FakeRetriever {
        async fn search(
            &self,
            _vector: &[f32],
            category: i64,
            limit: usize,
        ) -> Result<Vec<Candidate>, UpstreamError> {
            self.seen.lock().unwrap().push((category, limit));
            Ok(self.candidates.clone())
        }
    }

    #[derive(Debug)]
    struct StalledRetriever;

    #[async_trait]
    impl Retriever for StalledRetriever {
        async fn search(
            &self,
            _vector: &[f32],
            _category: i64,
            _limit: usize,
        ) -> Result<Vec<Candidate>, UpstreamError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    #[derive(Debug)]
    struct FakeGenerator {
        reply: String,
        delay: Duration,
    }

    impl FakeGenerator {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        async fn generate(&self, _question: &str, _candidates: &[Candidate]) -> Result<String, UpstreamError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.reply.clone())
        }
    }

    #[derive(Debug)]
    struct BrokenQuota;

    #[async_trait]
    impl QuotaLimiter for BrokenQuota {
        async fn allow(&self, _identity: &str) -> Result<bool, QuotaError> {
            Err(QuotaError::Protocol("connection reset".to_string()))
        }

        async fn status(&self, _identity: &str) -> Result<QuotaStatus, QuotaError> {
            Err(QuotaError::Protocol("connection reset".to_string()))
        }
    }

    const REPLY: &str =
        r#"Looking at the list...<|Result|>[{"course":"Art Appreciation","reason":"paper-graded, no exam"}]"#;

    fn memory_quota(limit: i64) -> Arc<dyn QuotaLimiter> {
        Arc::new(MemoryQuotaLimiter::new(QuotaPolicy {
            limit,
            key_prefix: "limit:".to_string(),
            reset_weekday: Weekday::Thu,
        }))
    }

    fn two_courses() -> Vec<Candidate> {
        vec![
            Candidate::new("1", 0.91)
                .with_attribute("text", AttributeValue::String("Art Appreciation, essay only".into())),
            Candidate::new("2", 0.87)
                .with_attribute("text", AttributeValue::String("Linear Algebra, closed-book final".into())),
        ]
    }

    fn pipeline(
        quota: Arc<dyn QuotaLimiter>,
        embedder: Arc<FakeEmbedder>,
        retriever: Arc<FakeRetriever>,
        generator: FakeGenerator,
        options: PipelineOptions,
    ) -> Orchestrator {
        Orchestrator::new(quota, embedder, retriever, Arc::new(generator), options)
    }

    #[tokio::test]
    async fn test_end_to_end_then_quota_denial() {
        let retriever = Arc::new(FakeRetriever {
            candidates: two_courses(),
            ..Default::default()
        });
        let orchestrator = pipeline(
            memory_quota(1),
            Arc::new(FakeEmbedder::default()),
            Arc::clone(&retriever),
            FakeGenerator::replying(REPLY),
            PipelineOptions::default(),
        );

        let request = RecommendRequest::new("no final-exam courses", 0);
        let recommendations = orchestrator
            .handle_request(request.clone(), "dev-1")
            .await
            .unwrap();
        assert_eq!(
            recommendations,
            vec![Recommendation::new("Art Appreciation", "paper-graded, no exam")]
        );
        assert_eq!(*retriever.seen.lock().unwrap(), vec![(0, 100)]);

        let err = orchestrator.handle_request(request, "dev-1").await.unwrap_err();
        assert!(matches!(err, PipelineError::QuotaExceeded { .. }));
        assert_eq!(err.kind(), ErrorKind::Quota);
    }

    #[tokio::test]
    async fn test_denied_request_stops_before_embedding() {
        let embedder = Arc::new(FakeEmbedder::default());
        let orchestrator = pipeline(
            memory_quota(1),
            Arc::clone(&embedder),
            Arc::new(FakeRetriever::default()),
            FakeGenerator::replying(REPLY),
            PipelineOptions::default(),
        );

        orchestrator
            .handle_request(RecommendRequest::new("q", 0), "dev-2")
            .await
            .unwrap();
        let _ = orchestrator
            .handle_request(RecommendRequest::new("q", 0), "dev-2")
            .await;
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_consumes_no_quota() {
        let quota = memory_quota(1);
        let orchestrator = pipeline(
            Arc::clone(&quota),
            Arc::new(FakeEmbedder::default()),
            Arc::new(FakeRetriever::default()),
            FakeGenerator::replying(REPLY),
            PipelineOptions::default(),
        );

        let err = orchestrator
            .handle_request(RecommendRequest::new("   ", 0), "dev-3")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = orchestrator
            .handle_request(RecommendRequest::new("q", 0), "  ")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(quota.status("dev-3").await.unwrap().remaining, 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_distinct_from_exhaustion() {
        let orchestrator = pipeline(
            Arc::new(BrokenQuota),
            Arc::new(FakeEmbedder::default()),
            Arc::new(FakeRetriever::default()),
            FakeGenerator::replying(REPLY),
            PipelineOptions::default(),
        );

        let err = orchestrator
            .handle_request(RecommendRequest::new("q", 0), "dev-4")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::QuotaStore { .. }));
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(err.stage(), Some(Stage::QuotaCheck));
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_parse_error() {
        let orchestrator = pipeline(
            memory_quota(5),
            Arc::new(FakeEmbedder::default()),
            Arc::new(FakeRetriever::default()),
            FakeGenerator::replying("I could not decide."),
            PipelineOptions::default(),
        );

        let err = orchestrator
            .handle_request(RecommendRequest::new("q", 0), "dev-5")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[tokio::test]
    async fn test_category_and_limit_reach_retriever() {
        let retriever = Arc::new(FakeRetriever::default());
        let orchestrator = pipeline(
            memory_quota(5),
            Arc::new(FakeEmbedder::default()),
            Arc::clone(&retriever),
            FakeGenerator::replying("nothing fits <|Result|> []"),
            PipelineOptions {
                candidate_limit: 25,
                ..PipelineOptions::default()
            },
        );

        let recommendations = orchestrator
            .handle_request(RecommendRequest::new("q", 6), "dev-6")
            .await
            .unwrap();
        assert!(recommendations.is_empty());
        assert_eq!(*retriever.seen.lock().unwrap(), vec![(6, 25)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_generation_hits_its_own_budget() {
        let orchestrator = pipeline(
            memory_quota(5),
            Arc::new(FakeEmbedder::default()),
            Arc::new(FakeRetriever::default()),
            FakeGenerator {
                reply: REPLY.to_string(),
                delay: Duration::from_secs(600),
            },
            PipelineOptions {
                candidate_limit: 10,
                request_timeout: Duration::from_secs(90),
                generation_timeout: Duration::from_secs(5),
            },
        );

        let err = orchestrator
            .handle_request(RecommendRequest::new("q", 0), "dev-7")
            .await
            .unwrap_err();
        match err {
            PipelineError::DeadlineExceeded { stage, budget } => {
                assert_eq!(stage, Stage::Generate);
                assert_eq!(budget, Duration::from_secs(5));
            }
            other => panic!("expected deadline error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_never_outlives_request_deadline() {
        let orchestrator = pipeline(
            memory_quota(5),
            Arc::new(FakeEmbedder::default()),
            Arc::new(FakeRetriever::default()),
            FakeGenerator {
                reply: REPLY.to_string(),
                delay: Duration::from_secs(30),
            },
            PipelineOptions {
                candidate_limit: 10,
                request_timeout: Duration::from_secs(90),
                generation_timeout: Duration::from_secs(60),
            },
        );

        let deadline = Instant::now() + Duration::from_secs(2);
        let err = orchestrator
            .handle_request_until(RecommendRequest::new("q", 0), "dev-8", deadline)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DeadlineExceeded {
                stage: Stage::Generate,
                ..
            }
        ));
        assert!(Instant::now() <= deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_retrieval_hits_request_deadline() {
        let orchestrator = Orchestrator::new(
            memory_quota(5),
            Arc::new(FakeEmbedder::default()),
            Arc::new(StalledRetriever),
            Arc::new(FakeGenerator::replying(REPLY)),
            PipelineOptions {
                candidate_limit: 10,
                request_timeout: Duration::from_secs(90),
                generation_timeout: Duration::from_secs(60),
            },
        );

        let started = Instant::now();
        let err = orchestrator
            .handle_request(RecommendRequest::new("q", 0), "dev-9")
            .await
            .unwrap_err();
        match err {
            PipelineError::DeadlineExceeded { stage, budget } => {
                assert_eq!(stage, Stage::Retrieve);
                assert_eq!(budget, Duration::from_secs(90));
            }
            other => panic!("expected deadline error, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(91));
    }
}
