//! Drives generation jobs from queued to a terminal state.
//!
//! One task per job walks the section list in order. The same loop serves
//! both delivery modes; only the [`ProgressSink`] differs.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{FutureExt, Stream};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{error, info};
use uuid::Uuid;

use crate::cost::{ModelPricing, TokenUsage};
use crate::error::GenerationError;
use crate::generation::{SectionGenerationResult, SectionGenerator};
use crate::job::{GenerationJob, JobEvent, JobFailure, JobStatus, JobStore, progress_percent};
use crate::progress::{
    OwnerSink, ProgressBroadcaster, ProgressEvent, ProgressSink, StreamSink, Subscription,
};
use crate::request::GenerationRequest;

/// Events of one single-shot run, ending after `complete` or `error`.
pub type EventStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// A section loop that stopped early, and where.
struct Interrupted {
    index: usize,
    error: GenerationError,
}

pub struct GenerationExecutor {
    generator: SectionGenerator,
    store: Arc<dyn JobStore>,
    broadcaster: Arc<ProgressBroadcaster>,
}

impl GenerationExecutor {
    pub fn new(
        generator: SectionGenerator,
        store: Arc<dyn JobStore>,
        broadcaster: Arc<ProgressBroadcaster>,
    ) -> Self {
        Self {
            generator,
            store,
            broadcaster,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    /// Queue a job and run it in the background, publishing progress to every
    /// subscriber of `request.owner`.
    pub async fn start_generation(
        self: &Arc<Self>,
        request: GenerationRequest,
    ) -> Result<Uuid, GenerationError> {
        let job_id = self.create_job(&request).await?;
        let sink = OwnerSink::new(Arc::clone(&self.broadcaster), request.owner.clone(), job_id);
        self.spawn_job(job_id, request, sink);
        Ok(job_id)
    }

    /// Queue a job and return its events as a single ordered stream that ends
    /// after `complete` or `error`. Dropping the stream does not stop the job.
    pub async fn stream_generation(
        self: &Arc<Self>,
        request: GenerationRequest,
    ) -> Result<(Uuid, EventStream), GenerationError> {
        let job_id = self.create_job(&request).await?;
        let (tx, mut rx) = unbounded_channel();
        self.spawn_job(job_id, request, StreamSink::new(tx));

        let stream: EventStream = Box::pin(async_stream::stream! {
            while let Some(event) = rx.recv().await {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    break;
                }
            }
        });
        Ok((job_id, stream))
    }

    pub async fn job_status(&self, job_id: Uuid) -> Result<JobStatus, GenerationError> {
        Ok(self.store.get(job_id).await?.status())
    }

    pub fn subscribe(&self, owner: &str) -> Subscription {
        self.broadcaster.subscribe(owner)
    }

    fn spawn_job(
        self: &Arc<Self>,
        job_id: Uuid,
        request: GenerationRequest,
        sink: impl ProgressSink + 'static,
    ) {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = executor.run_job(job_id, &request, &sink).await {
                error!(job = %job_id, error = %e, "job runner aborted");
            }
        });
    }

    async fn create_job(&self, request: &GenerationRequest) -> Result<Uuid, GenerationError> {
        let job = GenerationJob::new(&request.document.id, request.job_type);
        let job_id = job.id;
        self.store.insert(job).await?;
        info!(
            job = %job_id,
            document = %request.document.id,
            owner = %request.owner,
            "job queued"
        );
        Ok(job_id)
    }

    /// Run every section of `request` and move the job to its terminal state.
    ///
    /// Generation failures, including a panicking collaborator, end up on the
    /// job record and as an `error` event. The terminal event is emitted even
    /// when the store refuses the final write; that store error is returned.
    pub async fn run_job(
        &self,
        job_id: Uuid,
        request: &GenerationRequest,
        sink: &dyn ProgressSink,
    ) -> Result<JobStatus, GenerationError> {
        let total = request.effective_sections().len();
        let current = AtomicUsize::new(0);
        let outcome = AssertUnwindSafe(self.run_sections(job_id, request, sink, &current))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(Interrupted {
                    index: current.load(Ordering::SeqCst),
                    error: GenerationError::Unexpected(panic_message(&*panic)),
                })
            });

        let (event, recorded) = match outcome {
            Ok((usage, cost_usd)) => {
                let recorded = self
                    .store
                    .update(job_id, JobEvent::Completed { usage, cost_usd })
                    .await;
                info!(
                    job = %job_id,
                    sections = total,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    cost_usd,
                    "job completed"
                );
                (ProgressEvent::Complete { total_sections: total }, recorded)
            }
            Err(Interrupted { index, error }) => {
                error!(job = %job_id, section = index, error = %error, "job failed");
                let failure = JobFailure::from(&error);
                let recorded = self
                    .store
                    .update(job_id, JobEvent::Failed(failure.clone()))
                    .await;
                let event = ProgressEvent::Error {
                    index,
                    message: failure.message,
                    kind: Some(failure.kind),
                };
                (event, recorded)
            }
        };
        if let Err(e) = &recorded {
            error!(job = %job_id, error = %e, "terminal job state not recorded");
        }
        sink.emit(event);
        recorded?;
        self.job_status(job_id).await
    }

    async fn run_sections(
        &self,
        job_id: Uuid,
        request: &GenerationRequest,
        sink: &dyn ProgressSink,
        current: &AtomicUsize,
    ) -> Result<(TokenUsage, f64), Interrupted> {
        let at = |index: usize| move |error: GenerationError| Interrupted { index, error };

        let sections = request.effective_sections();
        let total = sections.len();
        self.store
            .update(job_id, JobEvent::Started)
            .await
            .map_err(at(0))?;
        info!(job = %job_id, sections = total, "job started");
        sink.emit(ProgressEvent::Start {
            total_sections: total,
        });

        let mut accepted: Vec<SectionGenerationResult> = Vec::with_capacity(total);
        let mut usage = TokenUsage::default();
        let mut cost_usd = 0.0;

        for (index, section) in sections.iter().enumerate() {
            current.store(index, Ordering::SeqCst);
            sink.emit(ProgressEvent::Progress {
                index,
                title: section.title.clone(),
                percent: progress_percent(index, total),
            });

            let result = self
                .generator
                .generate(&request.document, index, section, &accepted)
                .await
                .map_err(at(index))?;
            usage.add(&result.usage);
            cost_usd += ModelPricing::for_model(&result.model).cost(&result.usage);
            let result = result.into_accepted().map_err(at(index))?;

            self.store
                .store_section(job_id, result.clone())
                .await
                .map_err(at(index))?;
            self.store
                .update(job_id, JobEvent::Progressed(progress_percent(index + 1, total)))
                .await
                .map_err(at(index))?;
            sink.emit(ProgressEvent::Section {
                index,
                title: result.title.clone(),
                payload: result.payload(),
            });
            accepted.push(result);
        }

        Ok((usage, cost_usd))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "no message".to_string());
    format!("panicked: {detail}")
}
