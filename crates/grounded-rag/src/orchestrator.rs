//! RAG run state machine
//!
//! Single-hop: REWRITING → RETRIEVING → ASSEMBLING → GENERATING →
//! EXTRACTING_CITATIONS → DONE.
//!
//! Multi-hop: REWRITING → DECOMPOSING → per sub-question (RETRIEVING →
//! ASSEMBLING → GENERATING) → ASSEMBLING → GENERATING →
//! EXTRACTING_CITATIONS → DONE. With `parallel_hop_retrieval` all hop
//! retrievals run up front as one RETRIEVING stage; hop answers are always
//! generated in order.
//!
//! Any unrecoverable error ends the run in FAILED.

use futures_util::future::join_all;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::RagConfig;
use crate::error::{Error, Port, Result};
use crate::generation::{CitationExtractor, PromptBuilder};
use crate::providers::{EmbeddingProvider, Generation, LlmProvider, RetryPolicy, StreamItem, VectorStoreProvider};
use crate::query::{QueryDecomposer, QueryRewriter};
use crate::retrieval::{CharRatioEstimator, ContextAssembler, Retriever, TokenEstimator};
use crate::types::{
    ContextWindow, Query, RagEvent, RagRequest, RagResult, RunFailure, RunMode, RunOptions, RunState,
    ScoredChunk, SubQuestion,
};

/// Events buffered between the run task and a slow consumer
const EVENT_BUFFER: usize = 64;

/// Entry point of the pipeline; cheap to clone and safe to share across runs
#[derive(Clone)]
pub struct RagOrchestrator {
    inner: Arc<PipelineInner>,
}

#[derive(Clone)]
struct PipelineInner {
    rewriter: QueryRewriter,
    decomposer: QueryDecomposer,
    retriever: Retriever,
    assembler: ContextAssembler,
    citations: CitationExtractor,
    llm: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    parallel_hop_retrieval: bool,
    defaults: RunOptions,
}

impl RagOrchestrator {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStoreProvider>,
        llm: Arc<dyn LlmProvider>,
        config: &RagConfig,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        let estimator = CharRatioEstimator::new(config.context.chars_per_token);

        tracing::info!(
            "RAG orchestrator ready (embedding: {}, store: {}, llm: {})",
            embedder.name(),
            store.name(),
            llm.name()
        );

        Self {
            inner: Arc::new(PipelineInner {
                rewriter: QueryRewriter::new(llm.clone(), retry.clone(), config.rewrite.clone()),
                decomposer: QueryDecomposer::new(llm.clone(), retry.clone()),
                retriever: Retriever::new(embedder, store, retry.clone())
                    .with_namespace(config.retrieval.namespace.clone()),
                assembler: ContextAssembler::new(Arc::new(estimator)),
                citations: CitationExtractor::new(&config.citation),
                llm,
                retry,
                parallel_hop_retrieval: config.retrieval.parallel_hop_retrieval,
                defaults: RunOptions::from_config(config),
            }),
        }
    }

    /// Swap the length-based token estimate for another counter
    pub fn with_token_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        Arc::make_mut(&mut self.inner).assembler = ContextAssembler::new(estimator);
        self
    }

    /// Options a request starts from when it does not bring its own
    pub fn default_options(&self) -> RunOptions {
        self.inner.defaults.clone()
    }

    /// Start a run; the returned stream yields fragments, then one terminal event
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run(&self, request: RagRequest) -> RagRun {
        let (events, receiver) = mpsc::channel(EVENT_BUFFER);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let run_id = Uuid::new_v4();

        let span = tracing::info_span!("rag_run", %run_id, mode = request.mode.as_str());
        let pipeline = self.inner.clone();
        tokio::spawn(
            async move {
                let run = RunContext::new(run_id, request.mode, events, cancel_rx);
                pipeline.execute(run, request).await;
            }
            .instrument(span),
        );

        RagRun {
            events: ReceiverStream::new(receiver),
            cancel: CancelHandle {
                sender: Arc::new(cancel_tx),
            },
            run_id,
        }
    }

    /// Run without streaming and wait for the result
    pub async fn answer(&self, request: RagRequest) -> Result<RagResult> {
        self.run(request.without_streaming()).into_result().await
    }
}

/// Handle to one in-flight run: a stream of [`RagEvent`]s
pub struct RagRun {
    events: ReceiverStream<RagEvent>,
    cancel: CancelHandle,
    run_id: Uuid,
}

impl RagRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Handle that stops generation at the next fragment boundary
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Drain the stream, returning the final result or the failure
    pub async fn into_result(mut self) -> Result<RagResult> {
        while let Some(event) = self.events.next().await {
            match event {
                RagEvent::Fragment { .. } => {}
                RagEvent::Final { result } => return Ok(result),
                RagEvent::Failed { failure } => {
                    return Err(Error::internal(format!(
                        "run failed in {} ({}): {}",
                        failure.state, failure.kind, failure.message
                    )))
                }
            }
        }
        Err(Error::internal("run ended without a terminal event"))
    }
}

impl Stream for RagRun {
    type Item = RagEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

/// Caller-side early stop of a run
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Per-run state owned by the run task
struct RunContext {
    run_id: Uuid,
    mode: RunMode,
    started: Instant,
    created_at: chrono::DateTime<chrono::Utc>,
    stages: Vec<RunState>,
    events: mpsc::Sender<RagEvent>,
    cancel: watch::Receiver<bool>,
}

impl RunContext {
    fn new(run_id: Uuid, mode: RunMode, events: mpsc::Sender<RagEvent>, cancel: watch::Receiver<bool>) -> Self {
        Self {
            run_id,
            mode,
            started: Instant::now(),
            created_at: chrono::Utc::now(),
            stages: Vec::new(),
            events,
            cancel,
        }
    }

    fn enter(&mut self, state: RunState) {
        tracing::info!("Entering {}", state);
        self.stages.push(state);
    }

    fn state(&self) -> RunState {
        self.stages.last().copied().unwrap_or(RunState::Rewriting)
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// The consumer dropped the event stream
    fn is_abandoned(&self) -> bool {
        self.events.is_closed()
    }

    /// False once the consumer has dropped the stream
    async fn emit(&self, event: RagEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

/// Resolves once the caller cancels; never resolves if nobody can
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let senders_gone = cancel.wait_for(|flag| *flag).await.is_err();
    if senders_gone {
        std::future::pending::<()>().await;
    }
}

/// Everything the run produced up to citation extraction
struct Answered {
    answer: String,
    window: ContextWindow,
    sub_questions: Vec<SubQuestion>,
    rewritten_query: String,
    chunks_retrieved: usize,
    cancelled: bool,
}

/// Final context plus hop bookkeeping
struct Grounding {
    window: ContextWindow,
    sub_questions: Vec<SubQuestion>,
    chunks_retrieved: usize,
    cancelled: bool,
}

enum Generated {
    Complete(String),
    Cancelled(String),
    Abandoned,
}

impl PipelineInner {
    async fn execute(&self, mut run: RunContext, request: RagRequest) {
        tracing::info!("Starting {} run", run.mode.as_str());

        match self.drive(&mut run, &request).await {
            Ok(Some(answered)) => {
                run.enter(RunState::ExtractingCitations);
                let citations = self.citations.extract(&answered.answer, &answered.window);
                run.enter(RunState::Done);

                let result = RagResult {
                    run_id: run.run_id,
                    mode: run.mode,
                    answer: answered.answer,
                    citations,
                    sub_questions: answered.sub_questions,
                    rewritten_query: answered.rewritten_query,
                    stages: run.stages.clone(),
                    chunks_retrieved: answered.chunks_retrieved,
                    context_chunk_ids: answered.window.chunk_ids(),
                    context_tokens: answered.window.token_count(),
                    cancelled: answered.cancelled,
                    created_at: run.created_at,
                    processing_time_ms: run.started.elapsed().as_millis() as u64,
                };

                tracing::info!(
                    "Run finished in {}ms with {} citations{}",
                    result.processing_time_ms,
                    result.citations.len(),
                    if result.cancelled { " (cancelled)" } else { "" }
                );
                run.emit(RagEvent::Final { result }).await;
            }
            Ok(None) => {
                tracing::info!("Consumer went away, run abandoned in {}", run.state());
            }
            Err(e) => {
                let state = run.state();
                run.enter(RunState::Failed);
                tracing::error!("Run failed in {}: {}", state, e);

                let failure = RunFailure {
                    state,
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                };
                run.emit(RagEvent::Failed { failure }).await;
            }
        }
    }

    /// Everything up to citation extraction; `None` when the consumer left
    async fn drive(&self, run: &mut RunContext, request: &RagRequest) -> Result<Option<Answered>> {
        run.enter(RunState::Rewriting);
        let query = Query::new(request.query.as_str());
        if query.is_empty() {
            return Err(Error::invalid_request("query is empty"));
        }
        if run.is_abandoned() {
            return Ok(None);
        }
        let options = &request.options;
        let rewritten = self.rewriter.rewrite(&query, &request.history).await;
        if run.is_abandoned() {
            return Ok(None);
        }

        let grounding = match request.mode {
            RunMode::SingleHop => self.single_hop(run, &rewritten.text, options).await?,
            RunMode::MultiHop => {
                run.enter(RunState::Decomposing);
                let sub_questions = self.decomposer.decompose(&rewritten, options.max_subquestions).await;
                match self.multi_hop(run, sub_questions, options).await? {
                    Some(grounding) => grounding,
                    None => return Ok(None),
                }
            }
        };

        let mut answered = Answered {
            answer: String::new(),
            window: grounding.window,
            sub_questions: grounding.sub_questions,
            rewritten_query: rewritten.text,
            chunks_retrieved: grounding.chunks_retrieved,
            cancelled: grounding.cancelled,
        };
        if answered.cancelled {
            return Ok(Some(answered));
        }
        if run.is_abandoned() {
            return Ok(None);
        }

        run.enter(RunState::Generating);
        let context = PromptBuilder::build_context(&answered.window);
        let prompt = match request.mode {
            RunMode::SingleHop => PromptBuilder::build_answer_prompt(query.as_str(), &context),
            RunMode::MultiHop => {
                PromptBuilder::build_synthesis_prompt(query.as_str(), &answered.sub_questions, &context)
            }
        };

        match self.generate_answer(run, &prompt, request.stream).await? {
            Generated::Complete(answer) => answered.answer = answer,
            Generated::Cancelled(partial) => {
                tracing::warn!("Generation cancelled after {} chars", partial.len());
                answered.answer = partial;
                answered.cancelled = true;
            }
            Generated::Abandoned => return Ok(None),
        }

        Ok(Some(answered))
    }

    async fn single_hop(&self, run: &mut RunContext, query_text: &str, options: &RunOptions) -> Result<Grounding> {
        run.enter(RunState::Retrieving);
        let chunks = self
            .retriever
            .retrieve(query_text, options.top_k, options.score_threshold)
            .await?;
        let chunks_retrieved = chunks.len();

        run.enter(RunState::Assembling);
        let window = self.assembler.assemble_checked(chunks, options.token_budget)?;
        tracing::info!(
            "Context window: {} of {} chunks, {}/{} tokens",
            window.len(),
            chunks_retrieved,
            window.token_count(),
            options.token_budget
        );

        Ok(Grounding {
            window,
            sub_questions: Vec::new(),
            chunks_retrieved,
            cancelled: false,
        })
    }

    /// `None` when the consumer left between or during hops
    async fn multi_hop(
        &self,
        run: &mut RunContext,
        mut sub_questions: Vec<SubQuestion>,
        options: &RunOptions,
    ) -> Result<Option<Grounding>> {
        let hops = sub_questions.len().min(options.max_subquestions.max(1));
        sub_questions.truncate(hops);
        let hop_budget = options.token_budget / hops.max(1);

        let mut prefetched: Vec<Vec<ScoredChunk>> = if self.parallel_hop_retrieval {
            run.enter(RunState::Retrieving);
            let retriever = &self.retriever;
            let lookups = sub_questions
                .iter()
                .map(|sq| retriever.retrieve(&sq.text, options.top_k, options.score_threshold));
            join_all(lookups).await.into_iter().collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let mut retrieved: Vec<ScoredChunk> = Vec::new();
        let mut hop_context: Vec<ScoredChunk> = Vec::new();
        let mut cancelled = false;

        for i in 0..hops {
            if run.is_abandoned() {
                return Ok(None);
            }
            if run.is_cancelled() {
                tracing::warn!("Cancelled before hop {}", i + 1);
                cancelled = true;
                break;
            }

            let chunks = match prefetched.get_mut(i) {
                Some(chunks) => std::mem::take(chunks),
                None => {
                    run.enter(RunState::Retrieving);
                    self.retriever
                        .retrieve(&sub_questions[i].text, options.top_k, options.score_threshold)
                        .await?
                }
            };
            let found = chunks.len();
            retrieved.extend(chunks.iter().cloned());

            run.enter(RunState::Assembling);
            // Nothing found so far fits even the whole budget: stop before
            // paying for hop generations whose context would be discarded.
            let known = retrieved.iter().chain(prefetched.iter().flatten());
            self.assembler.check_budget(known, options.token_budget)?;

            let window = self.assembler.assemble(chunks, hop_budget);
            if window.is_empty() && found > 0 {
                tracing::warn!(
                    "Hop {} found {} chunks but none fit the {}-token hop budget",
                    i + 1,
                    found,
                    hop_budget
                );
            }

            run.enter(RunState::Generating);
            let prompt = PromptBuilder::build_hop_prompt(
                &sub_questions[i].text,
                &sub_questions[..i],
                &PromptBuilder::build_context(&window),
            );
            match self.generate_hop(run, &prompt).await? {
                Generated::Complete(answer) => {
                    tracing::info!("Hop {}/{} answered: {}", i + 1, hops, sub_questions[i].text);
                    sub_questions[i].answer = Some(answer.trim().to_string());
                }
                Generated::Cancelled(_) => {
                    tracing::warn!("Cancelled during hop {}", i + 1);
                    cancelled = true;
                    break;
                }
                Generated::Abandoned => return Ok(None),
            }

            hop_context.extend(window.chunks().cloned());
        }

        // If every hop window came out empty, fall back to everything found
        // so an undersized budget is still reported.
        let candidates = if hop_context.is_empty() { retrieved.clone() } else { hop_context };

        run.enter(RunState::Assembling);
        let window = self.assembler.assemble_checked(candidates, options.token_budget)?;

        Ok(Some(Grounding {
            window,
            sub_questions,
            chunks_retrieved: retrieved.len(),
            cancelled,
        }))
    }

    /// Intermediate answers are collected whole, never streamed to the caller
    async fn generate_hop(&self, run: &mut RunContext, prompt: &str) -> Result<Generated> {
        let llm = &self.llm;
        let call = self.retry.call(Port::Generation, "Hop generation", move || async move {
            llm.generate(prompt, false)
                .await?
                .into_text()
                .await
                .map_err(|e| e.for_port(Port::Generation))
        });

        tokio::select! {
            biased;
            _ = cancelled(&mut run.cancel) => Ok(Generated::Cancelled(String::new())),
            _ = run.events.closed() => Ok(Generated::Abandoned),
            answer = call => answer.map(Generated::Complete),
        }
    }

    /// Final answer; retries cover opening the stream, not a broken stream
    async fn generate_answer(&self, run: &mut RunContext, prompt: &str, stream: bool) -> Result<Generated> {
        let llm = &self.llm;
        let generation = self
            .retry
            .call(Port::Generation, "Answer generation", move || async move {
                llm.generate(prompt, stream)
                    .await
                    .map_err(|e| e.for_port(Port::Generation))
            })
            .await?;

        let mut fragments = match generation {
            Generation::Text(text) => {
                if stream && !text.is_empty() && !run.emit(RagEvent::Fragment { content: text.clone() }).await {
                    return Ok(Generated::Abandoned);
                }
                return Ok(Generated::Complete(text));
            }
            Generation::Stream(fragments) => fragments,
        };

        let fragment_timeout = self.retry.timeout();
        let mut answer = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(&mut run.cancel) => return Ok(Generated::Cancelled(answer)),
                _ = run.events.closed() => return Ok(Generated::Abandoned),
                next = tokio::time::timeout(fragment_timeout, fragments.next()) => next,
            };

            match next {
                Err(_) => return Err(Error::timeout(Port::Generation, fragment_timeout)),
                Ok(None) => return Err(Error::generation("stream ended without end-of-stream marker")),
                Ok(Some(Err(e))) => return Err(e.for_port(Port::Generation)),
                Ok(Some(Ok(StreamItem::End))) => return Ok(Generated::Complete(answer)),
                Ok(Some(Ok(StreamItem::Fragment(fragment)))) => {
                    answer.push_str(&fragment);
                    if stream && !run.emit(RagEvent::Fragment { content: fragment }).await {
                        return Ok(Generated::Abandoned);
                    }
                }
            }
        }
    }
}
