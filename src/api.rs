//! REST API server for the retrieval engine
//!
//! Provides HTTP endpoints for:
//! - Document ingestion and lifecycle
//! - Hybrid search and enhanced querying
//! - Reasoning (causal, comparative, multi-hop)
//! - Knowledge-graph projections and statistics

use crate::bm25::KeywordIndex;
use crate::cache::RetrievalCache;
use crate::chunker::ContentChunker;
use crate::config::EngineConfig;
use crate::embedder::{build_embedder, Embedder};
use crate::error::{EngineError, ErrorKind, Result};
use crate::extraction::{build_ner, Extractor};
use crate::graph::{
    GraphFilter, GraphProjection, GraphStats, GraphStore, InMemoryGraphStore, RelationView,
};
use crate::ingest::{ChunkCatalog, DocumentListing, IngestionPipeline};
use crate::llm::{build_llm, LlmClient};
use crate::planner::QueryPlanner;
use crate::reasoning::ReasoningEngine;
use crate::retriever::{HybridRetriever, RetrievalOptions};
use crate::types::{
    QueryPlan, ReasoningMode, ReasoningPath, ResponseStatus, RetrievedContext, StrategyComponent,
    StrategyKind,
};
use crate::vector::{InMemoryVectorStore, SqliteVectorStore, VectorStore};
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::{OpenApi, ToSchema};

/// Shared application state: the service container built at startup
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub pipeline: Arc<IngestionPipeline>,
    pub planner: Arc<QueryPlanner>,
    pub retriever: Arc<HybridRetriever>,
    pub reasoner: Arc<ReasoningEngine>,
    pub graph: Arc<dyn GraphStore>,
    pub vector: Arc<dyn VectorStore>,
    pub llm: Arc<dyn LlmClient>,
}

impl AppState {
    /// Wire every component from configuration
    pub async fn new(config: EngineConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let dimension = config.vector_store.embedding_dimension;
        let embedder: Arc<dyn Embedder> = build_embedder(&config.embedding, dimension)?;
        let ner = build_ner(&config.ner)?;
        let llm = build_llm(&config.llm)?;

        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let vector: Arc<dyn VectorStore> = match config.vector_store.mode.as_str() {
            "sqlite" => Arc::new(SqliteVectorStore::connect(&config.vector_store).await?),
            _ => Arc::new(InMemoryVectorStore::new(dimension)),
        };
        let keyword = Arc::new(RwLock::new(KeywordIndex::new(
            config.retrieval.bm25_k1,
            config.retrieval.bm25_b,
        )));
        let catalog = Arc::new(ChunkCatalog::new());
        let cache = Arc::new(RetrievalCache::new(config.cache.clone()));

        let mut chunker = ContentChunker::new(config.chunking.clone());
        if config.chunking.strategy == "semantic" {
            chunker = chunker.with_embedder(Arc::clone(&embedder));
        }
        let extractor = Extractor::new(Arc::clone(&ner), config.extraction.clone());

        let pipeline = Arc::new(IngestionPipeline::new(
            chunker,
            extractor,
            Arc::clone(&embedder),
            Arc::clone(&graph),
            Arc::clone(&vector),
            Arc::clone(&keyword),
            Arc::clone(&catalog),
            config.extraction.max_attempts,
            config.extraction.backoff_base_ms,
        ));
        let planner = Arc::new(QueryPlanner::new(
            config.planner.clone(),
            ner,
            Arc::clone(&graph),
            Arc::clone(&llm),
        ));
        let retriever = Arc::new(HybridRetriever::new(
            config.retrieval.clone(),
            embedder,
            Arc::clone(&vector),
            Arc::clone(&graph),
            keyword,
            catalog,
            cache,
        ));
        let reasoner = Arc::new(ReasoningEngine::new(
            config.reasoning.clone(),
            Arc::clone(&graph),
        ));

        Ok(Self {
            config: Arc::new(config),
            pipeline,
            planner,
            retriever,
            reasoner,
            graph,
            vector,
            llm,
        })
    }

    /// Probe both stores; used at startup and by the health endpoint
    pub async fn health_check(&self) -> Result<()> {
        self.graph.health_check().await?;
        self.vector.health_check().await?;
        Ok(())
    }

    /// Plan, optionally pin a single strategy, and retrieve
    async fn run_search(
        &self,
        query: &str,
        pinned: Option<StrategyKind>,
        top_k: Option<usize>,
        domain: Option<String>,
    ) -> Result<(QueryPlan, RetrievedContext)> {
        let mut plan = self.planner.plan(query).await?;
        if let Some(kind) = pinned {
            plan.components = vec![StrategyComponent { kind, weight: 1.0 }];
        }
        let options = RetrievalOptions { top_k, domain };
        let context = self
            .retriever
            .retrieve(query, &plan, &options, self.pipeline.generation())
            .await?;
        Ok((plan, context))
    }
}

// ============= Wire types =============

#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    /// The natural-language query
    #[schema(example = "Where is Acme located?")]
    pub query: String,
    /// Fused chunks to return
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdvancedSearchRequest {
    pub query: String,
    /// One of vector, graph, keyword, hybrid
    #[serde(default = "default_search_type")]
    pub search_type: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub domain: Option<String>,
}

fn default_search_type() -> String {
    "hybrid".to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MultiHopRequest {
    pub query: String,
    /// Traversal depth override, 1–4
    #[serde(default)]
    pub max_hops: Option<u32>,
}

/// Planner summary attached to search responses
#[derive(Debug, Serialize, ToSchema)]
pub struct QueryAnalysis {
    pub intent_type: String,
    pub confidence: f32,
    pub entities: Vec<String>,
    pub strategy: Vec<StrategyComponent>,
    pub complexity: String,
    pub reasoning_required: bool,
    pub max_hops: u32,
}

impl From<&QueryPlan> for QueryAnalysis {
    fn from(plan: &QueryPlan) -> Self {
        Self {
            intent_type: plan.intent.to_string(),
            confidence: plan.confidence,
            entities: plan.entities.iter().map(|e| e.name.clone()).collect(),
            strategy: plan.components.clone(),
            complexity: format!("{:?}", plan.complexity).to_lowercase(),
            reasoning_required: plan.reasoning != ReasoningMode::None,
            max_hops: plan.max_hops,
        }
    }
}

/// One search hit
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub score: f32,
    pub section_path: Vec<String>,
    pub domain: String,
    pub strategies: Vec<StrategyKind>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    pub status: ResponseStatus,
    pub query: String,
    pub search_type: String,
    pub results: Vec<SearchHit>,
    pub query_analysis: QueryAnalysis,
    pub degraded_strategies: Vec<StrategyKind>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EnhancedQueryResponse {
    pub status: ResponseStatus,
    pub query: String,
    pub answer: String,
    /// True when the LLM was skipped or failed and the fused context stands
    /// in for a synthesized answer
    pub degraded: bool,
    pub confidence: f32,
    pub chunks: Vec<SearchHit>,
    pub reasoning_paths: Vec<ReasoningPath>,
    pub degraded_strategies: Vec<StrategyKind>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReasoningResponse {
    pub status: ResponseStatus,
    pub query: String,
    pub reasoning_type: String,
    pub paths: Vec<ReasoningPath>,
    pub query_analysis: QueryAnalysis,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IntentResponse {
    pub status: ResponseStatus,
    pub intent_type: String,
    pub confidence: f32,
    pub entities: Vec<String>,
    pub strategy: Vec<StrategyComponent>,
    pub complexity: String,
    pub reasoning_required: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestParams {
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_true")]
    pub build_knowledge_graph: bool,
}

fn default_domain() -> String {
    "general".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IngestFileResult {
    pub name: String,
    pub status: ResponseStatus,
    pub chunks: usize,
    pub entities: usize,
    pub relations: usize,
    pub failed_chunks: usize,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IngestResponse {
    pub status: ResponseStatus,
    pub results: Vec<IngestFileResult>,
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ExportParams {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub max_entities: Option<usize>,
    #[serde(default)]
    pub max_relations: Option<usize>,
    #[serde(default)]
    pub min_occurrence: Option<u64>,
}

fn default_format() -> String {
    "json".to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TopEntitiesParams {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_min_occurrence")]
    pub min_occurrence: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TopRelationsParams {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub relation_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_min_occurrence")]
    pub min_weight: u64,
}

fn default_limit() -> usize {
    20
}

fn default_min_occurrence() -> u64 {
    1
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatsParams {
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DomainsResponse {
    pub domains: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SupportedFormatsResponse {
    pub formats: Vec<String>,
    pub knowledge_graph: bool,
    pub semantic_chunking: bool,
    pub llm_answers: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub status: ResponseStatus,
    pub error: String,
    pub kind: String,
    pub reason: String,
}

/// Error wrapper mapping engine error kinds onto HTTP status codes
#[derive(Debug)]
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::TransientDependency | ErrorKind::PermanentDependency => {
                StatusCode::BAD_GATEWAY
            }
            ErrorKind::DataIntegrity | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorResponse {
            status: ResponseStatus::Error,
            error: self.0.to_string(),
            kind: self.0.kind().as_str().to_string(),
            reason: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        ingest_documents_handler,
        list_documents_handler,
        delete_document_handler,
        clear_all_handler,
        search_handler,
        search_advanced_handler,
        enhanced_query_handler,
        analyze_query_intent_handler,
        advanced_reasoning_handler,
        causal_reasoning_handler,
        comparative_reasoning_handler,
        multi_hop_reasoning_handler,
        kg_export_handler,
        kg_filtered_handler,
        kg_top_entities_handler,
        kg_top_relations_handler,
        kg_stats_handler,
        kg_domains_handler,
        supported_formats_handler,
    ),
    components(schemas(
        SearchRequest,
        AdvancedSearchRequest,
        QueryRequest,
        MultiHopRequest,
        SearchResponse,
        SearchHit,
        QueryAnalysis,
        EnhancedQueryResponse,
        ReasoningResponse,
        IntentResponse,
        IngestResponse,
        IngestFileResult,
        DomainsResponse,
        SupportedFormatsResponse,
        HealthResponse,
        ErrorResponse,
        DocumentListing,
        crate::types::DocumentRecord,
        crate::types::DocumentStatus,
        crate::types::Entity,
        crate::types::Relation,
        crate::types::ReasoningPath,
        crate::types::ReasoningKind,
        crate::types::StrategyComponent,
        crate::types::StrategyKind,
        crate::types::ResponseStatus,
        GraphFilter,
        GraphProjection,
        GraphStats,
        RelationView,
        crate::graph::ProjectionTotals,
        crate::graph::SortBy,
        crate::graph::SortOrder,
    )),
    tags(
        (name = "documents", description = "Ingestion and lifecycle"),
        (name = "search", description = "Hybrid retrieval"),
        (name = "reasoning", description = "Graph reasoning"),
        (name = "knowledge-graph", description = "Projections and statistics")
    ),
    info(
        title = "GraphFusion API",
        description = "Hybrid GraphRAG retrieval and fusion engine"
    )
)]
struct ApiDoc;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Documents
        .route("/ingest-documents", post(ingest_documents_handler))
        .route("/documents/list", get(list_documents_handler))
        .route("/documents/{name}", delete(delete_document_handler))
        .route("/clear-all", delete(clear_all_handler))
        // Search
        .route("/search", post(search_handler))
        .route("/search-advanced", post(search_advanced_handler))
        .route("/enhanced-query", post(enhanced_query_handler))
        .route("/analyze-query-intent", post(analyze_query_intent_handler))
        // Reasoning
        .route("/advanced-reasoning", post(advanced_reasoning_handler))
        .route("/causal-reasoning", post(causal_reasoning_handler))
        .route("/comparative-reasoning", post(comparative_reasoning_handler))
        .route("/multi-hop-reasoning", post(multi_hop_reasoning_handler))
        // Knowledge graph
        .route("/knowledge-graph/export", get(kg_export_handler))
        .route("/knowledge-graph/filtered", post(kg_filtered_handler))
        .route("/knowledge-graph/top-entities", get(kg_top_entities_handler))
        .route("/knowledge-graph/top-relations", get(kg_top_relations_handler))
        .route("/knowledge-graph/stats", get(kg_stats_handler))
        .route("/knowledge-graph/domains", get(kg_domains_handler))
        .route("/supported-formats", get(supported_formats_handler))
        // OpenAPI spec endpoint
        .route("/api-docs/openapi.json", get(openapi_spec_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the process is stopped
pub async fn start_server(state: AppState, host: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    info!("Starting API server on {}", addr);

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::Config(format!("failed to bind {}: {}", addr, e)))?;

    info!("API server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .map_err(|e| EngineError::Generic(anyhow::anyhow!("server error: {}", e)))?;
    Ok(())
}

async fn openapi_spec_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn hits_from(context: &RetrievedContext) -> Vec<SearchHit> {
    context
        .chunks
        .iter()
        .map(|ranked| SearchHit {
            chunk_id: ranked.chunk.id.clone(),
            document_id: ranked.chunk.document_id.clone(),
            text: ranked.chunk.text.clone(),
            score: ranked.score,
            section_path: ranked.chunk.section_path.clone(),
            domain: ranked.chunk.domain.clone(),
            strategies: ranked.strategies.clone(),
        })
        .collect()
}

fn context_status(context: &RetrievedContext) -> ResponseStatus {
    if context.partial {
        ResponseStatus::Partial
    } else {
        ResponseStatus::Success
    }
}

fn degraded_reason(context: &RetrievedContext) -> Option<String> {
    if context.degraded_strategies.is_empty() {
        None
    } else {
        Some(format!(
            "strategies degraded: {}",
            context
                .degraded_strategies
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service health", body = HealthResponse))
)]
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let healthy = state.health_check().await.is_ok();
    Json(HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Ingest uploaded documents
#[utoipa::path(
    post,
    path = "/ingest-documents",
    tag = "documents",
    responses(
        (status = 200, description = "Per-file ingestion outcomes", body = IngestResponse),
        (status = 400, description = "Invalid upload", body = ErrorResponse)
    )
)]
async fn ingest_documents_handler(
    State(state): State<AppState>,
    Query(params): Query<IngestParams>,
    mut multipart: Multipart,
) -> ApiResult<Json<IngestResponse>> {
    let mut results = Vec::new();
    let mut successful = 0usize;
    let mut failed = 0usize;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| EngineError::InvalidInput(format!("bad multipart payload: {}", e)))?
    {
        let name = field
            .file_name()
            .or(field.name())
            .unwrap_or("upload")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| EngineError::InvalidInput(format!("unreadable upload {}: {}", name, e)))?;

        match state
            .pipeline
            .ingest(&name, &bytes, &params.domain, params.build_knowledge_graph)
            .await
        {
            Ok(record) => {
                successful += 1;
                results.push(IngestFileResult {
                    name: record.name.clone(),
                    status: match record.status {
                        crate::types::DocumentStatus::Partial => ResponseStatus::Partial,
                        _ => ResponseStatus::Success,
                    },
                    chunks: record.chunk_count,
                    entities: record.entity_count,
                    relations: record.relation_count,
                    failed_chunks: record.failed_chunks,
                    reason: record.reason,
                });
            }
            Err(e) => {
                warn!("ingestion failed for {}: {}", name, e);
                failed += 1;
                results.push(IngestFileResult {
                    name,
                    status: ResponseStatus::Error,
                    chunks: 0,
                    entities: 0,
                    relations: 0,
                    failed_chunks: 0,
                    reason: Some(e.to_string()),
                });
            }
        }
    }

    if results.is_empty() {
        return Err(EngineError::InvalidInput("no files uploaded".to_string()).into());
    }

    let any_partial = results
        .iter()
        .any(|r| r.status == ResponseStatus::Partial);
    let status = if failed == results.len() {
        ResponseStatus::Error
    } else if failed > 0 || any_partial {
        ResponseStatus::Partial
    } else {
        ResponseStatus::Success
    };

    Ok(Json(IngestResponse {
        status,
        total_files: results.len(),
        successful,
        failed,
        reason: (failed > 0).then(|| format!("{} files failed", failed)),
        results,
    }))
}

/// List ingested documents
#[utoipa::path(
    get,
    path = "/documents/list",
    tag = "documents",
    responses((status = 200, description = "Document registry", body = DocumentListing))
)]
async fn list_documents_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<DocumentListing>> {
    Ok(Json(state.pipeline.list_documents().await?))
}

/// Delete one document and all of its assets
#[utoipa::path(
    delete,
    path = "/documents/{name}",
    tag = "documents",
    params(("name" = String, Path, description = "Document name")),
    responses((status = 200, description = "Deletion outcome"))
)]
async fn delete_document_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let existed = state.pipeline.delete_document(&name).await?;
    Ok(Json(serde_json::json!({
        "status": "success",
        "document": name,
        "existed": existed,
    })))
}

/// Wipe all stores
#[utoipa::path(
    delete,
    path = "/clear-all",
    tag = "documents",
    responses((status = 200, description = "Stores cleared"))
)]
async fn clear_all_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state.pipeline.clear_all().await?;
    Ok(Json(serde_json::json!({ "status": "success" })))
}

/// Basic hybrid search
#[utoipa::path(
    post,
    path = "/search",
    tag = "search",
    request_body = SearchRequest,
    responses((status = 200, description = "Fused results", body = SearchResponse))
)]
async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let (plan, context) = state
        .run_search(&request.query, None, request.top_k, None)
        .await?;
    Ok(Json(SearchResponse {
        status: context_status(&context),
        query: request.query,
        search_type: "hybrid".to_string(),
        results: hits_from(&context),
        query_analysis: QueryAnalysis::from(&plan),
        reason: degraded_reason(&context),
        degraded_strategies: context.degraded_strategies,
    }))
}

/// Search with an explicit strategy selection
#[utoipa::path(
    post,
    path = "/search-advanced",
    tag = "search",
    request_body = AdvancedSearchRequest,
    responses(
        (status = 200, description = "Fused results", body = SearchResponse),
        (status = 400, description = "Unknown search type", body = ErrorResponse)
    )
)]
async fn search_advanced_handler(
    State(state): State<AppState>,
    Json(request): Json<AdvancedSearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let pinned = match request.search_type.as_str() {
        "hybrid" => None,
        "vector" => Some(StrategyKind::Vector),
        "graph" => Some(StrategyKind::Graph),
        "keyword" => Some(StrategyKind::Keyword),
        other => {
            return Err(
                EngineError::InvalidInput(format!("unknown search_type: {}", other)).into(),
            )
        }
    };

    let (plan, context) = state
        .run_search(&request.query, pinned, request.top_k, request.domain)
        .await?;
    Ok(Json(SearchResponse {
        status: context_status(&context),
        query: request.query,
        search_type: request.search_type,
        results: hits_from(&context),
        query_analysis: QueryAnalysis::from(&plan),
        reason: degraded_reason(&context),
        degraded_strategies: context.degraded_strategies,
    }))
}

/// Plan, retrieve, reason and synthesize an answer
#[utoipa::path(
    post,
    path = "/enhanced-query",
    tag = "search",
    request_body = QueryRequest,
    responses((status = 200, description = "Synthesized answer", body = EnhancedQueryResponse))
)]
async fn enhanced_query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<EnhancedQueryResponse>> {
    let (plan, mut context) = state.run_search(&request.query, None, None, None).await?;
    context.paths = state.reasoner.reason(&plan, &context).await;

    let context_text = context
        .chunks
        .iter()
        .map(|ranked| ranked.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    // LLM failure falls back to the fused context as the answer body
    let (answer, degraded) = if context.chunks.is_empty() {
        (String::new(), true)
    } else if state.llm.is_available() {
        match state.llm.synthesize(&request.query, &context_text).await {
            Ok(answer) => (answer, false),
            Err(e) => {
                warn!("answer synthesis degraded: {}", e);
                (context_text.clone(), true)
            }
        }
    } else {
        (context_text.clone(), true)
    };

    Ok(Json(EnhancedQueryResponse {
        status: context_status(&context),
        query: request.query,
        answer,
        degraded,
        confidence: context.confidence,
        chunks: hits_from(&context),
        reasoning_paths: context.paths.clone(),
        reason: degraded_reason(&context),
        degraded_strategies: context.degraded_strategies,
    }))
}

/// Classify a query without retrieving
#[utoipa::path(
    post,
    path = "/analyze-query-intent",
    tag = "search",
    request_body = QueryRequest,
    responses((status = 200, description = "Plan summary", body = IntentResponse))
)]
async fn analyze_query_intent_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<IntentResponse>> {
    let plan = state.planner.plan(&request.query).await?;
    Ok(Json(IntentResponse {
        status: ResponseStatus::Success,
        intent_type: plan.intent.to_string(),
        confidence: plan.confidence,
        entities: plan.entities.iter().map(|e| e.name.clone()).collect(),
        strategy: plan.components.clone(),
        complexity: format!("{:?}", plan.complexity).to_lowercase(),
        reasoning_required: plan.reasoning != ReasoningMode::None,
    }))
}

async fn reasoning_response(
    state: &AppState,
    query: String,
    mode: Option<ReasoningMode>,
    max_hops: Option<u32>,
) -> ApiResult<Json<ReasoningResponse>> {
    let mut plan = state.planner.plan(&query).await?;
    if let Some(hops) = max_hops {
        plan.max_hops = hops.clamp(1, 4);
    }
    let mode = mode.unwrap_or(plan.reasoning);

    let options = RetrievalOptions::default();
    let context = state
        .retriever
        .retrieve(&query, &plan, &options, state.pipeline.generation())
        .await?;
    let paths = match mode {
        ReasoningMode::None => state.reasoner.reason_as(ReasoningMode::MultiHop, &plan, &context).await,
        _ => state.reasoner.reason_as(mode, &plan, &context).await,
    };

    let reasoning_type = match mode {
        ReasoningMode::None | ReasoningMode::MultiHop => "multi_hop",
        ReasoningMode::Causal => "causal",
        ReasoningMode::Comparative => "comparative",
    };

    Ok(Json(ReasoningResponse {
        status: if paths.is_empty() && context.partial {
            ResponseStatus::Partial
        } else {
            ResponseStatus::Success
        },
        query,
        reasoning_type: reasoning_type.to_string(),
        paths,
        query_analysis: QueryAnalysis::from(&plan),
        reason: degraded_reason(&context),
    }))
}

/// Reasoning with the mode chosen by the planner
#[utoipa::path(
    post,
    path = "/advanced-reasoning",
    tag = "reasoning",
    request_body = QueryRequest,
    responses((status = 200, description = "Reasoning paths", body = ReasoningResponse))
)]
async fn advanced_reasoning_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<ReasoningResponse>> {
    reasoning_response(&state, request.query, None, None).await
}

/// Causal chains for a query
#[utoipa::path(
    post,
    path = "/causal-reasoning",
    tag = "reasoning",
    request_body = QueryRequest,
    responses((status = 200, description = "Causal chains", body = ReasoningResponse))
)]
async fn causal_reasoning_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<ReasoningResponse>> {
    reasoning_response(&state, request.query, Some(ReasoningMode::Causal), None).await
}

/// Neighborhood comparison between query entities
#[utoipa::path(
    post,
    path = "/comparative-reasoning",
    tag = "reasoning",
    request_body = QueryRequest,
    responses((status = 200, description = "Comparison paths", body = ReasoningResponse))
)]
async fn comparative_reasoning_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<ReasoningResponse>> {
    reasoning_response(&state, request.query, Some(ReasoningMode::Comparative), None).await
}

/// Beam-searched multi-hop paths
#[utoipa::path(
    post,
    path = "/multi-hop-reasoning",
    tag = "reasoning",
    request_body = MultiHopRequest,
    responses((status = 200, description = "Multi-hop paths", body = ReasoningResponse))
)]
async fn multi_hop_reasoning_handler(
    State(state): State<AppState>,
    Json(request): Json<MultiHopRequest>,
) -> ApiResult<Json<ReasoningResponse>> {
    reasoning_response(
        &state,
        request.query,
        Some(ReasoningMode::MultiHop),
        request.max_hops,
    )
    .await
}

/// Bounded graph dump
#[utoipa::path(
    get,
    path = "/knowledge-graph/export",
    tag = "knowledge-graph",
    responses(
        (status = 200, description = "Bounded projection", body = GraphProjection),
        (status = 400, description = "Unsupported format", body = ErrorResponse)
    )
)]
async fn kg_export_handler(
    State(state): State<AppState>,
    Query(params): Query<ExportParams>,
) -> ApiResult<Json<GraphProjection>> {
    if params.format != "json" {
        return Err(
            EngineError::InvalidInput(format!("unsupported format: {}", params.format)).into(),
        );
    }
    let mut filter = GraphFilter {
        domain: params.domain,
        ..Default::default()
    };
    if let Some(max_entities) = params.max_entities {
        filter.max_entities = max_entities;
    }
    if let Some(max_relations) = params.max_relations {
        filter.max_relations = max_relations;
    }
    if let Some(min_occurrence) = params.min_occurrence {
        filter.min_occurrence = min_occurrence;
    }
    let filter = filter.validated()?;
    Ok(Json(state.graph.filtered_projection(&filter).await?))
}

/// Filtered projection with the full filter object
#[utoipa::path(
    post,
    path = "/knowledge-graph/filtered",
    tag = "knowledge-graph",
    request_body = GraphFilter,
    responses(
        (status = 200, description = "Bounded projection", body = GraphProjection),
        (status = 400, description = "Invalid filter", body = ErrorResponse)
    )
)]
async fn kg_filtered_handler(
    State(state): State<AppState>,
    Json(filter): Json<GraphFilter>,
) -> ApiResult<Json<GraphProjection>> {
    let filter = filter.validated()?;
    Ok(Json(state.graph.filtered_projection(&filter).await?))
}

/// Entities ranked by occurrence
#[utoipa::path(
    get,
    path = "/knowledge-graph/top-entities",
    tag = "knowledge-graph",
    responses((status = 200, description = "Top entities"))
)]
async fn kg_top_entities_handler(
    State(state): State<AppState>,
    Query(params): Query<TopEntitiesParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let entities = state
        .graph
        .top_entities(
            params.domain.as_deref(),
            params.entity_type.as_deref(),
            params.limit,
            params.min_occurrence,
        )
        .await?;
    Ok(Json(serde_json::json!({
        "status": "success",
        "count": entities.len(),
        "entities": entities,
    })))
}

/// Relations ranked by weight
#[utoipa::path(
    get,
    path = "/knowledge-graph/top-relations",
    tag = "knowledge-graph",
    responses((status = 200, description = "Top relations"))
)]
async fn kg_top_relations_handler(
    State(state): State<AppState>,
    Query(params): Query<TopRelationsParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let relations: Vec<RelationView> = state
        .graph
        .top_relations(
            params.domain.as_deref(),
            params.relation_type.as_deref(),
            params.limit,
            params.min_weight,
        )
        .await?;
    Ok(Json(serde_json::json!({
        "status": "success",
        "count": relations.len(),
        "relations": relations,
    })))
}

/// Graph statistics
#[utoipa::path(
    get,
    path = "/knowledge-graph/stats",
    tag = "knowledge-graph",
    responses((status = 200, description = "Counts and histograms", body = GraphStats))
)]
async fn kg_stats_handler(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> ApiResult<Json<GraphStats>> {
    Ok(Json(state.graph.stats(params.domain.as_deref()).await?))
}

/// Distinct domains
#[utoipa::path(
    get,
    path = "/knowledge-graph/domains",
    tag = "knowledge-graph",
    responses((status = 200, description = "Domains", body = DomainsResponse))
)]
async fn kg_domains_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<DomainsResponse>> {
    let domains = state.graph.domains().await?;
    Ok(Json(DomainsResponse {
        count: domains.len(),
        domains,
    }))
}

/// Accepted ingest formats and feature flags
#[utoipa::path(
    get,
    path = "/supported-formats",
    responses((status = 200, description = "Formats", body = SupportedFormatsResponse))
)]
async fn supported_formats_handler(
    State(state): State<AppState>,
) -> Json<SupportedFormatsResponse> {
    Json(SupportedFormatsResponse {
        formats: ["txt", "md", "csv", "json", "pdf"]
            .into_iter()
            .map(str::to_string)
            .collect(),
        knowledge_graph: true,
        semantic_chunking: state.config.chunking.strategy == "semantic",
        llm_answers: state.llm.is_available(),
    })
}
