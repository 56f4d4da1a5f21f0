use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tia_ai::config::AppConfig;
use tia_ai::corpus::{CorpusCache, CorpusLoader};
use tia_ai::evidence::EvidenceAggregator;
use tia_ai::knowledge::KnowledgeStore;
use tia_ai::llm::{select_backend, ImageInput, ModelBackend};
use tia_ai::resolve::{AnswerResolver, Requester, Resolution};
use tia_ai::suggest::SuggestionEngine;
use tia_ai::vision::{ImageAnalysis, ImageAnalyzer};
use tia_ai::web::{HttpWebSearch, StaticWebDirectory, WebEvidenceProvider};
use tia_core::domain::{detect_locale, LogRecord, Locale, Modality, Query};
use tia_core::error::AppError;
use tia_core::querylog::{QueryLog, QueryLogStats, QueryLogWriter, StorageHealth, WriterStats};
use time::OffsetDateTime;
use tracing::info;

/// What the caller knows about one incoming question.
#[derive(Debug, Clone, Default)]
pub struct AskRequest {
    pub text: String,
    pub locale: Option<Locale>,
    pub declared_modality: Option<Modality>,
    pub has_image: bool,
    pub is_voice: bool,
    pub location: String,
    pub user_contact: String,
    pub clinic_or_region: String,
}

impl AskRequest {
    fn requester(&self) -> Requester {
        Requester {
            user_contact: self.user_contact.clone(),
            clinic_or_region: self.clinic_or_region.clone(),
        }
    }
}

/// A photo to analyze, with an optional question about it.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub image: ImageInput,
    pub question: Option<String>,
    pub locale: Option<Locale>,
    pub location: String,
    pub user_contact: String,
    pub clinic_or_region: String,
}

#[derive(Debug, serde::Serialize)]
pub struct ImageResponse {
    pub analysis: ImageAnalysis,
    pub storage_degraded: bool,
    pub log: WriterStats,
    pub lost_records: u64,
}

#[derive(Debug, serde::Serialize)]
pub struct AskResponse {
    pub resolution: Resolution,
    pub log: WriterStats,
    /// Records that reached diagnostics only, including ones refused before queueing.
    pub lost_records: u64,
}

/// Long-lived collaborators for one process.
pub struct Runtime {
    resolver: AnswerResolver,
    analyzer: ImageAnalyzer,
    writer: QueryLogWriter,
}

impl Runtime {
    /// Configuration errors are fatal here; every later failure is absorbed by the pipeline.
    pub fn start(config: &AppConfig) -> Result<Self, AppError> {
        let backend = select_backend(&config.backend, &config.credentials())?;
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: &AppConfig, backend: Arc<dyn ModelBackend>) -> Result<Self, AppError> {
        let web = web_provider(config)?;
        let corpus = Arc::new(CorpusCache::new(CorpusLoader::new(config.corpus.clone())));
        let aggregator = EvidenceAggregator::new(
            Arc::new(KnowledgeStore::builtin()),
            web,
            Arc::clone(&corpus),
            config.evidence.clone(),
        );
        let writer = QueryLogWriter::spawn(
            QueryLog::open(&config.query_log),
            config.query_log.channel_capacity,
        )?;
        let analyzer = ImageAnalyzer::new(Arc::clone(&corpus), Arc::clone(&backend), config.vision.clone());
        let resolver = AnswerResolver::new(aggregator, corpus, backend, config.resolver.clone())
            .with_query_log(writer.sink());
        info!(log = %config.query_log.path.display(), "runtime started");
        Ok(Self {
            resolver,
            analyzer,
            writer,
        })
    }

    pub fn ask(&self, request: &AskRequest) -> Result<Resolution, AppError> {
        let query = build_query(request)?;
        Ok(self.resolver.resolve_and_record(&query, &request.requester()))
    }

    /// Analyze a photo and log it as an image query. Returns the analysis and whether
    /// storage is degraded.
    pub fn analyze_image(&self, request: &ImageRequest) -> Result<(ImageAnalysis, bool), AppError> {
        let locale = request.locale.unwrap_or_default();
        let analysis = self
            .analyzer
            .analyze(&request.image, request.question.as_deref(), locale);
        let query = Query::new(&analysis.question, locale, Modality::Image, &request.location)?;
        let requester = Requester {
            user_contact: request.user_contact.clone(),
            clinic_or_region: request.clinic_or_region.clone(),
        };
        let degraded = self.resolver.record(&query, &requester, &analysis.text);
        Ok((analysis, degraded))
    }

    /// Wait for queued log records, then stop the writer.
    pub fn shutdown(self) -> Result<WriterStats, AppError> {
        let Runtime {
            resolver,
            analyzer,
            writer,
        } = self;
        drop(resolver);
        drop(analyzer);
        writer.shutdown()
    }

    fn drain(self) -> Result<(WriterStats, Arc<StorageHealth>), AppError> {
        let health = self.writer.health();
        let stats = self.shutdown()?;
        Ok((stats, health))
    }

    /// Answer one question and drain the log, so the storage signal reflects the
    /// write that belongs to this answer.
    pub fn ask_and_shutdown(self, request: &AskRequest) -> Result<AskResponse, AppError> {
        let resolution = self.ask(request);
        let (log, health) = self.drain()?;
        let mut resolution = resolution?;
        if health.is_degraded() {
            resolution.signal.storage_degraded = true;
        }
        Ok(AskResponse {
            resolution,
            log,
            lost_records: health.lost_records(),
        })
    }

    pub fn analyze_image_and_shutdown(self, request: &ImageRequest) -> Result<ImageResponse, AppError> {
        let analyzed = self.analyze_image(request);
        let (log, health) = self.drain()?;
        let (analysis, degraded) = analyzed?;
        Ok(ImageResponse {
            analysis,
            storage_degraded: degraded || health.is_degraded(),
            log,
            lost_records: health.lost_records(),
        })
    }
}

fn web_provider(config: &AppConfig) -> Result<Arc<dyn WebEvidenceProvider>, AppError> {
    match config.web_search_url.as_deref() {
        Some(url) => {
            let timeout = Duration::from_millis(config.evidence.web_timeout_ms.max(1));
            Ok(Arc::new(HttpWebSearch::new(url, timeout)?))
        }
        None => Ok(Arc::new(StaticWebDirectory::default())),
    }
}

/// Voice transcripts pick their answer language from the script when none is given.
pub fn build_query(request: &AskRequest) -> Result<Query, AppError> {
    let modality = Modality::resolve(request.has_image, request.is_voice, request.declared_modality);
    let locale = match (request.locale, modality) {
        (Some(locale), _) => locale,
        (None, Modality::Voice) => detect_locale(&request.text),
        (None, _) => Locale::default(),
    };
    Query::new(&request.text, locale, modality, &request.location)
}

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, AppError> {
    AppConfig::load(path)
}

pub fn log_recent(config: &AppConfig, limit: usize) -> Result<Vec<LogRecord>, AppError> {
    QueryLog::open(&config.query_log).recent(limit)
}

pub fn log_stats(config: &AppConfig) -> Result<QueryLogStats, AppError> {
    QueryLog::open(&config.query_log).stats(OffsetDateTime::now_utc())
}

pub fn ask_once(config: &AppConfig, request: &AskRequest) -> Result<AskResponse, AppError> {
    Runtime::start(config)?.ask_and_shutdown(request)
}

pub fn analyze_image_once(config: &AppConfig, request: &ImageRequest) -> Result<ImageResponse, AppError> {
    Runtime::start(config)?.analyze_image_and_shutdown(request)
}

/// Suggestions are not logged, so no writer is started.
pub fn suggest_once(config: &AppConfig, input: &str, locale: Locale) -> Result<Vec<String>, AppError> {
    let backend = select_backend(&config.backend, &config.credentials())?;
    let engine = SuggestionEngine::new(backend, config.suggest.clone());
    Ok(engine.suggest(input, locale))
}
