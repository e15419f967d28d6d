//! auditflow-server entry point.
//!
//! Loads settings, wires the collaborators and serves the HTTP API.

use anyhow::Context;
use auditflow::audit::AuditRunner;
use auditflow::config::Settings;
use auditflow::http::{router, AppState};
use auditflow::jobs::JobManager;
use auditflow::observability::{init_tracing, LogFormat};
use auditflow::services::{
    AuditRepository, AuditServices, DisabledInsightAgent, HttpAnalysisEngine, InMemoryRepository,
    InsightAgent, LlmInsightAgent,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Model audit orchestration service.
#[derive(Parser, Debug)]
#[command(name = "auditflow-server")]
#[command(about = "Serve model audit pipelines over HTTP")]
#[command(version)]
struct Cli {
    /// JSON settings file; flags and environment override it.
    #[arg(long, env = "AUDITFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long, env = "AUDITFLOW_BIND_ADDR")]
    bind: Option<String>,

    /// Base URL of the analysis worker.
    #[arg(long, env = "AUDITFLOW_ANALYSIS_URL")]
    analysis_url: Option<String>,

    /// JSON catalog of datasets and models.
    #[arg(long, env = "AUDITFLOW_CATALOG")]
    catalog: Option<PathBuf>,

    /// Maximum pipelines running at once.
    #[arg(long, env = "AUDITFLOW_MAX_CONCURRENT_JOBS")]
    max_concurrent_jobs: Option<usize>,

    /// Event stream poll interval in milliseconds.
    #[arg(long, env = "AUDITFLOW_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// OpenAI-compatible API base for insights.
    #[arg(long, env = "AUDITFLOW_LLM_API_BASE")]
    llm_api_base: Option<String>,

    /// API key for the insight LLM.
    #[arg(long, env = "AUDITFLOW_LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Insight model name.
    #[arg(long, env = "AUDITFLOW_LLM_MODEL")]
    llm_model: Option<String>,

    /// Log output format (pretty, json).
    #[arg(long, env = "AUDITFLOW_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(short, long, env = "AUDITFLOW_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    fn settings(self) -> anyhow::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_file(path)
                .with_context(|| format!("loading settings from {}", path.display()))?,
            None => Settings::new(),
        };

        if let Some(bind) = self.bind {
            settings = settings.with_bind_addr(bind);
        }
        if let Some(url) = self.analysis_url {
            settings = settings.with_analysis_service_url(url);
        }
        if let Some(catalog) = self.catalog {
            settings = settings.with_catalog_path(catalog);
        }
        if let Some(jobs) = self.max_concurrent_jobs {
            settings = settings.with_max_concurrent_jobs(jobs);
        }
        if let Some(ms) = self.poll_interval_ms {
            settings = settings.with_poll_interval_ms(ms);
        }
        if let Some(format) = self.log_format {
            settings = settings.with_log_format(format);
        }
        if let Some(level) = self.log_level {
            settings.log_filter = level;
        }

        let mut llm = settings.llm.clone();
        if self.llm_api_base.is_some() {
            llm.api_base = self.llm_api_base;
        }
        if self.llm_api_key.is_some() {
            llm.api_key = self.llm_api_key;
        }
        if let Some(model) = self.llm_model {
            llm.model = model;
        }
        settings = settings.with_llm(llm);

        settings.validate()?;
        Ok(settings)
    }
}

fn build_services(settings: &Settings) -> anyhow::Result<AuditServices> {
    let repository: Arc<dyn AuditRepository> = match &settings.catalog_path {
        Some(path) => Arc::new(InMemoryRepository::load_catalog(path)?),
        None => {
            warn!("No catalog configured; every dataset and model lookup will miss");
            Arc::new(InMemoryRepository::new())
        }
    };

    let engine = HttpAnalysisEngine::new(&settings.analysis_service_url, settings.analysis_timeout())
        .context("building analysis client")?;
    info!(url = engine.base_url(), "Using analysis worker");

    let agent: Arc<dyn InsightAgent> = match settings.llm.api_base.as_deref() {
        Some(base) if settings.llm.is_enabled() => {
            let agent = LlmInsightAgent::new(
                base,
                settings.llm.api_key.clone(),
                &settings.llm.model,
                Duration::from_secs(settings.llm.timeout_secs),
            )?;
            info!(model = agent.model(), "Insight agent enabled");
            Arc::new(agent)
        }
        _ => {
            info!("Insight agent disabled");
            Arc::new(DisabledInsightAgent)
        }
    };

    Ok(AuditServices::new(repository, Arc::new(engine)).with_agent(agent))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Cli::parse().settings()?;
    init_tracing(settings.log_format, &settings.log_filter);

    let services = build_services(&settings)?;
    let runner = AuditRunner::new(services, &settings)?;
    let jobs = JobManager::in_memory(runner, settings.job_settings());
    let app = router(AppState::new(jobs));

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    info!(addr = %settings.bind_addr, "auditflow-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
