//! Shared application state for request handlers.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::jobs::JobStore;
use crate::ranking::{MemberDirectory, PipelineSettings, RankingPipeline};
use crate::source::MessageSource;

/// Shared application state, cloneable across handlers via Arc-wrapped fields.
///
/// The job store and member cache live here so every job and request sees
/// the same ones.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub source: Arc<dyn MessageSource>,
    pub jobs: JobStore,
    pub pipeline: Arc<RankingPipeline>,
}

impl AppState {
    pub fn new(config: AppConfig, source: Arc<dyn MessageSource>) -> Self {
        let jobs = JobStore::from_config(&config.jobs);
        let members = MemberDirectory::new(source.clone(), &config.cache);
        let pipeline = RankingPipeline::new(
            source.clone(),
            members,
            PipelineSettings::from(&config.ranking),
        );

        Self {
            config: Arc::new(config),
            source,
            jobs,
            pipeline: Arc::new(pipeline),
        }
    }
}
