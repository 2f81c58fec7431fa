use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::summary_request::{SummaryReason, SummaryRequest},
    },
};
use tracing::debug;

use crate::parser::{JsonDatumParser, ParsedBatch};

/// Collaborators the processor delegates to: payload parsing and
/// downstream summary recomputation.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn parse_raw_content(
        &self,
        content: &[u8],
        reference: &str,
    ) -> Result<ParsedBatch, AppError>;

    async fn maybe_update_summary(
        &self,
        user_id: &str,
        reasons: BTreeSet<SummaryReason>,
    ) -> Result<(), AppError>;
}

pub struct DefaultPipelineServices {
    db: Arc<SurrealDbClient>,
    parser: JsonDatumParser,
}

impl DefaultPipelineServices {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self {
            db,
            parser: JsonDatumParser::new(),
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn parse_raw_content(
        &self,
        content: &[u8],
        reference: &str,
    ) -> Result<ParsedBatch, AppError> {
        self.parser.parse(content, reference)
    }

    async fn maybe_update_summary(
        &self,
        user_id: &str,
        reasons: BTreeSet<SummaryReason>,
    ) -> Result<(), AppError> {
        let request = SummaryRequest::mark_outdated(&self.db, user_id, reasons).await?;
        debug!(
            user_id = %user_id,
            request_count = request.request_count,
            "summary marked outdated"
        );
        Ok(())
    }
}
