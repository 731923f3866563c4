use async_trait::async_trait;
use portier_queue::{TaskError, TaskHandler};
use tracing::info;

use super::ReportTask;

/// Report generation is a placeholder: it records that the report was requested.
#[derive(Default)]
pub struct ReportTaskHandler;

#[async_trait]
impl TaskHandler for ReportTaskHandler {
    type Task = ReportTask;

    async fn handle(&self, task: ReportTask) -> Result<(), TaskError> {
        match task {
            ReportTask::GenerateReport { name } => {
                if name.trim().is_empty() {
                    return Err(TaskError::new("report name is empty"));
                }
                info!(report = %name, "report generated");
                metrics::counter!("portier_reports_generated_total").increment(1);
            }
        }
        Ok(())
    }
}
