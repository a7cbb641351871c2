use crate::domain::jobs::{ProcessingOutcome, VideoRecord, VideoStatus};
use crate::error::RepositoryError;
use crate::ports::repository::VideoRepository;
use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

/// DynamoAdapter implements VideoRepository for AWS DynamoDB, one item per
/// video keyed by `video_id`.
#[derive(Clone)]
pub struct DynamoAdapter {
    client: Client,
    table_name: String,
}

impl DynamoAdapter {
    pub fn new(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }

    /// Create the item of a freshly uploaded video.
    pub async fn put_video_record(&self, record: &VideoRecord) -> Result<(), RepositoryError> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(record_to_item(record)?))
            .send()
            .await
            .map_err(|e| backend(DisplayErrorContext(&e)))?;
        Ok(())
    }
}

fn backend(err: impl ToString) -> RepositoryError {
    RepositoryError::Backend(err.to_string())
}

fn string_attr(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name).and_then(|v| v.as_s().ok()).cloned()
}

fn record_to_item(record: &VideoRecord) -> Result<HashMap<String, AttributeValue>, RepositoryError> {
    Ok(HashMap::from([
        ("video_id".to_string(), AttributeValue::S(record.id.to_string())),
        ("storage_key".to_string(), AttributeValue::S(record.storage_key.clone())),
        ("user_id".to_string(), AttributeValue::S(record.user_id.clone())),
        ("status".to_string(), AttributeValue::S(record.status.to_string())),
        (
            "master_manifest_url".to_string(),
            AttributeValue::S(record.master_manifest_url.clone()),
        ),
        (
            "renditions".to_string(),
            AttributeValue::S(serde_json::to_string(&record.renditions)?),
        ),
    ]))
}

fn record_from_item(item: &HashMap<String, AttributeValue>) -> Result<VideoRecord, RepositoryError> {
    let id = string_attr(item, "video_id")
        .ok_or_else(|| backend("item has no video_id"))?
        .parse::<Uuid>()
        .map_err(backend)?;
    let status = string_attr(item, "status")
        .unwrap_or_else(|| VideoStatus::Uploaded.to_string())
        .parse::<VideoStatus>()
        .map_err(backend)?;
    let renditions = match string_attr(item, "renditions") {
        Some(json) => serde_json::from_str(&json)?,
        None => Vec::new(),
    };

    Ok(VideoRecord {
        id,
        storage_key: string_attr(item, "storage_key").unwrap_or_default(),
        user_id: string_attr(item, "user_id").unwrap_or_default(),
        status,
        master_manifest_url: string_attr(item, "master_manifest_url").unwrap_or_default(),
        renditions,
    })
}

#[async_trait]
impl VideoRepository for DynamoAdapter {
    async fn get_video_record(
        &self,
        video_id: Uuid,
    ) -> Result<Option<VideoRecord>, RepositoryError> {
        let resp = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("video_id", AttributeValue::S(video_id.to_string()))
            .send()
            .await
            .map_err(|e| backend(DisplayErrorContext(&e)))?;

        resp.item.as_ref().map(record_from_item).transpose()
    }

    async fn update_video_status(
        &self,
        video_id: Uuid,
        status: VideoStatus,
    ) -> Result<(), RepositoryError> {
        self.client
            .update_item()
            .table_name(&self.table_name)
            .key("video_id", AttributeValue::S(video_id.to_string()))
            .condition_expression("attribute_exists(video_id)")
            .update_expression("SET #status = :status, updated_at = :now")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", AttributeValue::S(status.to_string()))
            .expression_attribute_values(":now", AttributeValue::S(Utc::now().to_rfc3339()))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|s| s.is_conditional_check_failed_exception())
                {
                    RepositoryError::NotFound(video_id)
                } else {
                    backend(DisplayErrorContext(&e))
                }
            })?;
        Ok(())
    }

    async fn save_outcome(&self, outcome: &ProcessingOutcome) -> Result<(), RepositoryError> {
        let video_id = outcome.video_id;
        self.client
            .update_item()
            .table_name(&self.table_name)
            .key("video_id", AttributeValue::S(video_id.to_string()))
            .condition_expression("attribute_exists(video_id)")
            .update_expression(
                "SET #status = :status, master_manifest_url = :url, renditions = :renditions, \
                 compression_ratio = :ratio, processed_at = :processed_at, updated_at = :now",
            )
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", AttributeValue::S(outcome.status.to_string()))
            .expression_attribute_values(
                ":url",
                AttributeValue::S(outcome.master_manifest_url.clone()),
            )
            .expression_attribute_values(
                ":renditions",
                AttributeValue::S(serde_json::to_string(&outcome.renditions)?),
            )
            .expression_attribute_values(
                ":ratio",
                AttributeValue::N(outcome.compression_ratio.to_string()),
            )
            .expression_attribute_values(
                ":processed_at",
                AttributeValue::S(outcome.processed_at.to_rfc3339()),
            )
            .expression_attribute_values(":now", AttributeValue::S(Utc::now().to_rfc3339()))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|s| s.is_conditional_check_failed_exception())
                {
                    RepositoryError::NotFound(video_id)
                } else {
                    backend(DisplayErrorContext(&e))
                }
            })?;
        Ok(())
    }
}
