//! Visualization binder: chart specifications bound to one DataSource.
//!
//! `xField` and `yField` are not required to be fields of the bound
//! DataSource. A mismatch on create, or on an update that touches them or the
//! binding, is accepted with a warning event; the chart renders that axis empty.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::logs::{log_info, log_success, log_warning};
use crate::error::{AppError, AppResult};
use crate::models::{ChartType, DataSource, Visualization};
use crate::store::{DataSourceRepository, VisualizationRepository};

/// Fields accepted when creating a visualization.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewVisualization {
    pub title: String,
    pub description: String,
    pub chart_type: Option<ChartType>,
    pub x_field: String,
    pub y_field: String,
    pub config: Option<Value>,
    pub datasource_id: String,
}

/// Partial update; `None` keeps the current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisualizationPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub chart_type: Option<ChartType>,
    pub x_field: Option<String>,
    pub y_field: Option<String>,
    pub config: Option<Value>,
    pub datasource_id: Option<String>,
}

impl VisualizationPatch {
    fn touches_binding(&self) -> bool {
        self.x_field.is_some() || self.y_field.is_some() || self.datasource_id.is_some()
    }
}

#[derive(Clone)]
pub struct VisualizationService {
    visualizations: Arc<dyn VisualizationRepository>,
    sources: Arc<dyn DataSourceRepository>,
}

impl VisualizationService {
    pub fn new(visualizations: Arc<dyn VisualizationRepository>, sources: Arc<dyn DataSourceRepository>) -> Self {
        Self {
            visualizations,
            sources,
        }
    }

    pub async fn create(&self, owner_id: &str, input: NewVisualization) -> AppResult<Visualization> {
        let missing: Vec<&str> = [
            ("title", input.title.trim().is_empty()),
            ("chartType", input.chart_type.is_none()),
            ("xField", input.x_field.trim().is_empty()),
            ("yField", input.y_field.trim().is_empty()),
            ("datasourceId", input.datasource_id.trim().is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();
        if !missing.is_empty() {
            return Err(AppError::validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        let source = self.owned_source(owner_id, &input.datasource_id).await?;
        warn_unknown_fields(&source, &input.x_field, &input.y_field);

        let now = Utc::now();
        let visualization = Visualization {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            title: input.title.trim().to_string(),
            description: input.description,
            chart_type: input.chart_type.unwrap_or_default(),
            x_field: input.x_field,
            y_field: input.y_field,
            config: object_config(input.config)?,
            datasource_id: source.id,
            collaborator_ids: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        };

        let visualization = self.visualizations.insert(visualization).await?;
        log_success(format!("Visualization '{}' created", visualization.title));
        Ok(visualization)
    }

    /// Owner or collaborator access.
    pub async fn get(&self, user_id: &str, id: &str) -> AppResult<Visualization> {
        let visualization = self.find(id).await?;
        if !visualization.is_accessible_by(user_id) {
            return Err(AppError::unauthorized(format!("No access to visualization '{}'", id)));
        }
        Ok(visualization)
    }

    pub async fn list(&self, owner_id: &str) -> AppResult<Vec<Visualization>> {
        Ok(self.visualizations.list_by_owner(owner_id).await?)
    }

    pub async fn shared_with(&self, user_id: &str) -> AppResult<Vec<Visualization>> {
        Ok(self.visualizations.list_shared_with(user_id).await?)
    }

    pub async fn update(&self, owner_id: &str, id: &str, patch: VisualizationPatch) -> AppResult<Visualization> {
        let mut visualization = self.find_owned(owner_id, id).await?;

        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(AppError::validation("title cannot be empty"));
            }
        }

        if patch.touches_binding() {
            let datasource_id = patch.datasource_id.as_deref().unwrap_or(&visualization.datasource_id);
            let source = self.owned_source(owner_id, datasource_id).await?;
            let x_field = patch.x_field.as_deref().unwrap_or(&visualization.x_field);
            let y_field = patch.y_field.as_deref().unwrap_or(&visualization.y_field);
            warn_unknown_fields(&source, x_field, y_field);
        }

        if let Some(title) = patch.title {
            visualization.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            visualization.description = description;
        }
        if let Some(chart_type) = patch.chart_type {
            visualization.chart_type = chart_type;
        }
        if let Some(x_field) = patch.x_field {
            visualization.x_field = x_field;
        }
        if let Some(y_field) = patch.y_field {
            visualization.y_field = y_field;
        }
        if let Some(config) = patch.config {
            visualization.config = object_config(Some(config))?;
        }
        if let Some(datasource_id) = patch.datasource_id {
            visualization.datasource_id = datasource_id;
        }
        visualization.updated_at = Utc::now();

        let visualization = self.visualizations.update(visualization).await?;
        log_info(format!("Visualization '{}' updated", visualization.title));
        Ok(visualization)
    }

    /// Existing exports keep their snapshots.
    pub async fn delete(&self, owner_id: &str, id: &str) -> AppResult<Visualization> {
        let visualization = self.find_owned(owner_id, id).await?;
        self.visualizations.remove(id).await?;
        log_info(format!("Visualization '{}' deleted", visualization.title));
        Ok(visualization)
    }

    pub async fn invite(&self, owner_id: &str, id: &str, collaborator_id: &str) -> AppResult<Visualization> {
        let collaborator_id = collaborator_id.trim();
        if collaborator_id.is_empty() {
            return Err(AppError::validation("userId is required"));
        }

        let mut visualization = self.find_owned(owner_id, id).await?;
        if collaborator_id == visualization.owner_id {
            return Err(AppError::validation("The owner cannot be invited as a collaborator"));
        }
        if !visualization.collaborator_ids.insert(collaborator_id.to_string()) {
            return Err(AppError::validation("User is already a collaborator"));
        }
        visualization.updated_at = Utc::now();

        let visualization = self.visualizations.update(visualization).await?;
        log_info(format!(
            "Shared visualization '{}' with {}",
            visualization.title, collaborator_id
        ));
        Ok(visualization)
    }

    async fn find(&self, id: &str) -> AppResult<Visualization> {
        self.visualizations
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Visualization '{}' not found", id)))
    }

    async fn find_owned(&self, owner_id: &str, id: &str) -> AppResult<Visualization> {
        let visualization = self.find(id).await?;
        if visualization.owner_id != owner_id {
            return Err(AppError::unauthorized(format!(
                "Only the owner can modify visualization '{}'",
                id
            )));
        }
        Ok(visualization)
    }

    async fn owned_source(&self, owner_id: &str, id: &str) -> AppResult<DataSource> {
        let source = self
            .sources
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Data source '{}' not found", id)))?;
        if source.owner_id != owner_id {
            return Err(AppError::unauthorized(format!(
                "Data source '{}' belongs to another user",
                id
            )));
        }
        Ok(source)
    }
}

/// Returns the axis fields missing from `source`, logging each one.
fn warn_unknown_fields<'a>(source: &DataSource, x_field: &'a str, y_field: &'a str) -> Vec<&'a str> {
    let unknown: Vec<&str> = [x_field, y_field]
        .into_iter()
        .filter(|field| !source.fields.iter().any(|f| f == field))
        .collect();
    for field in &unknown {
        log_warning(format!(
            "Field '{}' is not part of data source '{}' (fields: {})",
            field,
            source.name,
            source.fields.join(", ")
        ));
    }
    unknown
}

/// Render options are a JSON object; absent or null becomes `{}`.
fn object_config(config: Option<Value>) -> AppResult<Value> {
    match config {
        None | Some(Value::Null) => Ok(Value::Object(Map::new())),
        Some(obj @ Value::Object(_)) => Ok(obj),
        Some(_) => Err(AppError::validation("config must be a JSON object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{DataSourceStatus, SourceDetails, SourceKind};
    use crate::store::JsonStore;
    use serde_json::json;

    fn sample_source() -> DataSource {
        DataSource {
            id: "ds1".into(),
            owner_id: "owner".into(),
            name: "sales".into(),
            source_kind: SourceKind::Csv,
            source_details: SourceDetails::Inline,
            fields: vec!["Region".into(), "Amount".into(), "Year".into()],
            rows: vec![],
            status: DataSourceStatus::Processed,
            created_at: Utc::now(),
        }
    }

    async fn service() -> VisualizationService {
        let sources = Arc::new(JsonStore::<DataSource>::in_memory());
        sources.insert(sample_source()).await.unwrap();
        VisualizationService::new(Arc::new(JsonStore::<Visualization>::in_memory()), sources)
    }

    fn input() -> NewVisualization {
        NewVisualization {
            title: "Sales by region".into(),
            chart_type: Some(ChartType::Bar),
            x_field: "Region".into(),
            y_field: "Amount".into(),
            datasource_id: "ds1".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_defaults_config() {
        let svc = service().await;
        let viz = svc.create("owner", input()).await.unwrap();
        assert_eq!(viz.config, json!({}));
        assert_eq!(svc.list("owner").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let svc = service().await;

        let err = svc.create("owner", NewVisualization::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("title"));

        let mut missing_source = input();
        missing_source.datasource_id = "nope".into();
        let err = svc.create("owner", missing_source).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = svc.create("stranger", input()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let mut bad_config = input();
        bad_config.config = Some(json!([1, 2]));
        let err = svc.create("owner", bad_config).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_partial_update() {
        let svc = service().await;
        let viz = svc.create("owner", input()).await.unwrap();

        let patch = VisualizationPatch {
            chart_type: Some(ChartType::Line),
            y_field: Some("Year".into()),
            ..Default::default()
        };
        let updated = svc.update("owner", &viz.id, patch).await.unwrap();
        assert_eq!(updated.chart_type, ChartType::Line);
        assert_eq!(updated.y_field, "Year");
        assert_eq!(updated.title, "Sales by region");

        let empty_title = VisualizationPatch {
            title: Some("  ".into()),
            ..Default::default()
        };
        assert!(svc.update("owner", &viz.id, empty_title).await.is_err());
        assert_eq!(svc.get("owner", &viz.id).await.unwrap().title, "Sales by region");
    }

    #[tokio::test]
    async fn test_unknown_axis_fields_are_accepted() {
        let svc = service().await;

        let mut unknown = input();
        unknown.y_field = "Profit".into();
        let viz = svc.create("owner", unknown).await.unwrap();
        assert_eq!(viz.y_field, "Profit");

        let patch = VisualizationPatch {
            x_field: Some("Missing".into()),
            ..Default::default()
        };
        let updated = svc.update("owner", &viz.id, patch).await.unwrap();
        assert_eq!(updated.x_field, "Missing");
    }

    #[test]
    fn test_warn_unknown_fields_lists_mismatches() {
        let source = DataSource {
            fields: vec!["Region".into(), "Amount".into()],
            ..sample_source()
        };
        assert!(warn_unknown_fields(&source, "Region", "Amount").is_empty());
        assert_eq!(warn_unknown_fields(&source, "Region", "Profit"), vec!["Profit"]);
    }

    #[tokio::test]
    async fn test_invite_and_access() {
        let svc = service().await;
        let viz = svc.create("owner", input()).await.unwrap();

        let err = svc.get("friend", &viz.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        svc.invite("owner", &viz.id, "friend").await.unwrap();
        assert!(svc.get("friend", &viz.id).await.is_ok());
        assert_eq!(svc.shared_with("friend").await.unwrap().len(), 1);

        let err = svc.invite("owner", &viz.id, "friend").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = svc.invite("friend", &viz.id, "other").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let err = svc.update("friend", &viz.id, VisualizationPatch::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn test_delete_owner_only() {
        let svc = service().await;
        let viz = svc.create("owner", input()).await.unwrap();

        assert!(svc.delete("friend", &viz.id).await.is_err());
        svc.delete("owner", &viz.id).await.unwrap();
        let err = svc.get("owner", &viz.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
