use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use super::{Project, ProjectStatus, ProjectStore, ProjectStoreError, Result};

/// Key layout: `project:{tenant_id}:{project_id}` -> Project (JSON)
fn encode_project_key(tenant_id: &str, project_id: &str) -> Vec<u8> {
    format!("project:{}:{}", tenant_id, project_id).into_bytes()
}

/// Fjall-backed project records
#[derive(Clone)]
pub struct FjallProjectStore {
    keyspace: Keyspace,
    projects: PartitionHandle,
}

impl FjallProjectStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening project store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ProjectStoreError::Unavailable(e.to_string()))?;
        }

        let keyspace = Config::new(path).open()?;
        let projects = keyspace.open_partition("projects", PartitionCreateOptions::default())?;

        Ok(Self { keyspace, projects })
    }

    /// Insert or replace a project record
    pub fn put(&self, project: &Project) -> Result<()> {
        let key = encode_project_key(&project.tenant_id, &project.id);
        self.projects.insert(key, serde_json::to_vec(project)?)?;
        debug!(project_id = %project.id, tenant_id = %project.tenant_id, "Stored project");
        Ok(())
    }

    fn load(&self, tenant_id: &str, project_id: &str) -> Result<Option<Project>> {
        match self.projects.get(encode_project_key(tenant_id, project_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Load, mutate and write back one project; missing projects are an error
    fn update<F>(&self, tenant_id: &str, project_id: &str, mutate: F) -> Result<Project>
    where
        F: FnOnce(&mut Project),
    {
        let mut project =
            self.load(tenant_id, project_id)?
                .ok_or_else(|| ProjectStoreError::NotFound {
                    tenant_id: tenant_id.to_string(),
                    project_id: project_id.to_string(),
                })?;
        mutate(&mut project);
        project.updated_at = Utc::now();
        self.put(&project)?;
        Ok(project)
    }

    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for FjallProjectStore {
    async fn get(&self, tenant_id: &str, project_id: &str) -> Result<Option<Project>> {
        self.load(tenant_id, project_id)
    }

    async fn mark_exporting(&self, tenant_id: &str, project_id: &str) -> Result<()> {
        self.update(tenant_id, project_id, |p| p.status = ProjectStatus::Exporting)?;
        Ok(())
    }

    async fn mark_exporting_many(&self, tenant_id: &str, project_ids: &[String]) -> Result<usize> {
        let mut updated = 0;
        for project_id in project_ids {
            if self.load(tenant_id, project_id)?.is_none() {
                debug!(tenant_id, project_id = %project_id, "Skipping project outside tenant");
                continue;
            }
            self.update(tenant_id, project_id, |p| p.status = ProjectStatus::Exporting)?;
            updated += 1;
        }
        Ok(updated)
    }

    async fn mark_exported(
        &self,
        tenant_id: &str,
        project_id: &str,
        export_url: &str,
        exported_at: DateTime<Utc>,
    ) -> Result<()> {
        self.update(tenant_id, project_id, |p| {
            p.status = ProjectStatus::Exported;
            p.export_url = Some(export_url.to_string());
            p.exported_at = Some(exported_at);
        })?;
        Ok(())
    }

    async fn mark_failed(&self, tenant_id: &str, project_id: &str) -> Result<()> {
        self.update(tenant_id, project_id, |p| p.status = ProjectStatus::Failed)?;
        Ok(())
    }

    async fn fail_if_exporting(&self, tenant_id: &str, project_id: &str) -> Result<bool> {
        match self.load(tenant_id, project_id)? {
            Some(project) if project.status == ProjectStatus::Exporting => {
                self.mark_failed(tenant_id, project_id).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
