use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::record::GenerationJob;
use super::state::{JobEvent, StateMachine, Transition};
use crate::error::GenerationError;
use crate::generation::SectionGenerationResult;

/// Persistence seam for job records and generated sections.
///
/// `update` is a whole-record read-modify-write: readers observe either the
/// previous record or the updated one, never a partially written mix.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: GenerationJob) -> Result<(), GenerationError>;

    async fn get(&self, id: Uuid) -> Result<GenerationJob, GenerationError>;

    async fn update(&self, id: Uuid, event: JobEvent) -> Result<Transition, GenerationError>;

    async fn store_section(
        &self,
        id: Uuid,
        section: SectionGenerationResult,
    ) -> Result<(), GenerationError>;

    async fn sections(&self, id: Uuid) -> Result<Vec<SectionGenerationResult>, GenerationError>;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, GenerationJob>>,
    sections: RwLock<HashMap<Uuid, Vec<SectionGenerationResult>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: GenerationJob) -> Result<(), GenerationError> {
        self.jobs.write().insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<GenerationJob, GenerationError> {
        self.jobs
            .read()
            .get(&id)
            .cloned()
            .ok_or(GenerationError::JobNotFound(id))
    }

    async fn update(&self, id: Uuid, event: JobEvent) -> Result<Transition, GenerationError> {
        let mut jobs = self.jobs.write();
        let current = jobs.get(&id).ok_or(GenerationError::JobNotFound(id))?;
        let mut next = current.clone();
        let transition = StateMachine::apply(&mut next, event);
        if transition != Transition::Ignored {
            jobs.insert(id, next);
        }
        Ok(transition)
    }

    async fn store_section(
        &self,
        id: Uuid,
        section: SectionGenerationResult,
    ) -> Result<(), GenerationError> {
        if !self.jobs.read().contains_key(&id) {
            return Err(GenerationError::JobNotFound(id));
        }
        self.sections.write().entry(id).or_default().push(section);
        Ok(())
    }

    async fn sections(&self, id: Uuid) -> Result<Vec<SectionGenerationResult>, GenerationError> {
        Ok(self.sections.read().get(&id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::record::JobState;
    use crate::request::JobType;

    #[tokio::test]
    async fn update_applies_state_machine() {
        let store = InMemoryJobStore::new();
        let job = GenerationJob::new("doc", JobType::Sections);
        let id = job.id;
        store.insert(job).await.unwrap();

        store.update(id, JobEvent::Started).await.unwrap();
        store.update(id, JobEvent::Progressed(50)).await.unwrap();
        let stale = store.update(id, JobEvent::Progressed(10)).await.unwrap();
        assert_eq!(stale, Transition::Ignored);

        let job = store.get(id).await.unwrap();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.progress, 50);
    }

    #[tokio::test]
    async fn missing_job_is_reported() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.get(id).await,
            Err(GenerationError::JobNotFound(missing)) if missing == id
        ));
        assert!(store.update(id, JobEvent::Started).await.is_err());
    }

    #[tokio::test]
    async fn sections_default_to_empty() {
        let store = InMemoryJobStore::new();
        let job = GenerationJob::new("doc", JobType::Sections);
        let id = job.id;
        store.insert(job).await.unwrap();
        assert!(store.sections(id).await.unwrap().is_empty());
    }
}
