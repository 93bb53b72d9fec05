use std::{any::type_name, collections::HashMap};

use crate::job::{BoxedJob, Job, JobError};

type JobFactory = fn(&str) -> Result<BoxedJob, JobError>;

/// Process-local mapping from a job class identifier to a constructor that
/// parses the serialized argument payload and yields an executable job.
///
/// Every job class a worker may execute must be registered before the
/// worker starts consuming; lookups of unregistered classes fail the
/// attempt with `JobNotFoundByClass`.
pub struct JobRegistry {
    jobs: HashMap<String, JobFactory>,
}

/// Builds a job of type `T` from its serialized arguments.
pub fn job_factory<T: Job + serde::de::DeserializeOwned + 'static>(
    args: &str,
) -> Result<BoxedJob, JobError> {
    let job: T = serde_json::from_str(args)?;
    Ok(Box::new(job))
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
        }
    }

    /// Registers `T` under its type name, the same identifier the manager
    /// writes into the job record's `cls` field.
    pub fn register<T>(&mut self) -> &mut Self
    where
        T: Job + serde::de::DeserializeOwned + 'static,
    {
        let name = type_name::<T>();

        self.jobs.insert(name.to_string(), job_factory::<T>);
        self
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.keys().map(|s| s.as_str()).collect()
    }

    pub fn has_registered<T>(&self) -> bool
    where
        T: Job,
    {
        self.jobs.contains_key(type_name::<T>())
    }

    pub(crate) fn build(&self, class: &str, args: &str) -> Result<BoxedJob, JobError> {
        let factory = self.jobs.get(class).ok_or_else(|| {
            JobError::new(
                "JobNotFoundByClass",
                format!("job class {class} is not registered"),
            )
        })?;
        factory(args)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
