use std::collections::BTreeMap;
use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;

use super::bundle::is_plain_name;
use crate::ResourceBundle;
use crate::Result;
use crate::SpecValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub virtual_cores: u32,
    pub memory_mb: u64,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            virtual_cores: 1,
            memory_mb: 512,
        }
    }
}

/// Whether a failed instance is relaunched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RestartPolicy {
    #[default]
    Never,
    /// Restart until the configured budget for `Always` runs out
    Always,
    /// Restart at most `n` times per replica
    Limited(u32),
}

impl RestartPolicy {
    /// `restarts` is how many times this replica has already been relaunched
    pub fn allows_restart(
        &self,
        restarts: u32,
        always_budget: u32,
    ) -> bool {
        match self {
            RestartPolicy::Never => false,
            RestartPolicy::Always => restarts < always_budget,
            RestartPolicy::Limited(max) => restarts < *max,
        }
    }
}

/// One role of a distributed application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnableSpec {
    pub name: String,
    /// Descriptor the cluster backend resolves into something it can run
    pub entry_point: String,
    pub resources: ResourceRequirements,
    pub instances: u32,
    pub bundles: Vec<ResourceBundle>,
    pub restart_policy: RestartPolicy,
    pub arguments: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// A launch failure of this runnable fails the whole application
    pub required: bool,
}

impl RunnableSpec {
    pub fn builder(
        name: impl Into<String>,
        entry_point: impl Into<String>,
    ) -> RunnableSpecBuilder {
        RunnableSpecBuilder {
            spec: RunnableSpec {
                name: name.into(),
                entry_point: entry_point.into(),
                resources: ResourceRequirements::default(),
                instances: 1,
                bundles: Vec::new(),
                restart_policy: RestartPolicy::Never,
                arguments: Vec::new(),
                env: BTreeMap::new(),
                required: false,
            },
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SpecValidationError::EmptyRunnableName.into());
        }
        if !is_plain_name(&self.name) {
            return Err(SpecValidationError::InvalidRunnableName(self.name.clone()).into());
        }
        if self.entry_point.is_empty() {
            return Err(SpecValidationError::EmptyEntryPoint(self.name.clone()).into());
        }
        if self.instances == 0 {
            return Err(SpecValidationError::ZeroInstances(self.name.clone()).into());
        }

        let mut names = HashSet::new();
        let mut destinations = HashSet::new();
        for bundle in &self.bundles {
            if !names.insert(bundle.name.as_str()) {
                return Err(SpecValidationError::DuplicateBundle {
                    runnable: self.name.clone(),
                    bundle: bundle.name.clone(),
                }
                .into());
            }
            if !destinations.insert(bundle.destination.as_path()) {
                return Err(SpecValidationError::DuplicateDestination {
                    runnable: self.name.clone(),
                    destination: bundle.destination.clone(),
                }
                .into());
            }
            bundle.validate(&self.name)?;
        }

        Ok(())
    }
}

pub struct RunnableSpecBuilder {
    spec: RunnableSpec,
}

impl RunnableSpecBuilder {
    pub fn resources(
        mut self,
        virtual_cores: u32,
        memory_mb: u64,
    ) -> Self {
        self.spec.resources = ResourceRequirements {
            virtual_cores,
            memory_mb,
        };
        self
    }

    pub fn instances(
        mut self,
        instances: u32,
    ) -> Self {
        self.spec.instances = instances;
        self
    }

    pub fn bundle(
        mut self,
        bundle: ResourceBundle,
    ) -> Self {
        self.spec.bundles.push(bundle);
        self
    }

    pub fn restart_policy(
        mut self,
        policy: RestartPolicy,
    ) -> Self {
        self.spec.restart_policy = policy;
        self
    }

    pub fn arguments<I, S>(
        mut self,
        arguments: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.spec.env.insert(key.into(), value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.spec.required = true;
        self
    }

    pub fn build(self) -> RunnableSpec {
        self.spec
    }
}
