use std::collections::HashSet;

use super::bundle::is_plain_name;
use crate::Result;
use crate::RunnableSpec;
use crate::SpecValidationError;

/// Launch ordering of an application's runnables
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Every runnable is requested at once
    Unordered(Vec<RunnableSpec>),
    /// Runnable N+1 is requested only once every replica of runnable N is running
    Sequential(Vec<RunnableSpec>),
}

impl Placement {
    pub fn runnables(&self) -> &[RunnableSpec] {
        match self {
            Placement::Unordered(runnables) | Placement::Sequential(runnables) => runnables,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSpec {
    pub name: String,
    /// Passed to every runnable ahead of its own arguments
    pub arguments: Vec<String>,
    pub placement: Placement,
}

impl ApplicationSpec {
    pub fn builder(name: impl Into<String>) -> ApplicationSpecBuilder {
        ApplicationSpecBuilder {
            name: name.into(),
            arguments: Vec::new(),
            runnables: Vec::new(),
        }
    }

    pub fn runnables(&self) -> &[RunnableSpec] {
        self.placement.runnables()
    }

    pub fn runnable(
        &self,
        name: &str,
    ) -> Option<&RunnableSpec> {
        self.runnables().iter().find(|r| r.name == name)
    }

    /// Total number of instances requested across all runnables
    pub fn total_instances(&self) -> u32 {
        self.runnables().iter().map(|r| r.instances).sum()
    }

    /// Checks names and bundle declarations. Bundle sources are only read
    /// at staging time.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SpecValidationError::EmptyApplicationName.into());
        }
        if !is_plain_name(&self.name) {
            return Err(SpecValidationError::InvalidApplicationName(self.name.clone()).into());
        }

        let runnables = self.runnables();
        if runnables.is_empty() {
            return Err(SpecValidationError::NoRunnables(self.name.clone()).into());
        }

        let mut seen = HashSet::new();
        for runnable in runnables {
            runnable.validate()?;
            if !seen.insert(runnable.name.as_str()) {
                return Err(SpecValidationError::DuplicateRunnable(runnable.name.clone()).into());
            }
        }

        Ok(())
    }
}

pub struct ApplicationSpecBuilder {
    name: String,
    arguments: Vec<String>,
    runnables: Vec<RunnableSpec>,
}

impl ApplicationSpecBuilder {
    pub fn runnable(
        mut self,
        runnable: RunnableSpec,
    ) -> Self {
        self.runnables.push(runnable);
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
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    pub fn any_order(self) -> ApplicationSpec {
        ApplicationSpec {
            name: self.name,
            arguments: self.arguments,
            placement: Placement::Unordered(self.runnables),
        }
    }

    /// Launch runnables one after another, in the order they were added
    pub fn sequential(self) -> ApplicationSpec {
        ApplicationSpec {
            name: self.name,
            arguments: self.arguments,
            placement: Placement::Sequential(self.runnables),
        }
    }
}
