//! # Chain
//! A chain is an ordered list of steps. Each step renders a [PromptTemplate], sends the prompt through a
//! [SendPrompt] and stores the reply under the step's output variable, where later steps can reference it.
//!
//! ```text
//! initial variables -> step 1 -> {{out1}} -> step 2 -> {{out2}} -> ...
//! ```
//!
//! Steps run strictly one after another, since any step may depend on the output of an earlier one.
//!
//! ## Validation
//! [Chain::validate] walks the steps without sending anything and reports every required variable that is neither
//! an input nor the output of an earlier step. A step's output counts as known even when the step itself has
//! missing inputs, so each gap is reported once.
//!
//! ## Running
//! [Chain::run] either returns a complete [ChainRunResult] or an error; an aborted run exposes no partial result.
//! To observe each step as it completes, drive the steps yourself with [Chain::run_step].
//!
//! Cancellation is checked before every step. A step already waiting on the sender is not interrupted.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use crate::errors::{Error, Result};
use crate::prompt::{PromptTemplate, Variables};
use crate::utils::llm::{ConversationConfig, SendPrompt, DEFAULT_MAX_RETRIES};

/// A named template whose reply is stored under `output_variable`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStep {
    name: String,
    template: PromptTemplate,
    output_variable: String,
}

impl ChainStep {
    /// Fails if `name` or `output_variable` is empty.
    pub fn new(name: impl Into<String>, template: PromptTemplate, output_variable: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let output_variable = output_variable.into();
        if name.trim().is_empty() {
            return Err(Error::invalid_argument("step name must not be empty"));
        }
        if output_variable.trim().is_empty() {
            return Err(Error::invalid_argument(format!("output variable of step '{}' must not be empty", name)));
        }
        Ok(Self { name, template, output_variable })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    #[inline]
    pub fn output_variable(&self) -> &str {
        &self.output_variable
    }
}

/// Record of one executed step.
#[derive(Debug, Clone, PartialEq)]
#[readonly::make]
pub struct StepRun {
    pub step_name: String,
    /// The prompt after substitution
    pub rendered_prompt: String,
    /// `None` when the model generated no content
    pub response: Option<String>,
    pub elapsed: Duration,
}

/// Outcome of a complete chain run.
#[derive(Debug, Clone, PartialEq)]
#[readonly::make]
pub struct ChainRunResult {
    /// Records of all steps, in execution order
    pub steps: Vec<StepRun>,
    /// Initial inputs plus every step's output
    pub variables: Variables,
    /// Response of the last step
    pub final_response: Option<String>,
    /// Wall-clock time of the whole run
    pub total_elapsed: Duration,
}

impl ChainRunResult {
    /// Look up a final variable, input or step output.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name)
    }

    /// Export the result as JSON. Results are not meant to be read back.
    pub fn to_json(&self) -> Result<String> {
        let steps: Vec<_> = self.steps.iter().map(|step| json!({
            "stepName": step.step_name,
            "renderedPrompt": step.rendered_prompt,
            "response": step.response,
            "elapsedMs": duration_ms(step.elapsed),
        })).collect();
        let value = json!({
            "finalResponse": self.final_response,
            "totalElapsedMs": duration_ms(self.total_elapsed),
            "steps": steps,
            "variables": self.variables,
        });
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

#[inline]
fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// An ordered sequence of steps sharing a system prompt, request options and a retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ChainRecord", into = "ChainRecord")]
pub struct Chain {
    steps: Vec<ChainStep>,
    system_prompt: Option<String>,
    options: Option<ConversationConfig>,
    max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepRecord {
    name: String,
    template: PromptTemplate,
    output_variable: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainRecord {
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    options: Option<ConversationConfig>,
    steps: Vec<StepRecord>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Default for Chain {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            system_prompt: None,
            options: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Fails, leaving the chain unchanged, if `name` or `output_variable` is empty.
    pub fn add_step(&mut self,
                    name: impl Into<String>,
                    template: PromptTemplate,
                    output_variable: impl Into<String>) -> Result<&mut Self> {
        self.steps.push(ChainStep::new(name, template, output_variable)?);
        Ok(self)
    }

    pub fn with_system_prompt(&mut self, system_prompt: impl Into<String>) -> &mut Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_options(&mut self, options: ConversationConfig) -> &mut Self {
        self.options = Some(options);
        self
    }

    /// Retry budget handed to the sender for every step.
    pub fn with_max_retries(&mut self, max_retries: u32) -> &mut Self {
        self.max_retries = max_retries;
        self
    }

    #[inline]
    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn options(&self) -> Option<&ConversationConfig> {
        self.options.as_ref()
    }

    #[inline]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Report every required variable that no input or earlier step provides. Empty means the chain can run.
    pub fn validate(&self, initial_variables: &Variables) -> Vec<String> {
        let mut known: HashSet<&str> = initial_variables.names().collect();
        let mut errors = Vec::new();
        for step in &self.steps {
            for variable in step.template.required_variables() {
                if !known.contains(variable.as_str()) {
                    errors.push(format!("step '{}' requires '{}' which is not provided by input or a prior step",
                                        step.name, variable));
                }
            }
            // known from here on even if this step had gaps
            known.insert(step.output_variable.as_str());
        }
        errors
    }

    /// Run step `index` against `variables` and store its reply there.
    ///
    /// `variables` is the caller's accumulated mapping; steps before `index` are assumed to have run on it.
    pub async fn run_step<S: SendPrompt + ?Sized>(&self,
                                                  index: usize,
                                                  sender: &S,
                                                  variables: &mut Variables,
                                                  cancel: &CancellationToken) -> Result<StepRun> {
        let step = self.steps.get(index).ok_or_else(|| Error::invalid_argument(
            format!("step index {} is out of range for a chain of {} steps", index, self.steps.len())
        ))?;
        if cancel.is_cancelled() {
            info!("Chain cancelled before step '{}'", step.name);
            return Err(Error::Cancelled { completed_steps: Some(index) });
        }
        let rendered_prompt = step.template.render(variables)?;
        debug!("Running step '{}' ({}/{})", step.name, index + 1, self.steps.len());

        let started = Instant::now();
        let response = sender
            .send(&rendered_prompt, self.system_prompt.as_deref(), self.options.as_ref(), self.max_retries, cancel)
            .await
            .map_err(|source| Error::SenderFailure { step: Some(step.name.clone()), source })?;
        let elapsed = started.elapsed();
        debug!("Step '{}' finished in {:?}", step.name, elapsed);

        variables.insert(step.output_variable.as_str(), response.as_deref().unwrap_or_default());
        Ok(StepRun {
            step_name: step.name.clone(),
            rendered_prompt,
            response,
            elapsed,
        })
    }

    /// Run all steps in order, threading replies into later steps.
    pub async fn run<S: SendPrompt + ?Sized>(&self,
                                             sender: &S,
                                             initial_variables: &Variables,
                                             cancel: &CancellationToken) -> Result<ChainRunResult> {
        if self.steps.is_empty() {
            return Err(Error::EmptyChain);
        }
        info!("Running chain of {} steps", self.steps.len());
        let started = Instant::now();
        let mut variables = initial_variables.clone();
        let mut steps = Vec::with_capacity(self.steps.len());
        for index in 0..self.steps.len() {
            steps.push(self.run_step(index, sender, &mut variables, cancel).await?);
        }
        let final_response = steps.last().and_then(|step: &StepRun| step.response.clone());
        Ok(ChainRunResult {
            steps,
            variables,
            final_response,
            total_elapsed: started.elapsed(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl TryFrom<ChainRecord> for Chain {
    type Error = String;

    fn try_from(record: ChainRecord) -> std::result::Result<Self, String> {
        let steps = record.steps
            .into_iter()
            .map(|s| ChainStep::new(s.name, s.template, s.output_variable))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| match e {
                Error::InvalidArgument(message) => message,
                e => e.to_string(),
            })?;
        Ok(Self {
            steps,
            system_prompt: record.system_prompt,
            options: record.options,
            max_retries: record.max_retries,
        })
    }
}

impl From<Chain> for ChainRecord {
    fn from(chain: Chain) -> Self {
        Self {
            system_prompt: chain.system_prompt,
            max_retries: chain.max_retries,
            options: chain.options,
            steps: chain.steps.into_iter().map(|s| StepRecord {
                name: s.name,
                template: s.template,
                output_variable: s.output_variable,
            }).collect(),
        }
    }
}
