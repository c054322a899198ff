/// Reasoning and hint requests against the completion service
///
/// Step one turns a problem statement into a `SessionContext`. Step two needs that
/// session, so "generate reasoning first" is carried by the type rather than by globals.
/// Every validation failure is returned before the service is contacted.

use thiserror::Error;
use log::{info, warn};

use crate::completion_client::{CompletionRequest, CompletionService, ServiceError};
use crate::config_loader::{AppConfig, ModelSettings};
use crate::label_mapper::map_value;
use crate::prompts;

/// Inclusive range accepted for the label on the hint path
pub const HINT_LABEL_MIN: i64 = 0;
pub const HINT_LABEL_MAX: i64 = 6;

/// Problem statement plus the reasoning transcript produced for it. Both are non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    problem: String,
    reasoning: String,
}

impl SessionContext {
    pub fn new(problem: impl Into<String>, reasoning: impl Into<String>) -> Option<Self> {
        let problem = problem.into();
        let reasoning = reasoning.into();
        if problem.trim().is_empty() || reasoning.trim().is_empty() {
            return None;
        }
        Some(Self { problem, reasoning })
    }

    pub fn problem(&self) -> &str {
        &self.problem
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Insert the API key")]
    MissingCredential,
    #[error("Insert the problem description")]
    MissingProblem,
    #[error("Insert the suggestion request")]
    MissingRequest,
    #[error("No label yet: connect the sensor first")]
    MissingLabel,
    #[error("Wrong judgment label {0:?}: not an integer")]
    InvalidLabel(String),
    #[error("Wrong mapped label {0}: expected 0..=6")]
    LabelOutOfRange(i64),
    #[error("Generate the reasoning steps first")]
    NoSession,
    #[error("The reasoning service returned an empty transcript")]
    EmptyReasoning,
    #[error("The hint service returned an empty hint")]
    EmptyHint,
    #[error("Service call failed: {0}")]
    Service(#[from] ServiceError),
}

impl WorkflowError {
    /// True for operator-input problems, which never reach the service
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WorkflowError::MissingCredential
                | WorkflowError::MissingProblem
                | WorkflowError::MissingRequest
                | WorkflowError::MissingLabel
                | WorkflowError::InvalidLabel(_)
                | WorkflowError::LabelOutOfRange(_)
                | WorkflowError::NoSession
        )
    }
}

/// Parse the label shown in the UI and check it against the hint range
pub fn parse_hint_label(label: &str) -> Result<i64, WorkflowError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(WorkflowError::MissingLabel);
    }
    let value: i64 = label
        .parse()
        .map_err(|_| WorkflowError::InvalidLabel(label.to_string()))?;
    if !(HINT_LABEL_MIN..=HINT_LABEL_MAX).contains(&value) {
        return Err(WorkflowError::LabelOutOfRange(value));
    }
    Ok(value)
}

pub struct HintWorkflow<S: CompletionService> {
    service: S,
    reasoner: ModelSettings,
    hint: ModelSettings,
}

impl<S: CompletionService> HintWorkflow<S> {
    pub fn new(service: S, reasoner: ModelSettings, hint: ModelSettings) -> Self {
        Self { service, reasoner, hint }
    }

    pub fn from_config(service: S, config: &AppConfig) -> Self {
        Self::new(service, config.reasoner.clone(), config.hint.clone())
    }

    /// Ask the reasoning model for a step-by-step transcript of `problem`
    pub fn generate_reasoning(&self, api_key: &str, problem: &str) -> Result<SessionContext, WorkflowError> {
        let api_key = api_key.trim();
        let problem = problem.trim();
        if api_key.is_empty() {
            return Err(WorkflowError::MissingCredential);
        }
        if problem.is_empty() {
            return Err(WorkflowError::MissingProblem);
        }

        let request = CompletionRequest::new(&self.reasoner, prompts::REASONER_SYSTEM_PROMPT, problem);
        info!(target: "hint_workflow", "Requesting reasoning from {} ({} chars)", self.reasoner.model, problem.len());
        let reasoning = self.service.complete(api_key, &request).map_err(|e| {
            warn!(target: "hint_workflow", "Reasoning request failed: {}", e);
            WorkflowError::from(e)
        })?;

        SessionContext::new(problem, reasoning).ok_or(WorkflowError::EmptyReasoning)
    }

    /// Ask the hint model for a hint graded by the current label
    pub fn request_hint(
        &self,
        api_key: &str,
        session: Option<&SessionContext>,
        request: &str,
        label: &str,
    ) -> Result<String, WorkflowError> {
        let api_key = api_key.trim();
        let request = request.trim();
        if api_key.is_empty() {
            return Err(WorkflowError::MissingCredential);
        }
        if request.is_empty() {
            return Err(WorkflowError::MissingRequest);
        }
        let label_val = parse_hint_label(label)?;
        let session = session.ok_or(WorkflowError::NoSession)?;

        let completion = self.build_hint_request(session, request, label_val);
        info!(target: "hint_workflow", "Requesting hint from {} (label {} -> state {})",
              self.hint.model, label_val, map_value(label_val));
        let hint = self.service.complete(api_key, &completion).map_err(|e| {
            warn!(target: "hint_workflow", "Hint request failed: {}", e);
            WorkflowError::from(e)
        })?;

        if hint.trim().is_empty() {
            return Err(WorkflowError::EmptyHint);
        }
        Ok(hint)
    }

    fn build_hint_request(&self, session: &SessionContext, request: &str, label_val: i64) -> CompletionRequest {
        let system_prompt = prompts::hint_system_prompt(session.problem(), session.reasoning());
        let user_message = prompts::hint_user_message(request, map_value(label_val));
        CompletionRequest::new(&self.hint, &system_prompt, &user_message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    enum Reply {
        Text(&'static str),
        Fail,
    }

    struct MockService {
        reply: Reply,
        calls: Mutex<Vec<(String, CompletionRequest)>>,
    }

    impl MockService {
        fn new(reply: Reply) -> Self {
            Self { reply, calls: Mutex::new(Vec::new()) }
        }
    }

    impl CompletionService for MockService {
        fn complete(&self, api_key: &str, request: &CompletionRequest) -> Result<String, ServiceError> {
            self.calls.lock().unwrap().push((api_key.to_string(), request.clone()));
            match self.reply {
                Reply::Text(t) => Ok(t.to_string()),
                Reply::Fail => Err(ServiceError::Status { status: 503, body: "overloaded".to_string() }),
            }
        }
    }

    fn workflow(reply: Reply) -> HintWorkflow<MockService> {
        HintWorkflow::from_config(MockService::new(reply), &AppConfig::default())
    }

    fn call_count(wf: &HintWorkflow<MockService>) -> usize {
        wf.service.calls.lock().unwrap().len()
    }

    fn session() -> SessionContext {
        SessionContext::new("Solve 2x+1=5", "1. Subtract 1\n2. Divide by 2").unwrap()
    }

    #[test]
    fn test_reasoning_rejects_empty_problem() {
        let wf = workflow(Reply::Text("unused"));
        let err = wf.generate_reasoning("sk-test", "   \n").unwrap_err();
        assert!(matches!(err, WorkflowError::MissingProblem));
        assert!(err.is_validation());
        assert_eq!(call_count(&wf), 0);
    }

    #[test]
    fn test_reasoning_rejects_missing_key() {
        let wf = workflow(Reply::Text("unused"));
        assert!(matches!(wf.generate_reasoning("", "Solve x"), Err(WorkflowError::MissingCredential)));
        assert_eq!(call_count(&wf), 0);
    }

    #[test]
    fn test_reasoning_success_builds_session_from_exact_values() {
        let wf = workflow(Reply::Text("1. Subtract 1\n2. Divide by 2"));
        let session = wf.generate_reasoning(" sk-test ", "  Solve 2x+1=5\n").unwrap();

        assert_eq!(session.problem(), "Solve 2x+1=5");
        assert_eq!(session.reasoning(), "1. Subtract 1\n2. Divide by 2");

        let calls = wf.service.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (key, req) = &calls[0];
        assert_eq!(key, "sk-test");
        assert_eq!(req.model, "o3-mini");
        assert_eq!(req.messages[0].joined_text(), prompts::REASONER_SYSTEM_PROMPT);
        assert_eq!(req.messages[1].joined_text(), "Solve 2x+1=5");
    }

    #[test]
    fn test_reasoning_service_error_yields_no_session() {
        let wf = workflow(Reply::Fail);
        let err = wf.generate_reasoning("sk-test", "Solve x").unwrap_err();
        assert!(matches!(err, WorkflowError::Service(ServiceError::Status { status: 503, .. })));
        assert!(!err.is_validation());
    }

    #[test]
    fn test_reasoning_empty_transcript_yields_no_session() {
        let wf = workflow(Reply::Text("  "));
        assert!(matches!(wf.generate_reasoning("sk-test", "Solve x"), Err(WorkflowError::EmptyReasoning)));
    }

    #[test]
    fn test_hint_rejects_out_of_range_labels() {
        let wf = workflow(Reply::Text("unused"));
        let s = session();
        assert!(matches!(
            wf.request_hint("sk-test", Some(&s), "stuck on step 2", "7"),
            Err(WorkflowError::LabelOutOfRange(7))
        ));
        assert!(matches!(
            wf.request_hint("sk-test", Some(&s), "stuck on step 2", "-1"),
            Err(WorkflowError::LabelOutOfRange(-1))
        ));
        assert_eq!(call_count(&wf), 0);
    }

    #[test]
    fn test_hint_rejects_missing_or_garbled_label() {
        let wf = workflow(Reply::Text("unused"));
        let s = session();
        assert!(matches!(wf.request_hint("sk-test", Some(&s), "help", ""), Err(WorkflowError::MissingLabel)));
        assert!(matches!(wf.request_hint("sk-test", Some(&s), "help", "abc"), Err(WorkflowError::InvalidLabel(_))));
        assert_eq!(call_count(&wf), 0);
    }

    #[test]
    fn test_hint_requires_session_and_request() {
        let wf = workflow(Reply::Text("unused"));
        assert!(matches!(wf.request_hint("sk-test", None, "help", "3"), Err(WorkflowError::NoSession)));
        assert!(matches!(wf.request_hint("sk-test", Some(&session()), " ", "3"), Err(WorkflowError::MissingRequest)));
        assert!(matches!(wf.request_hint(" ", Some(&session()), "help", "3"), Err(WorkflowError::MissingCredential)));
        assert_eq!(call_count(&wf), 0);
    }

    #[test]
    fn test_hint_payload_carries_mapped_state() {
        let wf = workflow(Reply::Text("Try isolating the x term first."));
        let s = session();
        let hint = wf.request_hint("sk-test", Some(&s), "stuck on step 2", "3").unwrap();
        assert_eq!(hint, "Try isolating the x term first.");

        let calls = wf.service.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let req = &calls[0].1;
        assert_eq!(req.model, "gpt-4o-mini");
        assert!(req.store);
        assert_eq!(req.messages[1].joined_text(), "Request: stuck on step 2\nPsychophysical state: 4");
        let system = req.messages[0].joined_text();
        assert!(system.contains(s.problem()));
        assert!(system.contains(s.reasoning()));
    }

    #[test]
    fn test_hint_label_bounds_are_inclusive() {
        assert_eq!(parse_hint_label("0").unwrap(), 0);
        assert_eq!(parse_hint_label(" 6 ").unwrap(), 6);
    }

    #[test]
    fn test_session_requires_both_fields() {
        assert!(SessionContext::new("", "steps").is_none());
        assert!(SessionContext::new("problem", " ").is_none());
        assert!(SessionContext::new("problem", "steps").is_some());
    }
}
