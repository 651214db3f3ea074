//! Cascade controller: a bounded escalation loop that re-invokes higher-tier
//! models when a lower-tier reply exhibits uncertainty, refusal, or error.

use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    Uncertainty,
    Refusal,
    Error,
}

#[derive(Debug, Clone)]
pub struct CascadePlan {
    pub models: Vec<String>,
    pub trigger: EscalationTrigger,
    pub max_escalations: usize,
}

/// Result of one dispatch attempt within the cascade.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub text: String,
    pub response: Value,
    pub provider: String,
    pub model: String,
}

/// Whether a dispatch failure is transient (worth escalating past, when the
/// trigger is `error`) or terminal.
pub struct DispatchFailure {
    pub transient: bool,
    pub error: AppError,
}

pub type DispatchFn<'a> =
    dyn Fn(&str) -> Pin<Box<dyn Future<Output = Result<DispatchOutcome, DispatchFailure>> + Send + 'a>> + Send + Sync + 'a;

static UNCERTAINTY: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)i'?m not sure",
        r"(?i)i don'?t know",
        r"(?i)it'?s hard to say",
        r"(?i)i can'?t definitively",
        r"(?i)i'?m uncertain",
        r"(?i)this is speculation",
    ])
    .unwrap()
});

static REFUSAL: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)i can'?t help with that",
        r"(?i)i'?m not able to",
        r"(?i)i (cannot|won'?t) (provide|give|create)",
        r"(?i)as an ai",
    ])
    .unwrap()
});

fn matches_trigger(text: &str, trigger: EscalationTrigger) -> bool {
    match trigger {
        EscalationTrigger::Uncertainty => UNCERTAINTY.is_match(text),
        EscalationTrigger::Refusal => REFUSAL.is_match(text),
        EscalationTrigger::Error => false, // error trigger is evaluated from dispatch failures, not text
    }
}

/// Runs `plan` against `dispatch`, escalating per the plan's trigger and
/// `max_escalations` budget. Never makes more than
/// `min(plan.models.len(), max_escalations + 1)` calls.
pub async fn run(plan: &CascadePlan, is_cooled: impl Fn(&str) -> bool, dispatch: &DispatchFn<'_>) -> Result<(DispatchOutcome, usize), AppError> {
    let mut escalations = 0usize;
    let mut last_err: Option<AppError> = None;

    for (i, model) in plan.models.iter().enumerate() {
        let is_last = i == plan.models.len() - 1;

        if is_cooled(model) {
            if is_last {
                break;
            }
            continue;
        }

        match dispatch(model).await {
            Ok(outcome) => {
                let should_escalate =
                    matches_trigger(&outcome.text, plan.trigger) && !is_last && escalations < plan.max_escalations;
                if should_escalate {
                    escalations += 1;
                    continue;
                }
                return Ok((outcome, escalations));
            }
            Err(failure) => {
                let should_escalate = failure.transient
                    && plan.trigger == EscalationTrigger::Error
                    && !is_last
                    && escalations < plan.max_escalations;
                last_err = Some(failure.error);
                if should_escalate {
                    escalations += 1;
                    continue;
                }
                break;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| AppError::cascade_exhausted("all cascade models exhausted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn outcome(text: &str, model: &str) -> DispatchOutcome {
        DispatchOutcome { text: text.to_string(), response: json!({}), provider: "anthropic".into(), model: model.into() }
    }

    #[tokio::test]
    async fn s6_cascade_escalation_stops_at_first_sufficient_reply() {
        let plan = CascadePlan {
            models: vec!["haiku".into(), "sonnet".into(), "opus".into()],
            trigger: EscalationTrigger::Uncertainty,
            max_escalations: 1,
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        let dispatch: Box<DispatchFn> = Box::new(move |model: &str| {
            calls2.fetch_add(1, Ordering::SeqCst);
            let model = model.to_string();
            Box::pin(async move {
                match model.as_str() {
                    "haiku" => Ok(outcome("I'm not entirely sure", "haiku")),
                    "sonnet" => Ok(outcome("42", "sonnet")),
                    "opus" => panic!("opus must never be called"),
                    _ => unreachable!(),
                }
            })
        });

        let (result, escalations) = run(&plan, |_| false, &dispatch).await.unwrap();
        assert_eq!(result.model, "sonnet");
        assert_eq!(escalations, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cascade_budget_never_exceeds_plan_bound() {
        let plan = CascadePlan {
            models: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            trigger: EscalationTrigger::Uncertainty,
            max_escalations: 1,
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let dispatch: Box<DispatchFn> = Box::new(move |model: &str| {
            calls2.fetch_add(1, Ordering::SeqCst);
            let model = model.to_string();
            Box::pin(async move { Ok(outcome("I'm not sure", &model)) })
        });

        let _ = run(&plan, |_| false, &dispatch).await;
        assert!(calls.load(Ordering::SeqCst) <= plan.max_escalations + 1);
    }

    #[tokio::test]
    async fn cooled_provider_is_skipped() {
        let plan = CascadePlan { models: vec!["haiku".into(), "sonnet".into()], trigger: EscalationTrigger::Uncertainty, max_escalations: 1 };
        let dispatch: Box<DispatchFn> = Box::new(|model: &str| {
            let model = model.to_string();
            Box::pin(async move { Ok(outcome("final answer", &model)) })
        });
        let (result, _) = run(&plan, |m| m == "haiku", &dispatch).await.unwrap();
        assert_eq!(result.model, "sonnet");
    }

    #[tokio::test]
    async fn exhausting_every_model_raises_cascade_exhausted() {
        let plan = CascadePlan { models: vec!["haiku".into()], trigger: EscalationTrigger::Error, max_escalations: 0 };
        let dispatch: Box<DispatchFn> = Box::new(|_| {
            Box::pin(async move {
                Err(DispatchFailure { transient: true, error: AppError::network_error("timeout") })
            })
        });
        let err = run(&plan, |_| false, &dispatch).await.unwrap_err();
        assert_eq!(err.kind, crate::error::AppErrorKind::NetworkError);
    }
}
