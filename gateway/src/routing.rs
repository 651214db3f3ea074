//! Routing policy: selects a routing mode from the requested model string,
//! then a concrete target (or cascade plan) from mode + task + complexity.

use serde::{Deserialize, Serialize};

use crate::cascade::{CascadePlan, EscalationTrigger};
use crate::complexity::Complexity;
use crate::config::{Config, RoutingMode as ConfigCascadeMode};
use crate::error::AppError;
use crate::model_registry::{self, Provider};
use crate::task_type::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    Auto,
    Cost,
    Fast,
    Quality,
    Passthrough,
}

/// Result of mode + target selection: either a single resolved target or a
/// cascade plan to run through [`crate::cascade::run`].
pub enum RoutingTarget {
    Single { provider: Provider, model: String },
    Cascade(CascadePlan),
}

/// Mode selection, in the exact priority order specified.
pub fn select_mode(requested_model: &str, suffix: Option<&str>, bypass: bool) -> RoutingMode {
    if bypass {
        return RoutingMode::Passthrough;
    }
    if let Some(suffix) = suffix {
        if let Some(mode) = mode_from_token(suffix) {
            return mode;
        }
    }
    if requested_model == "relayplane:auto" {
        return RoutingMode::Auto;
    }
    if let Some(mode) = relayplane_namespace_mode(requested_model) {
        return mode;
    }
    if let Some(mode) = rp_alias_mode(requested_model) {
        return mode;
    }
    if let Some(mode) = mode_from_token(requested_model) {
        return mode;
    }
    RoutingMode::Passthrough
}

fn relayplane_namespace_mode(name: &str) -> Option<RoutingMode> {
    match name {
        "relayplane:cost" => Some(RoutingMode::Cost),
        "relayplane:fast" => Some(RoutingMode::Fast),
        "relayplane:quality" => Some(RoutingMode::Quality),
        _ => None,
    }
}

fn rp_alias_mode(name: &str) -> Option<RoutingMode> {
    match name {
        "rp:cost" | "rp:cheap" => Some(RoutingMode::Cost),
        "rp:fast" => Some(RoutingMode::Fast),
        "rp:quality" | "rp:best" => Some(RoutingMode::Quality),
        other if other.starts_with("rp:") => Some(RoutingMode::Passthrough),
        _ => None,
    }
}

fn mode_from_token(token: &str) -> Option<RoutingMode> {
    match token {
        "auto" => Some(RoutingMode::Auto),
        "cost" => Some(RoutingMode::Cost),
        "fast" => Some(RoutingMode::Fast),
        "quality" => Some(RoutingMode::Quality),
        _ => None,
    }
}

/// Target selection given the already-selected mode.
pub fn select_target(
    mode: RoutingMode,
    base_model: &str,
    config: &Config,
    task: TaskType,
    complexity: Complexity,
    streaming: bool,
    native_anthropic: bool,
) -> Result<RoutingTarget, AppError> {
    match mode {
        RoutingMode::Passthrough => {
            let resolved = model_registry::resolve_explicit(base_model).ok_or_else(|| {
                AppError::unknown_model(
                    format!("unknown model `{base_model}`"),
                    model_registry::suggest(base_model, 3),
                )
            })?;
            reject_non_anthropic_on_native(native_anthropic, resolved.0)?;
            Ok(RoutingTarget::Single { provider: resolved.0, model: resolved.1 })
        }
        RoutingMode::Cost | RoutingMode::Fast => {
            let tier = if mode == RoutingMode::Cost { "cost" } else { "fast" };
            let target = config
                .routing
                .complexity_tier(tier)
                .or_else(|| config.routing.cascade.first().cloned())
                .unwrap_or_else(|| "anthropic/claude-3-5-haiku-20241022".to_string());
            let resolved = resolve_or_default(&target);
            reject_non_anthropic_on_native(native_anthropic, resolved.0)?;
            Ok(RoutingTarget::Single { provider: resolved.0, model: resolved.1 })
        }
        RoutingMode::Quality => {
            let target = config
                .routing
                .complexity_tier("quality")
                .or_else(|| config.routing.complexity_tier("complex"))
                .or_else(|| config.routing.cascade.last().cloned())
                .or_else(|| std::env::var("RELAYPLANE_QUALITY_MODEL").ok())
                .unwrap_or_else(|| "anthropic/claude-3-5-sonnet-20241022".to_string());
            let resolved = resolve_or_default(&target);
            reject_non_anthropic_on_native(native_anthropic, resolved.0)?;
            Ok(RoutingTarget::Single { provider: resolved.0, model: resolved.1 })
        }
        RoutingMode::Auto => {
            if config.routing.mode == ConfigCascadeMode::Cascade && config.routing.cascade_enabled && !streaming {
                let models: Vec<String> = config.routing.cascade.clone();
                if models.is_empty() {
                    return Err(AppError::internal("cascade mode enabled with an empty cascade plan"));
                }
                return Ok(RoutingTarget::Cascade(CascadePlan {
                    models,
                    trigger: EscalationTrigger::Uncertainty,
                    max_escalations: config.routing.max_escalations,
                }));
            }

            // Streaming requests (or cascade disabled) degrade to the complexity tier.
            let tier = match complexity {
                Complexity::Simple => "simple",
                Complexity::Moderate => "moderate",
                Complexity::Complex => "complex",
            };
            let target = config
                .routing
                .complexity_tier(tier)
                .unwrap_or_else(|| default_for_task(task));
            let resolved = resolve_or_default(&target);
            reject_non_anthropic_on_native(native_anthropic, resolved.0)?;
            Ok(RoutingTarget::Single { provider: resolved.0, model: resolved.1 })
        }
    }
}

fn resolve_or_default(target: &str) -> (Provider, String) {
    model_registry::resolve_explicit(target)
        .unwrap_or((Provider::Anthropic, "claude-3-5-haiku-20241022".to_string()))
}

fn default_for_task(task: TaskType) -> String {
    match task {
        TaskType::CodeGeneration | TaskType::Analysis | TaskType::CreativeWriting => {
            "anthropic/claude-3-5-sonnet-20241022".to_string()
        }
        _ => "anthropic/claude-3-5-haiku-20241022".to_string(),
    }
}

fn reject_non_anthropic_on_native(native_anthropic: bool, provider: Provider) -> Result<(), AppError> {
    if native_anthropic && provider != Provider::Anthropic {
        return Err(AppError::invalid_request(format!(
            "the native /v1/messages endpoint only routes to Anthropic targets, got `{}`",
            provider.as_str()
        )));
    }
    Ok(())
}
