//! Runtime configuration: CLI flags, `CHATGPT_LOCAL_`-prefixed environment
//! variables, and the small static data the normaliser needs.

mod catalog;
mod home;

pub use catalog::{MODEL_CATALOG, ModelInfo, default_system_prompt, model_info};
pub use home::{credentials_path, home_dir, rate_limit_snapshot_path};

use clap::{Parser, ValueEnum};
use protocol::{ReasoningCompat, ReasoningEffort, ReasoningSummary};
use secrecy::SecretString;

/// `chatgpt-local serve` flags. Every flag is also an environment
/// variable via clap's `env` attribute.
#[derive(Debug, Clone, Parser)]
pub struct ServeArgs {
    #[arg(long, env = "CHATGPT_LOCAL_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "CHATGPT_LOCAL_PORT", default_value_t = 8765)]
    pub port: u16,

    #[arg(long, env = "CHATGPT_LOCAL_VERBOSE")]
    pub verbose: bool,

    /// When set, all routes other than `/` and `/health` require
    /// `Authorization: Bearer <access-token>`.
    #[arg(long, env = "CHATGPT_LOCAL_ACCESS_TOKEN")]
    pub access_token: Option<String>,

    #[arg(long, env = "CHATGPT_LOCAL_REASONING_EFFORT", default_value = "medium")]
    pub reasoning_effort: ReasoningEffortArg,

    #[arg(long, env = "CHATGPT_LOCAL_REASONING_SUMMARY", default_value = "auto")]
    pub reasoning_summary: ReasoningSummaryArg,

    #[arg(long, env = "CHATGPT_LOCAL_REASONING_COMPAT", default_value = "think-tags")]
    pub reasoning_compat: ReasoningCompatArg,

    /// Overrides the model family used to pick the baked-in system prompt
    /// and the permitted reasoning-effort set, for local testing.
    #[arg(long, env = "CHATGPT_LOCAL_DEBUG_MODEL")]
    pub debug_model: Option<String>,

    #[arg(long, env = "CHATGPT_LOCAL_EXPOSE_REASONING_MODELS")]
    pub expose_reasoning_models: bool,

    #[arg(long, env = "CHATGPT_LOCAL_ENABLE_WEB_SEARCH")]
    pub enable_web_search: bool,
}

/// Resolved server configuration built from [`ServeArgs`].
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub access_token: Option<SecretString>,
    pub default_reasoning_effort: ReasoningEffort,
    pub default_reasoning_summary: ReasoningSummary,
    pub reasoning_compat: ReasoningCompat,
    pub debug_model: Option<String>,
    pub expose_reasoning_models: bool,
    pub enable_web_search: bool,
}

impl From<ServeArgs> for Config {
    fn from(args: ServeArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            access_token: args.access_token.map(SecretString::from),
            default_reasoning_effort: args.reasoning_effort.into(),
            default_reasoning_summary: args.reasoning_summary.into(),
            reasoning_compat: args.reasoning_compat.into(),
            debug_model: args.debug_model,
            expose_reasoning_models: args.expose_reasoning_models,
            enable_web_search: args.enable_web_search,
        }
    }
}

/// Clap can't derive `ValueEnum` on a type from another crate, so these
/// thin wrappers carry the CLI parsing and convert into the canonical enums
/// everything else in the proxy works with.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReasoningEffortArg {
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

impl From<ReasoningEffortArg> for ReasoningEffort {
    fn from(value: ReasoningEffortArg) -> Self {
        match value {
            ReasoningEffortArg::Minimal => ReasoningEffort::Minimal,
            ReasoningEffortArg::Low => ReasoningEffort::Low,
            ReasoningEffortArg::Medium => ReasoningEffort::Medium,
            ReasoningEffortArg::High => ReasoningEffort::High,
            ReasoningEffortArg::Xhigh => ReasoningEffort::Xhigh,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReasoningSummaryArg {
    Auto,
    Concise,
    Detailed,
    None,
}

impl From<ReasoningSummaryArg> for ReasoningSummary {
    fn from(value: ReasoningSummaryArg) -> Self {
        match value {
            ReasoningSummaryArg::Auto => ReasoningSummary::Auto,
            ReasoningSummaryArg::Concise => ReasoningSummary::Concise,
            ReasoningSummaryArg::Detailed => ReasoningSummary::Detailed,
            ReasoningSummaryArg::None => ReasoningSummary::None,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReasoningCompatArg {
    #[value(name = "think-tags")]
    ThinkTags,
    #[value(name = "o3")]
    O3,
    #[value(name = "legacy")]
    Legacy,
}

impl From<ReasoningCompatArg> for ReasoningCompat {
    fn from(value: ReasoningCompatArg) -> Self {
        match value {
            ReasoningCompatArg::ThinkTags => ReasoningCompat::ThinkTags,
            ReasoningCompatArg::O3 => ReasoningCompat::O3,
            ReasoningCompatArg::Legacy => ReasoningCompat::Legacy,
        }
    }
}

/// The effort levels permitted for a given model family; a request's effort
/// is clamped to this set.
pub fn permitted_efforts(family: &str) -> &'static [ReasoningEffort] {
    use ReasoningEffort::*;

    match family {
        "gpt-5" => &[Minimal, Low, Medium, High, Xhigh],
        "codex" => &[Low, Medium, High],
        _ => &[Medium],
    }
}

/// Extracts a trailing `-<effort>` suffix from a model alias, e.g.
/// `gpt-5-high` -> (`gpt-5`, Some(High)).
pub fn split_effort_suffix(model: &str) -> (&str, Option<ReasoningEffort>) {
    for (suffix, effort) in [
        ("-minimal", ReasoningEffort::Minimal),
        ("-low", ReasoningEffort::Low),
        ("-medium", ReasoningEffort::Medium),
        ("-xhigh", ReasoningEffort::Xhigh),
        ("-high", ReasoningEffort::High),
    ] {
        if let Some(base) = model.strip_suffix(suffix) {
            return (base, Some(effort));
        }
    }

    (model, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_known_effort_suffixes() {
        assert_eq!(split_effort_suffix("gpt-5-high"), ("gpt-5", Some(ReasoningEffort::High)));
        assert_eq!(split_effort_suffix("gpt-5-xhigh"), ("gpt-5", Some(ReasoningEffort::Xhigh)));
        assert_eq!(split_effort_suffix("gpt-5"), ("gpt-5", None));
    }
}
