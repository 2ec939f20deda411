//! Configuration types.
//!
//! Every component takes its own config struct; `OrchestratorConfig` bundles
//! them and applies `AGENT_POOL_*` environment overrides.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Worker registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of registered worker instances.
    pub max_workers: usize,
    /// Maximum number of instances a single session may own.
    pub max_workers_per_session: usize,
    /// Minimum time between two successful registrations.
    pub min_spawn_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            max_workers_per_session: 4,
            min_spawn_interval: Duration::from_millis(500),
        }
    }
}

/// Concurrency limiter configuration.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Limit applied to keys without an explicit entry.
    pub default_limit: usize,
    /// Per-key limits.
    pub per_key_limits: HashMap<String, usize>,
    /// How long `acquire` waits for a slot before failing.
    pub acquire_timeout: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            default_limit: 3,
            per_key_limits: HashMap::new(),
            acquire_timeout: Duration::from_secs(120),
        }
    }
}

/// Job ledger retention configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Terminal jobs older than this are evicted.
    pub max_age: Duration,
    /// Maximum number of terminal jobs retained.
    pub max_jobs: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(3600), // 1 hour
            max_jobs: 200,
        }
    }
}

/// Background task manager configuration.
#[derive(Debug, Clone)]
pub struct BackgroundConfig {
    /// Interval of the shared polling loop.
    pub poll_interval: Duration,
    /// Timeout applied when a launch does not specify one.
    pub default_task_timeout: Duration,
    /// Worker ids allowed to run background tasks.
    pub allowed_workers: Vec<String>,
    /// Finished tasks older than this are evicted.
    pub max_age: Duration,
    /// Maximum number of finished tasks retained.
    pub max_tasks: usize,
    /// Undelivered notifications kept per parent session; oldest dropped first.
    pub max_notifications: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            default_task_timeout: Duration::from_secs(30 * 60),
            allowed_workers: ["coder", "vision", "docs", "architect", "explorer"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_age: Duration::from_secs(3600), // 1 hour
            max_tasks: 200,
            max_notifications: 50,
        }
    }
}

/// Per-run workflow limits.
#[derive(Debug, Clone)]
pub struct WorkflowLimits {
    /// Maximum number of steps a workflow may declare.
    pub max_steps: usize,
    /// Maximum task text length in chars.
    pub max_task_chars: usize,
    /// Carry budget in chars.
    pub max_carry_chars: usize,
    /// Step timeout when the step does not declare one.
    pub default_step_timeout: Duration,
    /// Upper bound for any step timeout.
    pub max_step_timeout: Duration,
}

impl Default for WorkflowLimits {
    fn default() -> Self {
        Self {
            max_steps: 8,
            max_task_chars: 20_000,
            max_carry_chars: 6_000,
            default_step_timeout: Duration::from_secs(300), // 5 minutes
            max_step_timeout: Duration::from_secs(900),     // 15 minutes
        }
    }
}

/// Task dispatch configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Timeout used by `task_await` when none is given.
    pub default_await_timeout: Duration,
    /// Timeout used for the worker call when `task_start` gives none.
    pub default_task_timeout: Duration,
    /// Whether `task_start` spawns missing workers by default.
    pub auto_spawn: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_await_timeout: Duration::from_secs(60),
            default_task_timeout: Duration::from_secs(600), // 10 minutes
            auto_spawn: true,
        }
    }
}

/// Complete configuration for the orchestration core.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub registry: RegistryConfig,
    pub limiter: LimiterConfig,
    pub ledger: LedgerConfig,
    pub background: BackgroundConfig,
    pub workflow: WorkflowLimits,
    pub dispatch: DispatchConfig,
}

impl OrchestratorConfig {
    /// Defaults with `AGENT_POOL_*` environment overrides applied.
    ///
    /// Unparseable values keep the default and are logged.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = &lookup;

        override_value(read, "AGENT_POOL_MAX_WORKERS", &mut self.registry.max_workers);
        override_value(
            read,
            "AGENT_POOL_MAX_WORKERS_PER_SESSION",
            &mut self.registry.max_workers_per_session,
        );
        override_millis(
            read,
            "AGENT_POOL_MIN_SPAWN_INTERVAL_MS",
            &mut self.registry.min_spawn_interval,
        );
        override_value(
            read,
            "AGENT_POOL_DEFAULT_CONCURRENCY",
            &mut self.limiter.default_limit,
        );
        override_millis(
            read,
            "AGENT_POOL_ACQUIRE_TIMEOUT_MS",
            &mut self.limiter.acquire_timeout,
        );
        override_millis(read, "AGENT_POOL_JOB_MAX_AGE_MS", &mut self.ledger.max_age);
        override_value(read, "AGENT_POOL_JOB_MAX_COUNT", &mut self.ledger.max_jobs);
        override_millis(
            read,
            "AGENT_POOL_POLL_INTERVAL_MS",
            &mut self.background.poll_interval,
        );
        override_millis(
            read,
            "AGENT_POOL_BACKGROUND_TIMEOUT_MS",
            &mut self.background.default_task_timeout,
        );
        override_millis(
            read,
            "AGENT_POOL_BACKGROUND_MAX_AGE_MS",
            &mut self.background.max_age,
        );
        override_value(
            read,
            "AGENT_POOL_BACKGROUND_MAX_TASKS",
            &mut self.background.max_tasks,
        );
        override_value(read, "AGENT_POOL_MAX_STEPS", &mut self.workflow.max_steps);
        override_value(
            read,
            "AGENT_POOL_MAX_TASK_CHARS",
            &mut self.workflow.max_task_chars,
        );
        override_value(
            read,
            "AGENT_POOL_MAX_CARRY_CHARS",
            &mut self.workflow.max_carry_chars,
        );
        override_millis(
            read,
            "AGENT_POOL_STEP_TIMEOUT_MS",
            &mut self.workflow.default_step_timeout,
        );
        override_millis(
            read,
            "AGENT_POOL_MAX_STEP_TIMEOUT_MS",
            &mut self.workflow.max_step_timeout,
        );
        override_value(read, "AGENT_POOL_AUTO_SPAWN", &mut self.dispatch.auto_spawn);
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "registry.max_workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.limiter.default_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "limiter.default_limit".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.workflow.default_step_timeout > self.workflow.max_step_timeout {
            return Err(ConfigError::InvalidValue {
                key: "workflow.default_step_timeout".to_string(),
                message: format!(
                    "{:?} exceeds max_step_timeout {:?}",
                    self.workflow.default_step_timeout, self.workflow.max_step_timeout
                ),
            });
        }
        Ok(())
    }
}

fn override_value<T, F>(read: &F, key: &str, target: &mut T)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = read(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable config override"),
    }
}

fn override_millis<F>(read: &F, key: &str, target: &mut Duration)
where
    F: Fn(&str) -> Option<String>,
{
    let mut millis = target.as_millis() as u64;
    override_value(read, key, &mut millis);
    *target = Duration::from_millis(millis);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(OrchestratorConfig::default().validate().is_ok());
    }

    #[test]
    fn overrides_apply() {
        let mut config = OrchestratorConfig::default();
        config.apply_overrides(|key| match key {
            "AGENT_POOL_MAX_WORKERS" => Some("12".to_string()),
            "AGENT_POOL_POLL_INTERVAL_MS" => Some("250".to_string()),
            "AGENT_POOL_AUTO_SPAWN" => Some("false".to_string()),
            _ => None,
        });
        assert_eq!(config.registry.max_workers, 12);
        assert_eq!(config.background.poll_interval, Duration::from_millis(250));
        assert!(!config.dispatch.auto_spawn);
    }

    #[test]
    fn bad_override_keeps_default() {
        let mut config = OrchestratorConfig::default();
        config.apply_overrides(|key| {
            (key == "AGENT_POOL_MAX_CARRY_CHARS").then(|| "lots".to_string())
        });
        assert_eq!(config.workflow.max_carry_chars, 6_000);
    }

    #[test]
    fn step_timeout_must_fit_ceiling() {
        let mut config = OrchestratorConfig::default();
        config.workflow.default_step_timeout = Duration::from_secs(2000);
        assert!(config.validate().is_err());
    }
}
