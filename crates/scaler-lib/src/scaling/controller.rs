//! Autoscaling controller
//!
//! A sequential fold over buckets: one `ControllerState` in, one state and
//! one output record out. Scale-ups are applied at the bucket where they are
//! needed; scale-downs wait until `cooldown_buckets` buckets have passed
//! since the last accepted change.
//!
//! ```text
//! safe_demand = demand_estimate * (1 + safety_margin_percent / 100)
//! needed      = max(1, ceil(safe_demand / capacity_per_server))
//!
//! needed > current                                  -> current = needed
//! needed < current and (never changed or
//!     i - last_change >= cooldown_buckets)          -> current = needed
//! otherwise                                         -> unchanged
//! ```

use crate::error::{ConfigError, ConfigResult};
use crate::models::{ControllerOutput, ScaleAction};
use crate::observability::{DecisionLogger, ScalerMetrics};
use serde::{Deserialize, Serialize};

/// Default requests one server handles per bucket
pub const DEFAULT_CAPACITY_PER_SERVER: f64 = 100.0;

/// Default headroom added to every forecast (10%)
pub const DEFAULT_SAFETY_MARGIN_PERCENT: f64 = 10.0;

/// Default cooldown (15 minutes at 5-minute buckets)
pub const DEFAULT_COOLDOWN_BUCKETS: u32 = 3;

/// Sizing and hysteresis parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    #[serde(default = "default_capacity")]
    pub capacity_per_server: f64,
    #[serde(default = "default_safety_margin")]
    pub safety_margin_percent: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown_buckets: u32,
}

fn default_capacity() -> f64 {
    DEFAULT_CAPACITY_PER_SERVER
}

fn default_safety_margin() -> f64 {
    DEFAULT_SAFETY_MARGIN_PERCENT
}

fn default_cooldown() -> u32 {
    DEFAULT_COOLDOWN_BUCKETS
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            capacity_per_server: DEFAULT_CAPACITY_PER_SERVER,
            safety_margin_percent: DEFAULT_SAFETY_MARGIN_PERCENT,
            cooldown_buckets: DEFAULT_COOLDOWN_BUCKETS,
        }
    }
}

impl ScalingPolicy {
    pub fn new(capacity_per_server: f64, safety_margin_percent: f64, cooldown_buckets: i64) -> ConfigResult<Self> {
        let cooldown_buckets =
            u32::try_from(cooldown_buckets).map_err(|_| ConfigError::NegativeCooldown(cooldown_buckets))?;
        let policy = Self {
            capacity_per_server,
            safety_margin_percent,
            cooldown_buckets,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Build a policy whose cooldown is given in minutes. The cooldown in
    /// buckets is the whole number of buckets that fit into it.
    pub fn with_cooldown_minutes(
        capacity_per_server: f64,
        safety_margin_percent: f64,
        cooldown_minutes: i64,
        bucket_width_secs: i64,
    ) -> ConfigResult<Self> {
        if bucket_width_secs <= 0 {
            return Err(ConfigError::NonPositiveWidth(bucket_width_secs));
        }
        if cooldown_minutes < 0 {
            return Err(ConfigError::NegativeCooldown(cooldown_minutes));
        }
        let buckets = cooldown_minutes.saturating_mul(60) / bucket_width_secs;
        Self::new(capacity_per_server, safety_margin_percent, buckets)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.capacity_per_server.is_finite() && self.capacity_per_server > 0.0) {
            return Err(ConfigError::NonPositiveCapacity(self.capacity_per_server));
        }
        if !(self.safety_margin_percent.is_finite() && self.safety_margin_percent >= 0.0) {
            return Err(ConfigError::NegativeSafetyMargin(self.safety_margin_percent));
        }
        Ok(())
    }

    /// Servers needed to cover `demand` with the safety margin, at least one
    pub fn servers_needed(&self, demand: f64) -> u32 {
        let safe_demand = demand * (1.0 + self.safety_margin_percent / 100.0);
        let servers = (safe_demand / self.capacity_per_server).ceil();
        // float-to-int `as` saturates at u32::MAX
        (servers as u32).max(1)
    }

    pub fn system_capacity(&self, servers: u32) -> f64 {
        servers as f64 * self.capacity_per_server
    }
}

/// Per-bucket controller input
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerInput {
    pub bucket_index: i64,
    /// Forecast demand; drives the decision
    pub demand_estimate: f64,
    /// Observed demand; used only for overload accounting
    pub actual_demand: f64,
}

impl ControllerInput {
    pub fn new(bucket_index: i64, demand_estimate: f64, actual_demand: f64) -> Self {
        Self {
            bucket_index,
            demand_estimate,
            actual_demand,
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if !(self.demand_estimate.is_finite() && self.demand_estimate >= 0.0) {
            return Err(ConfigError::InvalidDemand {
                bucket_index: self.bucket_index,
                value: self.demand_estimate,
            });
        }
        if !(self.actual_demand.is_finite() && self.actual_demand >= 0.0) {
            return Err(ConfigError::InvalidActual {
                bucket_index: self.bucket_index,
                value: self.actual_demand,
            });
        }
        Ok(())
    }
}

/// Provisioned capacity and lifetime counters of one monitored series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerState {
    pub current_servers: u32,
    /// Bucket of the most recent accepted change; `None` if never changed
    pub last_change_index: Option<i64>,
    pub overload_count: u64,
    pub flap_count: u64,
    pub buckets_observed: u64,
    /// Bucket most recently stepped through; inputs must come after it
    #[serde(default)]
    pub last_bucket_index: Option<i64>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerState {
    pub fn new() -> Self {
        Self {
            current_servers: 1,
            last_change_index: None,
            overload_count: 0,
            flap_count: 0,
            buckets_observed: 0,
            last_bucket_index: None,
        }
    }

    /// Whether a scale-down at `bucket_index` clears the cooldown window
    pub fn cooldown_elapsed(&self, bucket_index: i64, cooldown_buckets: u32) -> bool {
        match self.last_change_index {
            None => true,
            Some(last) => bucket_index.saturating_sub(last) >= i64::from(cooldown_buckets),
        }
    }
}

/// Advance the controller by one bucket.
///
/// Invalid policy or input fails the call and leaves the caller's state as
/// it was. Bucket indices must strictly increase from one call to the next.
pub fn step(
    state: ControllerState,
    policy: &ScalingPolicy,
    input: &ControllerInput,
) -> ConfigResult<(ControllerState, ControllerOutput)> {
    policy.validate()?;
    input.validate()?;

    let i = input.bucket_index;
    if let Some(previous) = state.last_bucket_index {
        if i <= previous {
            return Err(ConfigError::OutOfOrderBucket {
                bucket_index: i,
                previous,
            });
        }
    }
    let needed = policy.servers_needed(input.demand_estimate);
    let previous = state.current_servers;
    let mut next = state;

    let action = if needed > previous {
        next.current_servers = needed;
        next.last_change_index = Some(i);
        ScaleAction::ScaleUp
    } else if needed < previous {
        if state.cooldown_elapsed(i, policy.cooldown_buckets) {
            next.current_servers = needed;
            next.last_change_index = Some(i);
            ScaleAction::ScaleDown
        } else {
            ScaleAction::CooldownBlocked
        }
    } else {
        ScaleAction::Hold
    };

    let system_capacity = policy.system_capacity(next.current_servers);
    let overloaded = input.actual_demand > system_capacity;
    if overloaded {
        next.overload_count += 1;
    }
    if next.current_servers != previous {
        next.flap_count += 1;
    }
    next.buckets_observed += 1;
    next.last_bucket_index = Some(i);

    let output = ControllerOutput {
        bucket_index: i,
        servers_online: next.current_servers,
        system_capacity,
        overloaded,
        needed,
        action,
        demand_estimate: input.demand_estimate,
        actual_demand: input.actual_demand,
    };
    Ok((next, output))
}

/// Outputs of a full run plus the state it ended in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRun {
    pub outputs: Vec<ControllerOutput>,
    pub final_state: ControllerState,
}

impl ScalingRun {
    pub fn servers(&self) -> Vec<u32> {
        self.outputs.iter().map(|o| o.servers_online).collect()
    }
}

/// Fold a sequence of inputs, in order, from a fresh state
pub fn run(policy: &ScalingPolicy, inputs: &[ControllerInput]) -> ConfigResult<ScalingRun> {
    let mut state = ControllerState::new();
    let mut outputs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let (next, output) = step(state, policy, input)?;
        state = next;
        outputs.push(output);
    }
    Ok(ScalingRun {
        outputs,
        final_state: state,
    })
}

/// Owns the state of one monitored series and reports each decision
pub struct Autoscaler {
    policy: ScalingPolicy,
    state: ControllerState,
    logger: DecisionLogger,
    metrics: Option<ScalerMetrics>,
}

impl Autoscaler {
    pub fn new(policy: ScalingPolicy, logger: DecisionLogger) -> ConfigResult<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            state: ControllerState::new(),
            logger,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: ScalerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Resume from a snapshotted state
    pub fn with_state(mut self, state: ControllerState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn policy(&self) -> &ScalingPolicy {
        &self.policy
    }

    pub fn step(&mut self, input: &ControllerInput) -> ConfigResult<ControllerOutput> {
        let before = self.state;
        let (next, output) = step(before, &self.policy, input)?;
        self.state = next;

        match output.action {
            ScaleAction::ScaleUp => {
                self.logger
                    .log_scale_up(output.bucket_index, before.current_servers, output.servers_online, output.demand_estimate);
                if let Some(m) = &self.metrics {
                    m.inc_scale_up();
                }
            }
            ScaleAction::ScaleDown => {
                self.logger
                    .log_scale_down(output.bucket_index, before.current_servers, output.servers_online, output.demand_estimate);
                if let Some(m) = &self.metrics {
                    m.inc_scale_down();
                }
            }
            ScaleAction::CooldownBlocked => {
                let since = before
                    .last_change_index
                    .map(|last| output.bucket_index.saturating_sub(last))
                    .unwrap_or(i64::MAX);
                self.logger
                    .log_scale_down_blocked(output.bucket_index, output.servers_online, output.needed, since);
                if let Some(m) = &self.metrics {
                    m.inc_scale_down_blocked();
                }
            }
            ScaleAction::Hold => {}
        }

        if output.overloaded {
            self.logger
                .log_overload(output.bucket_index, output.actual_demand, output.system_capacity);
            if let Some(m) = &self.metrics {
                m.inc_overload();
            }
        }
        if let Some(m) = &self.metrics {
            m.set_servers_online(output.servers_online);
        }

        Ok(output)
    }

    /// Step through all inputs in order
    pub fn run(&mut self, inputs: &[ControllerInput]) -> ConfigResult<Vec<ControllerOutput>> {
        inputs.iter().map(|input| self.step(input)).collect()
    }

    /// Hand back the final state, e.g. to snapshot it
    pub fn into_state(self) -> ControllerState {
        self.state
    }
}
