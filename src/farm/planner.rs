// =============================================================================
// Activity Planner — human-like daily on-chain action schedules
// =============================================================================
//
// For each day the planner draws a small randomized batch of DeFi actions:
//   - 2..=5 actions, halved on weekends, capped by what the gas budget spread
//     over the remaining campaign days can afford
//   - Gaussian-spaced times inside the active-hours window
//   - never the same action type back-to-back; swap tokens rotate
//   - micro USD amounts converted at a fixed ETH price
//
// The plan for a given date is persisted; regenerating for the same date
// returns the stored plan. When a new day begins, the previous plan is
// archived into a 7-day rolling history.
// =============================================================================

use std::path::PathBuf;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::farm::config::{token_address, FarmerConfig, SWAP_TOKENS};
use crate::state;

/// Days of plan history retained.
const HISTORY_DAYS: usize = 7;
/// Minimum Gaussian gap between actions (hours).
const MIN_GAP_HOURS: f64 = 0.5;

// ---------------------------------------------------------------------------
// Plan entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SwapEthToToken,
    SwapTokenToEth,
    SelfTransfer,
    LpAdd,
    LpRemove,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SwapEthToToken => "swap_eth_to_token",
            Self::SwapTokenToEth => "swap_token_to_eth",
            Self::SelfTransfer => "self_transfer",
            Self::LpAdd => "lp_add",
            Self::LpRemove => "lp_remove",
        };
        write!(f, "{s}")
    }
}

/// Types drawn during planning (`lp_remove` only appears as a degrade path).
const PLANNED_TYPES: &[ActionType] = &[
    ActionType::SwapEthToToken,
    ActionType::SwapTokenToEth,
    ActionType::SelfTransfer,
    ActionType::LpAdd,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Done,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_eth: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEntry {
    pub id: String,
    pub time_utc: DateTime<Utc>,
    pub action_type: ActionType,
    pub chain: String,
    pub params: ActionParams,
    pub status: ActionStatus,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayHistory {
    pub date: String,
    pub actions: Vec<PlanEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub actions: Vec<PlanEntry>,
    #[serde(default)]
    pub history: Vec<DayHistory>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanStats {
    pub date: Option<String>,
    pub total: usize,
    pub pending: usize,
    pub done: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

pub struct ActivityPlanner {
    path: PathBuf,
    config: FarmerConfig,
    schedule: RwLock<Schedule>,
}

impl ActivityPlanner {
    pub fn new(config: FarmerConfig) -> Self {
        let path = PathBuf::from(&config.farm_schedule_file);
        let schedule = state::load_json_or_default(&path);
        Self {
            path,
            config,
            schedule: RwLock::new(schedule),
        }
    }

    fn save(&self) {
        if let Err(e) = state::save_json(&self.path, &*self.schedule.read()) {
            tracing::warn!(error = %e, "schedule save failed");
        }
    }

    // -------------------------------------------------------------------------
    // Public API
    // -------------------------------------------------------------------------

    /// Today's plan, generated on first call for the date and stable after.
    pub fn get_daily_plan(&self, now: DateTime<Utc>, budget_remaining: f64) -> Vec<PlanEntry> {
        let date_str = now.format("%Y-%m-%d").to_string();

        if self.schedule.read().date.as_deref() == Some(date_str.as_str()) {
            return self.schedule.read().actions.clone();
        }

        let actions = self.generate_plan(now, budget_remaining, &mut rand::thread_rng());

        let mut schedule = self.schedule.write();
        if !schedule.actions.is_empty() {
            if let Some(previous_date) = schedule.date.clone() {
                let archived = DayHistory {
                    date: previous_date,
                    actions: std::mem::take(&mut schedule.actions),
                };
                schedule.history.push(archived);
                let overflow = schedule.history.len().saturating_sub(HISTORY_DAYS);
                if overflow > 0 {
                    schedule.history.drain(..overflow);
                }
            }
        }
        schedule.date = Some(date_str.clone());
        schedule.actions = actions.clone();
        drop(schedule);
        self.save();

        info!(date = %date_str, count = actions.len(), "daily plan generated");
        actions
    }

    /// Mark an action done (with its tx hash) or failed (with the error).
    pub fn mark_action_done(&self, action_id: &str, tx_hash: Option<String>, error: Option<String>) {
        {
            let mut schedule = self.schedule.write();
            if let Some(action) = schedule.actions.iter_mut().find(|a| a.id == action_id) {
                action.status = if error.is_none() {
                    ActionStatus::Done
                } else {
                    ActionStatus::Failed
                };
                action.tx_hash = tx_hash;
                action.error = error;
                action.executed_at = Some(Utc::now());
            }
        }
        self.save();
    }

    /// Pending actions whose scheduled time has passed.
    pub fn pending_actions(&self, now: DateTime<Utc>) -> Vec<PlanEntry> {
        self.schedule
            .read()
            .actions
            .iter()
            .filter(|a| a.status == ActionStatus::Pending && a.time_utc <= now)
            .cloned()
            .collect()
    }

    /// Time of the soonest pending action.
    pub fn next_action_time(&self) -> Option<DateTime<Utc>> {
        self.schedule
            .read()
            .actions
            .iter()
            .filter(|a| a.status == ActionStatus::Pending)
            .map(|a| a.time_utc)
            .min()
    }

    pub fn stats(&self) -> PlanStats {
        let schedule = self.schedule.read();
        let count = |status: ActionStatus| {
            schedule.actions.iter().filter(|a| a.status == status).count()
        };
        PlanStats {
            date: schedule.date.clone(),
            total: schedule.actions.len(),
            pending: count(ActionStatus::Pending),
            done: count(ActionStatus::Done),
            failed: count(ActionStatus::Failed),
        }
    }

    // -------------------------------------------------------------------------
    // Generation
    // -------------------------------------------------------------------------

    /// Build one day's randomized action batch.
    pub fn generate_plan<R: Rng>(
        &self,
        now: DateTime<Utc>,
        budget_remaining: f64,
        rng: &mut R,
    ) -> Vec<PlanEntry> {
        let cfg = &self.config;

        // Weekend halving, floored at one action.
        let is_weekend = now.weekday().num_days_from_monday() >= 5;
        let max_actions = if is_weekend {
            ((cfg.daily_max_actions as f64 * cfg.weekend_reduction) as usize).max(1)
        } else {
            cfg.daily_max_actions
        };

        // Spread the remaining budget over the remaining campaign days.
        let days_elapsed = (now - cfg.campaign_start).num_days().max(0);
        let days_left = (cfg.farming_duration_days - days_elapsed).max(1);
        let daily_gas = budget_remaining / days_left as f64;
        let avg_cost = cfg
            .chain("base")
            .map(|c| c.avg_gas_cost_usd)
            .unwrap_or(0.15);
        let affordable = if avg_cost > 0.0 {
            (daily_gas / avg_cost) as usize
        } else {
            max_actions
        };

        let upper = max_actions.min(affordable.max(2)).max(2);
        let mut num_actions = rng.gen_range(2..=upper).min(max_actions.max(1));

        // Only schedule into the future when called mid-day.
        let start_h = cfg.day_start_hour as f64;
        let end_h = cfg.day_end_hour as f64;
        let now_hour = now.hour() as f64 + now.minute() as f64 / 60.0;
        let mut effective_start = start_h.max(now_hour + 0.5);
        if effective_start >= end_h - 1.0 {
            num_actions = num_actions.min(2);
            effective_start = (now_hour + 0.25).min(end_h - 0.5);
        }

        let times = generate_times(now, num_actions, effective_start, end_h, rng);

        // Type sequence: never the same type twice in a row; swap tokens
        // rotate through the registry on consecutive picks.
        let mut actions = Vec::with_capacity(times.len());
        let mut last_type: Option<ActionType> = None;
        let mut token_idx = 0usize;

        for (i, time_utc) in times.into_iter().enumerate() {
            let available: Vec<ActionType> = PLANNED_TYPES
                .iter()
                .copied()
                .filter(|t| Some(*t) != last_type)
                .collect();
            let action_type = *available.choose(rng).expect("non-empty action types");
            last_type = Some(action_type);

            let params = self.generate_params(action_type, token_idx, rng);
            if matches!(
                action_type,
                ActionType::SwapEthToToken | ActionType::SwapTokenToEth
            ) {
                token_idx = (token_idx + 1) % SWAP_TOKENS.len();
            }

            actions.push(PlanEntry {
                id: format!("a{}_{}", i + 1, now.format("%m%d")),
                time_utc,
                action_type,
                chain: "base".to_string(),
                params,
                status: ActionStatus::Pending,
                tx_hash: None,
                error: None,
                executed_at: None,
            });
        }

        actions
    }

    fn generate_params<R: Rng>(
        &self,
        action_type: ActionType,
        token_idx: usize,
        rng: &mut R,
    ) -> ActionParams {
        let cfg = &self.config;
        let amount_usd = rng.gen_range(cfg.min_action_usd..=cfg.max_action_usd);
        let amount_eth = round8(amount_usd / cfg.eth_price_usd);

        let token_name = SWAP_TOKENS[token_idx % SWAP_TOKENS.len()].to_string();
        let token = token_address("base", &token_name)
            .or_else(|| token_address("base", "USDC"))
            .map(|a| format!("{a:#x}"));

        match action_type {
            ActionType::SwapEthToToken => ActionParams {
                token,
                token_name: Some(token_name),
                amount_eth: Some(amount_eth),
            },
            ActionType::SwapTokenToEth => ActionParams {
                token,
                token_name: Some(token_name),
                amount_eth: None,
            },
            ActionType::SelfTransfer => ActionParams {
                token: None,
                token_name: None,
                amount_eth: Some(amount_eth),
            },
            ActionType::LpAdd => ActionParams {
                token,
                token_name: Some(token_name),
                amount_eth: Some(round8(amount_eth / 2.0)),
            },
            ActionType::LpRemove => ActionParams::default(),
        }
    }
}

impl std::fmt::Debug for ActivityPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.stats();
        f.debug_struct("ActivityPlanner")
            .field("date", &s.date)
            .field("total", &s.total)
            .field("pending", &s.pending)
            .finish()
    }
}

/// Draw `count` action times with Gaussian gaps in `[start_h, end_h]`,
/// strictly increasing (clamped collisions at the day end are dropped).
fn generate_times<R: Rng>(
    day: DateTime<Utc>,
    count: usize,
    start_h: f64,
    end_h: f64,
    rng: &mut R,
) -> Vec<DateTime<Utc>> {
    if count == 0 || start_h >= end_h {
        return Vec::new();
    }

    let mean_gap = (end_h - start_h) / (count as f64 + 1.0);
    let sigma = (mean_gap / 2.0).max(f64::EPSILON);
    let gap_dist = Normal::new(mean_gap, sigma).expect("valid normal");

    let midnight = day
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight exists")
        .and_utc();

    let mut raw = Vec::with_capacity(count);
    let mut current_h = start_h;

    for _ in 0..count {
        let gap = gap_dist.sample(rng).max(MIN_GAP_HOURS);
        current_h += gap;
        if current_h >= end_h {
            current_h = end_h - rng.gen_range(0.1..0.5);
        }

        let hour = current_h.floor();
        let minute = ((current_h - hour) * 60.0).floor();
        let second = rng.gen_range(0..60);
        raw.push(
            midnight
                + Duration::hours(hour as i64)
                + Duration::minutes(minute as i64)
                + Duration::seconds(second),
        );
    }

    raw.sort();
    // Clamped draws can collide at the day end; keep the strictly-increasing
    // prefix semantics by dropping non-advancing entries.
    let mut times: Vec<DateTime<Utc>> = Vec::with_capacity(raw.len());
    for t in raw {
        if times.last().map(|last| t > *last).unwrap_or(true) {
            times.push(t);
        }
    }
    times
}

fn round8(x: f64) -> f64 {
    (x * 1e8).round() / 1e8
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn planner(dir: &tempfile::TempDir) -> ActivityPlanner {
        let config = FarmerConfig {
            farm_schedule_file: dir
                .path()
                .join("farm_schedule.json")
                .to_string_lossy()
                .into_owned(),
            ..FarmerConfig::default()
        };
        ActivityPlanner::new(config)
    }

    fn morning(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 6, 0, 0).unwrap()
    }

    #[test]
    fn plan_invariants_hold_across_seeds() {
        let dir = tempfile::tempdir().unwrap();
        let p = planner(&dir);
        // Wednesday.
        let day = morning(2026, 3, 4);

        for seed in 0..50u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = p.generate_plan(day, 1.5, &mut rng);

            assert!(plan.len() >= 1 && plan.len() <= 5, "plan size {}", plan.len());

            for pair in plan.windows(2) {
                // Strictly increasing times.
                assert!(pair[0].time_utc < pair[1].time_utc);
                // No adjacent type repeats.
                assert_ne!(pair[0].action_type, pair[1].action_type);
            }

            for action in &plan {
                let hour = action.time_utc.hour() as f64
                    + action.time_utc.minute() as f64 / 60.0;
                assert!(hour >= 8.0 && hour <= 23.0, "time {hour} outside window");
                assert_eq!(action.status, ActionStatus::Pending);
                assert_eq!(action.chain, "base");
            }
        }
    }

    #[test]
    fn weekend_plans_are_smaller() {
        let dir = tempfile::tempdir().unwrap();
        let p = planner(&dir);
        // Saturday.
        let saturday = morning(2026, 3, 7);

        for seed in 0..20u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = p.generate_plan(saturday, 1.5, &mut rng);
            assert!(plan.len() <= 2, "weekend plan too large: {}", plan.len());
        }
    }

    #[test]
    fn tight_budget_caps_the_draw() {
        let dir = tempfile::tempdir().unwrap();
        let p = planner(&dir);
        let day = morning(2026, 4, 14);

        // remaining $0.30 near the campaign tail: affordable caps n at 2.
        for seed in 0..20u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = p.generate_plan(day, 0.30, &mut rng);
            assert!((1..=2).contains(&plan.len()), "plan size {}", plan.len());
        }
    }

    #[test]
    fn late_day_call_yields_two_or_fewer() {
        let dir = tempfile::tempdir().unwrap();
        let p = planner(&dir);
        let late = Utc.with_ymd_and_hms(2026, 3, 4, 22, 45, 0).unwrap();

        for seed in 0..20u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = p.generate_plan(late, 1.5, &mut rng);
            assert!(plan.len() <= 2, "late-day plan too large: {}", plan.len());
        }
    }

    #[test]
    fn daily_plan_is_idempotent_per_date() {
        let dir = tempfile::tempdir().unwrap();
        let p = planner(&dir);
        let day = morning(2026, 3, 4);

        let first = p.get_daily_plan(day, 1.5);
        let second = p.get_daily_plan(day, 1.5);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.time_utc, b.time_utc);
            assert_eq!(a.action_type, b.action_type);
        }
    }

    #[test]
    fn new_day_archives_previous_plan() {
        let dir = tempfile::tempdir().unwrap();
        let p = planner(&dir);

        p.get_daily_plan(morning(2026, 3, 4), 1.5);
        p.get_daily_plan(morning(2026, 3, 5), 1.5);

        let schedule = p.schedule.read();
        assert_eq!(schedule.date.as_deref(), Some("2026-03-05"));
        assert_eq!(schedule.history.len(), 1);
        assert_eq!(schedule.history[0].date, "2026-03-04");
    }

    #[test]
    fn history_bounded_to_seven_days() {
        let dir = tempfile::tempdir().unwrap();
        let p = planner(&dir);
        for d in 1..=10u32 {
            p.get_daily_plan(morning(2026, 3, d), 1.5);
        }
        assert!(p.schedule.read().history.len() <= HISTORY_DAYS);
    }

    #[test]
    fn mark_done_and_pending_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let p = planner(&dir);
        let day = morning(2026, 3, 4);
        let plan = p.get_daily_plan(day, 1.5);
        let first_id = plan[0].id.clone();

        // Before any time passes nothing is due.
        assert!(p.pending_actions(day).is_empty());

        // After the last scheduled time everything is due.
        let end_of_day = Utc.with_ymd_and_hms(2026, 3, 4, 23, 59, 0).unwrap();
        assert_eq!(p.pending_actions(end_of_day).len(), plan.len());

        p.mark_action_done(&first_id, Some("0xabc".into()), None);
        assert_eq!(p.pending_actions(end_of_day).len(), plan.len() - 1);

        let stats = p.stats();
        assert_eq!(stats.done, 1);
        assert_eq!(stats.failed, 0);

        p.mark_action_done(&plan[1].id, None, Some("rpc down".into()));
        assert_eq!(p.stats().failed, 1);
    }

    #[test]
    fn schedule_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let day = morning(2026, 3, 4);
        let first = {
            let p = planner(&dir);
            p.get_daily_plan(day, 1.5)
        };
        let p = planner(&dir);
        let second = p.get_daily_plan(day, 1.5);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].id, second[0].id);
    }

    #[test]
    fn swap_params_rotate_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let p = planner(&dir);
        let mut rng = StdRng::seed_from_u64(3);

        let a = p.generate_params(ActionType::SwapEthToToken, 0, &mut rng);
        let b = p.generate_params(ActionType::SwapEthToToken, 1, &mut rng);
        assert_eq!(a.token_name.as_deref(), Some("USDC"));
        assert_eq!(b.token_name.as_deref(), Some("DAI"));
        assert!(a.amount_eth.unwrap() > 0.0);

        let t = p.generate_params(ActionType::SelfTransfer, 0, &mut rng);
        assert!(t.token.is_none());
        assert!(t.amount_eth.unwrap() > 0.0);
    }

    #[test]
    fn action_type_wire_names_pinned() {
        assert_eq!(
            serde_json::to_string(&ActionType::SwapEthToToken).unwrap(),
            "\"swap_eth_to_token\""
        );
        assert_eq!(
            serde_json::to_string(&ActionType::LpAdd).unwrap(),
            "\"lp_add\""
        );
        assert_eq!(
            serde_json::to_string(&ActionStatus::Pending).unwrap(),
            "\"pending\""
        );
    }
}
