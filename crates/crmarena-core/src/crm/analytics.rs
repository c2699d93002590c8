// Aggregation tools
//
// Pure functions over data the agent already holds: counting, averaging,
// picking extremes and date arithmetic. None of them touch the backend.

use super::{parse_record_date, parse_sf_date, tally, value_to_key, SF_DATE_FORMAT};
use crate::tools::{Tool, ToolContext, ToolExecutionResult};
use async_trait::async_trait;
use chrono::{Duration, Months, NaiveDate, NaiveDateTime};
use serde_json::{json, Map, Value};

/// Average of values grouped by key, keeping first-seen key order
fn ordered_means(samples: Vec<(String, f64)>) -> Value {
    let mut order: Vec<String> = Vec::new();
    let mut sums: std::collections::HashMap<String, (f64, u32)> = Default::default();
    for (key, sample) in samples {
        let entry = sums.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            (0.0, 0)
        });
        entry.0 += sample;
        entry.1 += 1;
    }
    let mut result = Map::new();
    for key in order {
        if let Some((sum, count)) = sums.get(&key) {
            result.insert(key, json!(sum / f64::from(*count)));
        }
    }
    Value::Object(result)
}

fn owner_counts(arguments: &Value) -> Result<Map<String, Value>, ToolExecutionResult> {
    let Some(cases) = arguments.get("subset_cases").and_then(Value::as_array) else {
        return Err(ToolExecutionResult::tool_error(
            "Input 'subset_cases' must be a list",
        ));
    };
    let mut counts = Map::new();
    for (index, case) in cases.iter().enumerate() {
        let Some(case) = case.as_object() else {
            return Err(ToolExecutionResult::tool_error(format!(
                "Item at index {index} in subset_cases is not a dictionary"
            )));
        };
        match case.get("OwnerId") {
            None => {
                return Err(ToolExecutionResult::tool_error(format!(
                    "'OwnerId' not found in case record at index {index}"
                )))
            }
            Some(Value::String(owner)) => tally(&mut counts, owner.clone()),
            Some(_) => {
                return Err(ToolExecutionResult::tool_error(format!(
                    "'OwnerId' at index {index} is not a string"
                )))
            }
        }
    }
    Ok(counts)
}

fn owners_with_count(counts: &Map<String, Value>, pick: fn(u64, u64) -> u64) -> Value {
    let Some(target) = counts.values().filter_map(Value::as_u64).reduce(pick) else {
        return json!([]);
    };
    json!(counts
        .iter()
        .filter(|(_, count)| count.as_u64() == Some(target))
        .map(|(owner, _)| owner)
        .collect::<Vec<_>>())
}

fn owner_cases_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "subset_cases": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "OwnerId": {"type": "string", "description": "The ID of the agent who owns the case"}
                    },
                    "required": ["OwnerId"]
                },
                "description": "A list of case records, where each record is expected to have an 'OwnerId' field representing the agent ID."
            }
        },
        "required": ["subset_cases"]
    })
}

// ============================================================================
// Case counts per agent
// ============================================================================

/// Agents owning the most cases (all ties, first-seen order)
pub struct GetAgentsWithMaxCasesTool;

#[async_trait]
impl Tool for GetAgentsWithMaxCasesTool {
    fn name(&self) -> &str {
        "get_agents_with_max_cases"
    }

    fn description(&self) -> &str {
        "Returns a list of agent IDs with the maximum number of cases from the given subset of cases."
    }

    fn parameters_schema(&self) -> Value {
        owner_cases_schema()
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
        match owner_counts(&arguments) {
            Ok(counts) => ToolExecutionResult::success(owners_with_count(&counts, u64::max)),
            Err(err) => err,
        }
    }
}

/// Agents owning the fewest cases (all ties, first-seen order)
pub struct GetAgentsWithMinCasesTool;

#[async_trait]
impl Tool for GetAgentsWithMinCasesTool {
    fn name(&self) -> &str {
        "get_agents_with_min_cases"
    }

    fn description(&self) -> &str {
        "Returns a list of agent IDs with the minimum number of cases from the given subset of cases."
    }

    fn parameters_schema(&self) -> Value {
        owner_cases_schema()
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
        match owner_counts(&arguments) {
            Ok(counts) => ToolExecutionResult::success(owners_with_count(&counts, u64::min)),
            Err(err) => err,
        }
    }
}

// ============================================================================
// Handle and closure times
// ============================================================================

pub struct CalculateAverageHandleTimeTool;

#[async_trait]
impl Tool for CalculateAverageHandleTimeTool {
    fn name(&self) -> &str {
        "calculate_average_handle_time"
    }

    fn description(&self) -> &str {
        "Calculate the average handle time for each agent based on a list of cases."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "cases": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "CreatedDate": {"type": "string", "description": "The date and time when the case was created"},
                            "ClosedDate": {"type": "string", "description": "The date and time when the case was closed"},
                            "OwnerId": {"type": "string", "description": "The ID of the agent who owns the case"}
                        },
                        "required": ["CreatedDate", "ClosedDate", "OwnerId"]
                    },
                    "description": "A list of case dictionaries. Each case should have 'CreatedDate', 'ClosedDate', and 'OwnerId' keys."
                }
            },
            "required": ["cases"]
        })
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
        let Some(cases) = arguments.get("cases").and_then(Value::as_array) else {
            return ToolExecutionResult::tool_error("Input 'cases' must be a list");
        };

        let mut samples = Vec::with_capacity(cases.len());
        for (index, case) in cases.iter().enumerate() {
            let Some(case) = case.as_object() else {
                return ToolExecutionResult::tool_error(format!(
                    "Item at index {index} in cases is not a dictionary"
                ));
            };
            for key in ["CreatedDate", "ClosedDate", "OwnerId"] {
                if !case.contains_key(key) {
                    return ToolExecutionResult::tool_error(format!(
                        "'{key}' not found in case record at index {index}"
                    ));
                }
            }
            let (Some(created), Some(closed)) = (
                parse_record_date(&case["CreatedDate"]),
                parse_record_date(&case["ClosedDate"]),
            ) else {
                return ToolExecutionResult::tool_error(format!(
                    "Invalid date format at index {index}. Expected format: '%Y-%m-%dT%H:%M:%S.%f%z'"
                ));
            };
            if closed < created {
                return ToolExecutionResult::tool_error(format!(
                    "ClosedDate is earlier than CreatedDate at index {index}"
                ));
            }
            let minutes = (closed - created).num_milliseconds() as f64 / 60_000.0;
            samples.push((value_to_key(&case["OwnerId"]), minutes));
        }

        ToolExecutionResult::success(ordered_means(samples))
    }
}

/// Average closure time in seconds per shipping state.
///
/// Cases with an empty or null state are skipped.
pub struct CalculateRegionAverageClosureTimesTool;

#[async_trait]
impl Tool for CalculateRegionAverageClosureTimesTool {
    fn name(&self) -> &str {
        "calculate_region_average_closure_times"
    }

    fn description(&self) -> &str {
        "Calculates the average closure times for cases grouped by region (shipping state)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "cases": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "ShippingState": {"type": "string", "description": "The shipping state of the case"},
                            "CreatedDate": {"type": "string", "description": "The date and time when the case was created"},
                            "ClosedDate": {"type": "string", "description": "The date and time when the case was closed"}
                        },
                        "required": ["ShippingState", "CreatedDate", "ClosedDate"]
                    },
                    "description": "A list of dictionaries, where each dictionary represents a case and contains at least 'ShippingState', 'CreatedDate', and 'ClosedDate' keys."
                }
            },
            "required": ["cases"]
        })
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
        let Some(cases) = arguments.get("cases").and_then(Value::as_array) else {
            return ToolExecutionResult::tool_error("Input 'cases' must be a list");
        };
        if cases.is_empty() {
            return ToolExecutionResult::tool_error("Input 'cases' is empty");
        }

        let mut samples = Vec::new();
        for case in cases {
            let Some(case) = case.as_object() else {
                return ToolExecutionResult::tool_error(
                    "Each case in 'cases' must be a dictionary",
                );
            };
            if ["ShippingState", "CreatedDate", "ClosedDate"]
                .iter()
                .any(|key| !case.contains_key(*key))
            {
                return ToolExecutionResult::tool_error(
                    "Each case dictionary must contain 'ShippingState', 'CreatedDate', and 'ClosedDate' keys",
                );
            }

            let state = match &case["ShippingState"] {
                Value::String(state) if !state.is_empty() => state.clone(),
                _ => continue,
            };
            let (Some(created), Some(closed)) = (
                parse_record_date(&case["CreatedDate"]),
                parse_record_date(&case["ClosedDate"]),
            ) else {
                return ToolExecutionResult::tool_error(
                    "Invalid date format. Dates should be in the format 'YYYY-MM-DDTHH:MM:SSZ'",
                );
            };
            samples.push((state, (closed - created).num_milliseconds() as f64 / 1000.0));
        }

        ToolExecutionResult::success(ordered_means(samples))
    }
}

// ============================================================================
// Date arithmetic
// ============================================================================

pub struct GetStartDateTool;

#[async_trait]
impl Tool for GetStartDateTool {
    fn name(&self) -> &str {
        "get_start_date"
    }

    fn description(&self) -> &str {
        "Calculate the start date based on the end date, period, and interval count."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "end_date": {"type": "string", "description": "The end date in ISO format 'YYYY-MM-DDTHH:MM:SSZ'."},
                "period": {"type": "string", "description": "The time period unit ('day', 'week', 'month', or 'quarter')."},
                "interval_count": {"type": "integer", "description": "The number of periods to subtract from the end date."}
            },
            "required": ["end_date", "period", "interval_count"]
        })
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
        let Some(end_date) = arguments.get("end_date").and_then(Value::as_str) else {
            return ToolExecutionResult::tool_error("end_date must be a string");
        };
        let Some(period) = arguments.get("period").and_then(Value::as_str) else {
            return ToolExecutionResult::tool_error("period must be a string");
        };
        let Some(count) = arguments.get("interval_count").and_then(Value::as_i64) else {
            return ToolExecutionResult::tool_error("interval_count must be an integer");
        };
        let period = period.to_lowercase();
        if !matches!(period.as_str(), "day" | "week" | "month" | "quarter") {
            return ToolExecutionResult::tool_error(
                "Invalid period. Must be 'day', 'week', 'month', or 'quarter'",
            );
        }
        let Some(end) = parse_sf_date(end_date) else {
            return ToolExecutionResult::tool_error(
                "Invalid end_date format. Expected format: 'YYYY-MM-DDTHH:MM:SSZ'",
            );
        };
        if count < 0 {
            return ToolExecutionResult::tool_error("interval_count must be a non-negative integer");
        }
        let Ok(count) = u32::try_from(count) else {
            return ToolExecutionResult::tool_error(format!(
                "interval_count {count} is too large"
            ));
        };

        match subtract_period(end, &period, count) {
            Some(start) => ToolExecutionResult::success(start.format(SF_DATE_FORMAT).to_string()),
            None => ToolExecutionResult::tool_error("Resulting start date is out of range"),
        }
    }
}

/// Month arithmetic clamps to the last day of shorter months.
fn subtract_period(end: NaiveDateTime, period: &str, count: u32) -> Option<NaiveDateTime> {
    match period {
        "day" => end.checked_sub_signed(Duration::days(i64::from(count))),
        "week" => end.checked_sub_signed(Duration::weeks(i64::from(count))),
        "month" => end.checked_sub_months(Months::new(count)),
        "quarter" => end.checked_sub_months(Months::new(count.checked_mul(3)?)),
        _ => None,
    }
}

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// (start month, length in months) of a named period
fn named_period(name: &str) -> Option<(u32, u32)> {
    if let Some(position) = MONTH_NAMES.iter().position(|month| *month == name) {
        return Some((position as u32 + 1, 1));
    }
    match name {
        "Q1" => Some((1, 3)),
        "Q2" => Some((4, 3)),
        "Q3" => Some((7, 3)),
        "Q4" => Some((10, 3)),
        "Spring" => Some((3, 3)),
        "Summer" => Some((6, 3)),
        "Fall" => Some((9, 3)),
        "Winter" => Some((12, 3)),
        _ => None,
    }
}

pub struct GetPeriodTool;

#[async_trait]
impl Tool for GetPeriodTool {
    fn name(&self) -> &str {
        "get_period"
    }

    fn description(&self) -> &str {
        "Calculate the start and end date based on the period name and year."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "period_name": {"type": "string", "description": "The name of the period ('January', 'February', ..., 'December', 'Q1', 'Q2', 'Q3', 'Q4', 'Spring', 'Summer', 'Fall', 'Winter')."},
                "year": {"type": "integer", "description": "The year in which the period falls."}
            },
            "required": ["period_name", "year"]
        })
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
        let Some(period_name) = arguments.get("period_name").and_then(Value::as_str) else {
            return ToolExecutionResult::tool_error("period_name must be a string");
        };
        let Some(year) = arguments.get("year").and_then(Value::as_i64) else {
            return ToolExecutionResult::tool_error("year must be an integer");
        };
        let Some((month, length)) = named_period(period_name) else {
            return ToolExecutionResult::tool_error(format!(
                "Invalid period_name. Must be one of {}, Q1, Q2, Q3, Q4, Spring, Summer, Fall, Winter",
                MONTH_NAMES.join(", ")
            ));
        };
        if !(1..=9999).contains(&year) {
            return ToolExecutionResult::tool_error("year must be between 1 and 9999");
        }

        let range = NaiveDate::from_ymd_opt(year as i32, month, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .and_then(|start| Some((start, start.checked_add_months(Months::new(length))?)));
        match range {
            Some((start, end)) => ToolExecutionResult::success(json!({
                "start_date": start.format(SF_DATE_FORMAT).to_string(),
                "end_date": end.format(SF_DATE_FORMAT).to_string(),
            })),
            None => ToolExecutionResult::internal_error_msg(format!(
                "period {period_name} {year} produced no valid date"
            )),
        }
    }
}

/// Case counts per month name, from record `CreatedDate`s
pub struct GetMonthToCaseCountTool;

#[async_trait]
impl Tool for GetMonthToCaseCountTool {
    fn name(&self) -> &str {
        "get_month_to_case_count"
    }

    fn description(&self) -> &str {
        "Counts the number of cases for each month from a list of cases."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "cases": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "CreatedDate": {"type": "string", "description": "The date and time when the case was created, in the format 'YYYY-MM-DDTHH:MM:SSZ'."}
                        },
                        "required": ["CreatedDate"]
                    },
                    "description": "A list of dictionaries, where each dictionary represents a case and contains at least a 'CreatedDate' key with a value in the format 'YYYY-MM-DDTHH:MM:SSZ'."
                }
            },
            "required": ["cases"]
        })
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
        let Some(cases) = arguments.get("cases").and_then(Value::as_array) else {
            return ToolExecutionResult::tool_error("Input must be a list of dictionaries");
        };

        let mut months = Map::new();
        for case in cases {
            let Some(case) = case.as_object() else {
                return ToolExecutionResult::tool_error("Each case must be a dictionary");
            };
            let Some(created) = case.get("CreatedDate") else {
                return ToolExecutionResult::tool_error(
                    "Each case dictionary must contain a 'CreatedDate' key",
                );
            };
            let Some(created) = parse_record_date(created) else {
                return ToolExecutionResult::tool_error(
                    "Invalid date format. Expected format: 'YYYY-MM-DDTHH:MM:SSZ'",
                );
            };
            tally(&mut months, created.format("%B").to_string());
        }
        ToolExecutionResult::success(Value::Object(months))
    }
}

// ============================================================================
// Selection over dictionaries
// ============================================================================

pub struct GetQualifiedAgentIdsByCaseCountTool;

#[async_trait]
impl Tool for GetQualifiedAgentIdsByCaseCountTool {
    fn name(&self) -> &str {
        "get_qualified_agent_ids_by_case_count"
    }

    fn description(&self) -> &str {
        "Filters agent IDs based on the number of cases they have handled."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_handled_cases": {"type": "object", "description": "A dictionary where keys are agent IDs and values are the number of cases handled by each agent."},
                "n_cases": {"type": "integer", "description": "The minimum number of cases an agent must have handled to be included."}
            },
            "required": ["agent_handled_cases", "n_cases"]
        })
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
        let Some(handled) = arguments.get("agent_handled_cases").and_then(Value::as_object) else {
            return ToolExecutionResult::tool_error("agent_handled_cases must be a dictionary");
        };
        let Some(n_cases) = arguments.get("n_cases").and_then(Value::as_i64) else {
            return ToolExecutionResult::tool_error("n_cases must be an integer");
        };

        let mut qualified = Vec::new();
        for (agent, count) in handled {
            let Some(count) = count.as_f64() else {
                return ToolExecutionResult::tool_error(
                    "All values in agent_handled_cases must be numeric",
                );
            };
            if count > n_cases as f64 {
                qualified.push(agent.clone());
            }
        }
        ToolExecutionResult::success(json!(qualified))
    }
}

/// Keys holding the extreme value; null for an empty dictionary
fn ids_with_extreme(arguments: &Value, pick_max: bool) -> ToolExecutionResult {
    let Some(values) = arguments.get("values_by_id").and_then(Value::as_object) else {
        return ToolExecutionResult::tool_error("Input must be a dictionary");
    };
    if values.is_empty() {
        return ToolExecutionResult::success(Value::Null);
    }

    let mut numeric = Vec::with_capacity(values.len());
    for (id, value) in values {
        match value.as_f64() {
            Some(number) => numeric.push((id, number)),
            None => {
                return ToolExecutionResult::tool_error(
                    "All values in the dictionary must be numeric",
                )
            }
        }
    }

    let fold = if pick_max { f64::max } else { f64::min };
    let target = numeric
        .iter()
        .map(|(_, number)| *number)
        .fold(if pick_max { f64::NEG_INFINITY } else { f64::INFINITY }, fold);
    ToolExecutionResult::success(json!(numeric
        .into_iter()
        .filter(|(_, number)| *number == target)
        .map(|(id, _)| id.clone())
        .collect::<Vec<_>>()))
}

fn values_by_id_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "values_by_id": {"type": "object", "description": "A dictionary with IDs as keys and their corresponding values."}
        },
        "required": ["values_by_id"]
    })
}

pub struct FindIdWithMaxValueTool;

#[async_trait]
impl Tool for FindIdWithMaxValueTool {
    fn name(&self) -> &str {
        "find_id_with_max_value"
    }

    fn description(&self) -> &str {
        "Identifies the ID with the maximum value from a dictionary."
    }

    fn parameters_schema(&self) -> Value {
        values_by_id_schema()
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
        ids_with_extreme(&arguments, true)
    }
}

pub struct FindIdWithMinValueTool;

#[async_trait]
impl Tool for FindIdWithMinValueTool {
    fn name(&self) -> &str {
        "find_id_with_min_value"
    }

    fn description(&self) -> &str {
        "Identifies the ID with the minimum value from a dictionary."
    }

    fn parameters_schema(&self) -> Value {
        values_by_id_schema()
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
        ids_with_extreme(&arguments, false)
    }
}
