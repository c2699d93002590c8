//! CRM tool set
//!
//! Fixed-shape tools over the Salesforce data model. Each tool validates its
//! argument shapes and reports mismatches as `ToolError`s; backend-backed
//! tools build one to three queries and aggregate the rows locally.
//!
//! Two registries are exposed: [`ToolRegistry::crm`] (the standard set plus
//! `respond`) and [`ToolRegistry::crm_with_free_form`], which adds raw SOQL and
//! SOSL tools.

mod analytics;
mod records;
mod search;

pub use analytics::{
    CalculateAverageHandleTimeTool, CalculateRegionAverageClosureTimesTool, FindIdWithMaxValueTool,
    FindIdWithMinValueTool, GetAgentsWithMaxCasesTool, GetAgentsWithMinCasesTool,
    GetMonthToCaseCountTool, GetPeriodTool, GetQualifiedAgentIdsByCaseCountTool, GetStartDateTool,
};
pub use records::{
    GetAccountIdByContactIdTool, GetAgentHandledCasesByPeriodTool,
    GetAgentTransferredCasesByPeriodTool, GetCasesTool, GetEmailMessagesByCaseIdTool,
    GetIssueCountsTool, GetIssuesTool, GetLivechatTranscriptByCaseIdTool,
    GetNonTransferredCaseIdsTool, GetOrderItemIdsByProductTool, GetPurchaseHistoryTool,
    GetShippingStateTool,
};
pub use search::{
    IssueSoqlQueryTool, IssueSoslQueryTool, RespondTool, SearchKnowledgeArticlesTool,
    SearchProductsTool,
};

use crate::backend::{QueryOutcome, Record};
use crate::tools::{ToolContext, ToolExecutionResult, ToolRegistry};
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde_json::{Map, Value};
use tracing::debug;

impl ToolRegistry {
    /// The standard CRM tool set, in catalogue order
    pub fn crm() -> Self {
        ToolRegistry::builder()
            .tool(GetAgentsWithMaxCasesTool)
            .tool(GetAgentsWithMinCasesTool)
            .tool(CalculateAverageHandleTimeTool)
            .tool(GetStartDateTool)
            .tool(GetPeriodTool)
            .tool(GetAgentHandledCasesByPeriodTool)
            .tool(GetQualifiedAgentIdsByCaseCountTool)
            .tool(GetCasesTool)
            .tool(GetNonTransferredCaseIdsTool)
            .tool(GetAgentTransferredCasesByPeriodTool)
            .tool(GetShippingStateTool)
            .tool(CalculateRegionAverageClosureTimesTool)
            .tool(GetOrderItemIdsByProductTool)
            .tool(GetIssueCountsTool)
            .tool(FindIdWithMaxValueTool)
            .tool(FindIdWithMinValueTool)
            .tool(GetAccountIdByContactIdTool)
            .tool(GetPurchaseHistoryTool)
            .tool(GetMonthToCaseCountTool)
            .tool(SearchKnowledgeArticlesTool)
            .tool(SearchProductsTool)
            .tool(GetIssuesTool)
            .tool(RespondTool)
            .tool(GetLivechatTranscriptByCaseIdTool)
            .tool(GetEmailMessagesByCaseIdTool)
            .build()
    }

    /// The CRM tool set plus free-form SOQL and SOSL tools
    pub fn crm_with_free_form() -> Self {
        let mut registry = Self::crm();
        registry.register(IssueSoqlQueryTool);
        registry.register(IssueSoslQueryTool);
        registry
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Date format of tool arguments (`2023-01-01T00:00:00Z`)
pub(crate) const SF_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Date format of record fields (`2023-01-01T10:30:00.000+0000`)
pub(crate) const RECORD_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

pub(crate) fn parse_sf_date(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, SF_DATE_FORMAT).ok()
}

pub(crate) fn parse_record_date(value: &Value) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(value.as_str()?, RECORD_DATE_FORMAT).ok()
}

/// Quote a value as a SOQL string literal
pub(crate) fn soql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// `field = 'x'` for one value, `field IN ('a', 'b')` for several
pub(crate) fn soql_condition(field: &str, values: &[String]) -> String {
    match values {
        [single] => format!("{field} = {}", soql_quote(single)),
        many => format!(
            "{field} IN ({})",
            many.iter()
                .map(|v| soql_quote(v))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Run a query for a tool; backend-rejected queries become tool errors.
pub(crate) async fn fetch_rows(
    context: &ToolContext,
    query: &str,
) -> Result<Vec<Record>, ToolExecutionResult> {
    debug!(query = %query, "Tool query");
    match context.backend.execute(query).await {
        Ok(QueryOutcome::Rows(rows)) => Ok(rows),
        Ok(QueryOutcome::Error(message)) => Err(ToolExecutionResult::tool_error(message)),
        Err(err) => Err(ToolExecutionResult::internal_error(err)),
    }
}

/// Required string argument with the tool's own type error
pub(crate) fn string_arg<'a>(
    arguments: &'a Value,
    name: &str,
    type_error: &str,
) -> Result<&'a str, ToolExecutionResult> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolExecutionResult::tool_error(type_error))
}

/// Optional list-of-strings argument.
///
/// Absent, null and empty lists are `None`; a non-list is an error.
pub(crate) fn string_list_arg(
    arguments: &Value,
    name: &str,
) -> Result<Option<Vec<String>>, ToolExecutionResult> {
    match arguments.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) if items.is_empty() => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items.iter().map(value_to_key).collect())),
        Some(_) => Err(ToolExecutionResult::tool_error(format!(
            "{name} must be a list"
        ))),
    }
}

/// Render a JSON value as a map key / query literal
pub(crate) fn value_to_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

/// Count one more `key`.
///
/// `serde_json` keeps object keys in insertion order, so the map lists keys
/// in the order they were first seen.
pub(crate) fn tally(counts: &mut Map<String, Value>, key: String) {
    let next = counts.get(&key).and_then(Value::as_u64).unwrap_or(0) + 1;
    counts.insert(key, Value::from(next));
}
