// Record lookup tools
//
// Tools that build SOQL over the case, case-history, account, order and
// messaging objects. Argument shapes are checked before any query is issued.

use super::{
    fetch_rows, parse_sf_date, soql_condition, soql_quote, string_arg, string_list_arg,
    tally, value_to_key,
};
use crate::backend::Record;
use crate::tools::{Tool, ToolContext, ToolExecutionResult};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

const START_DATE_DESCRIPTION: &str =
    "The start date of the period in Salesforce datetime format (e.g., '2023-01-01T00:00:00Z').";
const END_DATE_DESCRIPTION: &str =
    "The end date of the period in Salesforce datetime format (e.g., '2023-12-31T23:59:59Z').";

/// Both bounds of a date range, validated against the argument date format
fn date_range<'a>(
    arguments: &'a Value,
    format_error: &str,
) -> Result<(&'a str, &'a str), ToolExecutionResult> {
    let (Some(start), Some(end)) = (
        arguments.get("start_date").and_then(Value::as_str),
        arguments.get("end_date").and_then(Value::as_str),
    ) else {
        return Err(ToolExecutionResult::tool_error(
            "start_date and end_date must be strings",
        ));
    };
    if parse_sf_date(start).is_none() || parse_sf_date(end).is_none() {
        return Err(ToolExecutionResult::tool_error(format_error));
    }
    Ok((start, end))
}

fn date_range_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "start_date": {"type": "string", "description": START_DATE_DESCRIPTION},
            "end_date": {"type": "string", "description": END_DATE_DESCRIPTION}
        },
        "required": ["start_date", "end_date"]
    })
}

fn rows_to_json(rows: Vec<Record>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

fn count_field(rows: &[Record], field: &str) -> Value {
    let mut counts = Map::new();
    for row in rows {
        tally(&mut counts, row.get(field).map(value_to_key).unwrap_or_else(|| "None".into()));
    }
    Value::Object(counts)
}

// ============================================================================
// Case ownership history
// ============================================================================

/// Owner-assignment counts per agent in a date range
pub struct GetAgentHandledCasesByPeriodTool;

#[async_trait]
impl Tool for GetAgentHandledCasesByPeriodTool {
    fn name(&self) -> &str {
        "get_agent_handled_cases_by_period"
    }

    fn description(&self) -> &str {
        "Retrieve the number of cases handled by each agent within a specified time period."
    }

    fn parameters_schema(&self) -> Value {
        date_range_schema()
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        let (start, end) = match date_range(
            &arguments,
            "Invalid date format. Use 'YYYY-MM-DDTHH:MM:SSZ'",
        ) {
            Ok(range) => range,
            Err(err) => return err,
        };
        let query = format!(
            "SELECT NewValue__c, CreatedDate FROM CaseHistory__c WHERE CreatedDate >= {start} AND CreatedDate <= {end} AND Field__c = 'Owner Assignment'"
        );
        match fetch_rows(context, &query).await {
            Ok(rows) => ToolExecutionResult::success(count_field(&rows, "NewValue__c")),
            Err(err) => err,
        }
    }
}

/// Cases with exactly one owner assignment in the range
pub struct GetNonTransferredCaseIdsTool;

#[async_trait]
impl Tool for GetNonTransferredCaseIdsTool {
    fn name(&self) -> &str {
        "get_non_transferred_case_ids"
    }

    fn description(&self) -> &str {
        "Retrieves the IDs of cases that were not transferred between agents within a specified date range."
    }

    fn parameters_schema(&self) -> Value {
        date_range_schema()
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        let (start, end) = match date_range(
            &arguments,
            "start_date and end_date must be in the format 'YYYY-MM-DDTHH:MM:SSZ'",
        ) {
            Ok(range) => range,
            Err(err) => return err,
        };
        let query = format!(
            "SELECT CaseId__c FROM CaseHistory__c WHERE Field__c = 'Owner Assignment' AND CreatedDate >= {start} AND CreatedDate <= {end} GROUP BY CaseId__c HAVING COUNT(Id) = 1"
        );
        match fetch_rows(context, &query).await {
            Ok(rows) => ToolExecutionResult::success(json!(rows
                .iter()
                .filter_map(|row| row.get("CaseId__c").cloned())
                .collect::<Vec<_>>())),
            Err(err) => err,
        }
    }
}

/// Transfers away from each agent in the range
pub struct GetAgentTransferredCasesByPeriodTool;

#[async_trait]
impl Tool for GetAgentTransferredCasesByPeriodTool {
    fn name(&self) -> &str {
        "get_agent_transferred_cases_by_period"
    }

    fn description(&self) -> &str {
        "Retrieves the number of cases transferred between agents within a specified date range."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "start_date": {"type": "string", "description": "The start date of the period to check, in Salesforce datetime format (e.g., '2023-01-01T00:00:00Z')."},
                "end_date": {"type": "string", "description": "The end date of the period to check, in Salesforce datetime format (e.g., '2023-12-31T23:59:59Z')."},
                "qualified_agent_ids": {"type": "array", "items": {"type": "string"}, "description": "A list of agent IDs (User ID) to filter cases by."}
            },
            "required": ["start_date", "end_date"]
        })
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        let (start, end) = match date_range(
            &arguments,
            "start_date and end_date must be in the format 'YYYY-MM-DDTHH:MM:SSZ'",
        ) {
            Ok(range) => range,
            Err(err) => return err,
        };
        let qualified = match string_list_arg(&arguments, "qualified_agent_ids") {
            Ok(ids) => ids.unwrap_or_default(),
            Err(err) => return err,
        };

        let query = format!(
            "SELECT OldValue__c, CreatedDate FROM CaseHistory__c WHERE Field__c = 'Owner Assignment' AND OldValue__c != NULL AND CreatedDate >= {start} AND CreatedDate <= {end}"
        );
        let rows = match fetch_rows(context, &query).await {
            Ok(rows) => rows,
            Err(err) => return err,
        };

        let mut transfers = Map::new();
        for row in &rows {
            let agent = row.get("OldValue__c").map(value_to_key).unwrap_or_default();
            if qualified.is_empty() || qualified.contains(&agent) {
                tally(&mut transfers, agent);
            }
        }
        ToolExecutionResult::success(Value::Object(transfers))
    }
}

// ============================================================================
// Cases
// ============================================================================

/// List filters of `get_cases` and the case field each one constrains
const CASE_FILTERS: [(&str, &str, &str); 5] = [
    ("agent_ids", "OwnerId", "A list of agent IDs (User ID) to filter cases by."),
    ("case_ids", "Id", "A list of case IDs to filter cases by."),
    ("order_item_ids", "OrderItemId__c", "A list of order item IDs (OrderItem__c ID) to filter cases by."),
    ("issue_ids", "IssueId__c", "A list of issue IDs (Issue__c ID) to filter cases by."),
    ("statuses", "Status", "A list of case statuses to filter cases by."),
];

pub struct GetCasesTool;

impl GetCasesTool {
    fn build_query(arguments: &Value) -> Result<String, ToolExecutionResult> {
        let mut conditions = Vec::new();

        for (name, operator) in [("start_date", ">="), ("end_date", "<")] {
            match arguments.get(name) {
                None | Some(Value::Null) => {}
                Some(Value::String(date)) if date.is_empty() => {}
                Some(Value::String(date)) => {
                    if parse_sf_date(date).is_none() {
                        return Err(ToolExecutionResult::tool_error(format!(
                            "{name} must be in the format 'YYYY-MM-DDTHH:MM:SSZ'"
                        )));
                    }
                    conditions.push(format!("CreatedDate {operator} {date}"));
                }
                Some(_) => {
                    return Err(ToolExecutionResult::tool_error(format!(
                        "{name} must be a string in Salesforce datetime format"
                    )))
                }
            }
        }

        for (name, field, _) in CASE_FILTERS {
            if let Some(values) = string_list_arg(arguments, name)? {
                conditions.push(soql_condition(field, &values));
            }
        }

        if conditions.is_empty() {
            return Err(ToolExecutionResult::tool_error(
                "At least one filter criteria must be provided",
            ));
        }
        Ok(format!(
            "SELECT OwnerId, CreatedDate, ClosedDate, AccountId FROM Case WHERE {}",
            conditions.join(" AND ")
        ))
    }
}

#[async_trait]
impl Tool for GetCasesTool {
    fn name(&self) -> &str {
        "get_cases"
    }

    fn description(&self) -> &str {
        "Retrieve cases based on various filtering criteria."
    }

    fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        properties.insert(
            "start_date".into(),
            json!({"type": "string", "description": START_DATE_DESCRIPTION}),
        );
        properties.insert(
            "end_date".into(),
            json!({"type": "string", "description": END_DATE_DESCRIPTION}),
        );
        for (name, _, description) in CASE_FILTERS {
            properties.insert(
                name.into(),
                json!({"type": "array", "items": {"type": "string"}, "description": description}),
            );
        }
        json!({"type": "object", "properties": properties, "required": []})
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        let query = match Self::build_query(&arguments) {
            Ok(query) => query,
            Err(err) => return err,
        };
        match fetch_rows(context, &query).await {
            Ok(rows) => ToolExecutionResult::success(rows_to_json(rows)),
            Err(err) => err,
        }
    }
}

/// Attach each case's account `ShippingState` (null when unknown)
pub struct GetShippingStateTool;

#[async_trait]
impl Tool for GetShippingStateTool {
    fn name(&self) -> &str {
        "get_shipping_state"
    }

    fn description(&self) -> &str {
        "Adds shipping state information to the given cases."
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
                            "AccountId": {"type": "string", "description": "The ID of the account associated with the case"}
                        },
                        "required": ["AccountId"]
                    },
                    "description": "A list of dictionaries, where each dictionary represents a case and contains at least 'AccountId' key."
                }
            },
            "required": ["cases"]
        })
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        let Some(cases) = arguments.get("cases").and_then(Value::as_array) else {
            return ToolExecutionResult::tool_error("Input 'cases' must be a list");
        };
        if cases.is_empty() {
            return ToolExecutionResult::success(json!([]));
        }

        let mut records = Vec::with_capacity(cases.len());
        for case in cases {
            let Some(case) = case.as_object() else {
                return ToolExecutionResult::tool_error("Each case in 'cases' must be a dictionary");
            };
            if !case.contains_key("AccountId") {
                return ToolExecutionResult::tool_error(
                    "Each case dictionary must contain an 'AccountId' key",
                );
            }
            records.push(case.clone());
        }

        let account_ids: Vec<String> = records
            .iter()
            .map(|case| value_to_key(&case["AccountId"]))
            .collect();
        let query = format!(
            "SELECT Id, ShippingState FROM Account WHERE {}",
            soql_condition("Id", &account_ids)
        );
        let rows = match fetch_rows(context, &query).await {
            Ok(rows) => rows,
            Err(err) => return err,
        };

        let states: HashMap<String, Value> = rows
            .iter()
            .filter_map(|row| {
                let id = row.get("Id")?.as_str()?.to_string();
                Some((id, row.get("ShippingState").cloned().unwrap_or(Value::Null)))
            })
            .collect();
        for (case, account_id) in records.iter_mut().zip(&account_ids) {
            let state = states.get(account_id).cloned().unwrap_or(Value::Null);
            case.insert("ShippingState".into(), state);
        }
        ToolExecutionResult::success(rows_to_json(records))
    }
}

// ============================================================================
// Products and orders
// ============================================================================

pub struct GetOrderItemIdsByProductTool;

#[async_trait]
impl Tool for GetOrderItemIdsByProductTool {
    fn name(&self) -> &str {
        "get_order_item_ids_by_product"
    }

    fn description(&self) -> &str {
        "Retrieves the order item IDs associated with a given product."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "product_id": {"type": "string", "description": "The ID of the product."}
            },
            "required": ["product_id"]
        })
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        let product_id = match string_arg(&arguments, "product_id", "product_id must be a string") {
            Ok(id) => id,
            Err(err) => return err,
        };
        if product_id.trim().is_empty() {
            return ToolExecutionResult::tool_error("product_id cannot be empty");
        }
        let query = format!(
            "SELECT Id FROM OrderItem WHERE Product2Id = {}",
            soql_quote(product_id)
        );
        match fetch_rows(context, &query).await {
            Ok(rows) => ToolExecutionResult::success(json!(rows
                .iter()
                .filter_map(|row| row.get("Id").cloned())
                .collect::<Vec<_>>())),
            Err(err) => err,
        }
    }
}

/// Case counts per issue for a set of order items, most frequent first
pub struct GetIssueCountsTool;

#[async_trait]
impl Tool for GetIssueCountsTool {
    fn name(&self) -> &str {
        "get_issue_counts"
    }

    fn description(&self) -> &str {
        "Retrieves the issue counts for a product within a given time period."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "start_date": {"type": "string", "description": "The start date of the time period (format: 'YYYY-MM-DDTHH:MM:SSZ')."},
                "end_date": {"type": "string", "description": "The end date of the time period (format: 'YYYY-MM-DDTHH:MM:SSZ')."},
                "order_item_ids": {"type": "array", "items": {"type": "string"}, "description": "A list of order item IDs to filter issues by."}
            },
            "required": ["start_date", "end_date", "order_item_ids"]
        })
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        let (Some(start), Some(end)) = (
            arguments.get("start_date").and_then(Value::as_str),
            arguments.get("end_date").and_then(Value::as_str),
        ) else {
            return ToolExecutionResult::tool_error("start_date and end_date must be strings");
        };
        let order_item_ids = match arguments.get("order_item_ids").and_then(Value::as_array) {
            Some(ids) if !ids.is_empty() => ids.iter().map(value_to_key).collect::<Vec<_>>(),
            _ => return ToolExecutionResult::tool_error("order_item_ids must be a non-empty list"),
        };

        let quoted: Vec<String> = order_item_ids.iter().map(|id| soql_quote(id)).collect();
        let query = format!(
            "SELECT IssueId__c, COUNT(Id) IssueCount FROM Case WHERE OrderItemId__c IN ({}) AND CreatedDate >= {start} AND CreatedDate <= {end} GROUP BY IssueId__c ORDER BY COUNT(Id) DESC",
            quoted.join(", ")
        );
        let rows = match fetch_rows(context, &query).await {
            Ok(rows) => rows,
            Err(err) => return err,
        };

        let mut counts = Map::new();
        for row in rows {
            let issue = row.get("IssueId__c").map(value_to_key).unwrap_or_default();
            counts.insert(issue, row.get("IssueCount").cloned().unwrap_or(Value::Null));
        }
        ToolExecutionResult::success(Value::Object(counts))
    }
}

pub struct GetAccountIdByContactIdTool;

#[async_trait]
impl Tool for GetAccountIdByContactIdTool {
    fn name(&self) -> &str {
        "get_account_id_by_contact_id"
    }

    fn description(&self) -> &str {
        "Retrieves the Account ID associated with a given Contact ID."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "contact_id": {"type": "string", "description": "The ID of the contact."}
            },
            "required": ["contact_id"]
        })
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        let contact_id = match string_arg(&arguments, "contact_id", "contact_id must be a string") {
            Ok(id) => id,
            Err(err) => return err,
        };
        if contact_id.trim().is_empty() {
            return ToolExecutionResult::tool_error("contact_id cannot be empty");
        }
        let query = format!(
            "SELECT AccountId FROM Contact WHERE Id = {} LIMIT 1",
            soql_quote(contact_id)
        );
        match fetch_rows(context, &query).await {
            Ok(rows) => ToolExecutionResult::success(
                rows.first()
                    .and_then(|row| row.get("AccountId").cloned())
                    .unwrap_or(Value::Null),
            ),
            Err(err) => err,
        }
    }
}

/// Activated order items for an account on a given day, limited to products
pub struct GetPurchaseHistoryTool;

#[async_trait]
impl Tool for GetPurchaseHistoryTool {
    fn name(&self) -> &str {
        "get_purchase_history"
    }

    fn description(&self) -> &str {
        "Retrieves the purchase history for a specific account, date, and set of products."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "account_id": {"type": "string", "description": "The ID of the account to search for."},
                "purchase_date": {"type": "string", "description": "The date of purchase in 'YYYY-MM-DDTHH:MM:SSZ' format."},
                "related_product_ids": {"type": "array", "items": {"type": "string"}, "description": "A list of product IDs to search for."}
            },
            "required": ["account_id", "purchase_date", "related_product_ids"]
        })
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        let account_id = match string_arg(&arguments, "account_id", "account_id must be a string") {
            Ok(id) => id,
            Err(err) => return err,
        };
        let purchase_date =
            match string_arg(&arguments, "purchase_date", "purchase_date must be a string") {
                Ok(date) => date,
                Err(err) => return err,
            };
        let Some(product_ids) = arguments.get("related_product_ids").and_then(Value::as_array)
        else {
            return ToolExecutionResult::tool_error("related_product_ids must be a list");
        };
        let Some(product_ids) = product_ids
            .iter()
            .map(|id| id.as_str().map(soql_quote))
            .collect::<Option<Vec<_>>>()
        else {
            return ToolExecutionResult::tool_error(
                "All product IDs in related_product_ids must be strings",
            );
        };
        let Some(purchased) = parse_sf_date(purchase_date) else {
            return ToolExecutionResult::tool_error(
                "purchase_date must be in 'YYYY-MM-DDTHH:MM:SSZ' format",
            );
        };

        let query = format!(
            "SELECT Product2Id FROM OrderItem WHERE OrderItem.Order.AccountId = {} AND OrderItem.Order.EffectiveDate = {} AND Product2Id IN ({}) AND OrderItem.Order.Status = 'Activated'",
            soql_quote(account_id),
            purchased.format("%Y-%m-%d"),
            product_ids.join(", ")
        );
        match fetch_rows(context, &query).await {
            Ok(rows) => ToolExecutionResult::success(rows_to_json(rows)),
            Err(err) => err,
        }
    }
}

pub struct GetIssuesTool;

#[async_trait]
impl Tool for GetIssuesTool {
    fn name(&self) -> &str {
        "get_issues"
    }

    fn description(&self) -> &str {
        "Retrieves a list of issue records from Salesforce."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        match fetch_rows(context, "SELECT Id, Name FROM Issue__c").await {
            Ok(rows) => ToolExecutionResult::success(rows_to_json(rows)),
            Err(err) => err,
        }
    }
}

// ============================================================================
// Case communications
// ============================================================================

fn case_id_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "case_id": {"type": "string", "description": description}
        },
        "required": ["case_id"]
    })
}

pub struct GetEmailMessagesByCaseIdTool;

#[async_trait]
impl Tool for GetEmailMessagesByCaseIdTool {
    fn name(&self) -> &str {
        "get_email_messages_by_case_id"
    }

    fn description(&self) -> &str {
        "Retrieves email messages associated with a specific case ID."
    }

    fn parameters_schema(&self) -> Value {
        case_id_schema("The ID of the case to retrieve email messages for.")
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        let case_id = match string_arg(&arguments, "case_id", "case_id must be a string") {
            Ok(id) => id,
            Err(err) => return err,
        };
        let query = format!(
            "SELECT Subject, TextBody, FromAddress, ToAddress, MessageDate FROM EmailMessage WHERE ParentId = {}",
            soql_quote(case_id)
        );
        match fetch_rows(context, &query).await {
            Ok(rows) => ToolExecutionResult::success(rows_to_json(rows)),
            Err(err) => err,
        }
    }
}

pub struct GetLivechatTranscriptByCaseIdTool;

#[async_trait]
impl Tool for GetLivechatTranscriptByCaseIdTool {
    fn name(&self) -> &str {
        "get_livechat_transcript_by_case_id"
    }

    fn description(&self) -> &str {
        "Retrieves live chat transcripts associated with a specific case ID."
    }

    fn parameters_schema(&self) -> Value {
        case_id_schema("The ID of the case to retrieve live chat transcripts for.")
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        let case_id = match string_arg(&arguments, "case_id", "case_id must be a string") {
            Ok(id) => id,
            Err(err) => return err,
        };
        let query = format!(
            "SELECT Body, EndTime FROM LiveChatTranscript WHERE CaseId = {}",
            soql_quote(case_id)
        );
        match fetch_rows(context, &query).await {
            Ok(rows) => ToolExecutionResult::success(rows_to_json(rows)),
            Err(err) => err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use std::sync::Arc;

    fn context_with(backend: InMemoryBackend) -> (ToolContext, Arc<InMemoryBackend>) {
        let backend = Arc::new(backend);
        (ToolContext::new(backend.clone()), backend)
    }

    async fn run(tool: &dyn Tool, arguments: Value, context: &ToolContext) -> Result<String, String> {
        tool.execute(arguments, context)
            .await
            .into_observation(tool.name())
    }

    #[test]
    fn test_get_cases_query() {
        let query = GetCasesTool::build_query(&json!({
            "start_date": "2023-01-01T00:00:00Z",
            "agent_ids": ["005A"],
            "statuses": ["New", "Closed"],
            "case_ids": []
        }))
        .unwrap();
        assert_eq!(
            query,
            "SELECT OwnerId, CreatedDate, ClosedDate, AccountId FROM Case WHERE CreatedDate >= 2023-01-01T00:00:00Z AND OwnerId = '005A' AND Status IN ('New', 'Closed')"
        );
    }

    #[test]
    fn test_get_cases_rejects_bad_filters() {
        let err = GetCasesTool::build_query(&json!({})).unwrap_err();
        assert_eq!(
            err.into_observation("get_cases"),
            Err("Error: At least one filter criteria must be provided".to_string())
        );
        let err = GetCasesTool::build_query(&json!({"end_date": "2023-01-01"})).unwrap_err();
        assert_eq!(
            err.into_observation("get_cases"),
            Err("Error: end_date must be in the format 'YYYY-MM-DDTHH:MM:SSZ'".to_string())
        );
        let err = GetCasesTool::build_query(&json!({"agent_ids": "005A"})).unwrap_err();
        assert_eq!(
            err.into_observation("get_cases"),
            Err("Error: agent_ids must be a list".to_string())
        );
    }

    #[tokio::test]
    async fn test_handled_cases_by_period_counts_new_owners() {
        let (ctx, backend) = context_with(InMemoryBackend::new().with_rows(
            "FROM CaseHistory__c",
            vec![
                json!({"NewValue__c": "005A", "CreatedDate": "2023-01-02T00:00:00.000+0000"}),
                json!({"NewValue__c": "005B", "CreatedDate": "2023-01-03T00:00:00.000+0000"}),
                json!({"NewValue__c": "005A", "CreatedDate": "2023-01-04T00:00:00.000+0000"}),
            ],
        ));
        let observation = run(
            &GetAgentHandledCasesByPeriodTool,
            json!({"start_date": "2023-01-01T00:00:00Z", "end_date": "2023-02-01T00:00:00Z"}),
            &ctx,
        )
        .await;
        assert_eq!(observation, Ok(r#"{"005A":2,"005B":1}"#.to_string()));
        assert!(backend.queries()[0].contains("Field__c = 'Owner Assignment'"));
    }

    #[tokio::test]
    async fn test_handled_cases_rejects_bad_dates_without_querying() {
        let (ctx, backend) = context_with(InMemoryBackend::new());
        let observation = run(
            &GetAgentHandledCasesByPeriodTool,
            json!({"start_date": "2023-01-01", "end_date": "2023-02-01T00:00:00Z"}),
            &ctx,
        )
        .await;
        assert_eq!(
            observation,
            Err("Error: Invalid date format. Use 'YYYY-MM-DDTHH:MM:SSZ'".to_string())
        );
        assert!(backend.queries().is_empty());
    }

    #[tokio::test]
    async fn test_transferred_cases_filtered_by_qualified_agents() {
        let (ctx, _) = context_with(InMemoryBackend::new().with_rows(
            "OldValue__c != NULL",
            vec![
                json!({"OldValue__c": "005A"}),
                json!({"OldValue__c": "005B"}),
                json!({"OldValue__c": "005A"}),
            ],
        ));
        let observation = run(
            &GetAgentTransferredCasesByPeriodTool,
            json!({
                "start_date": "2023-01-01T00:00:00Z",
                "end_date": "2023-02-01T00:00:00Z",
                "qualified_agent_ids": ["005A"]
            }),
            &ctx,
        )
        .await;
        assert_eq!(observation, Ok(r#"{"005A":2}"#.to_string()));
    }

    #[tokio::test]
    async fn test_shipping_state_attached() {
        let (ctx, backend) = context_with(InMemoryBackend::new().with_rows(
            "FROM Account",
            vec![json!({"Id": "001A", "ShippingState": "CA"})],
        ));
        let observation = run(
            &GetShippingStateTool,
            json!({"cases": [{"AccountId": "001A", "Id": "500A"}, {"AccountId": "001B"}]}),
            &ctx,
        )
        .await
        .unwrap();
        let value: Value = serde_json::from_str(&observation).unwrap();
        assert_eq!(value[0]["ShippingState"], "CA");
        assert_eq!(value[1]["ShippingState"], Value::Null);
        assert!(backend.queries()[0].ends_with("WHERE Id IN ('001A', '001B')"));
    }

    #[tokio::test]
    async fn test_backend_rejection_becomes_tool_error() {
        let (ctx, _) = context_with(
            InMemoryBackend::new().with_error("FROM Issue__c", "INVALID_TYPE: sObject type 'Issue__c' is not supported"),
        );
        let observation = run(&GetIssuesTool, json!({}), &ctx).await;
        assert_eq!(
            observation,
            Err("Error: INVALID_TYPE: sObject type 'Issue__c' is not supported".to_string())
        );
    }

    #[tokio::test]
    async fn test_purchase_history_query_uses_date_part() {
        let (ctx, backend) = context_with(
            InMemoryBackend::new().with_rows("FROM OrderItem", vec![json!({"Product2Id": "01tA"})]),
        );
        let observation = run(
            &GetPurchaseHistoryTool,
            json!({
                "account_id": "001A",
                "purchase_date": "2023-05-04T00:00:00Z",
                "related_product_ids": ["01tA", "01tB"]
            }),
            &ctx,
        )
        .await;
        assert_eq!(observation, Ok(r#"[{"Product2Id":"01tA"}]"#.to_string()));
        let query = &backend.queries()[0];
        assert!(query.contains("OrderItem.Order.EffectiveDate = 2023-05-04 "));
        assert!(query.contains("Product2Id IN ('01tA', '01tB')"));
    }

    #[tokio::test]
    async fn test_issue_counts_and_account_lookup() {
        let (ctx, _) = context_with(
            InMemoryBackend::new()
                .with_rows(
                    "GROUP BY IssueId__c",
                    vec![
                        json!({"IssueId__c": "a03B", "IssueCount": 4}),
                        json!({"IssueId__c": "a03A", "IssueCount": 1}),
                    ],
                )
                .with_rows("FROM Contact", vec![]),
        );
        let observation = run(
            &GetIssueCountsTool,
            json!({
                "start_date": "2023-01-01T00:00:00Z",
                "end_date": "2023-02-01T00:00:00Z",
                "order_item_ids": ["802A"]
            }),
            &ctx,
        )
        .await;
        assert_eq!(observation, Ok(r#"{"a03B":4,"a03A":1}"#.to_string()));

        let observation = run(&GetAccountIdByContactIdTool, json!({"contact_id": "003A"}), &ctx).await;
        assert_eq!(observation, Ok("null".to_string()));
        let observation = run(&GetAccountIdByContactIdTool, json!({"contact_id": " "}), &ctx).await;
        assert_eq!(observation, Err("Error: contact_id cannot be empty".to_string()));
    }
}
