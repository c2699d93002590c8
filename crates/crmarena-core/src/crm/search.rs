// Search and free-form query tools, plus the terminal `respond` tool

use super::{fetch_rows, string_arg};
use crate::action::RESPOND_TOOL;
use crate::tools::{Tool, ToolContext, ToolExecutionResult};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Escape characters that would close a SOSL search group
fn sosl_term(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('{', "\\{")
        .replace('}', "\\}")
}

fn search_term(arguments: &Value) -> Result<&str, ToolExecutionResult> {
    let term = string_arg(arguments, "search_term", "search_term must be a string")?;
    if term.trim().is_empty() {
        return Err(ToolExecutionResult::tool_error("search_term cannot be empty"));
    }
    Ok(term)
}

// ============================================================================
// Full-text search
// ============================================================================

/// Published English knowledge articles matching a term
pub struct SearchKnowledgeArticlesTool;

#[async_trait]
impl Tool for SearchKnowledgeArticlesTool {
    fn name(&self) -> &str {
        "search_knowledge_articles"
    }

    fn description(&self) -> &str {
        "Searches for knowledge articles based on a given search term."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "search_term": {"type": "string", "description": "The term to search for in the knowledge articles."}
            },
            "required": ["search_term"]
        })
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        let term = match search_term(&arguments) {
            Ok(term) => term,
            Err(err) => return err,
        };
        let query = format!(
            "FIND {{{}}} IN ALL FIELDS RETURNING Knowledge__kav(Id, Title, FAQ_Answer__c WHERE PublishStatus='Online' AND Language='en_US')",
            sosl_term(term)
        );
        match fetch_rows(context, &query).await {
            Ok(rows) => ToolExecutionResult::success(json!(rows
                .iter()
                .map(|row| json!({
                    "Id": row.get("Id").cloned().unwrap_or(Value::Null),
                    "Title": row.get("Title").cloned().unwrap_or(Value::Null),
                    "Content": row.get("FAQ_Answer__c").cloned().unwrap_or(Value::Null),
                }))
                .collect::<Vec<_>>())),
            Err(err) => err,
        }
    }
}

pub struct SearchProductsTool;

#[async_trait]
impl Tool for SearchProductsTool {
    fn name(&self) -> &str {
        "search_products"
    }

    fn description(&self) -> &str {
        "Searches for products based on a given search term."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "search_term": {"type": "string", "description": "The term to search for in the products."}
            },
            "required": ["search_term"]
        })
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        let term = match search_term(&arguments) {
            Ok(term) => term,
            Err(err) => return err,
        };
        let query = format!(
            "FIND {{{}}} IN ALL FIELDS RETURNING Product2(Id, Name, Description)",
            sosl_term(term)
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

// ============================================================================
// Free-form queries
// ============================================================================

fn query_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": description}
        },
        "required": ["query"]
    })
}

async fn run_free_form(arguments: &Value, context: &ToolContext) -> ToolExecutionResult {
    let query = match string_arg(arguments, "query", "query must be a string") {
        Ok(query) => query,
        Err(err) => return err,
    };
    match fetch_rows(context, query).await {
        Ok(rows) => ToolExecutionResult::success(Value::Array(
            rows.into_iter().map(Value::Object).collect(),
        )),
        Err(err) => err,
    }
}

pub struct IssueSoqlQueryTool;

#[async_trait]
impl Tool for IssueSoqlQueryTool {
    fn name(&self) -> &str {
        "issue_soql_query"
    }

    fn description(&self) -> &str {
        "Executes a SOQL (Salesforce Object Query Language) query to retrieve data from Salesforce."
    }

    fn parameters_schema(&self) -> Value {
        query_schema("The SOQL query string to execute.")
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        run_free_form(&arguments, context).await
    }
}

pub struct IssueSoslQueryTool;

#[async_trait]
impl Tool for IssueSoslQueryTool {
    fn name(&self) -> &str {
        "issue_sosl_query"
    }

    fn description(&self) -> &str {
        "Executes a SOSL (Salesforce Object Search Language) query to search for records across multiple objects in Salesforce."
    }

    fn parameters_schema(&self) -> Value {
        query_schema("The SOSL query string to execute.")
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult {
        run_free_form(&arguments, context).await
    }
}

// ============================================================================
// Terminal answer
// ============================================================================

/// Carries the agent's final answer.
///
/// Environments intercept this call before dispatch; executing it directly
/// just echoes the content.
pub struct RespondTool;

#[async_trait]
impl Tool for RespondTool {
    fn name(&self) -> &str {
        RESPOND_TOOL
    }

    fn description(&self) -> &str {
        "Returns the input content without modification."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "The content to be returned."}
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
        match arguments.get("content") {
            Some(Value::String(content)) => ToolExecutionResult::success(content.as_str()),
            Some(other) => ToolExecutionResult::success(other.to_string()),
            None => ToolExecutionResult::tool_error("content must be provided"),
        }
    }
}
