// Tool catalogue command

use crate::output::OutputFormat;
use anyhow::Result;
use crmarena_core::ToolRegistry;

pub fn run(output: OutputFormat, full: bool) -> Result<()> {
    let registry = if full {
        ToolRegistry::crm_with_free_form()
    } else {
        ToolRegistry::crm()
    };

    if output.is_text() {
        print!("{}", registry.render_catalogue());
    } else {
        let definitions = registry.tool_definitions();
        output.print_value(&serde_json::json!({
            "data": definitions,
            "total": definitions.len(),
        }))?;
    }
    Ok(())
}
