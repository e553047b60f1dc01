//! notebook_read: inspect a Jupyter notebook (.ipynb): cells, sources, text outputs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::context::ToolUseContext;
use crate::tools::error::{FieldError, SchemaError, ToolFailure};
use crate::tools::file::{check_path, resolve_path};
use crate::tools::registry::{BoxFuture, Tool};
use crate::tools::result::{ToolOutput, ToolResult};
use crate::tools::schema::{InputSchema, TypedSchema, parse_input};

const DEFAULT_LANGUAGE: &str = "python";

/// Notebook text fields are either one string or a list of lines.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
enum MultilineText {
    #[default]
    Empty,
    Text(String),
    Lines(Vec<String>),
}

impl MultilineText {
    fn joined(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.clone(),
            Self::Lines(lines) => lines.concat(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawNotebook {
    #[serde(default)]
    cells: Vec<RawCell>,
    #[serde(default)]
    metadata: RawMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    language_info: Option<LanguageInfo>,
}

#[derive(Debug, Deserialize)]
struct LanguageInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawCell {
    cell_type: String,
    #[serde(default)]
    source: MultilineText,
    #[serde(default)]
    execution_count: Option<u64>,
    #[serde(default)]
    outputs: Vec<RawOutput>,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    output_type: String,
    #[serde(default)]
    text: MultilineText,
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default)]
    ename: Option<String>,
    #[serde(default)]
    evalue: Option<String>,
}

/// One cell as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotebookCell {
    pub cell: usize,
    pub cell_type: String,
    pub language: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<u64>,
    pub outputs: Vec<String>,
}

/// Text rendering of one output; images become a `[image/png]`-style marker.
fn render_output(out: &RawOutput) -> Option<String> {
    match out.output_type.as_str() {
        "stream" => Some(out.text.joined()),
        "execute_result" | "display_data" => {
            if let Some(text) = out.data.get("text/plain") {
                return serde_json::from_value::<MultilineText>(text.clone())
                    .ok()
                    .map(|t| t.joined());
            }
            out.data
                .keys()
                .find(|k| k.starts_with("image/"))
                .map(|k| format!("[{k}]"))
        }
        "error" => Some(format!(
            "{}: {}",
            out.ename.as_deref().unwrap_or("Error"),
            out.evalue.as_deref().unwrap_or_default()
        )),
        _ => None,
    }
}

/// Parse notebook JSON into cells.
pub fn parse_notebook(text: &str) -> Result<Vec<NotebookCell>, serde_json::Error> {
    let nb: RawNotebook = serde_json::from_str(text)?;
    let language = nb
        .metadata
        .language_info
        .map(|l| l.name)
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
    Ok(nb
        .cells
        .iter()
        .enumerate()
        .map(|(i, c)| NotebookCell {
            cell: i,
            language: if c.cell_type == "code" {
                language.clone()
            } else {
                "markdown".to_string()
            },
            cell_type: c.cell_type.clone(),
            source: c.source.joined(),
            execution_count: c.execution_count,
            outputs: c.outputs.iter().filter_map(render_output).collect(),
        })
        .collect())
}

fn render_cells(cells: &[NotebookCell]) -> String {
    let mut out = String::new();
    for c in cells {
        out.push_str(&format!("<cell {}>", c.cell));
        if c.cell_type != "code" {
            out.push_str(&format!("<cell_type>{}</cell_type>", c.cell_type));
        }
        out.push_str(&c.source);
        out.push_str(&format!("</cell {}>\n", c.cell));
        for o in &c.outputs {
            out.push_str(o.trim_end());
            out.push('\n');
        }
    }
    out
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct NotebookReadInput {
    /// Path to the .ipynb file, relative to the working directory
    pub notebook_path: String,
}

/// notebook_read tool.
pub struct NotebookReadTool {
    schema: TypedSchema<NotebookReadInput>,
}

impl NotebookReadTool {
    pub fn new() -> Result<Self, SchemaError> {
        Ok(Self {
            schema: TypedSchema::compile()?,
        })
    }
}

impl Tool for NotebookReadTool {
    fn name(&self) -> &str {
        "notebook_read"
    }

    fn description(&self) -> &str {
        "Read a Jupyter notebook (.ipynb) and return its cells with their outputs."
    }

    fn input_schema(&self) -> &dyn InputSchema {
        &self.schema
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn validate_input(&self, input: &Value, ctx: &ToolUseContext) -> Result<(), FieldError> {
        let input: NotebookReadInput = parse_input(input)?;
        if !input.notebook_path.trim().ends_with(".ipynb") {
            return Err(FieldError::new("notebook_path", "must be a .ipynb file"));
        }
        check_path(&input.notebook_path, "notebook_path", &ctx.cwd)
    }

    fn execute<'a>(
        &'a self,
        input: Value,
        ctx: &'a ToolUseContext,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolFailure>> {
        Box::pin(async move {
            let input: NotebookReadInput = serde_json::from_value(input)?;
            let resolved =
                resolve_path(&input.notebook_path, &ctx.cwd).map_err(ToolFailure::Message)?;
            let text = tokio::fs::read_to_string(&resolved).await?;
            let cells = parse_notebook(&text)?;
            ctx.read_file_timestamps.record_from_disk(&resolved).await?;
            let for_llm = render_cells(&cells);
            Ok(ToolOutput::single(ToolResult::new(
                serde_json::to_value(&cells)?,
                for_llm,
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTEBOOK: &str = r##"{
      "metadata": { "language_info": { "name": "python" } },
      "nbformat": 4,
      "cells": [
        { "cell_type": "markdown", "source": ["# Title\n", "intro"] },
        {
          "cell_type": "code",
          "execution_count": 1,
          "source": "print('hi')",
          "outputs": [
            { "output_type": "stream", "name": "stdout", "text": ["hi\n"] },
            { "output_type": "display_data", "data": { "image/png": "iVBOR" } },
            { "output_type": "error", "ename": "ValueError", "evalue": "bad", "traceback": [] }
          ]
        }
      ]
    }"##;

    #[test]
    fn parses_cells_and_outputs() {
        let cells = parse_notebook(NOTEBOOK).unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].cell_type, "markdown");
        assert_eq!(cells[0].source, "# Title\nintro");
        assert_eq!(cells[1].language, "python");
        assert_eq!(cells[1].execution_count, Some(1));
        assert_eq!(cells[1].outputs, vec!["hi\n", "[image/png]", "ValueError: bad"]);

        let text = render_cells(&cells);
        assert!(text.contains("<cell 1>print('hi')</cell 1>"));
        assert!(text.contains("<cell_type>markdown</cell_type>"));
    }

    #[test]
    fn rejects_non_notebooks() {
        assert!(parse_notebook("[1, 2]").is_err());
    }
}
