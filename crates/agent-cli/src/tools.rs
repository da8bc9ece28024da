//! Built-in tools offered to the model.
//!
//! File tools are confined to the working directory given on the command
//! line; paths resolving outside it are rejected.

use std::path::{Path, PathBuf};

use agent_core::{AgentError, ParameterSchema, Result, Tool, ToolCall, ToolCallResult, ToolRegistry, ToolSchema};
use async_trait::async_trait;
use serde_json::{Value, json};

/// Files larger than this are refused by `read_file`
const MAX_READ_BYTES: u64 = 512 * 1024;

/// Registry with every built-in tool rooted at `work_dir`
pub fn registry(work_dir: &Path) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(DateTimeTool);
    tools.register(CalculatorTool);
    tools.register(ReadFileTool::new(work_dir));
    tools.register(ListDirectoryTool::new(work_dir));
    tools
}

/// DateTime tool - returns current time
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::from_parameters(
            "datetime",
            "Get the current date and time",
            &[ParameterSchema::new("format", "string", "Output format: 'iso', 'human', or 'unix'")
                .one_of([json!("iso"), json!("human"), json!("unix")])],
        )
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolCallResult> {
        let now = chrono::Utc::now();
        let output = match call.get_str("format").unwrap_or("human") {
            "iso" => now.to_rfc3339(),
            "unix" => now.timestamp().to_string(),
            _ => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
        };
        Ok(ToolCallResult::ok(output))
    }
}

/// Calculator tool - evaluates arithmetic expressions
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::from_parameters(
            "calculate",
            "Evaluate an arithmetic expression with + - * / % ^ and parentheses",
            &[ParameterSchema::new(
                "expression",
                "string",
                "Expression to evaluate (e.g., '2 + 2', '(10 - 4) * 5')",
            )
            .required()],
        )
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolCallResult> {
        let expression = call
            .get_str("expression")
            .ok_or_else(|| AgentError::ToolExecution("expression must be a string".into()))?;

        Ok(match evaluate_expression(expression) {
            Ok(result) => ToolCallResult::ok(json!({"expression": expression, "result": result})),
            Err(e) => ToolCallResult::error(e),
        })
    }
}

/// Deepest nesting of parentheses, signs and exponents accepted
const MAX_NESTING: usize = 256;

/// Recursive-descent evaluator over `f64`
struct Expression<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

fn evaluate_expression(expression: &str) -> std::result::Result<f64, String> {
    let mut parser = Expression {
        input: expression.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let value = parser.sum()?;
    parser.skip_whitespace();
    if parser.pos < parser.input.len() {
        return Err(format!("Unexpected character at position {}", parser.pos + 1));
    }
    if value.is_finite() {
        Ok(value)
    } else {
        Err("Result is not a finite number".into())
    }
}

impl Expression<'_> {
    fn skip_whitespace(&mut self) {
        while self.input.get(self.pos).is_some_and(u8::is_ascii_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: u8) -> bool {
        self.skip_whitespace();
        if self.input.get(self.pos) == Some(&expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> std::result::Result<f64, String>,
    ) -> std::result::Result<f64, String> {
        if self.depth >= MAX_NESTING {
            return Err("Expression nested too deeply".into());
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn sum(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.product()?;
        loop {
            if self.eat(b'+') {
                value += self.product()?;
            } else if self.eat(b'-') {
                value -= self.product()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn product(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.power()?;
        loop {
            if self.eat(b'*') {
                value *= self.power()?;
            } else if self.eat(b'/') {
                let divisor = self.power()?;
                if divisor == 0.0 {
                    return Err("Division by zero".into());
                }
                value /= divisor;
            } else if self.eat(b'%') {
                let divisor = self.power()?;
                if divisor == 0.0 {
                    return Err("Division by zero".into());
                }
                value %= divisor;
            } else {
                return Ok(value);
            }
        }
    }

    // Right-associative: 2^3^2 == 2^9
    fn power(&mut self) -> std::result::Result<f64, String> {
        let base = self.unary()?;
        if self.eat(b'^') {
            Ok(base.powf(self.nested(Self::power)?))
        } else {
            Ok(base)
        }
    }

    fn unary(&mut self) -> std::result::Result<f64, String> {
        if self.eat(b'-') {
            Ok(-self.nested(Self::unary)?)
        } else if self.eat(b'+') {
            self.nested(Self::unary)
        } else {
            self.primary()
        }
    }

    fn primary(&mut self) -> std::result::Result<f64, String> {
        if self.eat(b'(') {
            let value = self.nested(Self::sum)?;
            if !self.eat(b')') {
                return Err("Missing closing parenthesis".into());
            }
            return Ok(value);
        }

        self.skip_whitespace();
        let start = self.pos;
        while self
            .input
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_digit() || *c == b'.')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(if self.pos < self.input.len() {
                format!("Expected a number at position {}", self.pos + 1)
            } else {
                "Unexpected end of expression".into()
            });
        }

        let literal = String::from_utf8_lossy(&self.input[start..self.pos]);
        literal
            .parse::<f64>()
            .map_err(|e| format!("Invalid number '{literal}': {e}"))
    }
}

/// Resolve `relative` inside `root`, refusing anything that escapes it
async fn resolve(root: &Path, relative: &str) -> Result<PathBuf> {
    let root = tokio::fs::canonicalize(root).await?;
    let path = tokio::fs::canonicalize(root.join(relative))
        .await
        .map_err(|e| AgentError::ToolExecution(format!("{relative}: {e}")))?;

    if !path.starts_with(&root) {
        return Err(AgentError::ToolExecution(format!(
            "{relative} is outside the working directory"
        )));
    }
    Ok(path)
}

pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::from_parameters(
            "read_file",
            "Read a UTF-8 text file from the working directory",
            &[ParameterSchema::new("path", "string", "Path relative to the working directory").required()],
        )
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolCallResult> {
        let relative = call
            .get_str("path")
            .ok_or_else(|| AgentError::ToolExecution("path must be a string".into()))?;
        let path = resolve(&self.root, relative).await?;

        let size = tokio::fs::metadata(&path).await?.len();
        if size > MAX_READ_BYTES {
            return Ok(ToolCallResult::error(format!(
                "{relative} is {size} bytes; files over {MAX_READ_BYTES} bytes are not read"
            )));
        }

        let bytes = tokio::fs::read(&path).await?;
        match String::from_utf8(bytes) {
            Ok(content) => Ok(ToolCallResult::ok(content)),
            Err(_) => Ok(ToolCallResult::error(format!("{relative} is not a UTF-8 text file"))),
        }
    }
}

pub struct ListDirectoryTool {
    root: PathBuf,
}

impl ListDirectoryTool {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::from_parameters(
            "list_directory",
            "List the entries of a directory; subdirectories end with '/'",
            &[ParameterSchema::new(
                "path",
                "string",
                "Directory relative to the working directory (default: '.')",
            )],
        )
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolCallResult> {
        let relative = call.get_str("path").unwrap_or(".");
        let path = resolve(&self.root, relative).await?;

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        Ok(ToolCallResult::ok(Value::from(entries)))
    }
}
