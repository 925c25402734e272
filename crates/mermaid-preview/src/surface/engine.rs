use std::io::Write as _;
use std::process::{Command, Stdio};

use serde_json::{Map, Value};

/// Mermaid parse failure, shaped like the error object Mermaid throws (`{ str }`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{str}")]
pub struct DiagramError {
    pub str: String,
}

impl DiagramError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            str: message.into(),
        }
    }
}

/// The diagram library the surface renders with.
pub trait DiagramEngine: Send {
    /// Parses `code` and renders it to SVG markup.
    fn render(&self, code: &str, config: &Value) -> Result<String, DiagramError>;

    fn parse(&self, code: &str) -> Result<(), DiagramError> {
        self.render(code, &Value::Object(Map::new())).map(|_| ())
    }
}

/// Renders through an external process: diagram text on stdin, SVG on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    config_flag: Option<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            config_flag: None,
        }
    }

    /// `mmdc` from `@mermaid-js/mermaid-cli`.
    pub fn mmdc() -> Self {
        Self::new("mmdc")
            .args(["-i", "-", "-o", "-", "-e", "svg"])
            .config_flag("-c")
    }

    /// Splits a command line on whitespace. Returns `None` for a blank line.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).args(parts))
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Flag followed by the path of a temporary JSON file holding the configuration.
    pub fn config_flag(mut self, flag: impl Into<String>) -> Self {
        self.config_flag = Some(flag.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn io_error(&self, what: &str, err: std::io::Error) -> DiagramError {
        DiagramError::new(format!("{what} `{}`: {err}", self.program))
    }
}

impl Default for CommandEngine {
    fn default() -> Self {
        Self::mmdc()
    }
}

impl DiagramEngine for CommandEngine {
    fn render(&self, code: &str, config: &Value) -> Result<String, DiagramError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Kept alive until the child exits.
        let mut config_file = None;
        if let Some(flag) = &self.config_flag {
            let has_config = config.as_object().is_some_and(|m| !m.is_empty());
            if has_config {
                let mut file = tempfile::Builder::new()
                    .prefix("mermaid-config-")
                    .suffix(".json")
                    .tempfile()
                    .map_err(|e| self.io_error("failed to prepare config for", e))?;
                serde_json::to_writer(&mut file, config)
                    .map_err(|e| DiagramError::new(e.to_string()))?;
                file.flush()
                    .map_err(|e| self.io_error("failed to prepare config for", e))?;
                cmd.arg(flag).arg(file.path());
                config_file = Some(file);
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| self.io_error("failed to run", e))?;

        let writer = child.stdin.take().map(|mut stdin| {
            let input = code.as_bytes().to_vec();
            std::thread::spawn(move || stdin.write_all(&input))
        });
        let output = child
            .wait_with_output()
            .map_err(|e| self.io_error("failed to wait for", e))?;
        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(self.io_error("failed to write to", e)),
                Err(_) => return Err(DiagramError::new("stdin writer thread panicked")),
            }
        }
        drop(config_file);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return Err(DiagramError::new(if stderr.is_empty() {
                format!("`{}` exited with {}", self.program, output.status)
            } else {
                stderr.to_string()
            }));
        }
        String::from_utf8(output.stdout)
            .map_err(|_| DiagramError::new(format!("`{}` produced non UTF-8 output", self.program)))
    }
}
