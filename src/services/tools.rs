use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io::Write;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::time::timeout;

/// Default time an archive extraction may take before the extractor is killed.
pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default time a config conversion may take before the converter is killed.
pub const DEFAULT_CONVERT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a single external tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// The tool exited with code 0
    Success,
    /// The tool exited with a non-zero code (or was killed by a signal)
    Failed { exit_code: i32, stderr: String },
    /// The tool was still running when the timeout expired and was killed
    TimedOut(Duration),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success)
    }

    /// Short human-readable description used in error events
    pub fn describe(&self) -> String {
        match self {
            ToolOutcome::Success => "completed".to_string(),
            ToolOutcome::Failed { exit_code, stderr } if stderr.trim().is_empty() => {
                format!("exited with code {}", exit_code)
            }
            ToolOutcome::Failed { exit_code, stderr } => {
                format!("exited with code {}: {}", exit_code, stderr.trim())
            }
            ToolOutcome::TimedOut(limit) => format!("timed out after {:?}", limit),
        }
    }
}

/// Errors raised before a tool could run at all
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tools directory not found: {0}")]
    ToolsDirectoryMissing(Utf8PathBuf),

    #[error("Tool executable not found: {0}")]
    ExecutableMissing(Utf8PathBuf),

    #[error("Failed to create output directory {path}")]
    CreateOutputDir {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run {program}")]
    Spawn {
        program: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Tool timeouts need a multi-thread tokio runtime; got a current-thread runtime handle")]
    CurrentThreadRuntime,
}

/// Boundary to the external archive extractor and config converter.
///
/// Implementations must enforce `timeout` themselves. A tool that fails or hangs is
/// reported through [`ToolOutcome`]; `Err` is reserved for setup failures (the output
/// directory cannot be created, the program cannot be started).
pub trait ArchiveTools: Send + Sync {
    /// Check that the tools are installed. Called once per run, before any addon work.
    fn ensure_available(&self) -> Result<(), ToolError> {
        Ok(())
    }

    /// Extract `archive` into `dest_dir`, creating `dest_dir` if needed.
    fn extract_archive(
        &self,
        archive: &Utf8Path,
        dest_dir: &Utf8Path,
        timeout: Duration,
    ) -> Result<ToolOutcome, ToolError>;

    /// Convert the binary config `binary_config` into the text file `text_config`.
    fn convert_config(
        &self,
        binary_config: &Utf8Path,
        text_config: &Utf8Path,
        timeout: Duration,
    ) -> Result<ToolOutcome, ToolError>;
}

/// Subprocess-backed [`ArchiveTools`] for the Arma 3 Tools suite.
///
/// The tools are located relative to a tools directory:
/// - extractor: `BankRev/BankRev.exe` by default, run as `<exe> -f <dest_dir> <archive>`
/// - converter: `CfgConvert/CfgConvert.exe` by default, run as
///   `<exe> -txt -dst <text_config> <binary_config>`
///
/// Processes are spawned on the provided tokio runtime so the timeout can be enforced
/// with `tokio::time::timeout`; the child is killed when the timeout fires.
///
/// The synchronous [`ArchiveTools`] methods drive the runtime through
/// [`Handle::block_on`], which cannot run the timer or process drivers of a
/// current-thread runtime. They return [`ToolError::CurrentThreadRuntime`] for such a
/// handle; the async methods can still be awaited on any runtime.
#[derive(Debug, Clone)]
pub struct ArmaTools {
    tools_dir: Utf8PathBuf,
    extractor: Utf8PathBuf,
    converter: Utf8PathBuf,
    runtime: Handle,
}

impl ArmaTools {
    pub const DEFAULT_EXTRACTOR: &'static str = "BankRev/BankRev.exe";
    pub const DEFAULT_CONVERTER: &'static str = "CfgConvert/CfgConvert.exe";

    /// Create tools with the default executable locations.
    pub fn new(tools_dir: impl Into<Utf8PathBuf>, runtime: Handle) -> Self {
        Self::with_executables(
            tools_dir,
            Self::DEFAULT_EXTRACTOR,
            Self::DEFAULT_CONVERTER,
            runtime,
        )
    }

    /// Create tools with explicit executable paths, relative to `tools_dir` (absolute
    /// paths are used as-is).
    pub fn with_executables(
        tools_dir: impl Into<Utf8PathBuf>,
        extractor: impl AsRef<Utf8Path>,
        converter: impl AsRef<Utf8Path>,
        runtime: Handle,
    ) -> Self {
        let tools_dir = tools_dir.into();
        Self {
            extractor: tools_dir.join(extractor.as_ref()),
            converter: tools_dir.join(converter.as_ref()),
            tools_dir,
            runtime,
        }
    }

    pub fn tools_dir(&self) -> &Utf8Path {
        &self.tools_dir
    }

    pub fn extractor_path(&self) -> &Utf8Path {
        &self.extractor
    }

    pub fn converter_path(&self) -> &Utf8Path {
        &self.converter
    }

    fn ensure_multi_thread(&self) -> Result<(), ToolError> {
        match self.runtime.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Err(ToolError::CurrentThreadRuntime),
            _ => Ok(()),
        }
    }

    /// Extract a PBO archive into `dest_dir`.
    ///
    /// Captured stdout/stderr are written to the optional sinks once the process exits.
    pub async fn extract_pbo(
        &self,
        pbo: &Utf8Path,
        dest_dir: &Utf8Path,
        timeout_duration: Duration,
        stdout: Option<&mut (dyn Write + Send)>,
        stderr: Option<&mut (dyn Write + Send)>,
    ) -> Result<ToolOutcome, ToolError> {
        fs::create_dir_all(dest_dir).map_err(|source| ToolError::CreateOutputDir {
            path: dest_dir.to_path_buf(),
            source,
        })?;

        let mut cmd = Command::new(&self.extractor);
        cmd.arg("-f").arg(dest_dir).arg(pbo);

        run_with_timeout(&self.extractor, cmd, timeout_duration, stdout, stderr).await
    }

    /// Convert a binarized `config.bin` into a text `config.cpp`.
    pub async fn convert_bin_config_to_text(
        &self,
        config_bin: &Utf8Path,
        config_cpp: &Utf8Path,
        timeout_duration: Duration,
        stdout: Option<&mut (dyn Write + Send)>,
        stderr: Option<&mut (dyn Write + Send)>,
    ) -> Result<ToolOutcome, ToolError> {
        if let Some(parent) = config_cpp.parent() {
            fs::create_dir_all(parent).map_err(|source| ToolError::CreateOutputDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut cmd = Command::new(&self.converter);
        cmd.arg("-txt").arg("-dst").arg(config_cpp).arg(config_bin);

        run_with_timeout(&self.converter, cmd, timeout_duration, stdout, stderr).await
    }
}

impl ArchiveTools for ArmaTools {
    fn ensure_available(&self) -> Result<(), ToolError> {
        self.ensure_multi_thread()?;
        if !self.tools_dir.is_dir() {
            return Err(ToolError::ToolsDirectoryMissing(self.tools_dir.clone()));
        }
        for exe in [&self.extractor, &self.converter] {
            if !exe.is_file() {
                return Err(ToolError::ExecutableMissing(exe.clone()));
            }
        }
        Ok(())
    }

    fn extract_archive(
        &self,
        archive: &Utf8Path,
        dest_dir: &Utf8Path,
        timeout: Duration,
    ) -> Result<ToolOutcome, ToolError> {
        self.ensure_multi_thread()?;
        self.runtime
            .block_on(self.extract_pbo(archive, dest_dir, timeout, None, None))
    }

    fn convert_config(
        &self,
        binary_config: &Utf8Path,
        text_config: &Utf8Path,
        timeout: Duration,
    ) -> Result<ToolOutcome, ToolError> {
        self.ensure_multi_thread()?;
        self.runtime.block_on(self.convert_bin_config_to_text(
            binary_config,
            text_config,
            timeout,
            None,
            None,
        ))
    }
}

async fn run_with_timeout(
    program: &Utf8Path,
    mut cmd: Command,
    timeout_duration: Duration,
    stdout: Option<&mut (dyn Write + Send)>,
    stderr: Option<&mut (dyn Write + Send)>,
) -> Result<ToolOutcome, ToolError> {
    tracing::debug!("Executing: {:?}", cmd.as_std());

    let start = Instant::now();

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| ToolError::Spawn {
        program: program.to_path_buf(),
        source,
    })?;

    // Dropping the wait future on timeout drops the child, which kills it
    let output = match timeout(timeout_duration, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(ToolError::Spawn {
                program: program.to_path_buf(),
                source,
            });
        }
        Err(_) => {
            tracing::warn!("{} timed out after {:?}", program, timeout_duration);
            return Ok(ToolOutcome::TimedOut(timeout_duration));
        }
    };

    if let Some(sink) = stdout {
        if let Err(e) = sink.write_all(&output.stdout) {
            tracing::debug!("Failed to forward tool stdout: {}", e);
        }
    }
    if let Some(sink) = stderr {
        if let Err(e) = sink.write_all(&output.stderr) {
            tracing::debug!("Failed to forward tool stderr: {}", e);
        }
    }

    let exit_code = output.status.code().unwrap_or(-1);
    tracing::debug!(
        "{} completed in {:.2}s with exit code {}",
        program,
        start.elapsed().as_secs_f32(),
        exit_code
    );

    if output.status.success() {
        Ok(ToolOutcome::Success)
    } else {
        Ok(ToolOutcome::Failed {
            exit_code,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
