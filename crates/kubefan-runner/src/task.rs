//! The per-target unit of work: run one command against one cluster.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kubefan_core::ClusterTarget;
use tracing::debug;

use crate::credentials::CredentialMaterializer;
use crate::error::TaskError;
use crate::executor::{CommandExecutor, Invocation};
use crate::output::OutputMultiplexer;
use crate::runner::TargetTask;

/// Deadline for a single command. It is fixed at start and never renewed.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Variable pointing the command at its credential bundle.
pub const CREDENTIAL_ENV: &str = "KUBECONFIG";

/// The command fanned out to every target.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub credential_env: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: COMMAND_TIMEOUT,
            credential_env: CREDENTIAL_ENV.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_credential_env(mut self, name: impl Into<String>) -> Self {
        self.credential_env = name.into();
        self
    }
}

/// Materializes credentials, runs the command and emits its output.
pub struct ClusterTask {
    command: CommandSpec,
    materializer: Arc<dyn CredentialMaterializer>,
    executor: Arc<dyn CommandExecutor>,
    output: Arc<OutputMultiplexer>,
}

impl ClusterTask {
    pub fn new(
        command: CommandSpec,
        materializer: Arc<dyn CredentialMaterializer>,
        executor: Arc<dyn CommandExecutor>,
        output: Arc<OutputMultiplexer>,
    ) -> Self {
        Self {
            command,
            materializer,
            executor,
            output,
        }
    }
}

#[async_trait]
impl TargetTask for ClusterTask {
    async fn run(&self, target: ClusterTarget) -> Result<(), TaskError> {
        let bundle = self.materializer.materialize(&target)?;

        let invocation = Invocation {
            program: self.command.program.clone(),
            args: self.command.args.clone(),
            env: vec![(
                self.command.credential_env.clone(),
                bundle.path().display().to_string(),
            )],
            timeout: self.command.timeout,
        };

        debug!(target = %target.name(), program = %invocation.program, "Running command");
        let result = self.executor.run(&invocation).await;
        bundle.release();
        let captured = result?;

        self.output
            .clone()
            .emit_async(target.name(), &captured.output)
            .await
            .map_err(TaskError::Output)?;

        if !captured.completion.is_success() {
            return Err(TaskError::Failed {
                program: self.command.program.clone(),
                completion: captured.completion,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::path::PathBuf;
    use std::sync::Mutex;

    use kubefan_core::{AuthMaterial, Kubeconfig};

    use crate::credentials::{CredentialBundle, KubeconfigMaterializer};
    use crate::error::{CredentialError, ExecError};
    use crate::executor::{CommandOutput, Completion};
    use crate::output::OutputMode;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Records what it was asked to run and whether the bundle existed at that time.
    struct FakeExecutor {
        result: fn() -> Result<CommandOutput, ExecError>,
        seen: Mutex<Vec<(PathBuf, bool, String)>>,
    }

    impl FakeExecutor {
        fn new(result: fn() -> Result<CommandOutput, ExecError>) -> Self {
            Self {
                result,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandExecutor for FakeExecutor {
        async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
            let (name, value) = &invocation.env[0];
            let path = PathBuf::from(value);
            let kubeconfig = Kubeconfig::read(&path).unwrap();
            self.seen.lock().unwrap().push((
                path.clone(),
                path.exists(),
                format!("{}={}", name, kubeconfig.current_context.unwrap_or_default()),
            ));
            (self.result)()
        }
    }

    struct FailingMaterializer;

    impl CredentialMaterializer for FailingMaterializer {
        fn materialize(&self, _target: &ClusterTarget) -> Result<CredentialBundle, CredentialError> {
            Err(CredentialError::Create(io::Error::other("disk full")))
        }
    }

    fn target() -> ClusterTarget {
        ClusterTarget::new("east", "https://east", AuthMaterial::Token("tok".into()))
    }

    fn task(
        mode: OutputMode,
        executor: Arc<FakeExecutor>,
        buffer: Buffer,
    ) -> ClusterTask {
        ClusterTask::new(
            CommandSpec::new("kubectl", vec!["get".into(), "nodes".into()]),
            Arc::new(KubeconfigMaterializer::new()),
            executor,
            Arc::new(OutputMultiplexer::new(mode, buffer)),
        )
    }

    #[tokio::test]
    async fn test_success_emits_output_and_removes_bundle() {
        let executor = Arc::new(FakeExecutor::new(|| {
            Ok(CommandOutput {
                output: b"node-1 Ready\n".to_vec(),
                completion: Completion::Exited(0),
            })
        }));
        let buffer = Buffer::default();

        task(OutputMode::Prefix, executor.clone(), buffer.clone())
            .run(target())
            .await
            .unwrap();

        let seen = executor.seen.lock().unwrap();
        let (path, existed, env) = &seen[0];
        assert!(*existed);
        assert!(!path.exists());
        assert_eq!(env, "KUBECONFIG=east");
        assert_eq!(
            String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap(),
            "      east|node-1 Ready\n"
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_still_emits_output() {
        let executor = Arc::new(FakeExecutor::new(|| {
            Ok(CommandOutput {
                output: b"error: forbidden\n".to_vec(),
                completion: Completion::Exited(1),
            })
        }));
        let buffer = Buffer::default();

        let err = task(OutputMode::Plain, executor.clone(), buffer.clone())
            .run(target())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TaskError::Failed { completion: Completion::Exited(1), .. }
        ));
        assert_eq!(buffer.0.lock().unwrap().as_slice(), b"error: forbidden\n");
        assert!(!executor.seen.lock().unwrap()[0].0.exists());
    }

    #[tokio::test]
    async fn test_spawn_failure_removes_bundle() {
        let executor = Arc::new(FakeExecutor::new(|| {
            Err(ExecError::Spawn {
                program: "kubectl".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "not found"),
            })
        }));

        let err = task(OutputMode::Color, executor.clone(), Buffer::default())
            .run(target())
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::Exec(ExecError::Spawn { .. })));
        assert!(!executor.seen.lock().unwrap()[0].0.exists());
    }

    #[tokio::test]
    async fn test_credential_failure_skips_execution() {
        let executor = Arc::new(FakeExecutor::new(|| unreachable!()));
        let task = ClusterTask::new(
            CommandSpec::new("kubectl", Vec::new()),
            Arc::new(FailingMaterializer),
            executor.clone(),
            Arc::new(OutputMultiplexer::new(OutputMode::None, io::sink())),
        );

        let err = task.run(target()).await.unwrap_err();
        assert!(matches!(err, TaskError::Credential(_)));
        assert!(executor.seen.lock().unwrap().is_empty());
    }
}
