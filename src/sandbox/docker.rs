use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StatsOptions,
    WaitContainerOptions,
};
use bollard::models::HostConfig;
use futures_util::StreamExt;

use crate::config::SandboxConfig;
use crate::context::JudgeContext;
use crate::language::{Language, SANDBOX_MOUNT};

use super::{
    CompileOutcome, Execution, INPUT_FILE, Limits, MarkedOutput, Markers, MemorySampler,
    RunSignals, STDERR_FILE, SandboxRuntime, append_capped, build_execution, write_source,
};

const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Sandbox runtime backed by a Docker daemon, one container per invocation
pub struct DockerSandbox {
    docker: Docker,
    config: SandboxConfig,
}

/// Everything needed to launch one container
struct InstancePlan<'a> {
    name: String,
    image: &'a str,
    script: String,
    memory_mb: u64,
    pids_limit: i64,
    deadline: Duration,
    sample_memory: bool,
}

#[derive(Debug, Default)]
struct InstanceRun {
    exit_code: i64,
    stdout: String,
    stderr: String,
    signals: RunSignals,
}

impl DockerSandbox {
    pub fn new(docker: Docker, config: SandboxConfig) -> Self {
        Self { docker, config }
    }

    /// Connects to the configured socket, or the platform default
    pub fn connect(config: SandboxConfig) -> Result<Self> {
        let docker = match &config.docker_socket {
            Some(socket) => Docker::connect_with_socket(
                socket,
                DOCKER_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }
        .context("Failed to connect to Docker daemon")?;

        Ok(Self::new(docker, config))
    }

    fn container_config(&self, ctx: &JudgeContext, plan: &InstancePlan<'_>) -> Config<String> {
        let memory = memory_bytes(plan.memory_mb);
        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{SANDBOX_MOUNT}:rw",
                ctx.bind_source().display()
            )]),
            network_mode: Some("none".to_string()),
            memory: Some(memory),
            // Equal to memory: no swap
            memory_swap: Some(memory),
            nano_cpus: Some((self.config.cpu_limit * 1e9) as i64),
            pids_limit: Some(plan.pids_limit),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            readonly_rootfs: Some(true),
            tmpfs: Some(HashMap::from([(
                "/tmp".to_string(),
                "rw,nosuid,size=64m".to_string(),
            )])),
            ..Default::default()
        };

        Config {
            image: Some(plan.image.to_string()),
            cmd: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                plan.script.clone(),
            ]),
            user: Some(self.config.user.clone()),
            working_dir: Some(SANDBOX_MOUNT.to_string()),
            network_disabled: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Creates, runs and always removes one container
    async fn run_instance(&self, ctx: &JudgeContext, plan: InstancePlan<'_>) -> Result<InstanceRun> {
        let options = CreateContainerOptions {
            name: plan.name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(options), self.container_config(ctx, &plan))
            .await
            .with_context(|| format!("Failed to create sandbox instance from {}", plan.image))?;
        let id = container.id;

        let result = self.drive_instance(&id, &plan).await;

        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(&id, Some(remove_options)).await {
            log::warn!("Failed to remove sandbox instance {}: {e}", plan.name);
        }

        result
    }

    async fn drive_instance(&self, id: &str, plan: &InstancePlan<'_>) -> Result<InstanceRun> {
        let started = Instant::now();
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start sandbox instance")?;

        let sampler = plan.sample_memory.then(|| {
            let docker = self.docker.clone();
            let id = id.to_string();
            MemorySampler::spawn(self.config.memory_poll_interval(), move || {
                let docker = docker.clone();
                let id = id.clone();
                async move { sample_memory(&docker, &id).await }
            })
        });

        let waited = tokio::time::timeout(plan.deadline, self.wait_exit(id)).await;
        let host_elapsed = started.elapsed().as_secs_f64();

        // Joined before the instance can be removed
        let peak_memory_bytes = match sampler {
            Some(sampler) => sampler.finish().await,
            None => 0,
        };

        let (exit_code, timed_out) = match waited {
            Ok(code) => (code?, false),
            Err(_) => {
                log::warn!(
                    "Sandbox instance {} exceeded safety timeout of {:.1}s, killing",
                    plan.name,
                    plan.deadline.as_secs_f64()
                );
                if let Err(e) = self
                    .docker
                    .kill_container(id, None::<KillContainerOptions<String>>)
                    .await
                {
                    log::warn!("Failed to kill sandbox instance {}: {e}", plan.name);
                }
                (-1, true)
            }
        };

        let (stdout, stderr) = self.collect_logs(id).await?;
        let oom_killed = self.was_oom_killed(id).await?;

        Ok(InstanceRun {
            exit_code,
            stdout,
            stderr,
            signals: RunSignals {
                timed_out,
                oom_killed,
                peak_memory_bytes,
                host_elapsed,
            },
        })
    }

    async fn wait_exit(&self, id: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits arrive as errors carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e).context("Failed while waiting for sandbox instance"),
            None => bail!("Sandbox instance wait stream ended without a status"),
        }
    }

    async fn collect_logs(&self, id: &str) -> Result<(String, String)> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };
        let limit = self.config.output_limit_bytes;
        let mut stdout = String::new();
        let mut stderr = String::new();

        let mut stream = self.docker.logs(id, Some(options));
        while let Some(output) = stream.next().await {
            match output.context("Failed to read sandbox output")? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    append_capped(&mut stdout, &message, limit)
                }
                LogOutput::StdErr { message } => append_capped(&mut stderr, &message, limit),
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok((stdout, stderr))
    }

    async fn was_oom_killed(&self, id: &str) -> Result<bool> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .context("Failed to inspect sandbox instance")?;
        Ok(inspect
            .state
            .and_then(|state| state.oom_killed)
            .unwrap_or(false))
    }

    fn read_capped(&self, path: &std::path::Path) -> String {
        let mut text = String::new();
        match fs::read(path) {
            Ok(bytes) => append_capped(&mut text, &bytes, self.config.output_limit_bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to read {}: {e}", path.display()),
        }
        text
    }
}

async fn sample_memory(docker: &Docker, id: &str) -> Option<u64> {
    let options = StatsOptions {
        stream: false,
        one_shot: true,
    };
    let mut stream = docker.stats(id, Some(options));
    match stream.next().await {
        Some(Ok(stats)) => stats
            .memory_stats
            .max_usage
            .or(stats.memory_stats.usage),
        Some(Err(e)) => {
            log::debug!("Memory sample of {id} failed: {e}");
            None
        }
        None => None,
    }
}

/// Byte count handed to the daemon, clamped to what it accepts
fn memory_bytes(megabytes: u64) -> i64 {
    i64::try_from(megabytes.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX)
}

fn remove_if_present(path: &std::path::Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != ErrorKind::NotFound
    {
        log::warn!("Failed to remove {}: {e}", path.display());
    }
}

/// Compiler diagnostics: stderr, or stdout for compilers that only use it
fn compiler_output(stdout: &str, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.to_string()
    }
}

#[async_trait]
impl SandboxRuntime for DockerSandbox {
    async fn compile(
        &self,
        language: Language,
        source: &str,
        ctx: &JudgeContext,
    ) -> Result<CompileOutcome> {
        write_source(ctx, language, source)?;

        let Some(command) = language.compile_command() else {
            return Ok(CompileOutcome::skipped());
        };

        let plan = InstancePlan {
            name: ctx.instance_name("compile"),
            image: self.config.image_for(language),
            script: command,
            memory_mb: self.config.compile_memory_limit_mb,
            pids_limit: self.config.compile_pids_limit,
            deadline: self.config.compile_timeout(),
            sample_memory: false,
        };
        let run = self.run_instance(ctx, plan).await?;

        if run.signals.timed_out {
            log::info!("Compilation of {} timed out", ctx.submission_id());
            return Ok(CompileOutcome {
                success: false,
                output: format!(
                    "Compilation timed out after {}s",
                    self.config.compile_timeout_secs
                ),
            });
        }

        let artifact_present = language
            .artifact()
            .is_none_or(|artifact| ctx.work_dir().join(artifact).exists());
        let success = run.exit_code == 0 && artifact_present;
        if run.exit_code == 0 && !artifact_present {
            log::warn!(
                "Compiler for {} exited cleanly without producing an artifact",
                ctx.submission_id()
            );
        }

        Ok(CompileOutcome {
            success,
            output: compiler_output(&run.stdout, &run.stderr),
        })
    }

    async fn execute(
        &self,
        language: Language,
        ctx: &JudgeContext,
        stdin: &str,
        limits: &Limits,
    ) -> Result<Execution> {
        let deadline =
            Duration::try_from_secs_f64(limits.time_limit_secs + self.config.safety_margin_secs)
                .with_context(|| {
                    format!("Invalid time limit of {}s", limits.time_limit_secs)
                })?;

        let input_path = ctx.work_dir().join(INPUT_FILE);
        let stderr_path = ctx.work_dir().join(STDERR_FILE);
        fs::write(&input_path, stdin)
            .with_context(|| format!("Failed to write {}", input_path.display()))?;

        let markers = Markers::new();
        let plan = InstancePlan {
            name: ctx.instance_name("run"),
            image: self.config.image_for(language),
            script: markers.wrap(&language.run_command(), limits.time_limit_secs),
            memory_mb: limits.memory_limit_mb,
            pids_limit: self.config.pids_limit,
            deadline,
            sample_memory: true,
        };
        let run = self.run_instance(ctx, plan).await;

        let mut stderr = self.read_capped(&stderr_path);
        remove_if_present(&input_path);
        remove_if_present(&stderr_path);
        let run = run?;

        // Anything the shell itself printed, such as a missing interpreter
        if !run.stderr.trim().is_empty() {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            append_capped(&mut stderr, run.stderr.as_bytes(), self.config.output_limit_bytes);
        }

        let parsed = markers.parse(&run.stdout);
        if let MarkedOutput::Malformed(reason) = &parsed {
            log::error!(
                "Sandbox output of {} could not be parsed: {reason}",
                ctx.submission_id()
            );
        }

        Ok(build_execution(parsed, &run.signals, limits, stderr))
    }

    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .context("Docker daemon did not answer ping")?;
        Ok(())
    }
}
