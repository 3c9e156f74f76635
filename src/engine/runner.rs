//! Solution execution in a child process

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::time::{Duration, timeout};

use crate::config::ExecutionConfig;
use crate::constants::solution_env;
use crate::engine::{RunStatus, SolutionRunner, TableError, TableManager};
use crate::error::{JudgeError, JudgeResult};
use crate::models::{ProblemNumber, ResultTable, Table};

/// Characters of stderr kept in a runtime-error comment
const STDERR_EXCERPT_CHARS: usize = 500;

/// Runs `<solutions_path>/<problem>` and stages its stdout table.
///
/// The solution is either an executable or a directory holding `run.sh`.
/// It receives the segment name and the problem number through the
/// environment and prints its result table as JSON. Each run gets its own
/// process group, killed as a whole on timeout.
pub struct ProcessSolutionRunner {
    execution: ExecutionConfig,
    shm_name: String,
    elapsed_ms: i64,
}

impl ProcessSolutionRunner {
    pub fn new(execution: ExecutionConfig, shm_name: impl Into<String>) -> Self {
        Self {
            execution,
            shm_name: shm_name.into(),
            elapsed_ms: 0,
        }
    }

    fn solution_path(&self, problem: ProblemNumber) -> PathBuf {
        self.execution.solutions_path.join(problem.to_string())
    }

    fn command(&self, problem: ProblemNumber) -> JudgeResult<Command> {
        let path = self.solution_path(problem);

        let mut command = if path.is_dir() {
            let run_sh = path.join("run.sh");
            if !run_sh.exists() {
                return Err(JudgeError::Execution(format!(
                    "solution directory missing run.sh: {}",
                    path.display()
                )));
            }
            let mut command = Command::new("sh");
            command.arg(run_sh).current_dir(&path);
            command
        } else if path.is_file() {
            Command::new(&path)
        } else {
            return Err(JudgeError::Execution(format!(
                "no solution for problem {} at {}",
                problem,
                path.display()
            )));
        };

        command
            .env(solution_env::SHM_NAME, &self.shm_name)
            .env(solution_env::PROBLEM_NUMBER, problem.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        Ok(command)
    }
}

#[async_trait]
impl SolutionRunner for ProcessSolutionRunner {
    fn allocate_columns_for_result_table(
        &mut self,
        problem: ProblemNumber,
        tables: &mut TableManager,
    ) -> JudgeResult<()> {
        tables.reset_result(problem, Vec::new())?;
        Ok(())
    }

    fn reset_elapsed_time(&mut self) {
        self.elapsed_ms = 0;
    }

    async fn run(
        &mut self,
        problem: ProblemNumber,
        tables: &mut TableManager,
    ) -> JudgeResult<RunStatus> {
        let mut command = self.command(problem)?;
        let child = command
            .spawn()
            .map_err(|e| JudgeError::Execution(format!("failed to start solution: {}", e)))?;
        let pid = child.id();

        let limit_ms = self.execution.time_limit_ms;
        let start = Instant::now();
        let outcome = timeout(Duration::from_millis(limit_ms), child.wait_with_output()).await;
        self.elapsed_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);

        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(JudgeError::Execution(format!(
                    "failed to wait for solution: {}",
                    e
                )));
            }
            Err(_) => {
                tracing::warn!(problem, limit_ms, "Solution timed out");
                kill_process_group(pid);
                return Ok(RunStatus::TimedOut { limit_ms });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                exit_description(&output.status)
            } else {
                stderr.trim().chars().take(STDERR_EXCERPT_CHARS).collect()
            };
            return Ok(RunStatus::Crashed(message));
        }

        let table: Table = match serde_json::from_slice(&output.stdout) {
            Ok(table) => table,
            Err(e) => return Ok(RunStatus::InvalidOutput(e.to_string())),
        };
        if !table.is_well_formed() {
            return Ok(RunStatus::InvalidOutput(
                "row width differs from column count".to_string(),
            ));
        }

        let result = ResultTable {
            problem_number: problem,
            table,
        };
        match tables.write_result(&result) {
            Ok(()) => Ok(RunStatus::Completed),
            Err(TableError::ResultTooLarge { len, capacity }) => Ok(RunStatus::InvalidOutput(
                format!("result of {} bytes exceeds {} bytes", len, capacity),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn elapsed_time(&self) -> i64 {
        self.elapsed_ms
    }
}

/// SIGKILL every process of the group led by `pid`
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, "Failed to kill solution process group: {}", e),
    }
}

fn exit_description(status: &std::process::ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {}", signal);
        }
    }

    match status.code() {
        Some(code) => format!("exited with code {}", code),
        None => "exited abnormally".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::models::Value;
    use crate::shm::SharedMemorySegment;
    use crate::test_utils::unique_shm_name;

    fn write_solution(root: &Path, problem: ProblemNumber, script: &str) {
        let dir = root.join(problem.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("run.sh"), script).unwrap();
    }

    fn setup(time_limit_ms: u64) -> (tempfile::TempDir, ProcessSolutionRunner, TableManager) {
        let dir = tempfile::tempdir().unwrap();
        let name = unique_shm_name();
        let segment = SharedMemorySegment::acquire(&name, 1 << 20).unwrap();
        let tables = TableManager::new(segment, 1 << 12).unwrap();
        let runner = ProcessSolutionRunner::new(
            ExecutionConfig {
                solutions_path: dir.path().to_path_buf(),
                time_limit_ms,
            },
            name,
        );
        (dir, runner, tables)
    }

    #[tokio::test]
    async fn test_completed_run_stages_result() {
        let (dir, mut runner, mut tables) = setup(5_000);
        write_solution(
            dir.path(),
            1,
            r#"echo '{"columns":["id","name"],"rows":[[1,"ann"]]}'"#,
        );

        let status = runner.run(1, &mut tables).await.unwrap();
        assert_eq!(status, RunStatus::Completed);
        assert!(runner.elapsed_time() >= 0);

        let result = tables.result_table().unwrap();
        assert_eq!(result.problem_number, 1);
        assert_eq!(result.table.columns, vec!["id", "name"]);
        assert!(matches!(result.table.rows[0][0], Value::Int(1)));
        tables.release().unwrap();
    }

    #[tokio::test]
    async fn test_solution_sees_environment() {
        let (dir, mut runner, mut tables) = setup(5_000);
        write_solution(
            dir.path(),
            7,
            r#"echo "{\"columns\":[\"p\",\"shm\"],\"rows\":[[$TRAINER_PROBLEM_NUMBER,\"$TRAINER_SHM_NAME\"]]}""#,
        );

        assert_eq!(runner.run(7, &mut tables).await.unwrap(), RunStatus::Completed);
        let result = tables.result_table().unwrap();
        assert!(matches!(result.table.rows[0][0], Value::Int(7)));
        match &result.table.rows[0][1] {
            Value::Text(name) => assert_eq!(name, tables.segment().name()),
            other => panic!("unexpected value {:?}", other),
        }
        tables.release().unwrap();
    }

    #[tokio::test]
    async fn test_timeout_is_a_judged_failure() {
        let (dir, mut runner, mut tables) = setup(200);
        write_solution(dir.path(), 2, "sleep 5");

        let status = runner.run(2, &mut tables).await.unwrap();
        assert_eq!(status, RunStatus::TimedOut { limit_ms: 200 });
        assert!(runner.elapsed_time() < 5_000);
        tables.release().unwrap();
    }

    /// Alive and not a zombie
    fn is_running(pid: &str) -> bool {
        match fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_background_processes() {
        let (dir, mut runner, mut tables) = setup(300);
        write_solution(dir.path(), 2, "sleep 30 &\necho $! > sleeper.pid\nwait");

        let status = runner.run(2, &mut tables).await.unwrap();
        assert_eq!(status, RunStatus::TimedOut { limit_ms: 300 });

        let pid = fs::read_to_string(dir.path().join("2").join("sleeper.pid")).unwrap();
        let pid = pid.trim();
        let mut running = is_running(pid);
        for _ in 0..40 {
            if !running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            running = is_running(pid);
        }
        assert!(!running, "background process {} outlived the timeout", pid);
        tables.release().unwrap();
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_a_crash() {
        let (dir, mut runner, mut tables) = setup(5_000);
        write_solution(dir.path(), 3, "echo boom >&2; exit 3");

        match runner.run(3, &mut tables).await.unwrap() {
            RunStatus::Crashed(message) => assert_eq!(message, "boom"),
            other => panic!("unexpected status {:?}", other),
        }

        write_solution(dir.path(), 4, "exit 4");
        match runner.run(4, &mut tables).await.unwrap() {
            RunStatus::Crashed(message) => assert_eq!(message, "exited with code 4"),
            other => panic!("unexpected status {:?}", other),
        }
        tables.release().unwrap();
    }

    #[tokio::test]
    async fn test_unparseable_output_is_invalid() {
        let (dir, mut runner, mut tables) = setup(5_000);
        write_solution(dir.path(), 5, "echo not-json");
        assert!(matches!(
            runner.run(5, &mut tables).await.unwrap(),
            RunStatus::InvalidOutput(_)
        ));

        write_solution(dir.path(), 6, r#"echo '{"columns":["a","b"],"rows":[[1]]}'"#);
        assert!(matches!(
            runner.run(6, &mut tables).await.unwrap(),
            RunStatus::InvalidOutput(_)
        ));
        tables.release().unwrap();
    }

    #[tokio::test]
    async fn test_missing_solution_is_an_infrastructure_failure() {
        let (dir, mut runner, mut tables) = setup(5_000);
        assert!(matches!(
            runner.run(8, &mut tables).await,
            Err(JudgeError::Execution(_))
        ));

        fs::create_dir_all(dir.path().join("9")).unwrap();
        assert!(matches!(
            runner.run(9, &mut tables).await,
            Err(JudgeError::Execution(_))
        ));
        tables.release().unwrap();
    }

    #[tokio::test]
    async fn test_allocate_and_reset() {
        let (_dir, mut runner, mut tables) = setup(5_000);
        runner.elapsed_ms = 99;
        runner.reset_elapsed_time();
        assert_eq!(runner.elapsed_time(), 0);

        runner
            .allocate_columns_for_result_table(11, &mut tables)
            .unwrap();
        let result = tables.result_table().unwrap();
        assert_eq!(result.problem_number, 11);
        assert!(result.table.is_empty());
        tables.release().unwrap();
    }
}
