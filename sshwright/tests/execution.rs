use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sshwright::channel::LINE_SEPARATOR;
use sshwright::driver::{ExecutionSettings, Executor, MISSING_EXIT_STATUS};
use sshwright::error::{ChannelError, Error, ExecutionError};
use sshwright::transport::{ChannelKind, RemoteChannel, Script, ScriptedConnection};

fn executor(connection: ScriptedConnection) -> Executor<ScriptedConnection> {
    let _ = env_logger::builder().is_test(true).try_init();
    Executor::new(Arc::new(connection)).with_poll_interval(Duration::from_millis(5))
}

fn joined(lines: &[&str]) -> String {
    lines.join(LINE_SEPARATOR)
}

#[tokio::test]
async fn execute_returns_stdout_lines_in_order() {
    let connection = ScriptedConnection::new("web01");
    connection.on_command(
        "build",
        Script::new()
            .stdout("compiling\nlin")
            .stderr("warning: unused\n")
            .stdout("king\n")
            .stdout("done"),
    );
    let executor = executor(connection);

    let result = executor
        .execute(&ExecutionSettings::default(), "build")
        .await
        .unwrap();

    assert_eq!(result, joined(&["compiling", "linking", "done"]));
    assert_eq!(executor.connection().disconnects(), 1);
}

#[tokio::test]
async fn execute_with_no_output_returns_empty_result() {
    let connection = ScriptedConnection::new("web01");
    connection.on_command("true", Script::new());
    let executor = executor(connection);

    let result = executor
        .execute(&ExecutionSettings::default().with_logging(false), "true")
        .await
        .unwrap();
    assert_eq!(result, "");
}

#[tokio::test]
async fn execute_fails_with_command_exit_status_and_disconnects() {
    let connection = ScriptedConnection::new("web01");
    connection.on_command("false", Script::new().stdout("nope\n").exit(3));
    let executor = executor(connection);

    let err = executor
        .execute(&ExecutionSettings::default(), "false")
        .await
        .unwrap_err();

    assert_eq!(err.exit_status(), Some(3));
    match &err {
        Error::Execution(ExecutionError::BadExitStatus { message, exit_status }) => {
            assert_eq!(message, "Command returned exit status 3");
            assert_eq!(*exit_status, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(executor.connection().disconnects(), 1);
}

#[tokio::test]
async fn execute_treats_missing_exit_status_as_failure() {
    let connection = ScriptedConnection::new("web01");
    connection.on_command("killed", Script::new().without_exit_status());
    let executor = executor(connection);

    let err = executor
        .execute(&ExecutionSettings::default(), "killed")
        .await
        .unwrap_err();
    assert_eq!(err.exit_status(), Some(MISSING_EXIT_STATUS));
}

#[tokio::test]
async fn ignore_error_returns_output_despite_exit_status() {
    let connection = ScriptedConnection::new("web01");
    connection.on_command("grep x", Script::new().stdout("partial\n").exit(1));
    let executor = executor(connection);

    let settings = ExecutionSettings::default().with_ignore_error(true);
    let result = executor.execute(&settings, "grep x").await.unwrap();
    assert_eq!(result, "partial");
}

#[tokio::test]
async fn execute_invokes_callback_with_result() {
    let connection = ScriptedConnection::new("web01");
    connection.on_command("hostname", Script::new().stdout("web01\n"));
    let executor = executor(connection);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let settings =
        ExecutionSettings::default().with_callback(move |r| sink.lock().unwrap().push(r.to_string()));

    let result = executor.execute(&settings, "hostname").await.unwrap();
    assert_eq!(result, "web01");
    assert_eq!(*seen.lock().unwrap(), vec!["web01"]);
}

#[tokio::test]
async fn callback_is_not_invoked_on_failure() {
    let connection = ScriptedConnection::new("web01");
    connection.on_command("fail", Script::new().stdout("x\n").exit(2));
    let executor = executor(connection);

    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let settings = ExecutionSettings::default().with_callback(move |_| *counter.lock().unwrap() += 1);

    assert!(executor.execute(&settings, "fail").await.is_err());
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn unknown_command_fails_before_opening_a_channel() {
    let executor = executor(ScriptedConnection::new("web01"));

    let err = executor
        .execute(&ExecutionSettings::default(), "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Channel(ChannelError::UnknownCommand(_))));
    assert_eq!(executor.connection().disconnects(), 0);
}

#[tokio::test]
async fn dry_run_opens_no_channel() {
    let executor = executor(ScriptedConnection::new("web01"));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let settings = ExecutionSettings::default()
        .with_dry_run(true)
        .with_callback(move |r| sink.lock().unwrap().push(r.to_string()));

    let result = executor.execute(&settings, "rm -rf /tmp/cache").await.unwrap();
    assert_eq!(result, "");
    executor.run_shell(&settings).await.unwrap();
    assert_eq!(executor.connection().channels_opened(), 0);
    assert_eq!(*seen.lock().unwrap(), vec![""]);
}

#[tokio::test]
async fn run_shell_succeeds_on_zero_exit() {
    let connection = ScriptedConnection::new("web01");
    connection.on_shell(Script::new().stdout("$ ").exit(0));
    let executor = executor(connection);

    executor.run_shell(&ExecutionSettings::default()).await.unwrap();
    assert_eq!(executor.connection().disconnects(), 1);
}

#[tokio::test]
async fn run_shell_fails_with_shell_exit_status() {
    let connection = ScriptedConnection::new("web01");
    connection.on_shell(Script::new().exit(130));
    let executor = executor(connection);

    let err = executor
        .run_shell(&ExecutionSettings::default())
        .await
        .unwrap_err();
    assert_eq!(err.exit_status(), Some(130));
    assert!(err.to_string().contains("Shell returned exit status 130"));
    assert_eq!(executor.connection().disconnects(), 1);
}

#[tokio::test]
async fn concurrent_channels_keep_results_apart() {
    let connection = ScriptedConnection::new("web01");
    connection.on_command(
        "left",
        Script::new()
            .stdout("l1\n")
            .sleep(Duration::from_millis(20))
            .stdout("l2\n")
            .sleep(Duration::from_millis(20))
            .stdout("l3\n"),
    );
    connection.on_command(
        "right",
        Script::new()
            .sleep(Duration::from_millis(10))
            .stdout("r1\n")
            .sleep(Duration::from_millis(20))
            .stdout("r2\n"),
    );
    let executor = executor(connection);
    let settings = ExecutionSettings::default();

    let (left, right) = tokio::join!(
        executor.execute(&settings, "left"),
        executor.execute(&settings, "right"),
    );

    assert_eq!(left.unwrap(), joined(&["l1", "l2", "l3"]));
    assert_eq!(right.unwrap(), joined(&["r1", "r2"]));
}

#[tokio::test]
async fn failing_command_does_not_affect_sibling_channel() {
    let connection = ScriptedConnection::new("web01");
    connection.on_command("bad", Script::new().stdout("oops\n").exit(1));
    connection.on_command(
        "good",
        Script::new().sleep(Duration::from_millis(20)).stdout("fine\n"),
    );
    let executor = executor(connection);
    let settings = ExecutionSettings::default();

    let (bad, good) = tokio::join!(
        executor.execute(&settings, "bad"),
        executor.execute(&settings, "good"),
    );

    assert_eq!(bad.unwrap_err().exit_status(), Some(1));
    assert_eq!(good.unwrap(), "fine");
    assert_eq!(executor.connection().disconnects(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_callback_runs_once_after_close() {
    let connection = ScriptedConnection::new("web01");
    connection.on_command(
        "deploy",
        Script::new().sleep(Duration::from_millis(50)).stdout("ok\n"),
    );
    let executor = executor(connection);

    // (result, disconnects seen at call time, calling thread)
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let observed = executor.connection().clone();
    let settings = ExecutionSettings::default().with_callback(move |r| {
        sink.lock().unwrap().push((
            r.to_string(),
            observed.disconnects(),
            thread::current().id(),
        ));
    });

    executor.execute_background(&settings, "deploy").await.unwrap();
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(executor.background().running(), 1);

    executor.wait_for_background().await.unwrap();

    let calls = seen.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    let (result, disconnects, callback_thread) = &calls[0];
    assert_eq!(result, "ok");
    assert_eq!(*disconnects, 1);
    assert_ne!(*callback_thread, thread::current().id());
    assert_eq!(executor.background().running(), 0);
}

#[tokio::test]
async fn panicking_background_callback_is_reported() {
    let connection = ScriptedConnection::new("web01");
    connection.on_command("report", Script::new().stdout("42\n"));
    let executor = executor(connection);

    let settings = ExecutionSettings::default().with_callback(|_| panic!("report sink gone"));
    executor.execute_background(&settings, "report").await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), executor.wait_for_background())
        .await
        .expect("background wait finished")
        .unwrap_err();
    match err {
        Error::Execution(ExecutionError::BackgroundFailures(failures)) => {
            assert_eq!(failures.len(), 1);
            assert!(matches!(
                &failures[0],
                Error::Execution(ExecutionError::CallbackPanicked(message)) if message == "report sink gone"
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(executor.background().running(), 0);
    assert_eq!(executor.connection().disconnects(), 1);
}

#[tokio::test]
async fn background_failures_are_collected() {
    let connection = ScriptedConnection::new("web01");
    connection.on_command("migrate", Script::new().stderr("locked\n").exit(4));
    connection.on_command("warm-cache", Script::new().stdout("warm\n"));
    let executor = executor(connection);
    let settings = ExecutionSettings::default();

    executor.execute_background(&settings, "migrate").await.unwrap();
    executor.execute_background(&settings, "warm-cache").await.unwrap();

    let err = executor.wait_for_background().await.unwrap_err();
    match err {
        Error::Execution(ExecutionError::BackgroundFailures(failures)) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].exit_status(), Some(4));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Failures are reported once.
    executor.wait_for_background().await.unwrap();
}

#[tokio::test]
async fn sftp_yields_channel_and_always_disconnects() {
    let executor = executor(ScriptedConnection::new("web01"));

    let kind = executor
        .sftp(async |channel| Ok(channel.kind()))
        .await
        .unwrap();
    assert_eq!(kind, ChannelKind::Sftp);

    let err = executor
        .sftp(async |_channel| -> sshwright::Result<()> { Err(ChannelError::Closed.into()) })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Channel(ChannelError::Closed)));
    assert_eq!(executor.connection().disconnects(), 2);
}
