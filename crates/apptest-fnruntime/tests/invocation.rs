//! Integration tests for function invocation.
//!
//! Functions are simulated with `ScriptRuntime`, which runs a shell script in
//! place of the container so the process plumbing is exercised for real.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use apptest_fnruntime::fakes::ScriptRuntime;
use apptest_fnruntime::results::read_results;
use apptest_fnruntime::{
    CancellationToken, FnError, FunctionPermission, FunctionRunner, FunctionTarget,
    ImagePullPolicy, InvocationRequest, RESULTS_FILE_NAME,
};
use tempfile::TempDir;

const APPEND_C: &str = r#"awk '{print} /^- /{print "  c: 3"}'"#;

fn input() -> Vec<u8> {
    let stream = apptest_kio::decode(b"a: 1\n---\nb: 2\n").unwrap();
    apptest_kio::encode_resource_list(&stream).unwrap().into_bytes()
}

fn image_request() -> InvocationRequest {
    InvocationRequest::new(FunctionTarget::Image("ghcr.io/acme/set-c:v1".into()))
}

fn runner(runtime: &Arc<ScriptRuntime>) -> FunctionRunner {
    FunctionRunner::new(runtime.clone())
}

/// Test: a function appending `c: 3` to every item returns both items in order.
#[tokio::test]
async fn test_successful_invocation() {
    let runtime = Arc::new(ScriptRuntime::new(APPEND_C));
    let out = runner(&runtime)
        .invoke(&image_request(), &input(), &CancellationToken::new())
        .await
        .expect("invoke failed");

    assert_eq!(out.exit_code, 0);
    assert!(out.results_file.is_none());

    let stream = apptest_kio::decode(&out.stdout).unwrap();
    assert_eq!(
        apptest_kio::encode(&stream.items, true).unwrap(),
        "a: 1\nc: 3\n---\nb: 2\nc: 3\n"
    );
    assert_eq!(runtime.launches(), 1);
}

/// Test: pull policy Never with an absent image fails before any process starts.
#[tokio::test]
async fn test_never_policy_with_absent_image() {
    let runtime = Arc::new(ScriptRuntime::absent(APPEND_C));
    let request = image_request().with_pull_policy(ImagePullPolicy::Never);

    let err = runner(&runtime)
        .invoke(&request, &input(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, FnError::ImageNotFound { ref image } if image == "ghcr.io/acme/set-c:v1"));
    assert_eq!(runtime.pulls(), 0);
    assert_eq!(runtime.launches(), 0);
}

/// Test: IfNotPresent pulls only a missing image, Always pulls every time.
#[tokio::test]
async fn test_pull_policies() {
    let absent = Arc::new(ScriptRuntime::absent("cat"));
    runner(&absent)
        .invoke(&image_request(), &input(), &CancellationToken::new())
        .await
        .unwrap();
    runner(&absent)
        .invoke(&image_request(), &input(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(absent.pulls(), 1);

    let present = Arc::new(ScriptRuntime::new("cat"));
    let always = image_request().with_pull_policy(ImagePullPolicy::Always);
    for _ in 0..2 {
        runner(&present)
            .invoke(&always, &input(), &CancellationToken::new())
            .await
            .unwrap();
    }
    assert_eq!(present.pulls(), 2);
}

/// Test: a failed pull is reported and nothing runs.
#[tokio::test]
async fn test_pull_failure() {
    let runtime = Arc::new(ScriptRuntime::absent("cat").with_failing_pull());
    let err = runner(&runtime)
        .invoke(&image_request(), &input(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FnError::ImagePullFailed { .. }));
    assert_eq!(runtime.launches(), 0);
}

/// Test: a non-zero exit carries the exit code and full stderr, and the
/// results artifact still records the run.
#[tokio::test]
async fn test_non_zero_exit() {
    let dir = TempDir::new().unwrap();
    let results_dir = dir.path().join("results");
    let runtime = Arc::new(ScriptRuntime::new(
        "cat >/dev/null; echo 'missing required field' >&2; echo 'second line' >&2; exit 3",
    ));
    let request = image_request().with_results_dir(&results_dir);

    let err = runner(&runtime)
        .invoke(&request, &input(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        FnError::FunctionExecutionFailed {
            function,
            exit_code,
            stderr,
        } => {
            assert_eq!(function, "ghcr.io/acme/set-c:v1");
            assert_eq!(exit_code, 3);
            assert_eq!(stderr, "missing required field\nsecond line\n");
        }
        other => panic!("expected FunctionExecutionFailed, got {other:?}"),
    }

    let record = read_results(&results_dir.join(RESULTS_FILE_NAME)).unwrap();
    assert_eq!(record.exit_code, 3);
    assert_eq!(record.items[0].stderr, "missing required field\nsecond line\n");
}

/// Test: structured results from the returned list land in the artifact.
#[tokio::test]
async fn test_results_artifact() {
    let dir = TempDir::new().unwrap();
    let script = r#"cat >/dev/null; printf 'apiVersion: config.kubernetes.io/v1\nkind: ResourceList\nitems:\n- a: 1\nresults:\n- message: all good\n  severity: info\n'"#;
    let runtime = Arc::new(ScriptRuntime::new(script));
    let request = image_request().with_results_dir(dir.path());
    let input = input();

    let out = runner(&runtime)
        .invoke(&request, &input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.results.len(), 1);
    let path = out.results_file.expect("results file");
    assert_eq!(path, dir.path().join(RESULTS_FILE_NAME));

    let record = read_results(&path).unwrap();
    assert_eq!(record.kind, "FunctionResultList");
    assert_eq!(record.exit_code, 0);
    let item = &record.items[0];
    assert_eq!(item.function, "ghcr.io/acme/set-c:v1");
    assert_eq!(item.results, out.results);
    assert_eq!(item.input_digest, apptest_fnruntime::results::sha256_hex(&input));
    assert_eq!(item.output_digest, apptest_fnruntime::results::sha256_hex(&out.stdout));
    assert!(item.finished_at >= item.started_at);
}

/// Test: an unusable results dir fails before the function starts.
#[tokio::test]
async fn test_results_dir_unavailable() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, "not a dir").unwrap();
    let runtime = Arc::new(ScriptRuntime::new("cat"));

    let err = runner(&runtime)
        .invoke(
            &image_request().with_results_dir(blocker.join("results")),
            &input(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, FnError::ResultsDirUnavailable { .. }));
}

/// Test: cancellation kills a running function and writes no artifact.
#[tokio::test]
async fn test_cancellation_kills_function() {
    let dir = TempDir::new().unwrap();
    let runtime = Arc::new(ScriptRuntime::new("sleep 30"));
    let request = image_request().with_results_dir(dir.path());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = runner(&runtime)
        .invoke(&request, &input(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, FnError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!dir.path().join(RESULTS_FILE_NAME).exists());

    // The named container is stopped too, not just the engine client.
    let container = runtime.last_container().expect("container name");
    assert!(container.starts_with("apptest-fn-"));
    assert_eq!(runtime.kills(), 1);
}

/// Test: cancelling while the image is being pulled returns promptly and
/// never starts the function.
#[tokio::test]
async fn test_cancellation_during_pull() {
    let runtime = Arc::new(ScriptRuntime::absent("cat").with_pull_delay(Duration::from_secs(30)));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = runner(&runtime)
        .invoke(&image_request(), &input(), &cancel)
        .await
        .unwrap_err();

    match err {
        FnError::Cancelled { reason, .. } => assert_eq!(reason, "cancelled"),
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(runtime.pulls(), 1);
    assert_eq!(runtime.launches(), 0);
}

/// Test: the timeout also bounds a slow pull.
#[tokio::test]
async fn test_timeout_during_pull() {
    let runtime = Arc::new(ScriptRuntime::absent("cat").with_pull_delay(Duration::from_secs(30)));
    let request = image_request().with_timeout(Duration::from_millis(100));

    let started = Instant::now();
    let err = runner(&runtime)
        .invoke(&request, &input(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        FnError::Cancelled { reason, .. } => assert!(reason.contains("timed out")),
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(runtime.launches(), 0);
}

/// Test: an elapsed timeout is treated as cancellation.
#[tokio::test]
async fn test_timeout_cancels_function() {
    let runtime = Arc::new(ScriptRuntime::new("sleep 30"));
    let request = image_request().with_timeout(Duration::from_millis(200));

    let started = Instant::now();
    let err = runner(&runtime)
        .invoke(&request, &input(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        FnError::Cancelled { reason, .. } => assert!(reason.contains("timed out")),
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(10));
}

/// Test: output larger than the pipe buffer does not deadlock the exchange.
#[tokio::test]
async fn test_large_stream_does_not_deadlock() {
    let runtime = Arc::new(ScriptRuntime::new("cat; head -c 200000 /dev/zero | tr '\\0' 'x' >&2"));
    let mut big = String::from("items:\n");
    for i in 0..20_000 {
        big.push_str(&format!("- name: resource-{i}\n"));
    }

    let out = runner(&runtime)
        .invoke(&image_request(), big.as_bytes(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.stdout, big.as_bytes());
    assert_eq!(out.stderr.len(), 200_000);
}

/// Test: host executables are refused unless exec is allowed.
#[tokio::test]
async fn test_exec_requires_permission() {
    let runtime = Arc::new(ScriptRuntime::new("cat"));
    let request = InvocationRequest::new(FunctionTarget::Exec(PathBuf::from("/bin/cat")));

    let err = runner(&runtime)
        .invoke(&request, &input(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FnError::ExecNotAllowed { .. }));
    assert_eq!(runtime.launches(), 0);

    let allowed = request.with_permission(FunctionPermission::deny_all().with_exec());
    let input = input();
    let out = runner(&runtime)
        .invoke(&allowed, &input, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(out.stdout, input);
}

/// Test: request environment reaches the function.
#[tokio::test]
async fn test_env_is_passed() {
    let runtime = Arc::new(ScriptRuntime::new("cat >/dev/null; printf 'greeting: %s\\n' \"$GREETING\""));
    let request = image_request().with_env(vec!["GREETING=hello".to_string()]);

    let out = runner(&runtime)
        .invoke(&request, &input(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(String::from_utf8(out.stdout).unwrap(), "greeting: hello\n");
    assert_eq!(runtime.last_env(), vec!["GREETING=hello".to_string()]);
}
