//! End-to-end executions through `SandboxExecutor`.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ctxopt_core::{FailureKind, MemoryErrorReporter, SandboxConfig, SandboxContext, SandboxExecutor};
use pretty_assertions::assert_eq;
use serde_json::json;

fn context(dir: &Path) -> SandboxContext {
    SandboxContext::new(dir).with_timeout_ms(5_000)
}

#[tokio::test]
async fn returns_arithmetic_result() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SandboxExecutor::default();

    let result = executor.execute_sandbox("return 1 + 1", &context(dir.path())).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, Some(json!(2)));
    assert!(result.stats.tokens_used > 0);
    assert!(result.stats.memory_used_mb.is_some());
}

#[tokio::test]
async fn round_trips_objects() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SandboxExecutor::default();

    let result = executor
        .execute_sandbox(
            "return { name: 'ctx', tags: ['a', 'b'], nested: { n: 3, ok: true, none: null } };",
            &context(dir.path()),
        )
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        result.output,
        Some(json!({
            "name": "ctx",
            "tags": ["a", "b"],
            "nested": { "n": 3, "ok": true, "none": null }
        }))
    );
}

#[tokio::test]
async fn export_default_is_the_result() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SandboxExecutor::default();

    let result = executor
        .execute_sandbox("const answer = 40 + 2;\nexport default answer;", &context(dir.path()))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, Some(json!(42)));
}

#[tokio::test]
async fn undefined_result_has_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SandboxExecutor::default();

    let result = executor.execute_sandbox("const x = 1;", &context(dir.path())).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, None);
    assert_eq!(result.stats.tokens_used, 0);
}

#[tokio::test]
async fn eval_is_rejected_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let reporter = Arc::new(MemoryErrorReporter::new());
    let executor = SandboxExecutor::default().with_reporter(reporter.clone());

    let result = executor.execute_sandbox("return eval(\"1+1\")", &context(dir.path())).await;

    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::Rejected));
    let error = result.error.unwrap();
    assert!(error.starts_with("Blocked patterns: ["), "{error}");
    assert!(error.contains("eval"), "{error}");
    assert_eq!(result.stats.memory_used_mb, None);
    assert_eq!(reporter.entries().len(), 1);
}

#[tokio::test]
async fn oversized_code_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = SandboxConfig {
        max_code_bytes: 16,
        ..SandboxConfig::default()
    };
    let executor = SandboxExecutor::new(config);

    let result = executor
        .execute_sandbox("return 'this is far too long';", &context(dir.path()))
        .await;

    assert_eq!(result.failure, Some(FailureKind::Rejected));
}

#[tokio::test]
async fn busy_loop_times_out_near_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SandboxExecutor::default();
    let ctx = SandboxContext::new(dir.path()).with_timeout_ms(1_000);

    let started = Instant::now();
    let result = executor.execute_sandbox("while (true) {}", &ctx).await;
    let elapsed = started.elapsed();

    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert!(result.error.unwrap().contains("timed out"));
    assert!(!result.warnings.is_empty());
    assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(3_000), "{elapsed:?}");
}

#[tokio::test]
async fn heap_exhaustion_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SandboxExecutor::default();
    let ctx = SandboxContext::new(dir.path())
        .with_timeout_ms(10_000)
        .with_memory_limit_mb(16);

    let result = executor
        .execute_sandbox(
            "const chunks = []; for (let i = 0; i < 1e7; i++) { chunks.push(new Array(10000).fill(i)); } return chunks.length;",
            &ctx,
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::MemoryExceeded));
}

#[tokio::test]
async fn array_buffers_count_against_the_memory_limit() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SandboxExecutor::default();
    let ctx = SandboxContext::new(dir.path())
        .with_timeout_ms(10_000)
        .with_memory_limit_mb(16);

    let result = executor
        .execute_sandbox(
            "const big = new Uint8Array(256 * 1024 * 1024); return big.length;",
            &ctx,
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::MemoryExceeded));
}

#[tokio::test]
async fn captures_console_output_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SandboxExecutor::default();

    let result = executor
        .execute_sandbox(
            "console.log('hello', { a: 1 }); console.warn('careful'); console.error(new TypeError('bad')); return null;",
            &context(dir.path()),
        )
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, Some(json!(null)));
    assert_eq!(
        result.logs,
        vec![
            "hello {\"a\":1}".to_string(),
            "[warn] careful".to_string(),
            "[error] TypeError: bad".to_string(),
        ]
    );
}

#[tokio::test]
async fn guest_throw_is_a_failure_without_stack() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SandboxExecutor::default();

    let result = executor
        .execute_sandbox(
            "console.log('before'); throw new RangeError('nope');",
            &context(dir.path()),
        )
        .await;

    assert_eq!(result.failure, Some(FailureKind::GuestThrew));
    assert_eq!(result.error.as_deref(), Some("RangeError: nope"));
    assert_eq!(result.logs, vec!["before".to_string()]);
}

#[tokio::test]
async fn syntax_errors_are_guest_failures() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SandboxExecutor::default();

    let result = executor.execute_sandbox("return (", &context(dir.path())).await;

    assert_eq!(result.failure, Some(FailureKind::GuestThrew));
    assert!(result.error.unwrap().contains("SyntaxError"));
}

#[tokio::test]
async fn non_serializable_results_fail() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SandboxExecutor::default();

    let result = executor
        .execute_sandbox("const a = {}; a.me = a; return a;", &context(dir.path()))
        .await;

    assert_eq!(result.failure, Some(FailureKind::GuestThrew));
    assert!(
        result.error.unwrap().starts_with("result is not JSON-serializable"),
    );
}

#[tokio::test]
async fn output_over_token_budget_fails() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SandboxExecutor::default();
    let ctx = context(dir.path()).with_max_output_tokens(50);

    let result = executor.execute_sandbox("return 'word '.repeat(2000);", &ctx).await;

    assert_eq!(result.failure, Some(FailureKind::OutputTooLarge));
    assert_eq!(result.output, None);
    assert!(result.stats.tokens_used > 50);
}

#[tokio::test]
async fn reads_files_in_the_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/lib.rs"), "pub fn answer() -> u32 { 42 }\n").unwrap();
    fs::write(dir.path().join("README.md"), "# demo\n").unwrap();
    let executor = SandboxExecutor::default();

    let result = executor
        .execute_sandbox(
            r#"
            const source = await ctx.files.read('src/lib.rs');
            const [exists, missing] = await Promise.all([
              ctx.files.exists('README.md'),
              ctx.files.exists('nope.md'),
            ]);
            const rust = await ctx.files.glob('**/*.rs');
            const docs = await ctx.files.glob('*.{md,txt}');
            const hits = await ctx.search.grep('fn \\w+', 'src/**/*.rs');
            return { length: source.length, exists, missing, rust, docs, lines: hits.map((m) => m.line) };
            "#,
            &context(dir.path()),
        )
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        result.output,
        Some(json!({
            "length": 30,
            "exists": true,
            "missing": false,
            "rust": ["src/lib.rs"],
            "docs": ["README.md"],
            "lines": [1],
        }))
    );
}

#[tokio::test]
async fn host_cancellation_releases_the_slot() {
    let dir = tempfile::tempdir().unwrap();
    let config = SandboxConfig {
        max_concurrent: 1,
        ..SandboxConfig::default()
    };
    let executor = SandboxExecutor::new(config);
    let ctx = SandboxContext::new(dir.path()).with_timeout_ms(20_000);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(200),
        executor.execute_sandbox("while (true) {}", &ctx),
    )
    .await;
    assert!(abandoned.is_err());

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let result = executor.execute_sandbox("return 'free';", &ctx).await;
        if result.success {
            assert_eq!(result.output, Some(json!("free")));
            break;
        }
        assert_eq!(result.failure, Some(FailureKind::Busy));
        assert!(Instant::now() < deadline, "slot was never released");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn concurrency_limit_rejects_excess_calls() {
    let dir = tempfile::tempdir().unwrap();
    let config = SandboxConfig {
        max_concurrent: 1,
        ..SandboxConfig::default()
    };
    let executor = SandboxExecutor::new(config);
    let ctx = context(dir.path());

    let (slow, rejected) = tokio::join!(
        executor.execute_sandbox(
            "const end = Date.now() + 300; while (Date.now() < end) {} return 'slow';",
            &ctx,
        ),
        executor.execute_sandbox("return 'fast';", &ctx),
    );

    assert_eq!(slow.output, Some(json!("slow")));
    assert_eq!(rejected.failure, Some(FailureKind::Busy));
}

#[tokio::test]
async fn parallel_executions_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SandboxExecutor::default();
    let ctx = context(dir.path());

    let (first, second) = tokio::join!(
        executor.execute_sandbox("var shared = 'first'; return shared;", &ctx),
        executor.execute_sandbox("return typeof shared;", &ctx),
    );

    assert_eq!(first.output, Some(json!("first")));
    assert_eq!(second.output, Some(json!("undefined")));
}

#[tokio::test]
async fn legacy_adapter_turns_failures_into_errors() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SandboxExecutor::default();

    let ok = executor
        .execute_sandbox_or_err("return 'fine';", &context(dir.path()))
        .await
        .unwrap();
    assert_eq!(ok.output, Some(json!("fine")));

    let err = executor
        .execute_sandbox_or_err("throw new Error('boom');", &context(dir.path()))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "boom");
    let sandbox_error = err.downcast_ref::<ctxopt_core::SandboxError>().unwrap();
    assert_eq!(sandbox_error.kind, FailureKind::GuestThrew);
}
