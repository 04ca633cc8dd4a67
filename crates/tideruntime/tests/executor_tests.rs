use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use tidecore::{ExecutorError, TaskError, Value};
use tideruntime::{
    CallContext, Executor, ExecutorConfig, MapArgs, MapValue, Mapped, Resolved, SerialExecutor,
    StateMap, TaskCall, TokioExecutor,
};

fn constant_call(value: Value) -> TaskCall {
    Arc::new(move |_ctx: CallContext| {
        let value = value.clone();
        async move { Ok(value) }.boxed()
    })
}

fn double_call() -> TaskCall {
    Arc::new(|ctx: CallContext| {
        async move {
            let x = ctx
                .require_input("x")?
                .as_f64()
                .ok_or_else(|| TaskError::Failed("x must be a number".into()))?;
            Ok(Value::from(x * 2.0))
        }
        .boxed()
    })
}

fn numbers(items: &[i64]) -> Vec<Value> {
    items.iter().map(|n| Value::from(*n)).collect()
}

#[tokio::test]
async fn test_wait_on_nothing_needs_no_session() {
    let executor = TokioExecutor::default();
    let results = executor.wait(Vec::new(), None).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_submit_before_start_is_fatal() {
    let executor = TokioExecutor::default();
    let result = executor
        .submit(constant_call(Value::from(1i64)), StateMap::new())
        .await;
    assert!(matches!(result, Err(ExecutorError::NotStarted)));

    let serial = SerialExecutor::new();
    let result = serial
        .submit(constant_call(Value::from(1i64)), StateMap::new())
        .await;
    assert!(matches!(result, Err(ExecutorError::NotStarted)));
}

#[tokio::test]
async fn test_submit_resolves_to_the_return_value() {
    let executor = TokioExecutor::default();
    {
        let scope = executor.start().unwrap();
        let future = scope
            .submit(constant_call(Value::from(42i64)), StateMap::new())
            .await
            .unwrap();
        let results = scope.wait(vec![future], None).await.unwrap();
        assert_eq!(results, vec![Ok(Value::from(42i64))]);
    }
    // scope exit tore the session down
    let result = executor
        .submit(constant_call(Value::Null), StateMap::new())
        .await;
    assert!(matches!(result, Err(ExecutorError::NotStarted)));
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let executor = TokioExecutor::default();
    let _scope = executor.start().unwrap();
    assert!(matches!(
        executor.start(),
        Err(ExecutorError::AlreadyStarted)
    ));
}

#[tokio::test]
async fn test_worker_errors_surface_at_wait_not_submit() {
    let executor = TokioExecutor::default();
    let scope = executor.start().unwrap();

    let failing: TaskCall =
        Arc::new(|_ctx| async { Err(TaskError::Failed("bad input".into())) }.boxed());
    let future = scope.submit(failing, StateMap::new()).await.unwrap();

    let results = scope.wait(vec![future], None).await.unwrap();
    assert_eq!(results, vec![Err(TaskError::Failed("bad input".into()))]);
}

#[tokio::test]
async fn test_worker_panics_are_captured() {
    let executor = TokioExecutor::default();
    let scope = executor.start().unwrap();

    let panicking: TaskCall = Arc::new(|_ctx| {
        async {
            assert!(false, "boom");
            Ok(Value::Null)
        }
        .boxed()
    });
    let future = scope.submit(panicking, StateMap::new()).await.unwrap();

    let results = scope.wait(vec![future], None).await.unwrap();
    match &results[0] {
        Err(TaskError::Panicked(message)) => assert!(message.contains("boom")),
        other => panic!("expected captured panic, got {other:?}"),
    }
}

async fn exercise_map(executor: &dyn Executor) {
    let mut upstream = MapArgs::new();
    upstream.insert("x".to_string(), MapValue::Each(numbers(&[1, 2, 3])));

    let mapped = executor.map(double_call(), upstream).await.unwrap();
    assert!(matches!(mapped, Mapped::Deferred(_)));

    let futures = mapped.futures().await;
    assert_eq!(futures.len(), 3);
    let results = executor.wait(futures, None).await.unwrap();
    assert_eq!(
        results,
        vec![
            Ok(Value::from(2.0)),
            Ok(Value::from(4.0)),
            Ok(Value::from(6.0)),
        ]
    );
}

#[tokio::test]
async fn test_map_schedules_one_call_per_element() {
    let tokio_exec = TokioExecutor::default();
    let scope = tokio_exec.start().unwrap();
    exercise_map(&tokio_exec).await;
    drop(scope);

    let serial = SerialExecutor::new();
    let _scope = serial.start().unwrap();
    exercise_map(&serial).await;
}

#[tokio::test]
async fn test_map_broadcasts_fixed_values() {
    let executor = TokioExecutor::default();
    let scope = executor.start().unwrap();

    let add: TaskCall = Arc::new(|ctx: CallContext| {
        async move {
            let x = ctx.require_input("x")?.as_f64().unwrap_or(0.0);
            let y = ctx.require_input("y")?.as_f64().unwrap_or(0.0);
            Ok(Value::from(x + y))
        }
        .boxed()
    });
    let mut upstream = MapArgs::new();
    upstream.insert("x".to_string(), MapValue::Each(numbers(&[1, 2])));
    upstream.insert("y".to_string(), MapValue::Fixed(Value::from(10i64)));

    let mapped = scope.map(add, upstream).await.unwrap();
    // waiting on the deferred future splices the element results in order
    let results = scope.wait(vec![mapped.into_future()], None).await.unwrap();
    assert_eq!(results, vec![Ok(Value::from(11.0)), Ok(Value::from(12.0))]);
}

#[tokio::test]
async fn test_reentrant_map_from_inside_a_worker() {
    // one permit: the running worker would deadlock against itself if
    // nested dispatch counted toward the session budget
    let executor = TokioExecutor::new(ExecutorConfig { max_parallel: 1 });
    let scope = executor.start().unwrap();

    let fan: TaskCall = Arc::new(|ctx: CallContext| {
        async move {
            assert!(ctx.dispatcher.in_worker());
            let mut upstream = MapArgs::new();
            upstream.insert("x".to_string(), MapValue::Each(numbers(&[1, 2, 3])));
            let mapped = ctx.dispatcher.map(double_call(), upstream).await;
            let futures = match mapped {
                Mapped::Inline(futures) => futures,
                Mapped::Deferred(_) => {
                    return Err(TaskError::Failed("expected inline dispatch".into()))
                }
            };
            let mut total = 0.0;
            for future in futures {
                match future.resolve().await {
                    Resolved::State(result) => total += result?.as_f64().unwrap_or(0.0),
                    Resolved::Nested(_) => {
                        return Err(TaskError::Failed("unexpected nesting".into()))
                    }
                }
            }
            Ok(Value::from(total))
        }
        .boxed()
    });

    let future = scope.submit(fan, StateMap::new()).await.unwrap();
    let results = scope.wait(vec![future], None).await.unwrap();
    assert_eq!(results, vec![Ok(Value::from(12.0))]);
}

#[tokio::test]
async fn test_wait_preserves_submission_order() {
    let executor = TokioExecutor::default();
    let scope = executor.start().unwrap();

    let delayed = |delay_ms: u64, value: i64| -> TaskCall {
        Arc::new(move |_ctx| {
            async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(Value::from(value))
            }
            .boxed()
        })
    };

    // completion order is reversed; result order must not be
    let mut futures = Vec::new();
    futures.push(scope.submit(delayed(60, 1), StateMap::new()).await.unwrap());
    futures.push(scope.submit(delayed(30, 2), StateMap::new()).await.unwrap());
    futures.push(scope.submit(delayed(5, 3), StateMap::new()).await.unwrap());

    let results = scope.wait(futures, None).await.unwrap();
    assert_eq!(
        results,
        vec![
            Ok(Value::from(1i64)),
            Ok(Value::from(2i64)),
            Ok(Value::from(3i64)),
        ]
    );
}

#[tokio::test]
async fn test_wait_times_out_on_slow_work() {
    let executor = TokioExecutor::default();
    let scope = executor.start().unwrap();

    let slow: TaskCall = Arc::new(|_ctx| {
        async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(Value::Null)
        }
        .boxed()
    });
    let future = scope.submit(slow, StateMap::new()).await.unwrap();
    let result = scope
        .wait(vec![future], Some(Duration::from_millis(50)))
        .await;
    assert!(matches!(result, Err(ExecutorError::Timeout(_))));
}

#[tokio::test]
async fn test_serial_executor_runs_eagerly() {
    let counter = Arc::new(AtomicUsize::new(0));
    let call: TaskCall = {
        let counter = counter.clone();
        Arc::new(move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
            .boxed()
        })
    };

    let executor = SerialExecutor::new();
    let scope = executor.start().unwrap();
    let future = scope.submit(call, StateMap::new()).await.unwrap();
    // the call already ran at submission time
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let results = scope.wait(vec![future], None).await.unwrap();
    assert_eq!(results, vec![Ok(Value::Null)]);
}
