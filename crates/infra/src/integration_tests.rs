//! End-to-end tests for the full pipeline.
//!
//! Tests: Producer → TaskQueue → Worker → ExecutionEngine → RetryScheduler
//! → DeferredQueue → RetryTimer → DeadLetterSink → AlertDispatcher
//!
//! Runs real threads against the in-memory backends with short delays.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use relayq_core::{StepError, Task, TaskId, TaskState};

    use crate::config::PipelineConfig;
    use crate::dead_letter::{AlertDispatcher, AlertError, DeadLetterEntry};
    use crate::engine::step;
    use crate::retry::RetryPolicy;
    use crate::worker::{Backends, Pipeline};

    #[derive(Default)]
    struct RecordingAlerts {
        alerted: Mutex<Vec<DeadLetterEntry>>,
    }

    impl AlertDispatcher for RecordingAlerts {
        fn notify(&self, entry: &DeadLetterEntry) -> Result<(), AlertError> {
            self.alerted.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    fn config(base_delay_ms: u64) -> PipelineConfig {
        PipelineConfig::default()
            .with_retry(RetryPolicy::exponential(
                3,
                Duration::from_millis(base_delay_ms),
            ))
            .with_workers(2)
            .with_dequeue_timeout(Duration::from_millis(20))
            .with_timer_tick(Duration::from_millis(5))
    }

    fn id(s: &str) -> TaskId {
        TaskId::new(s).unwrap()
    }

    fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn state_of(backends: &Backends, task_id: &str) -> Option<TaskState> {
        backends
            .status
            .get(&id(task_id))
            .unwrap()
            .map(|s| s.state)
    }

    /// Two-step pipeline: `validate` always passes, `transform` fails for a
    /// "corrupt" payload.
    fn data_pipeline(
        config: PipelineConfig,
        backends: Backends,
        transform_calls: Arc<AtomicUsize>,
    ) -> Pipeline {
        Pipeline::new(config, backends)
            .with_step(step("validate", |_| Ok(())))
            .with_step(step("transform", move |task: &Task| {
                transform_calls.fetch_add(1, Ordering::SeqCst);
                if task.payload == serde_json::json!("corrupt") {
                    Err(StepError::payload("invalid data format"))
                } else {
                    Ok(())
                }
            }))
    }

    #[test]
    fn valid_task_completes_and_leaves_nothing_behind() {
        let config = config(20);
        let backends = Backends::in_memory(&config);
        let pipeline = data_pipeline(config.clone(), backends.clone(), Arc::default());
        let producer = pipeline.producer();
        let handle = pipeline.spawn().unwrap();

        producer.submit(id("A"), serde_json::json!("valid")).unwrap();
        wait_until("A to complete", || {
            state_of(&backends, "A") == Some(TaskState::Completed)
        });

        let stats = handle.shutdown();
        assert_eq!(stats.tasks_completed, 1);
        assert!(backends.tasks.is_empty(&config.queue).unwrap());
        assert!(backends.deferred.is_empty(&config.queue).unwrap());
        assert!(backends.dead_letters.is_empty().unwrap());
        assert!(backends.progress.completed_steps(&id("A")).unwrap().is_empty());
    }

    #[test]
    fn poison_pill_is_dead_lettered_once_with_one_alert() {
        let config = config(10);
        let alerts = Arc::new(RecordingAlerts::default());
        let backends = Backends::in_memory(&config).with_alerts(alerts.clone());
        let transform_calls = Arc::new(AtomicUsize::new(0));
        let pipeline = data_pipeline(config.clone(), backends.clone(), transform_calls.clone());
        let producer = pipeline.producer();
        let handle = pipeline.spawn().unwrap();

        producer.submit(id("C"), serde_json::json!("corrupt")).unwrap();
        wait_until("the alert for C", || !alerts.alerted.lock().unwrap().is_empty());

        let stats = handle.shutdown();

        let entries = backends.dead_letters.list(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].task.id, id("C"));
        assert_eq!(entries[0].final_attempt_count, 3);
        assert_eq!(entries[0].task.payload, serde_json::json!("corrupt"));

        assert_eq!(alerts.alerted.lock().unwrap().len(), 1);
        assert_eq!(transform_calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.retries_scheduled, 2);
        assert_eq!(stats.tasks_dead_lettered, 1);
        assert_eq!(state_of(&backends, "C"), Some(TaskState::DeadLettered));
        assert!(backends.progress.completed_steps(&id("C")).unwrap().is_empty());
    }

    #[test]
    fn redelivered_order_skips_the_committed_payment() {
        let config = config(10);
        let backends = Backends::in_memory(&config);
        let payments = Arc::new(AtomicUsize::new(0));
        let inventory = Arc::new(AtomicUsize::new(0));

        let p = payments.clone();
        let i = inventory.clone();
        let pipeline = Pipeline::new(config.clone(), backends.clone())
            .with_step(step("payment_done", move |_| {
                p.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .with_step(step("inventory_updated", move |_| {
                // First call fails after payment already went through.
                if i.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(StepError::transient("inventory service timeout"))
                } else {
                    Ok(())
                }
            }));
        let producer = pipeline.producer();
        let handle = pipeline.spawn().unwrap();

        producer
            .submit(id("order_2"), serde_json::json!({"order": 2}))
            .unwrap();
        wait_until("order_2 to complete", || {
            state_of(&backends, "order_2") == Some(TaskState::Completed)
        });
        handle.shutdown();

        assert_eq!(payments.load(Ordering::SeqCst), 1);
        assert_eq!(inventory.load(Ordering::SeqCst), 2);
        assert!(backends.dead_letters.is_empty().unwrap());
    }

    #[test]
    fn healthy_tasks_finish_while_a_poison_pill_backs_off() {
        let config = config(200);
        let alerts = Arc::new(RecordingAlerts::default());
        let backends = Backends::in_memory(&config).with_alerts(alerts.clone());
        let pipeline = data_pipeline(config.clone(), backends.clone(), Arc::default());
        let producer = pipeline.producer();
        let handle = pipeline.spawn().unwrap();

        producer.submit(id("A"), serde_json::json!("valid")).unwrap();
        producer.submit(id("B"), serde_json::json!("valid")).unwrap();
        producer.submit(id("C"), serde_json::json!("corrupt")).unwrap();
        producer.submit(id("D"), serde_json::json!("valid")).unwrap();

        wait_until("A, B and D to complete", || {
            ["A", "B", "D"]
                .iter()
                .all(|t| state_of(&backends, t) == Some(TaskState::Completed))
        });
        // C needs at least 200ms + 400ms of backoff before it can be dead-lettered.
        assert!(backends.dead_letters.is_empty().unwrap());

        wait_until("C to be dead-lettered", || {
            !alerts.alerted.lock().unwrap().is_empty()
        });
        let stats = handle.shutdown();

        assert_eq!(stats.tasks_completed, 3);
        assert_eq!(stats.tasks_dead_lettered, 1);
        assert_eq!(backends.dead_letters.len().unwrap(), 1);
    }

    #[test]
    fn replayed_dead_letter_runs_with_a_fresh_budget() {
        let config = config(5);
        let backends = Backends::in_memory(&config);
        let broken = Arc::new(std::sync::atomic::AtomicBool::new(true));

        let b = broken.clone();
        let pipeline = Pipeline::new(config.clone(), backends.clone()).with_step(step(
            "deliver",
            move |_| {
                if b.load(Ordering::SeqCst) {
                    Err(StepError::transient("downstream unavailable"))
                } else {
                    Ok(())
                }
            },
        ));
        let producer = pipeline.producer();
        let handle = pipeline.spawn().unwrap();

        producer.submit(id("E"), serde_json::json!({"n": 1})).unwrap();
        wait_until("E to be dead-lettered", || {
            state_of(&backends, "E") == Some(TaskState::DeadLettered)
        });

        broken.store(false, Ordering::SeqCst);
        let replayed = producer.replay_dead_letter(&id("E")).unwrap().unwrap();
        assert_eq!(replayed.attempt_count, 0);

        wait_until("E to complete after replay", || {
            state_of(&backends, "E") == Some(TaskState::Completed)
        });
        handle.shutdown();
        assert!(backends.dead_letters.is_empty().unwrap());
    }

    #[test]
    fn invalid_pipelines_fail_to_spawn() {
        let config = PipelineConfig::default();
        let backends = Backends::in_memory(&config);
        assert!(Pipeline::new(config.clone(), backends.clone()).spawn().is_err());

        let bad_policy = config.with_retry(RetryPolicy::exponential(0, Duration::from_secs(1)));
        assert!(
            Pipeline::new(bad_policy, backends)
                .with_step(step("noop", |_| Ok(())))
                .spawn()
                .is_err()
        );
    }
}
