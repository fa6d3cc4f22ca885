//! Demo order pipeline and seed data.

use serde_json::{Value, json};
use tracing::info;

use relayq_core::{StepError, Task, TaskId};
use relayq_infra::{Backends, Pipeline, PipelineConfig, TaskProducer, step};

/// `charge_payment` then `reserve_inventory`.
///
/// - payload `{"data": "corrupt"}` fails inventory on every attempt and ends
///   up dead-lettered
/// - `order_2` fails inventory on its first attempt only; the retry skips
///   the payment that already went through
pub fn order_pipeline(config: PipelineConfig, backends: Backends) -> Pipeline {
    Pipeline::new(config, backends)
        .with_step(step("charge_payment", |task: &Task| {
            info!(task_id = %task.id, "payment charged");
            Ok(())
        }))
        .with_step(step("reserve_inventory", |task: &Task| {
            if task.payload.get("data").and_then(Value::as_str) == Some("corrupt") {
                return Err(StepError::payload("invalid data format"));
            }
            if task.id.as_str() == "order_2" && task.attempt_count == 0 {
                return Err(StepError::transient("inventory service timeout"));
            }
            info!(task_id = %task.id, "inventory reserved");
            Ok(())
        }))
}

pub fn seed(producer: &TaskProducer) -> anyhow::Result<()> {
    let tasks = [
        ("A", json!({"data": "valid"})),
        ("B", json!({"data": "valid"})),
        ("C", json!({"data": "corrupt"})),
        ("D", json!({"data": "valid"})),
        ("order_1", json!({"order_id": "order_1", "amount": 100})),
        ("order_2", json!({"order_id": "order_2", "amount": 250})),
    ];

    let count = tasks.len();
    for (id, payload) in tasks {
        producer.submit(TaskId::new(id)?, payload)?;
    }
    info!(queue = %producer.queue_name(), count, "demo tasks seeded");
    Ok(())
}
