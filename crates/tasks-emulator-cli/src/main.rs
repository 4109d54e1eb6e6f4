use serde::Serialize;
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tasks_emulator_core::domain::{
    HttpRequest, QueueKey, generate_task_id, task_path,
};
use tasks_emulator_core::{ControllerSettings, QueueConfig, QueueController, Task};

const PROJECT: &str = "dev";
const LOCATION: &str = "local";
const QUEUE_ID: &str = "demo";

#[derive(Debug, Serialize)]
struct DemoPayload {
    seq: usize,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// usage: tasks-emulator-cli <target-url> [count]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let target = args
        .next()
        .unwrap_or_else(|| "http://127.0.0.1:8080/".to_string());
    let count: usize = match args.next() {
        Some(n) => n.parse()?,
        None => 3,
    };

    // (A) controller とキューを用意
    let controller = QueueController::http(ControllerSettings::default());
    let key = QueueKey::new(PROJECT, LOCATION, QUEUE_ID)?;
    controller
        .create_queue(key.clone(), QueueConfig::default().with_default_uri(target))
        .await?;

    // (B) タスク投入（URL は空 = キューの default_uri）
    for seq in 0..count {
        let id = generate_task_id();
        let body = serde_json::to_vec(&DemoPayload { seq })?;
        let task = Task::new(
            task_path(PROJECT, LOCATION, QUEUE_ID, &id),
            HttpRequest::post("", body),
        );
        controller.enqueue(key.as_str(), task).await?;
        info!(task = %id, "enqueued");
    }

    // (C) ループ起動、全部 pending / slot から抜けるまで待つ
    controller.start().await;
    loop {
        sleep(Duration::from_millis(200)).await;
        let stats = controller.statistics().await;
        let busy = stats
            .values()
            .any(|s| s.number_of_tasks > 0 || s.running_tasks > 0);
        if !busy {
            println!("{}", serde_json::to_string_pretty(&stats)?);
            break;
        }
    }

    controller.stop().await;
    Ok(())
}
