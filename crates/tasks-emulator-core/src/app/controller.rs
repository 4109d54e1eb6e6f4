//! QueueController - 全キューのスケジューリングループ
//!
//! - キューごとにトークン補充タイマーを持つ
//! - listener が tick を回し続ける（忙しい時は短く、暇な時は長く待つ）
//! - enqueue で暇な listener を起こす

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::settings::ControllerSettings;
use crate::domain::{QueueConfig, Task};
use crate::error::EngineError;
use crate::impls::HttpTransport;
use crate::ports::{Clock, SystemClock, Transport};
use crate::queue::{DispatchQueue, QueueStatistics};

/// Owns every emulated queue and drives them.
///
/// All queue mutations happen under one lock. Background tasks hold only a weak
/// reference, so dropping the controller ends them.
pub struct QueueController {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    settings: ControllerSettings,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, DispatchQueue>,
    refill_timers: HashMap<String, JoinHandle<()>>,
    listener: Option<Listener>,
}

struct Listener {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl QueueController {
    pub fn new(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                clock,
                transport,
                settings,
            }),
        }
    }

    /// Real HTTP delivery, wall-clock time.
    pub fn http(settings: ControllerSettings) -> Self {
        Self::new(
            Arc::new(HttpTransport::new()),
            Arc::new(SystemClock),
            settings,
        )
    }

    pub async fn create_queue(
        &self,
        name: impl Into<String>,
        config: QueueConfig,
    ) -> Result<(), EngineError> {
        let name = name.into();
        config.validate()?;

        let mut state = self.shared.state.lock().await;
        if state.queues.contains_key(&name) {
            return Err(EngineError::AlreadyExists(name));
        }

        info!(
            queue = %name,
            max_concurrent = config.rate_limits.max_concurrent_dispatches,
            max_rate = config.rate_limits.max_dispatches_per_second,
            "queue created"
        );
        let queue = DispatchQueue::with_capacity(
            name.clone(),
            config,
            self.shared.settings.queue_capacity,
            Arc::clone(&self.shared.clock),
            Arc::clone(&self.shared.transport),
        );
        state.queues.insert(name.clone(), queue);
        let timer = spawn_refill_timer(&self.shared, name.clone());
        state.refill_timers.insert(name, timer);
        Ok(())
    }

    pub async fn enqueue(&self, queue_name: &str, task: Task) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock().await;
        state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| EngineError::QueueNotFound(queue_name.to_string()))?
            .enqueue(task)?;
        drop(state);

        self.shared.notify.notify_one();
        Ok(())
    }

    pub async fn delete(&self, queue_name: &str, task_name: &str) -> Result<Task, EngineError> {
        let mut state = self.shared.state.lock().await;
        state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| EngineError::QueueNotFound(queue_name.to_string()))?
            .delete(task_name)
    }

    /// One scheduling pass over every active queue. Returns whether any was active.
    pub async fn tick(&self) -> bool {
        tick_queues(&self.shared).await
    }

    /// Start the scheduling loop. Calling it while running does nothing.
    pub async fn start(&self) {
        let mut state = self.shared.state.lock().await;
        if state.listener.is_some() {
            return;
        }

        // Re-arm timers a previous stop() cancelled.
        let names: Vec<String> = state
            .queues
            .keys()
            .filter(|name| !state.refill_timers.contains_key(*name))
            .cloned()
            .collect();
        for name in names {
            let timer = spawn_refill_timer(&self.shared, name.clone());
            state.refill_timers.insert(name, timer);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(listen(Arc::downgrade(&self.shared), shutdown_rx));
        state.listener = Some(Listener { shutdown_tx, join });
        info!(queues = state.queues.len(), "controller started");
    }

    /// Stop the loop and every refill timer. Pending and in-flight tasks are abandoned.
    pub async fn stop(&self) {
        let listener = {
            let mut state = self.shared.state.lock().await;
            for (_, timer) in state.refill_timers.drain() {
                timer.abort();
            }
            state.listener.take()
        };

        if let Some(listener) = listener {
            // 失敗してもOK（listener が既に終わっている）
            let _ = listener.shutdown_tx.send(true);
            let _ = listener.join.await;
            info!("controller stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.shared.state.lock().await.listener.is_some()
    }

    pub async fn statistics(&self) -> BTreeMap<String, QueueStatistics> {
        let mut state = self.shared.state.lock().await;
        state
            .queues
            .iter_mut()
            .map(|(name, queue)| (name.clone(), queue.statistics()))
            .collect()
    }

    pub async fn queue_names(&self) -> Vec<String> {
        let state = self.shared.state.lock().await;
        let mut names: Vec<String> = state.queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn contains_queue(&self, name: &str) -> bool {
        self.shared.state.lock().await.queues.contains_key(name)
    }
}

async fn tick_queues(shared: &Shared) -> bool {
    let mut state = shared.state.lock().await;
    let mut active = false;
    for queue in state.queues.values_mut().filter(|q| q.is_active()) {
        active = true;
        queue.dispatch_tasks();
        queue.process_dispatch();
    }
    active
}

async fn listen(shared: Weak<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    debug!("listener running");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let Some(strong) = shared.upgrade() else {
            break;
        };

        let active = tick_queues(&strong).await;
        let pause = if active {
            strong.settings.busy_poll_interval
        } else {
            strong.settings.idle_poll_interval
        };

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = strong.notify.notified() => {}
            _ = tokio::time::sleep(pause) => {}
        }
    }
    debug!("listener exited");
}

fn spawn_refill_timer(shared: &Arc<Shared>, queue_name: String) -> JoinHandle<()> {
    let weak = Arc::downgrade(shared);
    let period = shared
        .settings
        .token_refill_interval
        .max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(shared) = weak.upgrade() else {
                break;
            };
            let mut state = shared.state.lock().await;
            let Some(queue) = state.queues.get_mut(&queue_name) else {
                break;
            };
            queue.refill_tokens();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RateLimits;
    use crate::queue::headers;
    use crate::testing::{ScriptedTransport, task, test_config};

    fn fast_settings() -> ControllerSettings {
        ControllerSettings {
            busy_poll_interval: Duration::from_millis(1),
            idle_poll_interval: Duration::from_millis(20),
            token_refill_interval: Duration::from_millis(10),
            ..ControllerSettings::default()
        }
    }

    fn fast_config() -> QueueConfig {
        QueueConfig {
            rate_limits: RateLimits {
                max_concurrent_dispatches: 1,
                max_dispatches_per_second: 200.0,
            },
            ..test_config()
        }
    }

    fn controller(transport: Arc<ScriptedTransport>, settings: ControllerSettings) -> QueueController {
        QueueController::new(transport, Arc::new(SystemClock), settings)
    }

    async fn wait_for_calls(transport: &ScriptedTransport, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.calls() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("deliveries did not happen in time");
    }

    #[tokio::test]
    async fn create_queue_rejects_duplicates_and_bad_config() {
        let c = controller(ScriptedTransport::always(200), fast_settings());
        c.create_queue("q", fast_config()).await.unwrap();
        assert_eq!(
            c.create_queue("q", fast_config()).await,
            Err(EngineError::AlreadyExists("q".into()))
        );

        let mut bad = fast_config();
        bad.rate_limits.max_concurrent_dispatches = 5001;
        assert!(matches!(
            c.create_queue("other", bad).await,
            Err(EngineError::InvalidConfig(_))
        ));
        assert_eq!(c.queue_names().await, vec!["q".to_string()]);
        assert!(c.contains_queue("q").await);
        assert!(!c.contains_queue("other").await);
    }

    #[tokio::test]
    async fn unknown_queue_is_reported() {
        let c = controller(ScriptedTransport::always(200), fast_settings());
        assert_eq!(
            c.enqueue("nope", task("t")).await,
            Err(EngineError::QueueNotFound("nope".into()))
        );
        assert_eq!(
            c.delete("nope", "t").await,
            Err(EngineError::QueueNotFound("nope".into()))
        );
    }

    #[tokio::test]
    async fn enqueue_and_delete_delegate_to_the_queue() {
        let c = controller(ScriptedTransport::always(200), fast_settings());
        c.create_queue("q", fast_config()).await.unwrap();
        c.enqueue("q", task("a")).await.unwrap();
        assert!(matches!(
            c.enqueue("q", task("a")).await,
            Err(EngineError::DuplicateTaskName(_))
        ));

        let removed = c.delete("q", "a").await.unwrap();
        assert_eq!(removed.http_request.url, "http://website.com/");
        assert_eq!(c.delete("q", "a").await.unwrap_err().http_status(), 404);
    }

    #[tokio::test]
    async fn tick_reports_activity() {
        let c = controller(ScriptedTransport::always(200), fast_settings());
        assert!(!c.tick().await);
        c.create_queue("q", fast_config()).await.unwrap();
        assert!(!c.tick().await);
        c.enqueue("q", task("a")).await.unwrap();
        assert!(c.tick().await);
    }

    #[tokio::test]
    async fn delivers_in_fifo_order_with_one_slot() {
        let transport = ScriptedTransport::always(200);
        let c = controller(transport.clone(), fast_settings());
        c.create_queue("q", fast_config()).await.unwrap();
        for name in ["a", "b", "c"] {
            c.enqueue("q", task(name)).await.unwrap();
        }

        c.start().await;
        wait_for_calls(&transport, 3).await;
        c.stop().await;

        let order: Vec<_> = transport
            .requests()
            .iter()
            .map(|r| r.header(headers::TASK_NAME).unwrap().to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_halts() {
        let c = controller(ScriptedTransport::always(200), fast_settings());
        assert!(!c.is_running().await);
        c.start().await;
        c.start().await;
        assert!(c.is_running().await);
        c.stop().await;
        assert!(!c.is_running().await);
        // stopping twice is harmless
        c.stop().await;
    }

    #[tokio::test]
    async fn enqueue_wakes_an_idle_listener() {
        let transport = ScriptedTransport::always(200);
        let settings = ControllerSettings {
            idle_poll_interval: Duration::from_secs(30),
            ..fast_settings()
        };
        let c = controller(transport.clone(), settings);
        c.create_queue("q", fast_config()).await.unwrap();
        c.start().await;

        // let the listener go idle and the bucket fill
        tokio::time::sleep(Duration::from_millis(50)).await;
        c.enqueue("q", task("a")).await.unwrap();
        wait_for_calls(&transport, 1).await;
        c.stop().await;
    }

    #[tokio::test]
    async fn failed_task_shows_up_in_statistics() {
        let transport = ScriptedTransport::always(500);
        let c = controller(transport.clone(), fast_settings());
        let mut config = fast_config();
        config.retry_policy.max_attempts = 1;
        config.retry_policy.max_retry_duration = None;
        config.retry_policy.min_backoff = Duration::from_millis(1);
        c.create_queue("q", config).await.unwrap();
        c.enqueue("q", task("a")).await.unwrap();
        c.start().await;

        wait_for_calls(&transport, 2).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while c.statistics().await["q"].failed_tasks == 0.0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task never failed");
        c.stop().await;

        let all = c.statistics().await;
        let stats = &all["q"];
        assert_eq!(stats.running_tasks, 0);
        assert_eq!(stats.number_of_tasks, 0);
        assert_eq!(stats.completed_last_min, 1);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn statistics_cover_every_queue() {
        let c = controller(ScriptedTransport::always(200), fast_settings());
        c.create_queue("b", fast_config()).await.unwrap();
        c.create_queue("a", fast_config()).await.unwrap();
        c.enqueue("a", task("t")).await.unwrap();

        let stats = c.statistics().await;
        assert_eq!(stats.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(stats["a"].number_of_tasks, 1);
        assert_eq!(stats["a"].max_rate, 200.0);
        assert_eq!(stats["b"].number_of_tasks, 0);
    }

    #[tokio::test]
    async fn restart_rearms_refill_timers() {
        let transport = ScriptedTransport::always(200);
        let c = controller(transport.clone(), fast_settings());
        c.create_queue("q", fast_config()).await.unwrap();
        c.start().await;
        c.stop().await;

        c.enqueue("q", task("a")).await.unwrap();
        c.start().await;
        wait_for_calls(&transport, 1).await;
        c.stop().await;
        assert!(c.shared.state.lock().await.refill_timers.is_empty());
    }
}
