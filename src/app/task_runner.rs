use std::{
    sync::{
        atomic::{AtomicU16, Ordering},
        mpsc, Arc, RwLock,
    },
    thread::sleep,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    app::local,
    config::Config,
    eid::Eid,
    library::ImageManager,
    storage::{self, StorageManager},
    vectors::VectorSpace,
    vision::VisionApi,
};

const QUEUE_DUMP_FILE: &str = "task-queue.json";

pub fn now() -> u128 {
    let start = SystemTime::now();
    let since_the_epoch = start
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards");
    since_the_epoch.as_millis()
}

pub fn throttle(counter: Arc<AtomicU16>, config: Arc<RwLock<Config>>) {
    while counter.load(Ordering::Relaxed) >= config.read().unwrap().task_queue_max_threads {
        sleep(Duration::from_millis(100));
    }
}

pub fn start_queue(
    task_rx: mpsc::Receiver<Task>,
    image_mgr: Arc<dyn ImageManager>,
    vision: Arc<dyn VisionApi>,
    space: VectorSpace,
    config: Arc<RwLock<Config>>,
) {
    let base_path = config.read().unwrap().base_path().to_string();
    let thread_ctr = Arc::new(AtomicU16::new(0));

    log::debug!("waiting for job");
    while let Ok(task) = task_rx.recv() {
        log::debug!("got the job");
        let image_mgr = image_mgr.clone();
        let vision = vision.clone();
        let space = space.clone();
        let config = config.clone();
        let thread_counter = thread_ctr.clone();
        let base_path = base_path.clone();

        // graceful shutdown
        if let Task::Shutdown = &task {
            log::info!("{}", thread_counter.load(Ordering::Relaxed));
            while thread_counter.load(Ordering::Relaxed) > 0 {
                sleep(Duration::from_millis(100));
            }
            return;
        };

        let id = save_task(&base_path, task.clone(), Status::Pending);
        let task_handle = std::thread::spawn({
            let thread_counter = thread_counter.clone();
            let id = id.clone();
            let base_path = base_path.clone();
            move || {
                throttle(thread_counter.clone(), config.clone());

                thread_counter.fetch_add(1, Ordering::Relaxed);
                set_status(&base_path, id.clone(), Status::InProgress);

                // enrichment has no retry policy: one failure marks the
                // record failed until a caller re-triggers processing
                let status = task.run(image_mgr, vision, &space, config);
                set_status(&base_path, id.clone(), status);

                // remove task a bit later to give client an opportunity to react
                std::thread::spawn(move || {
                    sleep(Duration::from_secs(10));
                    remove_task(&base_path, id);
                });
            }
        });

        // handle thread panics
        std::thread::spawn({
            let base_path = base_path.clone();
            move || {
                if let Err(err) = task_handle.join() {
                    log::error!("task_handle panicked: {err:?}");
                    remove_task(&base_path, id);
                }

                thread_counter.fetch_sub(1, Ordering::Relaxed);
            }
        });
    }
}

pub fn read_queue_dump(base_path: &str) -> QueueDump {
    let store = match storage::BackendLocal::new(base_path) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to initialize queue storage: {e}");
            return QueueDump {
                queue: vec![],
                now: now(),
            };
        }
    };

    if store.exists(QUEUE_DUMP_FILE) {
        match store.read(QUEUE_DUMP_FILE) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                log::error!("queue dump is malformed: {e}");
                QueueDump {
                    queue: vec![],
                    now: now(),
                }
            }),
            Err(e) => {
                log::error!("failed to read queue dump: {e}");
                QueueDump {
                    queue: vec![],
                    now: now(),
                }
            }
        }
    } else {
        QueueDump {
            queue: vec![],
            now: now(),
        }
    }
}

pub fn write_queue_dump(base_path: &str, queue_dump: &QueueDump) {
    let store = match storage::BackendLocal::new(base_path) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to initialize queue storage: {e}");
            return;
        }
    };

    let queue_dump_str = match serde_json::to_string_pretty(&queue_dump) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to serialize queue dump: {e}");
            return;
        }
    };
    if let Err(e) = store.write(QUEUE_DUMP_FILE, queue_dump_str.as_bytes()) {
        log::error!("failed to write queue dump: {e}");
    }
}

pub fn remove_task(base_path: &str, id: Eid) {
    let mut queue_dump = read_queue_dump(base_path);
    queue_dump.queue.retain(|td| td.id != id);
    queue_dump.now = now();
    write_queue_dump(base_path, &queue_dump);
}

pub fn set_status(base_path: &str, id: Eid, status: Status) {
    let mut queue_dump = read_queue_dump(base_path);
    if let Some(task_dump) = queue_dump.queue.iter_mut().find(|td| td.id == id) {
        task_dump.status = status;
    }

    queue_dump.now = now();
    write_queue_dump(base_path, &queue_dump);
}

pub fn save_task(base_path: &str, task: Task, status: Status) -> Eid {
    let eid = Eid::new();

    let task_dump = TaskDump {
        id: eid.clone(),
        task,
        status,
    };

    let mut queue_dump = read_queue_dump(base_path);

    queue_dump.queue.push(task_dump);
    queue_dump.now = now();
    write_queue_dump(base_path, &queue_dump);

    eid
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Status {
    Interrupted,
    Pending,
    InProgress,
    Done,
    Error(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueDump {
    pub queue: Vec<TaskDump>,
    pub now: u128,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDump {
    pub id: Eid,
    pub task: Task,
    pub status: Status,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Task {
    /// request to run AI enrichment for a stored image
    ProcessImage { image_id: String },

    /// request to gracefully shutdown task queue
    Shutdown,
}

impl Task {
    pub fn run(
        &self,
        image_mgr: Arc<dyn ImageManager>,
        vision: Arc<dyn VisionApi>,
        space: &VectorSpace,
        config: Arc<RwLock<Config>>,
    ) -> Status {
        match self {
            Task::ProcessImage { image_id } => {
                log::debug!("picked up enrichment job for {image_id}");
                let public_base_url = config.read().unwrap().public_base_url.clone();

                match local::enrich_image(
                    image_id,
                    image_mgr.as_ref(),
                    vision.as_ref(),
                    space,
                    &public_base_url,
                ) {
                    Ok(_) => Status::Done,
                    Err(err) => Status::Error(err.to_string()),
                }
            }
            Task::Shutdown => unreachable!(),
        }
    }
}
