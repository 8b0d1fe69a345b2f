// Periodic task dispatch for the consumer loop
//
// Intervals are soft: a task runs on the first tick after its interval has
// elapsed, and the next interval is measured from that tick.

/// Handle of a registered task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(usize);

pub type TaskCallback = Box<dyn FnMut() + Send>;

struct Task {
    name: String,
    callback: TaskCallback,
    interval_ms: u64,
    last_run_ms: u64,
    runs: u64,
}

#[derive(Default)]
pub struct TaskScheduler {
    tasks: Vec<Task>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` to run every `interval_ms` milliseconds.
    ///
    /// The clock starts at 0, so a task first runs once `now_ms` exceeds its
    /// interval.
    pub fn add_handle(
        &mut self,
        name: impl Into<String>,
        callback: TaskCallback,
        interval_ms: u64,
    ) -> TaskId {
        let name = name.into();
        log::debug!("Scheduling task '{}' every {} ms", name, interval_ms);
        self.tasks.push(Task {
            name,
            callback,
            interval_ms,
            last_run_ms: 0,
            runs: 0,
        });
        TaskId(self.tasks.len() - 1)
    }

    /// Run every task whose interval has elapsed; returns how many ran
    pub fn tick(&mut self, now_ms: u64) -> usize {
        let mut invoked = 0;
        for task in &mut self.tasks {
            if now_ms.saturating_sub(task.last_run_ms) > task.interval_ms {
                (task.callback)();
                task.last_run_ms = now_ms;
                task.runs += 1;
                invoked += 1;
            }
        }
        invoked
    }

    /// How often a task has run so far
    pub fn run_count(&self, id: TaskId) -> Option<u64> {
        self.tasks.get(id.0).map(|task| task.runs)
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|task| task.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
