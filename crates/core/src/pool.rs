//! Worker pool with shared-iterator task distribution (spec §4.5).
//!
//! Not a batching pool: one iterator over `(index, factory)` is consumed
//! atomically by `concurrency` workers, so every slot stays busy
//! continuously regardless of per-task latency variance.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

/// One slot in the pool's return array.
#[derive(Debug, Clone)]
pub struct PoolResult<T, E> {
    pub index: usize,
    pub outcome: Result<T, E>,
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type TaskFactory<T, E> = Box<dyn FnOnce() -> BoxFuture<Result<T, E>> + Send>;

/// Shared cursor over the task list, pulled atomically by every worker.
struct SharedIterator<T, E> {
    tasks: Mutex<Vec<Option<TaskFactory<T, E>>>>,
    cursor: AtomicUsize,
}

impl<T, E> SharedIterator<T, E> {
    async fn next(&self) -> Option<(usize, TaskFactory<T, E>)> {
        loop {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            let mut tasks = self.tasks.lock().await;
            if index >= tasks.len() {
                return None;
            }
            if let Some(factory) = tasks[index].take() {
                return Some((index, factory));
            }
        }
    }
}

/// Execute `tasks` with bounded parallelism `concurrency`, preserving the
/// index of each result. When `fail_fast` is set, the first task failure
/// sets a shared abort flag; in-flight peers finish naturally but no new
/// task is picked up afterward, so the result array may be sparse.
///
/// `on_complete` is invoked in the worker that produced each result,
/// immediately after it settles — used by the progress reporter to emit
/// lines as tasks finish rather than after all finish.
pub async fn run<T, E, F, Fut, C>(
    tasks: Vec<F>,
    concurrency: usize,
    fail_fast: bool,
    on_complete: Option<C>,
) -> Vec<Option<PoolResult<T, E>>>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    C: Fn(&PoolResult<T, E>) + Send + Sync + 'static,
{
    let total = tasks.len();
    let boxed: Vec<Option<TaskFactory<T, E>>> = tasks
        .into_iter()
        .map(|f| {
            let boxed: TaskFactory<T, E> = Box::new(move || Box::pin(f()));
            Some(boxed)
        })
        .collect();

    let shared = Arc::new(SharedIterator {
        tasks: Mutex::new(boxed),
        cursor: AtomicUsize::new(0),
    });
    let abort = Arc::new(AtomicBool::new(false));
    let results: Arc<Mutex<Vec<Option<PoolResult<T, E>>>>> =
        Arc::new(Mutex::new((0..total).map(|_| None).collect()));
    let on_complete = on_complete.map(Arc::new);

    let worker_count = concurrency.min(total).max(if total == 0 { 0 } else { 1 });
    let mut handles = Vec::with_capacity(worker_count);

    for _ in 0..worker_count {
        let shared = shared.clone();
        let abort = abort.clone();
        let results = results.clone();
        let on_complete = on_complete.clone();

        handles.push(tokio::spawn(async move {
            loop {
                if abort.load(Ordering::Acquire) {
                    break;
                }
                let Some((index, factory)) = shared.next().await else {
                    break;
                };
                let outcome = factory().await;
                let is_err = outcome.is_err();
                let result = PoolResult { index, outcome };

                if let Some(cb) = &on_complete {
                    cb(&result);
                }

                results.lock().await[index] = Some(result);

                if is_err && fail_fast {
                    abort.store(true, Ordering::Release);
                    break;
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    // Every worker holding a clone of `results` has been joined above, so
    // this is the sole remaining reference.
    Arc::try_unwrap(results)
        .expect("all worker tasks joined before this point")
        .into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_all_tasks_complete_with_correct_index() {
        let tasks: Vec<_> = (0..5)
            .map(|i| move || async move { Ok::<_, String>(i * 10) })
            .collect();
        let results = run(tasks, 2, false, None::<fn(&PoolResult<i32, String>)>).await;
        assert_eq!(results.len(), 5);
        for (i, r) in results.iter().enumerate() {
            let r = r.as_ref().unwrap();
            assert_eq!(r.index, i);
            assert_eq!(*r.outcome.as_ref().unwrap(), (i as i32) * 10);
        }
    }

    #[tokio::test]
    async fn test_concurrency_greater_than_len_spawns_only_len_workers() {
        let counter = Arc::new(AtomicU32::new(0));
        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let counter = counter.clone();
                move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(())
                    }
                }
            })
            .collect();
        let results = run(tasks, 100, false, None::<fn(&PoolResult<(), String>)>).await;
        assert_eq!(results.len(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fail_fast_leaves_later_indices_absent() {
        let started = Arc::new(AtomicU32::new(0));
        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let started = started.clone();
                move || {
                    let started = started.clone();
                    async move {
                        started.fetch_add(1, Ordering::SeqCst);
                        if i == 1 {
                            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                            Err::<(), String>("boom".to_string())
                        } else if i == 0 {
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            Ok(())
                        } else {
                            // Tasks 2..5 should never be picked up once
                            // fail-fast triggers, but if they are spawned
                            // before the abort flag is observed, sleep
                            // long enough that the test's assertions below
                            // still reflect fail-fast behavior on indices.
                            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                            Ok(())
                        }
                    }
                }
            })
            .collect();
        let results = run(tasks, 2, true, None::<fn(&PoolResult<(), String>)>).await;
        assert!(results[0].is_some());
        assert!(results[1].is_some());
        assert!(results[1].as_ref().unwrap().outcome.is_err());
    }

    #[tokio::test]
    async fn test_on_complete_callback_invoked_per_result() {
        let completions = Arc::new(AtomicU32::new(0));
        let completions_clone = completions.clone();
        let tasks: Vec<_> = (0..4)
            .map(|i| move || async move { Ok::<_, String>(i) })
            .collect();
        let _ = run(
            tasks,
            2,
            false,
            Some(move |_: &PoolResult<i32, String>| {
                completions_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;
        assert_eq!(completions.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_concurrency_one_is_sequential() {
        let tasks: Vec<_> = (0..3)
            .map(|i| move || async move { Ok::<_, String>(i) })
            .collect();
        let results = run(tasks, 1, false, None::<fn(&PoolResult<i32, String>)>).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_some()));
    }

    #[tokio::test]
    async fn test_empty_task_list() {
        let tasks: Vec<fn() -> BoxFuture<Result<(), String>>> = Vec::new();
        let results = run(tasks, 4, false, None::<fn(&PoolResult<(), String>)>).await;
        assert!(results.is_empty());
    }
}
