//! Sequential, bounded batch processing.
//!
//! [`partitioned`] splits its input into ordered chunks of at most
//! `batch_size` items. The items of one chunk are spawned together; the next
//! chunk starts only once every promise of the current chunk has settled.
//! Results are folded into the accumulator in item order.
//!
//! The first failing item fails the whole result: the still-pending promises
//! of its chunk are cancelled and later chunks never start.
//!
//! ```
//! use core::num::NonZeroUsize;
//! use tether_promise::{Promise, partition};
//!
//! let total = partition::partitioned(
//!     1..=10u32,
//!     NonZeroUsize::new(3).unwrap(),
//!     |n| Promise::supply_async(move || n * n),
//!     0u32,
//!     |acc, square| acc + square,
//! );
//! assert_eq!(total.get().unwrap(), 385);
//! ```

use super::*;
use crate::dependent::Dispatch;
use alloc::collections::VecDeque;
use core::num::NonZeroUsize;

/// Folds every spawned result into `init`, one batch at a time.
///
/// Batch hand-over runs inline on the thread that settles the last promise
/// of the previous batch.
pub fn partitioned<I, T, R, A, S, F>(
    values: I,
    batch_size: NonZeroUsize,
    spawner: S,
    init: A,
    fold: F,
) -> Promise<A>
where
    I: IntoIterator<Item = T>,
    T: Send + 'static,
    R: Clone + Send + 'static,
    A: Clone + Send + 'static,
    S: FnMut(T) -> Promise<R> + Send + 'static,
    F: FnMut(A, R) -> A + Send + 'static,
{
    Batches::start(
        default_executor(),
        values,
        batch_size,
        spawner,
        init,
        fold,
        Dispatch::Inline,
    )
}

/// Like [`partitioned`], with batch hand-over submitted to `executor`.
pub fn partitioned_on<I, T, R, A, S, F>(
    executor: Arc<dyn Executor>,
    values: I,
    batch_size: NonZeroUsize,
    spawner: S,
    init: A,
    fold: F,
) -> Promise<A>
where
    I: IntoIterator<Item = T>,
    T: Send + 'static,
    R: Clone + Send + 'static,
    A: Clone + Send + 'static,
    S: FnMut(T) -> Promise<R> + Send + 'static,
    F: FnMut(A, R) -> A + Send + 'static,
{
    Batches::start(
        executor.clone(),
        values,
        batch_size,
        spawner,
        init,
        fold,
        Dispatch::On(executor),
    )
}

// A batch outcome meeting the driver: whichever side arrives second carries
// the run forward.
enum Handoff<R, B> {
    Waiting,
    Gathered(Result<Vec<R>, Error>),
    Parked(B),
}

type Slot<R, B> = Arc<Mutex<Handoff<R, B>>>;

// Owns the remaining work. Exactly one thread drives it at a time: batches
// that are already gathered are folded in the loop of `run`, and only a
// batch still pending parks the run for its continuation to resume.
struct Batches<T, A, S, F> {
    chunks: VecDeque<Vec<T>>,
    acc: Option<A>,
    spawner: S,
    fold: F,
    dispatch: Dispatch,
    result: Promise<A>,
}

impl<T, A, S, F> Batches<T, A, S, F>
where
    T: Send + 'static,
    A: Clone + Send + 'static,
{
    fn start<I, R>(
        executor: Arc<dyn Executor>,
        values: I,
        batch_size: NonZeroUsize,
        spawner: S,
        init: A,
        fold: F,
        dispatch: Dispatch,
    ) -> Promise<A>
    where
        I: IntoIterator<Item = T>,
        R: Clone + Send + 'static,
        S: FnMut(T) -> Promise<R> + Send + 'static,
        F: FnMut(A, R) -> A + Send + 'static,
    {
        let mut values = values.into_iter();
        let mut chunks = VecDeque::new();
        loop {
            let chunk: Vec<T> = values.by_ref().take(batch_size.get()).collect();
            if chunk.is_empty() {
                break;
            }
            chunks.push_back(chunk);
        }

        let result = Promise::pending_with(executor, Vec::new());
        Self {
            chunks,
            acc: Some(init),
            spawner,
            fold,
            dispatch,
            result: result.clone(),
        }
        .run(None);
        result
    }

    fn run<R>(mut self, mut gathered: Option<Result<Vec<R>, Error>>)
    where
        R: Clone + Send + 'static,
        S: FnMut(T) -> Promise<R> + Send + 'static,
        F: FnMut(A, R) -> A + Send + 'static,
    {
        loop {
            if let Some(outcome) = gathered.take() {
                if let Err(e) = outcome.and_then(|results| self.fold_batch(results)) {
                    self.result.settle(Err(e));
                    return;
                }
            }
            if self.result.is_done() {
                trace!(remaining = self.chunks.len(), "Partitioned result settled early");
                return;
            }

            let Some(chunk) = self.chunks.pop_front() else {
                if let Some(acc) = self.acc.take() {
                    self.result.settle(Ok(acc));
                }
                return;
            };

            let spawner = &mut self.spawner;
            let spawned = match guarded(|| chunk.into_iter().map(spawner).collect::<Vec<_>>()) {
                Ok(spawned) => spawned,
                Err(e) => {
                    self.result.settle(Err(e));
                    return;
                }
            };
            trace!(
                items = spawned.len(),
                remaining = self.chunks.len(),
                "Started batch"
            );

            let batch = settle_all(spawned);
            // Walked immediately if the result was cancelled meanwhile.
            self.result.cell.enlist(batch.as_upstream());

            let slot: Slot<R, Self> = Arc::new(Mutex::new(Handoff::Waiting));
            let arrival = slot.clone();
            batch.subscribe_raw(move |outcome| Self::arrive(&*arrival, outcome));

            let mut handoff = slot.lock();
            match core::mem::replace(&mut *handoff, Handoff::Waiting) {
                Handoff::Gathered(outcome) => gathered = Some(outcome),
                _ => {
                    *handoff = Handoff::Parked(self);
                    return;
                }
            }
        }
    }

    // The batch continuation: resumes a parked run, or leaves the outcome
    // for the driving loop to pick up.
    fn arrive<R>(slot: &Mutex<Handoff<R, Self>>, outcome: Result<Vec<R>, Error>)
    where
        R: Clone + Send + 'static,
        S: FnMut(T) -> Promise<R> + Send + 'static,
        F: FnMut(A, R) -> A + Send + 'static,
    {
        let mut handoff = slot.lock();
        match core::mem::replace(&mut *handoff, Handoff::Waiting) {
            Handoff::Parked(run) => {
                drop(handoff);
                let executor = run.dispatch.executor(run.result.executor());
                match executor {
                    None => run.run(Some(outcome)),
                    Some(executor) => executor.submit(Box::new(move || run.run(Some(outcome)))),
                }
            }
            _ => *handoff = Handoff::Gathered(outcome),
        }
    }

    fn fold_batch<R>(&mut self, results: Vec<R>) -> Result<(), Error>
    where
        F: FnMut(A, R) -> A,
    {
        let Some(acc) = self.acc.take() else {
            return Err(Error::Cancelled);
        };
        let fold = &mut self.fold;
        self.acc = Some(guarded(|| results.into_iter().fold(acc, fold))?);
        Ok(())
    }
}

struct Gather<R> {
    results: Vec<Option<R>>,
    remaining: usize,
    failure: Option<Error>,
}

impl<R> Gather<R> {
    fn finish(&mut self) -> Result<Vec<R>, Error> {
        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(self.results.drain(..).flatten().collect()),
        }
    }
}

/// Settles once every promise has settled: with all values in order, or with
/// the first failure. The first failure cancels the promises still pending.
fn settle_all<R: Clone + Send + 'static>(promises: Vec<Promise<R>>) -> Promise<Vec<R>> {
    let Some(first) = promises.first() else {
        return Promise::resolved(Vec::new());
    };

    let result = Promise::pending_with(
        first.executor().clone(),
        promises.iter().map(Promise::as_upstream).collect(),
    );
    let gather = Arc::new(Mutex::new(Gather {
        results: promises.iter().map(|_| None).collect(),
        remaining: promises.len(),
        failure: None,
    }));
    let members: Arc<[Promise<R>]> = promises.into();

    for (index, member) in members.iter().enumerate() {
        let gather = gather.clone();
        let members = members.clone();
        let target = result.clone();
        member.subscribe_raw(move |outcome| {
            let (first_failure, finished) = {
                let mut gather = gather.lock();
                let first_failure = match outcome {
                    Ok(value) => {
                        gather.results[index] = Some(value);
                        false
                    }
                    Err(e) if gather.failure.is_none() => {
                        gather.failure = Some(e);
                        true
                    }
                    Err(_) => false,
                };
                gather.remaining -= 1;
                let finished = (gather.remaining == 0).then(|| gather.finish());
                (first_failure, finished)
            };

            if first_failure {
                debug!(index, "Batch item failed, cancelling the rest of its batch");
                for member in members.iter() {
                    member.cancel();
                }
            }
            if let Some(outcome) = finished {
                target.settle(outcome);
            }
        });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn empty_input_resolves_with_init() {
        let result = partitioned(
            Vec::<u32>::new(),
            size(3),
            Promise::resolved,
            7u32,
            |a, b| a + b,
        );
        assert_eq!(result.outcome().unwrap().unwrap(), 7);
    }

    #[test]
    fn folds_in_item_order() {
        let result = partitioned(
            0..7u32,
            size(3),
            |n| Promise::supply_async(move || n),
            Vec::new(),
            |mut acc: Vec<u32>, n| {
                acc.push(n);
                acc
            },
        );
        assert_eq!(result.get().unwrap(), [0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn batches_never_overlap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (inf, pk) = (in_flight.clone(), peak.clone());

        let result = partitioned(
            0..9u32,
            size(3),
            move |n| {
                let now = inf.fetch_add(1, Ordering::SeqCst) + 1;
                pk.fetch_max(now, Ordering::SeqCst);
                let inf = inf.clone();
                Promise::supply_async(move || {
                    std::thread::sleep(core::time::Duration::from_millis(5));
                    inf.fetch_sub(1, Ordering::SeqCst);
                    n
                })
            },
            0u32,
            |a, b| a + b,
        );
        assert_eq!(result.get().unwrap(), 36);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn failure_cancels_batch_and_skips_the_rest() {
        let started = Arc::new(Mutex::new(Vec::new()));
        let pending = Arc::new(Mutex::new(Vec::new()));
        let (log, keep) = (started.clone(), pending.clone());

        let result = partitioned_on(
            Arc::new(tether_async::executor::Inline),
            0..10u32,
            size(3),
            move |n| {
                log.lock().push(n);
                match n {
                    4 => Promise::failed(Error::message("item 4")),
                    3 => {
                        let p = Promise::new();
                        keep.lock().push(p.clone());
                        p
                    }
                    _ => Promise::resolved(n),
                }
            },
            0u32,
            |a, b| a + b,
        );

        assert_eq!(result.get().unwrap_err().to_string(), "item 4");
        assert_eq!(*started.lock(), [0, 1, 2, 3, 4, 5]);
        assert!(pending.lock()[0].is_cancelled());
    }

    #[test]
    fn long_runs_of_settled_batches_stay_flat() {
        let result = partitioned(
            0..200_000u64,
            size(1),
            Promise::resolved,
            0u64,
            |a, b| a + b,
        );
        assert_eq!(result.outcome().unwrap().unwrap(), 19_999_900_000);

        let result = partitioned_on(
            default_executor(),
            0..100_000u64,
            size(1),
            Promise::resolved,
            0u64,
            |a, b| a + b,
        );
        assert_eq!(result.get().unwrap(), 4_999_950_000);
    }

    #[test]
    fn long_runs_of_pending_batches_stay_flat() {
        let result = partitioned(
            0..20_000u64,
            size(1),
            |n| Promise::supply_async(move || n),
            0u64,
            |a, b| a + b,
        );
        assert_eq!(result.get().unwrap(), 199_990_000);
    }

    #[test]
    fn panicking_fold_fails_the_result() {
        let result = partitioned(
            0..6u32,
            size(2),
            Promise::resolved,
            0u32,
            |a, b| {
                if b == 3 {
                    panic!("fold on 3");
                }
                a + b
            },
        );
        assert!(matches!(result.outcome().unwrap(), Err(Error::Panicked(_))));
    }

    #[test]
    fn cancelling_result_cancels_current_batch() {
        let pending = Arc::new(Mutex::new(Vec::new()));
        let keep = pending.clone();
        let result = partitioned(
            0..4u32,
            size(2),
            move |_| {
                let p = Promise::<u32>::new();
                keep.lock().push(p.clone());
                p
            },
            0u32,
            |a, b| a + b,
        );

        assert!(result.cancel());
        let pending = pending.lock();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(Promise::is_cancelled));
        assert!(result.is_cancelled());
    }
}
