//! Fan-out, merge and worker pools.

use crate::channel::{named_channel, Receiver};
use crate::processors::{ForwardStage, MapStage};
use crate::sinks::ForEachStage;
use crate::tracker::CompletionTracker;

use super::Pipeline;

impl Pipeline {
    /// Start `width` transform stages that compete for the items of `input`.
    ///
    /// Every input item is processed by exactly one branch. Each branch owns
    /// its own output channel, returned in branch order.
    ///
    /// # Panics
    ///
    /// Panics if `width` is zero.
    pub fn fan_out<T, U, F>(&self, input: Receiver<T>, f: F, width: usize) -> Vec<Receiver<U>>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnMut(T) -> U + Clone + Send + 'static,
    {
        assert!(width > 0, "fan-out width must be at least 1");
        let outputs = (0..width)
            .map(|_| {
                let name = self.stage_name("fan-out");
                let (tx, rx) = named_channel(format!("{}.out", name), self.config.capacity);
                self.spawn(MapStage::new(name, input.clone(), tx, f.clone()));
                rx
            })
            .collect();
        tracing::debug!(input = %input.name(), width, "fan-out started");
        outputs
    }

    /// Combine several channels into one.
    ///
    /// Each input gets its own forwarding branch. The output closes once every
    /// branch has stopped. Order is preserved per input only.
    pub fn merge<T>(&self, inputs: Vec<Receiver<T>>) -> Receiver<T>
    where
        T: Send + 'static,
    {
        let name = self.stage_name("merge");
        let (tx, rx) = named_channel(format!("{}.out", name), self.config.capacity);
        let (_tracker, senders) = CompletionTracker::register(tx, inputs.len());
        for (input, out) in inputs.into_iter().zip(senders) {
            let branch = format!("{}.branch-{}", name, out.index());
            self.spawn(ForwardStage::new(branch, input, out));
        }
        rx
    }

    /// Fan out over `width` workers and merge their outputs.
    ///
    /// The result carries the same multiset of items as a single transform,
    /// in no particular order.
    pub fn parallel<T, U, F>(&self, input: Receiver<T>, f: F, width: usize) -> Receiver<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnMut(T) -> U + Clone + Send + 'static,
    {
        let branches = self.fan_out(input, f, width);
        self.merge(branches)
    }

    /// Drain `input` with `width` sink workers.
    ///
    /// # Panics
    ///
    /// Panics if `width` is zero.
    pub fn for_each<T, F>(&self, input: Receiver<T>, f: F, width: usize)
    where
        T: Send + 'static,
        F: FnMut(T) + Clone + Send + 'static,
    {
        assert!(width > 0, "worker count must be at least 1");
        for _ in 0..width {
            let name = self.stage_name("for-each");
            self.spawn(ForEachStage::new(name, input.clone(), f.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn fan_out_then_merge_keeps_every_item() {
        let (pipeline, _token) = Pipeline::new();
        let branches = pipeline.fan_out(pipeline.source(vec![2, 3]), |n: i32| n * n, 2);
        assert_eq!(branches.len(), 2);

        let mut out = pipeline.merge(branches).drain().await;
        out.sort_unstable();
        assert_eq!(out, vec![4, 9]);
        pipeline.join().await.unwrap();
    }

    #[tokio::test]
    async fn merge_of_nothing_closes_immediately() {
        let (pipeline, _token) = Pipeline::new();
        let out = pipeline.merge(Vec::<Receiver<u8>>::new());
        assert_eq!(out.recv().await, None);
    }

    #[tokio::test]
    #[should_panic(expected = "fan-out width must be at least 1")]
    async fn zero_width_fan_out_panics() {
        let (pipeline, _token) = Pipeline::new();
        let _ = pipeline.fan_out(pipeline.source(0..1), |n: i32| n, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn for_each_processes_every_item_once() {
        let (pipeline, _token) = Pipeline::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let sum = Arc::new(AtomicUsize::new(0));
        let (s, t) = (seen.clone(), sum.clone());
        pipeline.for_each(
            pipeline.source(1..=100usize),
            move |n| {
                s.fetch_add(1, Ordering::SeqCst);
                t.fetch_add(n, Ordering::SeqCst);
            },
            4,
        );
        pipeline.join().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 100);
        assert_eq!(sum.load(Ordering::SeqCst), 5050);
    }
}
